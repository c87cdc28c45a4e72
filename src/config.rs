use crate::error::TerrainError;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// The maximum number of lod levels a terrain can have.
/// The terrain uniform block reserves this many slots for every per level array.
pub const MAX_LOD_COUNT: usize = 8;

/// The size of the instance buffer in patches.
/// Selections exceeding it are truncated.
pub const MAX_PATCH_COUNT: usize = 4096;

/// Growth factor of the distance covered by each coarser lod level.
pub(crate) const LOD_RANGE_GROWTH: f32 = 1.5;

/// The load time parameters of a terrain.
///
/// The coarsest lod level covers exactly one chunk with a single patch, thus
/// `pixels_per_chunk - 1` has to equal `patch_dim * 2^(lod_count - 1)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// The number of lod levels.
    pub lod_count: u32,
    /// The number of grid cells along one side of a patch.
    pub patch_dim: u32,
    /// The world size of a root quadtree node.
    pub chunk_size: f32,
    /// The number of heightmap samples along one side of a chunk.
    pub pixels_per_chunk: u32,
    /// The fraction of each lod ring used to morph into the next coarser level.
    pub morph_zone_ratio: f32,
    /// The minimal distance covered by the finest lod level.
    pub base_range: f32,
    /// The elevation of a zero sample.
    pub min_elevation: f32,
    /// The elevation of a full scale sample.
    pub max_elevation: f32,
    /// The number of patches a single view may select per frame.
    pub max_patch_count: u32,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            lod_count: 5,
            patch_dim: 8,
            chunk_size: 100.0,
            pixels_per_chunk: 129,
            morph_zone_ratio: 0.3,
            base_range: 100.0,
            min_elevation: -39.938_13,
            max_elevation: 133.064_01,
            max_patch_count: MAX_PATCH_COUNT as u32,
        }
    }
}

impl TerrainConfig {
    pub fn from_ron(source: &str) -> Result<Self, TerrainError> {
        let config: Self = ron::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a config stored as RON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TerrainError> {
        Self::from_ron(&fs::read_to_string(path)?)
    }

    /// The world size of a single heightmap sample.
    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.chunk_size / (self.pixels_per_chunk - 1) as f32
    }

    /// The world size of a patch at the given level.
    #[inline]
    pub fn patch_size(&self, level: u32) -> f32 {
        self.cell_size() * self.patch_dim as f32 * (1u32 << level) as f32
    }

    pub fn validate(&self) -> Result<(), TerrainError> {
        if self.lod_count == 0 || self.lod_count as usize > MAX_LOD_COUNT {
            return Err(TerrainError::LodCount {
                count: self.lod_count,
            });
        }
        // (patch_dim + 1)^2 vertices have to be addressable by 16 bit indices
        if self.patch_dim == 0 || self.patch_dim > 255 {
            return Err(TerrainError::PatchDim {
                patch_dim: self.patch_dim,
            });
        }
        if !(self.chunk_size.is_finite() && self.chunk_size > 0.0) {
            return Err(TerrainError::ChunkSize {
                chunk_size: self.chunk_size,
            });
        }
        if self.pixels_per_chunk < 2
            || self.pixels_per_chunk - 1 != self.patch_dim << (self.lod_count - 1)
        {
            return Err(TerrainError::ChunkMismatch {
                pixels_per_chunk: self.pixels_per_chunk,
                patch_dim: self.patch_dim,
                lod_count: self.lod_count,
            });
        }
        if !(self.morph_zone_ratio > 0.0 && self.morph_zone_ratio < 1.0) {
            return Err(TerrainError::MorphZoneRatio {
                ratio: self.morph_zone_ratio,
            });
        }
        if !(self.base_range.is_finite() && self.base_range > 0.0) {
            return Err(TerrainError::BaseRange {
                range: self.base_range,
            });
        }
        if !(self.min_elevation < self.max_elevation) {
            return Err(TerrainError::ElevationRange {
                min: self.min_elevation,
                max: self.max_elevation,
            });
        }
        if self.max_patch_count == 0 || self.max_patch_count as usize > MAX_PATCH_COUNT {
            return Err(TerrainError::PatchCapacity {
                count: self.max_patch_count,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TerrainConfig::default();
        config.validate().unwrap();

        assert_eq!(config.cell_size(), 100.0 / 128.0);
        assert_eq!(config.patch_size(config.lod_count - 1), config.chunk_size);
    }

    #[test]
    fn rejects_too_many_lods() {
        let config = TerrainConfig {
            lod_count: MAX_LOD_COUNT as u32 + 1,
            ..default_config()
        };

        assert!(matches!(
            config.validate(),
            Err(TerrainError::LodCount { count: 9 })
        ));
    }

    #[test]
    fn rejects_mismatched_chunks() {
        let config = TerrainConfig {
            pixels_per_chunk: 100,
            ..default_config()
        };

        assert!(matches!(
            config.validate(),
            Err(TerrainError::ChunkMismatch { .. })
        ));
    }

    #[test]
    fn rejects_invalid_ratios_and_ranges() {
        for ratio in [0.0, 1.0, f32::NAN] {
            let config = TerrainConfig {
                morph_zone_ratio: ratio,
                ..default_config()
            };
            assert!(config.validate().is_err());
        }

        let config = TerrainConfig {
            min_elevation: 10.0,
            max_elevation: 10.0,
            ..default_config()
        };
        assert!(matches!(
            config.validate(),
            Err(TerrainError::ElevationRange { .. })
        ));

        let config = TerrainConfig {
            max_patch_count: MAX_PATCH_COUNT as u32 + 1,
            ..default_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_ron() {
        let config = TerrainConfig::from_ron("(lod_count: 3, patch_dim: 32)").unwrap();

        assert_eq!(config.lod_count, 3);
        assert_eq!(config.patch_dim, 32);
        assert_eq!(config.chunk_size, 100.0);
    }

    #[test]
    fn ron_is_validated() {
        assert!(TerrainConfig::from_ron("(lod_count: 4)").is_err());
        assert!(TerrainConfig::from_ron("(lod_count: ").is_err());
    }

    fn default_config() -> TerrainConfig {
        TerrainConfig::default()
    }
}
