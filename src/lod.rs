use crate::{
    config::{TerrainConfig, LOD_RANGE_GROWTH, MAX_LOD_COUNT},
    error::TerrainError,
};
use bevy::math::Vec2;
use std::ops::Deref;

/// A fixed capacity array that refuses to grow past `N` elements.
///
/// Mirrors the fixed size arrays of the GPU side uniform blocks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedArray<T, const N: usize> {
    items: [T; N],
    len: usize,
}

impl<T: Copy + Default, const N: usize> Default for FixedArray<T, N> {
    fn default() -> Self {
        Self {
            items: [T::default(); N],
            len: 0,
        }
    }
}

impl<T: Copy + Default, const N: usize> FixedArray<T, N> {
    /// Appends an item, handing it back if the array is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.len == N {
            return Err(item);
        }

        self.items[self.len] = item;
        self.len += 1;
        Ok(())
    }

    pub fn last_mut(&mut self) -> Option<&mut T> {
        self.items[..self.len].last_mut()
    }

    /// All `N` slots, unused ones are default initialized.
    pub fn padded(&self) -> &[T; N] {
        &self.items
    }
}

impl<T, const N: usize> Deref for FixedArray<T, N> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.items[..self.len]
    }
}

/// The distances and morph parameters of a single lod level.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LodLevel {
    /// The outer distance up to which this level is used.
    pub range: f32,
    /// The distance at which vertices start to morph towards the next coarser level.
    pub morph_start: f32,
    /// The length of the morph zone, zero for the coarsest level.
    pub morph_range: f32,
    /// The world size of one grid cell at this level.
    pub patch_scale: f32,
}

impl LodLevel {
    /// The coefficients `(a, b)` of the morph ramp `clamp(distance * a + b, 0, 1)`.
    pub fn morph_params(&self) -> Vec2 {
        if self.morph_range > 0.0 {
            Vec2::new(1.0 / self.morph_range, -self.morph_start / self.morph_range)
        } else {
            Vec2::ZERO
        }
    }

    /// The blend factor towards the next coarser level at the given distance.
    pub fn morph_factor(&self, distance: f32) -> f32 {
        let params = self.morph_params();
        (distance * params.x + params.y).clamp(0.0, 1.0)
    }
}

/// Per level distance ranges, ordered from the finest (0) to the coarsest level.
///
/// The ranges are strictly increasing and never smaller than twice the diagonal of
/// the level's patches, so a patch can always morph out completely before it is replaced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LodLevelTable {
    levels: FixedArray<LodLevel, MAX_LOD_COUNT>,
    patch_dim: u32,
}

impl LodLevelTable {
    pub fn new(config: &TerrainConfig) -> Result<Self, TerrainError> {
        Self::build(
            config.lod_count,
            config.patch_dim,
            config.cell_size(),
            config.base_range,
            config.morph_zone_ratio,
        )
    }

    pub fn build(
        lod_count: u32,
        patch_dim: u32,
        cell_size: f32,
        base_range: f32,
        morph_zone_ratio: f32,
    ) -> Result<Self, TerrainError> {
        if lod_count == 0 || lod_count as usize > MAX_LOD_COUNT {
            return Err(TerrainError::LodCount { count: lod_count });
        }

        let mut levels = FixedArray::default();

        let mut cell_size = cell_size;
        let mut size2 = (cell_size * patch_dim as f32).powi(2);
        let mut range = base_range;
        let mut total_range = 0.0;

        for _ in 0..lod_count {
            let min_range = 2.0 * (size2 + size2).sqrt();
            range = f32::max(range, min_range);
            total_range += range;

            let morph_range = range * morph_zone_ratio;

            let level = LodLevel {
                range: total_range,
                morph_start: total_range - morph_range,
                morph_range,
                patch_scale: cell_size,
            };
            levels
                .push(level)
                .map_err(|_| TerrainError::LodCount { count: lod_count })?;

            range *= LOD_RANGE_GROWTH;
            size2 *= 4.0;
            cell_size *= 2.0;
        }

        // there is no coarser level to morph into
        if let Some(coarsest) = levels.last_mut() {
            coarsest.morph_start = coarsest.range;
            coarsest.morph_range = 0.0;
        }

        Ok(Self { levels, patch_dim })
    }

    #[inline]
    pub fn lod_count(&self) -> u32 {
        self.levels.len() as u32
    }

    #[inline]
    pub fn coarsest_level(&self) -> u32 {
        self.lod_count() - 1
    }

    #[inline]
    pub fn level(&self, level: u32) -> &LodLevel {
        &self.levels[level as usize]
    }

    #[inline]
    pub fn range(&self, level: u32) -> f32 {
        self.level(level).range
    }

    #[inline]
    pub fn patch_dim(&self) -> u32 {
        self.patch_dim
    }

    /// The world size of a patch at the given level.
    #[inline]
    pub fn patch_size(&self, level: u32) -> f32 {
        self.level(level).patch_scale * self.patch_dim as f32
    }

    pub fn levels(&self) -> &[LodLevel] {
        &self.levels
    }

    /// All [`MAX_LOD_COUNT`] levels, the unused ones zeroed, as laid out on the GPU.
    pub fn padded(&self) -> &[LodLevel; MAX_LOD_COUNT] {
        self.levels.padded()
    }

    /// The finest level selection may descend to when the viewer is `vertical_distance`
    /// above or below the elevation range of the terrain.
    pub fn max_level(&self, vertical_distance: f32) -> u32 {
        self.levels[..self.levels.len() - 1]
            .iter()
            .take_while(|level| vertical_distance > level.range)
            .count() as u32
    }
}
