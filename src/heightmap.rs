use crate::{config::TerrainConfig, error::TerrainError};
use bevy::{log::info, math::Vec2, math::Vec4};
use std::{fs::File, io::BufReader, path::Path, sync::Arc};
use tiff::decoder::{Decoder, DecodingResult};

/// A grid of 16 bit elevation samples, stored row by row.
///
/// The samples are shared, cloning a heightmap is cheap.
#[derive(Clone, Debug, PartialEq)]
pub struct Heightmap {
    width: u32,
    height: u32,
    samples: Arc<[u16]>,
}

impl Heightmap {
    pub fn new(samples: impl Into<Arc<[u16]>>, width: u32, height: u32) -> Result<Self, TerrainError> {
        // a single row or column of samples has no area to triangulate
        if width < 2 || height < 2 {
            return Err(TerrainError::DegenerateHeightmap { width, height });
        }

        let samples = samples.into();
        let expected = width as usize * height as usize;

        if samples.len() != expected {
            return Err(TerrainError::SampleCount {
                expected,
                actual: samples.len(),
            });
        }

        Ok(Self {
            width,
            height,
            samples,
        })
    }

    /// Builds a heightmap by evaluating `sample` at every grid position.
    pub fn from_fn(
        width: u32,
        height: u32,
        mut sample: impl FnMut(u32, u32) -> u16,
    ) -> Result<Self, TerrainError> {
        let samples = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| sample(x, y))
            .collect::<Vec<_>>();

        Self::new(samples, width, height)
    }

    /// Loads a heightmap from disk.
    ///
    /// TIFF files are decoded directly, all other formats go through the `image` crate
    /// and are converted to 16 bit luminance.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TerrainError> {
        let path = path.as_ref();

        let is_tiff = path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| matches!(extension, "tif" | "tiff"));

        let heightmap = if is_tiff {
            Self::load_tiff(path)?
        } else {
            let image = image::open(path)?.into_luma16();
            let (width, height) = image.dimensions();

            Self::new(image.into_raw(), width, height)?
        };

        info!(
            "Loaded the {}x{} heightmap {}.",
            heightmap.width,
            heightmap.height,
            path.display()
        );

        Ok(heightmap)
    }

    fn load_tiff(path: &Path) -> Result<Self, TerrainError> {
        let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
        let (width, height) = decoder.dimensions()?;

        let samples = match decoder.read_image()? {
            DecodingResult::U16(data) => data,
            DecodingResult::U8(data) => data.into_iter().map(|s| u16::from(s) * 257).collect(),
            _ => return Err(TerrainError::UnsupportedTiff),
        };

        Self::new(samples, width, height)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn sample(&self, x: u32, y: u32) -> u16 {
        self.samples[(y * self.width + x) as usize]
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    /// Checks that the heightmap fits into a single texture of the device.
    pub fn check_texture_size(&self, max_dimension: u32) -> Result<(), TerrainError> {
        if self.width > max_dimension || self.height > max_dimension {
            return Err(TerrainError::TextureSize {
                width: self.width,
                height: self.height,
                max_dimension,
            });
        }

        Ok(())
    }

    /// The raw sample bytes, ready for a `R16Unorm` texture upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.samples)
    }
}

/// The world space footprint of a heightmap, centered on the origin.
///
/// X maps to heightmap columns and Z to heightmap rows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeightField {
    pub width: u32,
    pub height: u32,
    pub cell_size: f32,
    pub min_elevation: f32,
    pub max_elevation: f32,
    /// The minimal corner (x, z).
    pub min: Vec2,
    /// The maximal corner (x, z).
    pub max: Vec2,
    pixels_per_meter: f32,
}

impl HeightField {
    pub fn new(heightmap: &Heightmap, config: &TerrainConfig) -> Self {
        let cell_size = config.cell_size();
        let span = Vec2::new(
            (heightmap.width() - 1) as f32,
            (heightmap.height() - 1) as f32,
        ) * cell_size;
        let min = -0.5 * span;

        Self {
            width: heightmap.width(),
            height: heightmap.height(),
            cell_size,
            min_elevation: config.min_elevation,
            max_elevation: config.max_elevation,
            min,
            max: min + span,
            pixels_per_meter: (config.pixels_per_chunk - 1) as f32 / config.chunk_size,
        }
    }

    #[inline]
    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    #[inline]
    pub fn area(&self) -> f32 {
        let size = self.size();
        size.x * size.y
    }

    /// Whether the (x, z) position lies within the footprint.
    pub fn contains(&self, position: Vec2) -> bool {
        position.cmpge(self.min).all() && position.cmple(self.max).all()
    }

    /// `(min.x, min.z, max.x, max.z)`
    pub fn aabb(&self) -> Vec4 {
        Vec4::new(self.min.x, self.min.y, self.max.x, self.max.y)
    }

    /// Maps world (x, z) to texture coordinates hitting sample centers: `uv = xz * t.xy + t.zw`.
    pub fn uv_transform(&self) -> Vec4 {
        let du = 1.0 / self.width as f32;
        let dv = 1.0 / self.height as f32;
        let ppm = self.pixels_per_meter;

        Vec4::new(
            ppm * du,
            ppm * dv,
            (-self.min.x * ppm + 0.5) * du,
            (-self.min.y * ppm + 0.5) * dv,
        )
    }

    /// Decodes a normalized sample into an elevation: `y = s * t.x + t.y`.
    pub fn height_transform(&self) -> Vec4 {
        Vec4::new(
            self.max_elevation - self.min_elevation,
            self.min_elevation,
            0.0,
            0.0,
        )
    }

    /// The elevation of the terrain at the (x, z) position, sampled bilinearly.
    pub fn elevation(&self, heightmap: &Heightmap, position: Vec2) -> f32 {
        let grid = ((position - self.min) / self.cell_size).clamp(Vec2::ZERO, self.size() / self.cell_size);
        let x0 = (grid.x.floor() as u32).min(heightmap.width() - 2);
        let y0 = (grid.y.floor() as u32).min(heightmap.height() - 2);
        let fraction = grid - Vec2::new(x0 as f32, y0 as f32);

        let sample = |x, y| heightmap.sample(x, y) as f32 / u16::MAX as f32;
        let top = sample(x0, y0) * (1.0 - fraction.x) + sample(x0 + 1, y0) * fraction.x;
        let bottom = sample(x0, y0 + 1) * (1.0 - fraction.x) + sample(x0 + 1, y0 + 1) * fraction.x;
        let normalized = top * (1.0 - fraction.y) + bottom * fraction.y;

        let transform = self.height_transform();
        normalized * transform.x + transform.y
    }

    /// The vertical distance between the position and the elevation range of the terrain.
    pub fn vertical_distance(&self, elevation: f32) -> f32 {
        (elevation - self.max_elevation)
            .max(self.min_elevation - elevation)
            .max(0.0)
    }
}
