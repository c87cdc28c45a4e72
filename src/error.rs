use crate::config::{MAX_LOD_COUNT, MAX_PATCH_COUNT};
use derive_more::derive::{Display, Error, From};

/// Everything that can go wrong while configuring a terrain or loading its heightmap.
///
/// Selection itself never fails, running out of instance capacity only truncates detail.
#[derive(Debug, Display, Error, From)]
pub enum TerrainError {
    #[display("lod count {count} is outside of 1..={}", MAX_LOD_COUNT)]
    LodCount { count: u32 },
    #[display("patch dimension {patch_dim} is outside of 1..=255")]
    PatchDim { patch_dim: u32 },
    #[display(
        "{pixels_per_chunk} pixels per chunk do not match {patch_dim} cells per patch over {lod_count} lods"
    )]
    ChunkMismatch {
        pixels_per_chunk: u32,
        patch_dim: u32,
        lod_count: u32,
    },
    #[display("chunk size {chunk_size} has to be positive and finite")]
    ChunkSize { chunk_size: f32 },
    #[display("morph zone ratio {ratio} is outside of (0, 1)")]
    MorphZoneRatio { ratio: f32 },
    #[display("elevation range {min}..{max} is empty")]
    ElevationRange { min: f32, max: f32 },
    #[display("patch capacity {count} is outside of 1..={}", MAX_PATCH_COUNT)]
    PatchCapacity { count: u32 },
    #[display("base lod range {range} has to be positive and finite")]
    BaseRange { range: f32 },
    #[display("a {width}x{height} heightmap does not span any terrain")]
    DegenerateHeightmap { width: u32, height: u32 },
    #[display("expected {expected} height samples, got {actual}")]
    SampleCount { expected: usize, actual: usize },
    #[display("a {width}x{height} heightmap exceeds the texture limit of {max_dimension}")]
    TextureSize {
        width: u32,
        height: u32,
        max_dimension: u32,
    },
    #[display("unsupported tiff sample format")]
    UnsupportedTiff,
    #[from]
    Io(std::io::Error),
    #[from]
    Ron(ron::error::SpannedError),
    #[from]
    Image(image::ImageError),
    #[from]
    Tiff(tiff::TiffError),
}
