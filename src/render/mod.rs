//! This module contains the implementation of the Continuous Distance-Dependent Level of Detail
//! (CDLOD) terrain renderer.
//!
//! The patches selected on the CPU for each terrain and view are streamed into an instance buffer.
//! Every terrain is then drawn with a single instanced call of a shared grid mesh per view.
//! In the vertex shader each grid vertex is displaced by the heightmap and morphed towards the
//! next coarser level near the outer edge of its lod ring, so that neighbouring levels form one
//! continuous surface without cracks.

pub mod terrain_bind_group;
pub mod terrain_pass;
pub mod terrain_pipeline;
pub mod terrain_view_bind_group;
