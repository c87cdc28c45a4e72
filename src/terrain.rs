//! Types for configuring terrains.

use crate::{
    config::TerrainConfig,
    error::TerrainError,
    geometry::GridMesh,
    heightmap::{HeightField, Heightmap},
    lod::LodLevelTable,
    selection::{InstanceArena, PatchSelector, SelectionFrame},
};
use bevy::{
    prelude::*,
    render::{extract_component::ExtractComponent, primitives::Frustum},
    utils::HashMap,
};
use std::sync::Arc;

/// Resource that stores components that are associated to a terrain entity.
/// This is used to persist components in the render world.
#[derive(Resource, Deref, DerefMut)]
pub struct TerrainComponents<C>(pub HashMap<Entity, C>);

impl<C> Default for TerrainComponents<C> {
    fn default() -> Self {
        Self(default())
    }
}

/// Everything derived from the heightmap of a terrain.
#[derive(Clone, Debug)]
pub struct TerrainData {
    pub heightmap: Heightmap,
    pub field: HeightField,
    pub lods: LodLevelTable,
    pub grid: Arc<GridMesh>,
}

/// The component of a heightmap terrain.
///
/// A terrain is created from a validated [`TerrainConfig`] and becomes renderable once a
/// heightmap has been set. Setting another heightmap replaces all derived state, the
/// render world picks the change up through [`Terrain::generation`].
#[derive(Clone, Debug, Component)]
pub struct Terrain {
    config: TerrainConfig,
    data: Option<TerrainData>,
    generation: u32,
}

impl Terrain {
    pub fn new(config: TerrainConfig) -> Result<Self, TerrainError> {
        config.validate()?;

        Ok(Self {
            config,
            data: None,
            generation: 0,
        })
    }

    pub fn from_heightmap(config: TerrainConfig, heightmap: Heightmap) -> Result<Self, TerrainError> {
        let mut terrain = Self::new(config)?;
        terrain.set_heightmap(heightmap)?;
        Ok(terrain)
    }

    /// Replaces the heightmap and recomputes the extents, the lod table and the grid.
    pub fn set_heightmap(&mut self, heightmap: Heightmap) -> Result<(), TerrainError> {
        let lods = LodLevelTable::new(&self.config)?;
        let field = HeightField::new(&heightmap, &self.config);
        let grid = Arc::new(GridMesh::new(self.config.patch_dim));

        info!(
            "Set a {}x{} heightmap spanning {} x {} units with {} lod levels.",
            heightmap.width(),
            heightmap.height(),
            field.size().x,
            field.size().y,
            lods.lod_count()
        );

        self.data = Some(TerrainData {
            heightmap,
            field,
            lods,
            grid,
        });
        self.generation = self.generation.wrapping_add(1);

        Ok(())
    }

    #[inline]
    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    #[inline]
    pub fn data(&self) -> Option<&TerrainData> {
        self.data.as_ref()
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    /// Incremented by every call to [`Terrain::set_heightmap`].
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// The elevation at the (x, z) position, if a heightmap is set and covers the position.
    pub fn elevation(&self, position: Vec2) -> Option<f32> {
        let data = self.data.as_ref()?;

        data.field
            .contains(position)
            .then(|| data.field.elevation(&data.heightmap, position))
    }

    /// Selects the patches visible from the viewpoint, if a heightmap is set.
    pub fn select(
        &self,
        frustum: &Frustum,
        viewpoint: Vec3,
        arena: &mut InstanceArena,
    ) -> Option<SelectionFrame> {
        let data = self.data.as_ref()?;

        Some(PatchSelector::select(
            &data.field,
            &data.lods,
            frustum,
            viewpoint,
            arena,
        ))
    }
}

/// The render world copy of a terrain: only the parts the GPU resources are built from.
#[derive(Clone, Component)]
pub struct ExtractedTerrain {
    pub generation: u32,
    pub data: TerrainData,
}

impl ExtractComponent for Terrain {
    type QueryData = &'static Terrain;
    type QueryFilter = ();
    type Out = ExtractedTerrain;

    fn extract_component(terrain: &Terrain) -> Option<Self::Out> {
        let data = terrain.data.clone()?;

        Some(ExtractedTerrain {
            generation: terrain.generation,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::MAX_PATCH_COUNT, math::tests::perspective_frustum};

    fn config() -> TerrainConfig {
        TerrainConfig {
            lod_count: 3,
            patch_dim: 32,
            chunk_size: 128.0,
            pixels_per_chunk: 129,
            ..default()
        }
    }

    fn heightmap() -> Heightmap {
        Heightmap::from_fn(257, 257, |x, y| ((x * 31 + y * 17) % 1024 * 64) as u16).unwrap()
    }

    #[test]
    fn rejects_invalid_configs() {
        let config = TerrainConfig {
            lod_count: 9,
            ..default()
        };

        assert!(matches!(
            Terrain::new(config),
            Err(TerrainError::LodCount { count: 9 })
        ));
    }

    #[test]
    fn unloaded_terrains_select_nothing() {
        let terrain = Terrain::new(config()).unwrap();
        let frustum = perspective_frustum(Vec3::Y * 100.0, Vec3::ZERO, 1000.0);
        let mut arena = InstanceArena::new(MAX_PATCH_COUNT);

        assert!(!terrain.is_loaded());
        assert!(terrain.select(&frustum, Vec3::Y * 100.0, &mut arena).is_none());
        assert!(terrain.elevation(Vec2::ZERO).is_none());
    }

    #[test]
    fn setting_the_same_heightmap_is_idempotent() {
        let mut terrain = Terrain::from_heightmap(config(), heightmap()).unwrap();
        let eye = Vec3::new(40.0, 60.0, -20.0);
        let frustum = perspective_frustum(eye, Vec3::new(0.0, 0.0, 50.0), 1000.0);
        let mut arena = InstanceArena::new(MAX_PATCH_COUNT);

        let first_lods = terrain.data().unwrap().lods.clone();
        let first_frame = terrain.select(&frustum, eye, &mut arena).unwrap();
        let first_instances = arena.instances().to_vec();

        terrain.set_heightmap(heightmap()).unwrap();

        let second_frame = terrain.select(&frustum, eye, &mut arena).unwrap();

        assert_eq!(terrain.generation(), 2);
        assert_eq!(terrain.data().unwrap().lods, first_lods);
        assert_eq!(second_frame, first_frame);
        assert_eq!(arena.instances(), first_instances.as_slice());
        assert!(!first_instances.is_empty());
    }

    #[test]
    fn replacing_the_heightmap_changes_the_extent() {
        let mut terrain = Terrain::from_heightmap(config(), heightmap()).unwrap();
        let small = Heightmap::new(vec![0; 65 * 33], 65, 33).unwrap();

        terrain.set_heightmap(small).unwrap();

        let data = terrain.data().unwrap();
        assert_eq!(data.field.size(), Vec2::new(64.0, 32.0));
        assert_eq!(terrain.elevation(Vec2::ZERO), Some(config().min_elevation));
        assert!(terrain.elevation(Vec2::new(32.0, -16.0)).is_some());
        assert!(terrain.elevation(Vec2::new(40.0, 0.0)).is_none());
        assert!(terrain.elevation(Vec2::new(0.0, 16.5)).is_none());
    }
}
