//! Types and systems for the views (cameras) a terrain is selected for.

use crate::{
    debug::DebugTerrain,
    diagnostics::TerrainStats,
    selection::{InstanceArena, SelectionFrame},
    terrain::Terrain,
};
use bevy::{
    ecs::entity::EntityHashSet,
    prelude::*,
    render::primitives::Frustum,
    utils::{HashMap, HashSet},
};
use std::time::Instant;

/// Resource that stores components that are associated to a terrain entity and a view entity.
/// This is used to persist components in the render world.
#[derive(Resource, Deref, DerefMut)]
pub struct TerrainViewComponents<C>(pub HashMap<(Entity, Entity), C>);

impl<C> Default for TerrainViewComponents<C> {
    fn default() -> Self {
        Self(default())
    }
}

/// A marker component used to identify the cameras terrains are selected and drawn for.
#[derive(Clone, Copy, Default, Component)]
pub struct TerrainView;

/// The patches selected for one terrain and one view.
#[derive(Clone, Debug)]
pub struct TerrainSelection {
    pub arena: InstanceArena,
    pub frame: SelectionFrame,
    /// The viewpoint the patches were selected for. Morphing has to use the same point.
    pub viewpoint: Vec3,
}

impl TerrainSelection {
    pub fn new(capacity: usize) -> Self {
        Self {
            arena: InstanceArena::new(capacity),
            frame: default(),
            viewpoint: Vec3::ZERO,
        }
    }
}

/// Selects the patches of every terrain for every terrain view.
pub(crate) fn select_terrain_patches(
    debug: Option<Res<DebugTerrain>>,
    mut stats: ResMut<TerrainStats>,
    mut selections: ResMut<TerrainViewComponents<TerrainSelection>>,
    mut live_entities: Local<HashSet<(Entity, Entity)>>,
    terrains: Query<(Entity, &Terrain)>,
    views: Query<(Entity, &GlobalTransform, &Frustum), With<TerrainView>>,
) {
    if debug.is_some_and(|debug| debug.freeze) {
        return;
    }

    let start = Instant::now();

    live_entities.clear();
    let mut patch_count = 0;
    let mut max_level = u32::MAX;
    let mut truncated = false;

    for (terrain_entity, terrain) in &terrains {
        let capacity = terrain.config().max_patch_count as usize;

        for (view_entity, transform, frustum) in &views {
            let selection = selections
                .entry((terrain_entity, view_entity))
                .or_insert_with(|| TerrainSelection::new(capacity));

            if selection.arena.capacity() != capacity {
                *selection = TerrainSelection::new(capacity);
            }

            let viewpoint = transform.translation();

            let Some(frame) = terrain.select(frustum, viewpoint, &mut selection.arena) else {
                continue;
            };

            if frame.truncated {
                debug!(
                    "Truncated the selection of terrain {terrain_entity} for view {view_entity} at {} patches.",
                    frame.patch_count
                );
            }

            selection.frame = frame;
            selection.viewpoint = viewpoint;
            live_entities.insert((terrain_entity, view_entity));

            patch_count += frame.patch_count;
            max_level = max_level.min(frame.max_level);
            truncated |= frame.truncated;
        }
    }

    selections.retain(|key, _| live_entities.contains(key));

    stats.select_time = start.elapsed();
    stats.patch_count = patch_count;
    stats.max_level = if live_entities.is_empty() { 0 } else { max_level };
    stats.truncated = truncated;
}

/// Drops the selections of despawned views and terrains while the selection is frozen.
pub(crate) fn remove_stale_selections(
    mut selections: ResMut<TerrainViewComponents<TerrainSelection>>,
    terrains: Query<Entity, With<Terrain>>,
    views: Query<Entity, With<TerrainView>>,
) {
    let terrains = terrains.iter().collect::<EntityHashSet>();
    let views = views.iter().collect::<EntityHashSet>();

    selections.retain(|(terrain, view), _| terrains.contains(terrain) && views.contains(view));
}
