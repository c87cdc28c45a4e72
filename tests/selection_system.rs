use bevy::{diagnostic::DiagnosticsStore, prelude::*, render::primitives::Frustum};
use bevy_cdlod::prelude::*;

fn config() -> TerrainConfig {
    TerrainConfig {
        lod_count: 3,
        patch_dim: 32,
        chunk_size: 128.0,
        pixels_per_chunk: 129,
        ..default()
    }
}

/// An orthographic frustum looking straight down onto a square around the origin.
fn top_down_frustum(half_size: f32) -> Frustum {
    let eye = Vec3::Y * half_size;
    let world_from_view = Transform::from_translation(eye).looking_at(Vec3::ZERO, Vec3::NEG_Z);
    let clip_from_view = Mat4::orthographic_rh(
        -half_size,
        half_size,
        -half_size,
        half_size,
        2.0 * half_size,
        0.0,
    );

    Frustum::from_clip_from_world(&(clip_from_view * world_from_view.compute_matrix().inverse()))
}

fn headless_app() -> App {
    let mut app = App::new();
    app.add_plugins((MinimalPlugins, TerrainPlugin));
    app
}

fn spawn_view(app: &mut App, translation: Vec3) -> Entity {
    app.world_mut()
        .spawn((
            TerrainView,
            GlobalTransform::from_translation(translation),
            top_down_frustum(1000.0),
        ))
        .id()
}

#[test]
fn selects_the_coarsest_level_from_far_away() {
    let mut app = headless_app();
    let heightmap = Heightmap::new(vec![0; 257 * 257], 257, 257).unwrap();
    let terrain = app
        .world_mut()
        .spawn(Terrain::from_heightmap(config(), heightmap).unwrap())
        .id();
    let view = spawn_view(&mut app, Vec3::new(0.0, 5000.0, 0.0));

    app.update();

    let stats = app.world().resource::<TerrainStats>();
    assert_eq!(stats.patch_count, 4);
    assert_eq!(stats.max_level, 2);
    assert!(!stats.truncated);

    let selections = app.world().resource::<TerrainViewComponents<TerrainSelection>>();
    let selection = &selections[&(terrain, view)];
    assert!(selection.arena.instances().iter().all(|patch| patch.level == 2));

    let store = app.world().resource::<DiagnosticsStore>();
    let patch_count = store.get(&TerrainStats::PATCH_COUNT).unwrap();
    assert_eq!(patch_count.value(), Some(4.0));
}

#[test]
fn terrains_without_heightmap_are_skipped_until_loaded() {
    let mut app = headless_app();
    let terrain = app
        .world_mut()
        .spawn(Terrain::new(config()).unwrap())
        .id();
    spawn_view(&mut app, Vec3::new(0.0, 10.0, 0.0));

    app.update();
    assert_eq!(app.world().resource::<TerrainStats>().patch_count, 0);

    let heightmap = Heightmap::from_fn(257, 257, |x, _| (x * 200) as u16).unwrap();
    app.world_mut()
        .get_mut::<Terrain>(terrain)
        .unwrap()
        .set_heightmap(heightmap)
        .unwrap();
    app.update();

    let stats = app.world().resource::<TerrainStats>();
    assert!(stats.patch_count > 4);
    assert_eq!(stats.max_level, 0);
}

#[test]
fn removing_the_view_clears_the_selection() {
    let mut app = headless_app();
    let heightmap = Heightmap::new(vec![0; 257 * 257], 257, 257).unwrap();
    app.world_mut()
        .spawn(Terrain::from_heightmap(config(), heightmap).unwrap());
    let view = spawn_view(&mut app, Vec3::new(0.0, 10.0, 0.0));

    app.update();
    app.world_mut().despawn(view);
    app.update();

    assert!(app
        .world()
        .resource::<TerrainViewComponents<TerrainSelection>>()
        .is_empty());
    assert_eq!(app.world().resource::<TerrainStats>().patch_count, 0);
}
