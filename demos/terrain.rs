//! Renders a terrain from a heightmap given on the command line, or from a procedural one.
//!
//! `cargo run --example terrain -- [heightmap.png|heightmap.tif] [config.ron]`

use bevy::{
    diagnostic::{FrameTimeDiagnosticsPlugin, LogDiagnosticsPlugin},
    prelude::*,
    render::{
        diagnostic::RenderDiagnosticsPlugin,
        settings::{RenderCreation, WgpuFeatures, WgpuSettings},
        RenderPlugin,
    },
};
use bevy_cdlod::prelude::*;
use std::{env, f32::consts::TAU};

const PROCEDURAL_SIZE: u32 = 2049;

fn procedural_heightmap() -> Result<Heightmap, TerrainError> {
    let scale = 1.0 / (PROCEDURAL_SIZE - 1) as f32;

    Heightmap::from_fn(PROCEDURAL_SIZE, PROCEDURAL_SIZE, |x, y| {
        let position = Vec2::new(x as f32, y as f32) * scale * TAU;

        let hills = (position.x * 2.0).sin() * (position.y * 1.5).cos();
        let ridges = ((position.x + position.y) * 7.0).sin() * (position.y * 5.0 - position.x).cos();
        let detail = (position.x * 31.0).sin() * (position.y * 29.0).sin();

        let height = 0.5 + 0.3 * hills + 0.12 * ridges + 0.03 * detail;
        (height.clamp(0.0, 1.0) * u16::MAX as f32) as u16
    })
}

fn main() -> anyhow::Result<()> {
    let mut args = env::args().skip(1);

    let heightmap = match args.next() {
        Some(path) => Heightmap::load(path)?,
        None => procedural_heightmap()?,
    };
    let config = match args.next() {
        Some(path) => TerrainConfig::load(path)?,
        None => TerrainConfig {
            lod_count: 4,
            patch_dim: 16,
            max_elevation: 160.0,
            min_elevation: 0.0,
            ..default()
        },
    };

    let terrain = Terrain::from_heightmap(config, heightmap)?;

    App::new()
        .add_plugins((
            DefaultPlugins.set(RenderPlugin {
                render_creation: RenderCreation::Automatic(WgpuSettings {
                    features: WgpuFeatures::TEXTURE_FORMAT_16BIT_NORM
                        | WgpuFeatures::POLYGON_MODE_LINE,
                    ..default()
                }),
                ..default()
            }),
            FrameTimeDiagnosticsPlugin,
            RenderDiagnosticsPlugin,
            LogDiagnosticsPlugin {
                filter: Some(vec![
                    TerrainStats::SELECT_TIME,
                    TerrainStats::RENDER_TIME,
                    TerrainStats::PATCH_COUNT,
                    TerrainStats::GPU_TIME,
                ]),
                ..default()
            },
            TerrainPlugin,
            TerrainDebugPlugin,
        ))
        .insert_resource(ClearColor(Color::srgb(0.55, 0.7, 0.9)))
        .insert_resource(SpawnedTerrain(Some(terrain)))
        .add_systems(Startup, setup)
        .run();

    Ok(())
}

#[derive(Resource)]
struct SpawnedTerrain(Option<Terrain>);

fn setup(mut commands: Commands, mut terrain: ResMut<SpawnedTerrain>) {
    if let Some(terrain) = terrain.0.take() {
        commands.spawn(terrain);
    }

    let camera = DebugCamera::default();

    commands.spawn((
        Camera3d::default(),
        camera.transform(Vec3::new(-600.0, 200.0, -600.0)),
        TerrainView,
        camera,
    ));
}
