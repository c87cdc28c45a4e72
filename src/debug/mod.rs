//! Contains a debug resource and systems controlling it to visualize different internal
//! data of the plugin.
use crate::debug::camera::debug_camera_control;
use bevy::{
    input::mouse::MouseMotion,
    prelude::*,
    render::{Extract, RenderApp},
};

pub mod camera;

/// Adds a terrain debug config, a debug camera and debug control systems.
pub struct TerrainDebugPlugin;

impl Plugin for TerrainDebugPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<DebugTerrain>()
            .add_event::<MouseMotion>()
            .add_systems(Update, (debug_camera_control, toggle_debug));

        if let Some(render_app) = app.get_sub_app_mut(RenderApp) {
            render_app
                .init_resource::<DebugTerrain>()
                .add_systems(ExtractSchedule, extract_debug);
        }
    }
}

#[derive(Clone, Debug, Resource)]
pub struct DebugTerrain {
    /// Tints every patch with the color of its lod level.
    pub show_lod: bool,
    /// Blends vertices towards the next coarser level near the ring boundaries.
    pub morph: bool,
    pub lighting: bool,
    pub wireframe: bool,
    /// Keeps the last selection, so that it can be inspected from another angle.
    pub freeze: bool,
}

impl Default for DebugTerrain {
    fn default() -> Self {
        Self {
            show_lod: false,
            morph: true,
            lighting: true,
            wireframe: false,
            freeze: false,
        }
    }
}

pub fn extract_debug(
    mut debug_terrain: ResMut<DebugTerrain>,
    extracted_debug: Extract<Res<DebugTerrain>>,
) {
    *debug_terrain = extracted_debug.clone();
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

pub fn toggle_debug(
    input: Option<Res<ButtonInput<KeyCode>>>,
    mut debug_terrain: ResMut<DebugTerrain>,
) {
    let Some(input) = input else {
        return;
    };

    if input.just_pressed(KeyCode::KeyL) {
        debug_terrain.show_lod = !debug_terrain.show_lod;
        info!("Toggled the lod view {}.", on_off(debug_terrain.show_lod));
    }
    if input.just_pressed(KeyCode::KeyM) {
        debug_terrain.morph = !debug_terrain.morph;
        info!("Toggled the mesh morph {}.", on_off(debug_terrain.morph));
    }
    if input.just_pressed(KeyCode::KeyS) {
        debug_terrain.lighting = !debug_terrain.lighting;
        info!("Toggled the lighting {}.", on_off(debug_terrain.lighting));
    }
    if input.just_pressed(KeyCode::KeyW) {
        debug_terrain.wireframe = !debug_terrain.wireframe;
        info!("Toggled the wireframe view {}.", on_off(debug_terrain.wireframe));
    }
    if input.just_pressed(KeyCode::KeyF) {
        debug_terrain.freeze = !debug_terrain.freeze;
        let action = if debug_terrain.freeze { "Froze" } else { "Unfroze" };
        info!("{action} the patch selection.");
    }
}
