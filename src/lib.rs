//! This crate renders large height-field terrains with the Continuous Distance-Dependent Level of
//! Detail (CDLOD) technique.
//!
//! # Background
//! Even a small terrain with a heightmap of 1000x1000 pixels would require 1 million vertices
//! to be rendered each frame per view with a naive approach without any lod strategy.
//! CDLOD distributes the vertices by distance instead: the terrain is covered by a quadtree of
//! square patches, every level doubling the patch size of the one below, and each level is only
//! used inside a distance ring around the viewer.
//!
//! ## Selection
//! Each frame the quadtree is traversed on the CPU for every [`Terrain`](terrain::Terrain) and
//! [`TerrainView`](terrain_view::TerrainView). Patches outside of the view frustum are culled,
//! the others are refined until they are fine enough for their distance.
//! The result is a flat list of patch instances, see the [`selection`] module.
//!
//! ## Rendering
//! All selected patches of a terrain are drawn with a single instanced draw call of one shared
//! grid mesh, which is displaced by the heightmap in the vertex shader.
//! Near the outer edge of its ring every patch morphs into the next coarser level, so that
//! adjacent levels meet without cracks or popping. See the [`render`] module for more information.

use crate::{
    diagnostics::{publish_terrain_diagnostics, register_terrain_diagnostics, RenderTime},
    render::{
        terrain_bind_group::GpuTerrain,
        terrain_pass::{extract_terrain_phases, TerrainItem, TerrainPass, TerrainPassLabel},
        terrain_pipeline::{queue_terrain, DrawTerrain, TerrainRenderPipeline},
        terrain_view_bind_group::{extract_terrain_selections, ExtractedSelection, GpuTerrainView},
    },
    shaders::load_terrain_shaders,
    terrain::{Terrain, TerrainComponents},
    terrain_view::{
        remove_stale_selections, select_terrain_patches, TerrainSelection, TerrainViewComponents,
    },
};
use bevy::{
    core_pipeline::core_3d::graph::{Core3d, Node3d},
    prelude::*,
    render::{
        extract_component::ExtractComponentPlugin,
        render_graph::{RenderGraphApp, ViewNodeRunner},
        render_phase::{sort_phase_system, AddRenderCommand, DrawFunctions, ViewSortedRenderPhases},
        render_resource::SpecializedRenderPipelines,
        renderer::RenderDevice,
        settings::WgpuFeatures,
        view::VisibilitySystems,
        Render, RenderApp, RenderSet,
    },
};

pub mod config;
pub mod debug;
pub mod diagnostics;
pub mod error;
pub mod geometry;
pub mod heightmap;
pub mod lod;
pub mod math;
pub mod render;
pub mod selection;
pub mod shaders;
pub mod terrain;
pub mod terrain_view;
pub mod util;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        config::TerrainConfig,
        debug::{camera::DebugCamera, DebugTerrain, TerrainDebugPlugin},
        diagnostics::TerrainStats,
        error::TerrainError,
        heightmap::Heightmap,
        lod::LodLevelTable,
        selection::{PatchInstance, SelectionFrame},
        terrain::Terrain,
        terrain_view::{TerrainSelection, TerrainView, TerrainViewComponents},
        TerrainPlugin,
    };
}

/// The plugin for the terrain renderer.
///
/// Without a render app (e.g. with `MinimalPlugins`) only the patch selection runs.
pub struct TerrainPlugin;

impl Plugin for TerrainPlugin {
    fn build(&self, app: &mut App) {
        register_terrain_diagnostics(app);

        app.init_resource::<TerrainViewComponents<TerrainSelection>>()
            .add_systems(
                PostUpdate,
                (
                    select_terrain_patches,
                    remove_stale_selections,
                    publish_terrain_diagnostics,
                )
                    .chain()
                    .after(VisibilitySystems::UpdateFrusta),
            );

        if app.get_sub_app(RenderApp).is_none() {
            return;
        }

        load_terrain_shaders(app);

        app.add_plugins(ExtractComponentPlugin::<Terrain>::default());

        let render_time = app.world().resource::<RenderTime>().clone();

        app.sub_app_mut(RenderApp)
            .insert_resource(render_time)
            .add_render_graph_node::<ViewNodeRunner<TerrainPass>>(Core3d, TerrainPassLabel)
            .add_render_graph_edges(
                Core3d,
                (
                    Node3d::MainOpaquePass,
                    TerrainPassLabel,
                    Node3d::MainTransmissivePass,
                ),
            );
    }

    fn finish(&self, app: &mut App) {
        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        let features = render_app.world().resource::<RenderDevice>().features();
        if !features.contains(WgpuFeatures::TEXTURE_FORMAT_16BIT_NORM) {
            warn!("The terrain renderer requires the TEXTURE_FORMAT_16BIT_NORM feature. Terrains will not be drawn.");
            return;
        }

        render_app
            .init_resource::<TerrainRenderPipeline>()
            .init_resource::<SpecializedRenderPipelines<TerrainRenderPipeline>>()
            .init_resource::<DrawFunctions<TerrainItem>>()
            .init_resource::<ViewSortedRenderPhases<TerrainItem>>()
            .init_resource::<TerrainComponents<GpuTerrain>>()
            .init_resource::<TerrainViewComponents<ExtractedSelection>>()
            .init_resource::<TerrainViewComponents<GpuTerrainView>>()
            .add_render_command::<TerrainItem, DrawTerrain>()
            .add_systems(
                ExtractSchedule,
                (extract_terrain_phases, extract_terrain_selections),
            )
            .add_systems(
                Render,
                (
                    (
                        GpuTerrain::prepare_terrain,
                        GpuTerrainView::prepare_terrain_view,
                    )
                        .chain()
                        .in_set(RenderSet::PrepareResources),
                    queue_terrain.in_set(RenderSet::Queue),
                    sort_phase_system::<TerrainItem>.in_set(RenderSet::PhaseSort),
                ),
            );
    }
}
