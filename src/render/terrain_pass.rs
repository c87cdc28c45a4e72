use crate::terrain_view::TerrainView;
use bevy::{
    ecs::{entity::EntityHashSet, query::QueryItem},
    prelude::*,
    render::{
        camera::ExtractedCamera,
        diagnostic::RecordDiagnostics,
        render_graph::{NodeRunError, RenderGraphContext, RenderLabel, ViewNode},
        render_phase::{
            CachedRenderPipelinePhaseItem, DrawFunctionId, PhaseItem, PhaseItemExtraIndex,
            SortedPhaseItem, ViewSortedRenderPhases,
        },
        render_resource::*,
        renderer::RenderContext,
        sync_world::{MainEntity, RenderEntity},
        view::{ViewDepthTexture, ViewTarget},
        Extract,
    },
};
use std::ops::Range;

pub struct TerrainItem {
    pub representative_entity: (Entity, MainEntity),
    pub draw_function: DrawFunctionId,
    pub pipeline: CachedRenderPipelineId,
    pub batch_range: Range<u32>,
    pub extra_index: PhaseItemExtraIndex,
    pub order: u32,
}

impl PhaseItem for TerrainItem {
    const AUTOMATIC_BATCHING: bool = false;

    #[inline]
    fn entity(&self) -> Entity {
        self.representative_entity.0
    }

    #[inline]
    fn main_entity(&self) -> MainEntity {
        self.representative_entity.1
    }

    #[inline]
    fn draw_function(&self) -> DrawFunctionId {
        self.draw_function
    }

    #[inline]
    fn batch_range(&self) -> &Range<u32> {
        &self.batch_range
    }

    fn batch_range_mut(&mut self) -> &mut Range<u32> {
        &mut self.batch_range
    }

    fn extra_index(&self) -> PhaseItemExtraIndex {
        self.extra_index
    }

    fn batch_range_and_extra_index_mut(&mut self) -> (&mut Range<u32>, &mut PhaseItemExtraIndex) {
        (&mut self.batch_range, &mut self.extra_index)
    }
}

impl SortedPhaseItem for TerrainItem {
    type SortKey = u32;

    fn sort_key(&self) -> Self::SortKey {
        self.order
    }
}

impl CachedRenderPipelinePhaseItem for TerrainItem {
    fn cached_pipeline(&self) -> CachedRenderPipelineId {
        self.pipeline
    }
}

pub(crate) fn extract_terrain_phases(
    cameras: Extract<Query<(RenderEntity, &Camera), With<TerrainView>>>,
    mut live_entities: Local<EntityHashSet>,
    mut terrain_phases: ResMut<ViewSortedRenderPhases<TerrainItem>>,
) {
    live_entities.clear();

    for (entity, camera) in &cameras {
        if !camera.is_active {
            continue;
        }

        terrain_phases.insert_or_clear(entity);
        live_entities.insert(entity);
    }

    terrain_phases.retain(|entity, _| live_entities.contains(entity));
}

#[derive(Debug, Hash, Default, PartialEq, Eq, Clone, RenderLabel)]
pub struct TerrainPassLabel;

/// Draws the terrain phase into the main color and depth targets, after the opaque meshes.
#[derive(Default)]
pub struct TerrainPass;

impl ViewNode for TerrainPass {
    type ViewQuery = (
        Entity,
        &'static ExtractedCamera,
        &'static ViewTarget,
        &'static ViewDepthTexture,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (view, camera, target, depth): QueryItem<'w, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let Some(terrain_phase) = world
            .get_resource::<ViewSortedRenderPhases<TerrainItem>>()
            .and_then(|phases| phases.get(&view))
        else {
            return Ok(());
        };

        if terrain_phase.items.is_empty() {
            return Ok(());
        }

        let color_attachments = [Some(target.get_color_attachment())];
        let depth_stencil_attachment = Some(depth.get_attachment(StoreOp::Store));
        let diagnostics = render_context.diagnostic_recorder();

        let mut pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
            label: Some("terrain_pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        let pass_span = diagnostics.pass_span(&mut pass, "terrain_pass");

        if let Some(viewport) = camera.viewport.as_ref() {
            pass.set_camera_viewport(viewport);
        }

        if let Err(error) = terrain_phase.render(&mut pass, world, view) {
            error!("Error encountered while rendering the terrain phase {error:?}");
        }

        pass_span.end(&mut pass);

        Ok(())
    }
}
