use crate::{
    diagnostics::RenderTime,
    render::{terrain_bind_group::GpuTerrain, terrain_pipeline::TerrainRenderPipeline},
    selection::{PatchInstance, SelectionFrame},
    terrain::TerrainComponents,
    terrain_view::{TerrainSelection, TerrainViewComponents},
    util::GpuBuffer,
};
use bevy::{
    ecs::{
        entity::EntityHashMap,
        query::ROQueryItem,
        system::{lifetimeless::SRes, SystemParamItem},
    },
    prelude::*,
    render::{
        render_phase::{PhaseItem, RenderCommand, RenderCommandResult, TrackedRenderPass},
        render_resource::{binding_types::*, *},
        renderer::{RenderDevice, RenderQueue},
        sync_world::MainEntity,
        view::ExtractedView,
        Extract,
    },
};
use std::{mem, time::Instant};

pub(crate) fn create_terrain_view_layout(device: &RenderDevice) -> BindGroupLayout {
    device.create_bind_group_layout(
        "terrain_view_layout",
        &BindGroupLayoutEntries::single(
            ShaderStages::VERTEX_FRAGMENT,
            uniform_buffer::<TerrainViewUniform>(false),
        ),
    )
}

/// The view dependent data that is available in shaders.
#[derive(Clone, Default, ShaderType)]
pub(crate) struct TerrainViewUniform {
    clip_from_world: Mat4,
    /// `(-viewpoint.x, vertical distance, -viewpoint.z, 0)`, the morph distance is the length
    /// of `(x + k.x, k.y, z + k.z)`.
    lod_view_k: Vec4,
    world_position: Vec3,
}

impl TerrainViewUniform {
    fn new(clip_from_world: Mat4, world_position: Vec3, selection: &ExtractedSelection) -> Self {
        Self {
            clip_from_world,
            lod_view_k: Vec4::new(
                -selection.viewpoint.x,
                selection.frame.vertical_distance,
                -selection.viewpoint.z,
                0.0,
            ),
            world_position,
        }
    }

    fn from_view(view: &ExtractedView, selection: &ExtractedSelection) -> Self {
        let clip_from_world = view.clip_from_world.unwrap_or_else(|| {
            view.clip_from_view * view.world_from_view.compute_matrix().inverse()
        });

        Self::new(clip_from_world, view.world_from_view.translation(), selection)
    }
}

/// The render world copy of a [`TerrainSelection`].
#[derive(Default)]
pub struct ExtractedSelection {
    pub instances: Vec<PatchInstance>,
    pub capacity: usize,
    pub frame: SelectionFrame,
    pub viewpoint: Vec3,
}

pub(crate) fn extract_terrain_selections(
    mut extracted: ResMut<TerrainViewComponents<ExtractedSelection>>,
    selections: Extract<Res<TerrainViewComponents<TerrainSelection>>>,
) {
    extracted.retain(|key, _| selections.contains_key(key));

    for (&key, selection) in selections.iter() {
        let extracted = extracted.entry(key).or_default();

        // reuse the allocation of the previous frame
        extracted.instances.clear();
        extracted
            .instances
            .extend_from_slice(selection.arena.instances());
        extracted.capacity = selection.arena.capacity();
        extracted.frame = selection.frame;
        extracted.viewpoint = selection.viewpoint;
    }
}

/// The GPU resources of a terrain and view pair.
pub struct GpuTerrainView {
    capacity: usize,
    pub(crate) patch_count: u32,
    pub(crate) instance_buffer: GpuBuffer<PatchInstance>,
    view_buffer: GpuBuffer<TerrainViewUniform>,
    pub(crate) bind_group: BindGroup,
}

impl GpuTerrainView {
    fn new(device: &RenderDevice, layout: &BindGroupLayout, capacity: usize) -> Self {
        let instance_buffer = GpuBuffer::empty_sized_labeled(
            "terrain_instance_buffer",
            device,
            (capacity * mem::size_of::<PatchInstance>()) as BufferAddress,
            BufferUsages::VERTEX | BufferUsages::COPY_DST,
        );
        let view_buffer = GpuBuffer::empty_labeled(
            "terrain_view_uniform",
            device,
            BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        );

        let bind_group = device.create_bind_group(
            "terrain_view_bind_group",
            layout,
            &BindGroupEntries::single(&view_buffer),
        );

        Self {
            capacity,
            patch_count: 0,
            instance_buffer,
            view_buffer,
            bind_group,
        }
    }

    fn update(&mut self, queue: &RenderQueue, view: &ExtractedView, selection: &ExtractedSelection) {
        let patch_count = selection.instances.len().min(self.capacity);

        self.instance_buffer.update_bytes(
            queue,
            bytemuck::cast_slice(&selection.instances[..patch_count]),
        );
        self.patch_count = patch_count as u32;

        self.view_buffer
            .set_value(TerrainViewUniform::from_view(view, selection));
        self.view_buffer.update(queue);
    }

    /// Streams the selections of this frame to the GPU.
    pub(crate) fn prepare_terrain_view(
        device: Res<RenderDevice>,
        queue: Res<RenderQueue>,
        render_time: Res<RenderTime>,
        terrain_pipeline: Res<TerrainRenderPipeline>,
        selections: Res<TerrainViewComponents<ExtractedSelection>>,
        mut gpu_terrain_views: ResMut<TerrainViewComponents<GpuTerrainView>>,
        views: Query<(MainEntity, &ExtractedView)>,
    ) {
        let start = Instant::now();

        let views = views.iter().collect::<EntityHashMap<_>>();

        gpu_terrain_views.retain(|key, _| selections.contains_key(key));

        for (&(terrain, view), selection) in selections.iter() {
            let Some(extracted_view) = views.get(&view) else {
                continue;
            };

            let gpu_terrain_view = gpu_terrain_views
                .entry((terrain, view))
                .or_insert_with(|| {
                    GpuTerrainView::new(
                        &device,
                        &terrain_pipeline.terrain_view_layout,
                        selection.capacity,
                    )
                });

            if gpu_terrain_view.capacity != selection.capacity {
                *gpu_terrain_view = GpuTerrainView::new(
                    &device,
                    &terrain_pipeline.terrain_view_layout,
                    selection.capacity,
                );
            }

            gpu_terrain_view.update(&queue, extracted_view, selection);
        }

        render_time.store(start.elapsed());
    }
}

pub struct SetTerrainViewBindGroup<const I: usize>;

impl<const I: usize, P: PhaseItem> RenderCommand<P> for SetTerrainViewBindGroup<I> {
    type Param = SRes<TerrainViewComponents<GpuTerrainView>>;
    type ViewQuery = MainEntity;
    type ItemQuery = ();

    #[inline]
    fn render<'w>(
        item: &P,
        view: ROQueryItem<'w, Self::ViewQuery>,
        _: Option<ROQueryItem<'w, Self::ItemQuery>>,
        gpu_terrain_views: SystemParamItem<'w, '_, Self::Param>,
        pass: &mut TrackedRenderPass<'w>,
    ) -> RenderCommandResult {
        let Some(gpu_terrain_view) = gpu_terrain_views
            .into_inner()
            .get(&(item.main_entity().id(), view))
        else {
            return RenderCommandResult::Skip;
        };

        pass.set_bind_group(I, &gpu_terrain_view.bind_group, &[]);
        RenderCommandResult::Success
    }
}

/// Draws all patches selected for the terrain and view with a single instanced call.
pub(crate) struct DrawTerrainCommand;

impl<P: PhaseItem> RenderCommand<P> for DrawTerrainCommand {
    type Param = (
        SRes<TerrainComponents<GpuTerrain>>,
        SRes<TerrainViewComponents<GpuTerrainView>>,
    );
    type ViewQuery = MainEntity;
    type ItemQuery = ();

    #[inline]
    fn render<'w>(
        item: &P,
        view: ROQueryItem<'w, Self::ViewQuery>,
        _: Option<ROQueryItem<'w, Self::ItemQuery>>,
        (gpu_terrains, gpu_terrain_views): SystemParamItem<'w, '_, Self::Param>,
        pass: &mut TrackedRenderPass<'w>,
    ) -> RenderCommandResult {
        let terrain = item.main_entity().id();

        let (Some(gpu_terrain), Some(gpu_terrain_view)) = (
            gpu_terrains.into_inner().get(&terrain),
            gpu_terrain_views.into_inner().get(&(terrain, view)),
        ) else {
            return RenderCommandResult::Skip;
        };

        if gpu_terrain_view.patch_count == 0 {
            return RenderCommandResult::Skip;
        }

        pass.set_vertex_buffer(0, gpu_terrain.vertex_buffer.slice(..));
        pass.set_vertex_buffer(1, gpu_terrain_view.instance_buffer.slice(..));
        pass.set_index_buffer(gpu_terrain.index_buffer.slice(..), 0, IndexFormat::Uint16);
        pass.draw_indexed(
            0..gpu_terrain.index_count,
            0,
            0..gpu_terrain_view.patch_count,
        );

        RenderCommandResult::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_uniform_encodes_the_selection_viewpoint() {
        let selection = ExtractedSelection {
            frame: SelectionFrame {
                vertical_distance: 7.0,
                ..default()
            },
            viewpoint: Vec3::new(10.0, 20.0, 30.0),
            ..default()
        };

        // the camera may have moved on while the selection is frozen
        let uniform =
            TerrainViewUniform::new(Mat4::IDENTITY, Vec3::new(1.0, 2.0, 3.0), &selection);

        assert_eq!(uniform.lod_view_k, Vec4::new(-10.0, 7.0, -30.0, 0.0));
        assert_eq!(uniform.world_position, Vec3::new(1.0, 2.0, 3.0));
    }
}
