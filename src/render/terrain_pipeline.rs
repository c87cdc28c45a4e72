use crate::{
    debug::DebugTerrain,
    render::{
        terrain_bind_group::{create_terrain_layout, SetTerrainBindGroup},
        terrain_pass::TerrainItem,
        terrain_view_bind_group::{
            create_terrain_view_layout, DrawTerrainCommand, GpuTerrainView, SetTerrainViewBindGroup,
        },
    },
    selection::PatchInstance,
    shaders::TERRAIN_SHADER,
    terrain_view::TerrainViewComponents,
};
use bevy::{
    core_pipeline::core_3d::CORE_3D_DEPTH_FORMAT,
    image::BevyDefault,
    prelude::*,
    render::{
        render_phase::{DrawFunctions, PhaseItemExtraIndex, SetItemPipeline, ViewSortedRenderPhases},
        render_resource::*,
        renderer::RenderDevice,
        settings::WgpuFeatures,
        sync_world::MainEntity,
        view::{ExtractedView, ViewTarget},
    },
};
use std::mem;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    #[repr(transparent)]
    pub struct TerrainPipelineFlags: u32 {
        const NONE               = 0;
        const SHOW_LOD           = 1 << 0;
        const MORPH              = 1 << 1;
        const LIGHTING           = 1 << 2;
        const WIREFRAME          = 1 << 3;
        const HDR                = 1 << 4;
        const MSAA_RESERVED_BITS = TerrainPipelineFlags::MSAA_MASK_BITS << TerrainPipelineFlags::MSAA_SHIFT_BITS;
    }
}

impl TerrainPipelineFlags {
    const MSAA_MASK_BITS: u32 = 0b111111;
    const MSAA_SHIFT_BITS: u32 = 32 - 6;

    pub fn from_msaa_samples(msaa_samples: u32) -> Self {
        let msaa_bits = ((msaa_samples - 1) & Self::MSAA_MASK_BITS) << Self::MSAA_SHIFT_BITS;
        TerrainPipelineFlags::from_bits_retain(msaa_bits)
    }

    pub fn from_debug(debug: &DebugTerrain) -> Self {
        let mut key = TerrainPipelineFlags::NONE;

        if debug.show_lod {
            key |= TerrainPipelineFlags::SHOW_LOD;
        }
        if debug.morph {
            key |= TerrainPipelineFlags::MORPH;
        }
        if debug.lighting {
            key |= TerrainPipelineFlags::LIGHTING;
        }
        if debug.wireframe {
            key |= TerrainPipelineFlags::WIREFRAME;
        }

        key
    }

    pub fn msaa_samples(&self) -> u32 {
        ((self.bits() >> Self::MSAA_SHIFT_BITS) & Self::MSAA_MASK_BITS) + 1
    }

    pub fn polygon_mode(&self) -> PolygonMode {
        match self.contains(TerrainPipelineFlags::WIREFRAME) {
            true => PolygonMode::Line,
            false => PolygonMode::Fill,
        }
    }

    pub fn shader_defs(&self) -> Vec<ShaderDefVal> {
        let mut shader_defs = Vec::new();

        if self.contains(TerrainPipelineFlags::SHOW_LOD) {
            shader_defs.push("SHOW_LOD".into());
        }
        if self.contains(TerrainPipelineFlags::MORPH) {
            shader_defs.push("MORPH".into());
        }
        if self.contains(TerrainPipelineFlags::LIGHTING) {
            shader_defs.push("LIGHTING".into());
        }

        shader_defs
    }
}

/// The pipeline used to render the terrain entities.
#[derive(Resource)]
pub struct TerrainRenderPipeline {
    pub(crate) terrain_layout: BindGroupLayout,
    pub(crate) terrain_view_layout: BindGroupLayout,
    shader: Handle<Shader>,
}

impl FromWorld for TerrainRenderPipeline {
    fn from_world(world: &mut World) -> Self {
        let device = world.resource::<RenderDevice>();

        Self {
            terrain_layout: create_terrain_layout(device),
            terrain_view_layout: create_terrain_view_layout(device),
            shader: world.load_asset(TERRAIN_SHADER),
        }
    }
}

impl SpecializedRenderPipeline for TerrainRenderPipeline {
    type Key = TerrainPipelineFlags;

    fn specialize(&self, key: Self::Key) -> RenderPipelineDescriptor {
        let shader_defs = key.shader_defs();

        // the shared grid
        let grid_layout = VertexBufferLayout {
            array_stride: mem::size_of::<[f32; 2]>() as BufferAddress,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![VertexAttribute {
                format: VertexFormat::Float32x2,
                offset: 0,
                shader_location: 0,
            }],
        };
        // one patch per instance
        let instance_layout = VertexBufferLayout {
            array_stride: mem::size_of::<PatchInstance>() as BufferAddress,
            step_mode: VertexStepMode::Instance,
            attributes: vec![
                VertexAttribute {
                    format: VertexFormat::Float32x2,
                    offset: 0,
                    shader_location: 1,
                },
                VertexAttribute {
                    format: VertexFormat::Uint32,
                    offset: 8,
                    shader_location: 2,
                },
            ],
        };

        let format = if key.contains(TerrainPipelineFlags::HDR) {
            ViewTarget::TEXTURE_FORMAT_HDR
        } else {
            TextureFormat::bevy_default()
        };

        RenderPipelineDescriptor {
            label: Some("terrain_pipeline".into()),
            layout: vec![self.terrain_layout.clone(), self.terrain_view_layout.clone()],
            push_constant_ranges: default(),
            vertex: VertexState {
                shader: self.shader.clone(),
                entry_point: "vertex".into(),
                shader_defs: shader_defs.clone(),
                buffers: vec![grid_layout, instance_layout],
            },
            primitive: PrimitiveState {
                front_face: FrontFace::Ccw,
                cull_mode: Some(Face::Back),
                unclipped_depth: false,
                polygon_mode: key.polygon_mode(),
                conservative: false,
                topology: PrimitiveTopology::TriangleList,
                strip_index_format: None,
            },
            fragment: Some(FragmentState {
                shader: self.shader.clone(),
                shader_defs,
                entry_point: "fragment".into(),
                targets: vec![Some(ColorTargetState {
                    format,
                    blend: Some(BlendState::REPLACE),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            depth_stencil: Some(DepthStencilState {
                format: CORE_3D_DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::GreaterEqual,
                stencil: StencilState::default(),
                bias: DepthBiasState::default(),
            }),
            multisample: MultisampleState {
                count: key.msaa_samples(),
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            zero_initialize_workgroup_memory: false,
        }
    }
}

/// The draw function of the terrain. It sets the pipeline and the bind groups and then issues the
/// draw call.
pub(crate) type DrawTerrain = (
    SetItemPipeline,
    SetTerrainBindGroup<0>,
    SetTerrainViewBindGroup<1>,
    DrawTerrainCommand,
);

/// Queues one draw of every terrain with a selection for each view.
#[allow(clippy::too_many_arguments)]
pub(crate) fn queue_terrain(
    draw_functions: Res<DrawFunctions<TerrainItem>>,
    debug: Option<Res<DebugTerrain>>,
    device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    terrain_pipeline: Res<TerrainRenderPipeline>,
    mut pipelines: ResMut<SpecializedRenderPipelines<TerrainRenderPipeline>>,
    mut terrain_phases: ResMut<ViewSortedRenderPhases<TerrainItem>>,
    gpu_terrain_views: Res<TerrainViewComponents<GpuTerrainView>>,
    views: Query<(Entity, MainEntity, &ExtractedView, &Msaa)>,
) {
    let Some(draw_function) = draw_functions.read().get_id::<DrawTerrain>() else {
        return;
    };

    let mut debug_flags = match &debug {
        Some(debug) => TerrainPipelineFlags::from_debug(debug),
        None => TerrainPipelineFlags::MORPH | TerrainPipelineFlags::LIGHTING,
    };

    if !device.features().contains(WgpuFeatures::POLYGON_MODE_LINE) {
        debug_flags.remove(TerrainPipelineFlags::WIREFRAME);
    }

    for (render_view, view, extracted_view, msaa) in &views {
        let Some(terrain_phase) = terrain_phases.get_mut(&render_view) else {
            continue;
        };

        let mut flags = TerrainPipelineFlags::from_msaa_samples(msaa.samples()) | debug_flags;
        if extracted_view.hdr {
            flags |= TerrainPipelineFlags::HDR;
        }

        let pipeline = pipelines.specialize(&pipeline_cache, &terrain_pipeline, flags);

        for (&(terrain, terrain_view), gpu_terrain_view) in gpu_terrain_views.iter() {
            if terrain_view != view || gpu_terrain_view.patch_count == 0 {
                continue;
            }

            terrain_phase.add(TerrainItem {
                representative_entity: (Entity::PLACEHOLDER, terrain.into()),
                draw_function,
                pipeline,
                batch_range: 0..1,
                extra_index: PhaseItemExtraIndex::NONE,
                order: terrain.index(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msaa_bits_round_trip() {
        for samples in [1, 2, 4, 8] {
            let flags = TerrainPipelineFlags::from_msaa_samples(samples)
                | TerrainPipelineFlags::MORPH
                | TerrainPipelineFlags::WIREFRAME;

            assert_eq!(flags.msaa_samples(), samples);
            assert_eq!(flags.polygon_mode(), PolygonMode::Line);
        }
    }

    #[test]
    fn debug_flags_select_shader_defs() {
        let debug = DebugTerrain {
            show_lod: true,
            morph: false,
            ..default()
        };
        let flags = TerrainPipelineFlags::from_debug(&debug);

        assert_eq!(flags.msaa_samples(), 1);
        assert_eq!(flags.polygon_mode(), PolygonMode::Fill);
        assert_eq!(flags.shader_defs().len(), 2);
    }
}
