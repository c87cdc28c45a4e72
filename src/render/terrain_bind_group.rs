use crate::{
    config::MAX_LOD_COUNT,
    heightmap::HeightField,
    lod::LodLevelTable,
    render::terrain_pipeline::TerrainRenderPipeline,
    terrain::{ExtractedTerrain, TerrainComponents},
    util::GpuBuffer,
};
use bevy::{
    ecs::{
        query::ROQueryItem,
        system::{lifetimeless::SRes, SystemParamItem},
    },
    prelude::*,
    render::{
        render_phase::{PhaseItem, RenderCommand, RenderCommandResult, TrackedRenderPass},
        render_resource::{binding_types::*, *},
        renderer::{RenderDevice, RenderQueue},
        sync_world::MainEntity,
    },
    utils::HashSet,
};
use std::iter;

/// The colors patches are tinted with when the lod view is enabled, finest level first.
pub const LOD_COLORS: [Vec4; MAX_LOD_COUNT] = [
    Vec4::new(1.0, 0.2, 0.2, 1.0),
    Vec4::new(0.2, 1.0, 0.2, 1.0),
    Vec4::new(0.2, 0.2, 1.0, 1.0),
    Vec4::new(1.0, 1.0, 0.2, 1.0),
    Vec4::new(0.2, 1.0, 1.0, 1.0),
    Vec4::new(1.0, 0.2, 1.0, 1.0),
    Vec4::new(1.0, 0.6, 0.2, 1.0),
    Vec4::new(0.6, 0.6, 0.6, 1.0),
];

pub(crate) fn create_terrain_layout(device: &RenderDevice) -> BindGroupLayout {
    device.create_bind_group_layout(
        "terrain_layout",
        &BindGroupLayoutEntries::sequential(
            ShaderStages::VERTEX_FRAGMENT,
            (
                uniform_buffer::<TerrainUniform>(false), // terrain
                texture_2d(TextureSampleType::Float { filterable: true }), // heightmap
                sampler(SamplerBindingType::Filtering), // heightmap sampler
            ),
        ),
    )
}

/// The terrain wide data that is available in shaders.
#[derive(Clone, Default, ShaderType)]
pub(crate) struct TerrainUniform {
    /// `(min.x, min.z, max.x, max.z)`
    aabb: Vec4,
    uv_xform: Vec4,
    height_xform: Vec4,
    /// x: the size of a grid cell, y: the size of a patch
    patch_scales: [Vec4; MAX_LOD_COUNT],
    /// xy: the morph ramp, z: the morph start, w: the outer range
    morph_params: [Vec4; MAX_LOD_COUNT],
    colors: [Vec4; MAX_LOD_COUNT],
    lod_count: u32,
    patch_dim: u32,
}

impl TerrainUniform {
    pub(crate) fn new(field: &HeightField, lods: &LodLevelTable) -> Self {
        let levels = lods.padded();
        let patch_dim = lods.patch_dim() as f32;

        Self {
            aabb: field.aabb(),
            uv_xform: field.uv_transform(),
            height_xform: field.height_transform(),
            patch_scales: levels.map(|level| {
                Vec4::new(level.patch_scale, level.patch_scale * patch_dim, 0.0, 0.0)
            }),
            morph_params: levels.map(|level| {
                let params = level.morph_params();
                Vec4::new(params.x, params.y, level.morph_start, level.range)
            }),
            colors: LOD_COLORS,
            lod_count: lods.lod_count(),
            patch_dim: lods.patch_dim(),
        }
    }
}

/// The GPU resources of a terrain that stay the same until its heightmap changes.
pub struct GpuTerrain {
    pub(crate) generation: u32,
    pub(crate) vertex_buffer: Buffer,
    pub(crate) index_buffer: Buffer,
    pub(crate) index_count: u32,
    pub(crate) bind_group: BindGroup,
}

impl GpuTerrain {
    fn new(
        device: &RenderDevice,
        queue: &RenderQueue,
        layout: &BindGroupLayout,
        terrain: &ExtractedTerrain,
    ) -> Self {
        let data = &terrain.data;

        let vertex_buffer = device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("terrain_grid_vertex_buffer"),
            contents: bytemuck::cast_slice(data.grid.vertices()),
            usage: BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("terrain_grid_index_buffer"),
            contents: bytemuck::cast_slice(data.grid.indices()),
            usage: BufferUsages::INDEX,
        });

        let uniform = TerrainUniform::new(&data.field, &data.lods);
        let terrain_buffer =
            GpuBuffer::create_labeled("terrain_uniform", device, uniform, BufferUsages::UNIFORM);

        let heightmap = device.create_texture_with_data(
            queue,
            &TextureDescriptor {
                label: Some("terrain_heightmap"),
                size: Extent3d {
                    width: data.heightmap.width(),
                    height: data.heightmap.height(),
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: TextureFormat::R16Unorm,
                usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            data.heightmap.as_bytes(),
        );
        let heightmap_view = heightmap.create_view(&default());

        let heightmap_sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("terrain_heightmap_sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..default()
        });

        let bind_group = device.create_bind_group(
            "terrain_bind_group",
            layout,
            &BindGroupEntries::sequential((&terrain_buffer, &heightmap_view, &heightmap_sampler)),
        );

        Self {
            generation: terrain.generation,
            vertex_buffer,
            index_buffer,
            index_count: data.grid.index_count(),
            bind_group,
        }
    }

    /// Creates the resources of new terrains and of terrains whose heightmap was replaced.
    pub(crate) fn prepare_terrain(
        device: Res<RenderDevice>,
        queue: Res<RenderQueue>,
        terrain_pipeline: Res<TerrainRenderPipeline>,
        mut gpu_terrains: ResMut<TerrainComponents<GpuTerrain>>,
        mut rejected: Local<HashSet<(Entity, u32)>>,
        terrains: Query<(MainEntity, &ExtractedTerrain)>,
    ) {
        let max_dimension = device.limits().max_texture_dimension_2d;

        gpu_terrains.retain(|&terrain, _| {
            terrains
                .iter()
                .any(|(main_entity, _)| main_entity == terrain)
        });

        for (terrain, extracted_terrain) in &terrains {
            if gpu_terrains
                .get(&terrain)
                .is_some_and(|gpu_terrain| gpu_terrain.generation == extracted_terrain.generation)
            {
                continue;
            }

            let heightmap = &extracted_terrain.data.heightmap;
            if let Err(error) = heightmap.check_texture_size(max_dimension) {
                if rejected.insert((terrain, extracted_terrain.generation)) {
                    error!("Skipped drawing terrain {terrain}: {error}.");
                }
                gpu_terrains.remove(&terrain);
                continue;
            }

            gpu_terrains.insert(
                terrain,
                GpuTerrain::new(
                    &device,
                    &queue,
                    &terrain_pipeline.terrain_layout,
                    extracted_terrain,
                ),
            );

            info!(
                "Uploaded the heightmap of terrain {terrain} (generation {}).",
                extracted_terrain.generation
            );
        }
    }
}

pub struct SetTerrainBindGroup<const I: usize>;

impl<const I: usize, P: PhaseItem> RenderCommand<P> for SetTerrainBindGroup<I> {
    type Param = SRes<TerrainComponents<GpuTerrain>>;
    type ViewQuery = ();
    type ItemQuery = ();

    #[inline]
    fn render<'w>(
        item: &P,
        _: ROQueryItem<'w, Self::ViewQuery>,
        _: Option<ROQueryItem<'w, Self::ItemQuery>>,
        gpu_terrains: SystemParamItem<'w, '_, Self::Param>,
        pass: &mut TrackedRenderPass<'w>,
    ) -> RenderCommandResult {
        let Some(gpu_terrain) = gpu_terrains.into_inner().get(&item.main_entity().id()) else {
            return RenderCommandResult::Skip;
        };

        pass.set_bind_group(I, &gpu_terrain.bind_group, &[]);
        RenderCommandResult::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::TerrainConfig, heightmap::Heightmap};

    #[test]
    fn uniform_mirrors_the_lod_table() {
        let config = TerrainConfig::default();
        let heightmap = Heightmap::new(vec![0; 129 * 129], 129, 129).unwrap();
        let field = HeightField::new(&heightmap, &config);
        let lods = LodLevelTable::new(&config).unwrap();

        let uniform = TerrainUniform::new(&field, &lods);

        assert_eq!(uniform.lod_count, 5);
        assert_eq!(uniform.patch_scales[4], Vec4::new(12.5, 100.0, 0.0, 0.0));
        assert_eq!(uniform.morph_params[0].w, 100.0);
        assert_eq!(uniform.morph_params[4].x, 0.0);
        assert_eq!(uniform.morph_params[4].y, 0.0);
        // unused slots stay zeroed
        assert_eq!(uniform.patch_scales[5], Vec4::ZERO);
        assert_eq!(uniform.morph_params[MAX_LOD_COUNT - 1], Vec4::ZERO);
    }
}
