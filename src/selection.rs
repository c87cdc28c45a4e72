//! Per frame quadtree selection of the patches to draw.
//!
//! The quadtree is never materialized. Selection recursively subdivides the root chunks
//! of the terrain, culls them against the view frustum and emits a [`PatchInstance`]
//! for every node that is fine enough for its distance to the viewer.

use crate::{
    heightmap::HeightField,
    lod::LodLevelTable,
    math::{classify_aabb, patch_intersects_circle, Intersection},
};
use bevy::{
    math::{Vec2, Vec3},
    render::primitives::{Aabb, Frustum},
};
use bytemuck::{Pod, Zeroable};
use itertools::iproduct;

/// One selected patch, as streamed to the GPU.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PatchInstance {
    pub base_x: f32,
    pub base_z: f32,
    pub level: u32,
    _padding: u32,
}

impl PatchInstance {
    pub fn new(base: Vec2, level: u32) -> Self {
        Self {
            base_x: base.x,
            base_z: base.y,
            level,
            _padding: 0,
        }
    }

    #[inline]
    pub fn base(&self) -> Vec2 {
        Vec2::new(self.base_x, self.base_z)
    }
}

/// Owned storage for the instances of one frame.
///
/// The arena never grows past its capacity. It is reset whenever a new cursor is handed out.
#[derive(Clone, Debug, Default)]
pub struct InstanceArena {
    instances: Vec<PatchInstance>,
    capacity: usize,
}

impl InstanceArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            instances: Vec::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instances(&self) -> &[PatchInstance] {
        &self.instances
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.instances)
    }

    /// Discards the previous contents and starts writing a new frame.
    pub fn cursor(&mut self) -> InstanceCursor<'_> {
        self.instances.clear();
        InstanceCursor { arena: self }
    }
}

/// The write end of an [`InstanceArena`].
pub struct InstanceCursor<'a> {
    arena: &'a mut InstanceArena,
}

impl InstanceCursor<'_> {
    /// Appends the instance, returns false if the arena is full.
    #[inline]
    pub fn push(&mut self, instance: PatchInstance) -> bool {
        if self.is_full() {
            return false;
        }

        self.arena.instances.push(instance);
        true
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.arena.instances.len() >= self.arena.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.arena.instances.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.arena.instances.is_empty()
    }
}

/// The outcome of selecting one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SelectionFrame {
    pub patch_count: u32,
    /// The finest level the viewer's elevation allowed.
    pub max_level: u32,
    /// The vertical distance between the viewer and the elevation range of the terrain.
    pub vertical_distance: f32,
    /// Selection stopped early because the arena was full.
    pub truncated: bool,
}

/// Walks the implicit quadtree of a terrain for a single view.
pub struct PatchSelector<'a> {
    field: &'a HeightField,
    lods: &'a LodLevelTable,
    frustum: &'a Frustum,
    viewpoint: Vec2,
    max_level: u32,
    truncated: bool,
}

impl<'a> PatchSelector<'a> {
    /// Selects the patches of the whole terrain into the arena.
    pub fn select(
        field: &'a HeightField,
        lods: &'a LodLevelTable,
        frustum: &'a Frustum,
        viewpoint: Vec3,
        arena: &mut InstanceArena,
    ) -> SelectionFrame {
        let vertical_distance = field.vertical_distance(viewpoint.y);

        let mut selector = Self {
            field,
            lods,
            frustum,
            viewpoint: Vec2::new(viewpoint.x, viewpoint.z),
            max_level: lods.max_level(vertical_distance),
            truncated: false,
        };

        let root_level = lods.coarsest_level();
        let chunk_size = lods.patch_size(root_level);
        let chunk_count = (field.size() / chunk_size).ceil().as_uvec2();

        let mut cursor = arena.cursor();

        for (z, x) in iproduct!(0..chunk_count.y, 0..chunk_count.x) {
            let base = field.min + Vec2::new(x as f32, z as f32) * chunk_size;
            selector.select_patch(root_level, base, chunk_size, false, &mut cursor);
        }

        SelectionFrame {
            patch_count: arena.len().min(arena.capacity()) as u32,
            max_level: selector.max_level,
            vertical_distance,
            truncated: selector.truncated,
        }
    }

    fn select_patch(
        &mut self,
        level: u32,
        base: Vec2,
        size: f32,
        mut skip_frustum_test: bool,
        cursor: &mut InstanceCursor,
    ) {
        // chunks at the far border may start beyond the extent
        if base.x >= self.field.max.x || base.y >= self.field.max.y {
            return;
        }

        let max = (base + size).min(self.field.max);

        if !skip_frustum_test {
            let aabb = Aabb::from_min_max(
                Vec3::new(base.x, self.field.min_elevation, base.y),
                Vec3::new(max.x, self.field.max_elevation, max.y),
            );

            match classify_aabb(self.frustum, &aabb) {
                Intersection::Outside => return,
                Intersection::Inside => skip_frustum_test = true,
                Intersection::Intersecting => {}
            }
        }

        // only visible nodes count as dropped detail
        if cursor.is_full() {
            self.truncated = true;
            return;
        }

        // the next finer level is only needed within its outer range
        if level == self.max_level
            || !patch_intersects_circle(base, max, self.viewpoint, self.lods.range(level - 1))
        {
            if !cursor.push(PatchInstance::new(base, level)) {
                self.truncated = true;
            }
            return;
        }

        let half_size = 0.5 * size;

        for offset in [Vec2::ZERO, Vec2::X, Vec2::Y, Vec2::ONE] {
            self.select_patch(
                level - 1,
                base + offset * half_size,
                half_size,
                skip_frustum_test,
                cursor,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{TerrainConfig, MAX_PATCH_COUNT},
        heightmap::Heightmap,
        math::tests::{perspective_frustum, top_down_frustum},
    };
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn small_config() -> TerrainConfig {
        TerrainConfig {
            lod_count: 3,
            patch_dim: 32,
            chunk_size: 128.0,
            pixels_per_chunk: 129,
            ..Default::default()
        }
    }

    fn setup(config: &TerrainConfig, width: u32, height: u32) -> (HeightField, LodLevelTable) {
        config.validate().unwrap();
        let heightmap = Heightmap::new(vec![0; (width * height) as usize], width, height).unwrap();

        (
            HeightField::new(&heightmap, config),
            LodLevelTable::new(config).unwrap(),
        )
    }

    /// The clipped rectangle covered by an instance.
    fn patch_rect(instance: &PatchInstance, field: &HeightField, lods: &LodLevelTable) -> (Vec2, Vec2) {
        let base = instance.base();
        (base, (base + lods.patch_size(instance.level)).min(field.max))
    }

    fn patch_aabb(instance: &PatchInstance, field: &HeightField, lods: &LodLevelTable) -> Aabb {
        let (min, max) = patch_rect(instance, field, lods);

        Aabb::from_min_max(
            Vec3::new(min.x, field.min_elevation, min.y),
            Vec3::new(max.x, field.max_elevation, max.y),
        )
    }

    #[test]
    fn arena_is_bounded_and_reset() {
        let mut arena = InstanceArena::new(2);

        let mut cursor = arena.cursor();
        assert!(cursor.push(PatchInstance::new(Vec2::ZERO, 0)));
        assert!(cursor.push(PatchInstance::new(Vec2::ONE, 1)));
        assert!(cursor.is_full());
        assert!(!cursor.push(PatchInstance::new(Vec2::ONE, 2)));
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.as_bytes().len(), 2 * 16);

        let cursor = arena.cursor();
        assert!(cursor.is_empty());
        assert!(arena.is_empty());
    }

    #[test]
    fn centered_high_camera_selects_the_coarsest_chunks() {
        let config = small_config();
        let (field, lods) = setup(&config, 256, 256);
        let eye = Vec3::new(0.0, config.max_elevation + 500.0, 0.0);
        let frustum = perspective_frustum(eye, Vec3::ZERO, 10_000.0);
        let mut arena = InstanceArena::new(MAX_PATCH_COUNT);

        let frame = PatchSelector::select(&field, &lods, &frustum, eye, &mut arena);

        assert_eq!(frame.max_level, lods.coarsest_level());
        assert_eq!(frame.patch_count, 4);
        assert!(!frame.truncated);
        assert!(arena
            .instances()
            .iter()
            .all(|instance| instance.level == lods.coarsest_level()));
    }

    #[test]
    fn far_camera_tiles_the_terrain_exactly_once() {
        for (width, height) in [(256, 256), (257, 257), (300, 129), (1000, 700)] {
            let config = small_config();
            let (field, lods) = setup(&config, width, height);
            let frustum = top_down_frustum(Vec3::ZERO, 2000.0);
            let eye = Vec3::new(0.0, 1e6, 0.0);
            let mut arena = InstanceArena::new(MAX_PATCH_COUNT);

            let frame = PatchSelector::select(&field, &lods, &frustum, eye, &mut arena);
            let area = arena
                .instances()
                .iter()
                .map(|instance| {
                    let (min, max) = patch_rect(instance, &field, &lods);
                    (max - min).x * (max - min).y
                })
                .sum::<f32>();

            assert_eq!(frame.max_level, lods.coarsest_level());
            assert!((area - field.area()).abs() <= field.area() * 1e-6);
        }
    }

    #[test]
    fn close_camera_tiles_without_overlap() {
        let config = small_config();
        let (field, lods) = setup(&config, 513, 513);
        let frustum = top_down_frustum(Vec3::ZERO, 2000.0);
        let eye = Vec3::new(-30.0, 0.0, 75.0);
        let mut arena = InstanceArena::new(MAX_PATCH_COUNT);

        let frame = PatchSelector::select(&field, &lods, &frustum, eye, &mut arena);
        let rects = arena
            .instances()
            .iter()
            .map(|instance| patch_rect(instance, &field, &lods))
            .collect::<Vec<_>>();

        let area = rects
            .iter()
            .map(|(min, max)| (*max - *min).x * (*max - *min).y)
            .sum::<f32>();
        assert!((area - field.area()).abs() <= field.area() * 1e-6);

        for (i, (a_min, a_max)) in rects.iter().enumerate() {
            for (b_min, b_max) in &rects[i + 1..] {
                let overlap = a_min.max(*b_min).cmplt(a_max.min(*b_max)).all();
                assert!(!overlap);
            }
        }

        assert_eq!(frame.max_level, 0);
        assert!(arena.instances().iter().any(|instance| instance.level == 0));
    }

    #[test]
    fn emitted_patches_are_never_outside_the_frustum() {
        let config = small_config();
        let (field, lods) = setup(&config, 1025, 1025);
        let mut rng = StdRng::seed_from_u64(7);
        let mut arena = InstanceArena::new(MAX_PATCH_COUNT);

        for _ in 0..200 {
            let eye = Vec3::new(
                rng.random_range(-700.0..700.0),
                rng.random_range(-100.0..400.0),
                rng.random_range(-700.0..700.0),
            );
            let target = eye
                + Vec3::new(
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..0.2),
                    rng.random_range(-1.0..1.0),
                );
            let frustum = perspective_frustum(eye, target, rng.random_range(50.0..3000.0));

            PatchSelector::select(&field, &lods, &frustum, eye, &mut arena);

            for instance in arena.instances() {
                let aabb = patch_aabb(instance, &field, &lods);
                assert_ne!(classify_aabb(&frustum, &aabb), Intersection::Outside);
            }
        }
    }

    #[test]
    fn selection_never_exceeds_the_capacity() {
        let config = small_config();
        let (field, lods) = setup(&config, 2049, 2049);
        let mut rng = StdRng::seed_from_u64(42);

        for capacity in [1, 16, 100, MAX_PATCH_COUNT] {
            let mut arena = InstanceArena::new(capacity);

            for _ in 0..100 {
                let eye = Vec3::new(
                    rng.random_range(-1e7..1e7),
                    rng.random_range(-1e7..1e7),
                    rng.random_range(-1e7..1e7),
                ) * rng.random_range(0.0..1.0f32).powi(8);
                let frustum = top_down_frustum(eye.with_y(0.0), rng.random_range(10.0..1e5));

                let frame = PatchSelector::select(&field, &lods, &frustum, eye, &mut arena);

                assert!(arena.len() <= capacity);
                assert_eq!(frame.patch_count as usize, arena.len());
                if frame.truncated {
                    assert_eq!(arena.len(), capacity);
                }
            }
        }
    }

    #[test]
    fn full_arena_truncates() {
        let config = small_config();
        let (field, lods) = setup(&config, 1025, 1025);
        let frustum = top_down_frustum(Vec3::ZERO, 2000.0);
        let mut arena = InstanceArena::new(10);

        let frame = PatchSelector::select(&field, &lods, &frustum, Vec3::ZERO, &mut arena);

        assert!(frame.truncated);
        assert_eq!(frame.patch_count, 10);
    }

    #[test]
    fn exactly_filled_arena_is_not_truncated() {
        let config = small_config();
        let (field, lods) = setup(&config, 257, 257);
        // covers the two chunks with negative x only
        let frustum = top_down_frustum(Vec3::new(-64.0, 0.0, 0.0), 60.0);
        let viewpoint = Vec3::new(-64.0, 5000.0, 0.0);

        let mut arena = InstanceArena::new(2);
        let frame = PatchSelector::select(&field, &lods, &frustum, viewpoint, &mut arena);

        assert_eq!(frame.patch_count, 2);
        assert!(!frame.truncated);
        assert!(arena.instances().iter().all(|instance| instance.base_x < 0.0));

        let mut arena = InstanceArena::new(1);
        let frame = PatchSelector::select(&field, &lods, &frustum, viewpoint, &mut arena);

        assert_eq!(frame.patch_count, 1);
        assert!(frame.truncated);
    }

    #[test]
    fn ring_boundary_refines() {
        let config = small_config();
        let (field, lods) = setup(&config, 257, 257);
        let frustum = top_down_frustum(Vec3::ZERO, 2000.0);
        let mut arena = InstanceArena::new(MAX_PATCH_COUNT);

        assert_eq!(field.max.x, 128.0);
        assert_eq!(lods.range(0), 100.0);

        // exactly range[0] away from the closest level 1 patch
        let boundary = Vec3::new(228.0, 0.0, 0.0);
        let beyond = Vec3::new(f32::from_bits(228.0f32.to_bits() + 1), 0.0, 0.0);

        PatchSelector::select(&field, &lods, &frustum, boundary, &mut arena);
        let at_boundary = arena.instances().to_vec();
        PatchSelector::select(&field, &lods, &frustum, boundary, &mut arena);
        assert_eq!(arena.instances(), at_boundary.as_slice());

        PatchSelector::select(&field, &lods, &frustum, beyond, &mut arena);
        let past_boundary = arena.instances().to_vec();

        assert!(at_boundary.iter().any(|instance| instance.level == 0));
        assert!(past_boundary.iter().all(|instance| instance.level > 0));
    }

    #[test]
    fn culled_views_select_nothing() {
        let config = small_config();
        let (field, lods) = setup(&config, 257, 257);
        // looking up into the sky from above the terrain
        let eye = Vec3::new(0.0, 200.0, 0.0);
        let frustum = perspective_frustum(eye, Vec3::new(0.0, 300.0, -1.0), 10.0);
        let mut arena = InstanceArena::new(MAX_PATCH_COUNT);

        let frame = PatchSelector::select(&field, &lods, &frustum, eye, &mut arena);

        assert_eq!(frame.patch_count, 0);
        assert!(!frame.truncated);
    }
}
