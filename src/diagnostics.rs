//! Timing counters of the terrain, published as Bevy diagnostics.

use bevy::{
    diagnostic::{Diagnostic, DiagnosticPath, Diagnostics, DiagnosticsStore, RegisterDiagnostic},
    prelude::*,
};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// The statistics of the most recent frame.
#[derive(Clone, Debug, Default, Resource)]
pub struct TerrainStats {
    /// The CPU time spent selecting patches for all terrains and views.
    pub select_time: Duration,
    /// The CPU time the render world spent uploading selections and terrain resources.
    pub render_time: Duration,
    /// The GPU time of the terrain pass, if render diagnostics are enabled and the
    /// device supports timestamp queries.
    pub gpu_time: Option<Duration>,
    pub patch_count: u32,
    /// The finest level any view was allowed to select.
    pub max_level: u32,
    /// Whether any selection ran out of instance capacity.
    pub truncated: bool,
}

impl TerrainStats {
    pub const SELECT_TIME: DiagnosticPath = DiagnosticPath::const_new("terrain/select_time");
    pub const RENDER_TIME: DiagnosticPath = DiagnosticPath::const_new("terrain/render_time");
    pub const PATCH_COUNT: DiagnosticPath = DiagnosticPath::const_new("terrain/patch_count");
    /// Recorded by the `RenderDiagnosticsPlugin` for the terrain pass.
    pub const GPU_TIME: DiagnosticPath =
        DiagnosticPath::const_new("render/terrain_pass/elapsed_gpu");
}

/// The render time, written by the render world and read by the main world.
#[derive(Clone, Default, Resource)]
pub struct RenderTime(Arc<AtomicU64>);

impl RenderTime {
    pub fn store(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.0.store(nanos, Ordering::Relaxed);
    }

    pub fn load(&self) -> Duration {
        Duration::from_nanos(self.0.load(Ordering::Relaxed))
    }
}

pub(crate) fn register_terrain_diagnostics(app: &mut App) {
    app.init_resource::<TerrainStats>()
        .init_resource::<RenderTime>()
        .register_diagnostic(Diagnostic::new(TerrainStats::SELECT_TIME).with_suffix("ms"))
        .register_diagnostic(Diagnostic::new(TerrainStats::RENDER_TIME).with_suffix("ms"))
        .register_diagnostic(Diagnostic::new(TerrainStats::PATCH_COUNT));
}

pub(crate) fn publish_terrain_diagnostics(
    mut diagnostics: Diagnostics,
    mut stats: ResMut<TerrainStats>,
    render_time: Res<RenderTime>,
    store: Res<DiagnosticsStore>,
) {
    stats.render_time = render_time.load();
    stats.gpu_time = store
        .get(&TerrainStats::GPU_TIME)
        .and_then(|diagnostic| diagnostic.value())
        .map(|millis| Duration::from_secs_f64(millis.max(0.0) / 1000.0));

    diagnostics.add_measurement(&TerrainStats::SELECT_TIME, || {
        stats.select_time.as_secs_f64() * 1000.0
    });
    diagnostics.add_measurement(&TerrainStats::RENDER_TIME, || {
        stats.render_time.as_secs_f64() * 1000.0
    });
    diagnostics.add_measurement(&TerrainStats::PATCH_COUNT, || stats.patch_count as f64);
}
