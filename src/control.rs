//! Control surface: the host-facing boundary of the engine
//!
//! A thin adapter that validates and clamps arguments at the boundary and
//! forwards to the engine. Everything crossing this boundary is a plain
//! value; no pointers into core state ever leave the crate.

use crate::audio::device::DeviceInfo;
use crate::audio::engine::{AudioEngine, EngineConfig};
use crate::dsp::metrics::MetricsSnapshot;

/// Devices split by direction, the shape a device picker wants.
#[cfg_attr(feature = "python", pyo3::pyclass(get_all))]
#[derive(Clone, Debug, Default)]
pub struct DeviceList {
    pub inputs: Vec<DeviceInfo>,
    pub outputs: Vec<DeviceInfo>,
}

/// Coarse engine state for the host.
#[cfg_attr(feature = "python", pyo3::pyclass(get_all))]
#[derive(Clone, Copy, Debug)]
pub struct EngineStatus {
    pub running: bool,
    pub level: f32,
}

/// Owns the engine and exposes its host-facing operations.
///
/// Construct one surface per process; the audio backend underneath is
/// process-global.
pub struct ControlSurface {
    engine: AudioEngine,
}

impl ControlSurface {
    pub fn new() -> Self {
        Self {
            engine: AudioEngine::new(),
        }
    }

    /// List available devices, split into capture and playback sides.
    pub fn get_devices(&self) -> DeviceList {
        let devices = AudioEngine::enumerate_devices().unwrap_or_default();
        DeviceList {
            inputs: devices
                .iter()
                .filter(|d| d.max_input_channels > 0)
                .cloned()
                .collect(),
            outputs: devices
                .iter()
                .filter(|d| d.max_output_channels > 0)
                .cloned()
                .collect(),
        }
    }

    /// Start the engine on the given device indices (-1 = default input
    /// or output, -2 = silent output).
    ///
    /// Returns an empty string on success, a human-readable error
    /// otherwise.
    pub fn start(&mut self, input_index: i32, output_index: i32) -> String {
        let config = EngineConfig {
            input_index,
            output_index,
            ..EngineConfig::default()
        };
        match self.engine.start(config) {
            Ok(()) => String::new(),
            Err(e) => e.to_string(),
        }
    }

    /// Stop the engine. Always succeeds; stopping twice is a no-op.
    pub fn stop(&mut self) -> bool {
        self.engine.stop();
        true
    }

    /// Set the suppression level; out-of-range values are clamped.
    pub fn set_level(&self, level: f32) -> bool {
        self.engine.set_suppression_level(level);
        true
    }

    pub fn level(&self) -> f32 {
        self.engine.suppression_level()
    }

    /// Set the voice-gate threshold; out-of-range values are clamped.
    pub fn set_vad_threshold(&self, threshold: f32) -> bool {
        self.engine.set_vad_threshold(threshold);
        true
    }

    pub fn vad_threshold(&self) -> f32 {
        self.engine.vad_threshold()
    }

    /// Toggle comfort noise during gated silence.
    pub fn set_comfort_noise(&self, enabled: bool) -> bool {
        self.engine.set_comfort_noise(enabled);
        true
    }

    pub fn get_status(&self) -> EngineStatus {
        EngineStatus {
            running: self.engine.is_running(),
            level: self.engine.suppression_level(),
        }
    }

    /// Snapshot the per-frame metrics. Intended for ~10 Hz polling; each
    /// field read is atomic and non-blocking.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.engine.metrics()
    }

    /// Install a callback for device events (disconnects, restarts).
    pub fn set_status_callback(&mut self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.engine.set_status_callback(callback);
    }
}

impl Default for ControlSurface {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_surface_reports_stopped() {
        let surface = ControlSurface::new();
        let status = surface.get_status();
        assert!(!status.running);
        assert_eq!(status.level, 1.0);
    }

    #[test]
    fn test_level_is_clamped_at_the_boundary() {
        let surface = ControlSurface::new();

        assert!(surface.set_level(3.5));
        assert_eq!(surface.level(), 1.0);

        assert!(surface.set_level(-2.0));
        assert_eq!(surface.level(), 0.0);
    }

    #[test]
    fn test_start_with_bad_index_returns_error_string() {
        let mut surface = ControlSurface::new();
        let error = surface.start(12345, -1);
        assert!(!error.is_empty());
        assert!(!surface.get_status().running);
    }

    #[test]
    fn test_stop_always_succeeds() {
        let mut surface = ControlSurface::new();
        assert!(surface.stop());
        assert!(surface.stop());
    }

    #[test]
    fn test_metrics_snapshot_has_fresh_start_values() {
        let surface = ControlSurface::new();
        let metrics = surface.get_metrics();
        assert_eq!(metrics.frames_processed, 0);
        assert_eq!(metrics.gate_gain, 1.0);
        assert_eq!(metrics.noise_floor, 0.0);
    }

    #[test]
    fn test_device_lists_split_by_direction() {
        let surface = ControlSurface::new();
        let devices = surface.get_devices();
        // CI machines may expose no devices at all; when they do, every
        // listed device must be on the correct side.
        assert!(devices.inputs.iter().all(|d| d.max_input_channels > 0));
        assert!(devices.outputs.iter().all(|d| d.max_output_channels > 0));
    }
}
