//! Lock-free metric registers and control parameter cells
//!
//! Every cell is a single numeric value with exactly one writer. Metrics
//! are written by the processing worker and polled by the host; control
//! parameters are written by the host and read by the worker. Values are
//! f32 bits stored in an `AtomicU32` with relaxed ordering. Readers may
//! observe a mix of adjacent frames across fields; each individual read is
//! still atomic.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Single f32 cell with relaxed atomic access.
pub(crate) struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub(crate) fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub(crate) fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Real-time metrics updated once per processed frame.
pub struct Metrics {
    pub(crate) input_rms: AtomicF32,
    pub(crate) output_rms: AtomicF32,
    pub(crate) vad_probability: AtomicF32,
    pub(crate) gate_gain: AtomicF32,
    pub(crate) noise_floor: AtomicF32,
    pub(crate) frames_processed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            input_rms: AtomicF32::new(0.0),
            output_rms: AtomicF32::new(0.0),
            vad_probability: AtomicF32::new(0.0),
            gate_gain: AtomicF32::new(1.0),
            noise_floor: AtomicF32::new(0.0),
            frames_processed: AtomicU64::new(0),
        }
    }

    /// Reset all registers to their fresh-start values.
    pub fn reset(&self) {
        self.input_rms.store(0.0);
        self.output_rms.store(0.0);
        self.vad_probability.store(0.0);
        self.gate_gain.store(1.0);
        self.noise_floor.store(0.0);
        self.frames_processed.store(0, Ordering::Relaxed);
    }

    /// Take a display snapshot of all registers.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            input_rms: self.input_rms.load(),
            output_rms: self.output_rms.load(),
            vad_probability: self.vad_probability.load(),
            gate_gain: self.gate_gain.load(),
            noise_floor: self.noise_floor.load(),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain-value copy of the metric registers.
#[cfg_attr(feature = "python", pyo3::pyclass(get_all))]
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsSnapshot {
    pub input_rms: f32,
    pub output_rms: f32,
    pub vad_probability: f32,
    pub gate_gain: f32,
    pub noise_floor: f32,
    pub frames_processed: u64,
}

/// Host-adjustable processing parameters.
///
/// Written by the control surface, read by the processing worker once per
/// frame. Out-of-range values are clamped at the setter.
pub struct ControlParams {
    suppression_level: AtomicF32,
    vad_threshold: AtomicF32,
    comfort_noise: AtomicBool,
}

impl ControlParams {
    pub fn new() -> Self {
        Self {
            suppression_level: AtomicF32::new(1.0),
            vad_threshold: AtomicF32::new(0.65),
            comfort_noise: AtomicBool::new(true),
        }
    }

    /// Set the dry/wet suppression mix (0.0 = bypass, 1.0 = full).
    pub fn set_suppression_level(&self, level: f32) {
        self.suppression_level.store(level.clamp(0.0, 1.0));
    }

    pub fn suppression_level(&self) -> f32 {
        self.suppression_level.load()
    }

    /// Set the gate opening threshold on voice probability.
    pub fn set_vad_threshold(&self, threshold: f32) {
        self.vad_threshold.store(threshold.clamp(0.0, 1.0));
    }

    pub fn vad_threshold(&self) -> f32 {
        self.vad_threshold.load()
    }

    /// Enable or disable comfort noise during gated silence.
    pub fn set_comfort_noise(&self, enabled: bool) {
        self.comfort_noise.store(enabled, Ordering::Relaxed);
    }

    pub fn comfort_noise(&self) -> bool {
        self.comfort_noise.load(Ordering::Relaxed)
    }
}

impl Default for ControlParams {
    fn default() -> Self {
        Self::new()
    }
}
