//! Per-frame processing pipeline
//!
//! Chain per 10 ms frame: double-pass denoise -> band-limit -> noise-floor
//! learning -> voice-gated attenuation with hold and asymmetric smoothing
//! -> spectral clamp -> comfort noise -> metrics.
//!
//! The whole pipeline is owned by the processing worker. `process_frame`
//! does no allocation, takes no locks, and makes no system calls; the only
//! shared state it touches are the relaxed-atomic parameter and metric
//! cells.

use std::sync::Arc;

use super::biquad::Biquad;
use super::denoiser::{Denoiser, DualDenoiser, FRAME_SIZE};
use super::metrics::{ControlParams, Metrics};

/// Scaling factor mapping [-1.0, 1.0] to the denoiser's int16 range.
const PCM_SCALE: f32 = 32767.0;

/// Gate smoothing when closing. 0.40 per 10 ms frame silences noise in
/// roughly two frames.
const GATE_CLOSE_COEFF: f32 = 0.40;

/// Gate smoothing when opening. 0.15 per frame fades voice in over
/// roughly 140 ms so word onsets are not clipped.
const GATE_OPEN_COEFF: f32 = 0.15;

/// Frames the gate is forced open after the most recent speech detection
/// (15 frames = 150 ms).
const HOLD_FRAMES: u32 = 15;

/// Dead band below the voice threshold inside which frame energy decides
/// the gate instead of probability alone.
const VAD_HYSTERESIS: f32 = 0.12;

/// Noise frames contributing to the fast calibration EMA before the
/// tracker drops to its slow rate.
const CALIBRATION_FRAMES: u32 = 200;
const CALIBRATION_ALPHA: f32 = 0.08;
const TRACKING_ALPHA: f32 = 0.005;

/// Lower bound for the learned noise floor RMS.
const NOISE_FLOOR_MIN: f32 = 0.0003;

/// Gate threshold as a multiple of the learned floor, and the fixed
/// fallback used until the floor has been seeded.
const GATE_FLOOR_RATIO: f32 = 1.5;
const GATE_FALLBACK_THRESH: f32 = 0.002;

/// Residual clamp: samples below max(2 x floor, 0.0009) are forced to
/// exact zero while the gate is closed and no voice is present.
const CLAMP_FLOOR_RATIO: f32 = 2.0;
const CLAMP_MIN_THRESH: f32 = 0.0009;

/// Comfort noise is blended in below this gate gain, at ~-60 dBFS.
const COMFORT_GAIN_CEIL: f32 = 0.1;
const COMFORT_LEVEL: f32 = 0.001;

/// Seed for the comfort noise generator.
const COMFORT_SEED: u32 = 0x12345678;

/// Frame pipeline with learned-floor voice gating.
pub struct FramePipeline {
    denoiser: Box<dyn Denoiser>,
    hpf: Biquad,
    lpf: Biquad,

    /// Currently applied gate gain, smoothed asymmetrically.
    smooth_gain: f32,
    /// Frames remaining in the post-speech hold window.
    hold_counter: u32,
    /// EMA of post-filter RMS over non-speech frames.
    noise_floor: f32,
    /// Noise frames consumed by the fast calibration EMA so far.
    calibration_count: u32,

    /// Comfort noise generator state (xorshift32 plus one shaping pole).
    lfsr_state: u32,
    prev_noise: f32,

    params: Arc<ControlParams>,
    metrics: Arc<Metrics>,
}

impl FramePipeline {
    /// Create the pipeline with the production double-pass denoiser.
    pub fn new(params: Arc<ControlParams>, metrics: Arc<Metrics>) -> Self {
        Self::with_denoiser(Box::new(DualDenoiser::new()), params, metrics)
    }

    /// Create the pipeline with a specific denoiser backend.
    pub fn with_denoiser(
        denoiser: Box<dyn Denoiser>,
        params: Arc<ControlParams>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            denoiser,
            hpf: Biquad::high_pass_80hz(),
            lpf: Biquad::low_pass_8khz(),
            smooth_gain: 1.0,
            hold_counter: 0,
            noise_floor: 0.0,
            calibration_count: 0,
            lfsr_state: COMFORT_SEED,
            prev_noise: 0.0,
            params,
            metrics,
        }
    }

    /// Zero the band-limiting filter delays.
    ///
    /// Called after a stream restart so stale delay samples from the old
    /// device do not leak into the new one.
    pub fn reset_filters(&mut self) {
        self.hpf.reset();
        self.lpf.reset();
    }

    /// Process one frame in place, returning the voice probability.
    pub fn process_frame(&mut self, frame: &mut [f32; FRAME_SIZE]) -> f32 {
        let level = self.params.suppression_level();

        // Fast path: suppression fully off means bit-exact passthrough.
        if level <= 0.0 {
            let rms = frame_rms(frame);
            self.metrics.input_rms.store(rms);
            self.metrics.output_rms.store(rms);
            self.metrics.vad_probability.store(0.0);
            self.metrics.gate_gain.store(1.0);
            self.metrics
                .frames_processed
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return 0.0;
        }

        let input_rms = frame_rms(frame);
        self.metrics.input_rms.store(input_rms);

        // Keep the dry signal for blending, then hand the denoiser an
        // int16-scaled copy.
        let mut original = [0.0f32; FRAME_SIZE];
        original.copy_from_slice(frame);
        for sample in frame.iter_mut() {
            *sample *= PCM_SCALE;
        }

        let vad = self.denoiser.process_frame(frame);
        self.metrics.vad_probability.store(vad);

        const INV_SCALE: f32 = 1.0 / PCM_SCALE;
        for sample in frame.iter_mut() {
            *sample *= INV_SCALE;
        }

        if level < 1.0 {
            let dry = 1.0 - level;
            for (sample, &orig) in frame.iter_mut().zip(original.iter()) {
                *sample = *sample * level + orig * dry;
            }
        }

        // Band-limit to the speech range.
        for sample in frame.iter_mut() {
            *sample = self.lpf.process(self.hpf.process(*sample));
        }

        let post_rms = frame_rms(frame);
        let vad_thresh = self.params.vad_threshold();

        self.update_noise_floor(vad, vad_thresh, post_rms);

        let target_gain = self.gate_target(vad, vad_thresh, post_rms);

        // Asymmetric smoothing: closing is fast, opening is slow.
        let coeff = if target_gain < self.smooth_gain {
            GATE_CLOSE_COEFF
        } else {
            GATE_OPEN_COEFF
        };
        self.smooth_gain += coeff * (target_gain - self.smooth_gain);
        self.smooth_gain = self.smooth_gain.clamp(0.0, 1.0);
        self.metrics.gate_gain.store(self.smooth_gain);

        for sample in frame.iter_mut() {
            *sample *= self.smooth_gain;
        }

        // Residual clamp: with no voice and the gate nearly closed, force
        // everything under the audibility threshold to true zero.
        if vad < vad_thresh && self.smooth_gain <= 0.3 {
            let clamp_thresh = (self.noise_floor * CLAMP_FLOOR_RATIO).max(CLAMP_MIN_THRESH);
            for sample in frame.iter_mut() {
                if sample.abs() < clamp_thresh {
                    *sample = 0.0;
                }
            }
        }

        // Shaped comfort noise so a fully gated channel does not sound dead.
        if self.params.comfort_noise() && self.smooth_gain < COMFORT_GAIN_CEIL {
            let scale = (COMFORT_GAIN_CEIL - self.smooth_gain) / COMFORT_GAIN_CEIL;
            for sample in frame.iter_mut() {
                *sample += self.comfort_sample() * scale;
            }
        }

        let output_rms = frame_rms(frame);
        self.metrics.output_rms.store(output_rms);
        self.metrics
            .frames_processed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        vad
    }

    /// Track the noise floor over frames that are confidently not speech.
    ///
    /// Only frames with voice probability under half the user threshold
    /// contribute, which keeps quiet speech out of the estimate.
    fn update_noise_floor(&mut self, vad: f32, vad_thresh: f32, post_rms: f32) {
        if vad < vad_thresh * 0.5 {
            let alpha = if self.calibration_count < CALIBRATION_FRAMES {
                self.calibration_count += 1;
                CALIBRATION_ALPHA
            } else {
                TRACKING_ALPHA
            };

            if self.noise_floor <= 0.0 {
                self.noise_floor = post_rms;
            } else {
                self.noise_floor += alpha * (post_rms - self.noise_floor);
            }
            self.noise_floor = self.noise_floor.max(NOISE_FLOOR_MIN);
        }

        self.metrics.noise_floor.store(self.noise_floor);
    }

    /// Decide the gate's target gain for this frame.
    fn gate_target(&mut self, vad: f32, vad_thresh: f32, post_rms: f32) -> f32 {
        let gate_thresh = if self.noise_floor > NOISE_FLOOR_MIN {
            self.noise_floor * GATE_FLOOR_RATIO
        } else {
            GATE_FALLBACK_THRESH
        };

        let speech_by_vad = vad >= vad_thresh;
        // Inside the hysteresis band, strong energy relative to the learned
        // floor still counts as speech. This stops the gate chattering on
        // marginal probability frames.
        let speech_by_energy =
            vad >= vad_thresh - VAD_HYSTERESIS && post_rms > 2.0 * gate_thresh;

        if speech_by_vad || speech_by_energy {
            self.hold_counter = HOLD_FRAMES;
            return 1.0;
        }

        if self.hold_counter > 0 {
            self.hold_counter -= 1;
            return 1.0;
        }

        if post_rms < gate_thresh {
            return 0.0;
        }

        // Between the floor threshold and clear speech: partial gain,
        // capped at 0.5 so residual noise never comes through at full level.
        ((post_rms - gate_thresh) / gate_thresh.max(1e-4)).clamp(0.0, 0.5)
    }

    /// One sample of shaped comfort noise at roughly -60 dBFS.
    #[inline]
    fn comfort_sample(&mut self) -> f32 {
        // xorshift32
        self.lfsr_state ^= self.lfsr_state << 13;
        self.lfsr_state ^= self.lfsr_state >> 17;
        self.lfsr_state ^= self.lfsr_state << 5;

        let white = (self.lfsr_state as i32) as f32 / 2147483648.0;
        // One-pole shaping tilts the spectrum away from harsh white noise.
        self.prev_noise = 0.7 * self.prev_noise + 0.3 * white;
        self.prev_noise * COMFORT_LEVEL
    }
}

/// RMS of one frame.
fn frame_rms(frame: &[f32]) -> f32 {
    let sum: f32 = frame.iter().map(|&s| s * s).sum();
    (sum / frame.len() as f32).sqrt()
}
