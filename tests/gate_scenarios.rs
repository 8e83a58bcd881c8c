//! End-to-end frame pipeline scenarios
//!
//! Each test feeds a sequence of 480-sample frames at 48 kHz through the
//! full processing pipeline and checks the gate, floor tracker, and
//! metrics against their expected envelope behavior. The neural denoiser
//! is swapped for a scripted identity backend so voice probability is
//! deterministic; one final test runs the real double-pass network.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use quietmic_core::dsp::metrics::{ControlParams, Metrics};
use quietmic_core::dsp::pipeline::FramePipeline;
use quietmic_core::{Denoiser, FRAME_SIZE};

/// Identity denoiser whose reported voice probability is set by the test.
struct ScriptedDenoiser {
    vad: Arc<AtomicU32>,
}

impl Denoiser for ScriptedDenoiser {
    fn process_frame(&mut self, _frame: &mut [f32; FRAME_SIZE]) -> f32 {
        f32::from_bits(self.vad.load(Ordering::Relaxed))
    }
}

struct Harness {
    pipeline: FramePipeline,
    vad: Arc<AtomicU32>,
    params: Arc<ControlParams>,
    metrics: Arc<Metrics>,
}

impl Harness {
    fn new() -> Self {
        let vad = Arc::new(AtomicU32::new(0.0f32.to_bits()));
        let params = Arc::new(ControlParams::new());
        let metrics = Arc::new(Metrics::new());
        let pipeline = FramePipeline::with_denoiser(
            Box::new(ScriptedDenoiser {
                vad: Arc::clone(&vad),
            }),
            Arc::clone(&params),
            Arc::clone(&metrics),
        );
        Self {
            pipeline,
            vad,
            params,
            metrics,
        }
    }

    fn set_vad(&self, value: f32) {
        self.vad.store(value.to_bits(), Ordering::Relaxed);
    }

    fn gate_gain(&self) -> f32 {
        self.metrics.snapshot().gate_gain
    }
}

/// Phase-continuous sine generator.
struct Sine {
    phase: f64,
    step: f64,
    amplitude: f32,
}

impl Sine {
    fn new(freq_hz: f64, amplitude: f32) -> Self {
        Self {
            phase: 0.0,
            step: 2.0 * std::f64::consts::PI * freq_hz / 48000.0,
            amplitude,
        }
    }

    fn fill(&mut self, frame: &mut [f32; FRAME_SIZE]) {
        for sample in frame.iter_mut() {
            *sample = self.phase.sin() as f32 * self.amplitude;
            self.phase += self.step;
        }
    }
}

/// Uniform white noise at a target RMS.
fn noise_frame(rng: &mut StdRng, rms: f32, frame: &mut [f32; FRAME_SIZE]) {
    let amplitude = rms * 3.0f32.sqrt();
    for sample in frame.iter_mut() {
        *sample = rng.gen_range(-amplitude..amplitude);
    }
}

#[test]
fn pure_silence_converges_to_comfort_noise() {
    let mut h = Harness::new();
    h.params.set_suppression_level(1.0);
    h.params.set_vad_threshold(0.65);
    h.params.set_comfort_noise(true);
    h.set_vad(0.0);

    let mut frame = [0.0f32; FRAME_SIZE];
    for _ in 0..400 {
        frame.fill(0.0);
        h.pipeline.process_frame(&mut frame);
    }

    let snap = h.metrics.snapshot();
    assert!(snap.noise_floor >= 0.0003, "floor {}", snap.noise_floor);
    assert!(snap.gate_gain < 0.01, "gain {}", snap.gate_gain);
    // Output is comfort noise alone, around -60 dBFS.
    assert!(snap.output_rms > 0.0);
    assert!(snap.output_rms <= 0.0015, "rms {}", snap.output_rms);
    assert_eq!(snap.frames_processed, 400);
}

#[test]
fn pure_silence_without_comfort_noise_is_true_zero() {
    let mut h = Harness::new();
    h.params.set_comfort_noise(false);
    h.set_vad(0.0);

    let mut frame = [0.0f32; FRAME_SIZE];
    for _ in 0..400 {
        frame.fill(0.0);
        h.pipeline.process_frame(&mut frame);
    }

    assert!(frame.iter().all(|&s| s == 0.0));
    assert_eq!(h.metrics.snapshot().output_rms, 0.0);
}

#[test]
fn steady_tone_passes_at_full_gain() {
    let mut h = Harness::new();
    h.set_vad(0.9);

    let mut sine = Sine::new(1000.0, 0.3);
    let mut frame = [0.0f32; FRAME_SIZE];
    for i in 0..100 {
        sine.fill(&mut frame);
        h.pipeline.process_frame(&mut frame);

        if i >= 10 {
            let snap = h.metrics.snapshot();
            assert!(snap.vad_probability > 0.65);
            assert_eq!(snap.gate_gain, 1.0);
        }
    }

    // The tone sits inside the pass band, so level is preserved to
    // within the allowed coloration margin.
    let snap = h.metrics.snapshot();
    let ratio = snap.output_rms / snap.input_rms;
    assert!((0.8..=1.2).contains(&ratio), "ratio {}", ratio);
}

#[test]
fn white_noise_is_gated_out() {
    let mut h = Harness::new();
    h.params.set_comfort_noise(false);
    h.set_vad(0.2);

    let mut rng = StdRng::seed_from_u64(7);
    let mut frame = [0.0f32; FRAME_SIZE];
    for _ in 0..300 {
        noise_frame(&mut rng, 0.01, &mut frame);
        h.pipeline.process_frame(&mut frame);
    }

    let snap = h.metrics.snapshot();
    assert!(snap.gate_gain < 0.01, "gain {}", snap.gate_gain);
    assert!(snap.output_rms < 0.002, "rms {}", snap.output_rms);
}

#[test]
fn speech_to_silence_holds_then_closes_fast() {
    let mut h = Harness::new();
    h.params.set_comfort_noise(false);

    let mut sine = Sine::new(1000.0, 0.3);
    let mut frame = [0.0f32; FRAME_SIZE];

    h.set_vad(0.9);
    for _ in 0..50 {
        sine.fill(&mut frame);
        h.pipeline.process_frame(&mut frame);
    }
    assert_eq!(h.gate_gain(), 1.0);

    // The gate stays pinned fully open for the 150 ms hold window, then
    // closes within a handful of frames.
    h.set_vad(0.01);
    let mut held = 0;
    let mut closed_after = None;
    for i in 0..40 {
        frame.fill(0.0);
        h.pipeline.process_frame(&mut frame);
        let gain = h.gate_gain();
        if gain == 1.0 && closed_after.is_none() {
            held += 1;
        } else if gain < 0.1 {
            closed_after = closed_after.or(Some(i + 1));
        }
    }
    assert_eq!(held, 15, "hold window should be exactly 15 frames");
    let closed_after = closed_after.expect("gate never closed");
    assert!(
        closed_after <= 15 + 7,
        "gate closed only after {} frames",
        closed_after
    );
}

#[test]
fn silence_to_speech_opens_smoothly() {
    let mut h = Harness::new();

    let mut frame = [0.0f32; FRAME_SIZE];
    h.set_vad(0.01);
    for _ in 0..50 {
        frame.fill(0.0);
        h.pipeline.process_frame(&mut frame);
    }
    assert!(h.gate_gain() < 0.01);

    // Voice onset: the gate ramps open with the slow coefficient and no
    // sample step ever jumps more than the continuity bound.
    let mut sine = Sine::new(1000.0, 0.3);
    let mut previous_sample = frame[FRAME_SIZE - 1];
    let mut frames_to_open = None;
    for i in 0..50 {
        sine.fill(&mut frame);
        h.pipeline.process_frame(&mut frame);

        let mut last = previous_sample;
        for &sample in frame.iter() {
            assert!(
                (sample - last).abs() < 0.2,
                "discontinuity at onset: {} -> {}",
                last,
                sample
            );
            last = sample;
        }
        previous_sample = last;

        if frames_to_open.is_none() && h.gate_gain() >= 0.9 {
            frames_to_open = Some(i + 1);
        }
    }

    let frames_to_open = frames_to_open.expect("gate never reached 0.9");
    assert!(
        frames_to_open <= 15,
        "gate took {} frames to open",
        frames_to_open
    );
    // The slow opening coefficient needs several frames; an instant jump
    // would mean the asymmetric smoothing is gone.
    assert!(frames_to_open >= 5, "gate opened suspiciously fast");
}

#[test]
fn zero_level_bypass_is_bit_exact() {
    let mut h = Harness::new();
    h.params.set_suppression_level(0.0);
    h.set_vad(0.9);

    let mut rng = StdRng::seed_from_u64(11);
    let mut frame = [0.0f32; FRAME_SIZE];
    for _ in 0..10 {
        noise_frame(&mut rng, 0.05, &mut frame);
        let expected = frame;

        let vad = h.pipeline.process_frame(&mut frame);

        assert_eq!(vad, 0.0);
        assert_eq!(frame, expected);

        let snap = h.metrics.snapshot();
        assert_eq!(snap.input_rms, snap.output_rms);
        assert_eq!(snap.vad_probability, 0.0);
        assert_eq!(snap.gate_gain, 1.0);
    }
    assert_eq!(h.metrics.snapshot().frames_processed, 10);
}

#[test]
fn real_denoiser_full_pipeline_stays_sane() {
    let params = Arc::new(ControlParams::new());
    let metrics = Arc::new(Metrics::new());
    let mut pipeline = FramePipeline::new(Arc::clone(&params), Arc::clone(&metrics));

    let mut rng = StdRng::seed_from_u64(23);
    let mut frame = [0.0f32; FRAME_SIZE];
    for _ in 0..100 {
        noise_frame(&mut rng, 0.02, &mut frame);
        let vad = pipeline.process_frame(&mut frame);

        assert!((0.0..=1.0).contains(&vad));
        assert!(frame.iter().all(|s| s.is_finite()));

        let snap = metrics.snapshot();
        assert!((0.0..=1.0).contains(&snap.gate_gain));
        assert!(snap.noise_floor >= 0.0);
    }

    assert_eq!(metrics.snapshot().frames_processed, 100);
}
