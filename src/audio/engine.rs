//! Real-time capture/process/playback engine
//!
//! Data flow:
//!   Mic -> capture callback -> capture ring -> worker -> output ring
//!       -> output callback -> speaker / virtual cable
//!
//! REAL-TIME RULES ENFORCED:
//! - Capture/output callbacks: NO allocations, NO locks, NO syscalls.
//!   They only move samples through the lock-free ring buffers.
//! - The worker thread runs the frame pipeline and is the only place that
//!   may reopen streams after a device failure.
//! - Backend streams are not `Send`, so they are opened, owned, and closed
//!   on the worker thread; `start` hands the result back over a one-shot
//!   channel and `stop` joins the worker, which makes stream closure
//!   synchronous with shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use thiserror::Error;
use thread_priority::{set_current_thread_priority, ThreadPriority};

use super::buffer::{AudioConsumer, AudioProducer, AudioRingBuffer};
use super::device;
use crate::dsp::denoiser::FRAME_SIZE;
use crate::dsp::metrics::{ControlParams, Metrics, MetricsSnapshot};
use crate::dsp::pipeline::FramePipeline;

/// Ring capacity in samples. 4096 at 48 kHz is about 85 ms, enough to
/// absorb scheduling jitter without adding perceptible latency. Must be
/// well above the frames-per-buffer of either stream.
pub const RING_CAPACITY: usize = 4096;

/// Output index that opens the default device but keeps it silent.
/// Processing and metrics stay live while nothing is audible.
pub const MUTE_OUTPUT: i32 = -2;

/// Max restart attempts before the engine stays silent.
const MAX_RESTART_ATTEMPTS: u32 = 5;

/// Worker sleep while waiting for a full frame. Short enough to keep
/// scheduling granularity well under the 10 ms frame cadence.
const IDLE_SLEEP: Duration = Duration::from_micros(500);

/// Errors surfaced by `start`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is already running")]
    AlreadyRunning,

    #[error("audio backend initialization failed: {0}")]
    BackendInit(String),

    #[error("{0}")]
    NoDevice(String),

    #[error("failed to open {0} stream: {1}")]
    StreamOpen(&'static str, String),

    #[error("failed to start {0} stream: {1}")]
    StreamStart(&'static str, String),

    #[error("denoiser initialization failed: {0}")]
    DenoiserInit(String),
}

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Capture device index, -1 for the system default.
    pub input_index: i32,
    /// Playback device index, -1 for the system default, -2 for mute.
    pub output_index: i32,
    pub sample_rate: f64,
    pub frames_per_buffer: u32,
    /// Ask the backend for fixed low-latency buffering, falling back once
    /// to its default buffering when refused.
    pub try_exclusive_mode: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_index: -1,
            output_index: -1,
            sample_rate: 48000.0,
            frames_per_buffer: FRAME_SIZE as u32,
            try_exclusive_mode: true,
        }
    }
}

/// Callback for engine status changes (device lost, restarted).
/// Invoked from the worker thread; keep it lightweight.
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// The audio engine. One instance per process; the backend itself is
/// process-global.
pub struct AudioEngine {
    running: Arc<AtomicBool>,
    should_restart: Arc<AtomicBool>,
    params: Arc<ControlParams>,
    metrics: Arc<Metrics>,
    status_callback: Option<StatusCallback>,
    worker: Option<JoinHandle<()>>,
}

impl AudioEngine {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            should_restart: Arc::new(AtomicBool::new(false)),
            params: Arc::new(ControlParams::new()),
            metrics: Arc::new(Metrics::new()),
            status_callback: None,
            worker: None,
        }
    }

    /// Enumerate all available audio devices. Safe to call anytime.
    pub fn enumerate_devices() -> Result<Vec<device::DeviceInfo>, EngineError> {
        device::enumerate_devices()
    }

    /// Start capture, processing, and playback.
    ///
    /// Blocks until the worker has opened and started both streams, so a
    /// returned error means nothing was left half-acquired.
    pub fn start(&mut self, config: EngineConfig) -> Result<(), EngineError> {
        if self.running.load(Ordering::Acquire) {
            return Err(EngineError::AlreadyRunning);
        }

        self.metrics.reset();
        let pipeline = FramePipeline::new(Arc::clone(&self.params), Arc::clone(&self.metrics));

        let running = Arc::clone(&self.running);
        let should_restart = Arc::clone(&self.should_restart);
        let status = self.status_callback.clone();
        let (ready_tx, ready_rx) = mpsc::channel();

        self.should_restart.store(false, Ordering::Relaxed);
        self.running.store(true, Ordering::Release);

        let spawned = std::thread::Builder::new()
            .name("quietmic-dsp".to_string())
            .spawn(move || worker_main(config, pipeline, running, should_restart, status, ready_tx));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(EngineError::BackendInit(format!(
                    "failed to spawn processing worker: {e}"
                )));
            }
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::Release);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::Release);
                let _ = handle.join();
                Err(EngineError::BackendInit(
                    "processing worker exited before startup completed".to_string(),
                ))
            }
        }
    }

    /// Stop the engine. Blocks until the worker has exited and both
    /// streams are closed. Calling stop on a stopped engine is a no-op.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    /// Check if the engine is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Set noise suppression level [0.0, 1.0]. Thread-safe.
    pub fn set_suppression_level(&self, level: f32) {
        self.params.set_suppression_level(level);
    }

    pub fn suppression_level(&self) -> f32 {
        self.params.suppression_level()
    }

    /// Set the voice-gate opening threshold [0.0, 1.0]. Thread-safe.
    pub fn set_vad_threshold(&self, threshold: f32) {
        self.params.set_vad_threshold(threshold);
    }

    pub fn vad_threshold(&self) -> f32 {
        self.params.vad_threshold()
    }

    /// Enable or disable comfort noise during gated silence.
    pub fn set_comfort_noise(&self, enabled: bool) {
        self.params.set_comfort_noise(enabled);
    }

    pub fn comfort_noise(&self) -> bool {
        self.params.comfort_noise()
    }

    /// Take a snapshot of the per-frame metrics. Lock-free.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Set the callback used to surface device events.
    pub fn set_status_callback(&mut self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.status_callback = Some(Arc::new(callback));
    }
}

impl Default for AudioEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stream parameters the worker needs to open (and reopen) the backend.
struct StreamSpec {
    input_index: i32,
    output_index: i32,
    sample_rate: u32,
    frames_per_buffer: u32,
    try_exclusive_mode: bool,
}

/// Live backend state: both streams plus the worker-side ring ends.
/// Dropping it closes the streams.
struct StreamIo {
    capture: AudioConsumer,
    playback: AudioProducer,
    input_stream: cpal::Stream,
    output_stream: cpal::Stream,
}

fn worker_main(
    config: EngineConfig,
    mut pipeline: FramePipeline,
    running: Arc<AtomicBool>,
    should_restart: Arc<AtomicBool>,
    status: Option<StatusCallback>,
    ready_tx: mpsc::Sender<Result<(), EngineError>>,
) {
    let spec = StreamSpec {
        input_index: config.input_index,
        output_index: config.output_index,
        sample_rate: config.sample_rate as u32,
        frames_per_buffer: config.frames_per_buffer,
        try_exclusive_mode: config.try_exclusive_mode,
    };

    let mut io = match open_streams(&spec, &running, &should_restart) {
        Ok(io) => Some(io),
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    if let Err(e) = set_current_thread_priority(ThreadPriority::Max) {
        eprintln!("warning: could not raise audio worker priority: {:?}", e);
    }

    // Run the frame loop with denormals flushed to zero; tiny residual
    // float values otherwise stall the FPU on some CPUs.
    // SAFETY: only this thread's floating point control flags are changed.
    unsafe {
        no_denormals::no_denormals(|| {
            frame_loop(
                &mut pipeline,
                &mut io,
                &spec,
                &running,
                &should_restart,
                status.as_ref(),
            );
        });
    }

    if let Some(io) = io.take() {
        close_streams(io);
    }
}

fn frame_loop(
    pipeline: &mut FramePipeline,
    io: &mut Option<StreamIo>,
    spec: &StreamSpec,
    running: &Arc<AtomicBool>,
    should_restart: &Arc<AtomicBool>,
    status: Option<&StatusCallback>,
) {
    let mut frame = [0.0f32; FRAME_SIZE];

    while running.load(Ordering::Acquire) {
        match io {
            Some(streams) if streams.capture.readable() >= FRAME_SIZE => {
                streams.capture.read(&mut frame);
                pipeline.process_frame(&mut frame);
                streams.playback.write(&frame);
            }
            // Not enough captured data yet (or the streams are gone after
            // an exhausted restart). Sleep briefly instead of spinning;
            // the rings smooth out the scheduling jitter.
            _ => std::thread::sleep(IDLE_SLEEP),
        }

        if should_restart.swap(false, Ordering::Relaxed) {
            attempt_restart(pipeline, io, spec, running, should_restart, status);
        }
    }
}

/// Recover from a device failure: backoff, then rebuild rings and streams
/// through the regular open path. After exhausting all attempts the engine
/// stays running but silent so a replugged device can be picked up by the
/// next restart trigger.
fn attempt_restart(
    pipeline: &mut FramePipeline,
    io: &mut Option<StreamIo>,
    spec: &StreamSpec,
    running: &Arc<AtomicBool>,
    should_restart: &Arc<AtomicBool>,
    status: Option<&StatusCallback>,
) {
    notify(status, "audio device issue detected, attempting restart");

    for attempt in 0..MAX_RESTART_ATTEMPTS {
        // Exponential backoff: 100, 200, 400, 800, 1600 ms.
        std::thread::sleep(Duration::from_millis(100u64 << attempt));

        if !running.load(Ordering::Acquire) {
            return;
        }

        if let Some(old) = io.take() {
            close_streams(old);
        }

        match open_streams(spec, running, should_restart) {
            Ok(new_io) => {
                pipeline.reset_filters();
                *io = Some(new_io);
                notify(status, "audio streams restarted");
                return;
            }
            Err(e) => {
                eprintln!("restart attempt {} failed: {}", attempt + 1, e);
            }
        }
    }

    notify(
        status,
        "failed to restart audio streams, output stays silent until the device recovers",
    );
}

fn notify(status: Option<&StatusCallback>, message: &str) {
    if let Some(callback) = status {
        (**callback)(message);
    }
}

fn close_streams(io: StreamIo) {
    let _ = io.input_stream.pause();
    let _ = io.output_stream.pause();
    // Dropping the streams closes them and releases the callback-owned
    // ring ends.
}

/// Open and start both streams against freshly allocated rings.
///
/// Any failure drops whatever was opened before it, so the caller either
/// gets a fully live stream pair or nothing.
fn open_streams(
    spec: &StreamSpec,
    running: &Arc<AtomicBool>,
    should_restart: &Arc<AtomicBool>,
) -> Result<StreamIo, EngineError> {
    let host = cpal::default_host();
    let input_device = device::input_device_at(&host, spec.input_index)?;
    let output_device = device::output_device_at(&host, spec.output_index)?;

    let (input_stream, capture) = build_capture_stream(&input_device, spec, running, should_restart)?;
    let (output_stream, playback) =
        build_playback_stream(&output_device, spec, running, should_restart)?;

    input_stream
        .play()
        .map_err(|e| EngineError::StreamStart("capture", e.to_string()))?;
    output_stream
        .play()
        .map_err(|e| EngineError::StreamStart("output", e.to_string()))?;

    Ok(StreamIo {
        capture,
        playback,
        input_stream,
        output_stream,
    })
}

/// Mono float stream shape shared by both sides. `low_latency` asks for a
/// fixed frame-sized buffer; shared fallback takes whatever the backend
/// prefers.
fn stream_config(spec: &StreamSpec, low_latency: bool) -> StreamConfig {
    StreamConfig {
        channels: 1,
        sample_rate: SampleRate(spec.sample_rate),
        buffer_size: if low_latency {
            BufferSize::Fixed(spec.frames_per_buffer)
        } else {
            BufferSize::Default
        },
    }
}

fn build_capture_stream(
    device: &cpal::Device,
    spec: &StreamSpec,
    running: &Arc<AtomicBool>,
    should_restart: &Arc<AtomicBool>,
) -> Result<(cpal::Stream, AudioConsumer), EngineError> {
    match try_build_capture(device, &stream_config(spec, spec.try_exclusive_mode), running, should_restart) {
        Ok(pair) => Ok(pair),
        // The low-latency request is a capability probe; retry once with
        // the backend's own buffering before giving up.
        Err(_) if spec.try_exclusive_mode => {
            try_build_capture(device, &stream_config(spec, false), running, should_restart)
                .map_err(|e| EngineError::StreamOpen("capture", e.to_string()))
        }
        Err(e) => Err(EngineError::StreamOpen("capture", e.to_string())),
    }
}

fn try_build_capture(
    device: &cpal::Device,
    config: &StreamConfig,
    running: &Arc<AtomicBool>,
    should_restart: &Arc<AtomicBool>,
) -> Result<(cpal::Stream, AudioConsumer), cpal::BuildStreamError> {
    let (mut producer, consumer) = AudioRingBuffer::new(RING_CAPACITY).split();
    let running = Arc::clone(running);
    let restart = Arc::clone(should_restart);

    let stream = device.build_input_stream(
        config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // Real-time thread: ring write only. Overflow past the ring
            // capacity is dropped rather than ever blocking here.
            if !running.load(Ordering::Relaxed) {
                return;
            }
            producer.write(data);
        },
        move |err| {
            eprintln!("capture stream error: {err}");
            restart.store(true, Ordering::Relaxed);
        },
        None,
    )?;

    Ok((stream, consumer))
}

fn build_playback_stream(
    device: &cpal::Device,
    spec: &StreamSpec,
    running: &Arc<AtomicBool>,
    should_restart: &Arc<AtomicBool>,
) -> Result<(cpal::Stream, AudioProducer), EngineError> {
    let mute = spec.output_index == MUTE_OUTPUT;
    match try_build_playback(device, &stream_config(spec, spec.try_exclusive_mode), mute, running, should_restart) {
        Ok(pair) => Ok(pair),
        Err(_) if spec.try_exclusive_mode => {
            try_build_playback(device, &stream_config(spec, false), mute, running, should_restart)
                .map_err(|e| EngineError::StreamOpen("output", e.to_string()))
        }
        Err(e) => Err(EngineError::StreamOpen("output", e.to_string())),
    }
}

fn try_build_playback(
    device: &cpal::Device,
    config: &StreamConfig,
    mute: bool,
    running: &Arc<AtomicBool>,
    should_restart: &Arc<AtomicBool>,
) -> Result<(cpal::Stream, AudioProducer), cpal::BuildStreamError> {
    let (producer, mut consumer) = AudioRingBuffer::new(RING_CAPACITY).split();
    let running = Arc::clone(running);
    let restart = Arc::clone(should_restart);

    let error_callback = move |err: cpal::StreamError| {
        eprintln!("output stream error: {err}");
        restart.store(true, Ordering::Relaxed);
    };

    let stream = if mute {
        // Muted output keeps the device clocked while audible output is
        // suppressed regardless of what the worker produces.
        drop(consumer);
        device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                data.fill(0.0);
            },
            error_callback,
            None,
        )?
    } else {
        device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                // Real-time thread: ring read only. Any shortfall is
                // zero-filled instead of waiting for the worker.
                if !running.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }
                let read = consumer.read(data);
                data[read..].fill(0.0);
            },
            error_callback,
            None,
        )?
    };

    Ok((stream, producer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_starts_stopped() {
        let engine = AudioEngine::new();
        assert!(!engine.is_running());
        assert_eq!(engine.metrics().frames_processed, 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut engine = AudioEngine::new();
        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn test_start_with_absurd_device_index_fails_cleanly() {
        let mut engine = AudioEngine::new();
        let config = EngineConfig {
            input_index: 9999,
            ..EngineConfig::default()
        };

        let result = engine.start(config);
        assert!(result.is_err());
        assert!(!engine.is_running());

        // The failed start must leave the engine reusable.
        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn test_parameter_passthrough_clamps() {
        let engine = AudioEngine::new();

        engine.set_suppression_level(2.0);
        assert_eq!(engine.suppression_level(), 1.0);

        engine.set_vad_threshold(-1.0);
        assert_eq!(engine.vad_threshold(), 0.0);

        engine.set_comfort_noise(false);
        assert!(!engine.comfort_noise());
    }

    #[test]
    fn test_default_config_matches_frame_cadence() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 48000.0);
        assert_eq!(config.frames_per_buffer as usize, FRAME_SIZE);
        assert_eq!(config.input_index, -1);
        assert_eq!(config.output_index, -1);
    }

    #[test]
    fn test_enumerate_devices_is_safe_anytime() {
        let _ = AudioEngine::enumerate_devices();
        let engine = AudioEngine::new();
        let _ = AudioEngine::enumerate_devices();
        drop(engine);
        let _ = AudioEngine::enumerate_devices();
    }
}
