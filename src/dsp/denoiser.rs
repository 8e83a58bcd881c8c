//! Double-pass neural denoiser adapter
//!
//! The network consumes exactly 480 samples per call (10 ms at 48 kHz) in
//! int16-equivalent magnitude and reports a per-frame voice probability.
//! Two independent instances run in cascade: the first removes most of the
//! noise, the second catches residual artifacts. The passes must be
//! separate instances so the second network's recurrent state only ever
//! sees first-pass output.

use nnnoiseless::DenoiseState;

/// Denoiser frame size in samples (10 ms at 48 kHz).
pub const FRAME_SIZE: usize = DenoiseState::FRAME_SIZE;

/// Per-frame denoising backend.
///
/// The frame arrives already scaled to int16-equivalent magnitude and is
/// rewritten in place. Implementations must not allocate per frame.
pub trait Denoiser: Send {
    /// Denoise one frame in place, returning the voice probability [0, 1].
    fn process_frame(&mut self, frame: &mut [f32; FRAME_SIZE]) -> f32;
}

/// Cascaded two-pass denoiser.
pub struct DualDenoiser {
    first: Box<DenoiseState<'static>>,
    second: Box<DenoiseState<'static>>,
    scratch: [f32; FRAME_SIZE],
}

impl DualDenoiser {
    /// Create both network instances.
    pub fn new() -> Self {
        Self {
            first: DenoiseState::new(),
            second: DenoiseState::new(),
            scratch: [0.0; FRAME_SIZE],
        }
    }
}

impl Default for DualDenoiser {
    fn default() -> Self {
        Self::new()
    }
}

impl Denoiser for DualDenoiser {
    fn process_frame(&mut self, frame: &mut [f32; FRAME_SIZE]) -> f32 {
        let vad1 = self.first.process_frame(&mut self.scratch, &frame[..]);
        let vad2 = self.second.process_frame(&mut frame[..], &self.scratch);

        // Either pass spotting voice is enough to hold the gate open.
        vad1.max(vad2)
    }
}
