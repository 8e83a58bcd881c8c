//! QuietMic Core - real-time microphone noise suppression engine
//!
//! Processing chain: Mic Input → Double-Pass Denoise → Band-Limit →
//! Adaptive Voice Gate → Output

pub mod audio;
pub mod control;
pub mod dsp;

#[cfg(feature = "python")]
mod python;

// Re-export main types
pub use audio::{AudioEngine, DeviceInfo, EngineConfig, EngineError};
pub use control::{ControlSurface, DeviceList, EngineStatus};
pub use dsp::{Denoiser, DualDenoiser, FramePipeline, MetricsSnapshot, FRAME_SIZE};
