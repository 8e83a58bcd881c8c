//! Digital signal processing components

pub mod biquad;
pub mod denoiser;
pub mod metrics;
pub mod pipeline;

pub use biquad::Biquad;
pub use denoiser::{Denoiser, DualDenoiser, FRAME_SIZE};
pub use metrics::{ControlParams, Metrics, MetricsSnapshot};
pub use pipeline::FramePipeline;
