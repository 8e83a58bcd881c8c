//! Audio device I/O and the real-time engine

pub mod buffer;
pub mod device;
pub mod engine;

pub use buffer::{AudioConsumer, AudioProducer, AudioRingBuffer};
pub use device::{enumerate_devices, DeviceInfo};
pub use engine::{AudioEngine, EngineConfig, EngineError, StatusCallback, MUTE_OUTPUT, RING_CAPACITY};
