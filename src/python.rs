//! Python bindings for the control surface

use pyo3::prelude::*;

use crate::audio::device::DeviceInfo;
use crate::control::{ControlSurface, DeviceList, EngineStatus};
use crate::dsp::metrics::MetricsSnapshot;

/// Python-exposed engine handle
#[pyclass(name = "NoiseEngine", unsendable)]
struct PyNoiseEngine {
    surface: ControlSurface,
}

#[pymethods]
impl PyNoiseEngine {
    #[new]
    fn new() -> Self {
        Self {
            surface: ControlSurface::new(),
        }
    }

    /// List capture and playback devices.
    fn get_devices(&self) -> DeviceList {
        self.surface.get_devices()
    }

    /// Start the engine. Returns an empty string on success, else the
    /// error message.
    #[pyo3(signature = (input_index=-1, output_index=-1))]
    fn start(&mut self, input_index: i32, output_index: i32) -> String {
        self.surface.start(input_index, output_index)
    }

    /// Stop the engine.
    fn stop(&mut self) -> bool {
        self.surface.stop()
    }

    fn is_running(&self) -> bool {
        self.surface.get_status().running
    }

    fn set_level(&self, level: f32) -> bool {
        self.surface.set_level(level)
    }

    fn get_level(&self) -> f32 {
        self.surface.level()
    }

    fn set_vad_threshold(&self, threshold: f32) -> bool {
        self.surface.set_vad_threshold(threshold)
    }

    fn get_vad_threshold(&self) -> f32 {
        self.surface.vad_threshold()
    }

    fn set_comfort_noise(&self, enabled: bool) -> bool {
        self.surface.set_comfort_noise(enabled)
    }

    fn get_status(&self) -> EngineStatus {
        self.surface.get_status()
    }

    fn get_metrics(&self) -> MetricsSnapshot {
        self.surface.get_metrics()
    }
}

/// Python module initialization
#[pymodule]
fn quietmic_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyNoiseEngine>()?;
    m.add_class::<DeviceInfo>()?;
    m.add_class::<DeviceList>()?;
    m.add_class::<EngineStatus>()?;
    m.add_class::<MetricsSnapshot>()?;
    Ok(())
}
