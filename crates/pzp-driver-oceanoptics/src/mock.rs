//! In-memory SeaBreeze.

use crate::spectrometer::{SeaBreeze, SeaBreezeDevice};
use parking_lot::Mutex;
use pzp_core::{PieceError, PieceResult};
use std::sync::Arc;

/// Pixels of a simulated spectrum.
pub const PIXELS: usize = 16;

/// Simulated spectrometer. Its spectrum peaks at pixel [`PIXELS`]` / 2`.
#[derive(Debug)]
pub struct MockDevice {
    serial: String,
    closed: Mutex<bool>,
}

impl MockDevice {
    /// Serial number it was opened with.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

impl SeaBreezeDevice for MockDevice {
    fn spectrum(&self) -> PieceResult<(Vec<f64>, Vec<f64>)> {
        if self.is_closed() {
            return Err(PieceError::hardware("device closed"));
        }
        let wls = (0..PIXELS).map(|i| 400.0 + 25.0 * i as f64).collect();
        let peak = (PIXELS / 2) as f64;
        let values = (0..PIXELS)
            .map(|i| 1000.0 / (1.0 + (i as f64 - peak).powi(2)))
            .collect();
        Ok((wls, values))
    }

    fn close(&self) -> PieceResult<()> {
        *self.closed.lock() = true;
        Ok(())
    }
}

/// Simulated library with a fixed set of attached spectrometers.
#[derive(Debug)]
pub struct MockSeaBreeze {
    devices: Vec<(String, String)>,
    opened: Mutex<Vec<Arc<MockDevice>>>,
}

impl MockSeaBreeze {
    /// Library with `(model, serial)` spectrometers attached.
    pub fn new<'a>(devices: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            devices: devices
                .into_iter()
                .map(|(model, serial)| (model.to_string(), serial.to_string()))
                .collect(),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Devices opened so far.
    pub fn opened(&self) -> Vec<Arc<MockDevice>> {
        self.opened.lock().clone()
    }
}

impl Default for MockSeaBreeze {
    fn default() -> Self {
        Self::new([("USB2000PLUS", "FLMS12345")])
    }
}

impl SeaBreeze for MockSeaBreeze {
    fn list_devices(&self) -> PieceResult<Vec<String>> {
        Ok(self
            .devices
            .iter()
            .map(|(model, serial)| format!("<SeaBreezeDevice {model}:{serial}>"))
            .collect())
    }

    fn open(&self, serial: &str) -> PieceResult<Arc<dyn SeaBreezeDevice>> {
        if !self.devices.iter().any(|(_, s)| s == serial) {
            return Err(PieceError::hardware(format!(
                "No unopened device found with serial number {serial}"
            )));
        }
        let device = Arc::new(MockDevice {
            serial: serial.to_string(),
            closed: Mutex::new(false),
        });
        self.opened.lock().push(device.clone());
        Ok(device)
    }
}
