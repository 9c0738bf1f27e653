//! In-memory HEDS SDK.

use crate::slm::{HedsSdk, HedsSlm, NO_ERROR};
use ndarray::Array2;
use parking_lot::Mutex;
use pzp_core::PieceResult;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// A recorded SDK or SLM call.
#[derive(Debug, Clone, PartialEq)]
pub enum SlmCall {
    /// `SDK.Init(major, minor)`
    Init(u32, u32),
    /// `SLM.Init`
    Open,
    /// `loadPhaseData` with the data's shape
    LoadPhase(usize, usize),
    /// `show(handle)`
    Show(u32),
    /// `setWavelength(nm)`
    SetWavelength(f64),
    /// `loadWavefrontCompensationFile(path)`
    LoadCompensation(PathBuf),
    /// `clearWavefrontCompensation()`
    ClearCompensation,
    /// `SDK.Close`
    Close,
}

#[derive(Debug, Default)]
struct Shared {
    calls: Mutex<Vec<SlmCall>>,
    show_error: AtomicI32,
}

impl Shared {
    fn record(&self, call: SlmCall) {
        self.calls.lock().push(call);
    }
}

/// Simulated SLM.
#[derive(Debug)]
pub struct MockSlm {
    shared: Arc<Shared>,
    wavelength: Mutex<f64>,
    handles: Mutex<u32>,
}

impl HedsSlm for MockSlm {
    fn error_code(&self) -> i32 {
        NO_ERROR
    }

    fn load_phase_data(&self, phase: &Array2<f64>) -> Result<u32, i32> {
        let (rows, cols) = phase.dim();
        self.shared.record(SlmCall::LoadPhase(rows, cols));
        let mut handles = self.handles.lock();
        *handles += 1;
        Ok(*handles)
    }

    fn show(&self, handle: u32) -> i32 {
        self.shared.record(SlmCall::Show(handle));
        self.shared.show_error.load(Ordering::SeqCst)
    }

    fn set_wavelength(&self, nm: f64) -> i32 {
        self.shared.record(SlmCall::SetWavelength(nm));
        *self.wavelength.lock() = nm;
        NO_ERROR
    }

    fn wavelength(&self) -> Result<f64, i32> {
        Ok(*self.wavelength.lock())
    }

    fn load_wavefront_compensation(&self, path: &Path) -> i32 {
        self.shared.record(SlmCall::LoadCompensation(path.to_path_buf()));
        NO_ERROR
    }

    fn clear_wavefront_compensation(&self) -> i32 {
        self.shared.record(SlmCall::ClearCompensation);
        NO_ERROR
    }
}

/// Simulated SDK with one SLM attached.
#[derive(Debug, Default)]
pub struct MockHeds {
    shared: Arc<Shared>,
}

impl MockHeds {
    /// SDK with nothing opened.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded calls.
    pub fn calls(&self) -> Vec<SlmCall> {
        self.shared.calls.lock().clone()
    }

    /// Make `show` fail with `code` from now on.
    pub fn fail_show_with(&self, code: i32) {
        self.shared.show_error.store(code, Ordering::SeqCst);
    }
}

impl HedsSdk for MockHeds {
    fn init(&self, major: u32, minor: u32) -> i32 {
        self.shared.record(SlmCall::Init(major, minor));
        NO_ERROR
    }

    fn open_slm(&self) -> PieceResult<Arc<dyn HedsSlm>> {
        self.shared.record(SlmCall::Open);
        Ok(Arc::new(MockSlm {
            shared: self.shared.clone(),
            wavelength: Mutex::new(532.0),
            handles: Mutex::new(0),
        }))
    }

    fn close(&self) {
        self.shared.record(SlmCall::Close);
    }

    fn error_string(&self, code: i32) -> String {
        match code {
            NO_ERROR => "No error".into(),
            _ => format!("HEDS error {code}"),
        }
    }
}
