//! In-memory LightField.
//!
//! The experiment keeps its settings in a map, reports itself running for a
//! configurable number of polls after `stop` or `acquire`, and is only ready
//! to run when the selected background reference file exists on disk.

use crate::lightfield::{Automation, Experiment, Frame, Setting, SettingValue, SpeFile};
use ndarray::{Array1, Array2};
use parking_lot::Mutex;
use pzp_core::PieceResult;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Calibrated sensor columns.
pub const COLUMNS: usize = 200;

/// Width of a captured frame; the sensor is read out with binning 2.
pub const FRAME_WIDTH: usize = 100;

/// Rows of a captured frame.
pub const FRAME_ROWS: usize = 4;

/// A recorded experiment call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExperimentCall {
    /// `Stop()`
    Stop,
    /// `SetValue(setting, value)`
    Set(Setting, SettingValue),
    /// `GetValue(setting)`
    Get(Setting),
    /// `Capture(1)`
    Capture,
    /// `Acquire()`
    Acquire,
}

/// Simulated experiment.
#[derive(Debug)]
pub struct MockExperiment {
    output_dir: PathBuf,
    settings: Mutex<HashMap<Setting, SettingValue>>,
    calls: Mutex<Vec<ExperimentCall>>,
    running_polls: AtomicUsize,
    polls_after_stop: AtomicUsize,
    files: Mutex<Vec<PathBuf>>,
}

impl MockExperiment {
    fn new(output_dir: PathBuf) -> Self {
        let settings = HashMap::from([
            (Setting::ExposureTime, SettingValue::Float(300.0)),
            (Setting::GratingCenterWavelength, SettingValue::Float(875.0)),
            (Setting::RoiSelection, SettingValue::Int(1)),
        ]);
        Self {
            output_dir,
            settings: Mutex::new(settings),
            calls: Mutex::new(Vec::new()),
            running_polls: AtomicUsize::new(0),
            polls_after_stop: AtomicUsize::new(0),
            files: Mutex::new(Vec::new()),
        }
    }

    /// Recorded calls.
    pub fn calls(&self) -> Vec<ExperimentCall> {
        self.calls.lock().clone()
    }

    /// Report running for `polls` polls after every `stop`.
    pub fn run_after_stop(&self, polls: usize) {
        self.polls_after_stop.store(polls, Ordering::SeqCst);
    }

    /// Polls still to report running.
    pub fn pending_polls(&self) -> usize {
        self.running_polls.load(Ordering::SeqCst)
    }

    fn record(&self, call: ExperimentCall) {
        self.calls.lock().push(call);
    }
}

impl Experiment for MockExperiment {
    fn stop(&self) -> PieceResult<()> {
        self.record(ExperimentCall::Stop);
        self.running_polls
            .store(self.polls_after_stop.load(Ordering::SeqCst), Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> PieceResult<bool> {
        let left = self
            .running_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        Ok(left.is_ok())
    }

    fn is_ready_to_run(&self) -> PieceResult<bool> {
        match self.settings.lock().get(&Setting::BackgroundReferenceFile) {
            Some(SettingValue::Text(path)) => Ok(Path::new(path).exists()),
            _ => Ok(true),
        }
    }

    fn set_value(&self, setting: Setting, value: SettingValue) -> PieceResult<()> {
        self.record(ExperimentCall::Set(setting, value.clone()));
        self.settings.lock().insert(setting, value);
        Ok(())
    }

    fn get_value(&self, setting: Setting) -> PieceResult<SettingValue> {
        self.record(ExperimentCall::Get(setting));
        Ok(self
            .settings
            .lock()
            .get(&setting)
            .cloned()
            .unwrap_or(SettingValue::Int(0)))
    }

    fn column_calibration(&self) -> PieceResult<Vec<f64>> {
        Ok((0..COLUMNS).map(|i| 500.0 + i as f64 * 0.5).collect())
    }

    fn capture(&self) -> PieceResult<Frame> {
        self.record(ExperimentCall::Capture);
        Ok(Frame {
            data: (0..FRAME_ROWS * FRAME_WIDTH).map(|i| i as f64).collect(),
            width: FRAME_WIDTH,
        })
    }

    fn acquire(&self) -> PieceResult<()> {
        self.record(ExperimentCall::Acquire);
        let base = match self.settings.lock().get(&Setting::BaseFileName) {
            Some(SettingValue::Text(name)) => name.clone(),
            _ => "LightField".into(),
        };
        let path = self.output_dir.join(format!("{base}.spe"));
        self.files.lock().insert(0, path);
        self.running_polls.store(2, Ordering::SeqCst);
        Ok(())
    }

    fn recently_acquired_files(&self) -> PieceResult<Vec<PathBuf>> {
        Ok(self.files.lock().clone())
    }
}

/// Simulated LightField application.
#[derive(Debug)]
pub struct MockLightField {
    experiment: Arc<MockExperiment>,
    window_open: AtomicBool,
    loaded: Mutex<Vec<PathBuf>>,
}

impl MockLightField {
    /// Application saving acquisitions under `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            experiment: Arc::new(MockExperiment::new(output_dir.into())),
            window_open: AtomicBool::new(false),
            loaded: Mutex::new(Vec::new()),
        }
    }

    /// The experiment handed out by `launch`.
    pub fn experiment(&self) -> Arc<MockExperiment> {
        self.experiment.clone()
    }

    /// SPE files read so far.
    pub fn loaded(&self) -> Vec<PathBuf> {
        self.loaded.lock().clone()
    }
}

impl Automation for MockLightField {
    fn launch(&self) -> PieceResult<Arc<dyn Experiment>> {
        self.window_open.store(true, Ordering::SeqCst);
        Ok(self.experiment.clone())
    }

    fn window_open(&self) -> bool {
        self.window_open.load(Ordering::SeqCst)
    }

    fn load_spe(&self, path: &Path) -> PieceResult<SpeFile> {
        self.loaded.lock().push(path.to_path_buf());
        Ok(SpeFile {
            wavelength: Array1::range(0.0, 10.0, 1.0),
            data: Array2::from_elem((1, 10), 7.0),
        })
    }
}
