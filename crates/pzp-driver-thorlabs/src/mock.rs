//! In-memory Thorlabs SDKs.
//!
//! Stand-ins for APT, TLPM and the TSI camera SDK that keep device state in
//! memory and record the calls made to them. Selected with
//! `simulate = true` in a Piece's settings, and used by the tests to check
//! call ordering.

use crate::apt::{AptLibrary, AptMotor};
use crate::camera::{TlcCamera, TlcSdk};
use crate::powermeter::{TlpmLibrary, TlpmSession};
use ndarray::Array2;
use parking_lot::Mutex;
use pzp_core::{PieceError, PieceResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

/// A recorded `PZMOT_*` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PiezoCall {
    /// `InitHWDevice(serial)`
    Init(i64),
    /// `PZMOT_SetChannel(serial, channel)`
    SetChannel(i64, i64),
    /// `PZMOT_MoveAbsoluteStepsEx(serial, steps)`
    Move(i64, i64),
    /// `PZMOT_GetPositionSteps(serial)`
    GetPosition(i64),
}

/// Simulated APT motor.
#[derive(Debug, Default)]
pub struct MockMotor {
    position: Mutex<f64>,
    moves: Mutex<Vec<f64>>,
    identified: AtomicUsize,
}

impl MockMotor {
    /// Targets of every `move_to`.
    pub fn moves(&self) -> Vec<f64> {
        self.moves.lock().clone()
    }

    /// Number of `identify` calls.
    pub fn identified(&self) -> usize {
        self.identified.load(Ordering::SeqCst)
    }
}

impl AptMotor for MockMotor {
    fn move_to(&self, position: f64, _blocking: bool) -> PieceResult<()> {
        self.moves.lock().push(position);
        *self.position.lock() = position;
        Ok(())
    }

    fn position(&self) -> PieceResult<f64> {
        Ok(*self.position.lock())
    }

    fn move_home(&self, _blocking: bool) -> PieceResult<()> {
        *self.position.lock() = 0.0;
        Ok(())
    }

    fn identify(&self) -> PieceResult<()> {
        self.identified.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Simulated APT library with two stages and a piezo controller.
#[derive(Debug, Default)]
pub struct MockApt {
    motors: Mutex<HashMap<i64, Arc<MockMotor>>>,
    channel: Mutex<HashMap<i64, i64>>,
    steps: Mutex<HashMap<(i64, i64), i64>>,
    piezo_calls: Mutex<Vec<PiezoCall>>,
    piezo_error: AtomicI32,
    cleanups: AtomicUsize,
}

impl MockApt {
    /// Library with no devices opened yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Motor opened for `serial`, if any.
    pub fn motor(&self, serial: i64) -> Option<Arc<MockMotor>> {
        self.motors.lock().get(&serial).cloned()
    }

    /// Recorded piezo calls.
    pub fn piezo_calls(&self) -> Vec<PiezoCall> {
        self.piezo_calls.lock().clone()
    }

    /// Make every piezo call from now on fail with `code`.
    pub fn fail_piezo_with(&self, code: i32) {
        self.piezo_error.store(code, Ordering::SeqCst);
    }

    /// Number of `cleanup` calls.
    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    fn record(&self, call: PiezoCall) -> i32 {
        self.piezo_calls.lock().push(call);
        self.piezo_error.load(Ordering::SeqCst)
    }
}

impl AptLibrary for MockApt {
    fn list_available_devices(&self) -> PieceResult<Vec<(u32, i64)>> {
        Ok(vec![(31, 83000001), (31, 83000002)])
    }

    fn open_motor(&self, serial: i64) -> PieceResult<Arc<dyn AptMotor>> {
        let motor = self.motors.lock().entry(serial).or_default().clone();
        Ok(motor)
    }

    fn init_hw_device(&self, serial: i64) -> i32 {
        self.record(PiezoCall::Init(serial))
    }

    fn pz_set_channel(&self, serial: i64, channel: i64) -> i32 {
        let code = self.record(PiezoCall::SetChannel(serial, channel));
        if code == 0 {
            self.channel.lock().insert(serial, channel);
        }
        code
    }

    fn pz_move_absolute_steps(&self, serial: i64, steps: i64, _wait: bool) -> i32 {
        let code = self.record(PiezoCall::Move(serial, steps));
        if code == 0 {
            let channel = self.channel.lock().get(&serial).copied().unwrap_or(0);
            self.steps.lock().insert((serial, channel), steps);
        }
        code
    }

    fn pz_get_position_steps(&self, serial: i64) -> Result<i64, i32> {
        let code = self.record(PiezoCall::GetPosition(serial));
        if code != 0 {
            return Err(code);
        }
        let channel = self.channel.lock().get(&serial).copied().unwrap_or(0);
        Ok(self.steps.lock().get(&(serial, channel)).copied().unwrap_or(0))
    }

    fn error_text(&self, code: i32) -> String {
        format!("APT error {code}")
    }

    fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        self.motors.lock().clear();
    }
}

/// Simulated powermeter session reading a constant 1.5 mW.
#[derive(Debug)]
pub struct MockTlpmSession {
    wavelength: Mutex<f64>,
    avg_time: Mutex<f64>,
    zeroed: AtomicUsize,
    closed: AtomicUsize,
}

impl MockTlpmSession {
    /// Number of `zero` calls.
    pub fn zeroed(&self) -> usize {
        self.zeroed.load(Ordering::SeqCst)
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) > 0
    }
}

impl TlpmSession for MockTlpmSession {
    fn set_wavelength(&self, nm: f64) -> PieceResult<()> {
        // the meter silently clamps to its sensor's range
        *self.wavelength.lock() = nm.clamp(400.0, 1100.0);
        Ok(())
    }

    fn wavelength(&self) -> PieceResult<f64> {
        Ok(*self.wavelength.lock())
    }

    fn set_avg_time(&self, seconds: f64) -> PieceResult<()> {
        *self.avg_time.lock() = seconds;
        Ok(())
    }

    fn avg_time(&self) -> PieceResult<f64> {
        Ok(*self.avg_time.lock())
    }

    fn power(&self) -> PieceResult<f64> {
        Ok(1.5e-3)
    }

    fn zero(&self) -> PieceResult<()> {
        self.zeroed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Simulated TLPM library with one powermeter.
#[derive(Debug, Default)]
pub struct MockTlpm {
    open_error: Option<i32>,
    session: Mutex<Option<Arc<MockTlpmSession>>>,
}

impl MockTlpm {
    /// Library whose meter opens.
    pub fn new() -> Self {
        Self::default()
    }

    /// Library whose `open` fails with `code`.
    pub fn failing(code: i32) -> Self {
        Self {
            open_error: Some(code),
            ..Self::default()
        }
    }

    /// Most recently opened session.
    pub fn session(&self) -> Option<Arc<MockTlpmSession>> {
        self.session.lock().clone()
    }
}

impl TlpmLibrary for MockTlpm {
    fn resource_names(&self) -> PieceResult<Vec<String>> {
        Ok(vec!["USB0::0x1313::0x8078::P0012345::INSTR".into()])
    }

    fn open(&self, _resource: &str) -> Result<Arc<dyn TlpmSession>, i32> {
        if let Some(code) = self.open_error {
            return Err(code);
        }
        let session = Arc::new(MockTlpmSession {
            wavelength: Mutex::new(633.0),
            avg_time: Mutex::new(0.01),
            zeroed: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        });
        *self.session.lock() = Some(session.clone());
        Ok(session)
    }
}

/// A recorded camera call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraCall {
    /// `arm(frames_to_buffer)`
    Arm(u32),
    /// `disarm()`
    Disarm,
    /// `issue_software_trigger()`
    Trigger,
    /// `set_roi(roi)`
    SetRoi([i64; 4]),
    /// `set_frames_per_trigger_zero_for_unlimited(frames)`
    FramesPerTrigger(u32),
}

/// Simulated camera producing a ramp image the size of its ROI.
#[derive(Debug)]
pub struct MockTlcCamera {
    exposure_us: Mutex<i64>,
    gain: Mutex<i64>,
    black: Mutex<i64>,
    roi: Mutex<[i64; 4]>,
    armed: Mutex<bool>,
    pending: AtomicUsize,
    calls: Mutex<Vec<CameraCall>>,
    disposed: AtomicUsize,
}

impl MockTlcCamera {
    fn new() -> Self {
        Self {
            exposure_us: Mutex::new(25_000),
            gain: Mutex::new(0),
            black: Mutex::new(0),
            roi: Mutex::new([0, 0, 7, 5]),
            armed: Mutex::new(false),
            pending: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            disposed: AtomicUsize::new(0),
        }
    }

    /// Recorded calls.
    pub fn calls(&self) -> Vec<CameraCall> {
        self.calls.lock().clone()
    }

    /// Whether the camera has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst) > 0
    }

    fn record(&self, call: CameraCall) {
        self.calls.lock().push(call);
    }
}

impl TlcCamera for MockTlcCamera {
    fn set_image_poll_timeout_ms(&self, _ms: u32) -> PieceResult<()> {
        Ok(())
    }

    fn set_frames_per_trigger_zero_for_unlimited(&self, frames: u32) -> PieceResult<()> {
        self.record(CameraCall::FramesPerTrigger(frames));
        Ok(())
    }

    fn arm(&self, frames_to_buffer: u32) -> PieceResult<()> {
        self.record(CameraCall::Arm(frames_to_buffer));
        *self.armed.lock() = true;
        Ok(())
    }

    fn disarm(&self) -> PieceResult<()> {
        self.record(CameraCall::Disarm);
        *self.armed.lock() = false;
        Ok(())
    }

    fn exposure_time_us(&self) -> PieceResult<i64> {
        Ok(*self.exposure_us.lock())
    }

    fn set_exposure_time_us(&self, us: i64) -> PieceResult<()> {
        *self.exposure_us.lock() = us;
        Ok(())
    }

    fn gain(&self) -> PieceResult<i64> {
        Ok(*self.gain.lock())
    }

    fn set_gain(&self, gain: i64) -> PieceResult<()> {
        *self.gain.lock() = gain;
        Ok(())
    }

    fn black_level(&self) -> PieceResult<i64> {
        Ok(*self.black.lock())
    }

    fn set_black_level(&self, level: i64) -> PieceResult<()> {
        *self.black.lock() = level;
        Ok(())
    }

    fn roi(&self) -> PieceResult<[i64; 4]> {
        Ok(*self.roi.lock())
    }

    fn set_roi(&self, roi: [i64; 4]) -> PieceResult<()> {
        if *self.armed.lock() {
            return Err(PieceError::hardware("ROI cannot change while armed"));
        }
        self.record(CameraCall::SetRoi(roi));
        *self.roi.lock() = roi;
        Ok(())
    }

    fn roi_max(&self) -> PieceResult<(i64, i64)> {
        Ok((1439, 1079))
    }

    fn issue_software_trigger(&self) -> PieceResult<()> {
        self.record(CameraCall::Trigger);
        self.pending.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_pending_frame_or_null(&self) -> PieceResult<Option<Array2<u16>>> {
        if !*self.armed.lock() {
            return Ok(None);
        }
        let taken = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if taken.is_err() {
            return Ok(None);
        }
        let [x1, y1, x2, y2] = *self.roi.lock();
        let rows = usize::try_from(y2 - y1 + 1).unwrap_or(0);
        let cols = usize::try_from(x2 - x1 + 1).unwrap_or(0);
        // each pixel holds its column index, so mirroring is visible
        Ok(Some(Array2::from_shape_fn((rows, cols), |(_, c)| c as u16)))
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Simulated TSI SDK with one camera.
#[derive(Debug, Default)]
pub struct MockTlcSdk {
    cameras: Mutex<Vec<Arc<MockTlcCamera>>>,
    disposed: AtomicUsize,
}

impl MockTlcSdk {
    /// SDK with nothing opened.
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently opened camera.
    pub fn camera(&self) -> Option<Arc<MockTlcCamera>> {
        self.cameras.lock().last().cloned()
    }

    /// Whether the SDK has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst) > 0
    }
}

impl TlcSdk for MockTlcSdk {
    fn discover_available_cameras(&self) -> PieceResult<Vec<String>> {
        Ok(vec!["08153".into()])
    }

    fn open_camera(&self, serial: &str) -> PieceResult<Arc<dyn TlcCamera>> {
        if serial != "08153" {
            return Err(PieceError::hardware(format!("No camera with serial {serial}")));
        }
        let camera = Arc::new(MockTlcCamera::new());
        self.cameras.lock().push(camera.clone());
        Ok(camera)
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}
