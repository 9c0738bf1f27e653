//! Thorlabs scientific cameras through the TSI camera SDK.
//!
//! The SDK is shared by every camera Piece in the puzzle under
//! [`GLOBAL_KEY`] and reference counted: each Piece registers as a user in
//! `setup`, and the last one out disposes of the SDK.
//!
//! Sequencing rules:
//! - `unlimited`, `roi` and `Reset ROI` disarm the camera first
//! - reading `image` arms it first
//! - a software trigger is issued before each frame unless the camera runs
//!   in unlimited mode and has already been triggered

use async_trait::async_trait;
use ndarray::{s, Array1, Array2};
use parking_lot::Mutex;
use pzp_core::action::arg;
use pzp_core::preview::{ImagePreview, LineoutPreview, PreviewSettings};
use pzp_core::sdk::{run_blocking, SdkLoader};
use pzp_core::{
    param, Action, ActionSet, Parameter, ParameterSet, Piece, PieceError, PieceResult,
    PuzzleContext,
};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Globals key of the loaded SDK.
pub const GLOBAL_KEY: &str = "tlc_sdk";

/// Milliseconds `get_pending_frame_or_null` waits for a frame.
pub const IMAGE_POLL_TIMEOUT_MS: u32 = 1000;

/// Debug frames are this many rows by [`DEBUG_COLS`] of noise.
pub const DEBUG_ROWS: usize = 1080;
/// See [`DEBUG_ROWS`].
pub const DEBUG_COLS: usize = 1440;

const DEBUG_ROI: [i64; 4] = [0, 0, 99, 79];

/// The TSI camera SDK.
pub trait TlcSdk: Send + Sync {
    /// Serial numbers of the cameras the SDK can see.
    fn discover_available_cameras(&self) -> PieceResult<Vec<String>>;

    /// Open a camera by serial number.
    fn open_camera(&self, serial: &str) -> PieceResult<Arc<dyn TlcCamera>>;

    /// Release the SDK.
    fn dispose(&self);
}

/// An open camera.
pub trait TlcCamera: Send + Sync {
    /// How long frame polling blocks.
    fn set_image_poll_timeout_ms(&self, ms: u32) -> PieceResult<()>;

    /// Frames per trigger, 0 meaning continuous.
    fn set_frames_per_trigger_zero_for_unlimited(&self, frames: u32) -> PieceResult<()>;

    /// Arm with a frame buffer of the given depth.
    fn arm(&self, frames_to_buffer: u32) -> PieceResult<()>;

    /// Disarm.
    fn disarm(&self) -> PieceResult<()>;

    /// Exposure in µs.
    fn exposure_time_us(&self) -> PieceResult<i64>;

    /// Set the exposure in µs.
    fn set_exposure_time_us(&self, us: i64) -> PieceResult<()>;

    /// Gain.
    fn gain(&self) -> PieceResult<i64>;

    /// Set the gain.
    fn set_gain(&self, gain: i64) -> PieceResult<()>;

    /// Black level.
    fn black_level(&self) -> PieceResult<i64>;

    /// Set the black level.
    fn set_black_level(&self, level: i64) -> PieceResult<()>;

    /// ROI as `[x1, y1, x2, y2]`, inclusive.
    fn roi(&self) -> PieceResult<[i64; 4]>;

    /// Set the ROI. Only allowed while disarmed.
    fn set_roi(&self, roi: [i64; 4]) -> PieceResult<()>;

    /// Largest `(x2, y2)` the sensor allows.
    fn roi_max(&self) -> PieceResult<(i64, i64)>;

    /// Software trigger.
    fn issue_software_trigger(&self) -> PieceResult<()>;

    /// Next frame, or `None` when the poll timeout expires.
    fn get_pending_frame_or_null(&self) -> PieceResult<Option<Array2<u16>>>;

    /// Close the camera.
    fn dispose(&self);
}

/// Shared SDK handle.
pub type SharedTlc = Arc<dyn TlcSdk>;

/// Which preview the Piece carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraVariant {
    /// Controls only.
    Base,
    /// Image preview with an `autolevel` checkbox.
    #[default]
    Preview,
    /// Image preview with lineouts.
    Lineout,
}

#[derive(Default)]
struct State {
    camera: Option<Arc<dyn TlcCamera>>,
    triggered: bool,
}

/// Everything the callbacks need. Cloning shares the camera.
#[derive(Clone)]
struct Parts {
    ctx: PuzzleContext,
    state: Arc<Mutex<State>>,
    serial: Parameter<String>,
    connected: Parameter<bool>,
    unlimited: Parameter<bool>,
    armed: Parameter<bool>,
    exposure: Parameter<f64>,
    gain: Parameter<i64>,
    black: Parameter<i64>,
    roi: Parameter<Array1<i64>>,
    image: Parameter<Array2<f64>>,
    counts: Parameter<f64>,
    max_counts: Parameter<f64>,
    sub_background: Parameter<bool>,
    background: Parameter<Array2<f64>>,
    frame_buffer: Parameter<i64>,
}

fn check_roi(roi: &Array1<i64>, _: &pzp_core::observable::ObservableMetadata) -> PieceResult<()> {
    if roi.len() == 4 {
        Ok(())
    } else {
        Err(PieceError::validation("roi", "expected [x1, y1, x2, y2]"))
    }
}

fn debug_frame() -> Array2<f64> {
    let mut rng = rand::thread_rng();
    Array2::from_shape_fn((DEBUG_ROWS, DEBUG_COLS), |_| rng.gen::<f64>() * 1024.0)
}

impl Parts {
    fn new(ctx: PuzzleContext) -> Self {
        Self {
            ctx,
            state: Arc::new(Mutex::new(State::default())),
            serial: param::dropdown("serial", ""),
            connected: param::connected(),
            unlimited: param::checkbox("unlimited", false).hidden(),
            armed: param::checkbox("armed", false).hidden(),
            exposure: param::spinbox("exposure", 25.0).with_unit("ms"),
            gain: param::spinbox("gain", 0i64),
            black: param::spinbox("black", 0i64).hidden(),
            roi: param::array("roi", Array1::from(DEBUG_ROI.to_vec())).with_validator(check_roi),
            image: param::array("image", Array2::zeros((0, 0))),
            counts: param::readout("counts", 0.0),
            max_counts: param::readout("max_counts", 0.0),
            sub_background: param::checkbox("sub_background", false).hidden(),
            background: param::array("background", Array2::zeros((0, 0))),
            frame_buffer: param::spinbox("frame_buffer", 2i64).with_min(1).hidden(),
        }
    }

    fn debug(&self) -> bool {
        self.ctx.debug()
    }

    fn sdk(&self) -> PieceResult<SharedTlc> {
        self.ctx
            .globals()
            .get::<SharedTlc>(GLOBAL_KEY)
            .ok_or_else(|| PieceError::BackendMissing("Thorlabs camera SDK".into()))
    }

    fn ensure_connected(&self) -> PieceResult<()> {
        if self.debug() || self.connected.value() {
            return Ok(());
        }
        Err(PieceError::not_connected("Camera not connected"))
    }

    async fn ensure_armed(&self) -> PieceResult<()> {
        if !self.armed.value() {
            self.armed.set(true).await?;
        }
        Ok(())
    }

    async fn ensure_disarmed(&self) -> PieceResult<()> {
        if self.armed.value() {
            self.armed.set(false).await?;
        }
        Ok(())
    }

    fn camera(&self) -> PieceResult<Arc<dyn TlcCamera>> {
        self.state
            .lock()
            .camera
            .clone()
            .ok_or_else(|| PieceError::not_connected("Camera not connected"))
    }

    fn dispose(&self) {
        let camera = self.state.lock().camera.take();
        if let Some(camera) = camera {
            camera.dispose();
            self.armed.inner().replace(false);
            tracing::info!(serial = %self.serial.value(), "camera disposed");
        }
    }

    async fn set_connected(&self, value: bool) -> PieceResult<Option<bool>> {
        if self.debug() {
            return Ok(Some(value));
        }
        let current = self.connected.value();
        if value && !current {
            let sdk = self.sdk()?;
            let serial = self.serial.get_value().await?;
            let camera = run_blocking(move || sdk.open_camera(&serial)).await?;
            self.state.lock().camera = Some(camera.clone());
            let frames = if self.unlimited.value() { 0 } else { 1 };
            let configured = camera
                .set_image_poll_timeout_ms(IMAGE_POLL_TIMEOUT_MS)
                .and_then(|_| camera.set_frames_per_trigger_zero_for_unlimited(frames));
            if let Err(e) = configured {
                self.dispose();
                return Err(e);
            }
            tracing::info!(serial = %self.serial.value(), "camera opened");
        } else if !value && current {
            self.dispose();
        }
        Ok(Some(value))
    }

    async fn set_unlimited(&self, value: bool) -> PieceResult<Option<bool>> {
        self.ensure_connected()?;
        self.ensure_disarmed().await?;
        if self.debug() {
            return Ok(Some(value));
        }
        self.camera()?
            .set_frames_per_trigger_zero_for_unlimited(if value { 0 } else { 1 })?;
        Ok(Some(value))
    }

    async fn set_armed(&self, value: bool) -> PieceResult<Option<bool>> {
        self.ensure_connected()?;
        if self.debug() {
            return Ok(Some(true));
        }
        let current = self.armed.value();
        if value && !current {
            let frames = u32::try_from(self.frame_buffer.value())
                .map_err(|_| PieceError::validation("frame_buffer", "must fit in u32"))?;
            self.camera()?.arm(frames)?;
        } else if !value && current {
            self.camera()?.disarm()?;
        } else {
            return Ok(Some(current));
        }
        self.state.lock().triggered = false;
        Ok(Some(value))
    }

    fn trigger(&self) -> PieceResult<()> {
        self.state.lock().triggered = true;
        if !self.debug() {
            self.camera()?.issue_software_trigger()?;
        }
        Ok(())
    }

    async fn grab(&self) -> PieceResult<Array2<f64>> {
        self.ensure_connected()?;
        self.ensure_armed().await?;
        let mut image = if self.debug() {
            debug_frame()
        } else {
            let triggered = self.state.lock().triggered;
            if !self.unlimited.value() || !triggered {
                self.trigger()?;
            }
            let camera = self.camera()?;
            let frame = run_blocking(move || camera.get_pending_frame_or_null())
                .await?
                .ok_or_else(|| {
                    PieceError::hardware("Acquisition did not complete within the timeout...")
                })?;
            frame.slice(s![.., ..;-1]).mapv(f64::from)
        };
        if self.sub_background.get_value().await? {
            let background = self.background.get_value().await?;
            if background.dim() != image.dim() {
                return Err(PieceError::Precondition(format!(
                    "Background is {:?} but the image is {:?}, take a new background",
                    background.dim(),
                    image.dim()
                )));
            }
            image -= &background;
        }
        Ok(image)
    }

    async fn roi_from_camera(&self) -> PieceResult<Array1<i64>> {
        self.ensure_connected()?;
        if self.debug() {
            return Ok(Array1::from(DEBUG_ROI.to_vec()));
        }
        Ok(Array1::from(self.camera()?.roi()?.to_vec()))
    }

    async fn roi_to_camera(&self, roi: Array1<i64>) -> PieceResult<Option<Array1<i64>>> {
        self.ensure_connected()?;
        self.ensure_disarmed().await?;
        if self.debug() {
            return Ok(Some(roi));
        }
        let roi = [roi[0], roi[1], roi[2], roi[3]];
        self.camera()?.set_roi(roi)?;
        Ok(None)
    }

    fn wire(&self) {
        let p = self.clone();
        self.serial.set_options_loader(move || {
            let p = p.clone();
            async move {
                if p.debug() {
                    return Ok(Vec::new());
                }
                let sdk = p.sdk()?;
                run_blocking(move || sdk.discover_available_cameras()).await
            }
        });

        let p = self.clone();
        self.connected.set_setter(move |v| {
            let p = p.clone();
            async move { p.set_connected(v).await }
        });
        let p = self.clone();
        self.unlimited.set_setter(move |v| {
            let p = p.clone();
            async move { p.set_unlimited(v).await }
        });
        let p = self.clone();
        self.armed.set_setter(move |v| {
            let p = p.clone();
            async move { p.set_armed(v).await }
        });

        let p = self.clone();
        self.exposure.set_setter(move |v: f64| {
            let p = p.clone();
            async move {
                p.ensure_connected()?;
                if p.debug() {
                    return Ok(Some(v));
                }
                p.camera()?.set_exposure_time_us((v * 1000.0) as i64)?;
                Ok(None)
            }
        });
        let p = self.clone();
        self.exposure.set_getter(move || {
            let p = p.clone();
            async move {
                p.ensure_connected()?;
                if p.debug() {
                    return Ok(p.exposure.value());
                }
                Ok(p.camera()?.exposure_time_us()? as f64 / 1000.0)
            }
        });

        let p = self.clone();
        self.gain.set_setter(move |v: i64| {
            let p = p.clone();
            async move {
                p.ensure_connected()?;
                if p.debug() {
                    return Ok(Some(v));
                }
                p.camera()?.set_gain(v)?;
                Ok(None)
            }
        });
        let p = self.clone();
        self.gain.set_getter(move || {
            let p = p.clone();
            async move {
                p.ensure_connected()?;
                if p.debug() {
                    return Ok(p.gain.value());
                }
                p.camera()?.gain()
            }
        });

        let p = self.clone();
        self.black.set_setter(move |v: i64| {
            let p = p.clone();
            async move {
                p.ensure_connected()?;
                if p.debug() {
                    return Ok(Some(v));
                }
                p.camera()?.set_black_level(v)?;
                Ok(None)
            }
        });
        let p = self.clone();
        self.black.set_getter(move || {
            let p = p.clone();
            async move {
                p.ensure_connected()?;
                if p.debug() {
                    return Ok(p.black.value());
                }
                p.camera()?.black_level()
            }
        });

        let p = self.clone();
        self.roi.set_getter(move || {
            let p = p.clone();
            async move { p.roi_from_camera().await }
        });
        let p = self.clone();
        self.roi.set_setter(move |v| {
            let p = p.clone();
            async move { p.roi_to_camera(v).await }
        });

        let p = self.clone();
        self.image.set_getter(move || {
            let p = p.clone();
            async move { p.grab().await }
        });

        let p = self.clone();
        self.counts.set_getter(move || {
            let p = p.clone();
            async move { Ok(p.image.get_value().await?.sum()) }
        });
        let p = self.clone();
        self.max_counts.set_getter(move || {
            let p = p.clone();
            async move {
                let image = p.image.get_value().await?;
                Ok(image.iter().copied().reduce(f64::max).unwrap_or(0.0))
            }
        });
    }

    async fn save_image(&self, path: PathBuf) -> PieceResult<()> {
        let mut frame = self.image.value();
        if frame.is_empty() {
            frame = self.image.get_value().await?;
        }
        run_blocking(move || write_png(&frame, &path)).await
    }

    async fn set_roi_clamped(
        &self,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        rows: usize,
        cols: usize,
    ) -> PieceResult<Array1<i64>> {
        let roi = clamp_roi(x, y, width, height, rows, cols);
        self.ensure_disarmed().await?;
        self.roi.set(Array1::from(roi.to_vec())).await
    }

    async fn reset_roi(&self) -> PieceResult<Array1<i64>> {
        self.ensure_connected()?;
        self.ensure_disarmed().await?;
        if self.debug() {
            return Ok(self.roi.value());
        }
        let (x2, y2) = self.camera()?.roi_max()?;
        self.roi.set(Array1::from(vec![0, 0, x2, y2])).await
    }
}

/// Write `image / 4` as an 8-bit greyscale PNG, clamping to 0..=255.
pub fn write_png(frame: &Array2<f64>, path: &std::path::Path) -> PieceResult<()> {
    let (rows, cols) = frame.dim();
    let pixels: Vec<u8> = frame
        .iter()
        .map(|v| (v / 4.0).floor().clamp(0.0, 255.0) as u8)
        .collect();
    let (width, height) = (
        u32::try_from(cols).map_err(|_| PieceError::validation("image", "too wide"))?,
        u32::try_from(rows).map_err(|_| PieceError::validation("image", "too tall"))?,
    );
    let png = image::GrayImage::from_raw(width, height, pixels)
        .ok_or_else(|| PieceError::validation("image", "buffer does not match its shape"))?;
    png.save(path)
        .map_err(|e| PieceError::Other(anyhow::anyhow!("Could not save {}: {e}", path.display())))
}

/// Round and clamp an ROI drawn over a `rows` × `cols` reference image.
///
/// `(x, y)` is the top-left corner and `(width, height)` the size; the result
/// is the inclusive `[x1, y1, x2, y2]` the camera expects.
pub fn clamp_roi(x: f64, y: f64, width: f64, height: f64, rows: usize, cols: usize) -> [i64; 4] {
    let (max_x, max_y) = (cols.saturating_sub(1) as i64, rows.saturating_sub(1) as i64);
    let x1 = (x.round() as i64).max(0);
    let y1 = (y.round() as i64).max(0);
    let x2 = ((x + width - 1.0).round() as i64).min(max_x);
    let y2 = ((y + height - 1.0).round() as i64).min(max_y);
    [x1, y1, x2, y2]
}

/// Thorlabs camera Piece.
pub struct Camera {
    parts: Parts,
    loader: SdkLoader<SharedTlc>,
    preview: Option<ImagePreview>,
    lineout: Option<LineoutPreview>,
    params: ParameterSet,
    actions: ActionSet,
}

impl Camera {
    /// Build the Piece.
    pub fn new(ctx: PuzzleContext, loader: SdkLoader<SharedTlc>, variant: CameraVariant) -> Self {
        let parts = Parts::new(ctx);
        parts.wire();

        let mut params = ParameterSet::new();
        params.register(parts.serial.clone());
        params.register(parts.connected.clone());
        params.register(parts.unlimited.clone());
        params.register(parts.armed.clone());
        params.register(parts.exposure.clone());
        params.register(parts.gain.clone());
        params.register(parts.black.clone());
        params.register(parts.roi.clone());
        params.register(parts.image.clone());
        params.register(parts.counts.clone());
        params.register(parts.max_counts.clone());
        params.register(parts.sub_background.clone());
        params.register(parts.background.clone());
        params.register(parts.frame_buffer.clone());

        let mut actions = ActionSet::new();
        register_actions(&parts, &mut actions);

        let settings = PreviewSettings {
            live_toggle: true,
            autolevel_toggle: true,
            max_counts: 1024.0,
        };
        let (preview, lineout) = match variant {
            CameraVariant::Base => (None, None),
            CameraVariant::Preview => {
                let preview = ImagePreview::new(settings);
                preview.register(&mut params);
                (Some(preview), None)
            }
            CameraVariant::Lineout => {
                let lineout = LineoutPreview::new(settings);
                lineout.register(&mut params, &mut actions, &parts.image);
                (None, Some(lineout))
            }
        };

        Self {
            parts,
            loader,
            preview,
            lineout,
            params,
            actions,
        }
    }

    /// Apply an ROI drawn over a reference image of `rows` × `cols`: round,
    /// clamp, disarm, then set.
    pub async fn set_roi_clamped(
        &self,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        rows: usize,
        cols: usize,
    ) -> PieceResult<Array1<i64>> {
        self.parts
            .set_roi_clamped(x, y, width, height, rows, cols)
            .await
    }

    /// Image preview state, when the Piece has one.
    pub fn preview(&self) -> Option<&ImagePreview> {
        self.preview
            .as_ref()
            .or_else(|| self.lineout.as_ref().map(LineoutPreview::preview))
    }

    /// Lineout state, for the lineout variant.
    pub fn lineout(&self) -> Option<&LineoutPreview> {
        self.lineout.as_ref()
    }

    /// `connected` checkbox.
    pub fn connected(&self) -> &Parameter<bool> {
        &self.parts.connected
    }

    /// `serial` dropdown.
    pub fn serial(&self) -> &Parameter<String> {
        &self.parts.serial
    }

    /// `armed` checkbox.
    pub fn armed(&self) -> &Parameter<bool> {
        &self.parts.armed
    }

    /// `unlimited` checkbox.
    pub fn unlimited(&self) -> &Parameter<bool> {
        &self.parts.unlimited
    }

    /// `exposure` spinbox in ms.
    pub fn exposure(&self) -> &Parameter<f64> {
        &self.parts.exposure
    }

    /// `roi` array.
    pub fn roi(&self) -> &Parameter<Array1<i64>> {
        &self.parts.roi
    }

    /// `image` array.
    pub fn image(&self) -> &Parameter<Array2<f64>> {
        &self.parts.image
    }

    /// `sub_background` checkbox.
    pub fn sub_background(&self) -> &Parameter<bool> {
        &self.parts.sub_background
    }

    /// `background` array.
    pub fn background(&self) -> &Parameter<Array2<f64>> {
        &self.parts.background
    }
}

fn register_actions(parts: &Parts, actions: &mut ActionSet) {
    let p = parts.clone();
    actions.register(
        Action::new("Take background", move |_| {
            let p = p.clone();
            async move {
                let background = p.image.get_value().await?;
                let dim = background.dim();
                p.background.set(background).await?;
                Ok(json!([dim.0, dim.1]))
            }
        })
        .hidden(),
    );

    let p = parts.clone();
    actions.register(
        Action::new("Reset ROI", move |_| {
            let p = p.clone();
            async move { Ok(json!(p.reset_roi().await?.to_vec())) }
        })
        .hidden(),
    );

    let p = parts.clone();
    actions.register(Action::new("Save image", move |args| {
        let p = p.clone();
        async move {
            let filename: String = arg(&args, "filename")?
                .ok_or_else(|| PieceError::validation("filename", "a file name is required"))?;
            p.save_image(PathBuf::from(&filename)).await?;
            Ok(Value::String(filename))
        }
    }));

    let p = parts.clone();
    actions.register(
        Action::new("Rediscover", move |_| {
            let p = p.clone();
            async move {
                if p.debug() {
                    return Ok(json!([]));
                }
                Ok(json!(p.serial.refresh_options().await?))
            }
        })
        .hidden(),
    );

    let p = parts.clone();
    actions.register(
        Action::new("Trigger", move |_| {
            let p = p.clone();
            async move {
                p.trigger()?;
                Ok(Value::Null)
            }
        })
        .hidden(),
    );

    let p = parts.clone();
    actions.register(
        Action::new("Set ROI", move |args| {
            let p = p.clone();
            async move {
                let x: f64 = arg(&args, "x")?.unwrap_or(0.0);
                let y: f64 = arg(&args, "y")?.unwrap_or(0.0);
                let width: f64 = arg(&args, "width")?
                    .ok_or_else(|| PieceError::validation("width", "required"))?;
                let height: f64 = arg(&args, "height")?
                    .ok_or_else(|| PieceError::validation("height", "required"))?;
                let (rows, cols) = p.image.value().dim();
                if rows == 0 || cols == 0 {
                    return Err(PieceError::Precondition(
                        "Capture a reference image before setting the ROI".into(),
                    ));
                }
                let stored = p.set_roi_clamped(x, y, width, height, rows, cols).await?;
                Ok(json!(stored.to_vec()))
            }
        })
        .hidden(),
    );
}

#[async_trait]
impl Piece for Camera {
    fn kind(&self) -> &'static str {
        "thorlabs.camera"
    }

    fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn actions(&self) -> &ActionSet {
        &self.actions
    }

    async fn setup(&self) -> PieceResult<()> {
        let globals = self.parts.ctx.globals();
        if !globals.require(GLOBAL_KEY) {
            globals.insert(GLOBAL_KEY, (self.loader)()?);
            tracing::info!("Thorlabs camera SDK loaded");
        }
        Ok(())
    }

    async fn handle_close(&self) -> PieceResult<()> {
        if self.parts.debug() {
            return Ok(());
        }
        self.parts.dispose();
        let globals = self.parts.ctx.globals();
        if globals.release(GLOBAL_KEY) {
            if let Some(sdk) = globals.get::<SharedTlc>(GLOBAL_KEY) {
                sdk.dispose();
                tracing::info!("Thorlabs camera SDK disposed");
            }
            globals.remove(GLOBAL_KEY);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pzp_core::sdk;

    #[test]
    fn test_clamp_roi() {
        assert_eq!(clamp_roi(-3.2, 10.6, 50.0, 20.0, 100, 80), [0, 11, 46, 30]);
        assert_eq!(clamp_roi(60.0, 90.0, 40.0, 40.0, 100, 80), [60, 90, 79, 99]);
    }

    #[test]
    fn test_variants_register_preview_params() {
        let ctx = PuzzleContext::new(true);
        let base = Camera::new(ctx.clone(), sdk::unavailable("TSI", None), CameraVariant::Base);
        assert!(base.params().get("autolevel").is_none());
        assert!(base.preview().is_none());

        let piece = Camera::new(ctx.clone(), sdk::unavailable("TSI", None), CameraVariant::Preview);
        assert!(piece.params().get("autolevel").is_some());

        let lineout = Camera::new(ctx, sdk::unavailable("TSI", None), CameraVariant::Lineout);
        assert!(lineout.params().get("circle_r").is_some());
        assert!(lineout.actions().get("Centre lines").is_some());
        assert!(lineout.preview().is_some());
    }

    #[tokio::test]
    async fn test_debug_image_is_noise() {
        let camera = Camera::new(
            PuzzleContext::new(true),
            sdk::unavailable("TSI", None),
            CameraVariant::Preview,
        );
        let image = camera.image().get_value().await.unwrap();
        assert_eq!(image.dim(), (DEBUG_ROWS, DEBUG_COLS));
        assert!(image.iter().all(|v| (0.0..1024.0).contains(v)));
        assert!(camera.armed().value());
        assert_eq!(camera.roi().get_value().await.unwrap().to_vec(), DEBUG_ROI.to_vec());
    }

    #[tokio::test]
    async fn test_not_connected() {
        let camera = Camera::new(
            PuzzleContext::new(false),
            sdk::unavailable("TSI", None),
            CameraVariant::Base,
        );
        let err = camera.image().get_value().await.unwrap_err();
        assert_eq!(err.to_string(), "Camera not connected");
    }

    #[tokio::test]
    async fn test_roi_must_have_four_entries() {
        let camera = Camera::new(
            PuzzleContext::new(true),
            sdk::unavailable("TSI", None),
            CameraVariant::Base,
        );
        assert!(camera.roi().set(Array1::from(vec![1, 2, 3])).await.is_err());
    }

    #[test]
    fn test_write_png_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let frame = ndarray::array![[-8.0, 0.0, 4.0], [400.0, 1020.0, 4000.0]];
        write_png(&frame, &path).unwrap();
        let saved = image::open(&path).unwrap().to_luma8();
        assert_eq!(saved.dimensions(), (3, 2));
        assert_eq!(saved.into_raw(), vec![0, 0, 1, 100, 255, 255]);
    }
}
