//! LightField automation.
//!
//! LightField is driven through its automation interface: `Launch` starts
//! the application and opens its experiment, after which the exposure, grating
//! centre and ROI selection can be read and written and spectra captured.
//!
//! LightField refuses setting changes while an experiment is running, so
//! every setting access stops the experiment and waits until it is idle.

use async_trait::async_trait;
use ndarray::{Array1, Array2};
use parking_lot::Mutex;
use pzp_core::sdk::{run_blocking, SdkLoader};
use pzp_core::{
    param, Action, ActionSet, Parameter, ParameterSet, Piece, PieceError, PieceResult,
    PuzzleContext,
};
use rand::Rng;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Poll period while waiting for a stopped experiment to go idle.
pub const STOP_POLL: Duration = Duration::from_millis(100);

/// Poll period while waiting for an acquisition to finish.
pub const ACQUIRE_POLL: Duration = Duration::from_millis(50);

/// How long a stopped experiment may take to go idle.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Readings above this many counts are flagged as saturated.
pub const SATURATION_COUNTS: f64 = 6e4;

/// Experiment settings the Piece touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    /// `CameraSettings.ShutterTimingExposureTime`
    ExposureTime,
    /// `SpectrometerSettings.GratingCenterWavelength`
    GratingCenterWavelength,
    /// `CameraSettings.ReadoutControlRegionsOfInterestSelection`
    RoiSelection,
    /// `ExperimentSettings.OnlineCorrectionsBackgroundCorrectionReferenceFile`
    BackgroundReferenceFile,
    /// `ExperimentSettings.FileNameGenerationBaseFileName`
    BaseFileName,
}

/// A setting value as LightField holds it.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    /// 32-bit integer.
    Int(i32),
    /// Double.
    Float(f64),
    /// String or path.
    Text(String),
}

impl SettingValue {
    fn to_i64(&self, setting: Setting) -> PieceResult<i64> {
        match self {
            Self::Int(v) => Ok(i64::from(*v)),
            Self::Float(v) => Ok(v.round() as i64),
            Self::Text(t) => Err(PieceError::Protocol {
                device: format!("LightField {setting:?}"),
                response: t.clone(),
            }),
        }
    }
}

/// One captured frame, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Pixel values.
    pub data: Vec<f64>,
    /// Pixels per row.
    pub width: usize,
}

/// Contents of an SPE file.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeFile {
    /// Wavelength of each column.
    pub wavelength: Array1<f64>,
    /// Frame data, rows × columns.
    pub data: Array2<f64>,
}

/// The LightField application.
pub trait Automation: Send + Sync {
    /// Start LightField and return its experiment.
    fn launch(&self) -> PieceResult<Arc<dyn Experiment>>;

    /// Whether a LightField window is still open.
    fn window_open(&self) -> bool;

    /// Read an SPE file written by LightField.
    fn load_spe(&self, path: &Path) -> PieceResult<SpeFile>;
}

/// A LightField experiment.
pub trait Experiment: Send + Sync {
    /// Stop whatever is running.
    fn stop(&self) -> PieceResult<()>;

    /// Whether an acquisition or preview is running.
    fn is_running(&self) -> PieceResult<bool>;

    /// Whether the experiment could be started now.
    fn is_ready_to_run(&self) -> PieceResult<bool>;

    /// Write a setting.
    fn set_value(&self, setting: Setting, value: SettingValue) -> PieceResult<()>;

    /// Read a setting.
    fn get_value(&self, setting: Setting) -> PieceResult<SettingValue>;

    /// Wavelength of every sensor column.
    fn column_calibration(&self) -> PieceResult<Vec<f64>>;

    /// Capture one frame without saving it.
    fn capture(&self) -> PieceResult<Frame>;

    /// Start an acquisition that saves to disk.
    fn acquire(&self) -> PieceResult<()>;

    /// Files saved by recent acquisitions, newest first.
    fn recently_acquired_files(&self) -> PieceResult<Vec<PathBuf>>;
}

/// Shared automation handle.
pub type SharedAutomation = Arc<dyn Automation>;

/// Pick the calibration entry at the centre of each bin when the sensor is
/// read out binned, then shape the frame as rows × wavelengths.
pub fn bin_frame(calibration: &[f64], frame: &Frame) -> PieceResult<(Array1<f64>, Array2<f64>)> {
    if frame.width == 0 || frame.width > calibration.len() {
        return Err(PieceError::hardware(format!(
            "Frame width {} does not match the {} calibrated columns",
            frame.width,
            calibration.len()
        )));
    }
    let binning = calibration.len() / frame.width;
    let wls: Array1<f64> = calibration
        .iter()
        .skip(binning / 2)
        .step_by(binning)
        .copied()
        .collect();
    if frame.data.len() % wls.len() != 0 {
        return Err(PieceError::hardware(format!(
            "{} values cannot be split into rows of {}",
            frame.data.len(),
            wls.len()
        )));
    }
    let rows = frame.data.len() / wls.len();
    let values = Array2::from_shape_vec((rows, wls.len()), frame.data.clone())
        .map_err(|e| PieceError::Other(e.into()))?;
    Ok((wls, values))
}

#[derive(Default)]
struct State {
    automation: Option<SharedAutomation>,
    experiment: Option<Arc<dyn Experiment>>,
}

#[derive(Clone)]
struct Parts {
    ctx: PuzzleContext,
    loader: SdkLoader<SharedAutomation>,
    background_directory: Option<PathBuf>,
    state: Arc<Mutex<State>>,
    integration: Parameter<i64>,
    center: Parameter<i64>,
    roi: Parameter<i64>,
    filename: Parameter<String>,
    values: Parameter<Array2<f64>>,
    wls: Parameter<Array1<f64>>,
    counts: Parameter<f64>,
    saturated: Parameter<i64>,
    max_counts: Parameter<f64>,
}

impl Parts {
    fn debug(&self) -> bool {
        self.ctx.debug()
    }

    fn ensure(&self) -> PieceResult<()> {
        if self.debug() || self.state.lock().experiment.is_some() {
            return Ok(());
        }
        Err(PieceError::Precondition(
            "You have to launch Lightfield first.".into(),
        ))
    }

    fn experiment(&self) -> PieceResult<Arc<dyn Experiment>> {
        self.state.lock().experiment.clone().ok_or_else(|| {
            PieceError::Precondition("You have to launch Lightfield first.".into())
        })
    }

    fn automation(&self) -> PieceResult<SharedAutomation> {
        let loaded = self.state.lock().automation.clone();
        match loaded {
            Some(automation) => Ok(automation),
            None => {
                let automation = (self.loader)()?;
                self.state.lock().automation = Some(automation.clone());
                Ok(automation)
            }
        }
    }

    async fn wait_idle(experiment: &Arc<dyn Experiment>, poll: Duration) -> PieceResult<()> {
        while experiment.is_running()? {
            tokio::time::sleep(poll).await;
        }
        Ok(())
    }

    /// Stop the experiment and wait for it to go idle.
    async fn stop(&self) -> PieceResult<()> {
        if self.debug() {
            return Ok(());
        }
        let experiment = self.experiment()?;
        {
            let experiment = experiment.clone();
            run_blocking(move || experiment.stop()).await?;
        }
        tokio::time::timeout(STOP_TIMEOUT, Self::wait_idle(&experiment, STOP_POLL))
            .await
            .map_err(|_| PieceError::Timeout("the LightField experiment to stop".into()))?
    }

    async fn write(&self, setting: Setting, value: i64) -> PieceResult<()> {
        let experiment = self.experiment()?;
        let value = i32::try_from(value)
            .map_err(|_| PieceError::validation(format!("{setting:?}"), "out of 32-bit range"))?;
        experiment.set_value(setting, SettingValue::Int(value))?;
        if setting == Setting::ExposureTime {
            self.select_background(&experiment, value)?;
        }
        Ok(())
    }

    fn select_background(&self, experiment: &Arc<dyn Experiment>, exposure: i32) -> PieceResult<()> {
        let Some(dir) = &self.background_directory else {
            return Ok(());
        };
        let file = dir.join(format!("{exposure}.spe"));
        tracing::debug!(file = %file.display(), "selecting background reference");
        experiment.set_value(
            Setting::BackgroundReferenceFile,
            SettingValue::Text(file.to_string_lossy().into_owned()),
        )?;
        if !experiment.is_ready_to_run()? {
            return Err(PieceError::hardware("A background file doesn't exist"));
        }
        Ok(())
    }

    async fn capture(&self) -> PieceResult<Array2<f64>> {
        self.ensure()?;
        if self.debug() {
            let mut rng = rand::thread_rng();
            self.wls.set_cached(Array1::range(0.0, 100.0, 1.0))?;
            return Ok(Array2::from_shape_fn((20, 100), |_| rng.gen::<f64>()));
        }
        self.stop().await?;
        let experiment = self.experiment()?;
        let (frame, calibration) = run_blocking(move || {
            let frame = experiment.capture()?;
            Ok((frame, experiment.column_calibration()?))
        })
        .await?;
        let (wls, values) = bin_frame(&calibration, &frame)?;
        self.wls.set_cached(wls)?;
        Ok(values)
    }

    async fn launch(&self) -> PieceResult<()> {
        if self.debug() {
            return Ok(());
        }
        let automation = self.automation()?;
        let experiment = run_blocking(move || automation.launch()).await?;
        let calibration = experiment.column_calibration()?;
        self.state.lock().experiment = Some(experiment);
        self.wls.set_cached(Array1::from(calibration))?;
        tracing::info!("LightField launched");
        Ok(())
    }

    async fn acquire(&self) -> PieceResult<Value> {
        self.ensure()?;
        if self.debug() {
            self.counts.get_value().await?;
            return Ok(Value::Null);
        }
        self.stop().await?;
        let experiment = self.experiment()?;

        let template = self.filename.get_value().await?;
        let formatted = self.ctx.format(&template);
        let base = Path::new(&formatted)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        experiment.set_value(Setting::BaseFileName, SettingValue::Text(base.clone()))?;

        {
            let experiment = experiment.clone();
            run_blocking(move || experiment.acquire()).await?;
        }
        Self::wait_idle(&experiment, ACQUIRE_POLL).await?;

        let path = experiment
            .recently_acquired_files()?
            .into_iter()
            .next()
            .ok_or_else(|| PieceError::hardware("LightField did not report an acquired file"))?;
        let automation = self.automation()?;
        let spe = {
            let path = path.clone();
            run_blocking(move || automation.load_spe(&path)).await?
        };
        let counts = spe.data.sum();
        self.wls.set_cached(spe.wavelength)?;
        self.values.set_cached(spe.data)?;
        self.counts.set_cached(counts)?;
        tracing::info!(file = %path.display(), counts, "acquisition saved");
        Ok(Value::String(path.to_string_lossy().into_owned()))
    }

    fn wire_setting(&self, param: &Parameter<i64>, setting: Setting) {
        let p = self.clone();
        param.set_setter(move |value: i64| {
            let p = p.clone();
            async move {
                p.ensure()?;
                p.stop().await?;
                if p.debug() {
                    return Ok(Some(value));
                }
                p.write(setting, value).await?;
                Ok(None)
            }
        });
        let (p, cached) = (self.clone(), param.clone());
        param.set_getter(move || {
            let (p, cached) = (p.clone(), cached.clone());
            async move {
                p.ensure()?;
                p.stop().await?;
                if p.debug() {
                    return Ok(cached.value());
                }
                p.experiment()?.get_value(setting)?.to_i64(setting)
            }
        });
    }

    fn wire(&self) {
        self.wire_setting(&self.integration, Setting::ExposureTime);
        self.wire_setting(&self.center, Setting::GratingCenterWavelength);
        self.wire_setting(&self.roi, Setting::RoiSelection);

        let p = self.clone();
        self.values.set_getter(move || {
            let p = p.clone();
            async move { p.capture().await }
        });

        let p = self.clone();
        self.counts.set_getter(move || {
            let p = p.clone();
            async move { Ok(p.values.get_value().await?.sum()) }
        });
        let p = self.clone();
        self.saturated.set_getter(move || {
            let p = p.clone();
            async move { Ok(i64::from(max_of(&p.values.value()) > SATURATION_COUNTS)) }
        });
        let p = self.clone();
        self.max_counts.set_getter(move || {
            let p = p.clone();
            async move { Ok(max_of(&p.values.get_value().await?)) }
        });
    }
}

fn max_of(values: &Array2<f64>) -> f64 {
    values.iter().copied().reduce(f64::max).unwrap_or(0.0)
}

/// LightField Piece.
pub struct LightField {
    parts: Parts,
    params: ParameterSet,
    actions: ActionSet,
}

impl LightField {
    /// Build the Piece. With a `background_directory`, setting `integration`
    /// selects `<dir>/<integration>.spe` as the background reference.
    pub fn new(
        ctx: PuzzleContext,
        loader: SdkLoader<SharedAutomation>,
        background_directory: Option<PathBuf>,
    ) -> Self {
        let parts = Parts {
            ctx,
            loader,
            background_directory,
            state: Arc::new(Mutex::new(State::default())),
            integration: param::spinbox("integration", 300i64).with_unit("ms"),
            center: param::spinbox("center", 875i64).with_unit("nm"),
            roi: param::spinbox("roi", 1i64),
            filename: param::text("filename", "jdr"),
            values: param::array("values", Array2::zeros((0, 0))),
            wls: param::array("wls", Array1::zeros(0)).hidden(),
            counts: param::readout("counts", 0.0).with_format("{:.2f}"),
            saturated: param::readout("saturated", 0i64).hidden(),
            max_counts: param::readout("max_counts", 0.0).with_format("{:.2f}"),
        };
        parts.wire();

        let mut params = ParameterSet::new();
        params.register(parts.integration.clone());
        params.register(parts.center.clone());
        params.register(parts.roi.clone());
        params.register(parts.filename.clone());
        params.register(parts.values.clone());
        params.register(parts.wls.clone());
        params.register(parts.counts.clone());
        params.register(parts.saturated.clone());
        params.register(parts.max_counts.clone());

        let mut actions = ActionSet::new();
        let p = parts.clone();
        actions.register(Action::new("Launch", move |_| {
            let p = p.clone();
            async move {
                p.launch().await?;
                Ok(Value::Null)
            }
        }));
        let p = parts.clone();
        actions.register(Action::new("Acquire", move |_| {
            let p = p.clone();
            async move { p.acquire().await }
        }));

        Self {
            parts,
            params,
            actions,
        }
    }

    /// `integration` spinbox (exposure, ms).
    pub fn integration(&self) -> &Parameter<i64> {
        &self.parts.integration
    }

    /// `center` spinbox (grating centre, nm).
    pub fn center(&self) -> &Parameter<i64> {
        &self.parts.center
    }

    /// `roi` spinbox (ROI selection).
    pub fn roi(&self) -> &Parameter<i64> {
        &self.parts.roi
    }

    /// `filename` template.
    pub fn filename(&self) -> &Parameter<String> {
        &self.parts.filename
    }

    /// `values` array, rows × wavelengths.
    pub fn values(&self) -> &Parameter<Array2<f64>> {
        &self.parts.values
    }

    /// `wls` array.
    pub fn wls(&self) -> &Parameter<Array1<f64>> {
        &self.parts.wls
    }

    /// `counts` readout.
    pub fn counts(&self) -> &Parameter<f64> {
        &self.parts.counts
    }

    /// `saturated` readout.
    pub fn saturated(&self) -> &Parameter<i64> {
        &self.parts.saturated
    }
}

#[async_trait]
impl Piece for LightField {
    fn kind(&self) -> &'static str {
        "princeton.lightfield"
    }

    fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn actions(&self) -> &ActionSet {
        &self.actions
    }

    async fn setup(&self) -> PieceResult<()> {
        self.parts.automation().map(|_| ())
    }

    async fn handle_close(&self) -> PieceResult<()> {
        if self.parts.debug() {
            return Ok(());
        }
        let automation = self.parts.state.lock().automation.clone();
        if automation.is_some_and(|a| a.window_open()) {
            tracing::warn!("Please close LightField.");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pzp_core::sdk;

    fn debug_piece() -> LightField {
        LightField::new(PuzzleContext::new(true), sdk::unavailable("LightField", None), None)
    }

    #[test]
    fn test_bin_frame_picks_bin_centres() {
        let calibration: Vec<f64> = (0..8).map(f64::from).collect();
        let frame = Frame {
            data: (0..8).map(f64::from).collect(),
            width: 4,
        };
        let (wls, values) = bin_frame(&calibration, &frame).unwrap();
        assert_eq!(wls.to_vec(), vec![1.0, 3.0, 5.0, 7.0]);
        assert_eq!(values.dim(), (2, 4));
        assert_eq!(values[[1, 0]], 4.0);

        let unbinned = Frame {
            data: vec![0.0; 16],
            width: 8,
        };
        let (wls, values) = bin_frame(&calibration, &unbinned).unwrap();
        assert_eq!(wls.len(), 8);
        assert_eq!(values.dim(), (2, 8));
    }

    #[test]
    fn test_bin_frame_rejects_mismatch() {
        let calibration = vec![0.0; 4];
        let wide = Frame {
            data: vec![0.0; 8],
            width: 8,
        };
        assert!(bin_frame(&calibration, &wide).is_err());
        let ragged = Frame {
            data: vec![0.0; 6],
            width: 4,
        };
        assert!(bin_frame(&calibration, &ragged).is_err());
    }

    #[tokio::test]
    async fn test_debug_values() {
        let piece = debug_piece();
        let values = piece.values().get_value().await.unwrap();
        assert_eq!(values.dim(), (20, 100));
        assert!(values.iter().all(|v| (0.0..1.0).contains(v)));
        assert_eq!(piece.wls().value().len(), 100);
        assert_eq!(piece.wls().value()[99], 99.0);
        assert_eq!(piece.saturated().get_value().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_debug_settings_echo() {
        let piece = debug_piece();
        assert_eq!(piece.integration().set(500).await.unwrap(), 500);
        assert_eq!(piece.integration().get_value().await.unwrap(), 500);
        assert_eq!(piece.center().get_value().await.unwrap(), 875);
        let counts = piece.actions().run("Acquire", Value::Null).await;
        assert_eq!(counts.unwrap(), Value::Null);
        assert!(piece.counts().value() > 0.0);
    }

    #[tokio::test]
    async fn test_launch_required() {
        let piece = LightField::new(
            PuzzleContext::new(false),
            sdk::unavailable("LightField", None),
            None,
        );
        let err = piece.integration().set(100).await.unwrap_err();
        assert_eq!(err.to_string(), "You have to launch Lightfield first.");
        assert!(err.is_precondition());
        let err = piece.actions().run("Acquire", Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "You have to launch Lightfield first.");
    }

    #[test]
    fn test_param_layout() {
        let piece = debug_piece();
        assert_eq!(
            piece.params().names(),
            vec![
                "integration",
                "center",
                "roi",
                "filename",
                "values",
                "wls",
                "counts",
                "saturated",
                "max_counts"
            ]
        );
        assert_eq!(piece.counts().metadata().format.as_deref(), Some("{:.2f}"));
        assert_eq!(piece.actions().names(), vec!["Launch", "Acquire"]);
    }
}
