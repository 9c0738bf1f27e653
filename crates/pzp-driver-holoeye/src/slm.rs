//! Holoeye SLM through the HEDS SLM Display SDK.
//!
//! SDK calls return a HEDS error code, [`NO_ERROR`] on success. Any other
//! code is reported as `SLM error: <SDK error string>`.

use async_trait::async_trait;
use ndarray::Array2;
use parking_lot::Mutex;
use pzp_core::preview::{ImagePreview, PreviewSettings};
use pzp_core::sdk::{run_blocking, SdkLoader};
use pzp_core::{param, ActionSet, Parameter, ParameterSet, Piece, PieceError, PieceResult, PuzzleContext};
use std::path::Path;
use std::sync::Arc;

/// `HEDSERR_NoError`.
pub const NO_ERROR: i32 = 0;

/// SDK version the Piece asks for.
pub const SDK_VERSION: (u32, u32) = (4, 1);

/// Size of the blank phase image shown after connecting.
pub const BLANK_SHAPE: (usize, usize) = (1200, 1920);

/// The HEDS SDK.
pub trait HedsSdk: Send + Sync {
    /// `SDK.Init(major, minor)`.
    fn init(&self, major: u32, minor: u32) -> i32;

    /// `SLM.Init`: open the first SLM.
    fn open_slm(&self) -> PieceResult<Arc<dyn HedsSlm>>;

    /// `SDK.Close`.
    fn close(&self);

    /// `SDK.ErrorString(code)`.
    fn error_string(&self, code: i32) -> String;
}

/// An open SLM.
pub trait HedsSlm: Send + Sync {
    /// Error state left by opening.
    fn error_code(&self) -> i32;

    /// Upload phase data, returning a data handle.
    fn load_phase_data(&self, phase: &Array2<f64>) -> Result<u32, i32>;

    /// Show an uploaded data handle.
    fn show(&self, handle: u32) -> i32;

    /// Set the design wavelength in nm.
    fn set_wavelength(&self, nm: f64) -> i32;

    /// Design wavelength in nm, read through `heds_slm_get_wavelength`.
    fn wavelength(&self) -> Result<f64, i32>;

    /// Load a wavefront compensation file into the SLM window.
    fn load_wavefront_compensation(&self, path: &Path) -> i32;

    /// Remove the wavefront compensation.
    fn clear_wavefront_compensation(&self) -> i32;
}

/// Shared SDK handle.
pub type SharedHeds = Arc<dyn HedsSdk>;

#[derive(Default)]
struct State {
    sdk: Option<SharedHeds>,
    slm: Option<Arc<dyn HedsSlm>>,
}

#[derive(Clone)]
struct Parts {
    ctx: PuzzleContext,
    loader: SdkLoader<SharedHeds>,
    state: Arc<Mutex<State>>,
    image: Parameter<Array2<f64>>,
}

impl Parts {
    fn debug(&self) -> bool {
        self.ctx.debug()
    }

    fn sdk(&self) -> PieceResult<SharedHeds> {
        let loaded = self.state.lock().sdk.clone();
        match loaded {
            Some(sdk) => Ok(sdk),
            None => {
                let sdk = (self.loader)()?;
                self.state.lock().sdk = Some(sdk.clone());
                Ok(sdk)
            }
        }
    }

    fn ensure(&self) -> PieceResult<()> {
        if self.debug() || self.state.lock().slm.is_some() {
            return Ok(());
        }
        Err(PieceError::not_connected("SLM not connected"))
    }

    fn slm(&self) -> PieceResult<Arc<dyn HedsSlm>> {
        self.state
            .lock()
            .slm
            .clone()
            .ok_or_else(|| PieceError::not_connected("SLM not connected"))
    }

    fn error(&self, code: i32) -> PieceError {
        let text = match self.sdk() {
            Ok(sdk) => sdk.error_string(code),
            Err(_) => format!("code {code}"),
        };
        PieceError::hardware(format!("SLM error: {text}"))
    }

    fn check(&self, code: i32) -> PieceResult<()> {
        if code == NO_ERROR {
            Ok(())
        } else {
            Err(self.error(code))
        }
    }

    async fn connect(&self) -> PieceResult<()> {
        if !self.debug() {
            let sdk = self.sdk()?;
            let (major, minor) = SDK_VERSION;
            self.check(sdk.init(major, minor))?;
            let slm = run_blocking(move || sdk.open_slm()).await?;
            self.check(slm.error_code())?;
            self.state.lock().slm = Some(slm);
            tracing::info!("SLM opened");
        }
        self.image.set_cached(Array2::zeros(BLANK_SHAPE))
    }

    async fn disconnect(&self) -> PieceResult<()> {
        if self.debug() {
            return Ok(());
        }
        let slm = self.state.lock().slm.take();
        if slm.is_some() {
            self.sdk()?.close();
            tracing::info!("SLM closed");
        }
        Ok(())
    }

    async fn show(&self, phase: Array2<f64>) -> PieceResult<Option<Array2<f64>>> {
        self.ensure()?;
        if self.debug() {
            return Ok(Some(phase));
        }
        let slm = self.slm()?;
        let uploaded = {
            let (slm, phase) = (slm.clone(), phase.clone());
            run_blocking(move || Ok(slm.load_phase_data(&phase))).await?
        };
        let handle = uploaded.map_err(|code| self.error(code))?;
        self.check(slm.show(handle))?;
        Ok(Some(phase))
    }

    async fn set_correction(&self, path: String) -> PieceResult<Option<String>> {
        self.ensure()?;
        let exists = !path.is_empty() && Path::new(&path).exists();
        if self.debug() {
            return Ok(Some(if exists { path } else { String::new() }));
        }
        let slm = self.slm()?;
        if exists {
            self.check(slm.load_wavefront_compensation(Path::new(&path)))?;
            tracing::info!(file = %path, "wavefront compensation loaded");
            Ok(Some(path))
        } else {
            self.check(slm.clear_wavefront_compensation())?;
            Ok(Some(String::new()))
        }
    }
}

/// Holoeye SLM Piece.
pub struct Slm {
    parts: Parts,
    connected: Parameter<bool>,
    wavelength: Parameter<f64>,
    correction_file: Parameter<String>,
    preview: ImagePreview,
    params: ParameterSet,
    actions: ActionSet,
}

impl Slm {
    /// Build the Piece.
    pub fn new(ctx: PuzzleContext, loader: SdkLoader<SharedHeds>) -> Self {
        let parts = Parts {
            ctx,
            loader,
            state: Arc::new(Mutex::new(State::default())),
            image: param::array("image", Array2::zeros((0, 0))),
        };

        let connected = param::connected();
        let (open, close) = (parts.clone(), parts.clone());
        param::wire_connection(
            &connected,
            move || {
                let p = open.clone();
                async move { p.connect().await }
            },
            move || {
                let p = close.clone();
                async move { p.disconnect().await }
            },
        );

        let p = parts.clone();
        parts.image.set_setter(move |phase| {
            let p = p.clone();
            async move { p.show(phase).await }
        });

        let wavelength = param::spinbox("wavelength", 0.0).with_unit("nm");
        let p = parts.clone();
        wavelength.set_setter(move |nm: f64| {
            let p = p.clone();
            async move {
                p.ensure()?;
                if p.debug() {
                    return Ok(Some(nm));
                }
                p.check(p.slm()?.set_wavelength(nm))?;
                Ok(None)
            }
        });
        let (p, cached) = (parts.clone(), wavelength.clone());
        wavelength.set_getter(move || {
            let (p, cached) = (p.clone(), cached.clone());
            async move {
                p.ensure()?;
                if p.debug() {
                    return Ok(cached.value());
                }
                p.slm()?.wavelength().map_err(|code| p.error(code))
            }
        });

        let correction_file = param::text("correction_file", "");
        let p = parts.clone();
        correction_file.set_setter(move |path: String| {
            let p = p.clone();
            async move { p.set_correction(path).await }
        });

        let preview = ImagePreview::new(PreviewSettings::default());

        let mut params = ParameterSet::new();
        params.register(connected.clone());
        params.register(parts.image.clone());
        params.register(wavelength.clone());
        params.register(correction_file.clone());
        preview.register(&mut params);

        Self {
            parts,
            connected,
            wavelength,
            correction_file,
            preview,
            params,
            actions: ActionSet::new(),
        }
    }

    /// `connected` checkbox.
    pub fn connected(&self) -> &Parameter<bool> {
        &self.connected
    }

    /// `image` phase array.
    pub fn image(&self) -> &Parameter<Array2<f64>> {
        &self.parts.image
    }

    /// `wavelength` spinbox in nm.
    pub fn wavelength(&self) -> &Parameter<f64> {
        &self.wavelength
    }

    /// `correction_file` path.
    pub fn correction_file(&self) -> &Parameter<String> {
        &self.correction_file
    }

    /// Preview state.
    pub fn preview(&self) -> &ImagePreview {
        &self.preview
    }
}

#[async_trait]
impl Piece for Slm {
    fn kind(&self) -> &'static str {
        "holoeye.slm"
    }

    fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn actions(&self) -> &ActionSet {
        &self.actions
    }

    async fn setup(&self) -> PieceResult<()> {
        self.parts.sdk().map(|_| ())
    }

    async fn handle_close(&self) -> PieceResult<()> {
        self.parts.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pzp_core::sdk;

    fn debug_slm() -> Slm {
        Slm::new(PuzzleContext::new(true), sdk::unavailable("HEDS", None))
    }

    #[tokio::test]
    async fn test_debug_connect_blanks_image() {
        let slm = debug_slm();
        assert!(slm.connected().set(true).await.unwrap());
        assert_eq!(slm.image().value().dim(), BLANK_SHAPE);
        assert_eq!(slm.wavelength().set(780.0).await.unwrap(), 780.0);
        assert_eq!(slm.wavelength().get_value().await.unwrap(), 780.0);
    }

    #[tokio::test]
    async fn test_debug_correction_file_must_exist() {
        let slm = debug_slm();
        let stored = slm
            .correction_file()
            .set("/nonexistent/correction.h5".into())
            .await
            .unwrap();
        assert_eq!(stored, "");

        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().into_owned();
        assert_eq!(slm.correction_file().set(path.clone()).await.unwrap(), path);
    }

    #[tokio::test]
    async fn test_not_connected() {
        let slm = Slm::new(PuzzleContext::new(false), sdk::unavailable("HEDS", None));
        let err = slm.image().set(Array2::zeros((2, 2))).await.unwrap_err();
        assert_eq!(err.to_string(), "SLM not connected");
        let err = slm.wavelength().get_value().await.unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn test_param_layout() {
        let slm = debug_slm();
        assert_eq!(
            slm.params().names(),
            vec!["connected", "image", "wavelength", "correction_file"]
        );
        assert!(!slm.preview().autolevel());
    }
}
