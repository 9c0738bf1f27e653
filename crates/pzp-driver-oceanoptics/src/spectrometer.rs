//! Ocean Optics spectrometers through SeaBreeze.

use async_trait::async_trait;
use ndarray::Array1;
use parking_lot::Mutex;
use pzp_core::sdk::{run_blocking, SdkLoader};
use pzp_core::{param, ActionSet, Parameter, ParameterSet, Piece, PieceError, PieceResult, PuzzleContext};
use rand::Rng;
use std::sync::Arc;

/// Points in a debug spectrum.
pub const DEBUG_POINTS: usize = 100;

/// The SeaBreeze library.
pub trait SeaBreeze: Send + Sync {
    /// Descriptors of attached spectrometers, e.g.
    /// `<SeaBreezeDevice USB2000PLUS:FLMS12345>`.
    fn list_devices(&self) -> PieceResult<Vec<String>>;

    /// Open the spectrometer with `serial`.
    fn open(&self, serial: &str) -> PieceResult<Arc<dyn SeaBreezeDevice>>;
}

/// An open spectrometer.
pub trait SeaBreezeDevice: Send + Sync {
    /// `(wavelengths, intensities)`.
    fn spectrum(&self) -> PieceResult<(Vec<f64>, Vec<f64>)>;

    /// Release the device.
    fn close(&self) -> PieceResult<()>;
}

/// Shared library handle.
pub type SharedSeaBreeze = Arc<dyn SeaBreeze>;

/// Serial number inside a device descriptor.
///
/// `<SeaBreezeDevice USB2000PLUS:FLMS12345>` gives `FLMS12345`.
pub fn serial_from_descriptor(descriptor: &str) -> PieceResult<String> {
    let (_, rest) = descriptor.split_once(':').ok_or_else(|| {
        PieceError::validation("spectrometer", format!("'{descriptor}' is not a device descriptor"))
    })?;
    let serial = rest.strip_suffix('>').unwrap_or(rest).trim();
    if serial.is_empty() {
        return Err(PieceError::validation(
            "spectrometer",
            format!("'{descriptor}' has no serial number"),
        ));
    }
    Ok(serial.to_string())
}

#[derive(Default)]
struct State {
    library: Option<SharedSeaBreeze>,
    device: Option<Arc<dyn SeaBreezeDevice>>,
}

#[derive(Clone)]
struct Parts {
    ctx: PuzzleContext,
    loader: SdkLoader<SharedSeaBreeze>,
    state: Arc<Mutex<State>>,
    spectrometer: Parameter<String>,
    wls: Parameter<Array1<f64>>,
}

impl Parts {
    fn debug(&self) -> bool {
        self.ctx.debug()
    }

    fn library(&self) -> PieceResult<SharedSeaBreeze> {
        let loaded = self.state.lock().library.clone();
        match loaded {
            Some(library) => Ok(library),
            None => {
                let library = (self.loader)()?;
                self.state.lock().library = Some(library.clone());
                Ok(library)
            }
        }
    }

    fn device(&self) -> PieceResult<Arc<dyn SeaBreezeDevice>> {
        self.state
            .lock()
            .device
            .clone()
            .ok_or_else(|| PieceError::not_connected("Spectrometer not connected"))
    }

    async fn connect(&self) -> PieceResult<()> {
        if self.debug() {
            return Ok(());
        }
        let serial = serial_from_descriptor(&self.spectrometer.value())?;
        let library = self.library()?;
        let opened = serial.clone();
        let device = run_blocking(move || library.open(&opened)).await?;
        self.state.lock().device = Some(device);
        tracing::info!(%serial, "spectrometer opened");
        Ok(())
    }

    async fn disconnect(&self) -> PieceResult<()> {
        if self.debug() {
            return Ok(());
        }
        let device = self.state.lock().device.take();
        if let Some(device) = device {
            device.close()?;
            tracing::info!("spectrometer closed");
        }
        Ok(())
    }

    async fn spectrum(&self) -> PieceResult<Array1<f64>> {
        if self.debug() {
            self.wls
                .set_cached(Array1::range(0.0, DEBUG_POINTS as f64, 1.0))?;
            let mut rng = rand::thread_rng();
            return Ok((0..DEBUG_POINTS).map(|_| rng.gen::<f64>()).collect());
        }
        let device = self.device()?;
        let (wls, values) = run_blocking(move || device.spectrum()).await?;
        self.wls.set_cached(Array1::from(wls))?;
        Ok(Array1::from(values))
    }
}

/// Ocean Optics spectrometer Piece.
pub struct Spectrometer {
    parts: Parts,
    connected: Parameter<bool>,
    values: Parameter<Array1<f64>>,
    params: ParameterSet,
    actions: ActionSet,
}

impl Spectrometer {
    /// Build the Piece.
    pub fn new(ctx: PuzzleContext, loader: SdkLoader<SharedSeaBreeze>) -> Self {
        let parts = Parts {
            ctx,
            loader,
            state: Arc::new(Mutex::new(State::default())),
            spectrometer: param::dropdown("spectrometer", ""),
            wls: param::array("wls", Array1::zeros(0)).hidden(),
        };

        let p = parts.clone();
        parts.spectrometer.set_options_loader(move || {
            let p = p.clone();
            async move {
                if p.debug() {
                    return Ok(Vec::new());
                }
                let library = p.library()?;
                run_blocking(move || library.list_devices()).await
            }
        });

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

        let values = param::array("values", Array1::zeros(0));
        let p = parts.clone();
        values.set_getter(move || {
            let p = p.clone();
            async move { p.spectrum().await }
        });

        let mut params = ParameterSet::new();
        params.register(parts.spectrometer.clone());
        params.register(connected.clone());
        params.register(parts.wls.clone());
        params.register(values.clone());

        Self {
            parts,
            connected,
            values,
            params,
            actions: ActionSet::new(),
        }
    }

    /// `spectrometer` device dropdown.
    pub fn spectrometer(&self) -> &Parameter<String> {
        &self.parts.spectrometer
    }

    /// `connected` checkbox.
    pub fn connected(&self) -> &Parameter<bool> {
        &self.connected
    }

    /// Wavelengths of the last spectrum.
    pub fn wls(&self) -> &Parameter<Array1<f64>> {
        &self.parts.wls
    }

    /// Intensities, read from the device on `get_value`.
    pub fn values(&self) -> &Parameter<Array1<f64>> {
        &self.values
    }
}

#[async_trait]
impl Piece for Spectrometer {
    fn kind(&self) -> &'static str {
        "oceanoptics.spectrometer"
    }

    fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn actions(&self) -> &ActionSet {
        &self.actions
    }

    async fn setup(&self) -> PieceResult<()> {
        self.parts.library().map(|_| ())
    }

    async fn handle_close(&self) -> PieceResult<()> {
        self.parts.disconnect().await
    }
}
