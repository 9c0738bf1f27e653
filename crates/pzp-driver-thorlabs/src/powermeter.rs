//! Thorlabs powermeters through the TLPM library.

use async_trait::async_trait;
use parking_lot::Mutex;
use pzp_core::sdk::{run_blocking, SdkLoader};
use pzp_core::{
    param, Action, ActionSet, Parameter, ParameterSet, Piece, PieceError, PieceResult,
    PuzzleContext,
};
use serde_json::Value;
use std::sync::Arc;

/// Globals key of the loaded TLPM library.
pub const GLOBAL_KEY: &str = "tlpm";

/// The TLPM library.
pub trait TlpmLibrary: Send + Sync {
    /// VISA resource names of the connected powermeters.
    fn resource_names(&self) -> PieceResult<Vec<String>>;

    /// Open a session; `Err` carries the TLPM status code.
    fn open(&self, resource: &str) -> Result<Arc<dyn TlpmSession>, i32>;
}

/// An open TLPM session.
pub trait TlpmSession: Send + Sync {
    /// Set the correction wavelength in nm.
    fn set_wavelength(&self, nm: f64) -> PieceResult<()>;
    /// Correction wavelength in nm.
    fn wavelength(&self) -> PieceResult<f64>;
    /// Set the averaging time in seconds.
    fn set_avg_time(&self, seconds: f64) -> PieceResult<()>;
    /// Averaging time in seconds.
    fn avg_time(&self) -> PieceResult<f64>;
    /// Measured power in W.
    fn power(&self) -> PieceResult<f64>;
    /// Dark-current zeroing.
    fn zero(&self) -> PieceResult<()>;
    /// Close the session.
    fn close(&self);
}

/// Shared TLPM library handle.
pub type SharedTlpm = Arc<dyn TlpmLibrary>;

type Session = Arc<Mutex<Option<Arc<dyn TlpmSession>>>>;

/// Powermeter Piece.
pub struct Powermeter {
    ctx: PuzzleContext,
    loader: SdkLoader<SharedTlpm>,
    session: Session,
    device: Parameter<String>,
    connected: Parameter<bool>,
    wavelength: Parameter<f64>,
    avg_time: Parameter<f64>,
    power: Parameter<f64>,
    params: ParameterSet,
    actions: ActionSet,
}

fn open_session(session: &Session) -> PieceResult<Arc<dyn TlpmSession>> {
    session
        .lock()
        .clone()
        .ok_or_else(|| PieceError::not_connected("Powermeter not connected"))
}

fn ensure(ctx: &PuzzleContext, session: &Session) -> PieceResult<()> {
    if ctx.debug() || session.lock().is_some() {
        return Ok(());
    }
    Err(PieceError::not_connected("Powermeter not connected"))
}

fn library(ctx: &PuzzleContext) -> PieceResult<SharedTlpm> {
    ctx.globals()
        .get::<SharedTlpm>(GLOBAL_KEY)
        .ok_or_else(|| PieceError::BackendMissing("TLPM library".into()))
}

impl Powermeter {
    /// Build the Piece.
    pub fn new(ctx: PuzzleContext, loader: SdkLoader<SharedTlpm>) -> Self {
        let debug = ctx.debug();
        let session: Session = Arc::new(Mutex::new(None));

        let device = param::dropdown("device", "");
        let ctx_ = ctx.clone();
        device.set_options_loader(move || {
            let ctx = ctx_.clone();
            async move {
                if ctx.debug() {
                    return Ok(Vec::new());
                }
                let tlpm = library(&ctx)?;
                run_blocking(move || tlpm.resource_names()).await
            }
        });

        let connected = param::connected();
        let (ctx_, session_, device_) = (ctx.clone(), session.clone(), device.clone());
        let (close_ctx, close_session) = (ctx.clone(), session.clone());
        param::wire_connection(
            &connected,
            move || {
                let (ctx, session, device) = (ctx_.clone(), session_.clone(), device_.clone());
                async move {
                    if ctx.debug() {
                        return Ok(());
                    }
                    if let Some(old) = session.lock().take() {
                        old.close();
                    }
                    let tlpm = library(&ctx)?;
                    let resource = device.value();
                    let opened = run_blocking(move || Ok(tlpm.open(&resource))).await?;
                    match opened {
                        Ok(s) => {
                            *session.lock() = Some(s);
                            tracing::info!(device = %device.value(), "powermeter opened");
                            Ok(())
                        }
                        Err(code) => Err(PieceError::hardware(format!(
                            "Powermeter init failed with code {code}"
                        ))),
                    }
                }
            },
            move || {
                let (ctx, session) = (close_ctx.clone(), close_session.clone());
                async move {
                    if ctx.debug() {
                        return Ok(());
                    }
                    if let Some(old) = session.lock().take() {
                        old.close();
                    }
                    Ok(())
                }
            },
        );

        let wavelength = param::spinbox("wavelength", 633.0).with_unit("nm").hidden();
        let (ctx_, session_) = (ctx.clone(), session.clone());
        wavelength.set_setter(move |value: f64| {
            let (ctx, session) = (ctx_.clone(), session_.clone());
            async move {
                ensure(&ctx, &session)?;
                if debug {
                    return Ok(Some(value));
                }
                let s = open_session(&session)?;
                run_blocking(move || s.set_wavelength(value)).await?;
                // read back: the meter keeps its previous value when out of range
                Ok(None)
            }
        });
        let (ctx_, session_, cached) = (ctx.clone(), session.clone(), wavelength.clone());
        wavelength.set_getter(move || {
            let (ctx, session, cached) = (ctx_.clone(), session_.clone(), cached.clone());
            async move {
                ensure(&ctx, &session)?;
                if debug {
                    return Ok(nonzero_or(cached.value(), 500.0));
                }
                let s = open_session(&session)?;
                run_blocking(move || s.wavelength()).await
            }
        });

        let avg_time = param::spinbox("avg_time", 10.0).with_unit("ms").hidden();
        let (ctx_, session_) = (ctx.clone(), session.clone());
        avg_time.set_setter(move |value: f64| {
            let (ctx, session) = (ctx_.clone(), session_.clone());
            async move {
                ensure(&ctx, &session)?;
                if debug {
                    return Ok(Some(value));
                }
                let s = open_session(&session)?;
                run_blocking(move || s.set_avg_time(value * 1e-3)).await?;
                Ok(None)
            }
        });
        let (ctx_, session_, cached) = (ctx.clone(), session.clone(), avg_time.clone());
        avg_time.set_getter(move || {
            let (ctx, session, cached) = (ctx_.clone(), session_.clone(), cached.clone());
            async move {
                ensure(&ctx, &session)?;
                if debug {
                    return Ok(nonzero_or(cached.value(), 1.0));
                }
                let s = open_session(&session)?;
                Ok(run_blocking(move || s.avg_time()).await? * 1e3)
            }
        });

        let power = param::readout("power", 0.0).with_unit("W").with_format("{:.2e}");
        let (ctx_, session_) = (ctx.clone(), session.clone());
        power.set_getter(move || {
            let (ctx, session) = (ctx_.clone(), session_.clone());
            async move {
                ensure(&ctx, &session)?;
                if debug {
                    return Ok(0.0);
                }
                let s = open_session(&session)?;
                run_blocking(move || s.power()).await
            }
        });

        let mut params = ParameterSet::new();
        params.register(device.clone());
        params.register(connected.clone());
        params.register(wavelength.clone());
        params.register(avg_time.clone());
        params.register(power.clone());

        let mut actions = ActionSet::new();
        let (ctx_, session_) = (ctx.clone(), session.clone());
        actions.register(Action::new("Zero", move |_| {
            let (ctx, session) = (ctx_.clone(), session_.clone());
            async move {
                ensure(&ctx, &session)?;
                if debug {
                    return Ok(Value::Null);
                }
                let s = open_session(&session)?;
                run_blocking(move || s.zero()).await?;
                Ok(Value::Null)
            }
        }));

        Self {
            ctx,
            loader,
            session,
            device,
            connected,
            wavelength,
            avg_time,
            power,
            params,
            actions,
        }
    }

    /// Fail with "Powermeter not connected" unless a session is open.
    pub fn ensure(&self) -> PieceResult<()> {
        ensure(&self.ctx, &self.session)
    }

    /// `device` dropdown.
    pub fn device(&self) -> &Parameter<String> {
        &self.device
    }

    /// `connected` checkbox.
    pub fn connected(&self) -> &Parameter<bool> {
        &self.connected
    }

    /// `wavelength` spinbox.
    pub fn wavelength(&self) -> &Parameter<f64> {
        &self.wavelength
    }

    /// `avg_time` spinbox.
    pub fn avg_time(&self) -> &Parameter<f64> {
        &self.avg_time
    }

    /// `power` readout.
    pub fn power(&self) -> &Parameter<f64> {
        &self.power
    }
}

fn nonzero_or(value: f64, fallback: f64) -> f64 {
    if value == 0.0 {
        fallback
    } else {
        value
    }
}

#[async_trait]
impl Piece for Powermeter {
    fn kind(&self) -> &'static str {
        "thorlabs.powermeter"
    }

    fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn actions(&self) -> &ActionSet {
        &self.actions
    }

    async fn setup(&self) -> PieceResult<()> {
        let globals = self.ctx.globals();
        if !globals.contains(GLOBAL_KEY) {
            globals.insert(GLOBAL_KEY, (self.loader)()?);
            tracing::info!("TLPM library loaded");
        }
        Ok(())
    }

    async fn handle_close(&self) -> PieceResult<()> {
        if let Some(session) = self.session.lock().take() {
            session.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTlpm;
    use pzp_core::sdk;

    async fn connected(tlpm: &Arc<MockTlpm>) -> Powermeter {
        let meter = Powermeter::new(
            PuzzleContext::new(false),
            sdk::fixed(tlpm.clone() as SharedTlpm),
        );
        meter.setup().await.unwrap();
        meter.device().set_cached("USB0::0x1313::0x8078::P0012345::INSTR".into()).unwrap();
        meter.connected().set(true).await.unwrap();
        meter
    }

    #[tokio::test]
    async fn test_wavelength_reads_back_clamped_value() {
        let tlpm = Arc::new(MockTlpm::new());
        let meter = connected(&tlpm).await;
        assert_eq!(meter.wavelength().set(800.0).await.unwrap(), 800.0);
        assert_eq!(meter.wavelength().set(5000.0).await.unwrap(), 1100.0);
    }

    #[tokio::test]
    async fn test_avg_time_is_milliseconds() {
        let tlpm = Arc::new(MockTlpm::new());
        let meter = connected(&tlpm).await;
        let stored = meter.avg_time().set(250.0).await.unwrap();
        assert!((stored - 250.0).abs() < 1e-9);
        assert!((tlpm.session().unwrap().avg_time().unwrap() - 0.25).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_power_and_zero() {
        let tlpm = Arc::new(MockTlpm::new());
        let meter = connected(&tlpm).await;
        assert_eq!(meter.power().get_value().await.unwrap(), 1.5e-3);
        assert_eq!(meter.params().require("power").unwrap().display(), "1.50e-03");
        meter.actions().run("Zero", Value::Null).await.unwrap();
        assert_eq!(tlpm.session().unwrap().zeroed(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_code() {
        let tlpm = Arc::new(MockTlpm::failing(-1073807343));
        let meter = Powermeter::new(
            PuzzleContext::new(false),
            sdk::fixed(tlpm.clone() as SharedTlpm),
        );
        meter.setup().await.unwrap();
        let err = meter.connected().set(true).await.unwrap_err();
        assert_eq!(err.to_string(), "Powermeter init failed with code -1073807343");
        assert_eq!(
            meter.ensure().unwrap_err().to_string(),
            "Powermeter not connected"
        );
    }

    #[tokio::test]
    async fn test_debug_defaults() {
        let meter = Powermeter::new(PuzzleContext::new(true), sdk::unavailable("TLPM", None));
        assert_eq!(meter.power().get_value().await.unwrap(), 0.0);
        assert_eq!(meter.avg_time().get_value().await.unwrap(), 10.0);
        meter.wavelength().set_cached(0.0).unwrap();
        assert_eq!(meter.wavelength().get_value().await.unwrap(), 500.0);
    }
}
