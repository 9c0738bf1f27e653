//! Thorlabs APT plumbing shared by the stage and piezo Pieces.
//!
//! The APT library is loaded once per puzzle and stored in the globals under
//! [`GLOBAL_KEY`]. Cleaning it up removes the global, and because APT cannot
//! keep individual devices alive past a cleanup, every APT Piece in the
//! puzzle is marked disconnected when that happens.

use parking_lot::Mutex;
use pzp_core::sdk::{run_blocking, SdkLoader};
use pzp_core::{param, Action, ActionSet, Parameter, ParameterSet, PieceError, PieceResult, PuzzleContext};
use serde_json::Value;
use std::sync::Arc;

/// Globals key of the loaded APT library.
pub const GLOBAL_KEY: &str = "apt";

/// The APT library.
///
/// Piezo calls mirror the raw `PZMOT_*` entry points and return the APT
/// error code, 0 meaning success.
pub trait AptLibrary: Send + Sync {
    /// (hardware type, serial number) of every device APT can see.
    fn list_available_devices(&self) -> PieceResult<Vec<(u32, i64)>>;

    /// Open a motor controller.
    fn open_motor(&self, serial: i64) -> PieceResult<Arc<dyn AptMotor>>;

    /// `InitHWDevice`.
    fn init_hw_device(&self, serial: i64) -> i32;

    /// `PZMOT_SetChannel`.
    fn pz_set_channel(&self, serial: i64, channel: i64) -> i32;

    /// `PZMOT_MoveAbsoluteStepsEx`.
    fn pz_move_absolute_steps(&self, serial: i64, steps: i64, wait: bool) -> i32;

    /// `PZMOT_GetPositionSteps`.
    fn pz_get_position_steps(&self, serial: i64) -> Result<i64, i32>;

    /// Human-readable text for an APT error code.
    fn error_text(&self, code: i32) -> String;

    /// Release every device and unload.
    fn cleanup(&self);
}

/// An open APT motor controller.
pub trait AptMotor: Send + Sync {
    /// Move to an absolute position.
    fn move_to(&self, position: f64, blocking: bool) -> PieceResult<()>;

    /// Current position.
    fn position(&self) -> PieceResult<f64>;

    /// Home the stage.
    fn move_home(&self, blocking: bool) -> PieceResult<()>;

    /// Blink the controller's front panel.
    fn identify(&self) -> PieceResult<()>;
}

/// Shared APT library handle.
pub type SharedApt = Arc<dyn AptLibrary>;

/// What a connected APT Piece holds on to.
#[derive(Clone)]
pub enum AptLink {
    /// A motor opened through the APT motor API.
    Motor(Arc<dyn AptMotor>),
    /// A piezo controller addressed by serial number through `PZMOT_*`.
    Piezo(i64),
}

/// How `connected` opens the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AptDevice {
    /// Open a motor.
    Stage,
    /// `InitHWDevice` a piezo controller.
    Piezo,
}

/// `serial` dropdown, `connected` checkbox, ensurer and cleanup shared by
/// APT Pieces.
#[derive(Clone)]
pub struct AptBase {
    ctx: PuzzleContext,
    loader: SdkLoader<SharedApt>,
    serial: Parameter<String>,
    connected: Parameter<bool>,
    link: Arc<Mutex<Option<AptLink>>>,
}

impl AptBase {
    /// Build the shared parameters for a device opened as `device`.
    pub fn new(ctx: PuzzleContext, loader: SdkLoader<SharedApt>, device: AptDevice) -> Self {
        let base = Self {
            ctx,
            loader,
            serial: param::dropdown("serial", ""),
            connected: param::connected(),
            link: Arc::new(Mutex::new(None)),
        };
        base.wire(device);
        base
    }

    fn wire(&self, device: AptDevice) {
        let base = self.clone();
        self.serial.set_options_loader(move || {
            let base = base.clone();
            async move {
                if base.ctx.debug() {
                    return Ok(Vec::new());
                }
                let apt = base.library()?;
                let devices = run_blocking(move || apt.list_available_devices()).await?;
                Ok(devices.into_iter().map(|(_, serial)| serial.to_string()).collect())
            }
        });

        let (open, close) = (self.clone(), self.clone());
        param::wire_connection(
            &self.connected,
            move || {
                let base = open.clone();
                async move {
                    match device {
                        AptDevice::Stage => base.connect_motor().await,
                        AptDevice::Piezo => base.connect_piezo().await,
                    }
                }
            },
            move || {
                let base = close.clone();
                async move { base.disconnect() }
            },
        );

        let (connected, link) = (self.connected.clone(), self.link.clone());
        self.ctx.globals().on_deleted(move |key| {
            if key == GLOBAL_KEY {
                link.lock().take();
                connected.inner().replace(false);
            }
        });
    }

    /// Load the APT library into the globals unless it is already there.
    pub fn ensure_apt(&self) -> PieceResult<SharedApt> {
        let globals = self.ctx.globals();
        if let Some(apt) = globals.get::<SharedApt>(GLOBAL_KEY) {
            return Ok(apt);
        }
        let apt = (self.loader)()?;
        globals.insert(GLOBAL_KEY, apt.clone());
        tracing::info!("APT library loaded");
        Ok(apt)
    }

    /// Loaded library, or "Motor not connected".
    pub fn library(&self) -> PieceResult<SharedApt> {
        self.ctx
            .globals()
            .get::<SharedApt>(GLOBAL_KEY)
            .ok_or_else(|| PieceError::not_connected("Motor not connected"))
    }

    async fn serial_number(&self) -> PieceResult<i64> {
        self.serial
            .get_value()
            .await?
            .trim()
            .parse()
            .map_err(|_| PieceError::hardware("Motor serial number is not a valid integer"))
    }

    async fn connect_motor(&self) -> PieceResult<()> {
        if self.ctx.debug() {
            return Ok(());
        }
        let apt = self.ensure_apt()?;
        let serial = self.serial_number().await?;
        let motor = run_blocking(move || apt.open_motor(serial)).await?;
        *self.link.lock() = Some(AptLink::Motor(motor));
        tracing::info!(serial, "APT motor opened");
        Ok(())
    }

    async fn connect_piezo(&self) -> PieceResult<()> {
        if self.ctx.debug() {
            return Ok(());
        }
        let apt = self.ensure_apt()?;
        let serial = self.serial_number().await?;
        let code = {
            let apt = apt.clone();
            run_blocking(move || Ok(apt.init_hw_device(serial))).await?
        };
        if code != 0 {
            return Err(PieceError::hardware(format!(
                "Failed to connect to piezo: {}",
                apt.error_text(code)
            )));
        }
        *self.link.lock() = Some(AptLink::Piezo(serial));
        tracing::info!(serial, "APT piezo initialised");
        Ok(())
    }

    fn disconnect(&self) -> PieceResult<()> {
        if self.ctx.debug() {
            return Ok(());
        }
        self.link.lock().take();
        self.cleanup();
        Ok(())
    }

    /// Unload APT and remove the global. Every APT Piece in the puzzle ends
    /// up disconnected.
    pub fn cleanup(&self) {
        let globals = self.ctx.globals();
        if let Some(apt) = globals.get::<SharedApt>(GLOBAL_KEY) {
            apt.cleanup();
            globals.remove(GLOBAL_KEY);
            tracing::info!("APT library cleaned up");
        }
    }

    /// Fail with "Motor not connected" unless APT is loaded and this Piece
    /// holds a device. Always passes in debug mode.
    pub fn ensure(&self) -> PieceResult<()> {
        if self.ctx.debug() {
            return Ok(());
        }
        if self.ctx.globals().contains(GLOBAL_KEY) && self.link.lock().is_some() {
            return Ok(());
        }
        Err(PieceError::not_connected("Motor not connected"))
    }

    /// The open motor.
    pub fn motor(&self) -> PieceResult<Arc<dyn AptMotor>> {
        self.ensure()?;
        match self.link.lock().as_ref() {
            Some(AptLink::Motor(motor)) => Ok(motor.clone()),
            _ => Err(PieceError::not_connected("Motor not connected")),
        }
    }

    /// Serial number of the initialised piezo controller.
    pub fn piezo(&self) -> PieceResult<i64> {
        self.ensure()?;
        match self.link.lock().as_ref() {
            Some(AptLink::Piezo(serial)) => Ok(*serial),
            _ => Err(PieceError::not_connected("Motor not connected")),
        }
    }

    /// Whether the puzzle is in debug mode.
    pub fn debug(&self) -> bool {
        self.ctx.debug()
    }

    /// `serial` dropdown.
    pub fn serial(&self) -> &Parameter<String> {
        &self.serial
    }

    /// `connected` checkbox.
    pub fn connected(&self) -> &Parameter<bool> {
        &self.connected
    }

    /// Register `serial` and `connected`.
    pub fn register_params(&self, params: &mut ParameterSet) {
        params.register(self.serial.clone());
        params.register(self.connected.clone());
    }

    /// Register the hidden `Cleanup` action.
    pub fn register_actions(&self, actions: &mut ActionSet) {
        let base = self.clone();
        actions.register(
            Action::new("Cleanup", move |_| {
                base.cleanup();
                async { Ok(Value::Null) }
            })
            .hidden(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockApt;
    use pzp_core::sdk;

    fn base(ctx: &PuzzleContext, apt: &Arc<MockApt>, device: AptDevice) -> AptBase {
        AptBase::new(ctx.clone(), sdk::fixed(apt.clone() as SharedApt), device)
    }

    #[tokio::test]
    async fn test_connect_requires_integer_serial() {
        let ctx = PuzzleContext::new(false);
        let apt = Arc::new(MockApt::new());
        let base = base(&ctx, &apt, AptDevice::Stage);
        base.serial().set_cached("abc".into()).unwrap();
        let err = base.connected().set(true).await.unwrap_err();
        assert_eq!(err.to_string(), "Motor serial number is not a valid integer");
        assert!(!base.connected().value());
        assert_eq!(
            base.ensure().unwrap_err().to_string(),
            "Motor not connected"
        );
    }

    #[tokio::test]
    async fn test_cleanup_disconnects_every_apt_piece() {
        let ctx = PuzzleContext::new(false);
        let apt = Arc::new(MockApt::new());
        let first = base(&ctx, &apt, AptDevice::Stage);
        let second = base(&ctx, &apt, AptDevice::Stage);
        first.serial().set_cached("83000001".into()).unwrap();
        second.serial().set_cached("83000002".into()).unwrap();
        first.connected().set(true).await.unwrap();
        second.connected().set(true).await.unwrap();
        assert!(second.ensure().is_ok());

        first.connected().set(false).await.unwrap();
        assert!(!ctx.globals().contains(GLOBAL_KEY));
        assert!(!second.connected().value());
        assert!(second.ensure().is_err());
        assert_eq!(apt.cleanups(), 1);
    }

    #[tokio::test]
    async fn test_serial_options_list_devices() {
        let ctx = PuzzleContext::new(false);
        let apt = Arc::new(MockApt::new());
        let base = base(&ctx, &apt, AptDevice::Stage);
        base.ensure_apt().unwrap();
        assert_eq!(
            base.serial().refresh_options().await.unwrap(),
            vec!["83000001".to_string(), "83000002".to_string()]
        );
    }

    #[tokio::test]
    async fn test_debug_skips_library() {
        let ctx = PuzzleContext::new(true);
        let base = AptBase::new(ctx.clone(), sdk::unavailable("APT", None), AptDevice::Stage);
        assert!(base.connected().set(true).await.unwrap());
        assert!(base.ensure().is_ok());
        assert!(!ctx.globals().contains(GLOBAL_KEY));
    }
}
