//! SC10 shutter controller.
//!
//! Commands are `\r` terminated and the controller echoes each one before
//! replying. `ens?` reports the shutter state as `0` or `1`, `ens` toggles it.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use pzp_core::factory::{parse_settings, BuildContext, PieceFactory};
use pzp_core::serial::SerialBase;
use pzp_core::{
    param, Action, ActionSet, Parameter, ParameterSet, Piece, PieceError, PieceResult,
    PuzzleContext,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const TERMINATOR: u8 = b'\r';

/// SC10 shutter Piece.
pub struct Sc10 {
    serial: SerialBase,
    open: Parameter<bool>,
    params: ParameterSet,
    actions: ActionSet,
}

async fn read_state(serial: &SerialBase) -> PieceResult<bool> {
    let replies = serial.query_lines(b"ens?\r", TERMINATOR, 2).await?;
    match replies[1].first() {
        Some(b'0') => Ok(false),
        Some(b'1') => Ok(true),
        _ => Err(PieceError::Protocol {
            device: "SC10".into(),
            response: String::from_utf8_lossy(&replies[1]).into_owned(),
        }),
    }
}

impl Sc10 {
    /// Build the Piece.
    pub fn new(ctx: PuzzleContext) -> Self {
        let debug = ctx.debug();
        let serial = SerialBase::new(ctx, "Shutter");

        let open = param::checkbox("open", false);
        let serial_ = serial.clone();
        open.set_setter(move |value: bool| {
            let serial = serial_.clone();
            async move {
                serial.ensure().await?;
                if debug {
                    return Ok(Some(value));
                }
                if read_state(&serial).await? != value {
                    // toggle, then drop the echo
                    serial.query(b"ens\r", TERMINATOR).await?;
                }
                Ok(Some(value))
            }
        });
        let (serial_, cached) = (serial.clone(), open.clone());
        open.set_getter(move || {
            let (serial, cached) = (serial_.clone(), cached.clone());
            async move {
                serial.ensure().await?;
                if debug {
                    return Ok(cached.value());
                }
                read_state(&serial).await
            }
        });

        let mut params = ParameterSet::new();
        params.register(serial.port().clone());
        params.register(serial.connected().clone());
        params.register(open.clone());

        let mut actions = ActionSet::new();
        let toggle = open.clone();
        actions.register(
            Action::new("Close shutter", move |_| {
                let open = toggle.clone();
                async move {
                    let state = open.set(!open.value()).await?;
                    Ok(Value::Bool(state))
                }
            })
            .with_shortcut("F4")
            .hidden(),
        );

        Self {
            serial,
            open,
            params,
            actions,
        }
    }

    /// Serial plumbing, for attaching a port directly.
    pub fn serial(&self) -> &SerialBase {
        &self.serial
    }

    /// `open` checkbox.
    pub fn open(&self) -> &Parameter<bool> {
        &self.open
    }
}

#[async_trait]
impl Piece for Sc10 {
    fn kind(&self) -> &'static str {
        "thorlabs.sc10"
    }

    fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn actions(&self) -> &ActionSet {
        &self.actions
    }

    async fn handle_close(&self) -> PieceResult<()> {
        if self.serial.connected().value() {
            self.serial.connected().set(false).await?;
        }
        Ok(())
    }
}

/// Settings accepted by [`Sc10Factory`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerialPieceSettings {
    /// Serial port to preselect, e.g. `"COM3"` or `"/dev/ttyUSB0"`.
    #[serde(default)]
    pub port: Option<String>,
}

/// Factory for [`Sc10`].
pub struct Sc10Factory;

impl PieceFactory for Sc10Factory {
    fn kind(&self) -> &'static str {
        "thorlabs.sc10"
    }

    fn name(&self) -> &'static str {
        "Thorlabs SC10 shutter controller"
    }

    fn validate(&self, settings: &toml::Value) -> Result<()> {
        let settings: SerialPieceSettings = parse_settings(self.kind(), settings)?;
        if settings.port.as_deref() == Some("") {
            anyhow::bail!("'port' must not be empty");
        }
        Ok(())
    }

    fn build(
        &self,
        ctx: BuildContext,
        settings: toml::Value,
    ) -> BoxFuture<'static, Result<Arc<dyn Piece>>> {
        let kind = self.kind();
        Box::pin(async move {
            let settings: SerialPieceSettings = parse_settings(kind, &settings)?;
            let piece = Sc10::new(ctx.puzzle);
            if let Some(port) = settings.port {
                piece.serial().port().set_cached(port)?;
            }
            Ok(Arc::new(piece) as Arc<dyn Piece>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_debug_echoes_and_toggles() {
        let sc10 = Sc10::new(PuzzleContext::new(true));
        assert!(sc10.open().set(true).await.unwrap());
        assert!(sc10.open().get_value().await.unwrap());

        let close = sc10.actions().get("Close shutter").unwrap();
        assert_eq!(close.shortcut(), Some("F4"));
        assert!(!close.is_visible());
        assert_eq!(close.run(Value::Null).await.unwrap(), Value::Bool(false));
        assert!(!sc10.open().value());
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let sc10 = Sc10::new(PuzzleContext::new(false));
        let err = sc10.open().set(true).await.unwrap_err();
        assert_eq!(err.to_string(), "Shutter not connected");
        assert!(!sc10.open().value());
    }

    #[test]
    fn test_param_layout() {
        let sc10 = Sc10::new(PuzzleContext::new(true));
        assert_eq!(sc10.params().names(), vec!["port", "connected", "open"]);
    }

    #[test]
    fn test_factory_validation() {
        let factory = Sc10Factory;
        let good = toml::Value::Table(toml::toml! { port = "COM3" });
        assert!(factory.validate(&good).is_ok());
        let empty = toml::Value::Table(toml::toml! { port = "" });
        assert!(factory.validate(&empty).is_err());
    }
}
