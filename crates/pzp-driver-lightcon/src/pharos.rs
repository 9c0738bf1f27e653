//! Pharos femtosecond laser.
//!
//! Talks to the Pharos REST API. On older systems this is served by the
//! control app (usually `http://127.0.0.1:20022`); newer systems serve it
//! from the laser controller itself.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use pzp_core::factory::{parse_settings, BuildContext, PieceFactory};
use pzp_core::http::HttpBase;
use pzp_core::{param, Action, ActionSet, Parameter, ParameterSet, Piece, PieceError, PuzzleContext};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// API prefix.
pub const API: &str = "/v0";
/// Default REST address.
pub const DEFAULT_ADDRESS: &str = "http://127.0.0.1:20022";

/// Pharos laser Piece.
pub struct Pharos {
    http: HttpBase,
    full_state: Parameter<String>,
    state: Parameter<String>,
    output: Parameter<bool>,
    divider: Parameter<i64>,
    params: ParameterSet,
    actions: ActionSet,
}

impl Pharos {
    /// Build the Piece.
    pub fn new(ctx: PuzzleContext) -> Self {
        let debug = ctx.debug();
        let http = HttpBase::new(DEFAULT_ADDRESS, API);

        let full_state = param::readout("full_state", String::new()).hidden();
        let http_ = http.clone();
        full_state.set_getter(move || {
            let http = http_.clone();
            async move {
                if debug {
                    return Ok(String::new());
                }
                let basic = http.get("/Basic").await?.json()?;
                Ok(serde_json::to_string(&basic)?.replace(',', ",\n"))
            }
        });

        let state = param::readout("state", String::new());
        let http_ = http.clone();
        state.set_getter(move || {
            let http = http_.clone();
            async move {
                if debug {
                    return Ok(String::new());
                }
                let basic = http.get("/Basic").await?.json()?;
                match basic.get("GeneralStatus") {
                    Some(Value::String(status)) => Ok(status.clone()),
                    Some(other) => Ok(other.to_string()),
                    None => Err(PieceError::Protocol {
                        device: "Pharos".into(),
                        response: basic.to_string(),
                    }),
                }
            }
        });

        let output = param::checkbox("output", false);
        let http_ = http.clone();
        output.set_setter(move |value: bool| {
            let http = http_.clone();
            async move {
                if debug {
                    return Ok(Some(value));
                }
                let path = if value {
                    "/Basic/EnableOutput"
                } else {
                    "/Basic/CloseOutput"
                };
                http.post(path).await?;
                Ok(Some(value))
            }
        });
        let (http_, cached) = (http.clone(), output.clone());
        output.set_getter(move || {
            let (http, cached) = (http_.clone(), cached.clone());
            async move {
                if debug {
                    return Ok(cached.value());
                }
                let r = http.get("/Basic/IsOutputEnabled").await?;
                Ok(r.text().trim() == "true")
            }
        });

        let divider = param::spinbox("divider", 1i64).with_min(1);
        let http_ = http.clone();
        divider.set_setter(move |value: i64| {
            let http = http_.clone();
            async move {
                if debug {
                    return Ok(Some(value));
                }
                http.put("/Basic/TargetPpDivider", value.to_string()).await?;
                Ok(Some(value))
            }
        });
        let http_ = http.clone();
        divider.set_getter(move || {
            let http = http_.clone();
            async move {
                if debug {
                    return Ok(1);
                }
                let r = http.get("/Basic/TargetPpDivider").await?;
                r.text().trim().parse::<i64>().map_err(|_| PieceError::Protocol {
                    device: "Pharos".into(),
                    response: r.text().to_string(),
                })
            }
        });

        let mut params = ParameterSet::new();
        params.register(http.address().clone());
        params.register(full_state.clone());
        params.register(state.clone());
        params.register(output.clone());
        params.register(divider.clone());

        let mut actions = ActionSet::new();
        let full = full_state.clone();
        actions.register(Action::new("Full state", move |_| {
            let full = full.clone();
            async move {
                let state = full.get_value().await?;
                tracing::info!(target: "pharos", "{state}");
                Ok(Value::String(state))
            }
        }));
        let http_ = http.clone();
        actions.register(Action::new("Standby", move |_| {
            let http = http_.clone();
            async move {
                if debug {
                    return Ok(Value::Null);
                }
                http.post("/Basic/GoToStandby").await?;
                tracing::info!("Pharos going to standby");
                Ok(Value::Null)
            }
        }));

        Self {
            http,
            full_state,
            state,
            output,
            divider,
            params,
            actions,
        }
    }

    /// Set the REST address without contacting the laser.
    pub fn set_address(&self, address: impl Into<String>) {
        // the address param has no validator, this cannot fail
        let _ = self.http.address().set_cached(address.into());
    }

    /// `full_state` readout.
    pub fn full_state(&self) -> &Parameter<String> {
        &self.full_state
    }

    /// `state` readout.
    pub fn state(&self) -> &Parameter<String> {
        &self.state
    }

    /// `output` checkbox.
    pub fn output(&self) -> &Parameter<bool> {
        &self.output
    }

    /// `divider` spinbox.
    pub fn divider(&self) -> &Parameter<i64> {
        &self.divider
    }
}

#[async_trait]
impl Piece for Pharos {
    fn kind(&self) -> &'static str {
        "lightcon.pharos"
    }

    fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn actions(&self) -> &ActionSet {
        &self.actions
    }
}

/// Settings accepted by [`PharosFactory`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpPieceSettings {
    /// REST address overriding the default.
    #[serde(default)]
    pub address: Option<String>,
}

impl HttpPieceSettings {
    pub(crate) fn check(&self) -> Result<()> {
        if let Some(address) = &self.address {
            if !(address.starts_with("http://") || address.starts_with("https://")) {
                anyhow::bail!("'address' must start with http:// or https://, got '{address}'");
            }
        }
        Ok(())
    }
}

/// Factory for [`Pharos`].
pub struct PharosFactory;

impl PieceFactory for PharosFactory {
    fn kind(&self) -> &'static str {
        "lightcon.pharos"
    }

    fn name(&self) -> &'static str {
        "Light Conversion Pharos laser"
    }

    fn validate(&self, settings: &toml::Value) -> Result<()> {
        parse_settings::<HttpPieceSettings>(self.kind(), settings)?.check()
    }

    fn build(
        &self,
        ctx: BuildContext,
        settings: toml::Value,
    ) -> BoxFuture<'static, Result<Arc<dyn Piece>>> {
        let kind = self.kind();
        Box::pin(async move {
            let settings: HttpPieceSettings = parse_settings(kind, &settings)?;
            let piece = Pharos::new(ctx.puzzle);
            if let Some(address) = settings.address {
                piece.set_address(address);
            }
            Ok(Arc::new(piece) as Arc<dyn Piece>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pzp_core::factory::empty_settings;

    #[tokio::test]
    async fn test_debug_values() {
        let pharos = Pharos::new(PuzzleContext::new(true));
        assert_eq!(pharos.state().get_value().await.unwrap(), "");
        assert_eq!(pharos.divider().get_value().await.unwrap(), 1);
        assert_eq!(pharos.divider().set(4).await.unwrap(), 4);
        assert!(pharos.output().set(true).await.unwrap());
        assert!(pharos.output().get_value().await.unwrap());
        assert_eq!(
            pharos.actions().run("Standby", Value::Null).await.unwrap(),
            Value::Null
        );
    }

    #[tokio::test]
    async fn test_divider_minimum() {
        let pharos = Pharos::new(PuzzleContext::new(true));
        assert!(pharos.divider().set(0).await.is_err());
    }

    #[test]
    fn test_param_layout() {
        let pharos = Pharos::new(PuzzleContext::new(true));
        assert_eq!(
            pharos.params().names(),
            vec!["address", "full_state", "state", "output", "divider"]
        );
        assert!(!pharos.full_state().metadata().visible);
        assert_eq!(pharos.actions().names(), vec!["Full state", "Standby"]);
    }

    #[test]
    fn test_factory_validation() {
        let factory = PharosFactory;
        assert!(factory.validate(&empty_settings()).is_ok());
        let good = toml::Value::Table(toml::toml! { address = "http://10.0.0.5:20022" });
        assert!(factory.validate(&good).is_ok());
        let bad = toml::Value::Table(toml::toml! { address = "10.0.0.5" });
        assert!(factory.validate(&bad).is_err());
        let unknown = toml::Value::Table(toml::toml! { port = 5 });
        assert!(factory.validate(&unknown).is_err());
    }
}
