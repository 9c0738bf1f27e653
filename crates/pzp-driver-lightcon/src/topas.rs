//! Topas optical parametric amplifier.
//!
//! The Topas Server address ends with the OPA's serial number, e.g.
//! `http://127.0.0.1:8000/12030`.

use crate::pharos::HttpPieceSettings;
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use pzp_core::factory::{parse_settings, BuildContext, PieceFactory};
use pzp_core::http::HttpBase;
use pzp_core::{param, Action, ActionSet, Parameter, ParameterSet, Piece, PieceError, PuzzleContext};
use serde_json::{json, Value};
use std::sync::Arc;

/// API prefix.
pub const API: &str = "/v0/PublicAPI";
/// Default Topas Server address.
pub const DEFAULT_ADDRESS: &str = "http://127.0.0.1:8000/12030";

/// Topas OPA Piece.
pub struct Topas {
    http: HttpBase,
    wl: Parameter<f64>,
    shutter: Parameter<bool>,
    params: ParameterSet,
    actions: ActionSet,
}

impl Topas {
    /// Build the Piece.
    pub fn new(ctx: PuzzleContext) -> Self {
        let debug = ctx.debug();
        let http = HttpBase::new(DEFAULT_ADDRESS, API);

        let wl = param::spinbox("wl", 633.0).with_unit("nm");
        let http_ = http.clone();
        wl.set_setter(move |value: f64| {
            let http = http_.clone();
            async move {
                if debug {
                    return Ok(Some(value));
                }
                let body = json!({ "Interaction": "*", "Wavelength": value });
                http.put_json("/Optical/WavelengthControl/SetWavelength", &body)
                    .await?;
                Ok(Some(value))
            }
        });
        let http_ = http.clone();
        wl.set_getter(move || {
            let http = http_.clone();
            async move {
                if debug {
                    return Ok(633.0);
                }
                let r = http.get("/Optical/WavelengthControl/Output/Wavelength").await?;
                r.text().trim().parse::<f64>().map_err(|_| PieceError::Protocol {
                    device: "Topas".into(),
                    response: r.text().to_string(),
                })
            }
        });

        let shutter = param::checkbox("shutter", false);
        let http_ = http.clone();
        shutter.set_setter(move |value: bool| {
            let http = http_.clone();
            async move {
                if debug {
                    return Ok(Some(value));
                }
                let endpoint = if value { "/OpenShutter" } else { "/CloseShutter" };
                http.put(&format!("/ShutterInterlock{endpoint}"), "").await?;
                Ok(Some(value))
            }
        });
        let http_ = http.clone();
        shutter.set_getter(move || {
            let http = http_.clone();
            async move {
                if debug {
                    return Ok(true);
                }
                let r = http.get("/ShutterInterlock/IsShutterOpen").await?;
                Ok(r.text().trim() == "true")
            }
        });

        let mut params = ParameterSet::new();
        params.register(http.address().clone());
        params.register(wl.clone());
        params.register(shutter.clone());

        let mut actions = ActionSet::new();
        let close = shutter.clone();
        actions.register(
            Action::new("Close shutter", move |_| {
                let shutter = close.clone();
                async move {
                    shutter.set(false).await?;
                    Ok(Value::Null)
                }
            })
            .with_shortcut("F5")
            .hidden(),
        );

        Self {
            http,
            wl,
            shutter,
            params,
            actions,
        }
    }

    /// Set the server address without contacting the OPA.
    pub fn set_address(&self, address: impl Into<String>) {
        let _ = self.http.address().set_cached(address.into());
    }

    /// `wl` spinbox.
    pub fn wl(&self) -> &Parameter<f64> {
        &self.wl
    }

    /// `shutter` checkbox.
    pub fn shutter(&self) -> &Parameter<bool> {
        &self.shutter
    }
}

#[async_trait]
impl Piece for Topas {
    fn kind(&self) -> &'static str {
        "lightcon.topas"
    }

    fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn actions(&self) -> &ActionSet {
        &self.actions
    }
}

/// Factory for [`Topas`].
pub struct TopasFactory;

impl PieceFactory for TopasFactory {
    fn kind(&self) -> &'static str {
        "lightcon.topas"
    }

    fn name(&self) -> &'static str {
        "Light Conversion Topas OPA"
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
            let piece = Topas::new(ctx.puzzle);
            if let Some(address) = settings.address {
                piece.set_address(address);
            }
            Ok(Arc::new(piece) as Arc<dyn Piece>)
        })
    }
}
