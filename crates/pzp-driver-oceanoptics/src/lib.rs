//! Ocean Optics Pieces.
//!
//! [`Spectrometer`] reads spectra through the [`spectrometer::SeaBreeze`]
//! trait. `simulate = true` uses [`mock::MockSeaBreeze`] with one
//! `USB2000PLUS:FLMS12345` attached.

pub mod mock;
pub mod spectrometer;

pub use spectrometer::Spectrometer;

use anyhow::Result;
use futures::future::BoxFuture;
use pzp_core::factory::{parse_settings, BuildContext, PieceFactory};
use pzp_core::{sdk, Piece};
use serde::Deserialize;
use spectrometer::SharedSeaBreeze;
use std::sync::Arc;

/// Settings of `oceanoptics.spectrometer`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpectrometerSettings {
    /// Use the in-memory library.
    #[serde(default)]
    pub simulate: bool,
    /// Preselected device descriptor.
    #[serde(default)]
    pub device: Option<String>,
}

/// Factory for [`Spectrometer`].
pub struct SpectrometerFactory;

impl PieceFactory for SpectrometerFactory {
    fn kind(&self) -> &'static str {
        "oceanoptics.spectrometer"
    }

    fn name(&self) -> &'static str {
        "Ocean Optics spectrometer"
    }

    fn validate(&self, settings: &toml::Value) -> Result<()> {
        let settings: SpectrometerSettings = parse_settings(self.kind(), settings)?;
        if let Some(device) = &settings.device {
            spectrometer::serial_from_descriptor(device)?;
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
            let settings: SpectrometerSettings = parse_settings(kind, &settings)?;
            let loader = if settings.simulate {
                sdk::fixed(Arc::new(mock::MockSeaBreeze::default()) as SharedSeaBreeze)
            } else {
                sdk::unavailable("SeaBreeze", ctx.sdk_dir("seabreeze"))
            };
            let piece = Spectrometer::new(ctx.puzzle, loader);
            if let Some(device) = settings.device {
                piece.spectrometer().set_cached(device)?;
            }
            Ok(Arc::new(piece) as Arc<dyn Piece>)
        })
    }
}

/// Force the linker to include this crate.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<SpectrometerFactory>());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pzp_core::factory::empty_settings;

    #[test]
    fn test_link_does_not_panic() {
        link();
    }

    #[test]
    fn test_settings() {
        let factory = SpectrometerFactory;
        assert!(factory.validate(&empty_settings()).is_ok());
        let device = toml::Value::Table(toml::toml! {
            device = "<SeaBreezeDevice USB2000PLUS:FLMS12345>"
        });
        assert!(factory.validate(&device).is_ok());
        let bad = toml::Value::Table(toml::toml! { device = "FLMS12345" });
        assert!(factory.validate(&bad).is_err());
    }
}
