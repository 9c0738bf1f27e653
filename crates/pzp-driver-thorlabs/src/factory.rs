//! Factories for the SDK-backed Thorlabs Pieces.
//!
//! Every SDK Piece accepts `simulate = true`, which swaps the native SDK for
//! the in-memory one from [`crate::mock`]. Without it the Piece expects a
//! native binding for the vendor's SDK directory, and `setup` fails with a
//! "not available" error when there is none.

use crate::apt::{self, SharedApt};
use crate::apt_piezo::{AptPiezo, PiezoLayout};
use crate::apt_stage::AptStage;
use crate::camera::{self, Camera, CameraVariant, SharedTlc};
use crate::mock::{MockApt, MockTlcSdk, MockTlpm};
use crate::powermeter::{self, Powermeter, SharedTlpm};
use anyhow::Result;
use futures::future::BoxFuture;
use pzp_core::factory::parse_settings;
use pzp_core::sdk::{self, SdkLoader};
use pzp_core::{BuildContext, Piece, PieceFactory};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

fn apt_loader(ctx: &BuildContext, simulate: bool) -> SdkLoader<SharedApt> {
    if simulate {
        sdk::fixed(Arc::new(MockApt::new()) as SharedApt)
    } else {
        sdk::unavailable("Thorlabs APT", ctx.sdk_dir(apt::GLOBAL_KEY))
    }
}

fn check_serial(serial: &Option<String>) -> Result<()> {
    if let Some(serial) = serial {
        if serial.parse::<i64>().is_err() {
            anyhow::bail!("'serial' must be an integer, got '{serial}'");
        }
    }
    Ok(())
}

/// Settings of `thorlabs.apt_stage`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AptStageSettings {
    /// Use the in-memory APT library.
    #[serde(default)]
    pub simulate: bool,
    /// Motor serial number to preselect.
    #[serde(default)]
    pub serial: Option<String>,
}

/// Factory for [`AptStage`].
pub struct AptStageFactory;

impl PieceFactory for AptStageFactory {
    fn kind(&self) -> &'static str {
        "thorlabs.apt_stage"
    }

    fn name(&self) -> &'static str {
        "Thorlabs APT motorised stage"
    }

    fn validate(&self, settings: &toml::Value) -> Result<()> {
        let settings: AptStageSettings = parse_settings(self.kind(), settings)?;
        check_serial(&settings.serial)
    }

    fn build(
        &self,
        ctx: BuildContext,
        settings: toml::Value,
    ) -> BoxFuture<'static, Result<Arc<dyn Piece>>> {
        let kind = self.kind();
        Box::pin(async move {
            let settings: AptStageSettings = parse_settings(kind, &settings)?;
            let piece = AptStage::new(ctx.puzzle.clone(), apt_loader(&ctx, settings.simulate));
            if let Some(serial) = settings.serial {
                piece.base().serial().set_cached(serial)?;
            }
            Ok(Arc::new(piece) as Arc<dyn Piece>)
        })
    }
}

/// One custom piezo axis.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelSetting {
    /// Parameter name.
    pub name: String,
    /// Controller channel.
    pub channel: i64,
}

/// Settings of `thorlabs.apt_piezo`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AptPiezoSettings {
    /// Use the in-memory APT library.
    #[serde(default)]
    pub simulate: bool,
    /// Controller serial number to preselect.
    #[serde(default)]
    pub serial: Option<String>,
    /// Stock axis layout, ignored when `channels` is given.
    #[serde(default)]
    pub layout: PiezoLayout,
    /// Custom axes.
    #[serde(default)]
    pub channels: Option<Vec<ChannelSetting>>,
}

impl AptPiezoSettings {
    fn check(&self) -> Result<()> {
        check_serial(&self.serial)?;
        let Some(channels) = &self.channels else {
            return Ok(());
        };
        if channels.is_empty() {
            anyhow::bail!("'channels' must not be empty");
        }
        let mut names = HashSet::new();
        for ch in channels {
            if ch.channel < 0 {
                anyhow::bail!("channel of '{}' must not be negative", ch.name);
            }
            if matches!(ch.name.as_str(), "serial" | "connected") || !names.insert(&ch.name) {
                anyhow::bail!("duplicate parameter name '{}'", ch.name);
            }
        }
        Ok(())
    }

    fn axes(&self) -> Vec<(String, i64)> {
        match &self.channels {
            Some(channels) => channels
                .iter()
                .map(|ch| (ch.name.clone(), ch.channel))
                .collect(),
            None => self.layout.channels(),
        }
    }
}

/// Factory for [`AptPiezo`].
pub struct AptPiezoFactory;

impl PieceFactory for AptPiezoFactory {
    fn kind(&self) -> &'static str {
        "thorlabs.apt_piezo"
    }

    fn name(&self) -> &'static str {
        "Thorlabs APT piezo controller"
    }

    fn validate(&self, settings: &toml::Value) -> Result<()> {
        parse_settings::<AptPiezoSettings>(self.kind(), settings)?.check()
    }

    fn build(
        &self,
        ctx: BuildContext,
        settings: toml::Value,
    ) -> BoxFuture<'static, Result<Arc<dyn Piece>>> {
        let kind = self.kind();
        Box::pin(async move {
            let settings: AptPiezoSettings = parse_settings(kind, &settings)?;
            let piece = AptPiezo::with_channels(
                ctx.puzzle.clone(),
                apt_loader(&ctx, settings.simulate),
                settings.axes(),
            );
            if let Some(serial) = settings.serial {
                piece.base().serial().set_cached(serial)?;
            }
            Ok(Arc::new(piece) as Arc<dyn Piece>)
        })
    }
}

/// Settings of `thorlabs.powermeter`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PowermeterSettings {
    /// Use the in-memory TLPM library.
    #[serde(default)]
    pub simulate: bool,
    /// VISA resource name to preselect.
    #[serde(default)]
    pub device: Option<String>,
}

/// Factory for [`Powermeter`].
pub struct PowermeterFactory;

impl PieceFactory for PowermeterFactory {
    fn kind(&self) -> &'static str {
        "thorlabs.powermeter"
    }

    fn name(&self) -> &'static str {
        "Thorlabs powermeter"
    }

    fn validate(&self, settings: &toml::Value) -> Result<()> {
        parse_settings::<PowermeterSettings>(self.kind(), settings).map(|_| ())
    }

    fn build(
        &self,
        ctx: BuildContext,
        settings: toml::Value,
    ) -> BoxFuture<'static, Result<Arc<dyn Piece>>> {
        let kind = self.kind();
        Box::pin(async move {
            let settings: PowermeterSettings = parse_settings(kind, &settings)?;
            let loader = if settings.simulate {
                sdk::fixed(Arc::new(MockTlpm::new()) as SharedTlpm)
            } else {
                sdk::unavailable("Thorlabs TLPM", ctx.sdk_dir(powermeter::GLOBAL_KEY))
            };
            let piece = Powermeter::new(ctx.puzzle, loader);
            if let Some(device) = settings.device {
                piece.device().set_cached(device)?;
            }
            Ok(Arc::new(piece) as Arc<dyn Piece>)
        })
    }
}

/// Settings of `thorlabs.camera`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraSettings {
    /// Use the in-memory camera SDK.
    #[serde(default)]
    pub simulate: bool,
    /// Camera serial number to preselect.
    #[serde(default)]
    pub serial: Option<String>,
    /// Preview flavour.
    #[serde(default)]
    pub variant: CameraVariant,
}

/// Factory for [`Camera`].
pub struct CameraFactory;

impl PieceFactory for CameraFactory {
    fn kind(&self) -> &'static str {
        "thorlabs.camera"
    }

    fn name(&self) -> &'static str {
        "Thorlabs scientific camera"
    }

    fn validate(&self, settings: &toml::Value) -> Result<()> {
        parse_settings::<CameraSettings>(self.kind(), settings).map(|_| ())
    }

    fn build(
        &self,
        ctx: BuildContext,
        settings: toml::Value,
    ) -> BoxFuture<'static, Result<Arc<dyn Piece>>> {
        let kind = self.kind();
        Box::pin(async move {
            let settings: CameraSettings = parse_settings(kind, &settings)?;
            let loader = if settings.simulate {
                sdk::fixed(Arc::new(MockTlcSdk::new()) as SharedTlc)
            } else {
                sdk::unavailable("Thorlabs camera SDK", ctx.sdk_dir(camera::GLOBAL_KEY))
            };
            let piece = Camera::new(ctx.puzzle, loader, settings.variant);
            if let Some(serial) = settings.serial {
                piece.serial().set_cached(serial)?;
            }
            Ok(Arc::new(piece) as Arc<dyn Piece>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pzp_core::factory::empty_settings;
    use pzp_core::PuzzleContext;

    #[test]
    fn test_piezo_channels_are_checked() {
        let factory = AptPiezoFactory;
        assert!(factory.validate(&empty_settings()).is_ok());
        let double = toml::Value::Table(toml::toml! { layout = "double" });
        assert!(factory.validate(&double).is_ok());

        let dup: toml::Value = toml::from_str(
            "channels = [{ name = \"x\", channel = 0 }, { name = \"x\", channel = 1 }]",
        )
        .unwrap();
        assert!(factory.validate(&dup).is_err());
        let clash: toml::Value =
            toml::from_str("channels = [{ name = \"connected\", channel = 0 }]").unwrap();
        assert!(factory.validate(&clash).is_err());
        let empty: toml::Value = toml::from_str("channels = []").unwrap();
        assert!(factory.validate(&empty).is_err());
        let bad_layout = toml::Value::Table(toml::toml! { layout = "triple" });
        assert!(factory.validate(&bad_layout).is_err());
    }

    #[test]
    fn test_serial_must_be_numeric() {
        let ok = toml::Value::Table(toml::toml! { serial = "83000001" });
        assert!(AptStageFactory.validate(&ok).is_ok());
        let bad = toml::Value::Table(toml::toml! { serial = "stage" });
        assert!(AptStageFactory.validate(&bad).is_err());
    }

    #[tokio::test]
    async fn test_custom_piezo_axes() {
        let settings: toml::Value = toml::from_str(
            "simulate = true\nchannels = [{ name = \"tip\", channel = 2 }, { name = \"tilt\", channel = 3 }]",
        )
        .unwrap();
        let piece = AptPiezoFactory
            .build(BuildContext::new(PuzzleContext::new(true)), settings)
            .await
            .unwrap();
        assert_eq!(piece.params().names(), vec!["serial", "connected", "tip", "tilt"]);
    }

    #[tokio::test]
    async fn test_camera_variant_and_serial() {
        let settings = toml::Value::Table(toml::toml! {
            variant = "lineout"
            serial = "08153"
        });
        let piece = CameraFactory
            .build(BuildContext::new(PuzzleContext::new(true)), settings)
            .await
            .unwrap();
        assert!(piece.params().get("circle_r").is_some());
        assert_eq!(piece.params().get("serial").unwrap().display(), "08153");
    }

    #[tokio::test]
    async fn test_missing_sdk_names_directory() {
        let mut ctx = BuildContext::new(PuzzleContext::new(false));
        ctx.sdk_dirs.insert("tlpm".into(), "/opt/tlpm".into());
        let piece = PowermeterFactory.build(ctx, empty_settings()).await.unwrap();
        let err = piece.setup().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Thorlabs TLPM (looked in /opt/tlpm) is not available"
        );
    }
}
