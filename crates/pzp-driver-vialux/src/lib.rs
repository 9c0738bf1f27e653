//! Vialux Pieces.
//!
//! [`Dmd`] drives a digital micromirror device through the
//! [`dmd::AlpLibrary`] trait. Two kinds share the implementation:
//! `vialux.dmd` shows single images, `vialux.dmd_advanced` adds timing,
//! slave mode and image sequences. `simulate = true` uses [`mock::MockAlp`].

pub mod dmd;
pub mod mock;

pub use dmd::{Dmd, DmdMode};

use anyhow::Result;
use dmd::{SharedAlp, DEFAULT_SIZE};
use futures::future::BoxFuture;
use pzp_core::factory::{parse_settings, BuildContext, PieceFactory};
use pzp_core::{sdk, Piece};
use serde::Deserialize;
use std::sync::Arc;

/// Settings of `vialux.dmd` and `vialux.dmd_advanced`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DmdSettings {
    /// Use the in-memory library.
    #[serde(default)]
    pub simulate: bool,
    /// Mirror counts `[x, y]` of the simulated DMD.
    #[serde(default)]
    pub simulated_size: Option<[usize; 2]>,
}

/// Factory for [`Dmd`] in one [`DmdMode`].
pub struct DmdFactory {
    mode: DmdMode,
}

impl DmdFactory {
    /// `vialux.dmd`.
    pub const BASIC: Self = Self {
        mode: DmdMode::Basic,
    };

    /// `vialux.dmd_advanced`.
    pub const ADVANCED: Self = Self {
        mode: DmdMode::Advanced,
    };
}

impl PieceFactory for DmdFactory {
    fn kind(&self) -> &'static str {
        match self.mode {
            DmdMode::Basic => "vialux.dmd",
            DmdMode::Advanced => "vialux.dmd_advanced",
        }
    }

    fn name(&self) -> &'static str {
        match self.mode {
            DmdMode::Basic => "Vialux DMD",
            DmdMode::Advanced => "Vialux DMD (sequences)",
        }
    }

    fn validate(&self, settings: &toml::Value) -> Result<()> {
        parse_settings::<DmdSettings>(self.kind(), settings).map(|_| ())
    }

    fn build(
        &self,
        ctx: BuildContext,
        settings: toml::Value,
    ) -> BoxFuture<'static, Result<Arc<dyn Piece>>> {
        let (kind, mode) = (self.kind(), self.mode);
        Box::pin(async move {
            let settings: DmdSettings = parse_settings(kind, &settings)?;
            let loader = if settings.simulate {
                let [x, y] = settings
                    .simulated_size
                    .unwrap_or([DEFAULT_SIZE.0, DEFAULT_SIZE.1]);
                sdk::fixed(Arc::new(mock::MockAlp::new(x, y)) as SharedAlp)
            } else {
                sdk::unavailable("ALP-4.3 API", ctx.sdk_dir("alp"))
            };
            Ok(Arc::new(Dmd::new(ctx.puzzle, loader, mode)) as Arc<dyn Piece>)
        })
    }
}

/// Force the linker to include this crate.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<DmdFactory>());
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
    fn test_kinds() {
        assert_eq!(DmdFactory::BASIC.kind(), "vialux.dmd");
        assert_eq!(DmdFactory::ADVANCED.kind(), "vialux.dmd_advanced");
        assert!(DmdFactory::BASIC.validate(&empty_settings()).is_ok());
        let sized = toml::Value::Table(toml::toml! {
            simulate = true
            simulated_size = [64, 32]
        });
        assert!(DmdFactory::ADVANCED.validate(&sized).is_ok());
        let unknown = toml::Value::Table(toml::toml! { bit_depth = 8 });
        assert!(DmdFactory::BASIC.validate(&unknown).is_err());
    }
}
