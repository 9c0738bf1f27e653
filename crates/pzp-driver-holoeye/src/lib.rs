//! Holoeye Pieces.
//!
//! [`Slm`] drives a Holoeye spatial light modulator through the
//! [`slm::HedsSdk`] trait. `simulate = true` uses [`mock::MockHeds`].

pub mod mock;
pub mod slm;

pub use slm::Slm;

use anyhow::Result;
use futures::future::BoxFuture;
use pzp_core::factory::{parse_settings, BuildContext, PieceFactory};
use pzp_core::{sdk, Piece};
use serde::Deserialize;
use slm::SharedHeds;
use std::sync::Arc;

/// Settings of `holoeye.slm`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlmSettings {
    /// Use the in-memory SDK.
    #[serde(default)]
    pub simulate: bool,
    /// Preselected `correction_file` value.
    #[serde(default)]
    pub correction_file: Option<String>,
}

/// Factory for [`Slm`].
pub struct SlmFactory;

impl PieceFactory for SlmFactory {
    fn kind(&self) -> &'static str {
        "holoeye.slm"
    }

    fn name(&self) -> &'static str {
        "Holoeye spatial light modulator"
    }

    fn validate(&self, settings: &toml::Value) -> Result<()> {
        parse_settings::<SlmSettings>(self.kind(), settings).map(|_| ())
    }

    fn build(
        &self,
        ctx: BuildContext,
        settings: toml::Value,
    ) -> BoxFuture<'static, Result<Arc<dyn Piece>>> {
        let kind = self.kind();
        Box::pin(async move {
            let settings: SlmSettings = parse_settings(kind, &settings)?;
            let loader = if settings.simulate {
                sdk::fixed(Arc::new(mock::MockHeds::new()) as SharedHeds)
            } else {
                sdk::unavailable("Holoeye SLM Display SDK", ctx.sdk_dir("heds"))
            };
            let piece = Slm::new(ctx.puzzle, loader);
            if let Some(file) = settings.correction_file {
                piece.correction_file().set_cached(file)?;
            }
            Ok(Arc::new(piece) as Arc<dyn Piece>)
        })
    }
}

/// Force the linker to include this crate.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<SlmFactory>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_does_not_panic() {
        link();
    }
}
