//! Princeton Instruments Pieces.
//!
//! [`LightField`] automates the LightField acquisition software through the
//! [`lightfield::Automation`] trait. `simulate = true` uses
//! [`mock::MockLightField`] instead of a native binding.
//!
//! ```toml
//! [[pieces]]
//! name = "spectrometer"
//! kind = "princeton.lightfield"
//! settings = { background_directory = "D:/lightfield_files" }
//! ```

pub mod lightfield;
pub mod mock;

pub use lightfield::LightField;

use anyhow::Result;
use futures::future::BoxFuture;
use lightfield::SharedAutomation;
use pzp_core::factory::{parse_settings, BuildContext, PieceFactory};
use pzp_core::{sdk, Piece};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Settings of `princeton.lightfield`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LightFieldSettings {
    /// Use the in-memory LightField, saving under the system temp directory.
    #[serde(default)]
    pub simulate: bool,
    /// Directory of `<exposure>.spe` background references.
    #[serde(default)]
    pub background_directory: Option<PathBuf>,
}

/// Factory for [`LightField`].
pub struct LightFieldFactory;

impl PieceFactory for LightFieldFactory {
    fn kind(&self) -> &'static str {
        "princeton.lightfield"
    }

    fn name(&self) -> &'static str {
        "Princeton Instruments LightField"
    }

    fn validate(&self, settings: &toml::Value) -> Result<()> {
        parse_settings::<LightFieldSettings>(self.kind(), settings).map(|_| ())
    }

    fn build(
        &self,
        ctx: BuildContext,
        settings: toml::Value,
    ) -> BoxFuture<'static, Result<Arc<dyn Piece>>> {
        let kind = self.kind();
        Box::pin(async move {
            let settings: LightFieldSettings = parse_settings(kind, &settings)?;
            let loader = if settings.simulate {
                let automation = mock::MockLightField::new(std::env::temp_dir());
                sdk::fixed(Arc::new(automation) as SharedAutomation)
            } else {
                sdk::unavailable("LightField automation", ctx.sdk_dir("lightfield"))
            };
            let piece = LightField::new(ctx.puzzle, loader, settings.background_directory);
            Ok(Arc::new(piece) as Arc<dyn Piece>)
        })
    }
}

/// Force the linker to include this crate.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<LightFieldFactory>());
}
