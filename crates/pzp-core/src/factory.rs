//! Piece factories.
//!
//! Each driver crate implements [`PieceFactory`] for every Piece kind it
//! provides. The host registers the factories in a [`PieceRegistry`] at
//! startup and builds Pieces from the `[[pieces]]` entries of its
//! configuration:
//!
//! ```toml
//! [[pieces]]
//! name = "shutter"
//! kind = "thorlabs.sc10"
//!
//! [[pieces]]
//! name = "camera"
//! kind = "thorlabs.camera"
//! settings = { variant = "lineout", simulate = true }
//! ```
//!
//! `settings` is handed to the factory as a raw `toml::Value`; each factory
//! deserializes it into its own settings struct.

use crate::piece::Piece;
use crate::puzzle::PuzzleContext;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// What a factory gets besides the Piece's own settings.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    /// Context of the puzzle the Piece will join.
    pub puzzle: PuzzleContext,
    /// Vendor SDK directories keyed by vendor (`"apt"`, `"tlc_sdk"`, ...).
    pub sdk_dirs: BTreeMap<String, PathBuf>,
}

impl BuildContext {
    /// Context with no SDK directories.
    pub fn new(puzzle: PuzzleContext) -> Self {
        Self {
            puzzle,
            sdk_dirs: BTreeMap::new(),
        }
    }

    /// Directory configured for `vendor`.
    pub fn sdk_dir(&self, vendor: &str) -> Option<PathBuf> {
        self.sdk_dirs.get(vendor).cloned()
    }
}

/// Builds one kind of Piece.
pub trait PieceFactory: Send + Sync + 'static {
    /// Kind used in configuration, e.g. `"lightcon.pharos"`.
    fn kind(&self) -> &'static str;

    /// Human-readable name.
    fn name(&self) -> &'static str;

    /// Check settings without building.
    fn validate(&self, settings: &toml::Value) -> Result<()>;

    /// Build the Piece.
    fn build(
        &self,
        ctx: BuildContext,
        settings: toml::Value,
    ) -> BoxFuture<'static, Result<Arc<dyn Piece>>>;
}

/// Deserialize a settings table, treating a missing table as empty.
pub fn parse_settings<T>(kind: &str, settings: &toml::Value) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    settings
        .clone()
        .try_into()
        .with_context(|| format!("Invalid settings for {kind}"))
}

/// Empty settings table.
pub fn empty_settings() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

/// Registered factories keyed by kind.
#[derive(Default)]
pub struct PieceRegistry {
    factories: BTreeMap<&'static str, Box<dyn PieceFactory>>,
}

impl std::fmt::Debug for PieceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PieceRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PieceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing one of the same kind.
    pub fn register(&mut self, factory: impl PieceFactory) {
        tracing::debug!(kind = factory.kind(), "registering piece factory");
        self.factories.insert(factory.kind(), Box::new(factory));
    }

    /// (kind, name) pairs in kind order.
    pub fn kinds(&self) -> Vec<(&'static str, &'static str)> {
        self.factories
            .values()
            .map(|f| (f.kind(), f.name()))
            .collect()
    }

    /// Factory for `kind`.
    pub fn get(&self, kind: &str) -> Result<&dyn PieceFactory> {
        self.factories
            .get(kind)
            .map(|f| f.as_ref())
            .ok_or_else(|| anyhow::anyhow!("Unknown piece kind '{kind}'"))
    }

    /// Validate and build.
    pub async fn build(
        &self,
        kind: &str,
        ctx: BuildContext,
        settings: toml::Value,
    ) -> Result<Arc<dyn Piece>> {
        let factory = self.get(kind)?;
        factory.validate(&settings)?;
        factory.build(ctx, settings).await
    }
}
