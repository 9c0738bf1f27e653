//! Puzzle configuration using Figment.
//!
//! Configuration is merged from, in increasing priority:
//! 1. built-in defaults
//! 2. a TOML file (`pzp.toml` unless another path is given)
//! 3. environment variables prefixed with `PZP_`, nested keys split on `__`
//!
//! # Example
//! ```toml
//! debug = false
//! log_level = "info"
//!
//! [sdk]
//! apt = "C:/Program Files/Thorlabs/APT"
//!
//! [lightfield]
//! background_directory = "D:/lightfield_files"
//!
//! [[pieces]]
//! name = "stage"
//! kind = "thorlabs.apt_stage"
//! settings = { serial = "27000001" }
//! defaults = { velocity = 2.0 }
//! ```
//!
//! `PZP_DEBUG=true` or `PZP_SDK__TLPM=D:/tlpm` override the file.

use crate::logging::{parse_log_level, LogFormat};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File read when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "pzp.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PZP_";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Merging or extracting failed.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// An explicitly requested file is missing.
    #[error("Configuration file {0} does not exist")]
    MissingFile(PathBuf),

    /// `log_level` is not a tracing level.
    #[error("{0}")]
    InvalidLogLevel(String),

    /// A piece has an empty name or kind.
    #[error("Piece #{index} needs a non-empty name and kind")]
    IncompletePiece {
        /// Position in `[[pieces]]`.
        index: usize,
    },

    /// Two pieces share a name.
    #[error("Duplicate piece name: {0}")]
    DuplicatePiece(String),

    /// A configured directory does not exist.
    #[error("{what} {path} does not exist")]
    MissingPath {
        /// Which setting named the path.
        what: String,
        /// The path.
        path: PathBuf,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PuzzleConfig {
    /// Run every Piece without touching hardware.
    #[serde(default)]
    pub debug: bool,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Vendor SDK directories keyed by vendor (`apt`, `tlc_sdk`, `tlpm`,
    /// `lightfield`, `heds`, `alp`, `seabreeze`).
    #[serde(default)]
    pub sdk: BTreeMap<String, PathBuf>,
    /// LightField options shared by every `princeton.lightfield` piece.
    #[serde(default)]
    pub lightfield: LightFieldConfig,
    /// Pieces in the order they are added.
    #[serde(default)]
    pub pieces: Vec<PieceConfig>,
}

/// `[lightfield]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LightFieldConfig {
    /// Directory of `<exposure>.spe` background references.
    #[serde(default)]
    pub background_directory: Option<PathBuf>,
}

/// One `[[pieces]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PieceConfig {
    /// Unique name, used in `piece:param` addresses.
    pub name: String,
    /// Factory kind, e.g. `lightcon.pharos`.
    pub kind: String,
    /// Factory settings.
    #[serde(default = "empty_table")]
    pub settings: toml::Value,
    /// Parameter values stored without touching hardware.
    #[serde(default)]
    pub defaults: serde_json::Map<String, serde_json::Value>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl Default for PuzzleConfig {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            sdk: BTreeMap::new(),
            lightfield: LightFieldConfig::default(),
            pieces: Vec::new(),
        }
    }
}

impl PuzzleConfig {
    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) if !path.exists() => {
                return Err(ConfigError::MissingFile(path.to_path_buf()))
            }
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };
        Self::figment(&file).extract().map_err(Box::new).map_err(Into::into)
    }

    /// The provider chain, exposed for layering extra providers.
    pub fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check values that deserialization cannot.
    ///
    /// SDK and background directories must exist unless in debug mode.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_log_level(&self.log_level).map_err(ConfigError::InvalidLogLevel)?;

        let mut names = HashSet::new();
        for (index, piece) in self.pieces.iter().enumerate() {
            if piece.name.is_empty() || piece.kind.is_empty() {
                return Err(ConfigError::IncompletePiece { index });
            }
            if !names.insert(piece.name.as_str()) {
                return Err(ConfigError::DuplicatePiece(piece.name.clone()));
            }
        }

        if self.debug {
            return Ok(());
        }
        for (vendor, dir) in &self.sdk {
            require_dir(&format!("SDK directory '{vendor}'"), dir)?;
        }
        if let Some(dir) = &self.lightfield.background_directory {
            require_dir("LightField background directory", dir)?;
        }
        Ok(())
    }

    /// Settings for `piece`, with puzzle-wide options filled in.
    ///
    /// `princeton.lightfield` pieces inherit `[lightfield]
    /// background_directory` unless they set their own.
    pub fn piece_settings(&self, piece: &PieceConfig) -> toml::Value {
        let mut settings = piece.settings.clone();
        if piece.kind == "princeton.lightfield" {
            if let (Some(dir), toml::Value::Table(table)) =
                (&self.lightfield.background_directory, &mut settings)
            {
                if !table.contains_key("background_directory") {
                    table.insert(
                        "background_directory".into(),
                        toml::Value::String(dir.to_string_lossy().into_owned()),
                    );
                }
            }
        }
        settings
    }
}

fn require_dir(what: &str, path: &Path) -> Result<(), ConfigError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(ConfigError::MissingPath {
            what: what.to_string(),
            path: path.to_path_buf(),
        })
    }
}
