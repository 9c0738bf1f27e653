//! Headless host for pzp-hardware Pieces.
//!
//! Loads a [`PuzzleConfig`], initialises tracing, builds every configured
//! Piece through the [`registry()`] of vendor factories and hands back a
//! [`pzp_core::Puzzle`]. The `pzp` binary wraps this in a command line.
//!
//! Vendor crates are re-exported for library users.

pub mod config;
pub mod host;
pub mod logging;
pub mod registry;

pub use config::{ConfigError, PuzzleConfig};
pub use host::build_puzzle;
pub use registry::registry;

pub use pzp_core;
pub use pzp_driver_holoeye as holoeye;
pub use pzp_driver_lightcon as lightcon;
pub use pzp_driver_oceanoptics as oceanoptics;
pub use pzp_driver_princeton as princeton;
pub use pzp_driver_thorlabs as thorlabs;
pub use pzp_driver_vialux as vialux;
