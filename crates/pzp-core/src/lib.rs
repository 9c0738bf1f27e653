//! Host contract for pzp-hardware Pieces.
//!
//! A Piece exposes one device as named [`Parameter`]s and [`Action`]s. This
//! crate provides those building blocks, the [`Puzzle`] that owns Pieces and
//! shares the debug flag and [`Globals`] between them, and the serial and
//! HTTP bases that several vendors build on.
//!
//! # Modules
//!
//! - [`observable`]: watch-channel value with shared metadata
//! - [`parameter`]: `Parameter<T>` with setter, getter and option loader
//! - [`param`]: parameter kinds (spinbox, checkbox, readout, ...)
//! - [`action`]: actions and action sets
//! - [`piece`], [`puzzle`], [`globals`]: the host
//! - [`serial`], [`http`]: hardware bases
//! - [`preview`]: image preview state
//! - [`sdk`]: vendor SDK loaders
//! - [`factory`]: configuration-driven construction

pub mod action;
pub mod error;
pub mod factory;
pub mod globals;
pub mod http;
pub mod observable;
pub mod param;
pub mod parameter;
pub mod piece;
pub mod preview;
pub mod puzzle;
pub mod sdk;
pub mod serial;

pub use action::{Action, ActionSet};
pub use error::{PieceError, PieceResult};
pub use factory::{BuildContext, PieceFactory, PieceRegistry};
pub use globals::Globals;
pub use parameter::{Parameter, ParameterAny, ParameterSet};
pub use piece::Piece;
pub use puzzle::{Puzzle, PuzzleContext};
