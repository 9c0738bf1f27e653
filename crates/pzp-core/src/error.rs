//! Error type shared by every Piece.
//!
//! `PieceError` is what parameter setters, getters, ensurers and actions
//! return. Messages are shown to the person at the bench, so most variants
//! carry the exact sentence that should be displayed ("Camera not connected",
//! "SLM error: ...") rather than a structured code.
//!
//! Application glue (config loading, the CLI, factories) uses `anyhow` and
//! converts into `PieceError::Other` where the two meet.

use thiserror::Error;

/// Convenience alias for results using [`PieceError`].
pub type PieceResult<T> = std::result::Result<T, PieceError>;

/// Primary error type for Pieces.
#[derive(Error, Debug)]
pub enum PieceError {
    /// An ensurer found the device disconnected.
    ///
    /// The payload is the full user-facing message, e.g. `"Motor not connected"`.
    #[error("{0}")]
    NotConnected(String),

    /// A hardware precondition other than the connection is not met
    /// (LightField not launched, DMD sequence not allocated, ...).
    #[error("{0}")]
    Precondition(String),

    /// The device or its SDK reported a failure.
    #[error("{0}")]
    Hardware(String),

    /// An HTTP endpoint answered with a status other than 200.
    #[error("Error ({status}) in HTTP request: {body}")]
    HttpStatus {
        /// Response status code.
        status: u16,
        /// Response body as text.
        body: String,
    },

    /// HTTP transport failure (connection refused, broken body, ...).
    #[error("HTTP transport error: {0}")]
    Http(#[from] hyper::Error),

    /// The `address` param does not form a valid request.
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress {
        /// Offending URL.
        address: String,
        /// Parser message.
        reason: String,
    },

    /// A device reply could not be understood.
    #[error("Unexpected response from {device}: {response:?}")]
    Protocol {
        /// Device name.
        device: String,
        /// Raw reply.
        response: String,
    },

    /// Standard I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured.
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Attempt to set a read-only parameter (readouts).
    #[error("Parameter '{0}' is read-only")]
    ReadOnly(String),

    /// Value rejected by a parameter's limits or validator.
    #[error("Invalid value for '{name}': {reason}")]
    Validation {
        /// Parameter name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// No parameter with this name.
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    /// No action with this name.
    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    /// No Piece with this name in the puzzle.
    #[error("Unknown piece '{0}'")]
    UnknownPiece(String),

    /// A vendor SDK backend could not be loaded.
    #[error("{0} is not available")]
    BackendMissing(String),

    /// Waiting for hardware took too long.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Anything else, usually from application glue.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PieceError {
    /// Shorthand for [`PieceError::Hardware`].
    pub fn hardware(message: impl Into<String>) -> Self {
        Self::Hardware(message.into())
    }

    /// Shorthand for [`PieceError::NotConnected`].
    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::NotConnected(message.into())
    }

    /// Shorthand for [`PieceError::Validation`].
    pub fn validation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True for the errors an ensurer raises.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::NotConnected(_) | Self::Precondition(_))
    }
}
