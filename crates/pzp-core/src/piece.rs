//! The Piece trait.

use crate::action::ActionSet;
use crate::error::PieceResult;
use crate::parameter::ParameterSet;
use async_trait::async_trait;

/// One device's controls: parameters plus actions.
///
/// Implementations build their parameter and action sets at construction,
/// wiring each setter and getter to the device. `setup` is called by the
/// puzzle only when not in debug mode, and is where vendor SDKs are looked
/// up or loaded.
#[async_trait]
pub trait Piece: Send + Sync {
    /// Kind identifier, e.g. `"thorlabs.sc10"`.
    fn kind(&self) -> &'static str;

    /// Parameters in display order.
    fn params(&self) -> &ParameterSet;

    /// Actions in display order.
    fn actions(&self) -> &ActionSet;

    /// Load or look up whatever the Piece needs before hardware access.
    async fn setup(&self) -> PieceResult<()> {
        Ok(())
    }

    /// Release hardware. Called once when the puzzle closes.
    async fn handle_close(&self) -> PieceResult<()> {
        Ok(())
    }

    /// Stop any long-running operation.
    fn call_stop(&self) {}
}
