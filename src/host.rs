//! Building a [`Puzzle`] from configuration.

use crate::config::PuzzleConfig;
use anyhow::{Context, Result};
use pzp_core::{BuildContext, PieceRegistry, Puzzle};

/// Build and add every configured piece, in order.
///
/// Each piece is validated by its factory, built, given its `defaults`
/// without touching hardware, and added; `setup()` runs outside debug mode.
pub async fn build_puzzle(config: &PuzzleConfig, registry: &PieceRegistry) -> Result<Puzzle> {
    let mut puzzle = Puzzle::new(config.debug);
    for piece in &config.pieces {
        let ctx = BuildContext {
            puzzle: puzzle.context(),
            sdk_dirs: config.sdk.clone(),
        };
        let built = registry
            .build(&piece.kind, ctx, config.piece_settings(piece))
            .await
            .with_context(|| format!("Failed to build piece '{}'", piece.name))?;
        puzzle
            .add_piece_with_defaults(piece.name.clone(), built, &piece.defaults)
            .await
            .with_context(|| format!("Failed to add piece '{}'", piece.name))?;
    }
    tracing::info!(pieces = puzzle.names().len(), debug = config.debug, "puzzle ready");
    Ok(puzzle)
}
