//! The headless host: a named collection of Pieces sharing a debug flag and
//! a globals map.

use crate::error::{PieceError, PieceResult};
use crate::globals::Globals;
use crate::parameter::ParameterAny;
use crate::piece::Piece;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::{Arc, Weak};

/// Handle given to every Piece at construction.
///
/// Holds the debug flag, the shared globals and a weak directory of the
/// puzzle's Pieces so a Piece can resolve `{piece:param}` templates.
#[derive(Clone, Default)]
pub struct PuzzleContext {
    debug: bool,
    globals: Globals,
    directory: Arc<RwLock<Vec<(String, Weak<dyn Piece>)>>>,
}

impl std::fmt::Debug for PuzzleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PuzzleContext")
            .field("debug", &self.debug)
            .field("globals", &self.globals)
            .finish_non_exhaustive()
    }
}

impl PuzzleContext {
    /// Context for a puzzle in the given mode.
    pub fn new(debug: bool) -> Self {
        Self {
            debug,
            ..Self::default()
        }
    }

    /// Whether hardware access is simulated.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Shared SDK handles.
    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Piece>> {
        self.directory
            .read()
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, piece)| piece.upgrade())
    }

    /// Replace every `{piece:param}` in `template` with that parameter's
    /// cached value, rendered with its display format.
    ///
    /// Braces that do not name a known parameter are left as written.
    pub fn format(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            let Some(close) = tail.find('}') else {
                out.push_str(tail);
                return out;
            };
            let key = &tail[1..close];
            match self.display_of(key) {
                Some(shown) => out.push_str(&shown),
                None => out.push_str(&tail[..=close]),
            }
            rest = &tail[close + 1..];
        }
        out.push_str(rest);
        out
    }

    fn display_of(&self, key: &str) -> Option<String> {
        let (piece, param) = key.split_once(':')?;
        let piece = self.lookup(piece)?;
        let shown = piece.params().get(param).map(|p| p.display());
        shown
    }
}

/// Owner of the Pieces.
pub struct Puzzle {
    ctx: PuzzleContext,
    pieces: Vec<(String, Arc<dyn Piece>)>,
}

impl std::fmt::Debug for Puzzle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Puzzle")
            .field("ctx", &self.ctx)
            .field("pieces", &self.names())
            .finish()
    }
}

impl Puzzle {
    /// Empty puzzle.
    pub fn new(debug: bool) -> Self {
        Self {
            ctx: PuzzleContext::new(debug),
            pieces: Vec::new(),
        }
    }

    /// Context to hand to new Pieces.
    pub fn context(&self) -> PuzzleContext {
        self.ctx.clone()
    }

    /// Whether the puzzle runs in debug mode.
    pub fn debug(&self) -> bool {
        self.ctx.debug
    }

    /// Add a Piece. `setup()` runs only outside debug mode.
    pub async fn add_piece(&mut self, name: impl Into<String>, piece: Arc<dyn Piece>) -> PieceResult<()> {
        let name = name.into();
        if !self.ctx.debug {
            piece.setup().await?;
        }
        tracing::info!(piece = %name, kind = piece.kind(), debug = self.ctx.debug, "piece added");
        self.ctx
            .directory
            .write()
            .push((name.clone(), Arc::downgrade(&piece)));
        self.pieces.push((name, piece));
        Ok(())
    }

    /// Add a Piece, then store default parameter values without touching
    /// hardware.
    pub async fn add_piece_with_defaults(
        &mut self,
        name: impl Into<String>,
        piece: Arc<dyn Piece>,
        defaults: &serde_json::Map<String, Value>,
    ) -> PieceResult<()> {
        piece.params().apply_defaults(defaults)?;
        self.add_piece(name, piece).await
    }

    /// Look up a Piece by name.
    pub fn piece(&self, name: &str) -> PieceResult<&Arc<dyn Piece>> {
        self.pieces
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p)
            .ok_or_else(|| PieceError::UnknownPiece(name.to_string()))
    }

    /// Iterate Pieces in insertion order.
    pub fn pieces(&self) -> impl Iterator<Item = (&str, &Arc<dyn Piece>)> {
        self.pieces.iter().map(|(n, p)| (n.as_str(), p))
    }

    /// Piece names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.pieces.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Resolve a `"piece:param"` address.
    pub fn param(&self, address: &str) -> PieceResult<&dyn ParameterAny> {
        let (piece, param) = address.split_once(':').ok_or_else(|| {
            PieceError::UnknownParameter(format!("{address} (expected piece:param)"))
        })?;
        self.piece(piece)?.params().require(param)
    }

    /// Run an action on a Piece.
    pub async fn run_action(&self, piece: &str, action: &str, args: Value) -> PieceResult<Value> {
        self.piece(piece)?.actions().run(action, args).await
    }

    /// See [`PuzzleContext::format`].
    pub fn format(&self, template: &str) -> String {
        self.ctx.format(template)
    }

    /// Stop and close every Piece.
    ///
    /// Every Piece gets its `handle_close` even if an earlier one fails; the
    /// first error is returned and the rest are logged.
    pub async fn close(&mut self) -> PieceResult<()> {
        let mut first_error = None;
        for (name, piece) in &self.pieces {
            piece.call_stop();
            if let Err(e) = piece.handle_close().await {
                tracing::error!(piece = %name, error = %e, "close failed");
                first_error.get_or_insert(e);
            }
        }
        self.pieces.clear();
        self.ctx.directory.write().clear();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
