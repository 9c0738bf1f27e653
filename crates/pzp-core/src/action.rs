//! Actions: named commands with no persistent value.

use crate::error::{PieceError, PieceResult};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Action callback. Receives JSON arguments (often `null`) and may return a
/// JSON result.
pub type ActionFn = Arc<dyn Fn(Value) -> BoxFuture<'static, PieceResult<Value>> + Send + Sync>;

/// A triggerable command.
#[derive(Clone)]
pub struct Action {
    name: String,
    shortcut: Option<String>,
    visible: bool,
    callback: ActionFn,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("shortcut", &self.shortcut)
            .field("visible", &self.visible)
            .finish_non_exhaustive()
    }
}

impl Action {
    /// Create an action from an async callback.
    pub fn new<F, Fut>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PieceResult<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            shortcut: None,
            visible: true,
            callback: Arc::new(move |args| callback(args).boxed()),
        }
    }

    /// Keyboard shortcut label ("F4", "C"). Informational only.
    pub fn with_shortcut(mut self, shortcut: impl Into<String>) -> Self {
        self.shortcut = Some(shortcut.into());
        self
    }

    /// Hide from default listings.
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Action name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shortcut label, if any.
    pub fn shortcut(&self) -> Option<&str> {
        self.shortcut.as_deref()
    }

    /// Whether the action is listed by default.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Run the action.
    pub async fn run(&self, args: Value) -> PieceResult<Value> {
        tracing::debug!(action = %self.name, "running action");
        (self.callback)(args).await
    }
}

/// Insertion-ordered collection of a Piece's actions.
#[derive(Debug, Default)]
pub struct ActionSet {
    actions: Vec<Action>,
}

impl ActionSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action, replacing any with the same name.
    pub fn register(&mut self, action: Action) {
        match self.actions.iter_mut().find(|a| a.name == action.name) {
            Some(slot) => *slot = action,
            None => self.actions.push(action),
        }
    }

    /// Look up by name.
    pub fn get(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Run an action by name.
    pub async fn run(&self, name: &str, args: Value) -> PieceResult<Value> {
        let action = self
            .get(name)
            .ok_or_else(|| PieceError::UnknownAction(name.to_string()))?;
        action.run(args).await
    }

    /// Iterate in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.name.clone()).collect()
    }
}

/// Read an optional field from action arguments.
///
/// `null` or a missing key yields `None`.
pub fn arg<T: serde::de::DeserializeOwned>(args: &Value, key: &str) -> PieceResult<Option<T>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| PieceError::validation(key, e.to_string())),
    }
}
