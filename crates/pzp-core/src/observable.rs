//! Observable values
//!
//! Reactive value holder built on `tokio::sync::watch`. Every Piece parameter
//! wraps one of these: the watch channel carries the cached value, and a
//! shared `RwLock` carries the metadata a front end would need to render the
//! parameter (dtype, limits, choices, visibility, display format).
//!
//! Metadata lives behind an `Arc` so that every clone of an observable sees
//! updates made after construction. Pieces rely on this: the DMD changes the
//! upper limit of `preview_i` whenever `n_images` changes, and dropdowns
//! replace their option list on refresh.
//!
//! ```rust,ignore
//! let wl = Observable::new("wl", 633.0).with_units("nm");
//! let mut rx = wl.subscribe();
//! wl.set(800.0)?;
//! assert!(rx.has_changed()?);
//! ```

use crate::error::{PieceError, PieceResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Validator callback.
///
/// Receives the candidate value and the current metadata, so limits that
/// change at runtime are honoured without re-installing the validator.
pub type Validator<T> = Arc<dyn Fn(&T, &ObservableMetadata) -> PieceResult<()> + Send + Sync>;

struct SharedState<T> {
    metadata: ObservableMetadata,
    validator: Option<Validator<T>>,
}

/// Descriptive and constraint metadata for a parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservableMetadata {
    /// Parameter name, unique within its Piece.
    pub name: String,

    /// Tooltip text.
    #[serde(default)]
    pub description: Option<String>,

    /// Physical units ("nm", "ms", "µs").
    #[serde(default)]
    pub units: Option<String>,

    /// Read-only parameters (readouts) reject `set()`.
    #[serde(default)]
    pub read_only: bool,

    /// Widget hint: `"float"`, `"int"`, `"bool"`, `"string"`, `"enum"` or `"array"`.
    #[serde(default)]
    pub dtype: String,

    /// Inclusive lower limit for numeric parameters.
    #[serde(default)]
    pub min_value: Option<f64>,

    /// Inclusive upper limit for numeric parameters.
    #[serde(default)]
    pub max_value: Option<f64>,

    /// Spinbox increment.
    #[serde(default)]
    pub step: Option<f64>,

    /// Dropdown options.
    #[serde(default)]
    pub enum_values: Vec<String>,

    /// Hidden parameters are still scriptable but not listed by default.
    #[serde(default = "default_visible")]
    pub visible: bool,

    /// Display group ("Settings", "Sequence").
    #[serde(default)]
    pub group: Option<String>,

    /// Display format such as `"{:.2e}"`.
    #[serde(default)]
    pub format: Option<String>,
}

fn default_visible() -> bool {
    true
}

impl ObservableMetadata {
    /// Metadata with only a name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            units: None,
            read_only: false,
            dtype: String::new(),
            min_value: None,
            max_value: None,
            step: None,
            enum_values: Vec::new(),
            visible: true,
            group: None,
            format: None,
        }
    }

    /// Check a numeric value against `min_value`/`max_value`.
    pub fn check_range(&self, value: f64) -> PieceResult<()> {
        if !value.is_finite() {
            return Err(PieceError::validation(
                &self.name,
                format!("value must be finite, got {value}"),
            ));
        }
        if let Some(min) = self.min_value {
            if value < min {
                return Err(PieceError::validation(
                    &self.name,
                    format!("{value} is below the minimum {min}"),
                ));
            }
        }
        if let Some(max) = self.max_value {
            if value > max {
                return Err(PieceError::validation(
                    &self.name,
                    format!("{value} is above the maximum {max}"),
                ));
            }
        }
        Ok(())
    }
}

/// Cached value with watch-channel notifications and shared metadata.
pub struct Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    sender: watch::Sender<T>,
    shared: Arc<RwLock<SharedState<T>>>,
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.read();
        f.debug_struct("Observable")
            .field("metadata", &shared.metadata)
            .field("has_validator", &shared.validator.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Observable named `name` holding `initial_value`.
    pub fn new(name: impl Into<String>, initial_value: T) -> Self {
        let (sender, _) = watch::channel(initial_value);
        Self {
            sender,
            shared: Arc::new(RwLock::new(SharedState {
                metadata: ObservableMetadata::named(name),
                validator: None,
            })),
        }
    }

    /// Add a description.
    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.shared.write().metadata.description = Some(description.into());
        self
    }

    /// Add units.
    pub fn with_units(self, units: impl Into<String>) -> Self {
        self.shared.write().metadata.units = Some(units.into());
        self
    }

    /// Mark as read-only.
    pub fn read_only(self) -> Self {
        self.shared.write().metadata.read_only = true;
        self
    }

    /// Set the dtype hint.
    pub fn with_dtype(self, dtype: impl Into<String>) -> Self {
        self.shared.write().metadata.dtype = dtype.into();
        self
    }

    /// Install a validator, replacing any previous one.
    pub fn with_validator<F>(self, validator: F) -> Self
    where
        F: Fn(&T, &ObservableMetadata) -> PieceResult<()> + Send + Sync + 'static,
    {
        self.shared.write().validator = Some(Arc::new(validator));
        self
    }

    /// Current value (clone).
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Parameter name.
    pub fn name(&self) -> String {
        self.shared.read().metadata.name.clone()
    }

    /// Metadata snapshot.
    pub fn metadata(&self) -> ObservableMetadata {
        self.shared.read().metadata.clone()
    }

    /// Modify metadata in place. Changes are visible to every clone.
    pub fn update_metadata<F>(&self, f: F)
    where
        F: FnOnce(&mut ObservableMetadata),
    {
        let mut guard = self.shared.write();
        f(&mut guard.metadata);
    }

    /// Replace the dropdown option list.
    pub fn set_options(&self, options: Vec<String>) {
        self.update_metadata(|m| m.enum_values = options);
    }

    /// Validate a value without storing it.
    ///
    /// Fails if the observable is read-only or the validator rejects the value.
    pub fn validate(&self, value: &T) -> PieceResult<()> {
        let guard = self.shared.read();
        if guard.metadata.read_only {
            return Err(PieceError::ReadOnly(guard.metadata.name.clone()));
        }
        self.check(value, &guard)
    }

    /// Validator only, ignoring the read-only flag.
    pub(crate) fn validate_value(&self, value: &T) -> PieceResult<()> {
        let guard = self.shared.read();
        self.check(value, &guard)
    }

    fn check(&self, value: &T, state: &SharedState<T>) -> PieceResult<()> {
        match &state.validator {
            Some(validator) => validator(value, &state.metadata),
            None => Ok(()),
        }
    }

    /// Validate and store a value, notifying subscribers.
    pub fn set(&self, value: T) -> PieceResult<()> {
        self.validate(&value)?;
        self.sender.send_replace(value);
        Ok(())
    }

    /// Store a value without validation.
    pub fn replace(&self, value: T) {
        self.sender.send_replace(value);
    }

    /// Subscribe to value changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_notifies_subscribers() {
        let obs = Observable::new("wl", 633.0);
        let mut rx = obs.subscribe();
        obs.set(800.0).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 800.0);
        assert_eq!(obs.subscriber_count(), 1);
    }

    #[test]
    fn test_read_only_rejects_set_but_replace_works() {
        let obs = Observable::new("counts", 0.0).read_only();
        assert!(matches!(obs.set(1.0), Err(PieceError::ReadOnly(_))));
        obs.replace(5.0);
        assert_eq!(obs.get(), 5.0);
    }

    #[test]
    fn test_validator_sees_updated_limits() {
        let obs = Observable::new("preview_i", 0i64)
            .with_validator(|v: &i64, meta| meta.check_range(*v as f64));
        obs.update_metadata(|m| m.max_value = Some(3.0));
        assert!(obs.set(3).is_ok());
        assert!(obs.set(4).is_err());

        let clone = obs.clone();
        clone.update_metadata(|m| m.max_value = Some(9.0));
        assert!(obs.set(9).is_ok());
    }

    #[test]
    fn test_check_range_rejects_nan() {
        let meta = ObservableMetadata::named("x");
        assert!(meta.check_range(f64::NAN).is_err());
        assert!(meta.check_range(1e9).is_ok());
    }

    #[test]
    fn test_metadata_deserializes_with_defaults() {
        let meta: ObservableMetadata = serde_json::from_str(r#"{"name":"wl"}"#).unwrap();
        assert!(meta.visible);
        assert!(meta.enum_values.is_empty());
    }
}
