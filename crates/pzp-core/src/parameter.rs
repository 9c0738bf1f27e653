//! Parameter<T>: an observable value wired to hardware.
//!
//! A parameter composes an [`Observable`] with three optional callbacks:
//!
//! ```text
//! Parameter<T>
//!   ├─ inner: Observable<T>     (cached value, subscribers, metadata)
//!   ├─ setter: Fn(T) -> Option<T>   (writes to the device)
//!   ├─ getter: Fn() -> T            (reads from the device)
//!   ├─ options: Fn() -> Vec<String> (dropdown choices)
//!   └─ change_listeners
//! ```
//!
//! Callbacks live in shared slots so a Piece can build its parameters first
//! and wire them afterwards with closures that capture clones of the very
//! same parameters (the piezo setter reads the piezo's own cached value, the
//! DMD `n_images` setter changes `preview_i`).
//!
//! `set(v)` runs: validate, call the setter, then store the setter's returned
//! value, or read back through the getter when the setter returned `None`,
//! or store `v` as-is when there is neither.

use crate::error::{PieceError, PieceResult};
use crate::observable::{Observable, ObservableMetadata};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Bound shared by every parameter value type.
pub trait ParamValue:
    Clone + Send + Sync + PartialEq + Debug + Serialize + DeserializeOwned + 'static
{
}

impl<T> ParamValue for T where
    T: Clone + Send + Sync + PartialEq + Debug + Serialize + DeserializeOwned + 'static
{
}

/// Hardware write callback. `Ok(None)` asks for a read-back.
pub type Setter<T> = Arc<dyn Fn(T) -> BoxFuture<'static, PieceResult<Option<T>>> + Send + Sync>;

/// Hardware read callback.
pub type Getter<T> = Arc<dyn Fn() -> BoxFuture<'static, PieceResult<T>> + Send + Sync>;

/// Dropdown option loader.
pub type OptionsLoader = Arc<dyn Fn() -> BoxFuture<'static, PieceResult<Vec<String>>> + Send + Sync>;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A named, typed value with optional hardware callbacks.
#[derive(Clone)]
pub struct Parameter<T: ParamValue> {
    inner: Observable<T>,
    setter: Arc<RwLock<Option<Setter<T>>>>,
    getter: Arc<RwLock<Option<Getter<T>>>>,
    options: Arc<RwLock<Option<OptionsLoader>>>,
    change_listeners: Arc<RwLock<Vec<Listener<T>>>>,
}

impl<T: ParamValue> Debug for Parameter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parameter")
            .field("inner", &self.inner)
            .field("has_setter", &self.setter.read().is_some())
            .field("has_getter", &self.getter.read().is_some())
            .finish_non_exhaustive()
    }
}

impl<T: ParamValue> Parameter<T> {
    /// Create a parameter with an initial cached value and no callbacks.
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        Self {
            inner: Observable::new(name, initial),
            setter: Arc::new(RwLock::new(None)),
            getter: Arc::new(RwLock::new(None)),
            options: Arc::new(RwLock::new(None)),
            change_listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.inner = self.inner.with_description(description);
        self
    }

    /// Set the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.inner = self.inner.with_units(unit);
        self
    }

    /// Set the dtype hint.
    pub fn with_dtype(mut self, dtype: impl Into<String>) -> Self {
        self.inner = self.inner.with_dtype(dtype);
        self
    }

    /// Install a validator.
    pub fn with_validator(
        mut self,
        validator: impl Fn(&T, &ObservableMetadata) -> PieceResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.inner = self.inner.with_validator(validator);
        self
    }

    /// Make the parameter read-only.
    pub fn read_only(mut self) -> Self {
        self.inner = self.inner.read_only();
        self
    }

    /// Hide the parameter from default listings.
    pub fn hidden(self) -> Self {
        self.inner.update_metadata(|m| m.visible = false);
        self
    }

    /// Place the parameter in a display group.
    pub fn with_group(self, group: impl Into<String>) -> Self {
        let group = group.into();
        self.inner.update_metadata(|m| m.group = Some(group));
        self
    }

    /// Set the display format, e.g. `"{:.2e}"`.
    pub fn with_format(self, format: impl Into<String>) -> Self {
        let format = format.into();
        self.inner.update_metadata(|m| m.format = Some(format));
        self
    }

    /// Install the hardware setter.
    pub fn set_setter<F, Fut>(&self, setter: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PieceResult<Option<T>>> + Send + 'static,
    {
        *self.setter.write() = Some(Arc::new(move |value| setter(value).boxed()));
    }

    /// Install the hardware getter.
    pub fn set_getter<F, Fut>(&self, getter: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PieceResult<T>> + Send + 'static,
    {
        *self.getter.write() = Some(Arc::new(move || getter().boxed()));
    }

    /// Install the dropdown option loader.
    pub fn set_options_loader<F, Fut>(&self, loader: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PieceResult<Vec<String>>> + Send + 'static,
    {
        *self.options.write() = Some(Arc::new(move || loader().boxed()));
    }

    /// Register a listener called after every stored change.
    pub fn on_change(&self, listener: impl Fn(&T) + Send + Sync + 'static) {
        self.change_listeners.write().push(Arc::new(listener));
    }

    /// Validate, write to hardware, store and notify.
    ///
    /// Returns the value that ended up stored, which may differ from `value`
    /// when the device clamps it.
    pub async fn set(&self, value: T) -> PieceResult<T> {
        self.inner.validate(&value)?;

        let setter = self.setter.read().clone();
        let stored = match setter {
            Some(setter) => match setter(value.clone()).await? {
                Some(returned) => returned,
                None => {
                    let getter = self.getter.read().clone();
                    match getter {
                        Some(getter) => getter().await?,
                        None => value,
                    }
                }
            },
            None => value,
        };

        tracing::trace!(param = %self.name(), value = ?stored, "parameter set");
        self.store(stored.clone());
        Ok(stored)
    }

    /// Read from hardware when a getter exists, otherwise return the cached value.
    pub async fn get_value(&self) -> PieceResult<T> {
        let getter = self.getter.read().clone();
        match getter {
            Some(getter) => {
                let value = getter().await?;
                self.store(value.clone());
                Ok(value)
            }
            None => Ok(self.value()),
        }
    }

    /// Cached value, no hardware access.
    pub fn value(&self) -> T {
        self.inner.get()
    }

    /// Store a value without calling hardware. Validators still apply,
    /// the read-only flag does not.
    pub fn set_cached(&self, value: T) -> PieceResult<()> {
        self.inner.validate_value(&value)?;
        self.store(value);
        Ok(())
    }

    /// Run the setter again with the cached value.
    pub async fn reapply(&self) -> PieceResult<T> {
        self.set(self.value()).await
    }

    /// Reload dropdown options through the loader, if any.
    pub async fn refresh_options(&self) -> PieceResult<Vec<String>> {
        let loader = self.options.read().clone();
        match loader {
            Some(loader) => {
                let options = loader().await?;
                self.inner.set_options(options.clone());
                Ok(options)
            }
            None => Ok(self.inner.metadata().enum_values),
        }
    }

    fn store(&self, value: T) {
        self.inner.replace(value.clone());
        let listeners = self.change_listeners.read().clone();
        for listener in &listeners {
            listener(&value);
        }
    }

    /// Subscribe to stored values.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.inner.subscribe()
    }

    /// Parameter name.
    pub fn name(&self) -> String {
        self.inner.name()
    }

    /// Metadata snapshot.
    pub fn metadata(&self) -> ObservableMetadata {
        self.inner.metadata()
    }

    /// Modify metadata in place (limits, options).
    pub fn update_metadata(&self, f: impl FnOnce(&mut ObservableMetadata)) {
        self.inner.update_metadata(f);
    }

    /// True when a hardware getter is installed.
    pub fn has_getter(&self) -> bool {
        self.getter.read().is_some()
    }

    /// Inner observable.
    pub fn inner(&self) -> &Observable<T> {
        &self.inner
    }
}

/// Type-erased access to a parameter, used by the puzzle and the CLI.
#[async_trait]
pub trait ParameterAny: Send + Sync {
    /// Parameter name.
    fn name(&self) -> String;

    /// Metadata snapshot.
    fn metadata(&self) -> ObservableMetadata;

    /// Cached value as JSON.
    fn value_json(&self) -> PieceResult<serde_json::Value>;

    /// Read through the getter and return JSON.
    async fn get_json(&self) -> PieceResult<serde_json::Value>;

    /// Deserialize and `set`, returning the stored value.
    async fn set_json(&self, value: serde_json::Value) -> PieceResult<serde_json::Value>;

    /// Deserialize and store without calling hardware.
    fn set_cached_json(&self, value: serde_json::Value) -> PieceResult<()>;

    /// Cached value rendered with the display format.
    fn display(&self) -> String;

    /// Reload dropdown options.
    async fn refresh_options(&self) -> PieceResult<Vec<String>>;

    /// Downcasting support.
    fn as_any(&self) -> &dyn Any;

    /// Rust type name of the value.
    fn type_name(&self) -> &'static str;
}

impl<T: ParamValue> Parameter<T> {
    fn decode(&self, value: serde_json::Value) -> PieceResult<T> {
        serde_json::from_value(value).map_err(|e| {
            PieceError::validation(
                self.name(),
                format!("expected {}: {e}", std::any::type_name::<T>()),
            )
        })
    }
}

#[async_trait]
impl<T: ParamValue> ParameterAny for Parameter<T> {
    fn name(&self) -> String {
        Parameter::name(self)
    }

    fn metadata(&self) -> ObservableMetadata {
        Parameter::metadata(self)
    }

    fn value_json(&self) -> PieceResult<serde_json::Value> {
        Ok(serde_json::to_value(self.value())?)
    }

    async fn get_json(&self) -> PieceResult<serde_json::Value> {
        let value = self.get_value().await?;
        Ok(serde_json::to_value(value)?)
    }

    async fn set_json(&self, value: serde_json::Value) -> PieceResult<serde_json::Value> {
        let value = self.decode(value)?;
        let stored = self.set(value).await?;
        Ok(serde_json::to_value(stored)?)
    }

    fn set_cached_json(&self, value: serde_json::Value) -> PieceResult<()> {
        let value = self.decode(value)?;
        self.set_cached(value)
    }

    fn display(&self) -> String {
        match serde_json::to_value(self.value()) {
            Ok(json) => display_json(&json, self.metadata().format.as_deref()),
            Err(_) => format!("{:?}", self.value()),
        }
    }

    async fn refresh_options(&self) -> PieceResult<Vec<String>> {
        Parameter::refresh_options(self).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Render a JSON value for display.
///
/// Numbers honour `format`; strings are shown bare; arrays serialized by
/// ndarray are summarised by their shape.
pub fn display_json(value: &serde_json::Value, format: Option<&str>) -> String {
    match value {
        serde_json::Value::Number(n) => match (format, n.as_f64()) {
            (Some(fmt), Some(x)) => format_number(fmt, x),
            _ => n.to_string(),
        },
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) if map.contains_key("dim") => match map.get("dim") {
            Some(dim) => format!("array{dim}"),
            None => value.to_string(),
        },
        other => other.to_string(),
    }
}

/// Apply a `{}`, `{:.Nf}` or `{:.Ne}` placeholder to a number.
///
/// Exponents are written with a sign and at least two digits (`1.50e-04`).
/// Text around the placeholder is kept.
pub fn format_number(template: &str, value: f64) -> String {
    let (Some(start), Some(end)) = (template.find('{'), template.find('}')) else {
        return value.to_string();
    };
    if end < start {
        return value.to_string();
    }

    let spec = &template[start + 1..end];
    let body = match spec.strip_prefix(":.") {
        Some(rest) => match rest.char_indices().last() {
            Some((at, kind)) => match (rest[..at].parse::<usize>(), kind) {
                (Ok(precision), 'f') => format!("{value:.precision$}"),
                (Ok(precision), 'e') => scientific(value, precision),
                _ => value.to_string(),
            },
            None => value.to_string(),
        },
        _ => value.to_string(),
    };

    format!("{}{}{}", &template[..start], body, &template[end + 1..])
}

fn scientific(value: f64, precision: usize) -> String {
    let raw = format!("{value:.precision$e}");
    match raw.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => raw,
    }
}

/// Insertion-ordered collection of a Piece's parameters.
#[derive(Default)]
pub struct ParameterSet {
    parameters: Vec<(String, Box<dyn ParameterAny>)>,
}

impl Debug for ParameterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterSet")
            .field("names", &self.names())
            .finish()
    }
}

impl ParameterSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter. A later registration with the same name replaces
    /// the earlier one in place.
    pub fn register<P>(&mut self, parameter: P)
    where
        P: ParameterAny + 'static,
    {
        let name = parameter.name();
        match self.parameters.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = Box::new(parameter),
            None => self.parameters.push((name, Box::new(parameter))),
        }
    }

    /// Look up by name.
    pub fn get(&self, name: &str) -> Option<&dyn ParameterAny> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.as_ref())
    }

    /// Look up by name, failing with [`PieceError::UnknownParameter`].
    pub fn require(&self, name: &str) -> PieceResult<&dyn ParameterAny> {
        self.get(name)
            .ok_or_else(|| PieceError::UnknownParameter(name.to_string()))
    }

    /// Look up with a concrete type.
    pub fn get_typed<T: ParamValue>(&self, name: &str) -> Option<&Parameter<T>> {
        self.get(name)
            .and_then(|p| p.as_any().downcast_ref::<Parameter<T>>())
    }

    /// Iterate in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn ParameterAny)> {
        self.parameters
            .iter()
            .map(|(name, p)| (name.as_str(), p.as_ref()))
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.parameters.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Store default values without touching hardware.
    pub fn apply_defaults(
        &self,
        defaults: &serde_json::Map<String, serde_json::Value>,
    ) -> PieceResult<()> {
        for (name, value) in defaults {
            self.require(name)?.set_cached_json(value.clone())?;
        }
        Ok(())
    }
}
