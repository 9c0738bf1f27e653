//! Parameter kinds.
//!
//! Thin constructors that give a [`Parameter`] the dtype and validation a
//! given widget kind implies: spinboxes are range-checked against the live
//! metadata limits, readouts are read-only, dropdowns carry an option list.

use crate::error::PieceResult;
use crate::parameter::{ParamValue, Parameter};
use ndarray::{Array, Dimension};
use std::future::Future;
use std::sync::Arc;

/// Numeric types a spinbox can hold.
pub trait SpinValue: ParamValue + Copy {
    /// dtype hint (`"int"` or `"float"`).
    const DTYPE: &'static str;

    /// Lossy conversion used for range checks.
    fn as_f64(self) -> f64;
}

impl SpinValue for i64 {
    const DTYPE: &'static str = "int";

    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl SpinValue for f64 {
    const DTYPE: &'static str = "float";

    fn as_f64(self) -> f64 {
        self
    }
}

/// Integer or float spinbox.
///
/// ```
/// # tokio_test::block_on(async {
/// let wl = pzp_core::param::spinbox("wavelength", 800.0).with_min(400.0);
/// assert!(wl.set(300.0).await.is_err());
/// assert_eq!(wl.set(633.0).await.unwrap(), 633.0);
/// # });
/// ```
pub fn spinbox<T: SpinValue>(name: impl Into<String>, value: T) -> Parameter<T> {
    Parameter::new(name, value)
        .with_dtype(T::DTYPE)
        .with_validator(|v: &T, meta| meta.check_range(v.as_f64()))
}

impl<T: SpinValue> Parameter<T> {
    /// Inclusive lower limit.
    pub fn with_min(self, min: T) -> Self {
        self.update_metadata(|m| m.min_value = Some(min.as_f64()));
        self
    }

    /// Inclusive upper limit.
    pub fn with_max(self, max: T) -> Self {
        self.update_metadata(|m| m.max_value = Some(max.as_f64()));
        self
    }

    /// Spinbox increment.
    pub fn with_step(self, step: T) -> Self {
        self.update_metadata(|m| m.step = Some(step.as_f64()));
        self
    }

    /// Change the upper limit at runtime.
    pub fn set_max(&self, max: T) {
        self.update_metadata(|m| m.max_value = Some(max.as_f64()));
    }
}

/// Boolean checkbox.
pub fn checkbox(name: impl Into<String>, value: bool) -> Parameter<bool> {
    Parameter::new(name, value).with_dtype("bool")
}

/// Free text.
pub fn text(name: impl Into<String>, value: impl Into<String>) -> Parameter<String> {
    Parameter::new(name, value.into()).with_dtype("string")
}

/// Text chosen from a refreshable option list.
///
/// The current value is not required to be one of the options: the list
/// reflects what is plugged in right now, while the value may come from a
/// saved default.
pub fn dropdown(name: impl Into<String>, value: impl Into<String>) -> Parameter<String> {
    Parameter::new(name, value.into()).with_dtype("enum")
}

/// Read-only value, usually backed by a getter.
pub fn readout<T: ParamValue>(name: impl Into<String>, value: T) -> Parameter<T> {
    Parameter::new(name, value).read_only()
}

/// N-dimensional array.
pub fn array<A, D>(name: impl Into<String>, value: Array<A, D>) -> Parameter<Array<A, D>>
where
    Array<A, D>: ParamValue,
    D: Dimension,
{
    Parameter::new(name, value).with_dtype("array")
}

/// The `connected` checkbox every hardware Piece carries.
pub fn connected() -> Parameter<bool> {
    checkbox("connected", false)
}

/// Route a boolean parameter to a connect and a disconnect routine.
///
/// `true` runs `connect`, `false` runs `disconnect`; on success the requested
/// state is stored.
pub fn wire_connection<C, CF, D, DF>(param: &Parameter<bool>, connect: C, disconnect: D)
where
    C: Fn() -> CF + Send + Sync + 'static,
    CF: Future<Output = PieceResult<()>> + Send + 'static,
    D: Fn() -> DF + Send + Sync + 'static,
    DF: Future<Output = PieceResult<()>> + Send + 'static,
{
    let connect = Arc::new(connect);
    let disconnect = Arc::new(disconnect);
    param.set_setter(move |value: bool| {
        let connect = connect.clone();
        let disconnect = disconnect.clone();
        async move {
            if value {
                connect().await?;
            } else {
                disconnect().await?;
            }
            Ok(Some(value))
        }
    });
}
