//! Data side of image previews.
//!
//! A front end draws the pictures; this module keeps the state a preview
//! needs (autolevel toggle, white point, lineout positions) and computes
//! display levels and lineout profiles from an image.

use crate::action::{Action, ActionSet};
use crate::param;
use crate::parameter::{Parameter, ParameterSet};
use ndarray::{Array1, Array2, ArrayView2};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

/// Preview options a Piece chooses at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewSettings {
    /// Offer a live-refresh toggle.
    pub live_toggle: bool,
    /// Offer an autolevel toggle.
    pub autolevel_toggle: bool,
    /// White point when autolevel is off.
    pub max_counts: f64,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            live_toggle: false,
            autolevel_toggle: false,
            max_counts: 255.0,
        }
    }
}

/// Image preview state.
#[derive(Debug, Clone)]
pub struct ImagePreview {
    settings: PreviewSettings,
    autolevel: Option<Parameter<bool>>,
}

impl ImagePreview {
    /// Create the preview; an `autolevel` checkbox exists only when the
    /// settings ask for it.
    pub fn new(settings: PreviewSettings) -> Self {
        let autolevel = settings
            .autolevel_toggle
            .then(|| param::checkbox("autolevel", false));
        Self {
            settings,
            autolevel,
        }
    }

    /// Register the preview's parameters.
    pub fn register(&self, params: &mut ParameterSet) {
        if let Some(autolevel) = &self.autolevel {
            params.register(autolevel.clone());
        }
    }

    /// Settings in use.
    pub fn settings(&self) -> PreviewSettings {
        self.settings
    }

    /// Whether autolevel is switched on.
    pub fn autolevel(&self) -> bool {
        self.autolevel.as_ref().is_some_and(Parameter::value)
    }

    /// Display levels for `image`.
    pub fn levels<A: Copy + Into<f64>>(&self, image: ArrayView2<'_, A>) -> (f64, f64) {
        levels(image, self.autolevel(), self.settings.max_counts)
    }
}

/// `(min, max)` of the image when `autolevel` is on and the image is not
/// empty, otherwise `(0, max_counts)`.
pub fn levels<A: Copy + Into<f64>>(
    image: ArrayView2<'_, A>,
    autolevel: bool,
    max_counts: f64,
) -> (f64, f64) {
    if !autolevel || image.is_empty() {
        return (0.0, max_counts);
    }
    image.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
        let v: f64 = v.into();
        (lo.min(v), hi.max(v))
    })
}

/// Image preview with a horizontal and a vertical lineout.
#[derive(Debug, Clone)]
pub struct LineoutPreview {
    preview: ImagePreview,
    circle_r: Parameter<i64>,
    lines: Arc<Mutex<(usize, usize)>>,
}

impl LineoutPreview {
    /// Create the preview with a hidden `circle_r` spinbox (default 200).
    pub fn new(settings: PreviewSettings) -> Self {
        Self {
            preview: ImagePreview::new(settings),
            circle_r: param::spinbox("circle_r", 200i64).hidden(),
            lines: Arc::new(Mutex::new((0, 0))),
        }
    }

    /// Register `circle_r` and the "Centre lines" action. The action centres
    /// the lines on the current value of `image`.
    pub fn register(
        &self,
        params: &mut ParameterSet,
        actions: &mut ActionSet,
        image: &Parameter<Array2<f64>>,
    ) {
        self.preview.register(params);
        params.register(self.circle_r.clone());

        let (lines, image) = (self.lines.clone(), image.clone());
        actions.register(
            Action::new("Centre lines", move |_| {
                let (rows, cols) = image.value().dim();
                let centre = (rows / 2, cols / 2);
                *lines.lock() = centre;
                async move { Ok(json!([centre.0, centre.1])) }
            })
            .with_shortcut("C"),
        );
    }

    /// Inner image preview.
    pub fn preview(&self) -> &ImagePreview {
        &self.preview
    }

    /// Move the lines to (row, column).
    pub fn set_lines(&self, row: usize, column: usize) {
        *self.lines.lock() = (row, column);
    }

    /// Current (row, column) line positions.
    pub fn lines(&self) -> (usize, usize) {
        *self.lines.lock()
    }

    /// Row profile and column profile through the line crossing.
    ///
    /// Line positions are clamped to the image bounds; an empty image yields
    /// empty profiles.
    pub fn lineouts(&self, image: ArrayView2<'_, f64>) -> (Array1<f64>, Array1<f64>) {
        let (rows, cols) = image.dim();
        if rows == 0 || cols == 0 {
            return (Array1::zeros(0), Array1::zeros(0));
        }
        let mut lines = self.lines.lock();
        lines.0 = lines.0.min(rows - 1);
        lines.1 = lines.1.min(cols - 1);
        (image.row(lines.0).to_owned(), image.column(lines.1).to_owned())
    }

    /// Crossing circle as (column, row, radius).
    pub fn circle(&self) -> (usize, usize, i64) {
        let (row, column) = self.lines();
        (column, row, self.circle_r.value())
    }
}
