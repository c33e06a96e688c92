//! Collaborator traits.
//!
//! The pipeline talks to shape storage, systematic tables, the interpolation
//! engine and the card serializer only through these traits, so each can be
//! swapped without touching the algorithms.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::Result;
use crate::filter::Predicate;
use crate::model::Model;
use crate::shape::Shape;
use crate::types::{MassParameter, MorphTemplate};
use crate::workspace::Workspace;

/// Pulls named templates into the model.
pub trait ShapeExtractor {
    /// Fill the shapes of every process/observation (and the shape systematics
    /// attached to them) selected by `filter`, reading from `source`.
    ///
    /// Templates may use the placeholders `$BIN`, `$PROCESS`, `$MASS` and
    /// `$SYSTEMATIC`.
    fn extract(
        &mut self,
        model: &mut Model,
        filter: &dyn Predicate,
        source: &Path,
        nominal: &str,
        systematic: &str,
    ) -> Result<()>;
}

/// Populates systematic entries for a channel.
pub trait SystematicsInjector {
    fn inject(&self, model: &mut Model, channel: &str, control_region: bool) -> Result<()>;
}

/// A shape that can be evaluated at any value of a continuous parameter.
pub trait InterpolatedShape: fmt::Debug + Send + Sync {
    fn parameter(&self) -> &MassParameter;

    /// Anchor templates, ordered by mass.
    fn anchors(&self) -> &[MorphTemplate];

    /// Interpolation method name (e.g. `vertical`).
    fn method(&self) -> &str;

    /// Nominal shape at `value`.
    fn evaluate(&self, value: f64) -> Result<Shape>;

    /// Up/down shapes of systematic `name` at `value`.
    fn evaluate_variation(&self, name: &str, value: f64) -> Result<(Shape, Shape)>;
}

/// Builds interpolated shapes from discrete templates.
pub trait InterpolationEngine {
    /// `templates` must be ordered by mass; the result depends only on that order.
    fn interpolate(
        &self,
        templates: Vec<MorphTemplate>,
        parameter: &MassParameter,
    ) -> Result<Box<dyn InterpolatedShape>>;
}

/// Serializes one partition of the model.
pub trait CardWriter {
    /// Write the cards for `model` under partition `tag`; returns the files written.
    fn write(&mut self, tag: &str, model: &Model, workspace: &Workspace) -> Result<Vec<PathBuf>>;
}
