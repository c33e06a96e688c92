//! Common data types shared by the morphing collaborators.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::shape::Shape;

/// A named continuous parameter (e.g. `mA`) with its allowed range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MassParameter {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

impl MassParameter {
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self { name: name.into(), min, max }
    }

    /// Clamp `value` into the parameter range.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// One discrete-mass template (anchor point) used for interpolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphTemplate {
    pub mass: f64,
    /// Nominal shape, absolute yields.
    pub shape: Shape,
    /// Shape systematics at this mass, keyed by name: (up, down).
    #[serde(default)]
    pub variations: BTreeMap<String, (Shape, Shape)>,
}

impl MorphTemplate {
    pub fn new(mass: f64, shape: Shape) -> Self {
        Self { mass, shape, variations: BTreeMap::new() }
    }
}
