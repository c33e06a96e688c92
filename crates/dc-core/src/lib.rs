//! # dc-core
//!
//! Core types for dcharvest: the [`Shape`] histogram, the datacard [`Model`]
//! container with its composable [`Predicate`] filters, the morph
//! [`Workspace`], and the traits through which the pipeline talks to shape
//! storage, systematic tables, interpolation and card serialization.

#![warn(clippy::all)]

pub mod error;
pub mod filter;
pub mod model;
pub mod shape;
pub mod traits;
pub mod types;
pub mod workspace;

pub use error::{Error, Result};
pub use filter::{Entity, Predicate, PredicateExt};
pub use model::{Bin, DATA_OBS, Model, Observation, Process, Systematic, SystematicKind};
pub use shape::Shape;
pub use traits::{
    CardWriter, InterpolatedShape, InterpolationEngine, ShapeExtractor, SystematicsInjector,
};
pub use types::{MassParameter, MorphTemplate};
pub use workspace::Workspace;
