//! # dc-harvest
//!
//! Datacard production for the MSSM H→ττ search.
//!
//! The [`Harvester`] runs the stages in order: category registry and model
//! population, systematics, shape extraction, control-region normalization,
//! adaptive and manual rebinning, bin-by-bin uncertainties, standard bin
//! names, signal morphing, and card assembly.
//!
//! Each stage is also usable on its own against a [`dc_core::Model`].

#![warn(clippy::all)]

pub mod bbb;
pub mod cards;
pub mod categories;
pub mod config;
pub mod control_region;
pub mod interp;
pub mod morph;
pub mod naming;
pub mod pipeline;
pub mod rebin;
pub mod shapes;
pub mod systematics;
pub mod writer;

pub use bbb::BinByBinFactory;
pub use cards::{AssemblyReport, Partition, PartitionFilter, assemble, standard_partitions};
pub use categories::CategoryRegistry;
pub use config::{Category, HarvestConfig, MassConvention};
pub use control_region::{ControlRegionReport, normalize_control_regions};
pub use interp::VerticalInterpolation;
pub use morph::{MorphDiagnostics, MorphDriver, MorphReport, extract_pdfs, morph_key};
pub use naming::set_standard_bin_names;
pub use pipeline::{Harvest, Harvester, RunSummary};
pub use rebin::{AutoRebin, ManualRebin, RebinMode, RebinOutcome};
pub use shapes::JsonShapeExtractor;
pub use systematics::{MssmSystematics, SystematicRule};
pub use writer::TextCardWriter;
