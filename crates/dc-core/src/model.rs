//! The datacard model container.
//!
//! A [`Model`] holds every observation, process and systematic of a run. Each
//! entity carries a copy of the [`Bin`] it lives in, so a filtered copy of the
//! model is self-describing and can be handed to a card writer on its own.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::filter::{Entity, Predicate};
use crate::shape::Shape;
use crate::{Error, Result};

/// Process name used for observed data.
pub const DATA_OBS: &str = "data_obs";

/// A detector category (analysis region).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    pub analysis: String,
    pub era: String,
    pub channel: String,
    pub bin_id: u32,
    pub name: String,
    control_region: bool,
}

impl Bin {
    /// Name suffix that marks a control-region category.
    pub const CONTROL_REGION_SUFFIX: &'static str = "_cr";

    /// Create a bin; the control-region flag is derived here, once, from the name.
    pub fn new(
        analysis: impl Into<String>,
        era: impl Into<String>,
        channel: impl Into<String>,
        bin_id: u32,
        name: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let control_region = name.ends_with(Self::CONTROL_REGION_SUFFIX);
        Self {
            analysis: analysis.into(),
            era: era.into(),
            channel: channel.into(),
            bin_id,
            name,
            control_region,
        }
    }

    pub fn is_control_region(&self) -> bool {
        self.control_region
    }

    /// Bins are identified by channel and name; names are only unique within a channel.
    pub fn same_bin(&self, other: &Bin) -> bool {
        self.channel == other.channel && self.name == other.name
    }

    /// Rename the bin. The control-region flag is kept as it was at creation.
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }
}

/// An expected-yield contributor to a bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub bin: Bin,
    pub name: String,
    /// Template mass for signal processes; `None` for mass-independent entries.
    pub mass: Option<f64>,
    pub signal: bool,
    rate: f64,
    shape: Option<Shape>,
    /// Workspace object describing this process (set after morphing).
    #[serde(default)]
    pub pdf: Option<String>,
}

impl Process {
    pub fn new(bin: Bin, name: impl Into<String>, signal: bool, mass: Option<f64>) -> Self {
        Self { bin, name: name.into(), mass, signal, rate: 0.0, shape: None, pdf: None }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.rate = rate;
    }

    pub fn shape(&self) -> Option<&Shape> {
        self.shape.as_ref()
    }

    /// Replace the owned shape; with `set_rate` the rate becomes the shape integral.
    pub fn set_shape(&mut self, shape: Shape, set_rate: bool) {
        if set_rate {
            self.rate = shape.integral();
        }
        self.shape = Some(shape);
    }

    pub fn take_shape(&mut self) -> Option<Shape> {
        self.shape.take()
    }

    /// Mass as used in naming templates (`*` for mass-independent entries).
    pub fn mass_label(&self) -> String {
        mass_label(self.mass)
    }
}

/// Observed data for a bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub bin: Bin,
    rate: f64,
    shape: Option<Shape>,
}

impl Observation {
    pub fn new(bin: Bin) -> Self {
        Self { bin, rate: 0.0, shape: None }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn shape(&self) -> Option<&Shape> {
        self.shape.as_ref()
    }

    pub fn set_shape(&mut self, shape: Shape, set_rate: bool) {
        if set_rate {
            self.rate = shape.integral();
        }
        self.shape = Some(shape);
    }
}

/// Payload of a systematic uncertainty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SystematicKind {
    /// Log-normal scalar; `value_d = None` means a symmetric `value_u`.
    #[serde(rename = "lnN")]
    LnN { value_u: f64, value_d: Option<f64> },
    /// Up/down shape pair. `value_u`/`value_d` are the yield ratios to nominal.
    /// Shapes are `None` once folded into a workspace object.
    #[serde(rename = "shape")]
    Shape { value_u: f64, value_d: f64, shape_u: Option<Shape>, shape_d: Option<Shape> },
}

/// A named uncertainty on one (bin, process) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Systematic {
    pub bin: Bin,
    pub process: String,
    pub signal: bool,
    pub mass: Option<f64>,
    pub name: String,
    pub kind: SystematicKind,
}

impl Systematic {
    /// A systematic attached to `process`.
    pub fn for_process(process: &Process, name: impl Into<String>, kind: SystematicKind) -> Self {
        Self {
            bin: process.bin.clone(),
            process: process.name.clone(),
            signal: process.signal,
            mass: process.mass,
            name: name.into(),
            kind,
        }
    }

    /// Whether this systematic belongs to `process` (same bin, name and mass).
    pub fn belongs_to(&self, process: &Process) -> bool {
        self.bin.same_bin(&process.bin) && self.process == process.name && self.mass == process.mass
    }

    pub fn is_shape(&self) -> bool {
        matches!(self.kind, SystematicKind::Shape { .. })
    }

    /// Mutable access to the up/down shapes, if any.
    pub fn shapes_mut(&mut self) -> impl Iterator<Item = &mut Shape> {
        let (u, d) = match &mut self.kind {
            SystematicKind::Shape { shape_u, shape_d, .. } => (shape_u.as_mut(), shape_d.as_mut()),
            SystematicKind::LnN { .. } => (None, None),
        };
        u.into_iter().chain(d)
    }
}

/// Aggregate of all observations, processes and systematics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    observations: Vec<Observation>,
    processes: Vec<Process>,
    systematics: Vec<Systematic>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty() && self.processes.is_empty() && self.systematics.is_empty()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn systematics(&self) -> &[Systematic] {
        &self.systematics
    }

    /// Add one observation per bin.
    pub fn add_observations(&mut self, bins: &[Bin]) {
        self.observations.extend(bins.iter().cloned().map(Observation::new));
    }

    /// Add every combination of bin × process name × mass.
    ///
    /// `masses` empty means mass-independent processes.
    pub fn add_processes<S: AsRef<str>>(
        &mut self,
        bins: &[Bin],
        names: &[S],
        signal: bool,
        masses: &[f64],
    ) {
        let masses: Vec<Option<f64>> =
            if masses.is_empty() { vec![None] } else { masses.iter().copied().map(Some).collect() };
        for mass in masses {
            for bin in bins {
                for name in names {
                    self.processes.push(Process::new(bin.clone(), name.as_ref(), signal, mass));
                }
            }
        }
    }

    pub fn add_process(&mut self, process: Process) {
        self.processes.push(process);
    }

    pub fn add_systematic(&mut self, systematic: Systematic) {
        self.systematics.push(systematic);
    }

    /// Read-only copy of the entities matching `pred`.
    pub fn filtered<P: Predicate + ?Sized>(&self, pred: &P) -> Model {
        Model {
            observations: self
                .observations
                .iter()
                .filter(|o| pred.matches(&Entity::Observation(o)))
                .cloned()
                .collect(),
            processes: self
                .processes
                .iter()
                .filter(|p| pred.matches(&Entity::Process(p)))
                .cloned()
                .collect(),
            systematics: self
                .systematics
                .iter()
                .filter(|s| pred.matches(&Entity::Systematic(s)))
                .cloned()
                .collect(),
        }
    }

    /// Remove every entity matching `pred`.
    pub fn filter_all<P: Predicate + ?Sized>(&mut self, pred: &P) {
        self.observations.retain(|o| !pred.matches(&Entity::Observation(o)));
        self.processes.retain(|p| !pred.matches(&Entity::Process(p)));
        self.systematics.retain(|s| !pred.matches(&Entity::Systematic(s)));
    }

    /// Remove systematics matching `pred`.
    pub fn filter_systematics<P: Predicate + ?Sized>(&mut self, pred: &P) {
        self.systematics.retain(|s| !pred.matches(&Entity::Systematic(s)));
    }

    pub fn processes_matching<'a, P: Predicate + ?Sized>(
        &'a self,
        pred: &'a P,
    ) -> impl Iterator<Item = &'a Process> + 'a {
        self.processes.iter().filter(move |p| pred.matches(&Entity::Process(p)))
    }

    pub fn observations_matching<'a, P: Predicate + ?Sized>(
        &'a self,
        pred: &'a P,
    ) -> impl Iterator<Item = &'a Observation> + 'a {
        self.observations.iter().filter(move |o| pred.matches(&Entity::Observation(o)))
    }

    pub fn systematics_matching<'a, P: Predicate + ?Sized>(
        &'a self,
        pred: &'a P,
    ) -> impl Iterator<Item = &'a Systematic> + 'a {
        self.systematics.iter().filter(move |s| pred.matches(&Entity::Systematic(s)))
    }

    pub fn for_each_observation_mut<P: Predicate + ?Sized>(
        &mut self,
        pred: &P,
        mut f: impl FnMut(&mut Observation),
    ) {
        for o in &mut self.observations {
            if pred.matches(&Entity::Observation(o)) {
                f(o);
            }
        }
    }

    pub fn for_each_process_mut<P: Predicate + ?Sized>(
        &mut self,
        pred: &P,
        mut f: impl FnMut(&mut Process),
    ) {
        for p in &mut self.processes {
            if pred.matches(&Entity::Process(p)) {
                f(p);
            }
        }
    }

    pub fn for_each_systematic_mut<P: Predicate + ?Sized>(
        &mut self,
        pred: &P,
        mut f: impl FnMut(&mut Systematic),
    ) {
        for s in &mut self.systematics {
            if pred.matches(&Entity::Systematic(s)) {
                f(s);
            }
        }
    }

    /// Fallible variant of [`Model::for_each_process_mut`]; stops at the first error.
    pub fn try_for_each_process_mut<P: Predicate + ?Sized>(
        &mut self,
        pred: &P,
        mut f: impl FnMut(&mut Process) -> Result<()>,
    ) -> Result<()> {
        for p in &mut self.processes {
            if pred.matches(&Entity::Process(p)) {
                f(p)?;
            }
        }
        Ok(())
    }

    /// Unique bins across all entities, ordered by name, then channel.
    pub fn bins(&self) -> Vec<Bin> {
        let mut seen = BTreeSet::new();
        let mut bins: Vec<Bin> = self
            .observations
            .iter()
            .map(|o| &o.bin)
            .chain(self.processes.iter().map(|p| &p.bin))
            .chain(self.systematics.iter().map(|s| &s.bin))
            .filter(|b| seen.insert((b.channel.clone(), b.name.clone())))
            .cloned()
            .collect();
        bins.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.channel.cmp(&b.channel)));
        bins
    }

    pub fn bin(&self, name: &str) -> Option<&Bin> {
        self.observations
            .iter()
            .map(|o| &o.bin)
            .chain(self.processes.iter().map(|p| &p.bin))
            .find(|b| b.name == name)
    }

    pub fn bin_set(&self) -> BTreeSet<String> {
        self.bins().into_iter().map(|b| b.name).collect()
    }

    pub fn channel_set(&self) -> BTreeSet<String> {
        self.bins().into_iter().map(|b| b.channel).collect()
    }

    pub fn process_set(&self) -> BTreeSet<String> {
        self.processes.iter().map(|p| p.name.clone()).collect()
    }

    /// Sum of all background shapes in `bin`, or `None` if it has no shaped background.
    pub fn background_shape(&self, bin: &Bin) -> Result<Option<Shape>> {
        let mut total: Option<Shape> = None;
        for p in self.processes.iter().filter(|p| p.bin.same_bin(bin) && !p.signal) {
            let Some(shape) = p.shape() else { continue };
            match total.as_mut() {
                None => total = Some(shape.clone()),
                Some(t) => t.add(shape).map_err(|e| {
                    Error::IncompatibleBinning(format!(
                        "bin '{}' ({}) process '{}': {}",
                        bin.name, bin.channel, p.name, e
                    ))
                })?,
            }
        }
        Ok(total)
    }

    /// Rename every bin; `rename` sees the current bin and returns its new name.
    pub fn rename_bins(&mut self, rename: impl Fn(&Bin) -> String) {
        let apply = |bin: &mut Bin| {
            let new_name = rename(bin);
            bin.rename(new_name);
        };
        self.observations.iter_mut().for_each(|o| apply(&mut o.bin));
        self.processes.iter_mut().for_each(|p| apply(&mut p.bin));
        self.systematics.iter_mut().for_each(|s| apply(&mut s.bin));
    }
}

/// Format a template mass the way naming templates expect it (`90`, `1000`, `*`).
pub fn mass_label(mass: Option<f64>) -> String {
    match mass {
        Some(m) => format!("{}", m),
        None => "*".to_string(),
    }
}
