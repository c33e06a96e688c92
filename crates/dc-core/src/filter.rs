//! Composable predicates over model entities.
//!
//! Every pipeline stage works on a subset of the model selected by a
//! [`Predicate`]. Leaf predicates test one shared field; [`PredicateExt`]
//! combines them with `and`/`or`/`not`. Any `Fn(&Entity) -> bool` closure is
//! a predicate as well.
//!
//! Process-level predicates ([`signals`], [`backgrounds`], [`process`]) follow
//! the usual convention of letting observations through unless they name them
//! explicitly, so `backgrounds().and(channel(["et"]))` still carries the data.

use std::collections::BTreeSet;

use crate::model::{Bin, DATA_OBS, Observation, Process, Systematic};

/// A borrowed model entity.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Bin(&'a Bin),
    Process(&'a Process),
    Observation(&'a Observation),
    Systematic(&'a Systematic),
}

impl<'a> Entity<'a> {
    pub fn bin(&self) -> &'a Bin {
        match *self {
            Entity::Bin(b) => b,
            Entity::Process(p) => &p.bin,
            Entity::Observation(o) => &o.bin,
            Entity::Systematic(s) => &s.bin,
        }
    }

    /// Process name; observations report `data_obs`, bins report nothing.
    pub fn process(&self) -> Option<&'a str> {
        match *self {
            Entity::Bin(_) => None,
            Entity::Process(p) => Some(&p.name),
            Entity::Observation(_) => Some(DATA_OBS),
            Entity::Systematic(s) => Some(&s.process),
        }
    }

    /// Signal flag for processes and systematics.
    pub fn is_signal(&self) -> Option<bool> {
        match *self {
            Entity::Process(p) => Some(p.signal),
            Entity::Systematic(s) => Some(s.signal),
            Entity::Bin(_) | Entity::Observation(_) => None,
        }
    }

    pub fn mass(&self) -> Option<f64> {
        match *self {
            Entity::Process(p) => p.mass,
            Entity::Systematic(s) => s.mass,
            Entity::Bin(_) | Entity::Observation(_) => None,
        }
    }
}

/// Selection criterion over entities.
pub trait Predicate {
    fn matches(&self, entity: &Entity<'_>) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&Entity<'_>) -> bool,
{
    fn matches(&self, entity: &Entity<'_>) -> bool {
        self(entity)
    }
}

/// Both predicates hold.
#[derive(Debug, Clone)]
pub struct And<A, B>(A, B);

/// Either predicate holds.
#[derive(Debug, Clone)]
pub struct Or<A, B>(A, B);

/// The inner predicate does not hold.
#[derive(Debug, Clone)]
pub struct Not<A>(A);

impl<A: Predicate, B: Predicate> Predicate for And<A, B> {
    fn matches(&self, entity: &Entity<'_>) -> bool {
        self.0.matches(entity) && self.1.matches(entity)
    }
}

impl<A: Predicate, B: Predicate> Predicate for Or<A, B> {
    fn matches(&self, entity: &Entity<'_>) -> bool {
        self.0.matches(entity) || self.1.matches(entity)
    }
}

impl<A: Predicate> Predicate for Not<A> {
    fn matches(&self, entity: &Entity<'_>) -> bool {
        !self.0.matches(entity)
    }
}

/// Combinators available on every predicate.
pub trait PredicateExt: Predicate + Sized {
    fn and<P: Predicate>(self, other: P) -> And<Self, P> {
        And(self, other)
    }

    fn or<P: Predicate>(self, other: P) -> Or<Self, P> {
        Or(self, other)
    }

    fn not(self) -> Not<Self> {
        Not(self)
    }
}

impl<T: Predicate> PredicateExt for T {}

/// Matches everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Everything;

impl Predicate for Everything {
    fn matches(&self, _entity: &Entity<'_>) -> bool {
        true
    }
}

pub fn everything() -> Everything {
    Everything
}

/// Bin channel is one of the given names.
#[derive(Debug, Clone)]
pub struct Channels(BTreeSet<String>);

impl Predicate for Channels {
    fn matches(&self, entity: &Entity<'_>) -> bool {
        self.0.contains(&entity.bin().channel)
    }
}

pub fn channel<I, S>(names: I) -> Channels
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Channels(names.into_iter().map(Into::into).collect())
}

/// Bin name is one of the given names.
#[derive(Debug, Clone)]
pub struct BinNames(BTreeSet<String>);

impl Predicate for BinNames {
    fn matches(&self, entity: &Entity<'_>) -> bool {
        self.0.contains(&entity.bin().name)
    }
}

pub fn bin_name<I, S>(names: I) -> BinNames
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    BinNames(names.into_iter().map(Into::into).collect())
}

/// Bin id is one of the given ids.
#[derive(Debug, Clone)]
pub struct BinIds(BTreeSet<u32>);

impl Predicate for BinIds {
    fn matches(&self, entity: &Entity<'_>) -> bool {
        self.0.contains(&entity.bin().bin_id)
    }
}

pub fn bin_id(ids: impl IntoIterator<Item = u32>) -> BinIds {
    BinIds(ids.into_iter().collect())
}

/// Process name is one of the given names. Bins always match.
#[derive(Debug, Clone)]
pub struct Processes(BTreeSet<String>);

impl Predicate for Processes {
    fn matches(&self, entity: &Entity<'_>) -> bool {
        entity.process().is_none_or(|p| self.0.contains(p))
    }
}

pub fn process<I, S>(names: I) -> Processes
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Processes(names.into_iter().map(Into::into).collect())
}

/// Signal processes and their systematics (bins and observations pass).
#[derive(Debug, Clone, Copy)]
pub struct Signals;

impl Predicate for Signals {
    fn matches(&self, entity: &Entity<'_>) -> bool {
        entity.is_signal().unwrap_or(true)
    }
}

pub fn signals() -> Signals {
    Signals
}

/// Background processes and their systematics (bins and observations pass).
#[derive(Debug, Clone, Copy)]
pub struct Backgrounds;

impl Predicate for Backgrounds {
    fn matches(&self, entity: &Entity<'_>) -> bool {
        entity.is_signal().is_none_or(|s| !s)
    }
}

pub fn backgrounds() -> Backgrounds {
    Backgrounds
}

/// Entity lives in a control-region bin.
#[derive(Debug, Clone, Copy)]
pub struct ControlRegion;

impl Predicate for ControlRegion {
    fn matches(&self, entity: &Entity<'_>) -> bool {
        entity.bin().is_control_region()
    }
}

pub fn control_region() -> ControlRegion {
    ControlRegion
}
