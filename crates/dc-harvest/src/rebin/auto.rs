//! Adaptive rebinning driven by the total background of each bin.

use dc_core::{Bin, Entity, Error, Model, Predicate, Result, Shape};
use serde::{Deserialize, Serialize};

use super::apply_edges;

/// Merging heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RebinMode {
    /// Repeatedly merge the failing bin with the lowest content into its
    /// lower-content neighbour.
    LowestContent,
    /// Starting from the outermost bins, fold failing bins towards the peak.
    #[default]
    TailsToPeak,
}

impl TryFrom<u8> for RebinMode {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(RebinMode::LowestContent),
            1 => Ok(RebinMode::TailsToPeak),
            other => Err(Error::Configuration(format!("unknown rebin mode {}", other))),
        }
    }
}

impl From<RebinMode> for u8 {
    fn from(m: RebinMode) -> u8 {
        match m {
            RebinMode::LowestContent => 0,
            RebinMode::TailsToPeak => 1,
        }
    }
}

/// Result of rebinning one bin.
#[derive(Debug, Clone, PartialEq)]
pub struct RebinOutcome {
    pub channel: String,
    pub bin: String,
    pub original: Vec<f64>,
    pub edges: Vec<f64>,
    /// Zero-integral processes that did not take part.
    pub skipped: Vec<String>,
}

impl RebinOutcome {
    pub fn changed(&self) -> bool {
        self.original != self.edges
    }
}

/// Working copy of a shape being merged.
struct Merging {
    edges: Vec<f64>,
    contents: Vec<f64>,
    err2: Vec<f64>,
}

impl Merging {
    fn new(shape: &Shape) -> Self {
        Self {
            edges: shape.edges().to_vec(),
            contents: shape.contents().to_vec(),
            err2: shape.errors().iter().map(|e| e * e).collect(),
        }
    }

    fn len(&self) -> usize {
        self.contents.len()
    }

    /// Merge bins `i` and `i + 1`.
    fn merge(&mut self, i: usize) {
        self.contents[i] += self.contents[i + 1];
        self.err2[i] += self.err2[i + 1];
        self.contents.remove(i + 1);
        self.err2.remove(i + 1);
        self.edges.remove(i + 1);
    }
}

/// Adaptive rebinner.
#[derive(Debug, Clone)]
pub struct AutoRebin {
    bin_threshold: f64,
    uncert_fraction: Option<f64>,
    mode: RebinMode,
    perform: bool,
}

impl Default for AutoRebin {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoRebin {
    pub fn new() -> Self {
        Self { bin_threshold: 0.0, uncert_fraction: None, mode: RebinMode::default(), perform: true }
    }

    /// Bins with total background content at or below `v` are merged.
    pub fn bin_threshold(mut self, v: f64) -> Self {
        self.bin_threshold = v;
        self
    }

    /// Bins whose relative background uncertainty exceeds `v` are merged.
    pub fn uncert_fraction(mut self, v: Option<f64>) -> Self {
        self.uncert_fraction = v;
        self
    }

    pub fn mode(mut self, mode: RebinMode) -> Self {
        self.mode = mode;
        self
    }

    /// With `false`, [`AutoRebin::rebin`] only reports the proposed edges.
    pub fn perform(mut self, perform: bool) -> Self {
        self.perform = perform;
        self
    }

    fn fails(&self, w: &Merging, i: usize) -> bool {
        let c = w.contents[i];
        c <= self.bin_threshold
            || self.uncert_fraction.is_some_and(|f| c <= 0.0 || w.err2[i].sqrt() / c > f)
    }

    fn first_failing_lowest(&self, w: &Merging) -> Option<usize> {
        (0..w.len())
            .filter(|&i| self.fails(w, i))
            .min_by(|&a, &b| w.contents[a].total_cmp(&w.contents[b]))
    }

    fn merge_lowest(&self, w: &mut Merging) {
        while w.len() > 1 {
            let Some(i) = self.first_failing_lowest(w) else { break };
            let n = w.len();
            let into_left = if i == 0 {
                false
            } else if i == n - 1 {
                true
            } else {
                w.contents[i - 1] <= w.contents[i + 1]
            };
            w.merge(if into_left { i - 1 } else { i });
        }
    }

    fn merge_tails(&self, w: &mut Merging) {
        if w.len() < 2 {
            return;
        }
        let mut peak = 0;
        for i in 1..w.len() {
            if w.contents[i] > w.contents[peak] {
                peak = i;
            }
        }

        let mut j = w.len() - 1;
        while j > peak {
            if self.fails(w, j) {
                w.merge(j - 1);
            }
            j -= 1;
        }

        let mut i = 0;
        while i < peak {
            if self.fails(w, i) {
                w.merge(i);
                peak -= 1;
            } else {
                i += 1;
            }
        }

        // The peak itself may still fail (e.g. an empty distribution).
        self.merge_lowest(w);
    }

    /// Edges proposed for a total background shape.
    pub fn propose(&self, total: &Shape) -> Vec<f64> {
        let mut w = Merging::new(total);
        match self.mode {
            RebinMode::LowestContent => self.merge_lowest(&mut w),
            RebinMode::TailsToPeak => self.merge_tails(&mut w),
        }
        w.edges
    }

    /// Proposal for one bin of the model, or `None` if it has no usable background.
    fn plan(&self, model: &Model, target: &Bin) -> Result<Option<RebinOutcome>> {
        let bin = target.name.as_str();
        let mut reference: Option<(&str, &Shape)> = None;
        let mut total: Option<Shape> = None;
        let mut skipped = Vec::new();

        for p in model.processes().iter().filter(|p| p.bin.same_bin(target)) {
            let Some(shape) = p.shape() else { continue };
            if shape.integral() == 0.0 {
                log::warn!("{}/{}: zero integral, not used for rebinning", bin, p.name);
                skipped.push(p.name.clone());
                continue;
            }
            match reference {
                None => reference = Some((p.name.as_str(), shape)),
                Some((name, r)) if !r.same_binning(shape) => {
                    return Err(Error::IncompatibleBinning(format!(
                        "bin '{}': process '{}' has edges {:?}, process '{}' has {:?}",
                        bin,
                        p.name,
                        shape.edges(),
                        name,
                        r.edges()
                    )));
                }
                Some(_) => {}
            }
            if !p.signal {
                match total.as_mut() {
                    None => total = Some(shape.clone()),
                    Some(t) => t.add(shape)?,
                }
            }
        }

        let Some(total) = total else {
            log::debug!("{}: no background shapes, binning unchanged", bin);
            return Ok(None);
        };
        Ok(Some(RebinOutcome {
            channel: target.channel.clone(),
            bin: bin.to_string(),
            original: total.edges().to_vec(),
            edges: self.propose(&total),
            skipped,
        }))
    }

    /// Rebin every bin selected by `filter`.
    ///
    /// Proposals are computed in parallel from the current model and then
    /// applied one bin at a time, in bin order.
    pub fn rebin<P: Predicate + ?Sized>(
        &self,
        model: &mut Model,
        filter: &P,
    ) -> Result<Vec<RebinOutcome>> {
        use rayon::prelude::*;

        let bins: Vec<Bin> =
            model.bins().into_iter().filter(|b| filter.matches(&Entity::Bin(b))).collect();

        let snapshot: &Model = &*model;
        let planned: Vec<(&Bin, RebinOutcome)> = bins
            .par_iter()
            .map(|b| self.plan(snapshot, b).map(|o| o.map(|o| (b, o))))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        for (target, o) in &planned {
            if !o.changed() {
                log::debug!("{}/{}: binning unchanged ({} bins)", o.channel, o.bin, o.edges.len() - 1);
                continue;
            }
            log::info!(
                "{}/{}: {} -> {} bins{}",
                o.channel,
                o.bin,
                o.original.len() - 1,
                o.edges.len() - 1,
                if self.perform { "" } else { " (not applied)" }
            );
            if self.perform {
                apply_edges(model, target, &o.edges)?;
            }
        }
        Ok(planned.into_iter().map(|(_, o)| o).collect())
    }
}
