//! Bin-by-bin statistical uncertainties.
//!
//! Each (process, histogram bin) with a significant statistical error gets its
//! own shape systematic. Small errors are first merged into the larger ones of
//! the same histogram bin, keeping the total variance, so the number of
//! nuisance parameters stays manageable.

use std::collections::{BTreeMap, HashMap};

use dc_core::{Error, Model, Predicate, Process, Result, Shape, Systematic, SystematicKind};

/// Default systematic name; `$#` is the 1-based histogram bin index.
pub const DEFAULT_PATTERN: &str = "CMS_$ANALYSIS_$BIN_$PROCESS_bin_$#";

/// Builder and runner for bin-by-bin uncertainties.
#[derive(Debug, Clone)]
pub struct BinByBinFactory {
    add_threshold: f64,
    merge_threshold: f64,
    fix_norm: bool,
    pattern: String,
}

impl Default for BinByBinFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-bin result, computed independently of other bins.
struct BinPlan {
    errors: Vec<(ProcessKey, Vec<f64>)>,
    systematics: Vec<Systematic>,
}

type ProcessKey = (String, String, String, Option<u64>);

fn key(p: &Process) -> ProcessKey {
    (p.bin.channel.clone(), p.bin.name.clone(), p.name.clone(), p.mass.map(f64::to_bits))
}

impl BinByBinFactory {
    pub fn new() -> Self {
        Self { add_threshold: 0.0, merge_threshold: 0.0, fix_norm: true, pattern: DEFAULT_PATTERN.into() }
    }

    /// Minimum relative error for an entry to be created (and merged).
    pub fn add_threshold(mut self, v: f64) -> Self {
        self.add_threshold = v;
        self
    }

    /// Fraction of the per-bin variance that may be folded into larger errors.
    pub fn merge_threshold(mut self, v: f64) -> Self {
        self.merge_threshold = v;
        self
    }

    /// Rescale up/down templates to the nominal integral.
    pub fn fix_norm(mut self, v: bool) -> Self {
        self.fix_norm = v;
        self
    }

    /// Name template; `$ANALYSIS`, `$CHANNEL`, `$ERA`, `$BIN`, `$PROCESS` and
    /// `$#` are substituted.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    fn name(&self, p: &Process, index: usize) -> String {
        self.pattern
            .replace("$ANALYSIS", &p.bin.analysis)
            .replace("$CHANNEL", &p.bin.channel)
            .replace("$ERA", &p.bin.era)
            .replace("$BIN", &p.bin.name)
            .replace("$PROCESS", &p.name)
            .replace("$#", &(index + 1).to_string())
    }

    /// Fold small errors into larger ones, per bin and histogram bin.
    ///
    /// Errors are sorted ascending; the smallest are zeroed while their summed
    /// variance stays below `merge_threshold` of the total, and the survivors
    /// are scaled up so the total variance is unchanged. The largest error is
    /// never removed.
    pub fn merge_bin_errors<P: Predicate + ?Sized>(&self, model: &mut Model, filter: &P) -> Result<()> {
        self.run(model, filter, true, false).map(|_| ())
    }

    /// Create the bin-by-bin systematics; returns how many were added.
    pub fn add_bin_by_bin<P: Predicate + ?Sized>(&self, model: &mut Model, filter: &P) -> Result<usize> {
        self.run(model, filter, false, true)
    }

    /// [`Self::merge_bin_errors`] followed by [`Self::add_bin_by_bin`].
    pub fn merge_and_add<P: Predicate + ?Sized>(&self, model: &mut Model, filter: &P) -> Result<usize> {
        self.run(model, filter, true, true)
    }

    fn run<P: Predicate + ?Sized>(
        &self,
        model: &mut Model,
        filter: &P,
        merge: bool,
        add: bool,
    ) -> Result<usize> {
        use rayon::prelude::*;

        let plans: Vec<BinPlan> = {
            let mut by_bin: BTreeMap<(&str, &str), Vec<&Process>> = BTreeMap::new();
            for p in model.processes_matching(filter).filter(|p| p.shape().is_some()) {
                by_bin.entry((p.bin.channel.as_str(), p.bin.name.as_str())).or_default().push(p);
            }
            by_bin
                .par_iter()
                .map(|((_, bin), procs)| self.plan_bin(bin, procs, merge, add))
                .collect::<Result<Vec<_>>>()?
        };

        let mut errors: HashMap<ProcessKey, Vec<f64>> = HashMap::new();
        let mut added = 0usize;
        let mut systematics = Vec::new();
        for plan in plans {
            errors.extend(plan.errors);
            added += plan.systematics.len();
            systematics.extend(plan.systematics);
        }
        if merge {
            model.for_each_process_mut(filter, |p| {
                let Some(new) = errors.get(&key(p)) else { return };
                if let Some(mut shape) = p.take_shape() {
                    for (i, e) in new.iter().enumerate() {
                        shape.set_error(i, *e);
                    }
                    p.set_shape(shape, false);
                }
            });
        }
        for s in systematics {
            model.add_systematic(s);
        }
        if add {
            log::info!("added {} bin-by-bin systematics", added);
        }
        Ok(added)
    }

    fn plan_bin(&self, bin: &str, procs: &[&Process], merge: bool, add: bool) -> Result<BinPlan> {
        let mut shapes: Vec<Shape> = procs.iter().filter_map(|p| p.shape().cloned()).collect();
        if let Some(first) = shapes.first()
            && let Some((k, _)) = shapes.iter().enumerate().find(|(_, s)| !s.same_binning(first))
        {
            return Err(Error::IncompatibleBinning(format!(
                "bin '{}': process '{}' does not share the binning of '{}'",
                bin, procs[k].name, procs[0].name
            )));
        }

        if merge {
            self.merge_errors(procs, &mut shapes);
        }

        let systematics = if add {
            let gate = self.passing_bins(&shapes);
            procs
                .iter()
                .zip(&shapes)
                .flat_map(|(p, h)| self.entries_for(p, h, &gate))
                .collect()
        } else {
            Vec::new()
        };

        let errors = if merge {
            procs.iter().zip(&shapes).map(|(p, h)| (key(p), h.errors().to_vec())).collect()
        } else {
            Vec::new()
        };
        Ok(BinPlan { errors, systematics })
    }

    fn merge_errors(&self, procs: &[&Process], shapes: &mut [Shape]) {
        let n_bins = shapes.first().map(Shape::n_bins).unwrap_or(0);
        for i in 0..n_bins {
            let mut entries: Vec<(f64, usize)> = shapes
                .iter()
                .enumerate()
                .filter(|(_, h)| h.relative_error(i).is_some_and(|r| r >= self.add_threshold))
                .map(|(k, h)| (h.errors()[i] * h.errors()[i], k))
                .collect();
            let total: f64 = entries.iter().map(|(e2, _)| e2).sum();
            if total <= 0.0 {
                continue;
            }
            entries.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| procs[a.1].name.cmp(&procs[b.1].name)));

            let mut removed = 0.0;
            let last = entries.len() - 1;
            for (r, &(e2, k)) in entries.iter().enumerate() {
                if r < last && e2 + removed < self.merge_threshold * total {
                    removed += e2;
                    shapes[k].set_error(i, 0.0);
                }
            }
            if removed > 0.0 {
                let expand = (1.0 / (1.0 - removed / total)).sqrt();
                for &(_, k) in &entries {
                    let e = shapes[k].errors()[i];
                    if e > 0.0 {
                        shapes[k].set_error(i, e * expand);
                    }
                }
            }
        }
    }

    /// Histogram bins whose combined relative error exceeds the add threshold.
    fn passing_bins(&self, shapes: &[Shape]) -> Vec<bool> {
        let n_bins = shapes.first().map(Shape::n_bins).unwrap_or(0);
        (0..n_bins)
            .map(|i| {
                let content: f64 = shapes.iter().map(|h| h.contents()[i]).sum();
                let err = shapes.iter().map(|h| h.errors()[i] * h.errors()[i]).sum::<f64>().sqrt();
                err > 0.0 && (content <= 0.0 || err / content > self.add_threshold)
            })
            .collect()
    }

    fn entries_for(&self, p: &Process, h: &Shape, gate: &[bool]) -> Vec<Systematic> {
        let nominal = h.integral();
        let mut out = Vec::new();
        for i in 0..h.n_bins() {
            let (val, err) = (h.contents()[i], h.errors()[i]);
            if !gate[i] || err <= 0.0 || (val > 0.0 && err / val <= self.add_threshold) {
                continue;
            }
            let name = self.name(p, i);
            let mut up = h.clone();
            up.set_content(i, val + err);
            let mut down = h.clone();
            down.set_content(i, (val - err).max(0.0));

            let (value_u, value_d) = if self.fix_norm {
                if nominal <= 0.0 {
                    log::warn!("{}: nominal integral is {}, entry skipped", name, nominal);
                    continue;
                }
                up.scale(nominal / up.integral());
                let d = down.integral();
                if d > 0.0 {
                    down.scale(nominal / d);
                    (1.0, 1.0)
                } else {
                    log::warn!("{}: down template integrates to zero, not normalized", name);
                    (1.0, 0.0)
                }
            } else if nominal > 0.0 {
                (up.integral() / nominal, down.integral() / nominal)
            } else {
                (1.0, 1.0)
            };

            out.push(Systematic::for_process(
                p,
                name,
                SystematicKind::Shape { value_u, value_d, shape_u: Some(up), shape_d: Some(down) },
            ));
        }
        out
    }
}
