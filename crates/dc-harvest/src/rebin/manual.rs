//! Fixed per-bin binning table.

use std::collections::BTreeMap;

use dc_core::{Bin, Model, Result};

use super::apply_edges;

/// Applies a table of bin edges keyed by bin name.
#[derive(Debug, Clone, Default)]
pub struct ManualRebin {
    binning: BTreeMap<String, Vec<f64>>,
}

impl ManualRebin {
    pub fn new(binning: BTreeMap<String, Vec<f64>>) -> Self {
        Self { binning }
    }

    pub fn edges(&self, bin: &str) -> Option<&[f64]> {
        self.binning.get(bin).map(Vec::as_slice)
    }

    /// Rebin every bin that has a table entry; returns the bins rebinned.
    ///
    /// The table is keyed by bin name, so an entry applies to that name in
    /// every channel. Bins without an entry keep their binning.
    pub fn apply(&self, model: &mut Model) -> Result<Vec<Bin>> {
        let mut done = Vec::new();
        for bin in model.bins() {
            let Some(edges) = self.binning.get(&bin.name) else {
                log::debug!("{}/{}: no manual binning, skipped", bin.channel, bin.name);
                continue;
            };
            apply_edges(model, &bin, edges)?;
            log::info!(
                "{}/{}: manual binning with {} bins",
                bin.channel,
                bin.name,
                edges.len().saturating_sub(1)
            );
            done.push(bin);
        }
        Ok(done)
    }
}
