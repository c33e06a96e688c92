//! Rebinning of every shape in a bin.
//!
//! [`AutoRebin`] derives new edges from the background content of each bin;
//! [`ManualRebin`] applies a fixed per-bin table. Both end up in
//! [`apply_edges`], which keeps processes, observations and shape systematics
//! of a bin on one binning.

mod auto;
mod manual;

pub use auto::{AutoRebin, RebinMode, RebinOutcome};
pub use manual::ManualRebin;

use dc_core::filter::{bin_name, channel};
use dc_core::{Bin, Error, Model, PredicateExt, Result, Shape};

/// Rebin one shape, naming the bin and owner on failure.
fn rebin_shape(shape: &Shape, edges: &[f64], bin: &str, owner: &str) -> Result<Shape> {
    shape.rebinned(edges).map_err(|e| match e {
        Error::IncompatibleBinning(msg) => {
            Error::IncompatibleBinning(format!("bin '{}' {}: {}", bin, owner, msg))
        }
        other => other,
    })
}

/// Rebin every shape in `bin` onto `edges`.
///
/// Processes with a zero integral are left alone when their binning cannot be
/// mapped; their names are returned.
pub fn apply_edges(model: &mut Model, target: &Bin, edges: &[f64]) -> Result<Vec<String>> {
    if edges.len() < 2 || edges.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::Configuration(format!(
            "bin '{}': edges must be at least two strictly increasing values, got {:?}",
            target.name, edges
        )));
    }
    let bin = target.name.as_str();
    let in_bin = channel([target.channel.as_str()]).and(bin_name([bin]));
    let mut skipped = Vec::new();

    model.try_for_each_process_mut(&in_bin, |p| {
        let Some(shape) = p.shape() else { return Ok(()) };
        match rebin_shape(shape, edges, bin, &format!("process '{}'", p.name)) {
            Ok(new) => p.set_shape(new, true),
            Err(e) if shape.integral() == 0.0 => {
                log::warn!("{}/{}: zero-integral shape left unbinned ({})", bin, p.name, e);
                skipped.push(p.name.clone());
            }
            Err(e) => return Err(e),
        }
        Ok(())
    })?;

    let mut result = Ok(());
    model.for_each_observation_mut(&in_bin, |o| {
        if result.is_err() {
            return;
        }
        if let Some(shape) = o.shape() {
            match rebin_shape(shape, edges, bin, "observation") {
                Ok(new) => o.set_shape(new, true),
                Err(e) => result = Err(e),
            }
        }
    });
    result?;

    let mut result = Ok(());
    model.for_each_systematic_mut(&in_bin, |s| {
        if result.is_err() {
            return;
        }
        let owner = format!("systematic '{}' of '{}'", s.name, s.process);
        for shape in s.shapes_mut() {
            match rebin_shape(shape, edges, bin, &owner) {
                Ok(new) => *shape = new,
                Err(e) if shape.integral() == 0.0 => {
                    log::warn!("{}: zero-integral shape of {} left unbinned ({})", bin, owner, e);
                }
                Err(e) => {
                    result = Err(e);
                    return;
                }
            }
        }
    });
    result?;

    Ok(skipped)
}
