//! Control-region normalization.
//!
//! Control regions only constrain normalizations, so every control-region bin
//! is reduced to a single counting bin, and its observed data is replaced by
//! the background expectation (an Asimov dataset).

use dc_core::filter::{bin_name, channel, control_region};
use dc_core::{Error, Model, PredicateExt, Result};

/// What the normalizer touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlRegionReport {
    /// Control-region bins whose observation was replaced.
    pub asimov_bins: Vec<String>,
    /// Number of shapes collapsed to a single bin.
    pub collapsed_shapes: usize,
}

/// Replace the observation of every control-region bin with the sum of its
/// background shapes.
pub fn replace_with_asimov(model: &mut Model) -> Result<Vec<String>> {
    let cr_bins: Vec<_> = model.bins().into_iter().filter(|b| b.is_control_region()).collect();

    let mut replaced = Vec::with_capacity(cr_bins.len());
    for bin in cr_bins {
        let asimov = model.background_shape(&bin)?.ok_or_else(|| {
            Error::MissingShape(format!("control region '{}' has no background shapes", bin.name))
        })?;
        let mut found = false;
        let this_bin = channel([bin.channel.as_str()]).and(bin_name([bin.name.as_str()]));
        model.for_each_observation_mut(&this_bin, |o| {
            o.set_shape(asimov.clone(), true);
            found = true;
        });
        if !found {
            return Err(Error::Validation(format!(
                "control region '{}' has no observation",
                bin.name
            )));
        }
        log::debug!(
            "{}/{}: observation replaced by background sum {:.3}",
            bin.channel,
            bin.name,
            asimov.integral()
        );
        replaced.push(bin.name);
    }
    Ok(replaced)
}

/// Collapse every shape in control-region bins (processes, observations and
/// shape systematics) to one bin holding the full integral.
pub fn collapse_control_regions(model: &mut Model) -> usize {
    let cr = control_region();
    let mut n = 0usize;
    model.for_each_process_mut(&cr, |p| {
        if let Some(one) = p.shape().map(|s| s.to_single_bin()) {
            p.set_shape(one, true);
            n += 1;
        }
    });
    model.for_each_observation_mut(&cr, |o| {
        if let Some(one) = o.shape().map(|s| s.to_single_bin()) {
            o.set_shape(one, true);
            n += 1;
        }
    });
    model.for_each_systematic_mut(&cr, |s| {
        for shape in s.shapes_mut() {
            *shape = shape.to_single_bin();
            n += 1;
        }
    });
    n
}

/// Asimov replacement followed by single-bin collapse.
pub fn normalize_control_regions(model: &mut Model) -> Result<ControlRegionReport> {
    let asimov_bins = replace_with_asimov(model)?;
    let collapsed_shapes = collapse_control_regions(model);
    if !asimov_bins.is_empty() {
        log::info!(
            "normalized {} control regions ({} shapes collapsed)",
            asimov_bins.len(),
            collapsed_shapes
        );
    }
    Ok(ControlRegionReport { asimov_bins, collapsed_shapes })
}
