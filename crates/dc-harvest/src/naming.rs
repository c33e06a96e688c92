//! Canonical bin names.

use std::collections::{BTreeMap, BTreeSet};

use dc_core::{Bin, Error, Model, Result};

/// Default pattern: `htt_et_8_13TeV`.
pub const STANDARD_PATTERN: &str = "$ANALYSIS_$CHANNEL_$BINID_$ERA";

/// Render `pattern` for one bin.
pub fn standard_bin_name(pattern: &str, bin: &Bin) -> String {
    pattern
        .replace("$ANALYSIS", &bin.analysis)
        .replace("$CHANNEL", &bin.channel)
        .replace("$BINID", &bin.bin_id.to_string())
        .replace("$ERA", &bin.era)
}

/// Rename every bin of the model to `pattern`.
///
/// The returned mapping is keyed by `(channel, old name)`. Fails without
/// touching the model if two distinct bins would end up with the same name.
pub fn set_standard_bin_names(
    model: &mut Model,
    pattern: &str,
) -> Result<BTreeMap<(String, String), String>> {
    let mut mapping = BTreeMap::new();
    let mut taken = BTreeSet::new();
    for bin in model.bins() {
        let new = standard_bin_name(pattern, &bin);
        if !taken.insert(new.clone()) {
            return Err(Error::Validation(format!(
                "bin '{}' of channel '{}' would be renamed to '{}', which is already taken",
                bin.name, bin.channel, new
            )));
        }
        mapping.insert((bin.channel, bin.name), new);
    }
    model.rename_bins(|b| {
        mapping.get(&(b.channel.clone(), b.name.clone())).cloned().unwrap_or_else(|| b.name.clone())
    });
    log::debug!("renamed {} bins using '{}'", mapping.len(), pattern);
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renames_every_entity() {
        let bins = vec![
            Bin::new("htt", "13TeV", "et", 8, "et_nobtag"),
            Bin::new("htt", "13TeV", "et", 11, "et_nobtag_qcd_cr"),
        ];
        let mut m = Model::new();
        m.add_observations(&bins);
        m.add_processes(&bins, &["QCD"], false, &[]);

        let mapping = set_standard_bin_names(&mut m, STANDARD_PATTERN).unwrap();
        assert_eq!(mapping[&("et".to_string(), "et_nobtag".to_string())], "htt_et_8_13TeV");
        assert_eq!(
            m.bin_set().into_iter().collect::<Vec<_>>(),
            vec!["htt_et_11_13TeV".to_string(), "htt_et_8_13TeV".to_string()]
        );
        let cr = m.processes().iter().find(|p| p.bin.bin_id == 11).unwrap();
        assert!(cr.bin.is_control_region());
    }

    #[test]
    fn shared_names_are_renamed_per_channel() {
        let bins = vec![
            Bin::new("htt", "13TeV", "et", 8, "nobtag"),
            Bin::new("htt", "13TeV", "mt", 8, "nobtag"),
        ];
        let mut m = Model::new();
        m.add_observations(&bins);
        m.add_processes(&bins, &["ZTT"], false, &[]);

        set_standard_bin_names(&mut m, STANDARD_PATTERN).unwrap();
        let mut pairs: Vec<(String, String)> =
            m.processes().iter().map(|p| (p.bin.channel.clone(), p.bin.name.clone())).collect();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("et".to_string(), "htt_et_8_13TeV".to_string()),
                ("mt".to_string(), "htt_mt_8_13TeV".to_string()),
            ]
        );
        assert_eq!(m.bin_set().len(), 2);
    }

    #[test]
    fn collisions_are_rejected() {
        let bins = vec![
            Bin::new("htt", "13TeV", "et", 8, "et_nobtag"),
            Bin::new("htt", "13TeV", "et", 8, "et_nobtag_alt"),
        ];
        let mut m = Model::new();
        m.add_observations(&bins);
        let err = set_standard_bin_names(&mut m, STANDARD_PATTERN).unwrap_err();
        assert!(err.to_string().contains("htt_et_8_13TeV"));
        assert!(m.bin("et_nobtag").is_some());
    }
}
