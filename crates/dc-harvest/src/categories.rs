//! Category registry: base categories per channel plus synthesized
//! control-region categories.

use std::collections::{BTreeMap, BTreeSet};

use dc_core::Bin;

use crate::config::Category;

/// Id of the first synthesized control-region category.
pub const CONTROL_REGION_FIRST_ID: u32 = 10;

/// Name suffixes of the control regions created per base category, in id order.
pub const CONTROL_REGION_SUFFIXES: [&str; 3] = ["_wjets_cr", "_qcd_cr", "_wjets_ss_cr"];

/// Ids reserved for the control regions of the `k`-th base category of a channel.
pub fn control_region_ids(k: usize) -> [u32; 3] {
    let first = CONTROL_REGION_FIRST_ID + (CONTROL_REGION_SUFFIXES.len() * k) as u32;
    [first, first + 1, first + 2]
}

/// Ordered categories per channel.
#[derive(Debug, Clone)]
pub struct CategoryRegistry {
    analysis: String,
    era: String,
    base: BTreeMap<String, Vec<Category>>,
    categories: BTreeMap<String, Vec<Category>>,
}

impl CategoryRegistry {
    pub fn new(
        analysis: impl Into<String>,
        era: impl Into<String>,
        base: BTreeMap<String, Vec<Category>>,
    ) -> Self {
        Self { analysis: analysis.into(), era: era.into(), categories: base.clone(), base }
    }

    /// Append control-region categories for every base category of each listed
    /// channel. Channels that already have them are left alone.
    pub fn synthesize_control_regions(&mut self, channels: &[String]) {
        for chn in channels {
            let Some(base) = self.base.get(chn) else {
                log::debug!("no base categories for channel {}; skipping control regions", chn);
                continue;
            };
            let Some(cats) = self.categories.get_mut(chn) else { continue };
            if cats.len() > base.len() {
                continue;
            }
            for (k, cat) in base.iter().enumerate() {
                for (id, suffix) in control_region_ids(k).into_iter().zip(CONTROL_REGION_SUFFIXES) {
                    cats.push(Category::new(id, format!("{}{}", cat.name, suffix)));
                }
            }
            log::info!(
                "channel {}: added {} control-region categories",
                chn,
                base.len() * CONTROL_REGION_SUFFIXES.len()
            );
        }
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    /// All categories of `channel`, base categories first.
    pub fn categories(&self, channel: &str) -> &[Category] {
        self.categories.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Bins of `channel`, in category order.
    pub fn bins(&self, channel: &str) -> Vec<Bin> {
        self.categories(channel)
            .iter()
            .map(|c| Bin::new(&self.analysis, &self.era, channel, c.id, &c.name))
            .collect()
    }

    /// Ids of all base categories, across channels.
    pub fn base_ids(&self) -> BTreeSet<u32> {
        self.base.values().flatten().map(|c| c.id).collect()
    }

    /// `base_id` plus the control-region ids that belong to it, across channels.
    pub fn group_ids(&self, base_id: u32) -> BTreeSet<u32> {
        let mut ids = BTreeSet::from([base_id]);
        for cats in self.base.values() {
            if let Some(k) = cats.iter().position(|c| c.id == base_id) {
                ids.extend(control_region_ids(k));
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CategoryRegistry {
        let base = ["et", "mt", "tt"]
            .into_iter()
            .map(|c| {
                (
                    c.to_string(),
                    vec![Category::new(8, format!("{c}_nobtag")), Category::new(9, format!("{c}_btag"))],
                )
            })
            .collect();
        CategoryRegistry::new("htt", "13TeV", base)
    }

    #[test]
    fn control_regions_follow_base_categories() {
        let mut reg = registry();
        reg.synthesize_control_regions(&["et".to_string()]);
        let ids: Vec<(u32, &str)> =
            reg.categories("et").iter().map(|c| (c.id, c.name.as_str())).collect();
        assert_eq!(
            ids,
            vec![
                (8, "et_nobtag"),
                (9, "et_btag"),
                (10, "et_nobtag_wjets_cr"),
                (11, "et_nobtag_qcd_cr"),
                (12, "et_nobtag_wjets_ss_cr"),
                (13, "et_btag_wjets_cr"),
                (14, "et_btag_qcd_cr"),
                (15, "et_btag_wjets_ss_cr"),
            ]
        );
        assert_eq!(reg.categories("tt").len(), 2);
    }

    #[test]
    fn synthesis_is_idempotent() {
        let mut reg = registry();
        let chns = vec!["mt".to_string()];
        reg.synthesize_control_regions(&chns);
        reg.synthesize_control_regions(&chns);
        assert_eq!(reg.categories("mt").len(), 8);
    }

    #[test]
    fn bins_carry_control_region_flag() {
        let mut reg = registry();
        reg.synthesize_control_regions(&["mt".to_string()]);
        let bins = reg.bins("mt");
        assert_eq!(bins.iter().filter(|b| b.is_control_region()).count(), 6);
        assert!(bins.iter().all(|b| b.channel == "mt" && b.era == "13TeV"));
    }

    #[test]
    fn group_ids_include_control_regions() {
        let reg = registry();
        assert_eq!(reg.group_ids(8), BTreeSet::from([8, 10, 11, 12]));
        assert_eq!(reg.group_ids(9), BTreeSet::from([9, 13, 14, 15]));
        assert_eq!(reg.base_ids(), BTreeSet::from([8, 9]));
    }
}
