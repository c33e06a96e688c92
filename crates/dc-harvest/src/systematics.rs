//! Rule-driven systematic uncertainty tables.
//!
//! A [`SystematicRule`] says which processes of which channels receive a named
//! uncertainty. [`MssmSystematics`] applies a list of rules per channel; the
//! default list is [`mssm_run2_rules`].

use dc_core::filter::channel;
use dc_core::{Model, Process, Result, Systematic, SystematicKind, SystematicsInjector};
use serde::{Deserialize, Serialize};

/// Kind of uncertainty a rule creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RuleKind {
    /// Log-normal; `down` set means asymmetric.
    #[serde(rename = "lnN")]
    LnN { value: f64, down: Option<f64> },
    /// Up/down templates read by the shape extractor.
    #[serde(rename = "shape")]
    Shape,
}

/// Which bins of a channel a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regions {
    #[default]
    All,
    Signal,
    Control,
}

/// Whether a rule depends on the control-region mode of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Always,
    WithControlRegions,
    WithoutControlRegions,
}

/// One line of a systematics table.
///
/// `name` may contain `$CHANNEL`, `$ERA` and `$ANALYSIS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystematicRule {
    pub name: String,
    #[serde(flatten)]
    pub kind: RuleKind,
    /// Channels the rule applies to; empty means all.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Named processes that receive the entry.
    #[serde(default)]
    pub processes: Vec<String>,
    /// Also apply to every signal process.
    #[serde(default)]
    pub signals: bool,
    #[serde(default)]
    pub regions: Regions,
    #[serde(default)]
    pub mode: RunMode,
}

impl SystematicRule {
    pub fn ln_n(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            kind: RuleKind::LnN { value, down: None },
            channels: Vec::new(),
            processes: Vec::new(),
            signals: false,
            regions: Regions::All,
            mode: RunMode::Always,
        }
    }

    pub fn shape(name: impl Into<String>) -> Self {
        Self { kind: RuleKind::Shape, ..Self::ln_n(name, 1.0) }
    }

    pub fn channels<I: IntoIterator<Item = S>, S: Into<String>>(mut self, channels: I) -> Self {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn processes<I: IntoIterator<Item = S>, S: Into<String>>(mut self, processes: I) -> Self {
        self.processes = processes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_signals(mut self) -> Self {
        self.signals = true;
        self
    }

    pub fn regions(mut self, regions: Regions) -> Self {
        self.regions = regions;
        self
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    fn applies_to_channel(&self, chn: &str) -> bool {
        self.channels.is_empty() || self.channels.iter().any(|c| c == chn)
    }

    fn applies_in_mode(&self, control_region: bool) -> bool {
        match self.mode {
            RunMode::Always => true,
            RunMode::WithControlRegions => control_region,
            RunMode::WithoutControlRegions => !control_region,
        }
    }

    fn applies_to(&self, p: &Process) -> bool {
        let region = match self.regions {
            Regions::All => true,
            Regions::Signal => !p.bin.is_control_region(),
            Regions::Control => p.bin.is_control_region(),
        };
        region && ((self.signals && p.signal) || self.processes.iter().any(|n| *n == p.name))
    }

    fn entry_kind(&self) -> SystematicKind {
        match self.kind {
            RuleKind::LnN { value, down } => SystematicKind::LnN { value_u: value, value_d: down },
            RuleKind::Shape => {
                SystematicKind::Shape { value_u: 1.0, value_d: 1.0, shape_u: None, shape_d: None }
            }
        }
    }
}

/// Default MSSM Run-2 table.
pub fn mssm_run2_rules() -> Vec<SystematicRule> {
    let mc = ["ZTT", "ZL", "ZJ", "ZLL", "TT", "VV"];
    vec![
        SystematicRule::ln_n("lumi_$ERA", 1.027).processes(mc).with_signals(),
        SystematicRule::ln_n("CMS_eff_m", 1.02)
            .channels(["mt", "em"])
            .processes(mc)
            .with_signals(),
        SystematicRule::ln_n("CMS_eff_e", 1.02)
            .channels(["et", "em"])
            .processes(mc)
            .with_signals(),
        SystematicRule::ln_n("CMS_eff_t_$ERA", 1.06)
            .channels(["et", "mt"])
            .processes(["ZTT", "TT", "VV"])
            .with_signals(),
        SystematicRule::ln_n("CMS_eff_t_$ERA", 1.12)
            .channels(["tt"])
            .processes(["ZTT", "TT", "VV"])
            .with_signals(),
        SystematicRule::ln_n("CMS_eff_t_$CHANNEL_$ERA", 1.03)
            .channels(["et", "mt", "tt"])
            .processes(["ZTT", "TT", "VV"])
            .with_signals(),
        SystematicRule::shape("CMS_scale_t_$CHANNEL_$ERA")
            .channels(["et", "mt", "tt"])
            .processes(["ZTT"])
            .with_signals(),
        SystematicRule::ln_n("CMS_htt_zttXsec_$ERA", 1.04).processes(["ZTT"]),
        SystematicRule::ln_n("CMS_htt_zllXsec_$ERA", 1.04).processes(["ZL", "ZJ", "ZLL"]),
        SystematicRule::ln_n("CMS_htt_ttbarXsec_$ERA", 1.06).processes(["TT"]),
        SystematicRule::ln_n("CMS_htt_vvXsec_$ERA", 1.05).processes(["VV"]),
        SystematicRule::ln_n("CMS_htt_QCD_norm_$CHANNEL_$ERA", 1.2)
            .processes(["QCD"])
            .mode(RunMode::WithoutControlRegions),
        SystematicRule::ln_n("CMS_htt_W_norm_$CHANNEL_$ERA", 1.2)
            .processes(["W"])
            .mode(RunMode::WithoutControlRegions),
        SystematicRule::ln_n("CMS_htt_QCD_cr_norm_$CHANNEL_$ERA", 1.3)
            .channels(["et", "mt"])
            .processes(["QCD"])
            .mode(RunMode::WithControlRegions),
        SystematicRule::ln_n("CMS_htt_W_cr_norm_$CHANNEL_$ERA", 1.3)
            .channels(["et", "mt"])
            .processes(["W"])
            .mode(RunMode::WithControlRegions),
        SystematicRule::ln_n("CMS_htt_QCD_norm_$CHANNEL_$ERA", 1.2)
            .channels(["tt", "em"])
            .processes(["QCD"])
            .mode(RunMode::WithControlRegions),
        SystematicRule::ln_n("CMS_htt_W_norm_$CHANNEL_$ERA", 1.2)
            .channels(["tt", "em"])
            .processes(["W"])
            .mode(RunMode::WithControlRegions),
    ]
}

/// Applies a rule table to the processes of a channel.
#[derive(Debug, Clone)]
pub struct MssmSystematics {
    rules: Vec<SystematicRule>,
}

impl MssmSystematics {
    pub fn new(rules: Vec<SystematicRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[SystematicRule] {
        &self.rules
    }
}

impl Default for MssmSystematics {
    fn default() -> Self {
        Self::new(mssm_run2_rules())
    }
}

impl SystematicsInjector for MssmSystematics {
    fn inject(&self, model: &mut Model, chn: &str, control_region_mode: bool) -> Result<()> {
        let in_channel = channel([chn]);
        let mut added = Vec::new();
        for rule in self
            .rules
            .iter()
            .filter(|r| r.applies_to_channel(chn) && r.applies_in_mode(control_region_mode))
        {
            for p in model.processes_matching(&in_channel).filter(|p| rule.applies_to(p)) {
                let name = rule
                    .name
                    .replace("$CHANNEL", chn)
                    .replace("$ERA", &p.bin.era)
                    .replace("$ANALYSIS", &p.bin.analysis);
                added.push(Systematic::for_process(p, name, rule.entry_kind()));
            }
        }
        let n_cr = added.iter().filter(|s| s.bin.is_control_region()).count();
        log::debug!(
            "channel {}: {} systematic entries ({} in control regions)",
            chn,
            added.len(),
            n_cr
        );
        for s in added {
            model.add_systematic(s);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_core::Bin;

    fn model() -> Model {
        let bins = vec![
            Bin::new("htt", "13TeV", "et", 8, "et_nobtag"),
            Bin::new("htt", "13TeV", "et", 10, "et_nobtag_wjets_cr"),
            Bin::new("htt", "13TeV", "em", 8, "em_nobtag"),
        ];
        let mut m = Model::new();
        m.add_observations(&bins);
        m.add_processes(&bins, &["ZTT", "W", "QCD"], false, &[]);
        m.add_processes(&bins[..1], &["ggH"], true, &[200.0, 300.0]);
        m
    }

    #[test]
    fn lnn_rule_reaches_named_processes_and_signals() {
        let mut m = model();
        let sys = MssmSystematics::new(vec![
            SystematicRule::ln_n("lumi_$ERA", 1.027).processes(["ZTT"]).with_signals(),
        ]);
        sys.inject(&mut m, "et", false).unwrap();
        // ZTT in two et bins plus two ggH masses.
        assert_eq!(m.systematics().len(), 4);
        assert!(m.systematics().iter().all(|s| s.name == "lumi_13TeV"));
        assert!(m.systematics().iter().all(|s| s.bin.channel == "et"));
    }

    #[test]
    fn channel_and_region_restrictions() {
        let mut m = model();
        let sys = MssmSystematics::new(vec![
            SystematicRule::shape("CMS_scale_t_$CHANNEL_$ERA")
                .channels(["et"])
                .processes(["ZTT"])
                .regions(Regions::Signal),
        ]);
        sys.inject(&mut m, "et", false).unwrap();
        sys.inject(&mut m, "em", false).unwrap();
        assert_eq!(m.systematics().len(), 1);
        let s = &m.systematics()[0];
        assert_eq!(s.name, "CMS_scale_t_et_13TeV");
        assert_eq!(s.bin.name, "et_nobtag");
        assert!(s.is_shape());
    }

    #[test]
    fn run_mode_selects_normalization_rules() {
        let rules = vec![
            SystematicRule::ln_n("W_norm", 1.2).processes(["W"]).mode(RunMode::WithoutControlRegions),
            SystematicRule::ln_n("W_cr_norm", 1.3).processes(["W"]).mode(RunMode::WithControlRegions),
        ];
        let sys = MssmSystematics::new(rules);

        let mut off = model();
        sys.inject(&mut off, "et", false).unwrap();
        assert!(off.systematics().iter().all(|s| s.name == "W_norm"));

        let mut on = model();
        sys.inject(&mut on, "et", true).unwrap();
        assert!(on.systematics().iter().all(|s| s.name == "W_cr_norm"));
        assert_eq!(on.systematics().len(), 2);
    }

    #[test]
    fn rules_deserialize_from_yaml() {
        let yaml = r#"
- name: CMS_htt_vvXsec_$ERA
  type: lnN
  value: 1.05
  processes: [VV]
- name: CMS_scale_t_$CHANNEL_$ERA
  type: shape
  channels: [et, mt]
  signals: true
  regions: signal
"#;
        let rules: Vec<SystematicRule> = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].kind, RuleKind::LnN { value: 1.05, down: None });
        assert_eq!(rules[1].kind, RuleKind::Shape);
        assert_eq!(rules[1].regions, Regions::Signal);
    }
}
