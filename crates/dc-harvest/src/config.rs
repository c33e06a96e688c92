//! Configuration for a harvesting run.
//!
//! Every table the producer needs (categories, process lists, binning,
//! thresholds) lives in [`HarvestConfig`]; `HarvestConfig::default()` carries
//! the MSSM Run-2 H→ττ values.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use dc_core::{Error, MassParameter, Result};
use serde::{Deserialize, Serialize};

use crate::systematics::SystematicRule;

/// A base category: bin id plus bin name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
    pub name: String,
}

impl Category {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

/// How signal processes map onto continuous mass parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MassConvention {
    /// Separate light scalar (`mh`), heavy scalar (`mH`) and pseudoscalar (`mA`) families.
    #[default]
    #[serde(rename = "mA")]
    MA,
    /// One signal family per production mode, all driven by `MH`.
    #[serde(rename = "MH")]
    MH,
}

impl MassConvention {
    pub fn as_str(&self) -> &'static str {
        match self {
            MassConvention::MA => "mA",
            MassConvention::MH => "MH",
        }
    }

    /// Signal process names per production mode (`ggH`, `bbH`).
    pub fn signal_families(&self) -> BTreeMap<&'static str, Vec<&'static str>> {
        match self {
            MassConvention::MA => BTreeMap::from([
                ("ggH", vec!["ggh_htautau", "ggH_Htautau", "ggA_Atautau"]),
                ("bbH", vec!["bbh_htautau", "bbH_Htautau", "bbA_Atautau"]),
            ]),
            MassConvention::MH => {
                BTreeMap::from([("ggH", vec!["ggH"]), ("bbH", vec!["bbH"])])
            }
        }
    }

    /// All signal process names, in family order.
    pub fn signal_processes(&self) -> Vec<&'static str> {
        self.signal_families().into_values().flatten().collect()
    }

    /// Name of the continuous parameter that drives `process`.
    pub fn parameter_name(&self, process: &str) -> Option<&'static str> {
        match self {
            MassConvention::MA => match process {
                "ggh_htautau" | "bbh_htautau" => Some("mh"),
                "ggH_Htautau" | "bbH_Htautau" => Some("mH"),
                "ggA_Atautau" | "bbA_Atautau" => Some("mA"),
                _ => None,
            },
            MassConvention::MH => match process {
                "ggH" | "bbH" => Some("MH"),
                _ => None,
            },
        }
    }

    /// Parameter per signal process, each with range `[min, max]`.
    pub fn mass_parameters(&self, min: f64, max: f64) -> BTreeMap<String, MassParameter> {
        self.signal_processes()
            .into_iter()
            .filter_map(|p| {
                self.parameter_name(p).map(|n| (p.to_string(), MassParameter::new(n, min, max)))
            })
            .collect()
    }
}

impl fmt::Display for MassConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MassConvention {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mA" => Ok(MassConvention::MA),
            "MH" => Ok(MassConvention::MH),
            other => Err(Error::Configuration(format!(
                "unknown mass convention '{}' (expected 'mA' or 'MH')",
                other
            ))),
        }
    }
}

/// Where input shape files are found.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Directory holding the per-analyst folders.
    pub root: PathBuf,
    /// Folder per channel, relative to `root`.
    pub folders: BTreeMap<String, String>,
    /// Appended to input file names (before the extension).
    pub postfix: String,
    /// File name template; `$CHANNEL`, `$ERA` and `$POSTFIX` are substituted.
    pub file_pattern: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("shapes"),
            folders: ["em", "et", "mt", "tt"]
                .into_iter()
                .map(|c| (c.to_string(), "Imperial".to_string()))
                .collect(),
            postfix: String::new(),
            file_pattern: "htt_$CHANNEL.inputs-mssm-$ERA$POSTFIX.json".into(),
        }
    }
}

impl InputConfig {
    /// Shape file for `channel`.
    pub fn shape_file(&self, channel: &str, era: &str) -> PathBuf {
        let folder = self.folders.get(channel).map(String::as_str).unwrap_or("Imperial");
        let file = self
            .file_pattern
            .replace("$CHANNEL", channel)
            .replace("$ERA", era)
            .replace("$POSTFIX", &self.postfix);
        self.root.join(folder).join(file)
    }
}

/// Where cards and diagnostics are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub root: PathBuf,
    pub folder: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { root: PathBuf::from("output"), folder: "mssm_run2".into() }
    }
}

impl OutputConfig {
    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.folder)
    }
}

/// Adaptive rebinning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoRebinConfig {
    /// Bins whose total background content is at or below this value are merged.
    pub bin_threshold: f64,
    /// Maximum relative uncertainty of the total background per bin.
    pub uncert_fraction: Option<f64>,
    /// Merging heuristic (0 = lowest content first, 1 = tails towards the peak).
    pub mode: u8,
    /// Apply the new binning; when false the proposal is only reported.
    pub perform: bool,
}

impl Default for AutoRebinConfig {
    fn default() -> Self {
        Self { bin_threshold: 0.0, uncert_fraction: None, mode: 1, perform: true }
    }
}

/// Bin-by-bin uncertainty settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinByBinConfig {
    pub add_threshold: f64,
    pub merge_threshold: f64,
    pub fix_norm: bool,
    /// Name template; see [`crate::bbb::BinByBinFactory::pattern`].
    pub pattern: String,
    /// Background processes that receive bin-by-bin uncertainties.
    pub processes: Vec<String>,
    /// Also build entries for control-region bins (without norm fixing).
    pub control_regions: bool,
}

impl Default for BinByBinConfig {
    fn default() -> Self {
        Self {
            add_threshold: 0.0,
            merge_threshold: 0.4,
            fix_norm: true,
            pattern: crate::bbb::DEFAULT_PATTERN.into(),
            processes: [
                "ZTT", "QCD", "W", "ZJ", "ZL", "TT", "VV", "Ztt", "ttbar", "EWK", "Fakes", "ZMM",
                "TTJ", "WJets", "Dibosons",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            control_regions: true,
        }
    }
}

/// Signal morphing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MorphConfig {
    pub enabled: bool,
    /// Workspace name.
    pub workspace: String,
    /// Object name template; `$BIN` and `$PROCESS` are substituted.
    pub pattern: String,
    pub min: f64,
    pub max: f64,
    /// Diagnostics file name inside the output folder, if wanted.
    pub diagnostics: Option<String>,
}

impl Default for MorphConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workspace: "htt".into(),
            pattern: "$BIN_$PROCESS_morph".into(),
            min: 90.0,
            max: 3200.0,
            diagnostics: Some("htt_mssm_demo.json".into()),
        }
    }
}

/// Full configuration of a harvesting run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub analysis: String,
    pub era: String,
    pub mass: MassConvention,
    pub channels: Vec<String>,
    /// Base categories per channel.
    pub categories: BTreeMap<String, Vec<Category>>,
    /// Background processes per channel.
    pub backgrounds: BTreeMap<String, Vec<String>>,
    /// Signal template masses.
    pub masses: Vec<f64>,
    pub input: InputConfig,
    pub output: OutputConfig,
    /// 0 = off; > 0 synthesizes control-region categories.
    pub control_region: u32,
    /// Channels that receive control-region categories.
    pub control_region_channels: Vec<String>,
    pub auto_rebin: bool,
    pub rebin: AutoRebinConfig,
    pub manual_rebin: bool,
    /// Manual bin edges per bin name.
    pub binning: BTreeMap<String, Vec<f64>>,
    pub bbb: BinByBinConfig,
    pub morph: MorphConfig,
    pub systematics: Vec<SystematicRule>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        let channels: Vec<String> = ["mt", "et", "tt", "em"].into_iter().map(String::from).collect();
        let categories = channels
            .iter()
            .map(|c| {
                (
                    c.clone(),
                    vec![Category::new(8, format!("{c}_nobtag")), Category::new(9, format!("{c}_btag"))],
                )
            })
            .collect();
        let full: Vec<String> =
            ["W", "QCD", "ZL", "ZJ", "TT", "VV", "ZTT"].into_iter().map(String::from).collect();
        let em: Vec<String> =
            ["W", "QCD", "ZLL", "TT", "VV", "ZTT"].into_iter().map(String::from).collect();
        let backgrounds = BTreeMap::from([
            ("et".to_string(), full.clone()),
            ("mt".to_string(), full.clone()),
            ("tt".to_string(), full),
            ("em".to_string(), em),
        ]);
        let binning = [
            ("et_nobtag", vec![500.0, 700.0, 900.0, 3900.0]),
            ("et_btag", vec![500.0, 3900.0]),
            ("mt_nobtag", vec![500.0, 700.0, 900.0, 1300.0, 1700.0, 1900.0, 3900.0]),
            ("mt_btag", vec![500.0, 1300.0, 3900.0]),
            ("tt_nobtag", vec![500.0, 3900.0]),
            ("tt_btag", vec![500.0, 3900.0]),
            ("em_nobtag", vec![500.0, 3900.0]),
            ("em_btag", vec![500.0, 3900.0]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            analysis: "htt".into(),
            era: "13TeV".into(),
            mass: MassConvention::MA,
            channels,
            categories,
            backgrounds,
            masses: vec![
                90.0, 100.0, 110.0, 120.0, 130.0, 140.0, 160.0, 180.0, 250.0, 300.0, 350.0, 400.0,
                450.0, 500.0, 600.0, 700.0, 800.0, 900.0, 1000.0, 1200.0, 1500.0, 1600.0, 1800.0,
                2000.0, 2300.0, 2600.0, 2900.0, 3200.0,
            ],
            input: InputConfig::default(),
            output: OutputConfig::default(),
            control_region: 0,
            control_region_channels: vec!["et".into(), "mt".into()],
            auto_rebin: false,
            rebin: AutoRebinConfig::default(),
            manual_rebin: false,
            binning,
            bbb: BinByBinConfig::default(),
            morph: MorphConfig::default(),
            systematics: crate::systematics::mssm_run2_rules(),
        }
    }
}

impl HarvestConfig {
    /// Check for missing or contradictory options.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(Error::Configuration("no channels configured".into()));
        }
        if self.masses.is_empty() {
            return Err(Error::Configuration("no signal masses configured".into()));
        }
        if self.masses.iter().any(|m| !m.is_finite()) {
            return Err(Error::Configuration("signal masses must be finite".into()));
        }
        for chn in &self.channels {
            let cats = self.categories.get(chn).ok_or_else(|| {
                Error::Configuration(format!("no categories configured for channel '{}'", chn))
            })?;
            let mut names = BTreeSet::new();
            for c in cats {
                if !names.insert(c.name.as_str()) {
                    return Err(Error::Configuration(format!(
                        "duplicate bin name '{}' in channel '{}'",
                        c.name, chn
                    )));
                }
            }
            if !self.backgrounds.contains_key(chn) {
                return Err(Error::Configuration(format!(
                    "no background processes configured for channel '{}'",
                    chn
                )));
            }
        }
        if self.manual_rebin {
            for (bin, edges) in &self.binning {
                if edges.len() < 2 || edges.windows(2).any(|w| w[1] <= w[0]) {
                    return Err(Error::Configuration(format!(
                        "manual binning for '{}' must have at least two strictly increasing edges, got {:?}",
                        bin, edges
                    )));
                }
            }
        }
        if self.rebin.mode > 1 {
            return Err(Error::Configuration(format!(
                "unknown rebin mode {} (expected 0 or 1)",
                self.rebin.mode
            )));
        }
        if !(0.0..1.0).contains(&self.bbb.merge_threshold) {
            return Err(Error::Configuration(format!(
                "merge threshold must be in [0, 1), got {}",
                self.bbb.merge_threshold
            )));
        }
        if self.morph.min >= self.morph.max {
            return Err(Error::Configuration(format!(
                "morphing range [{}, {}] is empty",
                self.morph.min, self.morph.max
            )));
        }
        Ok(())
    }
}
