use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use dc_core::{Model, Shape, SystematicKind};

use super::*;
use crate::config::{Category, MassConvention};
use crate::shapes::ShapeFile;
use crate::systematics::SystematicRule;

fn tmp_dir(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("dc_pipeline_{}_{}_{}", tag, std::process::id(), nanos))
}

fn shape(c: &[f64]) -> Shape {
    let edges = (0..=c.len()).map(|i| 100.0 * i as f64).collect();
    Shape::from_contents(edges, c.to_vec()).unwrap()
}

/// Shape file for `chn` covering `bases` and their control regions, with
/// every content multiplied by `k`.
fn write_inputs(root: &Path, chn: &str, bases: &[&str], k: f64) {
    let scale = format!("CMS_scale_t_{chn}_13TeV");
    let sc = |c: &[f64]| -> Shape { shape(&c.iter().map(|x| x * k).collect::<Vec<_>>()) };
    let mut h = BTreeMap::new();
    for base in bases {
        let mut names = vec![base.to_string()];
        for suffix in ["_wjets_cr", "_qcd_cr", "_wjets_ss_cr"] {
            names.push(format!("{base}{suffix}"));
        }
        for bin in names {
            h.insert(format!("{bin}/data_obs"), sc(&[60.0, 50.0, 30.0, 10.0]));
            h.insert(format!("{bin}/ZTT"), sc(&[40.0, 30.0, 20.0, 5.0]));
            h.insert(format!("{bin}/ZTT_{scale}Up"), sc(&[44.0, 33.0, 22.0, 5.5]));
            h.insert(format!("{bin}/ZTT_{scale}Down"), sc(&[36.0, 27.0, 18.0, 4.5]));
            h.insert(format!("{bin}/W"), sc(&[10.0, 8.0, 4.0, 2.0]));
            h.insert(format!("{bin}/QCD"), sc(&[9.0, 9.0, 5.0, 1.0]));
            for family in ["ggH", "bbH"] {
                for (mass, m) in [("200", 1.0), ("300", 2.0)] {
                    let nominal = [4.0 * m, 3.0 * m, 2.0 * m, 1.0 * m];
                    h.insert(format!("{bin}/{family}{mass}"), sc(&nominal));
                    let up: Vec<f64> = nominal.iter().map(|x| x * 1.1).collect();
                    let down: Vec<f64> = nominal.iter().map(|x| x * 0.9).collect();
                    h.insert(format!("{bin}/{family}{mass}_{scale}Up"), sc(&up));
                    h.insert(format!("{bin}/{family}{mass}_{scale}Down"), sc(&down));
                }
            }
        }
    }
    let file = root.join("Imperial").join(format!("htt_{chn}.inputs-mssm-13TeV.json"));
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(file, serde_json::to_string(&ShapeFile { histograms: h }).unwrap()).unwrap();
}

fn config(dir: &Path) -> HarvestConfig {
    let mut cfg = HarvestConfig::default();
    cfg.mass = MassConvention::MH;
    cfg.channels = vec!["et".into()];
    cfg.categories = BTreeMap::from([(
        "et".to_string(),
        vec![Category::new(8, "et_nobtag"), Category::new(9, "et_btag")],
    )]);
    cfg.backgrounds =
        BTreeMap::from([("et".to_string(), vec!["ZTT".into(), "W".into(), "QCD".into()])]);
    cfg.masses = vec![200.0, 300.0];
    cfg.input.root = dir.join("shapes");
    cfg.output.root = dir.join("output");
    cfg.systematics = vec![
        SystematicRule::ln_n("lumi_$ERA", 1.027).processes(["ZTT"]).with_signals(),
        SystematicRule::shape("CMS_scale_t_$CHANNEL_$ERA").processes(["ZTT"]).with_signals(),
    ];
    cfg.morph.diagnostics = None;
    write_inputs(&cfg.input.root, "et", &["et_nobtag", "et_btag"], 1.0);
    cfg
}

#[test]
fn builds_morphed_signal_model() {
    let dir = tmp_dir("build");
    let mut h = Harvester::new(config(&dir)).unwrap();
    let harvest = h.build().unwrap();

    assert_eq!(
        harvest.model.bin_set().into_iter().collect::<Vec<_>>(),
        vec!["htt_et_8_13TeV".to_string(), "htt_et_9_13TeV".to_string()]
    );
    assert_eq!(harvest.summary.morphed, 4);
    assert!(harvest.workspace.contains("htt_et_8_13TeV_ggH_morph"));
    assert!(harvest.workspace.contains("htt_et_9_13TeV_bbH_morph"));

    let signals: Vec<_> = harvest.model.processes().iter().filter(|p| p.signal).collect();
    assert_eq!(signals.len(), 4);
    for p in signals {
        assert!(p.mass.is_none());
        assert_eq!(p.pdf.as_deref(), Some(format!("{}_{}_morph", p.bin.name, p.name).as_str()));
    }
    assert!(harvest.summary.bin_by_bin > 0);
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn control_regions_hold_asimov_counting_bins() {
    let dir = tmp_dir("cr");
    let mut cfg = config(&dir);
    cfg.control_region = 1;
    let mut h = Harvester::new(cfg).unwrap();
    let harvest = h.build().unwrap();

    let m = &harvest.model;
    assert_eq!(m.bin_set().len(), 8);
    let ids: Vec<u32> = m.bins().iter().map(|b| b.bin_id).collect();
    for id in 10..=15 {
        assert!(ids.contains(&id), "missing control region {id}");
    }
    assert_asimov(m);
    assert_eq!(m.observations().iter().filter(|o| o.bin.is_control_region()).count(), 6);
    assert!(m.processes().iter().all(|p| !(p.signal && p.bin.is_control_region())));
    std::fs::remove_dir_all(dir).ok();
}

/// Adds an mt channel with categories `mt` to the et configuration.
fn with_mt(cfg: &mut HarvestConfig, mt: Vec<Category>, k: f64) {
    cfg.channels.push("mt".into());
    let bases: Vec<String> = mt.iter().map(|c| c.name.clone()).collect();
    cfg.categories.insert("mt".into(), mt);
    cfg.backgrounds.insert("mt".into(), vec!["ZTT".into(), "W".into(), "QCD".into()]);
    let bases: Vec<&str> = bases.iter().map(String::as_str).collect();
    write_inputs(&cfg.input.root, "mt", &bases, k);
}

/// Every control-region observation equals the backgrounds of its own bin.
fn assert_asimov(m: &Model) {
    for o in m.observations().iter().filter(|o| o.bin.is_control_region()) {
        let bkg: f64 = m
            .processes()
            .iter()
            .filter(|p| p.bin.same_bin(&o.bin) && !p.signal)
            .map(|p| p.rate())
            .sum();
        assert_eq!(o.shape().unwrap().n_bins(), 1);
        assert_relative_eq!(o.rate(), bkg, max_relative = 1e-12);
    }
}

#[test]
fn two_channels_with_control_regions() {
    let dir = tmp_dir("two_channels");
    let mut cfg = config(&dir);
    with_mt(&mut cfg, vec![Category::new(8, "mt_nobtag")], 1.0);
    cfg.control_region = 1;
    let mut h = Harvester::new(cfg).unwrap();
    let summary = h.run().unwrap();

    // et: 2 + 6 control regions, mt: 1 + 3.
    assert_eq!(summary.bins, 12);
    assert_eq!(summary.morphed, 6);
    assert_eq!(summary.empty_partitions, vec!["htt_mt_9_13TeV".to_string()]);

    let harvest = h.build().unwrap();
    let m = &harvest.model;
    assert_asimov(m);
    assert!(m.processes().iter().all(|p| !(p.signal && p.bin.is_control_region())));
    let mt: Vec<u32> = m.bins().iter().filter(|b| b.channel == "mt").map(|b| b.bin_id).collect();
    assert_eq!(mt.len(), 4);
    for id in [8, 10, 11, 12] {
        assert!(mt.contains(&id), "mt is missing {id}");
    }
    let out = h.config().output.dir();
    assert!(out.join("htt_mt_8_13TeV/htt_mt_12_13TeV.txt").is_file());
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn category_names_may_repeat_across_channels() {
    let dir = tmp_dir("shared_names");
    let mut cfg = config(&dir);
    cfg.categories.insert("et".into(), vec![Category::new(8, "nobtag")]);
    write_inputs(&cfg.input.root, "et", &["nobtag"], 1.0);
    with_mt(&mut cfg, vec![Category::new(8, "nobtag")], 3.0);
    cfg.control_region = 1;
    let harvest = Harvester::new(cfg).unwrap().build().unwrap();
    let m = &harvest.model;

    assert_eq!(
        m.bin_set().into_iter().collect::<Vec<_>>(),
        [
            "htt_et_10_13TeV",
            "htt_et_11_13TeV",
            "htt_et_12_13TeV",
            "htt_et_8_13TeV",
            "htt_mt_10_13TeV",
            "htt_mt_11_13TeV",
            "htt_mt_12_13TeV",
            "htt_mt_8_13TeV",
        ]
    );
    assert!(m.bins().iter().all(|b| b.name.starts_with(&format!("htt_{}_", b.channel))));
    assert_asimov(m);

    let ztt = |bin: &str| {
        m.processes().iter().find(|p| p.name == "ZTT" && p.bin.name == bin).unwrap().rate()
    };
    assert_relative_eq!(ztt("htt_et_8_13TeV"), 95.0);
    assert_relative_eq!(ztt("htt_mt_8_13TeV"), 285.0);
    assert_relative_eq!(ztt("htt_mt_11_13TeV"), 3.0 * ztt("htt_et_11_13TeV"));
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn manual_binning_applies_before_renaming() {
    let dir = tmp_dir("manual");
    let mut cfg = config(&dir);
    cfg.manual_rebin = true;
    cfg.binning = BTreeMap::from([("et_nobtag".to_string(), vec![0.0, 200.0, 400.0])]);
    let mut h = Harvester::new(cfg).unwrap();
    let harvest = h.build().unwrap();

    assert_eq!(harvest.summary.rebinned_bins, 1);
    let ztt = harvest
        .model
        .processes()
        .iter()
        .find(|p| p.name == "ZTT" && p.bin.name == "htt_et_8_13TeV")
        .unwrap();
    assert_eq!(ztt.shape().unwrap().contents(), &[70.0, 25.0]);
    let scale = harvest
        .model
        .systematics()
        .iter()
        .find(|s| s.process == "ZTT" && s.bin.name == "htt_et_8_13TeV" && s.name.starts_with("CMS_scale_t"))
        .unwrap();
    match &scale.kind {
        SystematicKind::Shape { shape_u: Some(u), .. } => assert_eq!(u.n_bins(), 2),
        other => panic!("unexpected kind {other:?}"),
    }
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn misaligned_manual_binning_names_the_stage() {
    let dir = tmp_dir("misaligned");
    let mut cfg = config(&dir);
    cfg.manual_rebin = true;
    cfg.binning = BTreeMap::from([("et_btag".to_string(), vec![0.0, 150.0, 400.0])]);
    let err = Harvester::new(cfg).unwrap().build().unwrap_err();
    assert!(matches!(err, Error::Stage { stage: "manual_rebin", .. }), "{err}");
    assert!(err.to_string().contains("et_btag"));
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn missing_template_fails_extraction() {
    let dir = tmp_dir("missing");
    let mut cfg = config(&dir);
    cfg.backgrounds.insert("et".into(), vec!["ZTT".into(), "VV".into()]);
    let err = Harvester::new(cfg).unwrap().build().unwrap_err();
    assert!(matches!(err, Error::Stage { stage: "extract_shapes", .. }));
    assert!(err.to_string().contains("et_nobtag/VV") || err.to_string().contains("et_btag/VV"));
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn invalid_configuration_is_rejected_up_front() {
    let mut cfg = HarvestConfig::default();
    cfg.masses.clear();
    assert!(matches!(Harvester::new(cfg), Err(Error::Configuration(_))));
}

#[test]
fn run_writes_every_non_empty_partition() {
    let dir = tmp_dir("run");
    let mut cfg = config(&dir);
    cfg.morph.diagnostics = Some("htt_mssm_demo.json".into());
    let out = cfg.output.dir();
    let mut h = Harvester::new(cfg).unwrap();
    let summary = h.run().unwrap();

    // cmb, et, htt_et_8, htt_et_9, htt_cmb_8, htt_cmb_9
    assert!(summary.empty_partitions.is_empty());
    assert_eq!(summary.cards, 2 * (2 + 2 + 1 + 1 + 1 + 1));
    assert!(out.join("cmb/htt_et_8_13TeV.txt").is_file());
    assert!(out.join("htt_et_9_13TeV/htt_et_9_13TeV_input.json").is_file());
    assert!(out.join("diagnostics/htt_mssm_demo.json").is_file());

    let card = std::fs::read_to_string(out.join("et/htt_et_8_13TeV.txt")).unwrap();
    assert!(card.contains("htt:htt_et_8_13TeV_ggH_morph"));
    std::fs::remove_dir_all(dir).ok();
}
