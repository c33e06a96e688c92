use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_dcharvest"))
}

fn tmp_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("dcharvest_cli_{}_{}_{}", std::process::id(), nanos, tag));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn shape(contents: &[f64]) -> serde_json::Value {
    let edges: Vec<f64> = (0..=contents.len()).map(|i| 100.0 * i as f64).collect();
    json!({ "edges": edges, "contents": contents })
}

/// Shape file for one channel, covering its signal and control-region bins.
fn write_shapes(root: &Path, chn: &str, bins: &[&str], backgrounds: &[&str]) {
    let scale = format!("CMS_scale_t_{chn}_13TeV");
    let mut h = serde_json::Map::new();
    for base in bins {
        let mut names = vec![base.to_string()];
        for suffix in ["_wjets_cr", "_qcd_cr", "_wjets_ss_cr"] {
            names.push(format!("{base}{suffix}"));
        }
        for bin in names {
            h.insert(format!("{bin}/data_obs"), shape(&[60.0, 50.0, 30.0]));
            for (k, bkg) in backgrounds.iter().enumerate() {
                let c = [20.0 + k as f64, 15.0, 6.0];
                h.insert(format!("{bin}/{bkg}"), shape(&c));
                h.insert(format!("{bin}/{bkg}_{scale}Up"), shape(&c.map(|x| x * 1.05)));
                h.insert(format!("{bin}/{bkg}_{scale}Down"), shape(&c.map(|x| x * 0.95)));
            }
            for family in ["ggH", "bbH"] {
                for (mass, k) in [("200", 1.0), ("300", 2.0)] {
                    let c = [3.0 * k, 2.0 * k, 1.0 * k];
                    h.insert(format!("{bin}/{family}{mass}"), shape(&c));
                    h.insert(format!("{bin}/{family}{mass}_{scale}Up"), shape(&c.map(|x| x * 1.1)));
                    h.insert(format!("{bin}/{family}{mass}_{scale}Down"), shape(&c.map(|x| x * 0.9)));
                }
            }
        }
    }
    let path = root.join("shapes/Imperial").join(format!("htt_{chn}.inputs-mssm-13TeV.json"));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_string(&json!({ "histograms": h })).unwrap()).unwrap();
}

/// et with categories 8 and 9, tt with category 8 only.
fn setup(tag: &str) -> (PathBuf, PathBuf) {
    let dir = tmp_dir(tag);
    write_shapes(&dir, "et", &["et_nobtag", "et_btag"], &["ZTT", "W", "QCD"]);
    write_shapes(&dir, "tt", &["tt_nobtag"], &["ZTT", "QCD"]);
    let cfg = json!({
        "mass": "MH",
        "channels": ["et", "tt"],
        "categories": {
            "et": [{ "id": 8, "name": "et_nobtag" }, { "id": 9, "name": "et_btag" }],
            "tt": [{ "id": 8, "name": "tt_nobtag" }]
        },
        "backgrounds": { "et": ["ZTT", "W", "QCD"], "tt": ["ZTT", "QCD"] },
        "masses": [200.0, 300.0],
        "input": { "root": dir.join("shapes") },
        "output": { "root": dir.join("out"), "folder": "cards" },
        "systematics": [
            { "name": "lumi_$ERA", "type": "lnN", "value": 1.027, "processes": ["ZTT"], "signals": true },
            { "name": "CMS_scale_t_$CHANNEL_$ERA", "type": "shape", "processes": ["ZTT"], "signals": true }
        ],
        "morph": { "diagnostics": null }
    });
    let cfg_path = dir.join("harvest.json");
    std::fs::write(&cfg_path, serde_json::to_string_pretty(&cfg).unwrap()).unwrap();
    (dir, cfg_path)
}

fn summary(out: &Output) -> serde_json::Value {
    assert!(
        out.status.success(),
        "dcharvest failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("stdout should be the JSON run summary")
}

fn card_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".txt"))
        .collect();
    names.sort();
    names
}

#[test]
fn writes_cards_referencing_morphed_signals() {
    let (dir, cfg) = setup("morph");
    let out = run(&["--config", cfg.to_str().unwrap(), "--log-level", "warn"]);
    let v = summary(&out);

    // ggH and bbH in three bins.
    assert_eq!(v["morphed"].as_u64(), Some(6));
    let card = std::fs::read_to_string(dir.join("out/cards/et/htt_et_8_13TeV.txt")).unwrap();
    assert!(card.contains("htt:htt_et_8_13TeV_ggH_morph"), "{card}");
    assert!(card.contains("htt:htt_et_8_13TeV_bbH_morph"), "{card}");

    let shapes: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.join("out/cards/et/htt_et_8_13TeV_input.json")).unwrap(),
    )
    .unwrap();
    assert!(shapes["workspace"]["htt_et_8_13TeV_ggH_morph"]["anchors"].is_array());
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn empty_partitions_are_not_written() {
    let (dir, cfg) = setup("empty");
    let out = run(&["--config", cfg.to_str().unwrap(), "--log-level", "warn"]);
    let v = summary(&out);

    let empty: Vec<&str> =
        v["empty_partitions"].as_array().unwrap().iter().map(|x| x.as_str().unwrap()).collect();
    assert_eq!(empty, vec!["htt_tt_9_13TeV"]);
    assert!(!dir.join("out/cards/htt_tt_9_13TeV").exists());
    assert!(dir.join("out/cards/htt_tt_8_13TeV/htt_tt_8_13TeV.txt").is_file());
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn control_regions_use_fixed_ids_per_base_category() {
    let (dir, cfg) = setup("cr");
    let out = run(&["--config", cfg.to_str().unwrap(), "--control-region", "1", "--log-level", "warn"]);
    summary(&out);

    let cmb = card_names(&dir.join("out/cards/cmb"));
    let mut expected: Vec<String> =
        (8..=15).map(|id| format!("htt_et_{id}_13TeV.txt")).collect();
    expected.push("htt_tt_8_13TeV.txt".into());
    expected.sort();
    assert_eq!(cmb, expected);

    let nobtag = card_names(&dir.join("out/cards/htt_et_8_13TeV"));
    assert_eq!(
        nobtag,
        ["htt_et_10_13TeV.txt", "htt_et_11_13TeV.txt", "htt_et_12_13TeV.txt", "htt_et_8_13TeV.txt"]
    );
    let btag = card_names(&dir.join("out/cards/htt_et_9_13TeV"));
    assert_eq!(
        btag,
        ["htt_et_13_13TeV.txt", "htt_et_14_13TeV.txt", "htt_et_15_13TeV.txt", "htt_et_9_13TeV.txt"]
    );

    // No signal in control regions.
    let cr_card = std::fs::read_to_string(dir.join("out/cards/cmb/htt_et_11_13TeV.txt")).unwrap();
    assert!(!cr_card.contains("ggH"));
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn missing_shape_file_fails_with_stage_name() {
    let (dir, cfg) = setup("missing");
    std::fs::remove_file(dir.join("shapes/Imperial/htt_tt.inputs-mssm-13TeV.json")).unwrap();
    let out = run(&["--config", cfg.to_str().unwrap(), "--log-level", "warn"]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("extract_shapes"), "{stderr}");
    assert!(stderr.contains("htt_tt.inputs-mssm-13TeV.json"), "{stderr}");
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn unknown_mass_convention_is_rejected() {
    let out = run(&["--mass", "mX", "--dump-config"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("mX"));
}

#[test]
fn dump_config_applies_overrides() {
    let out = run(&[
        "--dump-config",
        "--mass",
        "MH",
        "--postfix",
        "_v2",
        "--input-folder-mt",
        "Wisconsin",
        "--control-region",
        "1",
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("mass: MH"), "{text}");
    assert!(text.contains("postfix: _v2"), "{text}");
    assert!(text.contains("mt: Wisconsin"), "{text}");
    assert!(text.contains("control_region: 1"), "{text}");
}
