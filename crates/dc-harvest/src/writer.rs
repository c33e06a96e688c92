//! Text datacards with JSON shape files.
//!
//! For every bin of a partition one card (`$TAG/$BIN.txt`) and one shape file
//! (`$TAG/$BIN_input.json`) are written. The shape file holds the nominal and
//! systematic templates of the bin plus the workspace objects its processes
//! refer to.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use dc_core::{
    CardWriter, DATA_OBS, Error, InterpolatedShape, MassParameter, Model, MorphTemplate, Result,
    Shape, Systematic, SystematicKind, Workspace,
};
use serde::Serialize;

const RULE: &str =
    "----------------------------------------------------------------------------------------------------";

/// Serialized workspace object.
#[derive(Debug, Serialize)]
struct WorkspaceObject<'a> {
    parameter: &'a MassParameter,
    method: &'a str,
    anchors: &'a [MorphTemplate],
}

#[derive(Debug, Serialize)]
struct ShapeFileOut<'a> {
    histograms: BTreeMap<String, &'a Shape>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    workspace: BTreeMap<String, WorkspaceObject<'a>>,
}

/// [`CardWriter`] producing text cards.
#[derive(Debug, Clone)]
pub struct TextCardWriter {
    card_pattern: String,
    shapes_pattern: String,
}

impl TextCardWriter {
    /// Cards go to `<dir>/$TAG/$BIN.txt`, shapes to `<dir>/$TAG/$BIN_input.json`.
    pub fn new(dir: &Path) -> Self {
        let base = dir.display().to_string();
        Self {
            card_pattern: format!("{}/$TAG/$BIN.txt", base),
            shapes_pattern: format!("{}/$TAG/$BIN_input.json", base),
        }
    }

    pub fn with_patterns(card: impl Into<String>, shapes: impl Into<String>) -> Self {
        Self { card_pattern: card.into(), shapes_pattern: shapes.into() }
    }

    fn path(pattern: &str, tag: &str, bin: &str) -> PathBuf {
        PathBuf::from(pattern.replace("$TAG", tag).replace("$BIN", bin))
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| Error::io_at(dir, e))?;
    }
    std::fs::write(path, contents).map_err(|e| Error::io_at(path, e))
}

/// Format a number the way cards expect (`1.027`, `12.5`, `1`).
fn num(v: f64) -> String {
    let s = format!("{:.6}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-0" { "0".to_string() } else { s.to_string() }
}

fn column_value(s: &Systematic) -> String {
    match &s.kind {
        SystematicKind::LnN { value_u, value_d: None } => num(*value_u),
        SystematicKind::LnN { value_u, value_d: Some(d) } => format!("{}/{}", num(*d), num(*value_u)),
        SystematicKind::Shape { .. } => "1".to_string(),
    }
}

/// Render the card of one bin.
pub fn render_card(model: &Model, bin: &str, shapes_file: &str, workspace: &str) -> String {
    let obs = model.observations().iter().find(|o| o.bin.name == bin);
    let mut procs: Vec<_> = model.processes().iter().filter(|p| p.bin.name == bin).collect();
    // Signals first (non-positive indices), then backgrounds, each by name.
    procs.sort_by(|a, b| b.signal.cmp(&a.signal).then_with(|| a.name.cmp(&b.name)));
    let n_sig = procs.iter().filter(|p| p.signal).count() as i64;
    let indices: Vec<i64> = (0..procs.len() as i64).map(|k| k - n_sig + 1).collect();

    let sys_names: BTreeSet<&str> = model
        .systematics()
        .iter()
        .filter(|s| s.bin.name == bin)
        .map(|s| s.name.as_str())
        .collect();

    let mut out = String::new();
    writeln!(out, "imax    1 number of bins").unwrap();
    writeln!(out, "jmax    {} number of processes minus 1", procs.len().saturating_sub(1)).unwrap();
    writeln!(out, "kmax    {} number of nuisance parameters", sys_names.len()).unwrap();
    writeln!(out, "{}", RULE).unwrap();
    writeln!(out, "shapes * {} {} $CHANNEL/$PROCESS $CHANNEL/$PROCESS_$SYSTEMATIC", bin, shapes_file).unwrap();
    for p in &procs {
        if let Some(pdf) = &p.pdf {
            writeln!(out, "shapes {} {} {} {}:{}", p.name, bin, shapes_file, workspace, pdf).unwrap();
        }
    }
    writeln!(out, "{}", RULE).unwrap();
    writeln!(out, "bin          {}", bin).unwrap();
    writeln!(out, "observation  {}", num(obs.map(|o| o.rate()).unwrap_or(0.0))).unwrap();
    writeln!(out, "{}", RULE).unwrap();

    let width = procs.iter().map(|p| p.name.len()).chain([bin.len()]).max().unwrap_or(0) + 2;
    let row = |label: &str, cells: Vec<String>| {
        let mut line = format!("{:<40}", label);
        for c in cells {
            line.push_str(&format!("{:<width$}", c, width = width));
        }
        line.trim_end().to_string()
    };
    writeln!(out, "{}", row("bin", procs.iter().map(|_| bin.to_string()).collect())).unwrap();
    writeln!(out, "{}", row("process", procs.iter().map(|p| p.name.clone()).collect())).unwrap();
    writeln!(out, "{}", row("process", indices.iter().map(|i| i.to_string()).collect())).unwrap();
    writeln!(out, "{}", row("rate", procs.iter().map(|p| num(p.rate())).collect())).unwrap();
    writeln!(out, "{}", RULE).unwrap();

    for name in &sys_names {
        let entries: Vec<&Systematic> = model
            .systematics()
            .iter()
            .filter(|s| s.bin.name == bin && s.name == *name)
            .collect();
        let kinds: BTreeSet<bool> = entries.iter().map(|s| s.is_shape()).collect();
        let kind = match (kinds.contains(&true), kinds.contains(&false)) {
            (true, true) => "shape?",
            (true, false) => "shape",
            _ => "lnN",
        };
        let cells = procs
            .iter()
            .map(|p| {
                entries
                    .iter()
                    .find(|s| s.process == p.name && s.mass == p.mass)
                    .map(|s| column_value(s))
                    .unwrap_or_else(|| "-".to_string())
            })
            .collect();
        writeln!(out, "{}", row(&format!("{} {}", name, kind), cells)).unwrap();
    }
    out
}

impl CardWriter for TextCardWriter {
    fn write(&mut self, tag: &str, model: &Model, workspace: &Workspace) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for bin in model.bin_set() {
            let card_path = Self::path(&self.card_pattern, tag, &bin);
            let shapes_path = Self::path(&self.shapes_pattern, tag, &bin);
            let shapes_name = shapes_path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();

            let mut histograms: BTreeMap<String, &Shape> = BTreeMap::new();
            for o in model.observations().iter().filter(|o| o.bin.name == bin) {
                if let Some(s) = o.shape() {
                    histograms.insert(format!("{}/{}", bin, DATA_OBS), s);
                }
            }
            let mut objects = BTreeMap::new();
            for p in model.processes().iter().filter(|p| p.bin.name == bin) {
                if let Some(s) = p.shape() {
                    histograms.insert(format!("{}/{}", bin, p.name), s);
                }
                if let Some(pdf) = &p.pdf {
                    let morph: &dyn InterpolatedShape = workspace.get(pdf).ok_or_else(|| {
                        Error::MissingShape(format!(
                            "bin '{}' process '{}' refers to missing workspace object '{}'",
                            bin, p.name, pdf
                        ))
                    })?;
                    objects.insert(
                        pdf.clone(),
                        WorkspaceObject {
                            parameter: morph.parameter(),
                            method: morph.method(),
                            anchors: morph.anchors(),
                        },
                    );
                }
            }
            for s in model.systematics().iter().filter(|s| s.bin.name == bin) {
                if let SystematicKind::Shape { shape_u: Some(u), shape_d: Some(d), .. } = &s.kind {
                    histograms.insert(format!("{}/{}_{}Up", bin, s.process, s.name), u);
                    histograms.insert(format!("{}/{}_{}Down", bin, s.process, s.name), d);
                }
            }

            let json = serde_json::to_string_pretty(&ShapeFileOut { histograms, workspace: objects })?;
            write_file(&shapes_path, &json)?;
            write_file(&card_path, &render_card(model, &bin, &shapes_name, workspace.name()))?;
            log::debug!("wrote {}", card_path.display());
            written.push(card_path);
            written.push(shapes_path);
        }
        Ok(written)
    }
}
