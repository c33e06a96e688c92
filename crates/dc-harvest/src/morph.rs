//! Signal morphing: turn per-mass signal templates into one interpolated
//! workspace object per (bin, process), and validation artifacts for them.

use std::collections::BTreeMap;
use std::path::Path;

use dc_core::filter::{bin_name, process, signals};
use dc_core::{
    Error, InterpolatedShape, InterpolationEngine, MassParameter, Model, MorphTemplate, PredicateExt,
    Result, SystematicKind, Workspace,
};
use serde::{Deserialize, Serialize};

/// Render the workspace key of a (bin, process) pair.
pub fn morph_key(pattern: &str, bin: &str, process: &str) -> String {
    pattern.replace("$BIN", bin).replace("$PROCESS", process)
}

/// One morphing job.
#[derive(Debug)]
struct Job {
    bin: String,
    process: String,
    parameter: MassParameter,
    templates: Vec<MorphTemplate>,
}

/// Summary of a morphing pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MorphReport {
    /// Workspace keys created, in order.
    pub keys: Vec<String>,
    /// Per-mass process entries folded away.
    pub folded_processes: usize,
}

/// Drives an [`InterpolationEngine`] over every signal (bin, process) pair.
pub struct MorphDriver<'a, E: InterpolationEngine + ?Sized> {
    engine: &'a E,
    parameters: BTreeMap<String, MassParameter>,
    pattern: String,
}

impl<'a, E: InterpolationEngine + Sync + ?Sized> MorphDriver<'a, E> {
    /// `parameters` maps signal process names to their mass parameter.
    pub fn new(engine: &'a E, parameters: BTreeMap<String, MassParameter>) -> Self {
        Self { engine, parameters, pattern: "$BIN_$PROCESS_morph".into() }
    }

    /// Workspace key template; `$BIN` and `$PROCESS` are substituted.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    fn jobs(&self, model: &Model) -> Result<Vec<Job>> {
        let mut groups: BTreeMap<(String, String), Vec<MorphTemplate>> = BTreeMap::new();
        for p in model.processes().iter().filter(|p| p.signal) {
            let Some(mass) = p.mass else { continue };
            let shape = p.shape().ok_or_else(|| {
                Error::MissingShape(format!(
                    "bin '{}' process '{}' mass {} has no shape to morph",
                    p.bin.name, p.name, mass
                ))
            })?;
            let mut t = MorphTemplate::new(mass, shape.clone());
            for s in model.systematics().iter().filter(|s| s.belongs_to(p)) {
                if let SystematicKind::Shape { shape_u: Some(u), shape_d: Some(d), .. } = &s.kind {
                    t.variations.insert(s.name.clone(), (u.clone(), d.clone()));
                }
            }
            groups.entry((p.bin.name.clone(), p.name.clone())).or_default().push(t);
        }

        groups
            .into_iter()
            .map(|((bin, process), mut templates)| {
                let parameter = self.parameters.get(&process).cloned().ok_or_else(|| {
                    Error::Configuration(format!(
                        "no mass parameter mapped for signal process '{}' in bin '{}'",
                        process, bin
                    ))
                })?;
                templates.sort_by(|a, b| a.mass.total_cmp(&b.mass));
                Ok(Job { bin, process, parameter, templates })
            })
            .collect()
    }

    /// Interpolate every signal (bin, process), record the results in
    /// `workspace`, and reduce the model to one mass-independent entry per pair.
    pub fn run(&self, model: &mut Model, workspace: &mut Workspace) -> Result<MorphReport> {
        use rayon::prelude::*;

        let jobs = self.jobs(model)?;
        let built: Vec<(String, String, Box<dyn InterpolatedShape>)> = jobs
            .into_par_iter()
            .map(|job| {
                let key = morph_key(&self.pattern, &job.bin, &job.process);
                let morph = self.engine.interpolate(job.templates, &job.parameter).map_err(|e| {
                    Error::Validation(format!("morphing '{}': {}", key, e))
                })?;
                Ok((job.bin, job.process, morph))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut report = MorphReport::default();
        for (bin, proc_name, morph) in built {
            let key = morph_key(&self.pattern, &bin, &proc_name);
            let Some(keep) = morph.anchors().first().map(|a| a.mass) else { continue };
            report.folded_processes += fold_masses(model, &bin, &proc_name, keep);
            log::debug!(
                "{}: {} anchors in {} [{}, {}]",
                key,
                morph.anchors().len(),
                morph.parameter().name,
                morph.parameter().min,
                morph.parameter().max
            );
            workspace.insert(key.clone(), morph);
            report.keys.push(key);
        }
        log::info!(
            "morphed {} signal templates into workspace '{}'",
            report.keys.len(),
            workspace.name()
        );
        Ok(report)
    }
}

/// Keep one mass-independent entry for (bin, process), using the entry at `keep`.
fn fold_masses(model: &mut Model, bin: &str, proc_name: &str, keep: f64) -> usize {
    let pair = signals().and(bin_name([bin])).and(process([proc_name]));
    let others = |e: &dc_core::Entity<'_>| e.mass().is_some_and(|m| m != keep);
    let before = model.processes().len();
    model.filter_all(&pair.clone().and(others));
    let folded = before - model.processes().len();

    model.for_each_process_mut(&pair, |p| {
        p.mass = None;
        p.take_shape();
        p.set_rate(1.0);
    });
    model.for_each_systematic_mut(&pair, |s| {
        s.mass = None;
        if let SystematicKind::Shape { shape_u, shape_d, .. } = &mut s.kind {
            *shape_u = None;
            *shape_d = None;
        }
    });
    folded
}

/// Point every mass-independent signal process at its workspace object.
///
/// Fails if a process has no matching entry in `workspace`.
pub fn extract_pdfs(model: &mut Model, workspace: &Workspace, pattern: &str) -> Result<usize> {
    let mut n = 0usize;
    model.try_for_each_process_mut(&signals(), |p| {
        if p.mass.is_some() {
            return Ok(());
        }
        let key = morph_key(pattern, &p.bin.name, &p.name);
        if !workspace.contains(&key) {
            return Err(Error::MissingShape(format!(
                "workspace '{}' has no object '{}'",
                workspace.name(),
                key
            )));
        }
        p.pdf = Some(key);
        n += 1;
        Ok(())
    })?;
    Ok(n)
}

/// A single anchor template in a validation artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MorphingTemplate {
    pub parameter_value: f64,
    pub bin_contents: Vec<f64>,
    pub label: String,
}

/// Anchors plus an interpolated shape at a target value, for visual checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MorphingArtifact {
    pub name: String,
    pub parameter_label: String,
    pub bin_edges: Vec<f64>,
    pub templates: Vec<MorphingTemplate>,
    pub interpolated: Vec<f64>,
    pub target_value: f64,
    pub method: String,
}

impl MorphingArtifact {
    /// Evaluate `morph` at `target` and pair it with its anchors.
    pub fn from_morph(name: &str, morph: &dyn InterpolatedShape, target: f64) -> Result<Self> {
        let shape = morph.evaluate(target)?;
        let param = morph.parameter();
        let templates: Vec<MorphingTemplate> = morph
            .anchors()
            .iter()
            .map(|a| MorphingTemplate {
                parameter_value: a.mass,
                bin_contents: a.shape.contents().to_vec(),
                label: format!("{} = {}", param.name, a.mass),
            })
            .collect();
        if templates.iter().any(|t| t.bin_contents.len() != shape.n_bins()) {
            return Err(Error::Validation(format!(
                "artifact '{}': anchors and interpolated shape differ in bin count",
                name
            )));
        }
        Ok(Self {
            name: name.to_string(),
            parameter_label: param.name.clone(),
            bin_edges: shape.edges().to_vec(),
            templates,
            interpolated: shape.contents().to_vec(),
            target_value: target,
            method: morph.method().to_string(),
        })
    }
}

/// Diagnostics file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MorphDiagnostics {
    pub workspace: String,
    pub artifacts: Vec<MorphingArtifact>,
}

impl MorphDiagnostics {
    /// One artifact per adjacent anchor pair, evaluated at its midpoint.
    pub fn from_workspace(workspace: &Workspace) -> Result<Self> {
        let mut artifacts = Vec::new();
        for (key, morph) in workspace.iter() {
            for w in morph.anchors().windows(2) {
                let mid = 0.5 * (w[0].mass + w[1].mass);
                artifacts.push(MorphingArtifact::from_morph(key, morph, mid)?);
            }
        }
        Ok(Self { workspace: workspace.name().to_string(), artifacts })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| Error::io_at(dir, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| Error::io_at(path, e))?;
        log::info!("wrote {} morphing artifacts to {}", self.artifacts.len(), path.display());
        Ok(())
    }
}
