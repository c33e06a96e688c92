//! JSON shape files and the extractor that reads them.
//!
//! A shape file maps template paths to shapes:
//!
//! ```json
//! { "histograms": { "et_nobtag/ZTT": { "edges": [0, 1], "contents": [3.0] } } }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use dc_core::{
    DATA_OBS, Error, Model, Predicate, Result, Shape, ShapeExtractor, SystematicKind,
};
use serde::{Deserialize, Serialize};

/// Contents of one shape file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShapeFile {
    #[serde(default)]
    pub histograms: BTreeMap<String, Shape>,
}

impl ShapeFile {
    pub fn open(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        let file: ShapeFile = serde_json::from_str(&text).map_err(|e| {
            Error::Validation(format!("parsing shape file {}: {}", path.display(), e))
        })?;
        Ok(file)
    }

    pub fn get(&self, key: &str) -> Option<&Shape> {
        self.histograms.get(key)
    }
}

/// Substitute `$BIN`, `$PROCESS`, `$MASS` and `$SYSTEMATIC` in a template.
pub fn render_template(
    template: &str,
    bin: &str,
    process: &str,
    mass: &str,
    systematic: Option<&str>,
) -> String {
    let out = template
        .replace("$BIN", bin)
        .replace("$PROCESS", process)
        .replace("$MASS", mass);
    match systematic {
        Some(s) => out.replace("$SYSTEMATIC", s),
        None => out,
    }
}

/// [`ShapeExtractor`] over JSON shape files; each file is parsed once.
#[derive(Debug, Default)]
pub struct JsonShapeExtractor {
    cache: HashMap<PathBuf, ShapeFile>,
}

impl JsonShapeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    fn file(&mut self, path: &Path) -> Result<&ShapeFile> {
        if !self.cache.contains_key(path) {
            let file = ShapeFile::open(path)?;
            log::debug!("loaded {} templates from {}", file.histograms.len(), path.display());
            self.cache.insert(path.to_path_buf(), file);
        }
        self.cache
            .get(path)
            .ok_or_else(|| Error::MissingShape(format!("shape file {} not cached", path.display())))
    }
}

fn lookup(file: &ShapeFile, key: &str, source: &Path) -> Result<Shape> {
    file.get(key)
        .cloned()
        .ok_or_else(|| Error::MissingShape(format!("'{}' not found in {}", key, source.display())))
}

impl ShapeExtractor for JsonShapeExtractor {
    fn extract(
        &mut self,
        model: &mut Model,
        filter: &dyn Predicate,
        source: &Path,
        nominal: &str,
        systematic: &str,
    ) -> Result<()> {
        let file = self.file(source)?;

        let mut n_obs = 0usize;
        let mut obs_result = Ok(());
        model.for_each_observation_mut(filter, |o| {
            if obs_result.is_err() {
                return;
            }
            let key = render_template(nominal, &o.bin.name, DATA_OBS, "*", None);
            match lookup(file, &key, source) {
                Ok(shape) => {
                    o.set_shape(shape, true);
                    n_obs += 1;
                }
                Err(e) => obs_result = Err(e),
            }
        });
        obs_result?;

        let mut rates: HashMap<(String, String, String, String), f64> = HashMap::new();
        model.try_for_each_process_mut(filter, |p| {
            let key = render_template(nominal, &p.bin.name, &p.name, &p.mass_label(), None);
            let shape = lookup(file, &key, source)?;
            p.set_shape(shape, true);
            rates.insert(
                (p.bin.channel.clone(), p.bin.name.clone(), p.name.clone(), p.mass_label()),
                p.rate(),
            );
            Ok(())
        })?;

        let mut sys_result = Ok(());
        let mut n_sys = 0usize;
        model.for_each_systematic_mut(filter, |s| {
            if sys_result.is_err() {
                return;
            }
            let mass = dc_core::model::mass_label(s.mass);
            let SystematicKind::Shape { value_u, value_d, shape_u, shape_d } = &mut s.kind else {
                return;
            };
            let rate_key = (s.bin.channel.clone(), s.bin.name.clone(), s.process.clone(), mass.clone());
            let Some(&nominal_rate) = rates.get(&rate_key) else {
                return;
            };
            let fetch = |dir: &str| {
                let key = render_template(
                    systematic,
                    &s.bin.name,
                    &s.process,
                    &mass,
                    Some(&format!("{}{}", s.name, dir)),
                );
                lookup(file, &key, source)
            };
            let (up, down) = match (fetch("Up"), fetch("Down")) {
                (Ok(u), Ok(d)) => (u, d),
                (Err(e), _) | (_, Err(e)) => {
                    sys_result = Err(e);
                    return;
                }
            };
            if nominal_rate > 0.0 {
                *value_u = up.integral() / nominal_rate;
                *value_d = down.integral() / nominal_rate;
            }
            *shape_u = Some(up);
            *shape_d = Some(down);
            n_sys += 1;
        });
        sys_result?;

        log::debug!(
            "{}: {} observations, {} processes, {} shape systematics",
            source.display(),
            n_obs,
            rates.len(),
            n_sys
        );
        Ok(())
    }
}
