//! The `Harvester`: runs every stage of the datacard production in order.
//!
//! Stages run sequentially on one [`Model`]; any failure is wrapped with the
//! name of the stage that raised it.

use std::collections::BTreeSet;
use std::path::PathBuf;

use dc_core::filter::{backgrounds, channel, control_region, process, signals};
use dc_core::{
    CardWriter, Entity, Error, InterpolationEngine, Model, PredicateExt, Result, ShapeExtractor,
    SystematicsInjector, Workspace,
};

use serde::Serialize;

use crate::bbb::BinByBinFactory;
use crate::cards::{AssemblyReport, assemble, standard_partitions};
use crate::categories::CategoryRegistry;
use crate::config::HarvestConfig;
use crate::control_region::normalize_control_regions;
use crate::interp::VerticalInterpolation;
use crate::morph::{MorphDiagnostics, MorphDriver, extract_pdfs};
use crate::naming::{STANDARD_PATTERN, set_standard_bin_names};
use crate::rebin::{AutoRebin, ManualRebin, RebinMode};
use crate::shapes::JsonShapeExtractor;
use crate::systematics::MssmSystematics;
use crate::writer::TextCardWriter;

/// Templates of background processes and observations.
pub const BACKGROUND_TEMPLATE: &str = "$BIN/$PROCESS";
pub const BACKGROUND_SYSTEMATIC_TEMPLATE: &str = "$BIN/$PROCESS_$SYSTEMATIC";

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub bins: usize,
    pub processes: usize,
    pub systematics: usize,
    pub bin_by_bin: usize,
    pub rebinned_bins: usize,
    pub morphed: usize,
    pub cards: usize,
    /// Partitions left out because nothing matched them.
    pub empty_partitions: Vec<String>,
}

/// State after every stage except card writing.
#[derive(Debug)]
pub struct Harvest {
    pub registry: CategoryRegistry,
    pub model: Model,
    pub workspace: Workspace,
    pub summary: RunSummary,
}

/// Pipeline over pluggable collaborators.
pub struct Harvester<
    X = JsonShapeExtractor,
    S = MssmSystematics,
    E = VerticalInterpolation,
    W = TextCardWriter,
> {
    config: HarvestConfig,
    extractor: X,
    systematics: S,
    engine: E,
    writer: W,
}

impl Harvester {
    /// Harvester with the JSON extractor, the configured systematic rules,
    /// vertical interpolation and text cards under the output directory.
    pub fn new(config: HarvestConfig) -> Result<Self> {
        let systematics = MssmSystematics::new(config.systematics.clone());
        let writer = TextCardWriter::new(&config.output.dir());
        Self::with_collaborators(
            config,
            JsonShapeExtractor::new(),
            systematics,
            VerticalInterpolation,
            writer,
        )
    }
}

impl<X, S, E, W> Harvester<X, S, E, W>
where
    X: ShapeExtractor,
    S: SystematicsInjector,
    E: InterpolationEngine + Sync,
    W: CardWriter,
{
    /// Validates `config` before anything runs.
    pub fn with_collaborators(
        config: HarvestConfig,
        extractor: X,
        systematics: S,
        engine: E,
        writer: W,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, extractor, systematics, engine, writer })
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    fn control_regions_on(&self) -> bool {
        self.config.control_region > 0
    }

    fn registry(&self) -> CategoryRegistry {
        let mut registry = CategoryRegistry::new(
            &self.config.analysis,
            &self.config.era,
            self.config
                .categories
                .iter()
                .filter(|(chn, _)| self.config.channels.contains(chn))
                .map(|(chn, cats)| (chn.clone(), cats.clone()))
                .collect(),
        );
        if self.control_regions_on() {
            let (with_cr, without): (Vec<String>, Vec<String>) = self
                .config
                .channels
                .iter()
                .cloned()
                .partition(|c| self.config.control_region_channels.contains(c));
            for chn in &without {
                log::info!("channel {}: no control regions configured", chn);
            }
            registry.synthesize_control_regions(&with_cr);
        }
        registry
    }

    /// Observations, backgrounds and per-mass signals for every bin.
    fn populate(&self, registry: &CategoryRegistry) -> Result<Model> {
        let signal_names = self.config.mass.signal_processes();
        let mut model = Model::new();
        for chn in &self.config.channels {
            let bins = registry.bins(chn);
            let bkgs = self.config.backgrounds.get(chn).ok_or_else(|| {
                Error::Configuration(format!("no background processes for channel '{}'", chn))
            })?;
            model.add_observations(&bins);
            model.add_processes(&bins, bkgs, false, &[]);
            model.add_processes(&bins, &signal_names, true, &self.config.masses);
        }
        if self.control_regions_on() {
            let signal_entries = |e: &Entity<'_>| e.is_signal() == Some(true);
            model.filter_all(&control_region().and(signal_entries));
        }
        log::info!(
            "model: {} bins, {} processes ({} signal)",
            model.bin_set().len(),
            model.processes().len(),
            model.processes().iter().filter(|p| p.signal).count()
        );
        Ok(model)
    }

    fn inject_systematics(&self, model: &mut Model) -> Result<()> {
        for chn in &self.config.channels {
            self.systematics.inject(model, chn, self.control_regions_on())?;
        }
        Ok(())
    }

    fn extract_shapes(&mut self, model: &mut Model) -> Result<()> {
        for chn in &self.config.channels {
            let file: PathBuf = self.config.input.shape_file(chn, &self.config.era);
            self.extractor.extract(
                model,
                &channel([chn.as_str()]).and(backgrounds()),
                &file,
                BACKGROUND_TEMPLATE,
                BACKGROUND_SYSTEMATIC_TEMPLATE,
            )?;
            for (family, members) in self.config.mass.signal_families() {
                let nominal = format!("$BIN/{}$MASS", family);
                let systematic = format!("$BIN/{}$MASS_$SYSTEMATIC", family);
                let filter = channel([chn.as_str()]).and(signals()).and(process(members));
                self.extractor.extract(model, &filter, &file, &nominal, &systematic)?;
            }
            log::info!("channel {}: shapes from {}", chn, file.display());
        }
        Ok(())
    }

    fn auto_rebin(&self, model: &mut Model) -> Result<Vec<(String, String)>> {
        let cfg = &self.config.rebin;
        let rebin = AutoRebin::new()
            .bin_threshold(cfg.bin_threshold)
            .uncert_fraction(cfg.uncert_fraction)
            .mode(RebinMode::try_from(cfg.mode)?)
            .perform(cfg.perform);
        let outcomes = rebin.rebin(model, &control_region().not())?;
        if !cfg.perform {
            return Ok(Vec::new());
        }
        Ok(outcomes.into_iter().filter(|o| o.changed()).map(|o| (o.channel, o.bin)).collect())
    }

    fn bin_by_bin(&self, model: &mut Model) -> Result<usize> {
        let cfg = &self.config.bbb;
        let factory = BinByBinFactory::new()
            .add_threshold(cfg.add_threshold)
            .merge_threshold(cfg.merge_threshold)
            .fix_norm(cfg.fix_norm)
            .pattern(&cfg.pattern);
        let cr_factory = factory.clone().fix_norm(false);
        let mut added = 0;
        for chn in &self.config.channels {
            let procs = channel([chn.as_str()])
                .and(backgrounds())
                .and(process(cfg.processes.iter().map(String::as_str)));
            added += factory.merge_and_add(model, &procs.clone().and(control_region().not()))?;
            if self.control_regions_on() && cfg.control_regions {
                // Control-region templates are single counting bins; never renormalized.
                added += cr_factory.merge_and_add(model, &procs.and(control_region()))?;
            }
        }
        log::info!("added {} bin-by-bin uncertainties", added);
        Ok(added)
    }

    fn morph(&self, model: &mut Model, workspace: &mut Workspace) -> Result<usize> {
        let cfg = &self.config.morph;
        let params = self.config.mass.mass_parameters(cfg.min, cfg.max);
        let report = MorphDriver::new(&self.engine, params).pattern(&cfg.pattern).run(model, workspace)?;
        extract_pdfs(model, workspace, &cfg.pattern)?;
        if let Some(file) = &cfg.diagnostics {
            let path = self.config.output.dir().join("diagnostics").join(file);
            MorphDiagnostics::from_workspace(workspace)?.write(&path)?;
        }
        Ok(report.keys.len())
    }

    /// Run every stage up to (not including) card writing.
    pub fn build(&mut self) -> Result<Harvest> {
        let mut summary = RunSummary::default();
        let registry = self.registry();
        if registry.channels().next().is_none() {
            return Err(Error::Configuration("no categories for the configured channels".into())
                .in_stage("categories"));
        }

        let mut model = self.populate(&registry).map_err(|e| e.in_stage("populate"))?;
        self.inject_systematics(&mut model).map_err(|e| e.in_stage("systematics"))?;
        self.extract_shapes(&mut model).map_err(|e| e.in_stage("extract_shapes"))?;

        if self.control_regions_on() {
            let report =
                normalize_control_regions(&mut model).map_err(|e| e.in_stage("control_regions"))?;
            log::info!(
                "control regions: {} Asimov observations, {} shapes collapsed",
                report.asimov_bins.len(),
                report.collapsed_shapes
            );
        }

        let mut rebinned = BTreeSet::new();
        if self.config.auto_rebin {
            let done = self.auto_rebin(&mut model).map_err(|e| e.in_stage("auto_rebin"))?;
            rebinned.extend(done);
        }
        if self.config.manual_rebin {
            let done = ManualRebin::new(self.config.binning.clone())
                .apply(&mut model)
                .map_err(|e| e.in_stage("manual_rebin"))?;
            rebinned.extend(done.into_iter().map(|b| (b.channel, b.name)));
        }
        summary.rebinned_bins = rebinned.len();

        summary.bin_by_bin = self.bin_by_bin(&mut model).map_err(|e| e.in_stage("bin_by_bin"))?;

        set_standard_bin_names(&mut model, STANDARD_PATTERN).map_err(|e| e.in_stage("bin_names"))?;

        let mut workspace = Workspace::new(&self.config.morph.workspace);
        if self.config.morph.enabled {
            summary.morphed =
                self.morph(&mut model, &mut workspace).map_err(|e| e.in_stage("morphing"))?;
        }

        summary.bins = model.bin_set().len();
        summary.processes = model.processes().len();
        summary.systematics = model.systematics().len();
        Ok(Harvest { registry, model, workspace, summary })
    }

    /// Build the model and write every card partition.
    pub fn run(&mut self) -> Result<RunSummary> {
        let Harvest { registry, model, workspace, mut summary } = self.build()?;
        let partitions = standard_partitions(
            &registry,
            &self.config.channels,
            &self.config.analysis,
            &self.config.era,
        );
        let report: AssemblyReport = assemble(&mut self.writer, &model, &workspace, &partitions)
            .map_err(|e| e.in_stage("cards"))?;
        summary.cards = report.n_files();
        summary.empty_partitions = report.skipped;
        log::info!(
            "done: {} bins, {} processes, {} systematics ({} bin-by-bin), {} rebinned, {} morphed, {} files",
            summary.bins,
            summary.processes,
            summary.systematics,
            summary.bin_by_bin,
            summary.rebinned_bins,
            summary.morphed,
            summary.cards
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests;
