//! dcharvest CLI

use anyhow::{Context, Result};
use clap::Parser;
use dc_harvest::{HarvestConfig, Harvester, MassConvention};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "dcharvest")]
#[command(about = "Build MSSM H->tautau datacards from shape files")]
#[command(version)]
struct Cli {
    /// Pipeline configuration (YAML, or JSON with a .json extension).
    /// Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mass parameter convention (mA or MH)
    #[arg(long)]
    mass: Option<MassConvention>,

    /// Root directory of the input folders
    #[arg(long)]
    input_root: Option<PathBuf>,

    /// Input folder for the em channel
    #[arg(long)]
    input_folder_em: Option<String>,

    /// Input folder for the et channel
    #[arg(long)]
    input_folder_et: Option<String>,

    /// Input folder for the mt channel
    #[arg(long)]
    input_folder_mt: Option<String>,

    /// Input folder for the tt channel
    #[arg(long)]
    input_folder_tt: Option<String>,

    /// Postfix appended to input file names
    #[arg(long)]
    postfix: Option<String>,

    /// Merge low-statistics bins automatically
    #[arg(long)]
    auto_rebin: Option<bool>,

    /// Apply the configured binning table
    #[arg(long)]
    manual_rebin: Option<bool>,

    /// Root directory for output
    #[arg(long)]
    output_root: Option<PathBuf>,

    /// Output folder under the output root
    #[arg(long)]
    output_folder: Option<String>,

    /// Control regions (0 = off)
    #[arg(long)]
    control_region: Option<u32>,

    /// Threads (0 = auto).
    #[arg(long, default_value = "0")]
    threads: usize,

    /// Print the effective configuration as YAML and exit.
    #[arg(long)]
    dump_config: bool,

    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

fn read_config(path: &Path) -> Result<HarvestConfig> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg: HarvestConfig = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        serde_yaml_ng::from_slice(&bytes)?
    };
    Ok(cfg)
}

impl Cli {
    /// Command-line options take precedence over the configuration file.
    fn apply_overrides(&self, cfg: &mut HarvestConfig) {
        if let Some(mass) = self.mass {
            cfg.mass = mass;
        }
        if let Some(root) = &self.input_root {
            cfg.input.root = root.clone();
        }
        let folders = [
            ("em", &self.input_folder_em),
            ("et", &self.input_folder_et),
            ("mt", &self.input_folder_mt),
            ("tt", &self.input_folder_tt),
        ];
        for (chn, folder) in folders {
            if let Some(f) = folder {
                cfg.input.folders.insert(chn.to_string(), f.clone());
            }
        }
        if let Some(postfix) = &self.postfix {
            cfg.input.postfix = postfix.clone();
        }
        if let Some(on) = self.auto_rebin {
            cfg.auto_rebin = on;
        }
        if let Some(on) = self.manual_rebin {
            cfg.manual_rebin = on;
        }
        if let Some(root) = &self.output_root {
            cfg.output.root = root.clone();
        }
        if let Some(folder) = &self.output_folder {
            cfg.output.folder = folder.clone();
        }
        if let Some(cr) = self.control_region {
            cfg.control_region = cr;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = match &cli.config {
        Some(path) => read_config(path)?,
        None => HarvestConfig::default(),
    };
    cli.apply_overrides(&mut cfg);

    if cli.dump_config {
        print!("{}", serde_yaml_ng::to_string(&cfg)?);
        return Ok(());
    }

    if cli.threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(cli.threads).build_global();
    }

    tracing::info!(
        mass = %cfg.mass,
        channels = ?cfg.channels,
        output = %cfg.output.dir().display(),
        "harvesting"
    );
    let mut harvester = Harvester::new(cfg)?;
    let summary = harvester.run()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
