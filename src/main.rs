//! kfission Command Line Interface
//!
//! Usage:
//!   kfission [OPTIONS] <input-file>
//!   kfission --help
//!
//! Examples:
//!   kfission kernel.ll                          # Writes output.ll
//!   kfission kernel.ll --host host.ll -o out.ll # Link the host module first
//!   kfission -v --report report.json kernel.ll  # Per-function records as JSON
//!   kfission --dry-run -vv kernel.ll            # Analyze only

use anyhow::{Context, Result};
use clap::Parser;
use kfission::codegen::print_module;
use kfission::transform::{FissionConfig, FissionPipeline};
use log::{debug, info};
use std::fs;
use std::path::PathBuf;

/// kfission - stream-mode loop fission for accelerator kernels
#[derive(Parser, Debug)]
#[command(name = "kfission")]
#[command(author = "kfission Contributors")]
#[command(version)]
#[command(about = "Splits independent kernel loops into two stream-mode halves", long_about = None)]
struct Cli {
    /// Device IR module
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Host IR module to link in (pairs launch stubs with kernels)
    #[arg(long, value_name = "FILE")]
    host: Option<PathBuf>,

    /// Output module
    #[arg(short, long, value_name = "FILE", default_value = "output.ll")]
    output: PathBuf,

    /// Write the per-function fission records as JSON
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Reject counters that no compare inside the loop uses
    #[arg(long)]
    strict_counter: bool,

    /// Consider every defined function, not only annotated kernels
    #[arg(long)]
    all_functions: bool,

    /// Do not annotate fissioned clones as kernels
    #[arg(long)]
    no_annotate: bool,

    /// Analyze without writing the output module
    #[arg(long)]
    dry_run: bool,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("kfission v{}", kfission::VERSION);
    debug!("Input file: {:?}", cli.input);

    let mut module = kfission::load_modules(&cli.input, cli.host.as_deref())?;

    let config = build_config(&cli);
    debug!("Fission config: {:?}", config);

    let report = FissionPipeline::new(config).run(&mut module);

    if let Some(path) = &cli.report {
        let json = report.to_json().context("Failed to serialize fission report")?;
        fs::write(path, json).with_context(|| format!("Failed to write report: {:?}", path))?;
    }

    if cli.dry_run {
        info!("Dry run: {:?} not written", cli.output);
        return Ok(());
    }

    fs::write(&cli.output, print_module(&module))
        .with_context(|| format!("Failed to write output file: {:?}", cli.output))?;
    info!("Wrote {:?}", cli.output);

    Ok(())
}

fn build_config(cli: &Cli) -> FissionConfig {
    let mut config = if cli.strict_counter {
        FissionConfig::strict()
    } else {
        FissionConfig::default()
    };

    if cli.all_functions {
        config.kernels_only = false;
    }
    if cli.no_annotate {
        config.annotate_clones = false;
    }
    config.dry_run = cli.dry_run;

    config
}
