//! loopcuda command line interface
//!
//! Usage:
//!   loopcuda [OPTIONS] <loop.json>
//!   loopcuda --help
//!
//! Examples:
//!   loopcuda axpy.json                        # Kernel and host plan as JSON
//!   loopcuda --threads 256 --cache-blocks axpy.json
//!   loopcuda --emit summary sum.json          # One-line dump of each part
//!   loopcuda --config gtx480.json sum.json    # Device and timing settings

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use loopcuda::prelude::*;
use log::{debug, error, info};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

/// Rewrite a sequential loop into a CUDA kernel and host marshaling code
#[derive(Parser, Debug)]
#[command(name = "loopcuda")]
#[command(version)]
#[command(about = "Rewrite a sequential loop into a CUDA kernel launch", long_about = None)]
struct Cli {
    /// Loop statement as JSON
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Transformation config as JSON (device, timing, types)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Threads per block (overrides the config file)
    #[arg(short, long)]
    threads: Option<u32>,

    /// Stage array accesses through shared memory
    #[arg(long)]
    cache_blocks: bool,

    /// Omit the kernel timing instrumentation
    #[arg(long)]
    no_timing: bool,

    /// What to emit
    #[arg(long, default_value = "json")]
    emit: EmitKind,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitKind {
    /// Kernel declaration and host statement as JSON
    Json,
    /// One-line rendering of the kernel and each host phase
    Summary,
}

#[derive(Serialize)]
struct Output<'a> {
    kernel: &'a FunDecl,
    host: &'a Stmt,
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

    info!("loopcuda v{}", loopcuda::VERSION);
    debug!("Input file: {:?}", cli.input);

    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read input file: {:?}", cli.input))?;
    let stmt: Stmt = serde_json::from_str(&source)
        .with_context(|| format!("Failed to parse loop statement in {:?}", cli.input))?;

    let config = build_config(&cli)?;
    debug!("Transformation config: {:?}", config);

    let transform = CudaTransform::new(config);
    let lowered = match transform.lower(&stmt, NameGenerator::global()) {
        Ok(lowered) => lowered,
        Err(e) => {
            error!("Transformation failed: {}", e);
            return Err(e.into());
        }
    };

    let output = match cli.emit {
        EmitKind::Json => {
            let kernel = lowered.kernel.to_decl();
            let host = lowered.plan.into_stmt();
            serde_json::to_string_pretty(&Output { kernel: &kernel, host: &host })
                .context("Failed to serialize the result")?
        }
        EmitKind::Summary => summary(&lowered),
    };
    write_output(&cli.output, &output)
}

fn build_config(cli: &Cli) -> Result<CudaConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid config file: {:?}", path))?
        }
        None => CudaConfig::default(),
    };

    // Override with CLI flags
    if let Some(threads) = cli.threads {
        config.thread_count = threads;
    }
    if cli.cache_blocks {
        config.cache_blocks = true;
    }
    if cli.no_timing {
        config.timing.enabled = false;
    }

    config.validate().context("Invalid transformation parameters")?;
    Ok(config)
}

fn summary(lowered: &Lowered) -> String {
    let mut lines = vec![format!("kernel: {}", lowered.kernel.to_decl())];
    for section in lowered.plan.sections() {
        for stmt in &section.stmts {
            lines.push(format!("{:?}: {}", section.phase, stmt));
        }
    }
    lines.join("\n")
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            fs::write(p, content)
                .with_context(|| format!("Failed to write output file: {:?}", p))?;
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
