use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, ValueHint};
use std::io;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod batch;
mod config;
mod error;
mod geodesy;
mod gpx;
mod model;
mod normalizer;
mod pipeline;
mod tcx;
mod xml;

use config::{NormalizeOptions, OutputConfig};
use pipeline::{default_output_path, Pipeline};

/// Normalize TCX/GPX activity tracks so time, distance and speed agree
#[derive(Parser, Debug)]
#[command(name = "rust-tcx-normalizer", version, about)]
struct Cli {
    /// Total distance in meters; required for GPX input
    #[arg(short = 'd', long = "distance", allow_negative_numbers = true)]
    distance: Option<f64>,

    /// Total activity time in seconds
    #[arg(short = 't', long = "time", allow_negative_numbers = true)]
    time: Option<f64>,

    /// Start instant, RFC 3339 or "YYYY-MM-DD HH:MM:SS" (UTC)
    #[arg(short = 's', long = "start", value_parser = parse_start)]
    start: Option<DateTime<Utc>>,

    /// TCX/GPX file, or a folder to process every track inside it
    #[arg(short = 'i', long = "input", value_hint = ValueHint::AnyPath)]
    input: PathBuf,

    /// Output file, or output folder for folder input
    #[arg(short = 'o', long = "output", value_hint = ValueHint::AnyPath)]
    output: Option<PathBuf>,

    /// Value for the document's creator attribute
    #[arg(long)]
    creator: Option<String>,

    /// Write speeds with 6 decimal places
    #[arg(long, action = ArgAction::SetTrue)]
    source_precision: bool,

    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn parse_start(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    model::parse_instant(value).ok_or_else(|| format!("unrecognized date/time: {}", value))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let options = NormalizeOptions {
        distance_meters: cli.distance,
        total_time_seconds: cli.time,
        start_date: cli.start,
    };
    if let Some(distance) = options.distance() {
        info!("distance override: {} m", distance);
    }
    if let Some(time) = options.total_time() {
        info!("total time override: {} s", time);
    }
    if let Some(start) = options.start_date {
        info!("start override: {}", model::format_instant(&start));
    }

    let mut config = if cli.source_precision {
        OutputConfig::source_compatible()
    } else {
        OutputConfig::default()
    };
    if let Some(creator) = cli.creator {
        config = config.with_creator(creator);
    }
    let pipeline = Pipeline::new(config);

    if cli.input.is_dir() {
        let output = cli
            .output
            .unwrap_or_else(|| cli.input.join("normalized"));
        let summary = batch::process_folder(&pipeline, &cli.input, &output, &options)?;
        batch::print_summary(&summary);
        if summary.succeeded == 0 && summary.failed > 0 {
            bail!("no track in {} could be normalized", cli.input.display());
        }
        return Ok(());
    }

    if !cli.input.exists() {
        bail!("input not found: {}", cli.input.display());
    }

    let output = cli
        .output
        .unwrap_or_else(|| default_output_path(&cli.input));
    let report = pipeline
        .process_file(&cli.input, &output, &options)
        .with_context(|| format!("normalizing {}", cli.input.display()))?;

    println!(
        "✅ {} -> {}: {} trackpoints, {:.3} m in {:.3} s ({:.3} m/s)",
        cli.input.display(),
        output.display(),
        report.trackpoints,
        report.distance_meters,
        report.total_time_seconds,
        report.average_speed
    );
    if let Some(positional) = report.positional_distance_meters {
        println!(
            "   GPS positions measure {:.1} m; the output uses {:.1} m",
            positional, report.distance_meters
        );
    }
    Ok(())
}
