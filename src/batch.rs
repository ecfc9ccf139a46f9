/// Folder processing
///
/// Every `.tcx`/`.gpx` under the input folder is normalized in parallel
/// into the output folder, keeping sub-folders. One failing file never
/// stops the others; each gets a row in `processing_summary.csv`.

use anyhow::{Context, Result};
use csv::Writer;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::NormalizeOptions;
use crate::pipeline::Pipeline;

pub const SUMMARY_FILE_NAME: &str = "processing_summary.csv";

#[derive(Debug, Serialize)]
pub struct BatchRecord {
    pub input_file: String,
    pub output_file: String,
    pub dialect: String,
    pub trackpoints: usize,
    pub distance_m: f64,
    pub total_time_s: f64,
    pub average_speed_mps: f64,
    pub start_date: String,
    pub positional_distance_m: Option<f64>,
    pub status: String,
}

#[derive(Debug)]
pub struct BatchSummary {
    pub records: Vec<BatchRecord>,
    pub succeeded: usize,
    pub failed: usize,
    pub summary_path: PathBuf,
}

fn is_track_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_lowercase().as_str(), "tcx" | "gpx"))
        .unwrap_or(false)
}

/// Track files under `folder`, sorted, skipping anything inside `exclude`.
pub fn collect_track_files(folder: &Path, exclude: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_entry(|entry| entry.path() != exclude)
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_track_file(entry.path()))
        .map(|entry| entry.path().to_path_buf())
        .collect();
    files.sort();
    files
}

/// Output path for each input, all distinct. A taken name falls back to
/// one carrying the input extension, then to numbered variants of that.
fn plan_outputs(inputs: &[PathBuf], input_root: &Path, output_root: &Path) -> Vec<PathBuf> {
    let mut taken = HashSet::new();
    inputs
        .iter()
        .map(|input| {
            let relative = input.strip_prefix(input_root).unwrap_or(input);
            let stem = relative
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "activity".to_string());
            let ext = relative
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            let folder = output_root.join(relative.parent().unwrap_or_else(|| Path::new("")));

            let mut output = folder.join(format!("{}-normalized.tcx", stem));
            let mut attempt = 1;
            while !taken.insert(output.clone()) {
                let name = match attempt {
                    1 => format!("{}-{}-normalized.tcx", stem, ext),
                    n => format!("{}-{}-{}-normalized.tcx", stem, ext, n),
                };
                output = folder.join(name);
                attempt += 1;
            }
            output
        })
        .collect()
}

fn process_one(pipeline: &Pipeline, input: &Path, output: &Path, options: &NormalizeOptions) -> BatchRecord {
    let mut record = BatchRecord {
        input_file: input.display().to_string(),
        output_file: String::new(),
        dialect: String::new(),
        trackpoints: 0,
        distance_m: 0.0,
        total_time_s: 0.0,
        average_speed_mps: 0.0,
        start_date: String::new(),
        positional_distance_m: None,
        status: String::new(),
    };

    if let Some(parent) = output.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            record.status = format!("ERROR: {}", e);
            return record;
        }
    }

    match pipeline.process_file(input, output, options) {
        Ok(report) => {
            record.output_file = output.display().to_string();
            record.dialect = report.dialect.label().to_string();
            record.trackpoints = report.trackpoints;
            record.distance_m = report.distance_meters;
            record.total_time_s = report.total_time_seconds;
            record.average_speed_mps = report.average_speed;
            record.start_date = crate::model::format_instant(&report.start_date);
            record.positional_distance_m = report.positional_distance_meters;
            record.status = "SUCCESS".to_string();
        }
        Err(e) => {
            warn!("{}: {}", input.display(), e);
            record.status = format!("ERROR: {}", e);
        }
    }
    record
}

pub fn process_folder(
    pipeline: &Pipeline,
    input_folder: &Path,
    output_folder: &Path,
    options: &NormalizeOptions,
) -> Result<BatchSummary> {
    fs::create_dir_all(output_folder)
        .with_context(|| format!("creating output folder {}", output_folder.display()))?;

    let inputs = collect_track_files(input_folder, output_folder);
    let outputs = plan_outputs(&inputs, input_folder, output_folder);
    info!(
        "processing {} track files from {} on {} cores",
        inputs.len(),
        input_folder.display(),
        num_cpus::get()
    );

    let start_time = Instant::now();
    let done = AtomicUsize::new(0);
    let total = inputs.len();

    let records: Vec<BatchRecord> = inputs
        .par_iter()
        .zip(outputs.par_iter())
        .map(|(input, output)| {
            let record = process_one(pipeline, input, output, options);
            let count = done.fetch_add(1, Ordering::Relaxed) + 1;
            info!("[{}/{}] {} {}", count, total, record.status, input.display());
            record
        })
        .collect();

    let succeeded = records.iter().filter(|r| r.status == "SUCCESS").count();
    let failed = records.len() - succeeded;
    info!(
        "processed {} files in {:.2} s",
        records.len(),
        start_time.elapsed().as_secs_f64()
    );

    let summary_path = output_folder.join(SUMMARY_FILE_NAME);
    write_summary_csv(&records, &summary_path)?;

    Ok(BatchSummary {
        records,
        succeeded,
        failed,
        summary_path,
    })
}

fn write_summary_csv(records: &[BatchRecord], path: &Path) -> Result<()> {
    let mut wtr = Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    info!("summary saved to {}", path.display());
    Ok(())
}

pub fn print_summary(summary: &BatchSummary) {
    println!("\n🎯 PROCESSING SUMMARY");
    println!("====================");
    println!("Total files: {}", summary.records.len());
    println!("✅ Successful: {}", summary.succeeded);
    println!("❌ Errors: {}", summary.failed);

    let successful: Vec<&BatchRecord> = summary
        .records
        .iter()
        .filter(|r| r.status == "SUCCESS")
        .collect();

    if !successful.is_empty() {
        let total_km = successful.iter().map(|r| r.distance_m).sum::<f64>() / 1000.0;
        let total_points: usize = successful.iter().map(|r| r.trackpoints).sum();
        println!("Distance normalized: {:.2} km across {} trackpoints", total_km, total_points);
    }

    for failure in summary.records.iter().filter(|r| r.status != "SUCCESS") {
        println!("   • {} -> {}", failure.input_file, failure.status);
    }

    println!("📊 Summary CSV: {}", summary.summary_path.display());
}
