//! RfmForge: customer segmentation CLI using quintile-based RFM scoring
//!
//! This is the main entrypoint that orchestrates loading, scoring,
//! segmentation, reporting and export of the campaign target lists.

use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use rfmforge::config::LOG_ENV_VAR;
use rfmforge::{
    build_target_lists, commit, load_customers, load_settings, pending_target_files, report, run,
    scores_frame, Args, FileContents, PendingFile, RfmError,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    init_tracing(args.verbose);

    run_full_pipeline(&args).map_err(|err| {
        let stage = err.stage();
        anyhow::Error::new(err).context(format!("segmentation failed during the {stage} stage"))
    })
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Run the full segmentation pipeline
fn run_full_pipeline(args: &Args) -> Result<(), RfmError> {
    println!("=== RFM Segmentation Pipeline ===\n");

    let start_time = Instant::now();

    let settings = args.apply_overrides(load_settings(args.config.as_deref())?);
    // Overrides can change the campaigns, so check again.
    settings.validate()?;
    if args.verbose {
        println!("Analysis date: {}", settings.analysis_date);
        println!("Zero-order customers: {:?}", settings.zero_frequency);
    }

    // Step 1: Load data
    let records = load_customers(&args.input, &settings.category_delimiter)?;
    println!("✓ Data loaded: {} rows from {}", records.len(), args.input.display());

    // Step 2: Score and segment
    let segmentation = run(&records, &settings)?;
    println!("✓ Customers segmented: {}", segmentation.customers.len());

    report::print_segment_summary(&segmentation);
    if args.report {
        report::print_descriptive_report(&records)?;
    }

    // Step 3: Build every output before touching the filesystem
    let lists = build_target_lists(&segmentation, &records, &settings.campaigns);
    let mut pending = pending_target_files(&args.output_dir, &lists)?;
    if let Some(ref path) = args.scores_output {
        pending.push(PendingFile {
            path: path.clone(),
            contents: FileContents::Csv(scores_frame(&segmentation)?),
        });
    }

    if let Some(ref chart_path) = args.chart {
        let svg = report::render_segment_chart(&report::segment_summary(&segmentation))?;
        pending.push(PendingFile {
            path: chart_path.clone(),
            contents: FileContents::Text(svg),
        });
    }

    let written = commit(pending)?;

    println!("\n=== Pipeline Complete ===");
    for list in &lists {
        println!("{}: {} customers", list.name, list.customer_ids.len());
    }
    for path in &written {
        println!("Saved: {}", path.display());
    }
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());

    Ok(())
}
