use anyhow::Context;
use clap::Parser;
use log::{error, info};
use std::process::ExitCode;
use std::sync::Arc;

use waymo2tfrecord::{
    setup_output_directories, write_report, AnnotationConverter, Args, Downloader, LabelMap,
    Manifest, Orchestrator, ProcessingStats, TaskQueue,
};

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(&args) {
        Ok(stats) if stats.failed_entries() == 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<ProcessingStats> {
    let manifest = Manifest::load(&args.manifest)?;
    let label_map = Arc::new(LabelMap::load(&args.label_map)?);
    info!(
        "Loaded {} manifest entries and {} classes",
        manifest.len(),
        label_map.len()
    );

    setup_output_directories(&args.data_dir, &args.temp_dir)
        .context("Failed to set up output directories")?;

    let queue = TaskQueue::new(args.workers).context("Failed to build the worker pool")?;
    let orchestrator = Orchestrator::new(
        queue,
        Arc::new(Downloader::new(&args.gsutil)),
        AnnotationConverter::new(label_map, args.box_policy()),
        args.camera.into(),
    );

    info!("Starting the conversion process...");
    let outcomes = orchestrator.run(&manifest, args.batch_size, &args.data_dir, &args.temp_dir);

    let stats = ProcessingStats::from_outcomes(&outcomes);
    stats.print_summary();
    for outcome in outcomes.iter().filter(|outcome| !outcome.is_success()) {
        if let Err(e) = &outcome.result {
            error!("{} failed ({}): {}", outcome.entry, e.kind(), e);
        }
    }

    if let Some(report) = &args.report {
        write_report(report, &outcomes, &stats)
            .with_context(|| format!("Failed to write report {}", report.display()))?;
        info!("Wrote outcome report to {}", report.display());
    }

    Ok(stats)
}
