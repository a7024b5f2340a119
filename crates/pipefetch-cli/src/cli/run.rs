//! `pipefetch <SOURCE> <DEST>`: build the pipeline, run it, print a summary.

use anyhow::{Context, Result};
use pipefetch_core::config::PipelineConfig;
use pipefetch_core::event_log::CsvEventLog;
use pipefetch_core::observer::{FanoutObserver, TracingObserver};
use pipefetch_core::storage::FsStorage;
use pipefetch_core::{Pipeline, PipelineReport};
use std::sync::Arc;

use super::Cli;

pub async fn run_pipeline(cli: &Cli, cfg: PipelineConfig) -> Result<()> {
    // Destination must exist before the persist stage starts.
    let storage = FsStorage::prepare(&cli.dest)
        .with_context(|| format!("prepare destination {}", cli.dest.display()))?;

    let mut event_log = CsvEventLog::new();
    if let Some(path) = &cli.manifest {
        event_log = event_log.with_manifest(path)?;
    }
    let dead_letter = cli.dead_letter_path(&cfg);
    if let Some(path) = &dead_letter {
        event_log = event_log.with_dead_letter(path)?;
    }
    let event_log = Arc::new(event_log);
    let observer = FanoutObserver::new()
        .with(Arc::new(TracingObserver))
        .with(event_log.clone());

    let source = cli.source.display().to_string();
    let pipeline = Pipeline::builder(cfg)
        .storage(Arc::new(storage))
        .observer(Arc::new(observer))
        .build()?;
    let result = pipeline.run(&source).await;
    event_log.flush()?;
    let report = result?;

    if report.timed_out() {
        tracing::warn!(
            persisted = report.persist.persisted,
            abandoned = report.fetch.abandoned + report.persist.abandoned,
            "deadline reached before the source was exhausted"
        );
    }
    print_summary(&report);
    if let Some(path) = &cli.manifest {
        println!("Manifest: {}", path.display());
    }
    if let Some(path) = &dead_letter {
        println!("Dead letter: {}", path.display());
    }
    Ok(())
}

fn print_summary(report: &PipelineReport) {
    let outcome = if report.timed_out() {
        "timed out"
    } else {
        "completed"
    };
    println!(
        "Run {} in {:.1}s: {} stored ({} bytes), {} empty, {} failed, {} not saved",
        outcome,
        report.elapsed.as_secs_f64(),
        report.persist.persisted,
        report.persist.bytes,
        report.fetch.empty,
        report.fetch.failed,
        report.persist.failed,
    );
    let skipped = report.source.skipped_empty + report.source.skipped_malformed;
    if skipped > 0 {
        println!("  {} source record(s) skipped", skipped);
    }
    let abandoned = report.source.abandoned + report.fetch.abandoned + report.persist.abandoned;
    if abandoned > 0 {
        println!("  {} item(s) abandoned at the deadline", abandoned);
    }
}
