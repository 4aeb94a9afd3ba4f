//! `refine-worker` -- batch image refinement job.
//!
//! Loads a prompt collection, runs every prompt through the
//! generate / critique / resume loop, and writes per-prompt artifacts plus
//! `batch_report.json` and `events.jsonl` under the output directory.
//! Configuration is read from the environment (see
//! [`refine_worker::config::WorkerConfig::from_env`]).
//!
//! Ctrl-C stops new prompts from starting; prompts already running finish.
//! A second Ctrl-C exits at once with status 130.
//! The process exits non-zero only when configuration or the prompt
//! collection cannot be loaded.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use refine_core::naming::EVENT_LOG_FILE;
use refine_core::prompts::PromptCollection;
use refine_events::{EventBus, EventLog};
use refine_pipeline::{BatchRunner, BatchSettings};
use refine_worker::{build_controller, watch_interrupts};
use refine_worker::config::{LogFormat, WorkerConfig};

const DEFAULT_LOG_FILTER: &str =
    "refine_worker=info,refine_pipeline=info,refine_engine=info,refine_critic=info,refine_store=info,refine_events=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    init_tracing(config.log_format);

    tracing::info!(
        prompts_file = %config.prompts_file.display(),
        output_dir = %config.output_dir.display(),
        engine = ?config.engine,
        critic = ?config.critic,
        concurrency = config.concurrency,
        "Starting refine-worker",
    );

    let collection = PromptCollection::load(&config.prompts_file)
        .context("Cannot load prompt collection")?;
    tracing::info!(prompts = collection.len(), "Prompt collection loaded");

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| format!("Cannot create {}", config.output_dir.display()))?;

    let events = Arc::new(EventBus::default());
    let event_log = tokio::spawn(EventLog::run(
        config.output_dir.join(EVENT_LOG_FILE),
        events.subscribe(),
    ));

    let controller = Arc::new(build_controller(&config, Arc::clone(&events))?);
    drop(events);

    let cancel = CancellationToken::new();
    tokio::spawn(watch_ctrl_c(cancel.clone()));

    let runner = BatchRunner::new(
        controller,
        BatchSettings {
            output_dir: config.output_dir.clone(),
            defaults: config.defaults.clone(),
            concurrency: config.concurrency,
        },
        cancel,
    );
    let report = runner.run(&collection).await;

    // The event log finishes once the last bus handle is gone.
    drop(runner);
    match event_log.await {
        Ok(Ok(written)) => tracing::debug!(written, "Event log closed"),
        Ok(Err(e)) => tracing::error!(error = %e, "Event log failed"),
        Err(e) => tracing::error!(error = %e, "Event log task panicked"),
    }

    match report {
        Ok(report) => tracing::info!(
            batch_id = %report.batch_id,
            total = report.total,
            accepted = report.accepted,
            exhausted = report.exhausted,
            failed = report.failed,
            skipped = report.skipped,
            "Batch complete",
        ),
        Err(e) => tracing::error!(error = %e, "Cannot write batch report"),
    }
    Ok(())
}

async fn watch_ctrl_c(cancel: CancellationToken) {
    if watch_interrupts(tokio::signal::ctrl_c, cancel).await {
        tracing::error!("Second interrupt received, aborting");
        std::process::exit(130);
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}
