//! `batchrun`: run every row of a CSV against a workflow endpoint, one task
//! at a time, and export the results.

mod cli;
mod export;
mod input;
mod progress;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use batchrun_client::{HttpClientConfig, HttpWorkflowClient, SubmitTarget};
use batchrun_core::{
    BatchConfig, BatchRunner, HistoryLog, TaskOutcome, TaskStatus, init_observability,
};
use clap::Parser;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use crate::cli::{Cli, Commands, HistoryArgs, RunArgs};
use crate::progress::{ProgressTracker, format_notice};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_observability();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::History(args) => show_history(&args),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let content = std::fs::read_to_string(&args.input)
        .with_context(|| format!("read {}", args.input.display()))?;
    let (header, rows) = input::read_table(&content)?;
    let slots = match &args.slots {
        Some(path) => input::load_slots(path)?,
        None => input::slots_from_header(&header),
    };
    let grid = input::project(&header, rows, &slots)?;

    let mut config = BatchConfig::from_env();
    if let Some(group_size) = args.group_size {
        config = config.with_group_size(group_size);
    }
    if let Some(secs) = args.timeout_secs {
        config = config.with_task_timeout(Duration::from_secs(secs));
    }

    let http_config = match &args.base_url {
        Some(base_url) => {
            let mut http_config = HttpClientConfig::new(base_url.as_str());
            if let Ok(key) = std::env::var("BATCHRUN_API_KEY")
                && !key.trim().is_empty()
            {
                http_config = http_config.api_key(key.trim());
            }
            http_config
        }
        None => HttpClientConfig::from_env()?,
    };
    let client = Arc::new(HttpWorkflowClient::new(http_config)?);

    let mut builder = BatchRunner::builder(client.clone()).config(config.clone());
    if !args.skip_debug_gate {
        builder = builder.debug_control(client.clone());
    }
    if !args.no_run_log {
        builder = builder.run_log(client.clone());
    }
    if let Some(path) = &args.history {
        builder = builder.history(HistoryLog::load(path, config.history_limit)?);
    }
    let runner = builder.build()?;

    let target = match (&args.node_id, &args.node_name) {
        (Some(node_id), Some(node_name)) => SubmitTarget::node(
            args.workflow_id.as_str(),
            args.name.as_str(),
            node_id.as_str(),
            node_name.as_str(),
        ),
        _ => SubmitTarget::workflow(args.workflow_id.as_str(), args.name.as_str()),
    };

    let (stop_tx, printer) = spawn_printer(&runner);
    let report = runner.submit(target, slots, &grid).await;

    if let Ok(report) = &report {
        if let Some(id) = report.stopped_at {
            info!(task_id = id, "sequence stopped on a task error");
        }
        if args.retry_failed {
            retry_failed(&runner).await?;
        }
    }
    let _ = stop_tx.send(());
    let _ = printer.await;
    let report = report?;

    let summary = runner.summary();
    println!(
        "{} task(s): {} succeeded, {} failed, {} not run",
        summary.total, summary.ok_count, summary.fail_count, summary.pending
    );
    if let Some(run_id) = report.run_id {
        println!("run id: {run_id}");
    }

    if let Some(path) = &args.export {
        let format = export::write_export(&runner.export(), path)?;
        println!("exported {format:?} to {}", path.display());
    }
    if let Some(path) = &args.history {
        runner.history().save(path)?;
    }
    Ok(())
}

async fn retry_failed(runner: &BatchRunner) -> Result<()> {
    let failed: Vec<_> = runner
        .snapshot()
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Failed)
        .map(|t| t.id)
        .collect();
    for id in failed {
        let outcome = runner.retry_task(id).await?;
        if outcome != TaskOutcome::Completed {
            info!(task_id = id, ?outcome, "retry did not complete the task");
        }
    }
    Ok(())
}

/// Prints task transitions and notices until `stop` fires, then drains what
/// is left.
fn spawn_printer(runner: &BatchRunner) -> (oneshot::Sender<()>, JoinHandle<()>) {
    let (stop_tx, mut stop_rx) = oneshot::channel();
    let mut snapshots = runner.subscribe();
    let mut notices = runner.notices();
    let handle = tokio::spawn(async move {
        let mut tracker = ProgressTracker::default();
        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    for line in tracker.update(&snapshot) {
                        println!("{line}");
                    }
                }
                notice = notices.recv() => match notice {
                    Ok(notice) => eprintln!("{}", format_notice(&notice)),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = &mut stop_rx => break,
            }
        }
        let snapshot = snapshots.borrow().clone();
        for line in tracker.update(&snapshot) {
            println!("{line}");
        }
        while let Ok(notice) = notices.try_recv() {
            eprintln!("{}", format_notice(&notice));
        }
    });
    (stop_tx, handle)
}

fn show_history(args: &HistoryArgs) -> Result<()> {
    let config = BatchConfig::from_env();
    let log = HistoryLog::load(&args.history, config.history_limit)?;
    let keys: Vec<String> = match &args.workflow_id {
        Some(id) => vec![id.clone()],
        None => log.keys().map(ToOwned::to_owned).collect(),
    };
    for key in keys {
        println!("{key}");
        for entry in log.entries(&key) {
            println!(
                "  {} {} rows, {} ok, {} failed ({})",
                entry.at.to_rfc3339(),
                entry.rows,
                entry.ok_count,
                entry.fail_count,
                entry.run_id
            );
        }
    }
    Ok(())
}
