// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fetch;
pub mod logging;
pub mod outcome;
pub mod pipeline;
pub mod storage;
pub mod types;

use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::{CancelHandle, Report, Scheduler};
use crate::exec::ProcessRunner;
use crate::fetch::GitFetcher;
use crate::pipeline::GradingPipeline;
use crate::types::RepositoryReference;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and the `--student` filter
/// - git fetcher, process runner and grading pipeline
/// - the scheduler
/// - Ctrl-C handling (global cancellation)
///
/// Returns `None` for `--dry-run`.
pub async fn run(args: CliArgs) -> Result<Option<Report>> {
    let cfg = load_and_validate(&args.config)?;
    let refs = select_references(&cfg, &args.students)?;
    let concurrency = args.concurrency.unwrap_or(cfg.config.concurrency);

    if args.dry_run {
        print_dry_run(&cfg, &refs, concurrency);
        return Ok(None);
    }

    let cancel = CancelHandle::new();
    let signal = cancel.signal();

    // Ctrl-C -> cooperative cancellation of the whole run.
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        warn!("interrupt received; cancelling remaining work");
        cancel.cancel();
    });

    let scheduler = build_scheduler(&cfg, concurrency);
    let report = scheduler.run(refs, &cfg.grading_task(), signal).await?;
    Ok(Some(report))
}

/// Production scheduler: git over the network, graders as child processes.
pub fn build_scheduler(cfg: &ConfigFile, concurrency: usize) -> Scheduler<GitFetcher, ProcessRunner> {
    let fetcher = GitFetcher::new(Duration::from_secs(cfg.config.fetch_timeout_seconds));
    let runner = ProcessRunner::new(cfg.config.cancel_grace());
    let pipeline = GradingPipeline::new(fetcher, runner, cfg.retry_policy());
    Scheduler::new(pipeline, concurrency, cfg.config.work_dir.clone())
}

/// Apply the `--student` filter. Unknown ids are an error rather than a
/// silently empty run.
pub fn select_references(cfg: &ConfigFile, students: &[String]) -> Result<Vec<RepositoryReference>> {
    let all = cfg.references();
    if students.is_empty() {
        return Ok(all);
    }

    for wanted in students {
        if !all.iter().any(|r| &r.student_id == wanted) {
            bail!("student '{wanted}' is not listed in any [[repo]] entry");
        }
    }
    let selected: Vec<_> = all
        .into_iter()
        .filter(|r| students.contains(&r.student_id))
        .collect();
    info!(selected = selected.len(), "restricted run to requested students");
    Ok(selected)
}

/// Simple dry-run output: print the task, limits and repositories.
fn print_dry_run(cfg: &ConfigFile, refs: &[RepositoryReference], concurrency: usize) {
    let task = cfg.grading_task();

    println!("prograde dry-run");
    println!("  config.concurrency = {concurrency}");
    println!("  config.work_dir = {}", cfg.config.work_dir.display());
    println!(
        "  retry = {} retries, backoff {}ms..{}ms",
        cfg.retry.max_retries, cfg.retry.backoff_base_ms, cfg.retry.backoff_max_ms
    );
    println!();

    println!("task:");
    println!("  entry_point: {}", task.entry_point);
    if !task.args.is_empty() {
        println!("  args: {:?}", task.args);
    }
    println!("  timeout_seconds: {}", task.timeout_seconds);
    if let Some(cpu) = task.limits.cpu_seconds {
        println!("  limits.cpu_seconds: {cpu}");
    }
    if let Some(mem) = task.limits.memory_bytes {
        println!("  limits.memory_bytes: {mem}");
    }
    println!("  limits.output_bytes: {}", task.limits.output_bytes);
    println!("  payload.format: {:?}", task.payload.format);
    println!();

    println!("repositories ({}):", refs.len());
    for reference in refs {
        println!("  - {}", reference.student_id);
        println!("      location: {}", reference.location);
        if let Some(ref rev) = reference.revision {
            println!("      revision: {rev}");
        }
    }

    debug!("dry-run complete (no fetching)");
}
