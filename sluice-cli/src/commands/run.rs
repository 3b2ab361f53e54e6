use super::PipelineArgs;
use crate::output::{self, ItemMark};

use clap::Args;
use color_eyre::eyre::{Context, Result};
use sluice_engine::execution::{LogLevel, ProgressReceiver};
use sluice_engine::{
    progress_channel, ExecutionEvent, JobRunner, ReportFormat, RunOptions, RunReport, Scheduler,
    TaskGraph,
};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Only run these tasks and what they depend on
    #[arg(value_name = "TARGET")]
    pub targets: Vec<String>,

    /// Treat every item of this task as stale (repeatable)
    #[arg(short = 'f', long = "force", value_name = "TASK")]
    pub force: Vec<String>,

    /// Override the global concurrency limit
    #[arg(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,

    /// Also write the JSON run report to this file
    #[arg(long = "report", value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Format of the summary printed at the end
    #[arg(long = "format", default_value = "terminal")]
    pub format: ReportFormat,

    /// Show every command step as it runs
    #[arg(long)]
    pub steps: bool,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let loaded = args.pipeline.load()?;
    let pipeline = loaded.pipeline;

    let mut config = (*loaded.config).clone();
    if let Some(jobs) = args.jobs {
        if jobs == 0 {
            color_eyre::eyre::bail!("--jobs must be at least 1");
        }
        tracing::debug!(jobs, "overriding max_jobs");
        config.settings.max_jobs = jobs;
    }
    let config = Arc::new(config);

    let graph = match TaskGraph::build(&pipeline.tasks) {
        Ok(graph) => graph,
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    };

    output::header(&format!(
        "Running pipeline: {} ({} tasks, max {} jobs, {} mode)",
        pipeline.name,
        graph.len(),
        config.settings.max_jobs,
        format!("{:?}", config.settings.mode).to_lowercase()
    ));

    let (tx, rx) = progress_channel();
    let runner = JobRunner::from_config(config.clone())?.with_progress(tx.clone());
    let options = RunOptions {
        dry_run: false,
        force: args.force.iter().cloned().collect::<HashSet<_>>(),
        targets: args.targets.clone(),
    };
    let scheduler = Scheduler::new(config.clone(), Arc::new(runner))
        .with_options(options)
        .with_name(pipeline.name.clone())
        .with_progress(tx);

    let handle = tokio::spawn(async move { scheduler.run(&graph).await });
    render_events(rx, args.steps, false).await;

    let report = match handle.await.wrap_err("Scheduler task panicked")? {
        Ok(report) => report,
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    };

    if let Some(path) = &args.report {
        report
            .write_json(path)
            .await
            .wrap_err_with(|| format!("Failed to write report to {}", path.display()))?;
        output::info(&format!("Report written to {}", path.display()));
    }

    finish(&report, args.format)
}

/// Print the summary and exit with status 2 if any item failed
pub(crate) fn finish(report: &RunReport, format: ReportFormat) -> Result<()> {
    let rendered = report.render(format)?;
    match format {
        ReportFormat::Json => println!("{}", rendered),
        ReportFormat::Terminal => eprint!("{}", rendered),
    }

    if !report.success() {
        std::process::exit(2);
    }
    Ok(())
}

/// Print progress until every sender is dropped
pub(crate) async fn render_events(mut rx: ProgressReceiver, show_steps: bool, show_stale: bool) {
    while let Some(event) = rx.recv().await {
        match event {
            ExecutionEvent::RunStarted {
                total_tasks,
                dry_run,
                ..
            } => {
                let mode = if dry_run { "dry run" } else { "run" };
                output::note(&format!("Starting {} over {} tasks", mode, total_tasks));
            }
            ExecutionEvent::LevelStarted { level, tasks } => {
                output::level_header(level, &tasks);
            }
            ExecutionEvent::TaskMaterialized { task, items, stale } => {
                output::task_status(&task, &format!("{} items, {} stale", items, stale));
            }
            ExecutionEvent::ItemSkipped { .. } => {}
            ExecutionEvent::ItemStale { task, item, reason } => {
                if !show_stale {
                    continue;
                }
                output::stale(&task, item.as_str(), &reason);
            }
            ExecutionEvent::ItemStarted {
                task,
                item,
                total_steps,
                resume_from,
            } => {
                let detail = if resume_from > 0 {
                    format!("{} (resuming at step {} of {})", item, resume_from, total_steps)
                } else {
                    format!("{} ({} steps)", item, total_steps)
                };
                output::item(ItemMark::Started, &task, &detail);
            }
            ExecutionEvent::StepStarted {
                step_index,
                command,
                ..
            } => {
                if show_steps {
                    output::note(&format!("        [{}] {}", step_index, command));
                }
            }
            ExecutionEvent::StepCompleted {
                step_index,
                exit_code,
                duration,
                ..
            } => {
                if show_steps {
                    let code = exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "signal".to_string());
                    output::note(&format!(
                        "        [{}] exit {} in {:.2}s",
                        step_index,
                        code,
                        duration.as_secs_f64()
                    ));
                }
            }
            ExecutionEvent::ItemCompleted {
                task,
                item,
                duration,
                cloned,
            } => {
                let how = if cloned { "cloned" } else { "done" };
                output::item(
                    ItemMark::Done,
                    &task,
                    &format!("{} ({} in {:.2}s)", item, how, duration.as_secs_f64()),
                );
            }
            ExecutionEvent::ItemFailed {
                task,
                item,
                failure,
            } => {
                let step = failure
                    .step_index
                    .map(|s| format!(" at step {}", s))
                    .unwrap_or_default();
                output::item(
                    ItemMark::Failed,
                    &task,
                    &format!("{} ({}{})", item, failure.kind, step),
                );
                output::diagnostic(&failure.diagnostic);
            }
            ExecutionEvent::FanOutExpanded {
                task,
                placeholder,
                members,
            } => {
                output::task_status(
                    &task,
                    &format!("{} expanded into {} items", placeholder, members),
                );
            }
            ExecutionEvent::Log {
                level,
                message,
                task,
            } => {
                let text = match task {
                    Some(task) => format!("[{}] {}", task, message),
                    None => message,
                };
                match level {
                    LogLevel::Error => output::error(&text),
                    LogLevel::Warning => output::warning(&text),
                    LogLevel::Info => output::info(&text),
                    LogLevel::Debug => output::note(&text),
                }
            }
            ExecutionEvent::RunCompleted {
                success,
                duration,
                executed,
                failed,
                ..
            } => {
                let summary = format!(
                    "{} executed, {} failed in {:.2}s",
                    executed,
                    failed,
                    duration.as_secs_f64()
                );
                output::summary(success, &summary);
            }
        }
    }
}
