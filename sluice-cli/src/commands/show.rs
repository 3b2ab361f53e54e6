use super::run::{finish, render_events};
use super::PipelineArgs;
use crate::output;

use clap::Args;
use color_eyre::eyre::{Context, Result};
use sluice_engine::{progress_channel, JobRunner, ReportFormat, RunOptions, Scheduler, TaskGraph};

use std::sync::Arc;

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Only consider these tasks and what they depend on
    #[arg(value_name = "TARGET")]
    pub targets: Vec<String>,

    /// Treat every item of this task as stale (repeatable)
    #[arg(short = 'f', long = "force", value_name = "TASK")]
    pub force: Vec<String>,

    /// Format of the summary printed at the end
    #[arg(long = "format", default_value = "terminal")]
    pub format: ReportFormat,
}

/// Dry run: report stale items and why, execute nothing
pub async fn execute(args: ShowArgs) -> Result<()> {
    let loaded = args.pipeline.load()?;
    let pipeline = loaded.pipeline;
    let config = loaded.config;

    let graph = match TaskGraph::build(&pipeline.tasks) {
        Ok(graph) => graph,
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    };

    output::header(&format!("Checking pipeline: {}", pipeline.name));

    let (tx, rx) = progress_channel();
    let runner = JobRunner::from_config(config.clone())?;
    let options = RunOptions {
        dry_run: true,
        force: args.force.iter().cloned().collect(),
        targets: args.targets.clone(),
    };
    let scheduler = Scheduler::new(config, Arc::new(runner))
        .with_options(options)
        .with_name(pipeline.name.clone())
        .with_progress(tx);

    let handle = tokio::spawn(async move { scheduler.run(&graph).await });
    render_events(rx, false, true).await;

    let report = match handle.await.wrap_err("Scheduler task panicked")? {
        Ok(report) => report,
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    };

    finish(&report, args.format)
}
