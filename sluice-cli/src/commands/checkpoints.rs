use super::PipelineArgs;
use crate::output;

use clap::{Args, Subcommand};
use color_eyre::eyre::{Context, Result};
use sluice_engine::{CheckpointLedger, WorkItemId};

#[derive(Args, Debug)]
pub struct CheckpointsArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    #[command(subcommand)]
    pub action: CheckpointAction,
}

#[derive(Subcommand, Debug)]
pub enum CheckpointAction {
    /// List items with a partially completed job
    List,
    /// Remove checkpoint records so items restart from their first step
    Clear {
        /// Only clear this item
        #[arg(value_name = "ITEM")]
        item: Option<String>,
    },
}

pub async fn execute(args: CheckpointsArgs) -> Result<()> {
    let loaded = args.pipeline.load()?;
    let dir = loaded.config.checkpoint_dir();
    let ledger = CheckpointLedger::open(&dir)
        .wrap_err_with(|| format!("Failed to open checkpoints in {}", dir.display()))?;

    match args.action {
        CheckpointAction::List => {
            let records = ledger.list()?;
            if records.is_empty() {
                output::info("No checkpoints recorded");
                return Ok(());
            }
            output::header(&format!("{} checkpointed items", records.len()));
            for record in records {
                println!(
                    "{}\t{}\tnext step {}\t{}",
                    record.task,
                    record.item,
                    record.resume_point(),
                    record.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        CheckpointAction::Clear { item: Some(item) } => {
            let id = WorkItemId::from(item.as_str());
            if ledger.clear(&id).await? {
                output::check(&format!("Cleared checkpoint for {}", item));
            } else {
                output::warning(&format!("No checkpoint recorded for {}", item));
            }
        }
        CheckpointAction::Clear { item: None } => {
            let removed = ledger.clear_all()?;
            output::check(&format!("Cleared {} checkpoints", removed));
        }
    }
    Ok(())
}
