// Job Runner
// Executes one work item: clone or resolved command steps with checkpointing

use crate::checkpoint::{command_fingerprint, CheckpointLedger};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::work_item::{Failure, FailureKind, JobKind, WorkItem, WorkItemId};
use crate::params::{resolve, ParameterScope};
use crate::runners::shell::log_tail;
use crate::runners::{executor_for, StepExecutor, StepOutput, StepRequest};

use sha2::{Digest, Sha256};

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lines of step log quoted in a failure diagnostic
const DIAGNOSTIC_LINES: usize = 20;

/// Result of executing one work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed {
        /// First step that ran in this attempt
        resumed_from: usize,
        cloned: bool,
    },
    Failed(Failure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }
}

/// Runs work items through a step executor, consulting the checkpoint ledger
pub struct JobRunner {
    executor: Arc<dyn StepExecutor>,
    ledger: Arc<CheckpointLedger>,
    config: Arc<EngineConfig>,
    event_tx: Option<ProgressSender>,
}

impl JobRunner {
    pub fn new(
        executor: Arc<dyn StepExecutor>,
        ledger: Arc<CheckpointLedger>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            executor,
            ledger,
            config,
            event_tx: None,
        }
    }

    /// Runner for the configured run mode with the ledger under the state directory
    pub fn from_config(config: Arc<EngineConfig>) -> EngineResult<Self> {
        let executor = executor_for(&config)?;
        let ledger = Arc::new(CheckpointLedger::open(config.checkpoint_dir())?);
        Ok(Self::new(executor, ledger, config))
    }

    /// Set a progress channel for step events
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn ledger(&self) -> &Arc<CheckpointLedger> {
        &self.ledger
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub fn executor_name(&self) -> &'static str {
        self.executor.name()
    }

    /// Where the item's step output is appended
    pub fn log_path(&self, item: &WorkItem) -> PathBuf {
        self.config
            .log_dir()
            .join(&item.task.name)
            .join(format!("{}.log", log_key(&item.id)))
    }

    /// Expand every step of the item's command template.
    ///
    /// All steps are resolved before anything is spawned.
    pub fn resolve_steps(&self, item: &WorkItem) -> Result<Vec<String>, Failure> {
        let fields = item.parameter_fields();
        let scope = ParameterScope::new(&item.task.params, &self.config.params);

        item.task
            .commands
            .steps()
            .iter()
            .enumerate()
            .map(|(index, step)| {
                resolve(step, &fields, &scope).map_err(|e| {
                    Failure::new(FailureKind::UnresolvedParameter, e.to_string()).at_step(index)
                })
            })
            .collect()
    }

    pub async fn execute(&self, item: &WorkItem) -> Outcome {
        match item.job {
            JobKind::Clone => self.clone_single_input(item).await,
            JobKind::Commands => self.run_commands(item).await,
        }
    }

    async fn run_commands(&self, item: &WorkItem) -> Outcome {
        let task = item.task.name.as_str();

        let steps = match self.resolve_steps(item) {
            Ok(steps) => steps,
            Err(failure) => return Outcome::Failed(failure),
        };

        let fingerprint = command_fingerprint(&steps);
        let resume_from = match self.ledger.resume_point(&item.id, &fingerprint).await {
            Ok(point) => point,
            Err(e) => return Outcome::Failed(Failure::new(FailureKind::Checkpoint, e.to_string())),
        };

        if let Err(e) = self.prepare_output_dirs(item).await {
            return Outcome::Failed(Failure::new(FailureKind::Io, e));
        }

        let log_path = self.log_path(item);
        let job_name = format!("{}-{}", task, log_key(&item.id));

        self.event_tx.send_event(ExecutionEvent::item_started(
            task,
            item.id.clone(),
            steps.len(),
            resume_from,
        ));
        if resume_from > 0 {
            tracing::info!(task, item = %item.id, step = resume_from, "resuming after checkpoint");
        }

        for (index, command) in steps.iter().enumerate().skip(resume_from) {
            tracing::trace!(task, item = %item.id, step = index, command = %command, "running step");
            self.event_tx.send_event(ExecutionEvent::step_started(
                task,
                item.id.clone(),
                index,
                command.clone(),
            ));

            let request = StepRequest {
                command,
                working_dir: &self.config.work_dir,
                log_path: &log_path,
                resources: &item.task.resources,
                job_name: &job_name,
                step_index: index,
            };
            let output = self.executor.run_step(&request).await;

            self.event_tx.send_event(ExecutionEvent::step_completed(
                task,
                item.id.clone(),
                index,
                output.exit_code,
                output.duration,
            ));

            if !output.success() {
                let failure = step_failure(&output, index, &log_path).await;
                tracing::warn!(task, item = %item.id, step = index, "step failed");
                return Outcome::Failed(failure);
            }

            if let Err(e) = self
                .ledger
                .record(&item.id, task, index, &fingerprint)
                .await
            {
                return Outcome::Failed(
                    Failure::new(FailureKind::Checkpoint, e.to_string()).at_step(index),
                );
            }
        }

        if let Err(e) = self.ledger.clear(&item.id).await {
            tracing::warn!(task, item = %item.id, error = %e, "could not clear checkpoint");
        }

        Outcome::Completed {
            resumed_from: resume_from.min(steps.len()),
            cloned: false,
        }
    }

    /// Copy the only input (and its companion sidecars) to the output
    async fn clone_single_input(&self, item: &WorkItem) -> Outcome {
        let (Some(input), Some(output)) = (item.inputs.first(), item.outputs.first()) else {
            return Outcome::Failed(Failure::new(
                FailureKind::Io,
                "clone job needs exactly one input and one output",
            ));
        };

        if let Err(e) = self.prepare_output_dirs(item).await {
            return Outcome::Failed(Failure::new(FailureKind::Io, e));
        }

        let root = &self.config.work_dir;
        let source = root.join(input);
        let dest = root.join(output);
        if let Err(e) = tokio::fs::copy(&source, &dest).await {
            return Outcome::Failed(Failure::new(
                FailureKind::Io,
                format!("cannot copy {} to {}: {}", source.display(), dest.display(), e),
            ));
        }

        for suffix in &item.task.companions {
            let from = with_suffix(&source, suffix);
            if !from.exists() {
                tracing::debug!(task = %item.task.name, path = %from.display(), "no companion to clone");
                continue;
            }
            let to = with_suffix(&dest, suffix);
            if let Err(e) = tokio::fs::copy(&from, &to).await {
                return Outcome::Failed(Failure::new(
                    FailureKind::Io,
                    format!("cannot copy {} to {}: {}", from.display(), to.display(), e),
                ));
            }
        }

        tracing::debug!(task = %item.task.name, item = %item.id, "cloned single input");
        Outcome::Completed {
            resumed_from: 0,
            cloned: true,
        }
    }

    async fn prepare_output_dirs(&self, item: &WorkItem) -> Result<(), String> {
        for output in &item.outputs {
            if let Some(parent) = self.config.work_dir.join(output).parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
            }
        }
        Ok(())
    }
}

async fn step_failure(output: &StepOutput, index: usize, log_path: &Path) -> Failure {
    let status = match (&output.error, output.exit_code) {
        (Some(error), _) => error.clone(),
        (None, Some(code)) => format!("exit status {}", code),
        (None, None) => "no exit status".to_string(),
    };
    let tail = log_tail(log_path, DIAGNOSTIC_LINES).await;
    let diagnostic = if tail.is_empty() {
        status
    } else {
        format!("{}\n{}", status, tail)
    };
    Failure::new(FailureKind::StepExecution, diagnostic).at_step(index)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut text = path.as_os_str().to_os_string();
    text.push(suffix);
    PathBuf::from(text)
}

/// File-name-safe key for an item: readable prefix plus a short digest
pub fn log_key(id: &WorkItemId) -> String {
    let readable: String = id
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(80)
        .collect();
    let digest = Sha256::digest(id.as_str().as_bytes());
    let short: String = format!("{:x}", digest).chars().take(8).collect();
    format!("{}-{}", readable, short)
}
