// Runners Module
// Step executors (local subprocess, batch queue) and the per-item job runner

pub mod job;
pub mod queue;
pub mod shell;

// Re-export key types
pub use job::{JobRunner, Outcome};
pub use queue::QueueExecutor;
pub use shell::LocalExecutor;

use crate::config::{EngineConfig, RunMode};
use crate::declaration::ResourceHints;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("shell '{shell}' not found: {source}")]
    ShellNotFound { shell: String, source: which::Error },

    #[error("queue submit command '{program}' not found: {source}")]
    SubmitNotFound {
        program: String,
        source: which::Error,
    },
}

/// One command step handed to an executor
#[derive(Debug, Clone, Copy)]
pub struct StepRequest<'a> {
    /// Fully resolved command text
    pub command: &'a str,
    pub working_dir: &'a Path,
    /// File that stdout and stderr are appended to
    pub log_path: &'a Path,
    pub resources: &'a ResourceHints,
    /// Name used for queue submissions
    pub job_name: &'a str,
    pub step_index: usize,
}

/// What the engine observes of a finished step: its exit status
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    pub exit_code: Option<i32>,
    /// Set when the step could not be started or awaited
    pub error: Option<String>,
    pub duration: Duration,
}

impl StepOutput {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }

    pub(crate) fn spawn_failed(message: String, duration: Duration) -> Self {
        Self {
            exit_code: None,
            error: Some(message),
            duration,
        }
    }
}

/// Uniform "run and await" call over local and remote execution
#[async_trait::async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run one step to completion. Blocks only the calling task.
    async fn run_step(&self, request: &StepRequest<'_>) -> StepOutput;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Executor for the configured run mode
pub fn executor_for(config: &EngineConfig) -> Result<Arc<dyn StepExecutor>, RunnerError> {
    match config.settings.mode {
        RunMode::Local => Ok(Arc::new(LocalExecutor::new(&config.settings.shell)?)),
        RunMode::Queue => Ok(Arc::new(QueueExecutor::new(config.settings.queue.clone())?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_output_success() {
        let ok = StepOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        assert!(ok.success());

        let failed = StepOutput {
            exit_code: Some(2),
            ..Default::default()
        };
        assert!(!failed.success());

        let spawn = StepOutput::spawn_failed("no such file".to_string(), Duration::ZERO);
        assert!(!spawn.success());
    }
}
