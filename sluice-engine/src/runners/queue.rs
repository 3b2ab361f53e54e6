// Queue Executor
// Submits command steps to an SGE or Slurm batch queue and waits for them

use crate::config::{QueueKind, QueueSettings};
use crate::runners::shell::open_log;
use crate::runners::{RunnerError, StepExecutor, StepOutput, StepRequest};

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

/// Submits each step as a blocking batch job (`qsub -sync y` / `sbatch --wait`)
#[derive(Debug, Clone)]
pub struct QueueExecutor {
    settings: QueueSettings,
    program: PathBuf,
}

impl QueueExecutor {
    pub fn new(settings: QueueSettings) -> Result<Self, RunnerError> {
        let name = settings.submit_program().to_string();
        let program = which::which(&name).map_err(|source| RunnerError::SubmitNotFound {
            program: name,
            source,
        })?;
        Ok(Self { settings, program })
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Script file a step is written to, next to the item log
    pub fn script_path(log_path: &Path, step_index: usize) -> PathBuf {
        log_path.with_extension(format!("step{}.sh", step_index))
    }

    /// Submission arguments with resource hints translated to queue directives
    pub fn submission_args(&self, request: &StepRequest<'_>, script: &Path) -> Vec<String> {
        let name = job_name(request.job_name, request.step_index);
        let resources = request.resources;
        let mut args = Vec::new();

        match self.settings.kind {
            QueueKind::Sge => {
                args.extend(["-sync", "y", "-V", "-cwd", "-j", "y"].map(String::from));
                args.push("-o".to_string());
                args.push(request.log_path.display().to_string());
                args.push("-N".to_string());
                args.push(name);
                if let Some(queue) = &self.settings.queue {
                    args.push("-q".to_string());
                    args.push(queue.clone());
                }
                if resources.threads > 1 {
                    args.push("-pe".to_string());
                    args.push(self.settings.parallel_environment.clone());
                    args.push(resources.threads.to_string());
                }
                if let Some(memory) = &resources.memory {
                    args.push("-l".to_string());
                    args.push(format!("{}={}", self.settings.memory_resource, memory));
                }
            }
            QueueKind::Slurm => {
                args.push("--wait".to_string());
                args.push(format!("--chdir={}", request.working_dir.display()));
                args.push(format!("--output={}", request.log_path.display()));
                args.push("--open-mode=append".to_string());
                args.push(format!("--job-name={}", name));
                if let Some(queue) = &self.settings.queue {
                    args.push(format!("--partition={}", queue));
                }
                if resources.threads > 1 {
                    args.push(format!("--cpus-per-task={}", resources.threads));
                }
                if let Some(memory) = &resources.memory {
                    args.push(format!("--mem={}", memory));
                }
            }
        }

        args.extend(self.settings.extra_options.iter().cloned());
        args.push(script.display().to_string());
        args
    }
}

#[async_trait::async_trait]
impl StepExecutor for QueueExecutor {
    async fn run_step(&self, request: &StepRequest<'_>) -> StepOutput {
        let start = Instant::now();
        let script = Self::script_path(request.log_path, request.step_index);

        let body = format!(
            "#!/bin/sh\nexport SLUICE_JOB_THREADS={}\n{}\n",
            request.resources.threads, request.command
        );
        if let Err(e) = tokio::fs::write(&script, body).await {
            return StepOutput::spawn_failed(
                format!("cannot write job script {}: {}", script.display(), e),
                start.elapsed(),
            );
        }

        // Submit-side chatter goes to the same log as the job output
        let (stdout, stderr) = match open_log(request.log_path, request.step_index, request.command)
            .await
            .and_then(|log| Ok((log.try_clone()?, log)))
        {
            Ok(pair) => pair,
            Err(e) => {
                return StepOutput::spawn_failed(
                    format!("cannot open log {}: {}", request.log_path.display(), e),
                    start.elapsed(),
                )
            }
        };

        let args = self.submission_args(request, &script);
        tracing::debug!(
            job = request.job_name,
            step = request.step_index,
            program = %self.program.display(),
            args = ?args,
            "submitting step to queue"
        );

        let status = Command::new(&self.program)
            .args(&args)
            .current_dir(request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()
            .await;

        match status {
            Ok(status) => StepOutput {
                exit_code: status.code(),
                error: None,
                duration: start.elapsed(),
            },
            Err(e) => StepOutput::spawn_failed(
                format!("failed to run '{}': {}", self.program.display(), e),
                start.elapsed(),
            ),
        }
    }

    fn name(&self) -> &'static str {
        match self.settings.kind {
            QueueKind::Sge => "sge",
            QueueKind::Slurm => "slurm",
        }
    }
}

/// Queue-safe job name: letters, digits, `.`, `_`, `-` only
fn job_name(base: &str, step_index: usize) -> String {
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.{}", cleaned, step_index)
}
