// Local Executor
// Runs command steps as local shell subprocesses

use crate::runners::{RunnerError, StepExecutor, StepOutput, StepRequest};

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Environment variable carrying the item's thread hint
pub const THREADS_ENV: &str = "SLUICE_JOB_THREADS";

/// Runs each step as `<shell> -c <command>` in the work directory
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    shell: PathBuf,
}

impl LocalExecutor {
    /// Resolve `shell` on PATH; fails early if it cannot be found
    pub fn new(shell: &str) -> Result<Self, RunnerError> {
        let path = which::which(shell).map_err(|source| RunnerError::ShellNotFound {
            shell: shell.to_string(),
            source,
        })?;
        Ok(Self { shell: path })
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }
}

#[async_trait::async_trait]
impl StepExecutor for LocalExecutor {
    async fn run_step(&self, request: &StepRequest<'_>) -> StepOutput {
        let start = Instant::now();

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

        tracing::trace!(
            job = request.job_name,
            step = request.step_index,
            command = request.command,
            "spawning local step"
        );

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c");
        cmd.arg(request.command);
        cmd.current_dir(request.working_dir);
        cmd.env(THREADS_ENV, request.resources.threads.to_string());
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::from(stdout));
        cmd.stderr(Stdio::from(stderr));

        let status = match cmd.status().await {
            Ok(status) => status,
            Err(e) => {
                return StepOutput::spawn_failed(
                    format!("failed to spawn '{}': {}", self.shell.display(), e),
                    start.elapsed(),
                )
            }
        };

        StepOutput {
            exit_code: status.code(),
            error: match status.code() {
                Some(_) => None,
                None => Some("terminated by signal".to_string()),
            },
            duration: start.elapsed(),
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Open the item log for appending and write the step header.
///
/// Returns a std handle so it can be passed to the child as stdout/stderr.
pub(crate) async fn open_log(
    path: &Path,
    step_index: usize,
    command: &str,
) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let header = format!(
        "## step {} [{}]: {}\n",
        step_index,
        chrono::Utc::now().to_rfc3339(),
        command
    );
    file.write_all(header.as_bytes()).await?;
    file.flush().await?;
    Ok(file.into_std().await)
}

/// Last `count` lines of a log file, for failure diagnostics
pub async fn log_tail(path: &Path, count: usize) -> String {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(_) => return String::new(),
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::ResourceHints;
    use tempfile::TempDir;

    fn request<'a>(
        command: &'a str,
        dir: &'a Path,
        log: &'a Path,
        resources: &'a ResourceHints,
    ) -> StepRequest<'a> {
        StepRequest {
            command,
            working_dir: dir,
            log_path: log,
            resources,
            job_name: "test",
            step_index: 0,
        }
    }

    #[tokio::test]
    async fn test_successful_step() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("logs/t/a.log");
        let resources = ResourceHints::default();
        let executor = LocalExecutor::new("sh").unwrap();

        let output = executor
            .run_step(&request("echo hello > out.txt", temp.path(), &log, &resources))
            .await;

        assert!(output.success());
        assert_eq!(
            std::fs::read_to_string(temp.path().join("out.txt")).unwrap(),
            "hello\n"
        );
    }

    #[tokio::test]
    async fn test_failing_step_logs_output() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("a.log");
        let resources = ResourceHints::default();
        let executor = LocalExecutor::new("sh").unwrap();

        let output = executor
            .run_step(&request("echo boom >&2; exit 3", temp.path(), &log, &resources))
            .await;

        assert!(!output.success());
        assert_eq!(output.exit_code, Some(3));
        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("## step 0"));
        assert!(content.contains("boom"));
    }

    #[tokio::test]
    async fn test_thread_hint_in_environment() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("a.log");
        let resources = ResourceHints {
            threads: 6,
            ..Default::default()
        };
        let executor = LocalExecutor::new("sh").unwrap();

        let output = executor
            .run_step(&request(
                "echo $SLUICE_JOB_THREADS > threads.txt",
                temp.path(),
                &log,
                &resources,
            ))
            .await;

        assert!(output.success());
        assert_eq!(
            std::fs::read_to_string(temp.path().join("threads.txt")).unwrap(),
            "6\n"
        );
    }

    #[test]
    fn test_missing_shell() {
        assert!(matches!(
            LocalExecutor::new("definitely-not-a-shell-xyz"),
            Err(RunnerError::ShellNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_log_appends_step_headers() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("logs/map/a.log");

        drop(open_log(&log, 0, "echo one").await.unwrap());
        drop(open_log(&log, 1, "echo two").await.unwrap());

        let content = std::fs::read_to_string(&log).unwrap();
        let headers: Vec<&str> = content.lines().filter(|l| l.starts_with("## step")).collect();
        assert_eq!(headers.len(), 2);
        assert!(headers[0].ends_with(": echo one"));
        assert!(headers[1].starts_with("## step 1 ["));
    }

    #[tokio::test]
    async fn test_log_tail() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("a.log");
        let body: Vec<String> = (0..30).map(|i| format!("line {}", i)).collect();
        std::fs::write(&log, body.join("\n")).unwrap();

        let tail = log_tail(&log, 20).await;
        assert_eq!(tail.lines().count(), 20);
        assert!(tail.starts_with("line 10"));
        assert_eq!(log_tail(&temp.path().join("missing.log"), 5).await, "");
    }
}
