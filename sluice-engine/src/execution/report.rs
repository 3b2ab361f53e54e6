// Run Report
// Per-item outcome of a run, rendered for terminals or serialized as JSON

use crate::error::{EngineError, EngineResult};
use crate::execution::freshness::Staleness;
use crate::execution::work_item::{Failure, WorkItem, WorkItemId, WorkState};
use crate::pattern::normalize_path_text;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Output format for run reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// Human-readable summary grouped by task
    #[default]
    Terminal,
    Json,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Terminal => write!(f, "terminal"),
            ReportFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "terminal" | "text" | "console" => Ok(ReportFormat::Terminal),
            "json" => Ok(ReportFormat::Json),
            _ => Err(format!(
                "Unknown report format '{}'. Valid formats: terminal, json",
                s
            )),
        }
    }
}

/// What the run did with an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    /// Fresh; skipped
    UpToDate,
    /// Ran from the first step
    Executed,
    /// Ran from a checkpointed step
    Resumed,
    /// Single input copied to the output
    Cloned,
    /// Stale in a dry run
    WouldRun,
    /// Fan-out member found on disk after its placeholder
    Discovered,
    /// Failed before running
    NotRun,
}

impl fmt::Display for ItemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemAction::UpToDate => "up to date",
            ItemAction::Executed => "executed",
            ItemAction::Resumed => "resumed",
            ItemAction::Cloned => "cloned",
            ItemAction::WouldRun => "would run",
            ItemAction::Discovered => "discovered",
            ItemAction::NotRun => "not run",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub id: WorkItemId,
    pub task: String,
    pub state: WorkState,
    pub action: ItemAction,
    pub elapsed_secs: f64,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staleness: Option<Staleness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl ItemReport {
    pub fn from_item(item: &WorkItem, action: ItemAction, elapsed: Duration) -> Self {
        Self {
            id: item.id.clone(),
            task: item.task.name.clone(),
            state: item.state,
            action,
            elapsed_secs: elapsed.as_secs_f64(),
            inputs: item.inputs.iter().map(|p| normalize_path_text(p)).collect(),
            outputs: item.outputs.iter().map(|p| normalize_path_text(p)).collect(),
            staleness: item.staleness.clone().filter(Staleness::is_stale),
            failure: item.failure.clone(),
        }
    }
}

/// Outcome of one run, one entry per work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub dry_run: bool,
    pub items: Vec<ItemReport>,
}

impl RunReport {
    pub fn new(pipeline: impl Into<String>, started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            run_id: started_at.format("%Y%m%dT%H%M%S%.3fZ").to_string(),
            pipeline: pipeline.into(),
            started_at,
            finished_at: started_at,
            elapsed_secs: 0.0,
            dry_run,
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, item: ItemReport) {
        self.items.push(item);
    }

    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = finished_at;
        self.elapsed_secs = (finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
    }

    /// True iff no item failed
    pub fn success(&self) -> bool {
        self.items.iter().all(|i| i.state != WorkState::Failed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ItemReport> {
        self.items.iter().filter(|i| i.state == WorkState::Failed)
    }

    /// Items that ran a job in this run
    pub fn executed_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| {
                matches!(
                    i.action,
                    ItemAction::Executed | ItemAction::Resumed | ItemAction::Cloned
                )
            })
            .count()
    }

    pub fn find(&self, id: &str) -> Option<&ItemReport> {
        self.items.iter().find(|i| i.id.as_str() == id)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub async fn write_json(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::io(parent, e))?;
        }
        tokio::fs::write(path, self.to_json()?)
            .await
            .map_err(|e| EngineError::io(path, e))
    }

    pub async fn read_json(path: &Path) -> EngineResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn render(&self, format: ReportFormat) -> EngineResult<String> {
        match format {
            ReportFormat::Terminal => Ok(self.to_terminal()),
            ReportFormat::Json => self.to_json(),
        }
    }

    /// Summary grouped by task, failures with step and diagnostic
    pub fn to_terminal(&self) -> String {
        let mut out = String::new();
        let title = if self.dry_run { "Dry run" } else { "Run" };
        out.push_str(&format!("\n{}: {} ({})\n", title, self.pipeline, self.run_id));
        out.push_str(&"=".repeat(60));
        out.push('\n');

        let mut by_task: IndexMap<&str, Vec<&ItemReport>> = IndexMap::new();
        for item in &self.items {
            by_task.entry(item.task.as_str()).or_default().push(item);
        }

        for (task, items) in &by_task {
            let failed = items.iter().filter(|i| i.state == WorkState::Failed).count();
            out.push_str(&format!("{} ({} items, {} failed)\n", task, items.len(), failed));

            for item in items {
                let symbol = match (item.state, item.action) {
                    (WorkState::Failed, _) => "x",
                    (_, ItemAction::UpToDate) => "=",
                    (_, ItemAction::WouldRun) => "?",
                    _ => "+",
                };
                out.push_str(&format!(
                    "  [{}] {} ({:.2}s) {}\n",
                    symbol, item.action, item.elapsed_secs, item.id
                ));
                if let Some(reason) = &item.staleness {
                    if self.dry_run {
                        out.push_str(&format!("      {}\n", reason));
                    }
                }
                if let Some(failure) = &item.failure {
                    let step = failure
                        .step_index
                        .map(|s| format!(" at step {}", s))
                        .unwrap_or_default();
                    out.push_str(&format!("      {}{}:\n", failure.kind, step));
                    for line in failure.diagnostic.lines() {
                        out.push_str(&format!("        {}\n", line));
                    }
                }
            }
        }

        out.push_str(&"-".repeat(60));
        out.push('\n');
        let failed = self.failed().count();
        out.push_str(&format!(
            "{} items, {} executed, {} failed in {:.2}s\n",
            self.items.len(),
            self.executed_count(),
            failed,
            self.elapsed_secs
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::TaskBuilder;
    use crate::execution::work_item::FailureKind;
    use crate::pattern::Fields;

    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn item(output: &str) -> WorkItem {
        let task = Arc::new(
            TaskBuilder::transform("map")
                .input("{s}.fq")
                .output("{s}.bam")
                .build()
                .unwrap(),
        );
        WorkItem::new(
            task,
            vec![PathBuf::from("a.fq")],
            vec![PathBuf::from(output)],
            Fields::new(),
        )
    }

    fn sample_report() -> RunReport {
        let mut report = RunReport::new("iclip", Utc::now(), false);

        let mut done = item("a.bam");
        done.state = WorkState::Done;
        report.push(ItemReport::from_item(
            &done,
            ItemAction::Executed,
            Duration::from_millis(1500),
        ));

        let mut failed = item("b.bam");
        failed.fail(Failure::new(FailureKind::StepExecution, "exit status 2\nsegfault").at_step(1));
        report.push(ItemReport::from_item(&failed, ItemAction::Executed, Duration::ZERO));

        report.finish(Utc::now());
        report
    }

    #[test]
    fn test_success_and_counts() {
        let report = sample_report();
        assert!(!report.success());
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.executed_count(), 2);

        let failed = report.find("b.bam").unwrap();
        assert_eq!(failed.failure.as_ref().unwrap().step_index, Some(1));
    }

    #[test]
    fn test_terminal_output() {
        let out = sample_report().to_terminal();
        assert!(out.contains("map (2 items, 1 failed)"));
        assert!(out.contains("[x] executed"));
        assert!(out.contains("step failed at step 1"));
        assert!(out.contains("segfault"));
    }

    #[tokio::test]
    async fn test_json_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state/last-run.json");
        let report = sample_report();

        report.write_json(&path).await.unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["pipeline"], "iclip");
        assert_eq!(value["items"][1]["failure"]["kind"], "step_execution");
        assert_eq!(value["items"][1]["state"], "failed");

        let loaded = RunReport::read_json(&path).await.unwrap();
        assert_eq!(loaded.items.len(), 2);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!("text".parse::<ReportFormat>().unwrap(), ReportFormat::Terminal);
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
