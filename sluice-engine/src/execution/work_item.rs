// Work Items
// Concrete, materialized instances of a task and their lifecycle

use crate::declaration::TaskDeclaration;
use crate::execution::freshness::Staleness;
use crate::pattern::{normalize_path_text, Fields, Pattern};

use serde::{Deserialize, Serialize};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Identity of a work item, derived from its outputs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(String);

impl WorkItemId {
    pub fn from_outputs(outputs: &[PathBuf]) -> Self {
        let parts: Vec<String> = outputs.iter().map(|p| normalize_path_text(p)).collect();
        Self(parts.join(" "))
    }

    /// Identity of a fan-out placeholder: its output pattern
    pub fn fan_out(pattern: &Pattern) -> Self {
        Self(pattern.source().to_string())
    }

    /// Identity of an item that could not be materialized
    pub fn blocked(task: &str, cause: &str) -> Self {
        Self(format!("{} <- {}", task, cause))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkState {
    Pending,
    Stale,
    Running,
    Done,
    Failed,
}

impl WorkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkState::Done | WorkState::Failed)
    }
}

impl fmt::Display for WorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkState::Pending => "pending",
            WorkState::Stale => "stale",
            WorkState::Running => "running",
            WorkState::Done => "done",
            WorkState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An input did not conform to the declared pattern
    Pattern,
    /// A command token could not be resolved; nothing was spawned
    UnresolvedParameter,
    /// A step exited non-zero
    StepExecution,
    /// A work item this one depends on failed
    UpstreamFailed,
    /// Filesystem error while preparing or cloning
    Io,
    /// The checkpoint ledger could not be updated
    Checkpoint,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Pattern => "pattern mismatch",
            FailureKind::UnresolvedParameter => "unresolved parameter",
            FailureKind::StepExecution => "step failed",
            FailureKind::UpstreamFailed => "upstream failed",
            FailureKind::Io => "i/o error",
            FailureKind::Checkpoint => "checkpoint error",
        };
        f.write_str(name)
    }
}

/// Why a work item failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub step_index: Option<usize>,
    pub diagnostic: String,
}

impl Failure {
    pub fn new(kind: FailureKind, diagnostic: impl Into<String>) -> Self {
        Self {
            kind,
            step_index: None,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn at_step(mut self, step_index: usize) -> Self {
        self.step_index = Some(step_index);
        self
    }

    pub fn upstream(cause: &WorkItemId) -> Self {
        Self::new(
            FailureKind::UpstreamFailed,
            format!("not run: upstream work item '{}' failed", cause),
        )
    }
}

/// What the runner does for an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Run the task's command steps
    Commands,
    /// Copy the single input (and companions) to the output
    Clone,
}

/// One materialized instance of a task
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub task: Arc<TaskDeclaration>,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub fields: Fields,
    /// Product parameter tuple, exposed as `param0..paramN`
    pub params_tuple: Vec<String>,
    /// Collate group key
    pub key: Option<String>,
    /// Set on subdivide placeholders: outputs are whatever matches this after the run
    pub fan_out: Option<Pattern>,
    pub job: JobKind,
    pub state: WorkState,
    pub staleness: Option<Staleness>,
    pub failure: Option<Failure>,
}

impl WorkItem {
    pub fn new(
        task: Arc<TaskDeclaration>,
        inputs: Vec<PathBuf>,
        outputs: Vec<PathBuf>,
        fields: Fields,
    ) -> Self {
        Self {
            id: WorkItemId::from_outputs(&outputs),
            task,
            inputs,
            outputs,
            fields,
            params_tuple: Vec::new(),
            key: None,
            fan_out: None,
            job: JobKind::Commands,
            state: WorkState::Pending,
            staleness: None,
            failure: None,
        }
    }

    /// A placeholder whose outputs are only known after it ran
    pub fn placeholder(
        task: Arc<TaskDeclaration>,
        inputs: Vec<PathBuf>,
        fan_out: Pattern,
        fields: Fields,
    ) -> Self {
        let mut item = Self::new(task, inputs, Vec::new(), fields);
        item.id = WorkItemId::fan_out(&fan_out);
        item.fan_out = Some(fan_out);
        item
    }

    /// An item that could not be materialized and fails without running
    pub fn blocked(task: Arc<TaskDeclaration>, cause: &str, failure: Failure) -> Self {
        let id = WorkItemId::blocked(&task.name, cause);
        let mut item = Self::new(task, Vec::new(), Vec::new(), Fields::new());
        item.id = id;
        item.fail(failure);
        item
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_params_tuple(mut self, params: Vec<String>) -> Self {
        self.params_tuple = params;
        self
    }

    pub fn with_job(mut self, job: JobKind) -> Self {
        self.job = job;
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.fan_out.is_some()
    }

    pub fn fail(&mut self, failure: Failure) {
        self.state = WorkState::Failed;
        self.failure = Some(failure);
    }

    /// Captured fields plus the builtin job parameters.
    ///
    /// Captured fields win over builtins of the same name.
    pub fn parameter_fields(&self) -> Fields {
        let mut fields = self.fields.clone();
        let mut builtin = |name: &str, value: String| {
            if !fields.contains_key(name) {
                fields.insert(name.to_string(), value);
            }
        };

        let join = |paths: &[PathBuf]| {
            paths
                .iter()
                .map(|p| normalize_path_text(p))
                .collect::<Vec<_>>()
                .join(" ")
        };

        builtin(
            "infile",
            self.inputs
                .first()
                .map(|p| normalize_path_text(p))
                .unwrap_or_default(),
        );
        builtin("infiles", join(&self.inputs));

        let outfile = match (&self.fan_out, self.outputs.first()) {
            (Some(pattern), _) => pattern.glob(),
            (None, Some(path)) => normalize_path_text(path),
            (None, None) => String::new(),
        };
        builtin("outfile", outfile.clone());
        builtin(
            "outfiles",
            if self.fan_out.is_some() {
                outfile
            } else {
                join(&self.outputs)
            },
        );

        builtin("task", self.task.name.clone());
        builtin("job_threads", self.task.resources.threads.to_string());
        builtin(
            "job_memory",
            self.task.resources.memory.clone().unwrap_or_default(),
        );
        if let Some(key) = &self.key {
            builtin("key", key.clone());
        }
        for (i, value) in self.params_tuple.iter().enumerate() {
            builtin(&format!("param{}", i), value.clone());
        }

        fields
    }
}
