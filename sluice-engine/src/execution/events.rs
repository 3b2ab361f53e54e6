// Execution Events
// Progress reporting and event types for a pipeline run

use crate::execution::work_item::{Failure, WorkItemId};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Run started
    RunStarted {
        pipeline: String,
        total_tasks: usize,
        dry_run: bool,
    },

    /// Run finished
    RunCompleted {
        pipeline: String,
        success: bool,
        duration: Duration,
        executed: usize,
        failed: usize,
    },

    /// A dependency level is about to be materialized
    LevelStarted { level: usize, tasks: Vec<String> },

    /// A task was expanded into work items
    TaskMaterialized {
        task: String,
        items: usize,
        stale: usize,
    },

    /// Work item is up to date and will not run
    ItemSkipped { task: String, item: WorkItemId },

    /// Work item is stale
    ItemStale {
        task: String,
        item: WorkItemId,
        reason: String,
    },

    /// Work item was dispatched
    ItemStarted {
        task: String,
        item: WorkItemId,
        total_steps: usize,
        resume_from: usize,
    },

    /// A command step started
    StepStarted {
        task: String,
        item: WorkItemId,
        step_index: usize,
        command: String,
    },

    /// A command step finished
    StepCompleted {
        task: String,
        item: WorkItemId,
        step_index: usize,
        exit_code: Option<i32>,
        duration: Duration,
    },

    /// Work item finished successfully
    ItemCompleted {
        task: String,
        item: WorkItemId,
        duration: Duration,
        cloned: bool,
    },

    /// Work item failed, or was failed because of an upstream failure
    ItemFailed {
        task: String,
        item: WorkItemId,
        failure: Failure,
    },

    /// A fan-out placeholder was replaced by the outputs it produced
    FanOutExpanded {
        task: String,
        placeholder: WorkItemId,
        members: usize,
    },

    /// Log message
    Log {
        level: LogLevel,
        message: String,
        task: Option<String>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    pub fn run_started(pipeline: impl Into<String>, total_tasks: usize, dry_run: bool) -> Self {
        Self::RunStarted {
            pipeline: pipeline.into(),
            total_tasks,
            dry_run,
        }
    }

    pub fn item_started(
        task: impl Into<String>,
        item: WorkItemId,
        total_steps: usize,
        resume_from: usize,
    ) -> Self {
        Self::ItemStarted {
            task: task.into(),
            item,
            total_steps,
            resume_from,
        }
    }

    pub fn step_started(
        task: impl Into<String>,
        item: WorkItemId,
        step_index: usize,
        command: impl Into<String>,
    ) -> Self {
        Self::StepStarted {
            task: task.into(),
            item,
            step_index,
            command: command.into(),
        }
    }

    pub fn step_completed(
        task: impl Into<String>,
        item: WorkItemId,
        step_index: usize,
        exit_code: Option<i32>,
        duration: Duration,
    ) -> Self {
        Self::StepCompleted {
            task: task.into(),
            item,
            step_index,
            exit_code,
            duration,
        }
    }

    pub fn item_failed(task: impl Into<String>, item: WorkItemId, failure: Failure) -> Self {
        Self::ItemFailed {
            task: task.into(),
            item,
            failure,
        }
    }

    /// Create an info log event
    pub fn info(message: impl Into<String>, task: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
            task,
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, task: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            task,
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>, task: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            task,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
