// Execution Engine Module
// Task graph, materialization, freshness, scheduling and run reporting

pub mod events;
pub mod freshness;
pub mod graph;
pub mod materializer;
pub mod report;
pub mod scheduler;
pub mod work_item;

// Re-export key types
pub use events::{progress_channel, EventSender, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender};
pub use freshness::{FreshnessOracle, Staleness, TiePolicy, UpstreamState};
pub use graph::{DependencyEdge, FieldBinding, GraphError, GraphErrorKind, TaskGraph, TaskNode};
pub use materializer::{FilesystemState, MaterializeError, Materializer};
pub use report::{ItemAction, ItemReport, ReportFormat, RunReport};
pub use scheduler::{RunOptions, Scheduler};
pub use work_item::{Failure, FailureKind, JobKind, WorkItem, WorkItemId, WorkState};
