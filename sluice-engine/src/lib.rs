// Sluice Engine Library
// Declarative file-based workflow engine: pattern rules, staleness, fan-out/fan-in
// and checkpointed multi-step jobs

pub mod checkpoint;
pub mod config;
pub mod declaration;
pub mod error;
pub mod execution;
pub mod params;
pub mod parser;
pub mod pattern;
pub mod runners;

// Re-export commonly used types
pub use error::{EngineError, EngineResult};

// Re-export pattern and declaration types
pub use declaration::{
    CommandTemplate, DeclarationError, GroupKey, OnMismatch, ResourceHints, SingleInput,
    TaskBuilder, TaskDeclaration, TaskKind, TaskRegistry,
};
pub use pattern::{Fields, Pattern, PatternError};

// Re-export configuration types
pub use config::{
    ConfigError, ConfigLoader, EngineConfig, EngineSettings, Parameters, QueueKind,
    QueueSettings, RunMode,
};
pub use params::{ParameterError, ParameterScope};

// Re-export parser types
pub use parser::{ParseError, ParseErrorKind, ParseResult, Pipeline, PipelineParser};

// Re-export execution types
pub use execution::{
    progress_channel, ExecutionEvent, FailureKind, ItemAction, ReportFormat, RunOptions,
    RunReport, Scheduler, Staleness, TaskGraph, TiePolicy, WorkItem, WorkItemId, WorkState,
};

// Re-export runner and checkpoint types
pub use checkpoint::{CheckpointLedger, CheckpointRecord};
pub use runners::{JobRunner, LocalExecutor, Outcome, QueueExecutor, StepExecutor};
