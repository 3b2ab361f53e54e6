// Engine errors
// Top-level error for anything that aborts a run before or outside work item execution

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::declaration::DeclarationError;
use crate::execution::graph::GraphError;
use crate::execution::materializer::MaterializeError;
use crate::parser::ParseError;
use crate::pattern::PatternError;
use crate::runners::RunnerError;

use std::path::PathBuf;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot serialize run report: {0}")]
    Report(#[from] serde_json::Error),
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors that stem from the pipeline definition rather than the environment
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EngineError::Parse(_)
                | EngineError::Declaration(_)
                | EngineError::Graph(_)
                | EngineError::Pattern(_)
                | EngineError::Materialize(_)
        )
    }
}
