// Parser module for pipeline files
// YAML models, parsing into task declarations, and error reporting

pub mod error;
pub mod models;
pub mod pipeline;

pub use error::{ParseError, ParseErrorKind, ParseResult};
pub use models::{InputSpec, Pipeline, PipelineFile, TaskSpec};
pub use pipeline::PipelineParser;
