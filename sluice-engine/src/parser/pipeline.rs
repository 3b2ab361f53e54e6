// Pipeline YAML Parser
// Parses pipeline files into validated task declarations

use crate::config::Parameters;
use crate::declaration::{TaskBuilder, TaskKind, TaskRegistry};
use crate::parser::error::{ParseError, ParseErrorKind, ParseResult};
use crate::parser::models::*;

use std::fs;
use std::path::Path;

pub struct PipelineParser;

impl PipelineParser {
    /// Parse a pipeline from a YAML string
    pub fn parse(content: &str) -> ParseResult<Pipeline> {
        let file: PipelineFile =
            serde_yaml::from_str(content).map_err(|e| ParseError::from_yaml_error(&e, content))?;

        let params = Parameters::from_yaml(&file.params).map_err(|e| {
            ParseError::new(e.to_string(), locate(content, "params:"), 1)
                .with_kind(ParseErrorKind::InvalidValue)
                .with_source_context(content, 1)
        })?;

        let mut tasks = TaskRegistry::new();
        for spec in &file.tasks {
            let line = locate_task(content, &spec.name);
            let builder = Self::builder(spec).map_err(|message| {
                ParseError::new(message, line, 1)
                    .with_kind(ParseErrorKind::InvalidValue)
                    .with_source_context(content, 2)
            })?;
            tasks.add(builder).map_err(|e| {
                ParseError::new(e.to_string(), line, 1)
                    .with_kind(ParseErrorKind::ValidationError)
                    .with_source_context(content, 2)
            })?;
        }

        Ok(Pipeline {
            name: file.name.unwrap_or_else(|| "pipeline".to_string()),
            settings: file.settings,
            params,
            tasks,
        })
    }

    /// Parse a pipeline from a file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> ParseResult<Pipeline> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ParseError::new(format!("failed to read {}: {}", path.display(), e), 0, 0)
                .with_kind(ParseErrorKind::IoError)
        })?;

        Self::parse(&content)
    }

    fn builder(spec: &TaskSpec) -> Result<TaskBuilder, String> {
        let mut builder = TaskBuilder::new(spec.name.clone(), spec.kind);

        for from in &spec.from {
            builder = builder.from(from.clone());
        }
        for after in &spec.after {
            builder = builder.after(after.clone());
        }
        if let Some(input) = &spec.input {
            builder = builder.input(input.clone());
        }
        for side in &spec.inputs {
            builder = builder.source(side.from.as_deref(), side.pattern.clone());
        }

        if spec.output.is_some() && !spec.outputs.is_empty() {
            return Err(format!(
                "task '{}' sets both 'output' and 'outputs'",
                spec.name
            ));
        }
        for output in spec.output.iter().chain(spec.outputs.iter()) {
            builder = builder.output(output.clone());
        }

        for (field, values) in &spec.domain {
            builder = builder.domain(field.clone(), values.clone());
        }
        if let Some(key) = &spec.group_by {
            builder = builder.group_by(key.clone());
        }
        for template in &spec.extra_inputs {
            builder = builder.extra_input(template.clone());
        }
        if !spec.params_tuple.is_empty() {
            if spec.kind != TaskKind::Product {
                return Err(format!(
                    "task '{}': params_tuple is only valid on product tasks",
                    spec.name
                ));
            }
            builder = builder.params_tuple(spec.params_tuple.clone());
        }
        for dir in &spec.mkdir {
            builder = builder.mkdir(dir.clone());
        }
        for command in &spec.commands {
            builder = builder.command(command.clone());
        }

        let params = Parameters::from_yaml(&spec.params)
            .map_err(|e| format!("task '{}': {}", spec.name, e))?;

        builder = builder
            .resources(spec.resources.clone())
            .params(params)
            .on_mismatch(spec.on_mismatch);
        if let Some(mode) = spec.single_input {
            builder = builder.single_input(mode);
        }
        for suffix in &spec.companions {
            builder = builder.companion(suffix.clone());
        }

        Ok(builder)
    }
}

/// 1-indexed line of the first line starting with `needle` (after indentation)
fn locate(content: &str, needle: &str) -> usize {
    content
        .lines()
        .position(|line| line.trim_start().starts_with(needle))
        .map(|i| i + 1)
        .unwrap_or(0)
}

fn locate_task(content: &str, name: &str) -> usize {
    content
        .lines()
        .position(|line| {
            let line = line.trim_start().trim_start_matches("- ").trim_start();
            line.strip_prefix("name:")
                .map(|rest| rest.trim().trim_matches(|c| c == '"' || c == '\'') == name)
                .unwrap_or(false)
        })
        .map(|i| i + 1)
        .unwrap_or(0)
}
