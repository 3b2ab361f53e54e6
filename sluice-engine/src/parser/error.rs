// Parser error types with helpful error messages
// Line/column info, source context and suggestions for pipeline files

use std::fmt;

/// Detailed parse error with location and context
#[derive(Debug, Clone)]
pub struct ParseError {
    /// Error message
    pub message: String,
    /// Line number (1-indexed, 0 when unknown)
    pub line: usize,
    /// Column number (1-indexed, 0 when unknown)
    pub column: usize,
    /// Surrounding context (a few lines around the error)
    pub context: String,
    /// Optional suggestion for fixing the error
    pub suggestion: Option<String>,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// YAML syntax error
    YamlSyntax,
    /// Wrong types or missing fields
    InvalidSchema,
    UnknownField,
    InvalidValue,
    /// File could not be read
    IoError,
    /// A task declaration is structurally invalid
    ValidationError,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            context: String::new(),
            suggestion: None,
            kind: ParseErrorKind::InvalidSchema,
        }
    }

    pub fn yaml_error(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self::new(message, line, column).with_kind(ParseErrorKind::YamlSyntax)
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_kind(mut self, kind: ParseErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Create context from source content
    pub fn with_source_context(mut self, source: &str, context_lines: usize) -> Self {
        if self.line == 0 {
            return self;
        }

        let lines: Vec<&str> = source.lines().collect();
        let start = self.line.saturating_sub(context_lines + 1);
        let end = (self.line + context_lines).min(lines.len());

        let mut context = String::new();
        for (i, line) in lines.iter().enumerate().take(end).skip(start) {
            let line_num = i + 1;
            let prefix = if line_num == self.line { ">" } else { " " };
            context.push_str(&format!("{} {:4} | {}\n", prefix, line_num, line));

            if line_num == self.line && self.column > 0 {
                let indicator = " ".repeat(self.column.saturating_sub(1)) + "^";
                context.push_str(&format!("       | {}\n", indicator));
            }
        }

        self.context = context;
        self
    }

    /// Create from serde_yaml error
    pub fn from_yaml_error(err: &serde_yaml::Error, source: &str) -> Self {
        let (line, column) = err
            .location()
            .map(|loc| (loc.line(), loc.column()))
            .unwrap_or((1, 1));

        let message = format_yaml_error_message(err);
        let kind = if message.starts_with("unknown field") {
            ParseErrorKind::UnknownField
        } else if message.starts_with("unknown variant") {
            ParseErrorKind::InvalidValue
        } else if err.location().is_some() && !message.contains("missing") {
            ParseErrorKind::YamlSyntax
        } else {
            ParseErrorKind::InvalidSchema
        };
        let suggestion = suggest_yaml_fix(err, source, line);

        let mut error = ParseError::new(message, line, column)
            .with_kind(kind)
            .with_source_context(source, 2);
        error.suggestion = suggestion;
        error
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.message)?;
        if self.line > 0 {
            writeln!(f, "  --> line {}:{}", self.line, self.column)?;
        }

        if !self.context.is_empty() {
            writeln!(f)?;
            write!(f, "{}", self.context)?;
        }

        if let Some(suggestion) = &self.suggestion {
            writeln!(f)?;
            writeln!(f, "help: {}", suggestion)?;
        }

        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Format serde_yaml error message into something more readable
fn format_yaml_error_message(err: &serde_yaml::Error) -> String {
    let msg = err.to_string();

    if msg.contains("missing field") {
        if let Some(field) = extract_between(&msg, "missing field `", "`") {
            return format!("missing required field '{}'", field);
        }
    }

    if msg.contains("unknown field") {
        if let Some(field) = extract_between(&msg, "unknown field `", "`") {
            if let Some(expected) = extract_expected(&msg) {
                return format!(
                    "unknown field '{}', expected one of: {}",
                    field,
                    expected.join(", ")
                );
            }
            return format!("unknown field '{}'", field);
        }
    }

    if msg.contains("unknown variant") {
        if let Some(variant) = extract_between(&msg, "unknown variant `", "`") {
            if let Some(expected) = extract_expected(&msg) {
                return format!(
                    "unknown variant '{}', expected one of: {}",
                    variant,
                    expected.join(", ")
                );
            }
        }
    }

    if msg.contains("invalid type") {
        if let (Some(found), Some(expected)) = (
            extract_between(&msg, "invalid type: ", ","),
            extract_between(&msg, "expected ", " at"),
        ) {
            return format!("expected {}, but found {}", expected, found);
        }
    }

    msg
}

fn extract_between(msg: &str, prefix: &str, suffix: &str) -> Option<String> {
    let start = msg.find(prefix)? + prefix.len();
    let end = msg[start..].find(suffix)? + start;
    Some(msg[start..end].to_string())
}

fn extract_expected(msg: &str) -> Option<Vec<String>> {
    let marker = if msg.contains("expected one of ") {
        "expected one of "
    } else {
        "expected "
    };
    let start = msg.find(marker)? + marker.len();
    let rest = &msg[start..];
    let end = rest.find(" at line").unwrap_or(rest.len());
    let fields: Vec<String> = rest[..end]
        .split(", ")
        .map(|s| s.trim().trim_start_matches("or ").trim_matches('`').to_string())
        .filter(|s| !s.is_empty())
        .collect();
    Some(fields)
}

/// Suggest fixes for common mistakes in pipeline files
fn suggest_yaml_fix(err: &serde_yaml::Error, source: &str, line: usize) -> Option<String> {
    let msg = err.to_string();
    let lines: Vec<&str> = source.lines().collect();
    let error_line = lines.get(line.saturating_sub(1)).copied().unwrap_or("");

    if msg.contains("missing field `tasks`") {
        return Some("a pipeline needs a 'tasks:' list".to_string());
    }

    if msg.contains("missing field `kind`") {
        return Some(
            "every task needs a kind: originate, transform, merge, collate, subdivide or product"
                .to_string(),
        );
    }

    if error_line.starts_with('\t') {
        return Some(
            "YAML prefers spaces over tabs for indentation. Replace tabs with spaces.".to_string(),
        );
    }

    let typo_suggestions = [
        ("depends_on", "from (or after, for ordering only)"),
        ("follows", "after"),
        ("inputs_from", "from"),
        ("command", "commands"),
        ("threads", "resources: { threads: N }"),
        ("jobs_limit", "resources: { serialize: GROUP }"),
    ];

    if let Some(field) = extract_between(&msg, "unknown field `", "`") {
        let field = field.to_lowercase();
        for (typo, correct) in typo_suggestions {
            if field == typo {
                return Some(format!("did you mean '{}'?", correct));
            }
        }
    }

    None
}

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;
