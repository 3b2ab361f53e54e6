// Pattern Compiler
// Compiles path patterns with named captures into matchers and output templates

use indexmap::IndexMap;
use regex::Regex;
use thiserror::Error;

use std::fmt;
use std::path::{Path, PathBuf};

/// Captured fields, in the order the captures appear in the pattern
pub type Fields = IndexMap<String, String>;

/// Errors raised while compiling, matching or rendering a pattern
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("invalid pattern '{pattern}': {message}")]
    Invalid { pattern: String, message: String },

    #[error("pattern '{pattern}' references field '{field}' which has no value")]
    MissingField { pattern: String, field: String },

    #[error("path '{path}' does not match pattern '{pattern}'")]
    NoMatch { path: String, pattern: String },

    #[error("pattern '{pattern}' contains wildcards and cannot be rendered to a single path")]
    Unrenderable { pattern: String },
}

impl PatternError {
    fn invalid(pattern: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            pattern: pattern.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture { name: String, regex: Option<String> },
    /// `*`: anything within one path segment
    Star,
    /// `**`: anything, across segments
    DoubleStar,
}

/// A compiled path pattern.
///
/// The same type serves as input matcher and output template:
///
/// * `{name}` captures a non-empty run of characters within one path segment
/// * `{name:REGEX}` captures whatever `REGEX` matches
/// * `*` and `**` are anonymous wildcards (within a segment / across segments)
/// * `\{`, `\}`, `\*` and `\\` are literal characters
///
/// A name may appear more than once; a path only matches if every occurrence
/// captured the same text.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
    regex: Regex,
    /// Field name for each regex group `_s{index}`
    groups: Vec<String>,
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Pattern {
    /// Compile a pattern
    pub fn compile(source: &str) -> Result<Self, PatternError> {
        let segments = parse_segments(source)?;
        Self::from_segments(source.to_string(), segments)
    }

    fn from_segments(source: String, segments: Vec<Segment>) -> Result<Self, PatternError> {
        let mut expr = String::from("^");
        let mut groups = Vec::new();

        for segment in &segments {
            match segment {
                Segment::Literal(text) => expr.push_str(&regex::escape(text)),
                Segment::Capture { name, regex } => {
                    let body = regex.as_deref().unwrap_or("[^/]+?");
                    expr.push_str(&format!("(?P<_s{}>{})", groups.len(), body));
                    groups.push(name.clone());
                }
                Segment::Star => expr.push_str("[^/]*"),
                Segment::DoubleStar => expr.push_str(".*"),
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| PatternError::invalid(&source, e.to_string()))?;

        Ok(Self {
            source,
            segments,
            regex,
            groups,
        })
    }

    /// The pattern text as written
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct capture names, in order of first appearance
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in &self.groups {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }

    /// True if the pattern has no captures and no wildcards
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// True if the pattern contains anonymous wildcards
    pub fn has_wildcards(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Star | Segment::DoubleStar))
    }

    /// Match a path, returning the captured fields
    pub fn matches(&self, path: impl AsRef<Path>) -> Option<Fields> {
        let text = normalize_path_text(path.as_ref());
        let caps = self.regex.captures(&text)?;

        let mut fields = Fields::new();
        for (index, name) in self.groups.iter().enumerate() {
            let value = caps.name(&format!("_s{}", index))?.as_str();
            match fields.get(name) {
                Some(existing) if existing != value => return None,
                Some(_) => {}
                None => {
                    fields.insert(name.clone(), value.to_string());
                }
            }
        }
        Some(fields)
    }

    /// Match a path, failing with `PatternError::NoMatch` if it does not conform
    pub fn capture(&self, path: impl AsRef<Path>) -> Result<Fields, PatternError> {
        self.matches(path.as_ref())
            .ok_or_else(|| PatternError::NoMatch {
                path: normalize_path_text(path.as_ref()),
                pattern: self.source.clone(),
            })
    }

    /// Substitute fields into the pattern, producing a concrete path
    pub fn render(&self, fields: &Fields) -> Result<String, PatternError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Capture { name, .. } => {
                    let value = fields.get(name).ok_or_else(|| PatternError::MissingField {
                        pattern: self.source.clone(),
                        field: name.clone(),
                    })?;
                    out.push_str(value);
                }
                Segment::Star | Segment::DoubleStar => {
                    return Err(PatternError::Unrenderable {
                        pattern: self.source.clone(),
                    })
                }
            }
        }
        Ok(out)
    }

    /// Substitute the fields that are known and keep the rest as captures.
    ///
    /// Used for fan-out outputs whose final names are only known after the job ran.
    pub fn render_partial(&self, fields: &Fields) -> Result<Pattern, PatternError> {
        let mut segments: Vec<Segment> = Vec::with_capacity(self.segments.len());
        let mut source = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Capture { name, .. } if fields.contains_key(name) => {
                    let value = &fields[name];
                    source.push_str(&escape_literal(value));
                    match segments.last_mut() {
                        Some(Segment::Literal(text)) => text.push_str(value),
                        _ => segments.push(Segment::Literal(value.clone())),
                    }
                }
                other => {
                    source.push_str(&segment_source(other));
                    match (segments.last_mut(), other) {
                        (Some(Segment::Literal(text)), Segment::Literal(more)) => {
                            text.push_str(more)
                        }
                        _ => segments.push(other.clone()),
                    }
                }
            }
        }

        Self::from_segments(source, segments)
    }

    /// A filesystem glob that selects a superset of the paths this pattern matches
    pub fn glob(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(&glob::Pattern::escape(text)),
                Segment::Capture { .. } | Segment::Star => out.push('*'),
                Segment::DoubleStar => out.push_str("**"),
            }
        }
        out
    }

    /// Find existing files under `root` that match this pattern.
    ///
    /// Returned paths are relative to `root` and sorted.
    pub fn discover(&self, root: &Path) -> Result<Vec<PathBuf>, PatternError> {
        if self.is_literal() {
            let path = PathBuf::from(&self.source);
            return Ok(if root.join(&path).is_file() {
                vec![path]
            } else {
                Vec::new()
            });
        }

        let root_text = glob::Pattern::escape(&root.to_string_lossy());
        let full = format!("{}/{}", root_text.trim_end_matches('/'), self.glob());
        let entries = glob::glob(&full)
            .map_err(|e| PatternError::invalid(&self.source, e.to_string()))?;

        let mut found = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            if !entry.is_file() {
                continue;
            }
            let relative = match entry.strip_prefix(root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => entry.clone(),
            };
            if self.matches(&relative).is_some() {
                found.push(relative);
            }
        }

        found.sort();
        found.dedup();
        Ok(found)
    }
}

/// Normalise a path to the `/`-separated text patterns are matched against
pub fn normalize_path_text(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    let mut trimmed = text.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.to_string()
}

fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '{' | '}' | '*' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn segment_source(segment: &Segment) -> String {
    match segment {
        Segment::Literal(text) => escape_literal(text),
        Segment::Capture { name, regex: None } => format!("{{{}}}", name),
        Segment::Capture {
            name,
            regex: Some(re),
        } => format!("{{{}:{}}}", name, re),
        Segment::Star => "*".to_string(),
        Segment::DoubleStar => "**".to_string(),
    }
}

fn parse_segments(source: &str) -> Result<Vec<Segment>, PatternError> {
    let chars: Vec<char> = source.chars().collect();
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    let flush = |literal: &mut String, segments: &mut Vec<Segment>| {
        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(literal)));
        }
    };

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let next = chars
                    .get(i + 1)
                    .ok_or_else(|| PatternError::invalid(source, "trailing escape character"))?;
                literal.push(*next);
                i += 2;
            }
            '*' => {
                flush(&mut literal, &mut segments);
                if chars.get(i + 1) == Some(&'*') {
                    segments.push(Segment::DoubleStar);
                    i += 2;
                } else {
                    segments.push(Segment::Star);
                    i += 1;
                }
            }
            '{' => {
                flush(&mut literal, &mut segments);
                let (segment, next) = parse_capture(source, &chars, i)?;
                segments.push(segment);
                i = next;
            }
            '}' => {
                return Err(PatternError::invalid(
                    source,
                    format!("unmatched '}}' at offset {}", i),
                ))
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    flush(&mut literal, &mut segments);

    if segments.is_empty() {
        return Err(PatternError::invalid(source, "pattern is empty"));
    }

    Ok(segments)
}

/// Parse `{name}` or `{name:regex}` starting at `start` (the opening brace)
fn parse_capture(source: &str, chars: &[char], start: usize) -> Result<(Segment, usize), PatternError> {
    let mut depth = 0usize;
    let mut end = None;
    for (offset, c) in chars.iter().enumerate().skip(start) {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(offset);
                    break;
                }
            }
            _ => {}
        }
    }

    let end = end.ok_or_else(|| {
        PatternError::invalid(source, format!("unclosed '{{' at offset {}", start))
    })?;
    let body: String = chars[start + 1..end].iter().collect();

    let (name, regex) = match body.split_once(':') {
        Some((name, re)) => (name.trim().to_string(), Some(re.to_string())),
        None => (body.trim().to_string(), None),
    };

    if !is_valid_name(&name) {
        return Err(PatternError::invalid(
            source,
            format!("'{}' is not a valid capture name", name),
        ));
    }
    if let Some(re) = &regex {
        if re.is_empty() {
            return Err(PatternError::invalid(
                source,
                format!("capture '{}' has an empty regex", name),
            ));
        }
        Regex::new(re).map_err(|e| PatternError::invalid(source, e.to_string()))?;
    }

    Ok((Segment::Capture { name, regex }, end + 1))
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_match_extracts_fields_in_order() {
        let pattern = Pattern::compile("mapping.dir/{track}_{lane}.bam").unwrap();
        let captured = pattern.matches("mapping.dir/ctrl_L001.bam").unwrap();

        let keys: Vec<_> = captured.keys().cloned().collect();
        assert_eq!(keys, vec!["track", "lane"]);
        assert_eq!(captured["track"], "ctrl");
        assert_eq!(captured["lane"], "L001");
    }

    #[test]
    fn test_match_is_deterministic() {
        let pattern = Pattern::compile("{sample}-{rep}.bam").unwrap();
        let first = pattern.matches("a-b-R1.bam");
        let second = pattern.matches("a-b-R1.bam");
        assert_eq!(first, second);
        assert_eq!(first.unwrap()["sample"], "a");
    }

    #[test]
    fn test_capture_does_not_cross_directories() {
        let pattern = Pattern::compile("{sample}.fastq.gz").unwrap();
        assert!(pattern.matches("raw/a.fastq.gz").is_none());
        assert!(pattern.matches("./a.fastq.gz").is_some());
    }

    #[test]
    fn test_no_match_error() {
        let pattern = Pattern::compile("{sample}.bam").unwrap();
        let err = pattern.capture("a.sam").unwrap_err();
        assert!(matches!(err, PatternError::NoMatch { .. }));
    }

    #[test]
    fn test_custom_regex_capture() {
        let pattern = Pattern::compile("{exp}-{rep:R[0-9]+}.bam").unwrap();
        let captured = pattern.matches("HeLa-FLAG-R2.bam").unwrap();
        assert_eq!(captured["exp"], "HeLa-FLAG");
        assert_eq!(captured["rep"], "R2");
        assert!(pattern.matches("HeLa-input.bam").is_none());
    }

    #[test]
    fn test_regex_with_braces() {
        let pattern = Pattern::compile("{code:[A-Z]{3}}.txt").unwrap();
        assert!(pattern.matches("ABC.txt").is_some());
        assert!(pattern.matches("ABCD.txt").is_none());
    }

    #[test]
    fn test_repeated_name_must_agree() {
        let pattern = Pattern::compile("{s}/{s}.bam").unwrap();
        assert!(pattern.matches("a/a.bam").is_some());
        assert!(pattern.matches("a/b.bam").is_none());
        assert_eq!(pattern.names(), vec!["s"]);
    }

    #[test]
    fn test_wildcards() {
        let pattern = Pattern::compile("data/**/{name}.txt").unwrap();
        assert_eq!(pattern.matches("data/x/y/z.txt").unwrap()["name"], "z");

        let star = Pattern::compile("*.log").unwrap();
        assert!(star.matches("run.log").is_some());
        assert!(star.matches("dir/run.log").is_none());
        assert!(star.has_wildcards());
    }

    #[test]
    fn test_render() {
        let template = Pattern::compile("dedup_{method}.dir/{track}.bam").unwrap();
        let rendered = template
            .render(&fields(&[("track", "ctrl"), ("method", "cluster")]))
            .unwrap();
        assert_eq!(rendered, "dedup_cluster.dir/ctrl.bam");
    }

    #[test]
    fn test_render_missing_field() {
        let template = Pattern::compile("{track}.bam").unwrap();
        let err = template.render(&Fields::new()).unwrap_err();
        assert_eq!(
            err,
            PatternError::MissingField {
                pattern: "{track}.bam".to_string(),
                field: "track".to_string()
            }
        );
    }

    #[test]
    fn test_render_wildcard_fails() {
        let template = Pattern::compile("out/*.bam").unwrap();
        assert!(matches!(
            template.render(&Fields::new()),
            Err(PatternError::Unrenderable { .. })
        ));
    }

    #[test]
    fn test_render_partial_and_glob() {
        let template = Pattern::compile("demux_fq/{name}_{track}.fastq.gz").unwrap();
        let partial = template.render_partial(&fields(&[("track", "L1")])).unwrap();

        assert_eq!(partial.source(), "demux_fq/{name}_L1.fastq.gz");
        assert_eq!(partial.glob(), "demux_fq/*_L1.fastq.gz");
        assert_eq!(partial.names(), vec!["name"]);

        let captured = partial.matches("demux_fq/ctrl-R1_L1.fastq.gz").unwrap();
        assert_eq!(captured["name"], "ctrl-R1");
        assert!(partial.matches("demux_fq/ctrl-R1_L2.fastq.gz").is_none());
    }

    #[test]
    fn test_render_partial_escapes_values() {
        let template = Pattern::compile("{dir}/{name}.txt").unwrap();
        let partial = template.render_partial(&fields(&[("dir", "a*b")])).unwrap();
        assert!(partial.matches("a*b/x.txt").is_some());
        assert!(partial.matches("aXb/x.txt").is_none());
    }

    #[test]
    fn test_literal_pattern() {
        let pattern = Pattern::compile("sample_table.tsv").unwrap();
        assert!(pattern.is_literal());
        assert!(pattern.names().is_empty());
        assert_eq!(pattern.render(&Fields::new()).unwrap(), "sample_table.tsv");
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(Pattern::compile("").is_err());
        assert!(Pattern::compile("{unclosed.txt").is_err());
        assert!(Pattern::compile("stray}.txt").is_err());
        assert!(Pattern::compile("{1bad}.txt").is_err());
        assert!(Pattern::compile("{x:(}.txt").is_err());
    }

    #[test]
    fn test_discover() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        std::fs::create_dir(root.join("reads")).unwrap();
        for name in ["a.fastq.gz", "b.fastq.gz", "notes.txt"] {
            std::fs::write(root.join("reads").join(name), "x").unwrap();
        }

        let pattern = Pattern::compile("reads/{sample}.fastq.gz").unwrap();
        let found = pattern.discover(root).unwrap();
        assert_eq!(
            found,
            vec![
                PathBuf::from("reads/a.fastq.gz"),
                PathBuf::from("reads/b.fastq.gz")
            ]
        );
    }

    #[test]
    fn test_collate_key_example() {
        let pattern = Pattern::compile("{sample}_R{rep}.bam").unwrap();
        let key = Pattern::compile("{sample}").unwrap();

        let keys: Vec<String> = ["a_R1.bam", "a_R2.bam", "b_R1.bam"]
            .iter()
            .map(|p| key.render(&pattern.matches(p).unwrap()).unwrap())
            .collect();
        assert_eq!(keys, vec!["a", "a", "b"]);
    }
}
