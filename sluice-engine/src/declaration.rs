// Task Declarations
// Typed task rules built through TaskBuilder and collected in a TaskRegistry

use crate::config::Parameters;
use crate::params;
use crate::pattern::{Fields, Pattern, PatternError};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Separator that splits one command string into checkpointed steps
pub const STEP_SEPARATOR: &str = "checkpoint;";

#[derive(Debug, Error)]
pub enum DeclarationError {
    #[error("task '{task}': {message}")]
    Invalid { task: String, message: String },

    #[error("task '{task}': {source}")]
    Pattern {
        task: String,
        #[source]
        source: PatternError,
    },

    #[error("task '{0}' is declared more than once")]
    Duplicate(String),
}

impl DeclarationError {
    fn invalid(task: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            task: task.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Originate,
    Transform,
    Merge,
    Collate,
    Subdivide,
    Product,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Originate => "originate",
            TaskKind::Transform => "transform",
            TaskKind::Merge => "merge",
            TaskKind::Collate => "collate",
            TaskKind::Subdivide => "subdivide",
            TaskKind::Product => "product",
        };
        f.write_str(name)
    }
}

/// Resource request attached to every work item of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceHints {
    pub threads: u32,
    /// Memory class, passed through to the queue (e.g. `4G`)
    #[serde(alias = "memory_class")]
    pub memory: Option<String>,
    /// Serialization group name
    #[serde(alias = "serialization_group")]
    pub serialize: Option<String>,
}

impl Default for ResourceHints {
    fn default() -> Self {
        Self {
            threads: 1,
            memory: None,
            serialize: None,
        }
    }
}

/// What a merge or collate does when its group holds exactly one input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SingleInput {
    /// Copy the input (and its companions) to the output
    Clone,
    /// Run the commands as usual
    Run,
}

/// Handling of upstream outputs that do not match the input pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnMismatch {
    #[default]
    Skip,
    Fail,
}

/// Ordered command steps of a task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTemplate {
    steps: Vec<String>,
}

impl CommandTemplate {
    /// Build from command entries, splitting each on `checkpoint;`
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let steps = entries
            .into_iter()
            .flat_map(|entry| {
                entry
                    .as_ref()
                    .split(STEP_SEPARATOR)
                    .map(|step| step.trim().trim_end_matches(';').trim().to_string())
                    .collect::<Vec<_>>()
            })
            .filter(|step| !step.is_empty())
            .collect();
        Self { steps }
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All parameter tokens referenced by any step
    pub fn tokens(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for step in &self.steps {
            for token in params::tokens(step) {
                if !names.contains(&token) {
                    names.push(token);
                }
            }
        }
        names
    }
}

/// Where a task's input candidates come from
#[derive(Debug, Clone)]
pub struct InputSource {
    /// Producing task; `None` means existing files in the working directory
    pub from: Option<String>,
    pub pattern: Option<Pattern>,
}

pub type KeyFn = Arc<dyn Fn(&Fields) -> Option<String> + Send + Sync>;

/// How collate derives a grouping key from captured fields
#[derive(Clone)]
pub enum GroupKey {
    Template(Pattern),
    Function(KeyFn),
}

impl GroupKey {
    pub fn key(&self, fields: &Fields) -> Result<String, PatternError> {
        match self {
            GroupKey::Template(pattern) => pattern.render(fields),
            GroupKey::Function(f) => f(fields).ok_or_else(|| PatternError::MissingField {
                pattern: "<key function>".to_string(),
                field: "key".to_string(),
            }),
        }
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Template(pattern) => f.debug_tuple("Template").field(pattern).finish(),
            GroupKey::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// A registered task rule. Immutable once built.
#[derive(Debug, Clone)]
pub struct TaskDeclaration {
    pub name: String,
    pub kind: TaskKind,
    pub sources: Vec<InputSource>,
    /// Ordering-only predecessors
    pub after: Vec<String>,
    pub outputs: Vec<Pattern>,
    /// Originate: field name to enumerated values
    pub domain: IndexMap<String, Vec<String>>,
    pub group_by: Option<GroupKey>,
    pub extra_inputs: Vec<Pattern>,
    pub params_tuple: Vec<Pattern>,
    pub mkdir: Vec<String>,
    pub commands: CommandTemplate,
    pub resources: ResourceHints,
    /// Task-local parameters, shadowing the global ones
    pub params: Parameters,
    pub single_input: SingleInput,
    /// Sidecar suffixes copied alongside a cloned output
    pub companions: Vec<String>,
    pub on_mismatch: OnMismatch,
}

impl TaskDeclaration {
    /// Names of every predecessor task, pattern-bound first, then ordering-only
    pub fn predecessors(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        let bound = self.sources.iter().filter_map(|s| s.from.as_deref());
        for name in bound.chain(self.after.iter().map(String::as_str)) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Field names the input side can supply to output templates
    pub fn available_fields(&self) -> HashSet<String> {
        let mut names: HashSet<String> = self.domain.keys().cloned().collect();
        for source in &self.sources {
            if let Some(pattern) = &source.pattern {
                names.extend(pattern.names().into_iter().map(String::from));
            }
        }
        names
    }
}

/// Fluent constructor for TaskDeclaration
pub struct TaskBuilder {
    name: String,
    kind: TaskKind,
    from: Vec<String>,
    input: Option<String>,
    sources: Vec<(Option<String>, String)>,
    after: Vec<String>,
    outputs: Vec<String>,
    domain: IndexMap<String, Vec<String>>,
    group_by: Option<String>,
    group_fn: Option<KeyFn>,
    extra_inputs: Vec<String>,
    params_tuple: Vec<String>,
    mkdir: Vec<String>,
    commands: Vec<String>,
    resources: ResourceHints,
    params: Parameters,
    single_input: Option<SingleInput>,
    companions: Vec<String>,
    on_mismatch: OnMismatch,
}

impl TaskBuilder {
    pub fn new(name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            name: name.into(),
            kind,
            from: Vec::new(),
            input: None,
            sources: Vec::new(),
            after: Vec::new(),
            outputs: Vec::new(),
            domain: IndexMap::new(),
            group_by: None,
            group_fn: None,
            extra_inputs: Vec::new(),
            params_tuple: Vec::new(),
            mkdir: Vec::new(),
            commands: Vec::new(),
            resources: ResourceHints::default(),
            params: Parameters::default(),
            single_input: None,
            companions: Vec::new(),
            on_mismatch: OnMismatch::default(),
        }
    }

    pub fn originate(name: impl Into<String>) -> Self {
        Self::new(name, TaskKind::Originate)
    }

    pub fn transform(name: impl Into<String>) -> Self {
        Self::new(name, TaskKind::Transform)
    }

    pub fn merge(name: impl Into<String>) -> Self {
        Self::new(name, TaskKind::Merge)
    }

    pub fn collate(name: impl Into<String>) -> Self {
        Self::new(name, TaskKind::Collate)
    }

    pub fn subdivide(name: impl Into<String>) -> Self {
        Self::new(name, TaskKind::Subdivide)
    }

    pub fn product(name: impl Into<String>) -> Self {
        Self::new(name, TaskKind::Product)
    }

    /// Take inputs from the outputs of `task`
    pub fn from(mut self, task: impl Into<String>) -> Self {
        self.from.push(task.into());
        self
    }

    /// Input pattern applied to the `from` task (or the filesystem if there is none)
    pub fn input(mut self, pattern: impl Into<String>) -> Self {
        self.input = Some(pattern.into());
        self
    }

    /// An explicit input side, used by product tasks
    pub fn source(mut self, from: Option<&str>, pattern: impl Into<String>) -> Self {
        self.sources.push((from.map(String::from), pattern.into()));
        self
    }

    pub fn after(mut self, task: impl Into<String>) -> Self {
        self.after.push(task.into());
        self
    }

    pub fn output(mut self, pattern: impl Into<String>) -> Self {
        self.outputs.push(pattern.into());
        self
    }

    pub fn domain<I, S>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domain
            .insert(field.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn group_by(mut self, template: impl Into<String>) -> Self {
        self.group_by = Some(template.into());
        self
    }

    pub fn group_by_fn<F>(mut self, key: F) -> Self
    where
        F: Fn(&Fields) -> Option<String> + Send + Sync + 'static,
    {
        self.group_fn = Some(Arc::new(key));
        self
    }

    pub fn extra_input(mut self, template: impl Into<String>) -> Self {
        self.extra_inputs.push(template.into());
        self
    }

    pub fn params_tuple<I, S>(mut self, templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params_tuple = templates.into_iter().map(Into::into).collect();
        self
    }

    pub fn mkdir(mut self, dir: impl Into<String>) -> Self {
        self.mkdir.push(dir.into());
        self
    }

    pub fn command(mut self, step: impl Into<String>) -> Self {
        self.commands.push(step.into());
        self
    }

    pub fn resources(mut self, resources: ResourceHints) -> Self {
        self.resources = resources;
        self
    }

    pub fn threads(mut self, threads: u32) -> Self {
        self.resources.threads = threads;
        self
    }

    pub fn memory(mut self, memory: impl Into<String>) -> Self {
        self.resources.memory = Some(memory.into());
        self
    }

    pub fn serialize(mut self, group: impl Into<String>) -> Self {
        self.resources.serialize = Some(group.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name, value);
        self
    }

    pub fn params(mut self, params: Parameters) -> Self {
        self.params.extend(&params);
        self
    }

    pub fn single_input(mut self, mode: SingleInput) -> Self {
        self.single_input = Some(mode);
        self
    }

    pub fn companion(mut self, suffix: impl Into<String>) -> Self {
        self.companions.push(suffix.into());
        self
    }

    pub fn on_mismatch(mut self, mode: OnMismatch) -> Self {
        self.on_mismatch = mode;
        self
    }

    /// Validate and freeze the declaration
    pub fn build(self) -> Result<TaskDeclaration, DeclarationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(DeclarationError::invalid(
                &self.name,
                "task names must be non-empty and contain no whitespace",
            ));
        }

        let compile = |source: &str| {
            Pattern::compile(source).map_err(|e| DeclarationError::Pattern {
                task: name.clone(),
                source: e,
            })
        };

        let sources = if !self.sources.is_empty() {
            if self.input.is_some() || !self.from.is_empty() {
                return Err(DeclarationError::invalid(
                    &name,
                    "use either explicit input sources or from/input, not both",
                ));
            }
            self.sources
                .iter()
                .map(|(from, pattern)| {
                    Ok(InputSource {
                        from: from.clone(),
                        pattern: Some(compile(pattern)?),
                    })
                })
                .collect::<Result<Vec<_>, DeclarationError>>()?
        } else {
            let pattern = self.input.as_deref().map(compile).transpose()?;
            if self.from.is_empty() {
                match (self.kind, pattern) {
                    (TaskKind::Originate, None) => Vec::new(),
                    (TaskKind::Originate, Some(_)) => {
                        return Err(DeclarationError::invalid(
                            &name,
                            "originate tasks take no input",
                        ))
                    }
                    (_, Some(pattern)) => vec![InputSource {
                        from: None,
                        pattern: Some(pattern),
                    }],
                    (_, None) => {
                        return Err(DeclarationError::invalid(
                            &name,
                            "filesystem inputs need an input pattern",
                        ))
                    }
                }
            } else {
                self.from
                    .iter()
                    .map(|from| InputSource {
                        from: Some(from.clone()),
                        pattern: pattern.clone(),
                    })
                    .collect()
            }
        };

        match self.kind {
            TaskKind::Originate => {
                if !sources.is_empty() || !self.after.is_empty() {
                    return Err(DeclarationError::invalid(
                        &name,
                        "originate tasks cannot have predecessors",
                    ));
                }
            }
            TaskKind::Product => {
                if sources.len() < 2 {
                    return Err(DeclarationError::invalid(
                        &name,
                        "product tasks need at least two input sources",
                    ));
                }
            }
            _ => {
                if sources.len() != 1 {
                    return Err(DeclarationError::invalid(
                        &name,
                        format!("{} tasks take exactly one input source", self.kind),
                    ));
                }
            }
        }

        if !matches!(self.kind, TaskKind::Originate | TaskKind::Merge)
            && sources.iter().any(|s| s.pattern.is_none())
        {
            return Err(DeclarationError::invalid(
                &name,
                format!("{} tasks need an input pattern", self.kind),
            ));
        }

        if self.kind == TaskKind::Product {
            let mut seen: HashSet<&str> = HashSet::new();
            for source in &sources {
                if let Some(pattern) = &source.pattern {
                    for field in pattern.names() {
                        if !seen.insert(field) {
                            return Err(DeclarationError::invalid(
                                &name,
                                format!("capture '{}' appears on more than one product input", field),
                            ));
                        }
                    }
                }
            }
        }

        if self.kind == TaskKind::Originate {
            if let Some((field, _)) = self.domain.iter().find(|(_, values)| values.is_empty()) {
                return Err(DeclarationError::invalid(
                    &name,
                    format!("domain field '{}' has no values", field),
                ));
            }
        } else if !self.domain.is_empty() {
            return Err(DeclarationError::invalid(
                &name,
                "only originate tasks take a domain",
            ));
        }

        let group_by = match (self.kind, self.group_by.as_deref(), self.group_fn) {
            (TaskKind::Collate, Some(_), Some(_)) => {
                return Err(DeclarationError::invalid(
                    &name,
                    "group_by template and key function are mutually exclusive",
                ))
            }
            (TaskKind::Collate, Some(template), None) => Some(GroupKey::Template(compile(template)?)),
            (TaskKind::Collate, None, Some(key)) => Some(GroupKey::Function(key)),
            (TaskKind::Collate, None, None) => {
                return Err(DeclarationError::invalid(&name, "collate tasks need group_by"))
            }
            (_, None, None) => None,
            _ => {
                return Err(DeclarationError::invalid(
                    &name,
                    "group_by is only valid on collate tasks",
                ))
            }
        };

        if self.outputs.is_empty() {
            return Err(DeclarationError::invalid(&name, "at least one output is required"));
        }
        let outputs = self
            .outputs
            .iter()
            .map(|o| compile(o))
            .collect::<Result<Vec<_>, _>>()?;
        let extra_inputs = self
            .extra_inputs
            .iter()
            .map(|t| compile(t))
            .collect::<Result<Vec<_>, _>>()?;
        let params_tuple = self
            .params_tuple
            .iter()
            .map(|t| compile(t))
            .collect::<Result<Vec<_>, _>>()?;

        let declaration = TaskDeclaration {
            name,
            kind: self.kind,
            sources,
            after: self.after,
            outputs,
            domain: self.domain,
            group_by,
            extra_inputs,
            params_tuple,
            mkdir: self.mkdir,
            commands: CommandTemplate::from_entries(&self.commands),
            resources: self.resources,
            params: self.params,
            single_input: self.single_input.unwrap_or(match self.kind {
                TaskKind::Merge => SingleInput::Clone,
                _ => SingleInput::Run,
            }),
            companions: self.companions,
            on_mismatch: self.on_mismatch,
        };

        validate_templates(&declaration)?;
        Ok(declaration)
    }
}

/// Check that output templates only reference fields the input side supplies
fn validate_templates(decl: &TaskDeclaration) -> Result<(), DeclarationError> {
    if decl.resources.threads == 0 {
        return Err(DeclarationError::invalid(&decl.name, "threads must be at least 1"));
    }

    let available: HashSet<String> = match (&decl.kind, &decl.group_by) {
        (TaskKind::Collate, Some(GroupKey::Template(key))) => {
            key.names().into_iter().map(String::from).collect()
        }
        _ => decl.available_fields(),
    };

    let check = |template: &Pattern, what: &str| -> Result<(), DeclarationError> {
        if template.has_wildcards() {
            return Err(DeclarationError::invalid(
                &decl.name,
                format!("{} '{}' cannot contain wildcards", what, template),
            ));
        }
        if let Some(field) = template.names().into_iter().find(|n| !available.contains(*n)) {
            return Err(DeclarationError::invalid(
                &decl.name,
                format!(
                    "{} '{}' references '{{{}}}', which the input pattern does not capture",
                    what, template, field
                ),
            ));
        }
        Ok(())
    };

    if decl.kind == TaskKind::Subdivide {
        if decl.outputs.len() != 1 {
            return Err(DeclarationError::invalid(
                &decl.name,
                "subdivide tasks declare exactly one output pattern",
            ));
        }
        let output = &decl.outputs[0];
        let unbound = output.names().into_iter().any(|n| !available.contains(n));
        if !unbound && !output.has_wildcards() {
            return Err(DeclarationError::invalid(
                &decl.name,
                format!(
                    "subdivide output '{}' must leave a capture or wildcard unbound",
                    output
                ),
            ));
        }
    } else {
        for output in &decl.outputs {
            check(output, "output")?;
        }
    }

    for template in &decl.extra_inputs {
        check(template, "extra input")?;
    }
    for template in &decl.params_tuple {
        check(template, "parameter tuple entry")?;
    }

    Ok(())
}

/// Explicit registry of task declarations, in declaration order
#[derive(Debug, Default, Clone)]
pub struct TaskRegistry {
    tasks: Vec<Arc<TaskDeclaration>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, declaration: TaskDeclaration) -> Result<(), DeclarationError> {
        if self.get(&declaration.name).is_some() {
            return Err(DeclarationError::Duplicate(declaration.name));
        }
        self.tasks.push(Arc::new(declaration));
        Ok(())
    }

    /// Build and register in one go
    pub fn add(&mut self, builder: TaskBuilder) -> Result<(), DeclarationError> {
        self.register(builder.build()?)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TaskDeclaration>> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TaskDeclaration>> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_template_splits_checkpoints() {
        let template = CommandTemplate::from_entries([
            "reaper -i %(infile)s; checkpoint; rename files",
            "gzip out",
        ]);
        assert_eq!(
            template.steps(),
            &["reaper -i %(infile)s", "rename files", "gzip out"]
        );
        assert_eq!(template.tokens(), vec!["infile"]);
    }

    #[test]
    fn test_build_transform() {
        let decl = TaskBuilder::transform("extract")
            .input("{sample}.fastq.gz")
            .output("demux/{sample}.umi.gz")
            .command("zcat %(infile)s > %(outfile)s")
            .threads(2)
            .build()
            .unwrap();

        assert_eq!(decl.kind, TaskKind::Transform);
        assert_eq!(decl.sources.len(), 1);
        assert!(decl.sources[0].from.is_none());
        assert_eq!(decl.resources.threads, 2);
        assert_eq!(decl.single_input, SingleInput::Run);
    }

    #[test]
    fn test_output_must_use_captured_fields() {
        let err = TaskBuilder::transform("t")
            .from("a")
            .input("{sample}.bam")
            .output("{track}.bed")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("{track}"));
    }

    #[test]
    fn test_transform_arity() {
        let err = TaskBuilder::transform("t")
            .from("a")
            .from("b")
            .input("{x}.bam")
            .output("{x}.bed")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("exactly one input source"));
    }

    #[test]
    fn test_originate_rules() {
        let decl = TaskBuilder::originate("methods")
            .domain("method", ["unique", "cluster"])
            .output("dedup_{method}.sentinel")
            .build()
            .unwrap();
        assert!(decl.predecessors().is_empty());

        assert!(TaskBuilder::originate("o")
            .after("x")
            .output("a.txt")
            .build()
            .is_err());
    }

    #[test]
    fn test_collate_requires_key() {
        assert!(TaskBuilder::collate("c")
            .from("a")
            .input("{sample}_R{rep}.bam")
            .output("{sample}.bam")
            .build()
            .is_err());

        let decl = TaskBuilder::collate("c")
            .from("a")
            .input("{sample}_R{rep}.bam")
            .group_by("{sample}")
            .output("{sample}.bam")
            .build()
            .unwrap();
        assert!(matches!(decl.group_by, Some(GroupKey::Template(_))));

        let err = TaskBuilder::collate("c")
            .from("a")
            .input("{sample}_R{rep}.bam")
            .group_by("{sample}")
            .output("{sample}_{rep}.bam")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("{rep}"));
    }

    #[test]
    fn test_subdivide_needs_unbound_output() {
        let decl = TaskBuilder::subdivide("demux")
            .from("extract")
            .input("demux/{lane}.umi.gz")
            .output("demux/{name}_{lane}.fastq.gz")
            .build()
            .unwrap();
        assert_eq!(decl.kind, TaskKind::Subdivide);

        assert!(TaskBuilder::subdivide("bad")
            .from("extract")
            .input("demux/{lane}.umi.gz")
            .output("demux/{lane}.fastq.gz")
            .build()
            .is_err());
    }

    #[test]
    fn test_product_rules() {
        let decl = TaskBuilder::product("dedup")
            .source(Some("map"), "mapping/{track}.bam")
            .source(Some("methods"), "dedup_{method}.sentinel")
            .output("dedup_{method}.dir/{track}.bam")
            .params_tuple(["{track}", "{method}"])
            .build()
            .unwrap();
        assert_eq!(decl.predecessors(), vec!["map", "methods"]);

        assert!(TaskBuilder::product("p")
            .source(Some("a"), "{x}.bam")
            .source(Some("b"), "{x}.bed")
            .output("{x}.out")
            .build()
            .is_err());
    }

    #[test]
    fn test_merge_defaults_to_clone() {
        let decl = TaskBuilder::merge("m")
            .from("a")
            .output("all.bam")
            .build()
            .unwrap();
        assert_eq!(decl.single_input, SingleInput::Clone);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = TaskRegistry::new();
        registry
            .add(TaskBuilder::originate("a").output("a.txt"))
            .unwrap();
        let err = registry
            .add(TaskBuilder::originate("a").output("b.txt"))
            .unwrap_err();
        assert!(matches!(err, DeclarationError::Duplicate(name) if name == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resource_hint_aliases() {
        let hints: ResourceHints =
            serde_yaml::from_str("{threads: 4, memory_class: 8G, serialization_group: db}").unwrap();
        assert_eq!(hints.threads, 4);
        assert_eq!(hints.memory.as_deref(), Some("8G"));
        assert_eq!(hints.serialize.as_deref(), Some("db"));
    }
}
