// Configuration
// Layered parameters and engine settings, frozen into an immutable EngineConfig

use crate::execution::freshness::TiePolicy;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use thiserror::Error;

use std::path::{Path, PathBuf};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid YAML in config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid parameter assignment '{0}', expected KEY=VALUE")]
    InvalidAssignment(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Flat mapping from parameter name to value.
///
/// Nested YAML sections are flattened with `_`, so `reads: { bc_pattern: X }`
/// becomes `reads_bc_pattern = X`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(IndexMap<String, String>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Overlay `other` on top of this set
    pub fn extend(&mut self, other: &Parameters) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Flatten a YAML mapping into parameters
    pub fn from_yaml(value: &Value) -> Result<Self, ConfigError> {
        let mut params = Self::default();
        match value {
            Value::Null => {}
            Value::Mapping(_) => flatten_into(&mut params, "", value)?,
            other => {
                return Err(ConfigError::Invalid(format!(
                    "parameters must be a mapping, found {}",
                    yaml_type_name(other)
                )))
            }
        }
        Ok(params)
    }

    /// Load a YAML parameter file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&value)
    }

    /// Parse a `key=value` command line assignment
    pub fn parse_assignment(text: &str) -> Result<(String, String), ConfigError> {
        match text.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(ConfigError::InvalidAssignment(text.to_string())),
        }
    }
}

fn flatten_into(params: &mut Parameters, prefix: &str, value: &Value) -> Result<(), ConfigError> {
    match value {
        Value::Mapping(map) => {
            for (key, nested) in map {
                let key = scalar_text(key).ok_or_else(|| {
                    ConfigError::Invalid(format!("parameter keys must be scalars (under '{}')", prefix))
                })?;
                let name = if prefix.is_empty() {
                    key
                } else {
                    format!("{}_{}", prefix, key)
                };
                flatten_into(params, &name, nested)?;
            }
        }
        Value::Sequence(items) => {
            let parts: Option<Vec<String>> = items.iter().map(scalar_text).collect();
            let parts = parts.ok_or_else(|| {
                ConfigError::Invalid(format!("parameter '{}' must be a list of scalars", prefix))
            })?;
            params.insert(prefix, parts.join(","));
        }
        Value::Tagged(tagged) => flatten_into(params, prefix, &tagged.value)?,
        scalar => {
            params.insert(prefix, scalar_text(scalar).unwrap_or_default());
        }
    }
    Ok(())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn yaml_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Where work item steps execute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Local,
    Queue,
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(RunMode::Local),
            "queue" => Ok(RunMode::Queue),
            _ => Err(format!("unknown run mode: {} (expected local or queue)", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    #[default]
    Sge,
    Slurm,
}

/// Batch queue submission settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSettings {
    pub kind: QueueKind,
    /// Queue (SGE) or partition (Slurm) name
    pub queue: Option<String>,
    /// SGE parallel environment used for multi-threaded jobs
    pub parallel_environment: String,
    /// SGE resource name used for the memory request
    pub memory_resource: String,
    pub extra_options: Vec<String>,
    /// Override for the submit binary (`qsub` / `sbatch`)
    pub submit_command: Option<String>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            kind: QueueKind::Sge,
            queue: None,
            parallel_environment: "smp".to_string(),
            memory_resource: "mem_free".to_string(),
            extra_options: Vec::new(),
            submit_command: None,
        }
    }
}

impl QueueSettings {
    pub fn submit_program(&self) -> &str {
        match (&self.submit_command, self.kind) {
            (Some(cmd), _) => cmd,
            (None, QueueKind::Sge) => "qsub",
            (None, QueueKind::Slurm) => "sbatch",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FreshnessSettings {
    pub equal_timestamps: TiePolicy,
}

/// Engine-level settings from the pipeline file's `settings:` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Global concurrency limit
    pub max_jobs: usize,
    pub mode: RunMode,
    pub shell: String,
    pub work_dir: Option<PathBuf>,
    /// Holds checkpoints, logs and the last run report
    pub state_dir: PathBuf,
    pub freshness: FreshnessSettings,
    /// Group name to concurrent limit. A group that is not listed here has a
    /// limit of 1, so its items run one at a time; list it with a larger value
    /// to let more of them overlap. A limit of 0 is rejected.
    pub serialization_groups: IndexMap<String, usize>,
    pub queue: QueueSettings,
    /// Local mode only: an item occupies as many slots as it requests threads
    pub weight_by_threads: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_jobs: default_max_jobs(),
            mode: RunMode::Local,
            shell: "sh".to_string(),
            work_dir: None,
            state_dir: PathBuf::from(".sluice"),
            freshness: FreshnessSettings::default(),
            serialization_groups: IndexMap::new(),
            queue: QueueSettings::default(),
            weight_by_threads: false,
        }
    }
}

fn default_max_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Immutable configuration for one run, shared behind an `Arc`
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub settings: EngineSettings,
    pub params: Parameters,
    /// Absolute directory all relative paths are resolved against
    pub work_dir: PathBuf,
}

impl EngineConfig {
    pub fn new(settings: EngineSettings, params: Parameters, work_dir: PathBuf) -> Self {
        Self {
            settings,
            params,
            work_dir,
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.work_dir.join(&self.settings.state_dir)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.state_dir().join("checkpoints")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }

    pub fn report_path(&self) -> PathBuf {
        self.state_dir().join("last-run.json")
    }

    /// Concurrent limit for a serialization group, 1 unless configured
    pub fn group_limit(&self, group: &str) -> usize {
        self.settings
            .serialization_groups
            .get(group)
            .copied()
            .unwrap_or(1)
            .max(1)
    }
}

/// Builds an EngineConfig from layered sources, later layers winning
#[derive(Debug, Default)]
pub struct ConfigLoader {
    settings: EngineSettings,
    params: Parameters,
    work_dir: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Location of the per-user parameter file
    pub fn user_params_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sluice").join("params.yml"))
    }

    /// Layer the per-user parameter file, if one exists
    pub fn with_user_params(self) -> Result<Self, ConfigError> {
        match Self::user_params_path() {
            Some(path) if path.is_file() => {
                tracing::debug!(path = %path.display(), "loading user parameters");
                self.with_params_file(&path)
            }
            _ => Ok(self),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_params(mut self, params: &Parameters) -> Self {
        self.params.extend(params);
        self
    }

    pub fn with_params_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        let params = Parameters::from_file(path)?;
        tracing::debug!(path = %path.display(), count = params.len(), "layered parameter file");
        self.params.extend(&params);
        Ok(self)
    }

    pub fn with_assignment(mut self, assignment: &str) -> Result<Self, ConfigError> {
        let (key, value) = Parameters::parse_assignment(assignment)?;
        self.params.insert(key, value);
        Ok(self)
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        if self.settings.max_jobs == 0 {
            return Err(ConfigError::Invalid("max_jobs must be at least 1".to_string()));
        }
        if let Some((group, _)) = self
            .settings
            .serialization_groups
            .iter()
            .find(|(_, limit)| **limit == 0)
        {
            return Err(ConfigError::Invalid(format!(
                "serialization group '{}' has a limit of 0",
                group
            )));
        }

        let base = match self.work_dir.or_else(|| self.settings.work_dir.clone()) {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(|source| ConfigError::Io {
                path: PathBuf::from("."),
                source,
            })?,
        };
        let work_dir = base.canonicalize().map_err(|source| ConfigError::Io {
            path: base.clone(),
            source,
        })?;

        Ok(EngineConfig::new(self.settings, self.params, work_dir))
    }
}
