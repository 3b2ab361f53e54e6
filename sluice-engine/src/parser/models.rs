// Pipeline file data models
// Raw YAML shape of a pipeline file, before declarations are validated

use crate::config::{EngineSettings, Parameters};
use crate::declaration::{OnMismatch, ResourceHints, SingleInput, TaskKind, TaskRegistry};

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// Root of a pipeline file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineFile {
    pub name: Option<String>,

    #[serde(default)]
    pub settings: EngineSettings,

    /// Global parameters; nested sections are flattened
    #[serde(default)]
    pub params: serde_yaml::Value,

    pub tasks: Vec<TaskSpec>,
}

/// One task entry as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    pub name: String,
    pub kind: TaskKind,

    /// Producing task(s)
    #[serde(default, deserialize_with = "one_or_many")]
    pub from: Vec<String>,

    /// Ordering-only predecessors
    #[serde(default, deserialize_with = "one_or_many")]
    pub after: Vec<String>,

    pub input: Option<String>,

    /// Explicit input sides (product)
    #[serde(default)]
    pub inputs: Vec<InputSpec>,

    pub output: Option<String>,

    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub domain: IndexMap<String, Vec<String>>,

    pub group_by: Option<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub extra_inputs: Vec<String>,

    #[serde(default)]
    pub params_tuple: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub mkdir: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub commands: Vec<String>,

    #[serde(default)]
    pub resources: ResourceHints,

    #[serde(default)]
    pub params: serde_yaml::Value,

    pub single_input: Option<SingleInput>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub companions: Vec<String>,

    #[serde(default)]
    pub on_mismatch: OnMismatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSpec {
    pub from: Option<String>,
    pub pattern: String,
}

/// A parsed and validated pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,
    pub settings: EngineSettings,
    pub params: Parameters,
    pub tasks: TaskRegistry,
}

/// Accept either a single string or a list of strings
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
        OneOrMany::Nothing(()) => Vec::new(),
    })
}
