// Freshness Oracle
// Decides from file timestamps whether a work item must run

use crate::execution::work_item::WorkItem;
use crate::pattern::normalize_path_text;

use serde::{Deserialize, Serialize};

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// How an output whose timestamp equals its newest input is judged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TiePolicy {
    /// Equal timestamps count as up to date
    #[default]
    Fresh,
    Stale,
}

/// Result of a freshness check, with the reason an item is stale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Staleness {
    Fresh,
    MissingOutput { path: String },
    OutdatedOutput { output: String, input: String },
    TimestampTie { output: String, input: String },
    MissingInput { path: String },
    UpstreamStale { input: String },
    Forced,
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Staleness::Fresh)
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staleness::Fresh => write!(f, "up to date"),
            Staleness::MissingOutput { path } => write!(f, "output {} is missing", path),
            Staleness::OutdatedOutput { output, input } => {
                write!(f, "output {} is older than input {}", output, input)
            }
            Staleness::TimestampTie { output, input } => {
                write!(f, "output {} has the same timestamp as input {}", output, input)
            }
            Staleness::MissingInput { path } => write!(f, "input {} is missing", path),
            Staleness::UpstreamStale { input } => {
                write!(f, "input {} is being rebuilt upstream", input)
            }
            Staleness::Forced => write!(f, "forced"),
        }
    }
}

/// Outputs of upstream work items that are stale, running or rebuilt in this run
#[derive(Debug, Clone, Default)]
pub struct UpstreamState {
    rebuilt: HashSet<String>,
}

impl UpstreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, path: &Path) {
        self.rebuilt.insert(normalize_path_text(path));
    }

    pub fn mark_item(&mut self, item: &WorkItem) {
        for output in &item.outputs {
            self.mark(output);
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.rebuilt.contains(&normalize_path_text(path))
    }

    pub fn is_empty(&self) -> bool {
        self.rebuilt.is_empty()
    }
}

/// Pure timestamp-based staleness check against the filesystem under `root`
#[derive(Debug, Clone, Copy)]
pub struct FreshnessOracle<'a> {
    root: &'a Path,
    policy: TiePolicy,
    upstream: &'a UpstreamState,
}

impl<'a> FreshnessOracle<'a> {
    pub fn new(root: &'a Path, policy: TiePolicy, upstream: &'a UpstreamState) -> Self {
        Self {
            root,
            policy,
            upstream,
        }
    }

    pub fn is_stale(&self, item: &WorkItem) -> bool {
        self.check(item).is_stale()
    }

    /// Explain why `item` is stale, or report it fresh.
    ///
    /// Reads timestamps only; never touches the filesystem otherwise.
    pub fn check(&self, item: &WorkItem) -> Staleness {
        let outputs: Vec<PathBuf> = match &item.fan_out {
            Some(pattern) => match pattern.discover(self.root) {
                Ok(found) if !found.is_empty() => found,
                _ => {
                    return Staleness::MissingOutput {
                        path: pattern.source().to_string(),
                    }
                }
            },
            None => item.outputs.clone(),
        };

        let mut oldest_output: Option<(SystemTime, &Path)> = None;
        for output in &outputs {
            match modified(&self.root.join(output)) {
                Some(time) => {
                    if oldest_output.map_or(true, |(t, _)| time < t) {
                        oldest_output = Some((time, output));
                    }
                }
                None => {
                    return Staleness::MissingOutput {
                        path: normalize_path_text(output),
                    }
                }
            }
        }

        if let Some(input) = item.inputs.iter().find(|i| self.upstream.contains(i)) {
            return Staleness::UpstreamStale {
                input: normalize_path_text(input),
            };
        }

        let mut newest_input: Option<(SystemTime, &Path)> = None;
        for input in &item.inputs {
            match modified(&self.root.join(input)) {
                Some(time) => {
                    if newest_input.map_or(true, |(t, _)| time > t) {
                        newest_input = Some((time, input));
                    }
                }
                None => {
                    return Staleness::MissingInput {
                        path: normalize_path_text(input),
                    }
                }
            }
        }

        match (oldest_output, newest_input) {
            (Some((out_time, output)), Some((in_time, input))) => {
                if out_time < in_time {
                    Staleness::OutdatedOutput {
                        output: normalize_path_text(output),
                        input: normalize_path_text(input),
                    }
                } else if out_time == in_time && self.policy == TiePolicy::Stale {
                    Staleness::TimestampTie {
                        output: normalize_path_text(output),
                        input: normalize_path_text(input),
                    }
                } else {
                    Staleness::Fresh
                }
            }
            _ => Staleness::Fresh,
        }
    }
}

/// Modification time, or `None` if the path does not exist
pub fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
