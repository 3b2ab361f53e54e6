// Materializer
// Expands task nodes into concrete work items from upstream outputs and the filesystem

use crate::declaration::{
    InputSource, OnMismatch, SingleInput, TaskDeclaration, TaskKind,
};
use crate::execution::graph::TaskNode;
use crate::execution::work_item::{Failure, FailureKind, JobKind, WorkItem, WorkItemId, WorkState};
use crate::pattern::{normalize_path_text, Fields, Pattern, PatternError};

use indexmap::IndexMap;
use thiserror::Error;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("output conflict: '{path}' is declared by both '{first}' and '{second}'")]
    OutputConflict {
        path: String,
        first: WorkItemId,
        second: WorkItemId,
    },

    #[error("task '{task}': {source}")]
    Discovery {
        task: String,
        #[source]
        source: PatternError,
    },
}

/// One upstream output offered to a consumer
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub producer: WorkItemId,
    /// The producing work item failed; the path must not be consumed
    pub failed: bool,
}

/// Everything one task produced in this run
#[derive(Debug, Clone, Default)]
pub struct NodeOutputs {
    pub candidates: Vec<Candidate>,
    /// Failed items whose outputs were never known (fan-out placeholders, blocked items)
    pub unresolved: Vec<WorkItemId>,
}

impl NodeOutputs {
    /// First failed producer, if any
    pub fn failure(&self) -> Option<&WorkItemId> {
        self.unresolved.first().or_else(|| {
            self.candidates
                .iter()
                .find(|c| c.failed)
                .map(|c| &c.producer)
        })
    }
}

/// The filesystem root plus the outputs each completed task registered
#[derive(Debug)]
pub struct FilesystemState {
    root: PathBuf,
    outputs: HashMap<String, NodeOutputs>,
    claims: HashMap<String, WorkItemId>,
}

impl FilesystemState {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            outputs: HashMap::new(),
            claims: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn outputs_of(&self, task: &str) -> Option<&NodeOutputs> {
        self.outputs.get(task)
    }

    /// Reserve the outputs of `items`; a path claimed by another item is a conflict
    pub fn claim(&mut self, items: &[WorkItem]) -> Result<(), MaterializeError> {
        for item in items {
            for output in &item.outputs {
                let path = normalize_path_text(output);
                match self.claims.get(&path) {
                    Some(owner) if *owner != item.id => {
                        return Err(MaterializeError::OutputConflict {
                            path,
                            first: owner.clone(),
                            second: item.id.clone(),
                        })
                    }
                    Some(_) => {}
                    None => {
                        self.claims.insert(path, item.id.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Register the final state of a task's items for downstream consumers
    pub fn record(&mut self, task: &str, items: &[WorkItem]) {
        let entry = self.outputs.entry(task.to_string()).or_default();
        for item in items {
            let failed = item.state == WorkState::Failed;
            if item.outputs.is_empty() {
                if failed {
                    entry.unresolved.push(item.id.clone());
                }
                continue;
            }
            for output in &item.outputs {
                entry.candidates.push(Candidate {
                    path: output.clone(),
                    producer: item.id.clone(),
                    failed,
                });
            }
        }
    }

    fn candidates(&self, task: &str, source: &InputSource) -> Result<Vec<Candidate>, MaterializeError> {
        match &source.from {
            Some(producer) => Ok(self
                .outputs_of(producer)
                .map(|o| o.candidates.clone())
                .unwrap_or_default()),
            None => {
                let Some(pattern) = &source.pattern else {
                    return Ok(Vec::new());
                };
                let found = pattern
                    .discover(&self.root)
                    .map_err(|source| MaterializeError::Discovery {
                        task: task.to_string(),
                        source,
                    })?;
                Ok(found
                    .into_iter()
                    .map(|path| Candidate {
                        producer: WorkItemId::from_outputs(std::slice::from_ref(&path)),
                        path,
                        failed: false,
                    })
                    .collect())
            }
        }
    }
}

/// A candidate that matched its input pattern
#[derive(Debug, Clone)]
struct Matched {
    candidate: Candidate,
    fields: Fields,
}

/// Expands task nodes into work items
pub struct Materializer;

impl Materializer {
    /// Materialize the work items of `node` against the current state.
    ///
    /// Items that cannot run (pattern errors, failed upstream items) come back
    /// already in the failed state.
    pub fn materialize(node: &TaskNode, state: &FilesystemState) -> Result<Vec<WorkItem>, MaterializeError> {
        let decl = &node.declaration;
        let mut items = Vec::new();

        let mut sides = Vec::with_capacity(decl.sources.len());
        for source in &decl.sources {
            let candidates = state.candidates(&decl.name, source)?;
            sides.push(Self::match_candidates(decl, source.pattern.as_ref(), candidates, &mut items));
        }

        match decl.kind {
            TaskKind::Originate => Self::originate(decl, &mut items),
            TaskKind::Transform | TaskKind::Subdivide => {
                for matched in sides.into_iter().flatten() {
                    Self::one_to_one(decl, matched, &mut items);
                }
            }
            TaskKind::Merge => {
                let all: Vec<Matched> = sides.into_iter().flatten().collect();
                if all.is_empty() {
                    tracing::debug!(task = %decl.name, "merge has no inputs, nothing to do");
                } else {
                    Self::fan_in(decl, all, None, &mut items);
                }
            }
            TaskKind::Collate => Self::collate(decl, sides.into_iter().flatten(), &mut items),
            TaskKind::Product => Self::product(decl, sides, &mut items),
        }

        Self::apply_blockers(node, state, &mut items);
        Self::check_conflicts(&items)?;

        tracing::debug!(task = %decl.name, items = items.len(), "materialized");
        Ok(items)
    }

    /// Concrete items for each output a finished fan-out placeholder produced
    pub fn expand_fan_out(
        placeholder: &WorkItem,
        state: &FilesystemState,
    ) -> Result<Vec<WorkItem>, MaterializeError> {
        let Some(pattern) = &placeholder.fan_out else {
            return Ok(Vec::new());
        };

        let found = pattern
            .discover(state.root())
            .map_err(|source| MaterializeError::Discovery {
                task: placeholder.task.name.clone(),
                source,
            })?;

        let members = found
            .into_iter()
            .map(|path| {
                let mut fields = placeholder.fields.clone();
                if let Some(captured) = pattern.matches(&path) {
                    for (k, v) in captured {
                        fields.entry(k).or_insert(v);
                    }
                }
                let mut member = WorkItem::new(
                    placeholder.task.clone(),
                    placeholder.inputs.clone(),
                    vec![path],
                    fields,
                );
                member.state = placeholder.state;
                member.staleness = placeholder.staleness.clone();
                member
            })
            .collect();

        Ok(members)
    }

    fn match_candidates(
        decl: &Arc<TaskDeclaration>,
        pattern: Option<&Pattern>,
        candidates: Vec<Candidate>,
        rejected: &mut Vec<WorkItem>,
    ) -> Vec<Matched> {
        let mut matched = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let fields = match pattern {
                None => Some(Fields::new()),
                Some(p) => p.matches(&candidate.path),
            };
            match (fields, decl.on_mismatch) {
                (Some(fields), _) => matched.push(Matched { candidate, fields }),
                (None, OnMismatch::Skip) => {
                    tracing::debug!(
                        task = %decl.name,
                        path = %candidate.path.display(),
                        "skipping input that does not match the input pattern"
                    );
                }
                (None, OnMismatch::Fail) => {
                    let err = PatternError::NoMatch {
                        path: normalize_path_text(&candidate.path),
                        pattern: pattern.map(|p| p.source().to_string()).unwrap_or_default(),
                    };
                    rejected.push(WorkItem::blocked(
                        decl.clone(),
                        &normalize_path_text(&candidate.path),
                        Failure::new(FailureKind::Pattern, err.to_string()),
                    ));
                }
            }
        }
        matched
    }

    fn originate(decl: &Arc<TaskDeclaration>, items: &mut Vec<WorkItem>) {
        let mut combos = vec![Fields::new()];
        for (field, values) in &decl.domain {
            combos = combos
                .into_iter()
                .flat_map(|base| {
                    values.iter().map(move |value| {
                        let mut fields = base.clone();
                        fields.insert(field.clone(), value.clone());
                        fields
                    })
                })
                .collect();
        }

        for fields in combos {
            match Self::render_all(&decl.outputs, &fields)
                .and_then(|outputs| Ok((outputs, Self::render_all(&decl.extra_inputs, &fields)?)))
            {
                Ok((outputs, extras)) => items.push(WorkItem::new(decl.clone(), extras, outputs, fields)),
                Err(err) => items.push(Self::pattern_failure(decl, &format!("{:?}", fields), err)),
            }
        }
    }

    fn one_to_one(decl: &Arc<TaskDeclaration>, matched: Matched, items: &mut Vec<WorkItem>) {
        let Matched { candidate, fields } = matched;
        let input_text = normalize_path_text(&candidate.path);

        let extras = match Self::render_all(&decl.extra_inputs, &fields) {
            Ok(extras) => extras,
            Err(err) => {
                items.push(Self::pattern_failure(decl, &input_text, err));
                return;
            }
        };
        let mut inputs = vec![candidate.path.clone()];
        inputs.extend(extras);

        let item = if decl.kind == TaskKind::Subdivide {
            match decl.outputs[0].render_partial(&fields) {
                Ok(fan_out) => WorkItem::placeholder(decl.clone(), inputs, fan_out, fields),
                Err(err) => {
                    items.push(Self::pattern_failure(decl, &input_text, err));
                    return;
                }
            }
        } else {
            match Self::render_all(&decl.outputs, &fields) {
                Ok(outputs) => WorkItem::new(decl.clone(), inputs, outputs, fields),
                Err(err) => {
                    items.push(Self::pattern_failure(decl, &input_text, err));
                    return;
                }
            }
        };

        items.push(Self::mark_upstream(item, std::slice::from_ref(&candidate)));
    }

    fn collate<I>(decl: &Arc<TaskDeclaration>, matched: I, items: &mut Vec<WorkItem>)
    where
        I: IntoIterator<Item = Matched>,
    {
        let Some(group_by) = &decl.group_by else {
            return;
        };

        let mut groups: IndexMap<String, Vec<Matched>> = IndexMap::new();
        for m in matched {
            match group_by.key(&m.fields) {
                Ok(key) => groups.entry(key).or_default().push(m),
                Err(err) => {
                    let input = normalize_path_text(&m.candidate.path);
                    items.push(Self::pattern_failure(decl, &input, err));
                }
            }
        }

        for (key, members) in groups {
            Self::fan_in(decl, members, Some(key), items);
        }
    }

    /// One item consuming every member (merge, or one collate group)
    fn fan_in(decl: &Arc<TaskDeclaration>, members: Vec<Matched>, key: Option<String>, items: &mut Vec<WorkItem>) {
        let mut fields = common_fields(members.iter().map(|m| &m.fields));
        if let Some(key) = &key {
            fields.entry("key".to_string()).or_insert_with(|| key.clone());
        }

        let cause = key.clone().unwrap_or_else(|| decl.name.clone());
        let rendered = Self::render_all(&decl.outputs, &fields)
            .and_then(|outputs| Ok((outputs, Self::render_all(&decl.extra_inputs, &fields)?)));
        let (outputs, extras) = match rendered {
            Ok(rendered) => rendered,
            Err(err) => {
                items.push(Self::pattern_failure(decl, &cause, err));
                return;
            }
        };

        let candidates: Vec<Candidate> = members.into_iter().map(|m| m.candidate).collect();
        let mut inputs: Vec<PathBuf> = candidates.iter().map(|c| c.path.clone()).collect();
        let single = inputs.len() == 1 && extras.is_empty();
        inputs.extend(extras);

        let mut item = WorkItem::new(decl.clone(), inputs, outputs, fields);
        if let Some(key) = key {
            item = item.with_key(key);
        }
        if single && decl.single_input == SingleInput::Clone {
            item = item.with_job(JobKind::Clone);
        }

        items.push(Self::mark_upstream(item, &candidates));
    }

    fn product(decl: &Arc<TaskDeclaration>, sides: Vec<Vec<Matched>>, items: &mut Vec<WorkItem>) {
        let mut combos: Vec<Vec<Matched>> = vec![Vec::new()];
        for side in &sides {
            combos = combos
                .into_iter()
                .flat_map(|prefix| {
                    side.iter().map(move |m| {
                        let mut combo = prefix.clone();
                        combo.push(m.clone());
                        combo
                    })
                })
                .collect();
        }
        if sides.iter().any(|s| s.is_empty()) {
            combos.clear();
        }

        for combo in combos {
            let mut fields = Fields::new();
            for m in &combo {
                for (k, v) in &m.fields {
                    fields.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }

            let cause = combo
                .iter()
                .map(|m| normalize_path_text(&m.candidate.path))
                .collect::<Vec<_>>()
                .join(" x ");

            let rendered = Self::render_all(&decl.outputs, &fields).and_then(|outputs| {
                let extras = Self::render_all(&decl.extra_inputs, &fields)?;
                let tuple = decl
                    .params_tuple
                    .iter()
                    .map(|t| t.render(&fields))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((outputs, extras, tuple))
            });
            let (outputs, extras, tuple) = match rendered {
                Ok(rendered) => rendered,
                Err(err) => {
                    items.push(Self::pattern_failure(decl, &cause, err));
                    continue;
                }
            };

            let candidates: Vec<Candidate> = combo.into_iter().map(|m| m.candidate).collect();
            let mut inputs: Vec<PathBuf> = candidates.iter().map(|c| c.path.clone()).collect();
            inputs.extend(extras);

            let item = WorkItem::new(decl.clone(), inputs, outputs, fields).with_params_tuple(tuple);
            items.push(Self::mark_upstream(item, &candidates));
        }
    }

    /// Fail every item if an ordering-only predecessor failed, and surface
    /// failed upstream placeholders whose outputs were never known.
    fn apply_blockers(node: &TaskNode, state: &FilesystemState, items: &mut Vec<WorkItem>) {
        let decl = &node.declaration;

        let ordering_failure = decl
            .after
            .iter()
            .filter_map(|a| state.outputs_of(a))
            .find_map(|o| o.failure().cloned());

        let unresolved: Vec<WorkItemId> = decl
            .sources
            .iter()
            .filter_map(|s| s.from.as_deref())
            .filter_map(|from| state.outputs_of(from))
            .flat_map(|o| o.unresolved.iter().cloned())
            .collect();

        let whole_task_blocked = match decl.kind {
            TaskKind::Merge | TaskKind::Collate | TaskKind::Product => {
                ordering_failure.clone().or_else(|| unresolved.first().cloned())
            }
            _ => ordering_failure.clone(),
        };

        if let Some(cause) = whole_task_blocked {
            for item in items.iter_mut().filter(|i| i.state != WorkState::Failed) {
                item.fail(Failure::upstream(&cause));
            }
            if items.is_empty() {
                items.push(WorkItem::blocked(decl.clone(), cause.as_str(), Failure::upstream(&cause)));
            }
            return;
        }

        for cause in unresolved {
            items.push(WorkItem::blocked(decl.clone(), cause.as_str(), Failure::upstream(&cause)));
        }
    }

    fn check_conflicts(items: &[WorkItem]) -> Result<(), MaterializeError> {
        let mut seen: HashMap<String, &WorkItemId> = HashMap::new();
        for item in items {
            for output in &item.outputs {
                let path = normalize_path_text(output);
                if let Some(first) = seen.insert(path.clone(), &item.id) {
                    return Err(MaterializeError::OutputConflict {
                        path,
                        first: first.clone(),
                        second: item.id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn mark_upstream(mut item: WorkItem, candidates: &[Candidate]) -> WorkItem {
        if let Some(failed) = candidates.iter().find(|c| c.failed) {
            item.fail(Failure::upstream(&failed.producer));
        }
        item
    }

    fn render_all(templates: &[Pattern], fields: &Fields) -> Result<Vec<PathBuf>, PatternError> {
        templates
            .iter()
            .map(|t| t.render(fields).map(PathBuf::from))
            .collect()
    }

    fn pattern_failure(decl: &Arc<TaskDeclaration>, cause: &str, err: PatternError) -> WorkItem {
        tracing::warn!(task = %decl.name, cause, error = %err, "cannot materialize work item");
        WorkItem::blocked(
            decl.clone(),
            cause,
            Failure::new(FailureKind::Pattern, err.to_string()),
        )
    }
}

/// Fields captured with the same value by every member
fn common_fields<'a, I>(all: I) -> Fields
where
    I: IntoIterator<Item = &'a Fields>,
{
    let mut iter = all.into_iter();
    let mut common = match iter.next() {
        Some(first) => first.clone(),
        None => return Fields::new(),
    };
    for fields in iter {
        common.retain(|k, v| fields.get(k) == Some(v));
    }
    common
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::{TaskBuilder, TaskRegistry};
    use crate::execution::graph::TaskGraph;
    use tempfile::TempDir;

    fn graph(builders: Vec<TaskBuilder>) -> TaskGraph {
        let mut registry = TaskRegistry::new();
        for b in builders {
            registry.add(b).unwrap();
        }
        TaskGraph::build(&registry).unwrap()
    }

    fn done(task: &Arc<TaskDeclaration>, outputs: &[&str]) -> Vec<WorkItem> {
        outputs
            .iter()
            .map(|o| {
                let mut item = WorkItem::new(task.clone(), vec![], vec![PathBuf::from(o)], Fields::new());
                item.state = WorkState::Done;
                item
            })
            .collect()
    }

    fn paths(item: &WorkItem) -> Vec<String> {
        item.inputs.iter().map(|p| normalize_path_text(p)).collect()
    }

    #[test]
    fn test_transform_from_filesystem() {
        let temp = TempDir::new().unwrap();
        for name in ["a.fastq.gz", "b.fastq.gz", "readme.md"] {
            std::fs::write(temp.path().join(name), "x").unwrap();
        }
        let g = graph(vec![TaskBuilder::transform("extract")
            .input("{sample}.fastq.gz")
            .output("demux/{sample}.umi.gz")
            .extra_input("{sample}.meta")]);
        let state = FilesystemState::new(temp.path());

        let items = Materializer::materialize(g.get("extract").unwrap(), &state).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].outputs, vec![PathBuf::from("demux/a.umi.gz")]);
        assert_eq!(paths(&items[0]), vec!["a.fastq.gz", "a.meta"]);
        assert_eq!(items[1].fields["sample"], "b");
    }

    #[test]
    fn test_collate_groups_by_key() {
        let g = graph(vec![
            TaskBuilder::originate("bams").output("seed"),
            TaskBuilder::collate("pool")
                .from("bams")
                .input("{sample}_R{rep}.bam")
                .group_by("{sample}")
                .output("{sample}.pooled.bam")
                .command("samtools merge %(outfile)s %(infiles)s"),
        ]);
        let mut state = FilesystemState::new("/tmp");
        let bams = g.get("bams").unwrap().declaration.clone();
        state.record("bams", &done(&bams, &["a_R1.bam", "a_R2.bam", "b_R1.bam"]));

        let items = Materializer::materialize(g.get("pool").unwrap(), &state).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(paths(&items[0]), vec!["a_R1.bam", "a_R2.bam"]);
        assert_eq!(paths(&items[1]), vec!["b_R1.bam"]);
        assert_eq!(items[0].key.as_deref(), Some("a"));
        assert_eq!(items[0].job, JobKind::Commands);
        assert_eq!(items[1].outputs, vec![PathBuf::from("b.pooled.bam")]);
    }

    #[test]
    fn test_merge_single_input_clones() {
        let g = graph(vec![
            TaskBuilder::originate("src").output("seed"),
            TaskBuilder::merge("all")
                .from("src")
                .input("{name}.bam")
                .output("merged.bam"),
        ]);
        let mut state = FilesystemState::new("/tmp");
        let src = g.get("src").unwrap().declaration.clone();
        state.record("src", &done(&src, &["only.bam"]));

        let items = Materializer::materialize(g.get("all").unwrap(), &state).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].job, JobKind::Clone);
        assert_eq!(items[0].fields["name"], "only");
    }

    #[test]
    fn test_merge_without_inputs_creates_nothing() {
        let g = graph(vec![
            TaskBuilder::originate("src").output("seed"),
            TaskBuilder::merge("all").from("src").output("merged.bam"),
        ]);
        let mut state = FilesystemState::new("/tmp");
        state.record("src", &[]);

        let items = Materializer::materialize(g.get("all").unwrap(), &state).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_product_cross_join() {
        let g = graph(vec![
            TaskBuilder::originate("map").output("seed1"),
            TaskBuilder::originate("methods").output("seed2"),
            TaskBuilder::product("dedup")
                .source(Some("map"), "mapping/{track}.bam")
                .source(Some("methods"), "dedup_{method}.sentinel")
                .output("dedup_{method}.dir/{track}.bam")
                .params_tuple(["{track}", "{method}"]),
        ]);
        let mut state = FilesystemState::new("/tmp");
        let map = g.get("map").unwrap().declaration.clone();
        let methods = g.get("methods").unwrap().declaration.clone();
        state.record("map", &done(&map, &["mapping/ctrl.bam", "mapping/flag.bam"]));
        state.record(
            "methods",
            &done(&methods, &["dedup_unique.sentinel", "dedup_cluster.sentinel"]),
        );

        let items = Materializer::materialize(g.get("dedup").unwrap(), &state).unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].outputs, vec![PathBuf::from("dedup_unique.dir/ctrl.bam")]);
        assert_eq!(items[1].params_tuple, vec!["ctrl", "cluster"]);
        assert_eq!(paths(&items[3]), vec!["mapping/flag.bam", "dedup_cluster.sentinel"]);
    }

    #[test]
    fn test_originate_domain() {
        let g = graph(vec![TaskBuilder::originate("methods")
            .domain("method", ["unique", "cluster"])
            .domain("rep", ["1", "2"])
            .output("dedup_{method}_{rep}.sentinel")]);
        let state = FilesystemState::new("/tmp");

        let items = Materializer::materialize(g.get("methods").unwrap(), &state).unwrap();
        let outputs: Vec<_> = items.iter().map(|i| i.id.to_string()).collect();
        assert_eq!(
            outputs,
            vec![
                "dedup_unique_1.sentinel",
                "dedup_unique_2.sentinel",
                "dedup_cluster_1.sentinel",
                "dedup_cluster_2.sentinel"
            ]
        );
        assert!(items.iter().all(|i| i.inputs.is_empty()));
    }

    #[test]
    fn test_failed_upstream_marks_only_dependents() {
        let g = graph(vec![
            TaskBuilder::originate("src").output("seed"),
            TaskBuilder::transform("next")
                .from("src")
                .input("{x}.txt")
                .output("{x}.out"),
        ]);
        let mut state = FilesystemState::new("/tmp");
        let src = g.get("src").unwrap().declaration.clone();
        let mut produced = done(&src, &["a.txt", "b.txt"]);
        produced[0].fail(Failure::new(FailureKind::StepExecution, "exit 1"));
        state.record("src", &produced);

        let items = Materializer::materialize(g.get("next").unwrap(), &state).unwrap();
        assert_eq!(items[0].state, WorkState::Failed);
        assert_eq!(items[0].failure.as_ref().unwrap().kind, FailureKind::UpstreamFailed);
        assert_eq!(items[1].state, WorkState::Pending);
    }

    #[test]
    fn test_ordering_predecessor_failure_blocks_task() {
        let g = graph(vec![
            TaskBuilder::originate("load").output("load.done"),
            TaskBuilder::originate("seed").output("seed.txt"),
            TaskBuilder::merge("report")
                .from("seed")
                .after("load")
                .output("report.txt"),
        ]);
        let mut state = FilesystemState::new("/tmp");
        let load = g.get("load").unwrap().declaration.clone();
        let seed = g.get("seed").unwrap().declaration.clone();
        let mut failed = done(&load, &["load.done"]);
        failed[0].fail(Failure::new(FailureKind::StepExecution, "exit 1"));
        state.record("load", &failed);
        state.record("seed", &[]);

        let items = Materializer::materialize(g.get("report").unwrap(), &state).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].state, WorkState::Failed);

        state.record("seed", &done(&seed, &["seed.txt"]));
        let items = Materializer::materialize(g.get("report").unwrap(), &state).unwrap();
        assert_eq!(items[0].outputs, vec![PathBuf::from("report.txt")]);
        assert_eq!(items[0].state, WorkState::Failed);
    }

    #[test]
    fn test_mismatch_policy() {
        let build = |policy| {
            graph(vec![
                TaskBuilder::originate("src").output("seed"),
                TaskBuilder::transform("next")
                    .from("src")
                    .input("{x}_cluster.bam")
                    .output("{x}.bed")
                    .on_mismatch(policy),
            ])
        };

        for (policy, expected_failed) in [(OnMismatch::Skip, 0), (OnMismatch::Fail, 1)] {
            let g = build(policy);
            let mut state = FilesystemState::new("/tmp");
            let src = g.get("src").unwrap().declaration.clone();
            state.record("src", &done(&src, &["a_cluster.bam", "a_unique.bam"]));

            let items = Materializer::materialize(g.get("next").unwrap(), &state).unwrap();
            let failed = items.iter().filter(|i| i.state == WorkState::Failed).count();
            assert_eq!(failed, expected_failed);
            assert!(items.iter().any(|i| i.outputs == vec![PathBuf::from("a.bed")]));
        }
    }

    #[test]
    fn test_conflicting_outputs_within_task() {
        let g = graph(vec![
            TaskBuilder::originate("src").output("seed"),
            TaskBuilder::transform("flatten")
                .from("src")
                .input("{dir}/{name}.txt")
                .output("{name}.out"),
        ]);
        let mut state = FilesystemState::new("/tmp");
        let src = g.get("src").unwrap().declaration.clone();
        state.record("src", &done(&src, &["x/a.txt", "y/a.txt"]));

        let err = Materializer::materialize(g.get("flatten").unwrap(), &state).unwrap_err();
        assert!(matches!(err, MaterializeError::OutputConflict { path, .. } if path == "a.out"));
    }

    #[test]
    fn test_claims_across_tasks() {
        let g = graph(vec![
            TaskBuilder::originate("a").output("one.txt"),
            TaskBuilder::originate("b").domain("n", ["one"]).output("{n}.txt"),
        ]);
        let mut state = FilesystemState::new("/tmp");
        let first = Materializer::materialize(g.get("a").unwrap(), &state).unwrap();
        state.claim(&first).unwrap();
        state.claim(&first).unwrap();

        let mut second = Materializer::materialize(g.get("b").unwrap(), &state).unwrap();
        second[0].id = WorkItemId::blocked("b", "other");
        assert!(matches!(
            state.claim(&second),
            Err(MaterializeError::OutputConflict { .. })
        ));
    }

    #[test]
    fn test_subdivide_two_phases() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("L1.umi"), "x").unwrap();
        let g = graph(vec![TaskBuilder::subdivide("demux")
            .input("{lane}.umi")
            .output("demux/{name}_{lane}.fq")]);
        let state = FilesystemState::new(temp.path());

        let items = Materializer::materialize(g.get("demux").unwrap(), &state).unwrap();
        assert_eq!(items.len(), 1);
        let placeholder = &items[0];
        assert!(placeholder.is_placeholder());
        assert_eq!(placeholder.id.as_str(), "demux/{name}_L1.fq");

        std::fs::create_dir(temp.path().join("demux")).unwrap();
        for name in ["ctrl_L1.fq", "flag_L1.fq", "ctrl_L2.fq"] {
            std::fs::write(temp.path().join("demux").join(name), "x").unwrap();
        }

        let members = Materializer::expand_fan_out(placeholder, &state).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].outputs, vec![PathBuf::from("demux/ctrl_L1.fq")]);
        assert_eq!(members[0].fields["lane"], "L1");
        assert_eq!(members[1].fields["name"], "flag");
    }

    #[test]
    fn test_failed_placeholder_blocks_consumers() {
        let g = graph(vec![
            TaskBuilder::subdivide("demux")
                .input("{lane}.umi")
                .output("demux/{name}_{lane}.fq"),
            TaskBuilder::transform("map")
                .from("demux")
                .input("demux/{name}_{lane}.fq")
                .output("mapped/{name}_{lane}.bam"),
        ]);
        let mut state = FilesystemState::new("/tmp");
        let demux = g.get("demux").unwrap().declaration.clone();
        let mut placeholder = WorkItem::placeholder(
            demux,
            vec![PathBuf::from("L1.umi")],
            Pattern::compile("demux/{name}_L1.fq").unwrap(),
            Fields::new(),
        );
        placeholder.fail(Failure::new(FailureKind::StepExecution, "exit 2"));
        state.record("demux", &[placeholder]);

        let items = Materializer::materialize(g.get("map").unwrap(), &state).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].state, WorkState::Failed);
        assert_eq!(items[0].id.as_str(), "map <- demux/{name}_L1.fq");
    }
}
