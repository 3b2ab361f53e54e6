// Scheduler
// Walks the task graph level by level and dispatches stale work items

use crate::config::{EngineConfig, RunMode};
use crate::error::{EngineError, EngineResult};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::freshness::{FreshnessOracle, Staleness, UpstreamState};
use crate::execution::graph::{TaskGraph, TaskNode};
use crate::execution::materializer::{FilesystemState, Materializer};
use crate::execution::report::{ItemAction, ItemReport, RunReport};
use crate::execution::work_item::{Failure, FailureKind, WorkItem, WorkState};
use crate::runners::{JobRunner, Outcome};

use chrono::Utc;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Per-run switches
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Report what is stale without executing anything
    pub dry_run: bool,
    /// Tasks whose items are treated as stale
    pub force: HashSet<String>,
    /// Restrict the run to these tasks and their predecessors
    pub targets: Vec<String>,
}

/// A work item with what the run did to it
#[derive(Debug)]
struct Slot {
    item: WorkItem,
    action: ItemAction,
    elapsed: Duration,
}

impl Slot {
    fn new(item: WorkItem) -> Self {
        Self {
            item,
            action: ItemAction::NotRun,
            elapsed: Duration::ZERO,
        }
    }
}

/// Drives one run of a task graph.
///
/// Levels are separated by a strict barrier: every item of a level is terminal
/// before the next level is materialized.
pub struct Scheduler {
    config: Arc<EngineConfig>,
    runner: Arc<JobRunner>,
    options: RunOptions,
    pipeline: String,
    event_tx: Option<ProgressSender>,
}

impl Scheduler {
    pub fn new(config: Arc<EngineConfig>, runner: Arc<JobRunner>) -> Self {
        Self {
            config,
            runner,
            options: RunOptions::default(),
            pipeline: "pipeline".to_string(),
            event_tx: None,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Pipeline name used in events and the report
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.pipeline = name.into();
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run the graph.
    ///
    /// Structural problems (unknown targets, output conflicts) abort with an
    /// error; item failures are recorded in the report and only stop their
    /// dependents.
    pub async fn run(&self, graph: &TaskGraph) -> EngineResult<RunReport> {
        let restricted;
        let graph = if self.options.targets.is_empty() {
            graph
        } else {
            restricted = graph.restrict_to(&self.options.targets)?;
            &restricted
        };

        let dry_run = self.options.dry_run;
        let clock = Instant::now();
        let mut report = RunReport::new(&self.pipeline, Utc::now(), dry_run);

        tracing::info!(pipeline = %self.pipeline, tasks = graph.len(), dry_run, "run started");
        self.event_tx.send_event(ExecutionEvent::run_started(
            &self.pipeline,
            graph.len(),
            dry_run,
        ));

        let mut state = FilesystemState::new(&self.config.work_dir);
        let mut upstream = UpstreamState::new();
        let global = Arc::new(Semaphore::new(self.config.settings.max_jobs.max(1)));
        let mut groups: HashMap<String, Arc<Semaphore>> = HashMap::new();

        for (level_index, level) in graph.levels().into_iter().enumerate() {
            let names: Vec<String> = level.iter().map(|n| n.name().to_string()).collect();
            tracing::info!(level = level_index, tasks = ?names, "level started");
            self.event_tx.send_event(ExecutionEvent::LevelStarted {
                level: level_index,
                tasks: names,
            });

            let mut slots = Vec::new();
            for node in &level {
                if !dry_run {
                    self.create_dirs(node).await?;
                }
                let items = Materializer::materialize(node, &state)?;
                state.claim(&items)?;
                slots.extend(items.into_iter().map(Slot::new));
            }

            {
                let oracle = FreshnessOracle::new(
                    &self.config.work_dir,
                    self.config.settings.freshness.equal_timestamps,
                    &upstream,
                );
                for slot in slots.iter_mut() {
                    self.classify(slot, &oracle);
                }
            }
            for slot in slots.iter().filter(|s| s.item.state == WorkState::Stale) {
                upstream.mark_item(&slot.item);
            }

            for node in &level {
                let mine = slots.iter().filter(|s| s.item.task.name == node.name());
                let (items, stale) = mine.fold((0, 0), |(n, s), slot| {
                    (n + 1, s + usize::from(slot.item.state == WorkState::Stale))
                });
                self.event_tx.send_event(ExecutionEvent::TaskMaterialized {
                    task: node.name().to_string(),
                    items,
                    stale,
                });
            }

            if !dry_run {
                self.dispatch(&mut slots, &global, &mut groups).await;
            }

            let members = self.expand_fan_outs(&slots, &state, &mut upstream)?;
            let member_items: Vec<WorkItem> = members.iter().map(|s| s.item.clone()).collect();
            state.claim(&member_items)?;
            slots.extend(members);

            for node in &level {
                let items: Vec<WorkItem> = slots
                    .iter()
                    .filter(|s| s.item.task.name == node.name())
                    .map(|s| s.item.clone())
                    .collect();
                state.record(node.name(), &items);
            }

            for slot in &slots {
                report.push(ItemReport::from_item(&slot.item, slot.action, slot.elapsed));
            }
        }

        report.finish(Utc::now());
        let failed = report.failed().count();
        tracing::info!(
            pipeline = %self.pipeline,
            items = report.items.len(),
            executed = report.executed_count(),
            failed,
            "run finished"
        );
        self.event_tx.send_event(ExecutionEvent::RunCompleted {
            pipeline: self.pipeline.clone(),
            success: report.success(),
            duration: clock.elapsed(),
            executed: report.executed_count(),
            failed,
        });

        if !dry_run {
            let path = self.config.report_path();
            if let Err(e) = report.write_json(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "could not write run report");
                self.event_tx.send_event(ExecutionEvent::warning(
                    format!("could not write run report {}: {}", path.display(), e),
                    None,
                ));
            }
        }

        Ok(report)
    }

    async fn create_dirs(&self, node: &TaskNode) -> EngineResult<()> {
        for dir in &node.declaration.mkdir {
            let path = self.config.work_dir.join(dir);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| EngineError::io(&path, e))?;
            tracing::debug!(task = %node.name(), path = %path.display(), "created directory");
            self.event_tx.send_event(ExecutionEvent::info(
                format!("created directory {}", dir),
                Some(node.name().to_string()),
            ));
        }
        Ok(())
    }

    /// Decide pending -> stale or pending -> done (fresh)
    fn classify(&self, slot: &mut Slot, oracle: &FreshnessOracle<'_>) {
        let item = &mut slot.item;
        let task = item.task.name.clone();

        if item.state == WorkState::Failed {
            slot.action = ItemAction::NotRun;
            if let Some(failure) = &item.failure {
                tracing::warn!(task = %task, item = %item.id, reason = %failure.diagnostic, "not run");
                self.event_tx.send_event(ExecutionEvent::item_failed(
                    &task,
                    item.id.clone(),
                    failure.clone(),
                ));
            }
            return;
        }

        let staleness = if self.options.force.contains(&task) {
            Staleness::Forced
        } else {
            oracle.check(item)
        };

        if staleness.is_stale() {
            tracing::debug!(task = %task, item = %item.id, reason = %staleness, "stale");
            item.state = WorkState::Stale;
            slot.action = ItemAction::WouldRun;
            self.event_tx.send_event(ExecutionEvent::ItemStale {
                task,
                item: item.id.clone(),
                reason: staleness.to_string(),
            });
        } else {
            tracing::debug!(task = %task, item = %item.id, "up to date");
            item.state = WorkState::Done;
            slot.action = ItemAction::UpToDate;
            self.event_tx.send_event(ExecutionEvent::ItemSkipped {
                task,
                item: item.id.clone(),
            });
        }
        item.staleness = Some(staleness);
    }

    /// Slots an item occupies in the global pool
    fn weight(&self, item: &WorkItem) -> u32 {
        let settings = &self.config.settings;
        if settings.weight_by_threads && settings.mode == RunMode::Local {
            let cap = u32::try_from(settings.max_jobs).unwrap_or(u32::MAX);
            item.task.resources.threads.clamp(1, cap.max(1))
        } else {
            1
        }
    }

    /// Run every stale slot, bounded by the global pool and serialization groups
    async fn dispatch(
        &self,
        slots: &mut [Slot],
        global: &Arc<Semaphore>,
        groups: &mut HashMap<String, Arc<Semaphore>>,
    ) {
        let mut jobs = JoinSet::new();

        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.item.state != WorkState::Stale {
                continue;
            }
            slot.item.state = WorkState::Running;

            let group = slot.item.task.resources.serialize.as_ref().map(|name| {
                groups
                    .entry(name.clone())
                    .or_insert_with(|| Arc::new(Semaphore::new(self.config.group_limit(name))))
                    .clone()
            });
            let weight = self.weight(&slot.item);
            let global = global.clone();
            let runner = self.runner.clone();
            let item = slot.item.clone();

            jobs.spawn(async move {
                // Group first, so a queued group member does not sit on a global slot
                let _group_permit = match group {
                    Some(group) => group.acquire_owned().await.ok(),
                    None => None,
                };
                let _permit = global.acquire_many_owned(weight).await.ok();

                let start = Instant::now();
                let outcome = runner.execute(&item).await;
                (index, outcome, start.elapsed())
            });
        }

        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((index, outcome, elapsed)) => self.settle(&mut slots[index], outcome, elapsed),
                Err(e) => tracing::error!(error = %e, "job task ended abnormally"),
            }
        }

        for slot in slots.iter_mut().filter(|s| s.item.state == WorkState::Running) {
            let failure = Failure::new(FailureKind::StepExecution, "job task ended abnormally");
            self.event_tx.send_event(ExecutionEvent::error(
                format!("job for {} ended abnormally", slot.item.id),
                Some(slot.item.task.name.clone()),
            ));
            self.event_tx.send_event(ExecutionEvent::item_failed(
                &slot.item.task.name,
                slot.item.id.clone(),
                failure.clone(),
            ));
            slot.action = ItemAction::Executed;
            slot.item.fail(failure);
        }
    }

    /// Apply a job outcome: running -> done | failed
    fn settle(&self, slot: &mut Slot, outcome: Outcome, elapsed: Duration) {
        slot.elapsed = elapsed;
        let task = slot.item.task.name.clone();

        match outcome {
            Outcome::Completed {
                resumed_from,
                cloned,
            } => {
                slot.item.state = WorkState::Done;
                slot.action = if cloned {
                    ItemAction::Cloned
                } else if resumed_from > 0 {
                    ItemAction::Resumed
                } else {
                    ItemAction::Executed
                };
                tracing::info!(task = %task, item = %slot.item.id, elapsed = ?elapsed, "item done");
                self.event_tx.send_event(ExecutionEvent::ItemCompleted {
                    task,
                    item: slot.item.id.clone(),
                    duration: elapsed,
                    cloned,
                });
            }
            Outcome::Failed(failure) => {
                slot.action = if failure.kind == FailureKind::UnresolvedParameter {
                    ItemAction::NotRun
                } else {
                    ItemAction::Executed
                };
                tracing::warn!(
                    task = %task,
                    item = %slot.item.id,
                    step = ?failure.step_index,
                    kind = %failure.kind,
                    "item failed"
                );
                self.event_tx.send_event(ExecutionEvent::item_failed(
                    &task,
                    slot.item.id.clone(),
                    failure.clone(),
                ));
                slot.item.fail(failure);
            }
        }
    }

    /// Second materialization phase for subdivide placeholders
    fn expand_fan_outs(
        &self,
        slots: &[Slot],
        state: &FilesystemState,
        upstream: &mut UpstreamState,
    ) -> EngineResult<Vec<Slot>> {
        let mut members = Vec::new();

        for slot in slots {
            let placeholder = &slot.item;
            if !placeholder.is_placeholder() || placeholder.state == WorkState::Failed {
                continue;
            }

            let expanded = Materializer::expand_fan_out(placeholder, state)?;
            tracing::debug!(
                task = %placeholder.task.name,
                placeholder = %placeholder.id,
                members = expanded.len(),
                "fan-out expanded"
            );
            self.event_tx.send_event(ExecutionEvent::FanOutExpanded {
                task: placeholder.task.name.clone(),
                placeholder: placeholder.id.clone(),
                members: expanded.len(),
            });
            if expanded.is_empty() {
                tracing::warn!(task = %placeholder.task.name, placeholder = %placeholder.id, "fan-out produced no outputs");
                self.event_tx.send_event(ExecutionEvent::warning(
                    format!("{} produced no outputs", placeholder.id),
                    Some(placeholder.task.name.clone()),
                ));
            }

            let rebuilt = placeholder.staleness.as_ref().is_some_and(Staleness::is_stale);
            for member in expanded {
                if rebuilt {
                    upstream.mark_item(&member);
                }
                members.push(Slot {
                    item: member,
                    action: ItemAction::Discovered,
                    elapsed: Duration::ZERO,
                });
            }
        }

        Ok(members)
    }
}
