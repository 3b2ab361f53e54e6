//! Failures stay local to their branch, checkpoints skip completed steps,
//! and serialization groups keep items apart.

mod common;

use common::{registry, Workspace};
use sluice_engine::execution::MaterializeError;
use sluice_engine::{
    CheckpointLedger, EngineError, EngineSettings, FailureKind, ItemAction, RunOptions,
    TaskBuilder, WorkState,
};

#[tokio::test]
async fn failed_item_only_blocks_its_own_dependents() {
    let ws = Workspace::new();
    ws.write("a.txt", "a\n");
    ws.write("b.txt", "b\n");
    let tasks = registry(vec![
        TaskBuilder::transform("check")
            .input("{name}.txt")
            .output("checked/{name}.txt")
            .command("test %(name)s != a")
            .command("cp %(infile)s %(outfile)s"),
        TaskBuilder::transform("finish")
            .from("check")
            .input("checked/{name}.txt")
            .output("final/{name}.txt")
            .command("cp %(infile)s %(outfile)s"),
    ]);

    let report = ws.run(&tasks).await;
    assert!(!report.success());

    let failed = report.find("checked/a.txt").unwrap();
    let failure = failed.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::StepExecution);
    assert_eq!(failure.step_index, Some(0));
    assert!(failure.diagnostic.contains("exit status 1"));

    let blocked: Vec<_> = report
        .items
        .iter()
        .filter(|i| i.task == "finish" && i.state == WorkState::Failed)
        .collect();
    assert_eq!(blocked.len(), 1);
    assert_eq!(
        blocked[0].failure.as_ref().unwrap().kind,
        FailureKind::UpstreamFailed
    );

    assert_eq!(report.find("final/b.txt").unwrap().state, WorkState::Done);
    assert_eq!(ws.read("final/b.txt"), "b\n");
    assert!(!ws.exists("final/a.txt"));
}

#[tokio::test]
async fn rerun_after_failure_resumes_at_the_failed_step() {
    let ws = Workspace::new();
    ws.write("data.in", "payload\n");
    let tasks = registry(vec![TaskBuilder::transform("three_steps")
        .input("{name}.in")
        .output("{name}.out")
        .command("echo 1 >> trace.log")
        .command("echo 2 >> trace.log")
        .command("test -f go && echo 3 >> trace.log && cp %(infile)s %(outfile)s")]);

    let first = ws.run(&tasks).await;
    assert!(!first.success());
    assert_eq!(
        first.find("data.out").unwrap().failure.as_ref().unwrap().step_index,
        Some(2)
    );
    assert_eq!(ws.read("trace.log"), "1\n2\n");

    let ledger = CheckpointLedger::open(ws.config.checkpoint_dir()).unwrap();
    let records = ledger.list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].resume_point(), 2);

    ws.write("go", "");
    let second = ws.run(&tasks).await;
    assert!(second.success());
    assert_eq!(second.find("data.out").unwrap().action, ItemAction::Resumed);
    assert_eq!(ws.read("trace.log"), "1\n2\n3\n");
    assert_eq!(ws.read("data.out"), "payload\n");

    let ledger = CheckpointLedger::open(ws.config.checkpoint_dir()).unwrap();
    assert!(ledger.list().unwrap().is_empty());
}

#[tokio::test]
async fn serialization_group_never_runs_members_together() {
    let ws = Workspace::with_settings(EngineSettings {
        max_jobs: 4,
        ..Default::default()
    });
    for name in ["a", "b", "c", "d"] {
        ws.write(&format!("{}.csv", name), name);
    }
    // mkdir fails if another member holds the lock
    let tasks = registry(vec![TaskBuilder::transform("load")
        .input("{table}.csv")
        .output("loaded/{table}.done")
        .serialize("db")
        .command("mkdir db.lock")
        .command("sleep 0.2; rmdir db.lock; cp %(infile)s %(outfile)s")]);

    let report = ws.run(&tasks).await;
    assert!(report.success(), "{}", report.to_terminal());
    assert_eq!(report.executed_count(), 4);
}

#[tokio::test]
async fn unresolved_parameter_fails_before_spawning() {
    let ws = Workspace::new();
    ws.write("x.txt", "x");
    let tasks = registry(vec![TaskBuilder::transform("needs_param")
        .input("{name}.txt")
        .output("{name}.out")
        .command("touch spawned")
        .command("echo %(genome)s > %(outfile)s")]);

    let report = ws.run(&tasks).await;
    let failure = report.find("x.out").unwrap().failure.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::UnresolvedParameter);
    assert_eq!(failure.step_index, Some(1));
    assert!(!ws.exists("spawned"));
}

#[tokio::test]
async fn sibling_branch_completes_when_the_other_fails() {
    let ws = Workspace::new();
    let tasks = registry(vec![
        TaskBuilder::originate("source")
            .output("source.txt")
            .command("echo data > %(outfile)s"),
        TaskBuilder::transform("left")
            .from("source")
            .input("{name}.txt")
            .output("{name}.left")
            .command("exit 3"),
        TaskBuilder::transform("right")
            .from("source")
            .input("{name}.txt")
            .output("{name}.right")
            .command("cp %(infile)s %(outfile)s"),
        TaskBuilder::transform("after_left")
            .from("left")
            .input("{name}.left")
            .output("{name}.done")
            .command("cp %(infile)s %(outfile)s"),
    ]);

    let report = ws.run(&tasks).await;
    assert!(!report.success());
    assert_eq!(report.find("source.left").unwrap().state, WorkState::Failed);
    assert_eq!(report.find("source.right").unwrap().state, WorkState::Done);
    assert_eq!(ws.read("source.right"), "data\n");

    let blocked = report.items.iter().find(|i| i.task == "after_left").unwrap();
    assert_eq!(blocked.state, WorkState::Failed);
    assert_eq!(blocked.action, ItemAction::NotRun);
}

#[tokio::test]
async fn clashing_outputs_abort_before_anything_runs() {
    let ws = Workspace::new();
    ws.write("x.txt", "x\n");
    let tasks = registry(vec![
        TaskBuilder::transform("first")
            .input("{name}.txt")
            .output("clash/{name}.out")
            .command("touch spawned")
            .command("cp %(infile)s %(outfile)s"),
        TaskBuilder::transform("second")
            .input("{name}.txt")
            .output("clash/{name}.out")
            .command("touch spawned")
            .command("cp %(infile)s %(outfile)s"),
    ]);

    let result = ws.try_run(&tasks, RunOptions::default()).await;
    match result {
        Err(EngineError::Materialize(MaterializeError::OutputConflict { path, .. })) => {
            assert_eq!(path, "clash/x.out");
        }
        other => panic!("expected an output conflict, got {:?}", other.map(|r| r.success())),
    }
    assert!(!ws.exists("spawned"));
    assert!(!ws.exists("clash/x.out"));
}
