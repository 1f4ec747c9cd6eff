// tests/manager.rs

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use pipefleet::errors::FleetError;
use pipefleet::exec::JobRequest;
use pipefleet::manager::{AccessPolicy, Manager, ManagerOptions, OwnerOrAdmin};
use pipefleet::pipeline::Library;
use pipefleet::run::{Run, RunState};
use pipefleet_test_utils::builders::{
    LibraryBuilder, MethodBuilder, PipelineBuilder, config_in, from_input, from_step, trivial,
};
use pipefleet_test_utils::scripted_scheduler::ScriptedScheduler;
use pipefleet_test_utils::{init_tracing, with_timeout, write_file};
use tempfile::TempDir;

fn library(dir: &TempDir) -> Library {
    let driver = write_file(dir.path(), "count.sh", "#!/bin/sh\n");
    let method = MethodBuilder::new("count")
        .driver(driver)
        .input("text")
        .output("counts")
        .build();
    let pipeline = PipelineBuilder::new("wordcount")
        .input("x")
        .method_step("count", &method, vec![trivial(from_input(0))])
        .output("y", trivial(from_step(0, 0)))
        .build();
    LibraryBuilder::new().method(&method).pipeline(&pipeline).build()
}

fn input_file(dir: &TempDir) -> PathBuf {
    write_file(dir.path(), "input.csv", "word\nhello\n")
}

fn driver(req: &JobRequest) -> i32 {
    fs::write(req.args.last().unwrap(), "word,count\nhello,1\n").unwrap();
    0
}

fn manager(dir: &TempDir, sched: &ScriptedScheduler, admins: &[&str]) -> Manager {
    init_tracing();
    let mut cfg = config_in(dir.path(), library(dir));
    cfg.manager.admins = admins.iter().map(|s| s.to_string()).collect();
    Manager::new(&cfg, sched.as_backend()).unwrap()
}

#[tokio::test]
async fn test_poll_once_starts_drives_and_retires_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let sched = ScriptedScheduler::new();
    let mut mgr = manager(&dir, &sched, &[]);

    let ds = mgr.register_dataset("x", &input_file(&dir)).unwrap();
    let run = mgr.enqueue_run("wordcount", vec![ds], "alice", 1).unwrap();
    assert!(!mgr.is_idle());
    assert_eq!(mgr.archive().run(run).unwrap().state, RunState::Pending);

    mgr.poll_once().await.unwrap();
    assert!(mgr.foreman(run).is_some());
    assert_eq!(mgr.progress(run).unwrap().summary, "+-.");

    sched.run_all(driver);
    mgr.poll_once().await.unwrap();

    assert!(mgr.foreman(run).is_none(), "finished foreman is retired");
    assert!(mgr.is_idle());
    assert_eq!(mgr.archive().run(run).unwrap().state, RunState::Successful);
}

#[tokio::test]
async fn test_enqueue_rejects_unknown_pipeline_and_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let sched = ScriptedScheduler::new();
    let mut mgr = manager(&dir, &sched, &[]);

    let err = mgr.enqueue_run("nope", vec![], "alice", 1).unwrap_err();
    assert!(matches!(err, FleetError::UnknownPipeline(ref n) if n == "nope"));

    let err = mgr
        .enqueue_run("wordcount", vec![pipefleet::archive::DatasetId(99)], "alice", 1)
        .unwrap_err();
    assert!(matches!(err, FleetError::UnknownDataset(99)));

    let err = mgr
        .register_dataset("x", &dir.path().join("missing.csv"))
        .unwrap_err();
    assert!(matches!(err, FleetError::InvalidInput(_)));
}

#[tokio::test]
async fn test_only_owner_or_admin_may_stop() {
    let dir = tempfile::tempdir().unwrap();
    let sched = ScriptedScheduler::new();
    let mut mgr = manager(&dir, &sched, &["root"]);
    let ds = mgr.register_dataset("x", &input_file(&dir)).unwrap();
    let run = mgr.enqueue_run("wordcount", vec![ds], "alice", 1).unwrap();
    mgr.poll_once().await.unwrap();

    let err = mgr.request_stop(run, "mallory").await.unwrap_err();
    assert!(matches!(err, FleetError::PermissionDenied(_)), "got {err:?}");
    assert_eq!(mgr.archive().run(run).unwrap().state, RunState::Running);

    mgr.request_stop(run, "root").await.unwrap();
    let r = mgr.archive().run(run).unwrap();
    assert_eq!(r.state, RunState::Cancelled);
    assert_eq!(r.stopped_by.as_deref(), Some("root"));
    assert_eq!(sched.cancels().len(), 3);
    assert!(mgr.foreman(run).is_none());

    // Stopping again is a no-op.
    mgr.request_stop(run, "alice").await.unwrap();
    assert_eq!(mgr.archive().run(run).unwrap().state, RunState::Cancelled);
}

#[tokio::test]
async fn test_stopping_a_pending_run_cancels_it_without_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let sched = ScriptedScheduler::new();
    let mut mgr = manager(&dir, &sched, &[]);
    let ds = mgr.register_dataset("x", &input_file(&dir)).unwrap();
    let run = mgr.enqueue_run("wordcount", vec![ds], "alice", 1).unwrap();

    mgr.request_stop(run, "alice").await.unwrap();
    assert_eq!(mgr.archive().run(run).unwrap().state, RunState::Cancelled);

    mgr.poll_once().await.unwrap();
    assert!(sched.submissions().is_empty());
    assert!(mgr.is_idle());
}

#[tokio::test]
async fn test_sub_runs_cannot_be_stopped_directly() {
    let dir = tempfile::tempdir().unwrap();
    let sched = ScriptedScheduler::new();
    init_tracing();

    let driver_path = write_file(dir.path(), "m.sh", "#!/bin/sh\n");
    let method = MethodBuilder::new("m")
        .driver(driver_path)
        .input("a")
        .output("b")
        .build();
    let inner = PipelineBuilder::new("inner")
        .input("a")
        .method_step("only", &method, vec![trivial(from_input(0))])
        .output("b", trivial(from_step(0, 0)))
        .build();
    let outer = PipelineBuilder::new("outer")
        .input("x")
        .pipeline_step("wrapped", &inner, vec![trivial(from_input(0))])
        .output("y", trivial(from_step(0, 0)))
        .build();
    let lib = LibraryBuilder::new()
        .method(&method)
        .pipeline(&inner)
        .pipeline(&outer)
        .build();
    let mut mgr = Manager::new(&config_in(dir.path(), lib), sched.as_backend()).unwrap();

    let ds = mgr.register_dataset("x", &input_file(&dir)).unwrap();
    let run = mgr.enqueue_run("outer", vec![ds], "alice", 1).unwrap();
    mgr.poll_once().await.unwrap();
    let child = mgr.archive().run(run).unwrap().steps[0].child_run.unwrap();

    let err = mgr.request_stop(child, "alice").await.unwrap_err();
    assert!(matches!(err, FleetError::InvalidInput(_)));

    // Stopping the top-level run settles the sub-run too.
    mgr.request_stop(run, "alice").await.unwrap();
    assert_eq!(mgr.archive().run(child).unwrap().state, RunState::Cancelled);
    assert_eq!(mgr.progress(run).unwrap().summary, "(!-!)-!");
}

#[tokio::test]
async fn test_set_priority_reaches_the_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    let sched = ScriptedScheduler::new();
    let mut mgr = manager(&dir, &sched, &[]);
    let ds = mgr.register_dataset("x", &input_file(&dir)).unwrap();
    let run = mgr.enqueue_run("wordcount", vec![ds], "alice", 1).unwrap();
    mgr.poll_once().await.unwrap();

    mgr.set_priority(run, 9).unwrap();
    assert_eq!(mgr.archive().run(run).unwrap().priority, 9);
    mgr.poll_once().await.unwrap();

    let calls = sched.priority_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, 9);
}

#[tokio::test]
async fn test_fatal_submission_error_stops_run_and_is_returned() {
    let dir = tempfile::tempdir().unwrap();
    let sched = ScriptedScheduler::new();
    let mut mgr = manager(&dir, &sched, &[]);
    let ds = mgr.register_dataset("x", &input_file(&dir)).unwrap();
    let run = mgr.enqueue_run("wordcount", vec![ds], "alice", 1).unwrap();
    sched.fail_submissions(true);

    let err = mgr.poll_once().await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(mgr.archive().run(run).unwrap().state, RunState::Cancelled);
}

#[tokio::test]
async fn test_custom_access_policy_is_consulted() {
    struct NobodyStops;
    impl AccessPolicy for NobodyStops {
        fn may_stop(&self, _user: &str, _run: &Run) -> bool {
            false
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let sched = ScriptedScheduler::new();
    let mut mgr = manager(&dir, &sched, &[]).with_access_policy(Box::new(NobodyStops));
    let ds = mgr.register_dataset("x", &input_file(&dir)).unwrap();
    let run = mgr.enqueue_run("wordcount", vec![ds], "alice", 1).unwrap();

    let err = mgr.request_stop(run, "alice").await.unwrap_err();
    assert!(matches!(err, FleetError::PermissionDenied(_)));
}

#[test]
fn test_owner_or_admin_policy() {
    let mut archive = pipefleet::archive::Archive::new();
    let dir = tempfile::tempdir().unwrap();
    let pipeline = library(&dir).pipeline("wordcount").unwrap();
    let ds = archive.add_dataset("x", "00".into(), None, None);
    let id = archive.create_run(pipeline, vec![ds], "alice", 1).unwrap();
    let run = archive.run(id).unwrap();

    let policy = OwnerOrAdmin::new(vec!["root".to_string()]);
    assert!(policy.may_stop("alice", run));
    assert!(policy.may_stop("root", run));
    assert!(!policy.may_stop("bob", run));
}

#[tokio::test]
async fn test_exit_when_idle_leaves_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let sched = ScriptedScheduler::new();
    let mut mgr = manager(&dir, &sched, &[]).with_options(ManagerOptions {
        exit_when_idle: true,
    });

    with_timeout(mgr.run()).await.unwrap();
}

#[tokio::test]
async fn test_requests_through_handle_drive_a_run_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let sched = ScriptedScheduler::new();
    let mut mgr = manager(&dir, &sched, &[]);
    let handle = mgr.handle();
    let input = input_file(&dir);

    let client = {
        let sched = sched.clone();
        tokio::spawn(async move {
            let ds = handle.register_dataset("x", input).await.unwrap();
            let run = handle.enqueue_run("wordcount", vec![ds], "alice", 2).await.unwrap();
            handle.set_priority(run, 4).await.unwrap();
            loop {
                sched.run_all(driver);
                let progress = handle.progress(run).await.unwrap();
                if progress.state.is_terminal() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let err = handle.request_stop(run, "mallory").await.unwrap_err();
            assert!(matches!(err, FleetError::PermissionDenied(_)));
            handle.shutdown().await.unwrap();
            run
        })
    };

    with_timeout(mgr.run()).await.unwrap();
    let run = client.await.unwrap();

    let r = mgr.archive().run(run).unwrap();
    assert_eq!(r.state, RunState::Successful);
    assert_eq!(r.priority, 4);
    assert!(mgr.is_idle());
}
