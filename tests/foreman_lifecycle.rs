// tests/foreman_lifecycle.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pipefleet::archive::{Archive, DatasetId, RunId};
use pipefleet::exec::JobRequest;
use pipefleet::foreman::{Foreman, ForemanSettings};
use pipefleet::pipeline::{Library, Pipeline};
use pipefleet::run::{ComponentKey, ComponentState, FailureStage, RunState, progress_string};
use pipefleet_test_utils::builders::{
    LibraryBuilder, MethodBuilder, PipelineBuilder, config_in, from_input, from_step, trivial,
    wired,
};
use pipefleet_test_utils::init_tracing;
use pipefleet_test_utils::scripted_scheduler::ScriptedScheduler;
use tempfile::TempDir;

const TABLE: &str = "a,b\n1,2\n";

/// Write an (unused) driver script so setup has something to copy.
fn driver_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
    path
}

/// Driver behaviour for the scripted scheduler: write `TABLE` to every
/// output path (the arguments after the inputs) and exit 0.
fn write_outputs(inputs: usize) -> impl FnMut(&JobRequest) -> i32 {
    move |req: &JobRequest| {
        for out in req.args.iter().skip(inputs) {
            fs::write(out, TABLE).unwrap();
        }
        0
    }
}

struct Fixture {
    dir: TempDir,
    archive: Archive,
    sched: ScriptedScheduler,
    library: Library,
    input: DatasetId,
}

impl Fixture {
    /// One step `count` reading input `x`, one pipeline output `y`.
    fn single_step() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let method = MethodBuilder::new("count")
            .driver(driver_file(dir.path(), "count.sh"))
            .input("text")
            .output_with_columns("counts", 2)
            .threads(2)
            .build();
        let pipeline = PipelineBuilder::new("wordcount")
            .input("x")
            .method_step("count", &method, vec![trivial(from_input(0))])
            .output("y", trivial(from_step(0, 0)))
            .build();
        let library = LibraryBuilder::new().method(&method).pipeline(&pipeline).build();
        Self::with_library(dir, library)
    }

    fn with_library(dir: TempDir, library: Library) -> Self {
        let input_path = dir.path().join("input.csv");
        fs::write(&input_path, TABLE).unwrap();
        let mut archive = Archive::new();
        let input = archive.register_dataset("x", &input_path).unwrap();
        Self {
            dir,
            archive,
            sched: ScriptedScheduler::new(),
            library,
            input,
        }
    }

    fn pipeline(&self, name: &str) -> Arc<Pipeline> {
        self.library.pipeline(name).unwrap()
    }

    fn settings(&self) -> ForemanSettings {
        ForemanSettings::from_config(&config_in(self.dir.path(), self.library.clone())).unwrap()
    }

    fn foreman(&mut self, pipeline: &str) -> Foreman {
        let p = self.pipeline(pipeline);
        let run = self
            .archive
            .create_run(p, vec![self.input], "alice", 1)
            .unwrap();
        Foreman::new(run, self.sched.as_backend(), self.settings())
    }

    fn progress(&self, run: RunId) -> String {
        progress_string(&self.archive, run).unwrap()
    }
}

#[tokio::test]
async fn test_single_step_run_submits_three_jobs_and_succeeds() {
    let mut fx = Fixture::single_step();
    let mut foreman = fx.foreman("wordcount");
    let run = foreman.run_id();

    foreman.start_run(&mut fx.archive).await.unwrap();
    assert_eq!(fx.progress(run), "+-.");

    let subs = fx.sched.submissions();
    assert_eq!(subs.len(), 3, "setup, driver and bookkeeping");
    let (setup, setup_req) = &subs[0];
    let (driver, driver_req) = &subs[1];
    let (_, bookkeeping_req) = &subs[2];

    assert!(setup_req.name.starts_with("setup_step1_"));
    assert_eq!(setup_req.program, PathBuf::from("pipefleet"));
    assert_eq!(setup_req.args[0..2], ["worker".to_string(), "setup".to_string()]);
    assert!(setup_req.args[2].ends_with("task.toml"));

    assert!(driver_req.name.starts_with("driver_step1_"));
    assert_eq!(driver_req.after_success, vec![*setup]);
    assert_eq!(driver_req.cpus, 2);
    assert_eq!(driver_req.args.len(), 2);
    assert!(driver_req.args[0].ends_with("input_data/text"));
    assert!(driver_req.args[1].ends_with("output_data/counts"));
    assert!(driver_req.program.ends_with("count.sh"));

    assert!(bookkeeping_req.name.starts_with("bookkeeping_step1_"));
    assert_eq!(bookkeeping_req.after_completion, vec![*driver]);
    assert!(bookkeeping_req.after_success.is_empty());

    let ran = fx.sched.run_all(write_outputs(1));
    assert_eq!(ran, 3);
    foreman.monitor_queue(&mut fx.archive).await.unwrap();

    assert!(foreman.is_finished());
    let r = fx.archive.run(run).unwrap();
    assert_eq!(r.state, RunState::Successful);
    assert_eq!(fx.progress(run), "*-*");

    // The retained output is archived under archive_root.
    let outputs = r.output_datasets().unwrap();
    let ds = fx.archive.dataset(outputs[0]).unwrap();
    let location = ds.location.clone().expect("output archived");
    assert!(location.starts_with(fx.dir.path().join("archive")));
    assert_eq!(fs::read_to_string(location).unwrap(), TABLE);

    // The driver's accounting landed in the step's execution log.
    let step = r.record(&ComponentKey::Step { run, step: 0 }).unwrap();
    assert!(!step.reused);
    let log = fx.archive.exec_log(step.exec_log.unwrap()).unwrap();
    assert_eq!(log.return_code, Some(0));
    assert!(!log.recovery);
    assert!(log.is_successful());
}

#[tokio::test]
async fn test_second_identical_run_is_fully_reused() {
    let mut fx = Fixture::single_step();
    let mut first = fx.foreman("wordcount");
    first.start_run(&mut fx.archive).await.unwrap();
    fx.sched.run_all(write_outputs(1));
    first.monitor_queue(&mut fx.archive).await.unwrap();
    assert!(first.is_finished());
    let submitted = fx.sched.submissions().len();

    let mut second = fx.foreman("wordcount");
    let run = second.run_id();
    second.start_run(&mut fx.archive).await.unwrap();

    assert!(second.is_finished(), "a fully reusable run finishes on start");
    assert_eq!(fx.sched.submissions().len(), submitted);
    let r = fx.archive.run(run).unwrap();
    assert_eq!(r.state, RunState::Successful);
    let step = r.record(&ComponentKey::Step { run, step: 0 }).unwrap();
    assert!(step.reused);
    assert_eq!(
        r.output_datasets(),
        fx.archive.run(first.run_id()).unwrap().output_datasets()
    );
}

#[tokio::test]
async fn test_failing_driver_fails_the_run() {
    let mut fx = Fixture::single_step();
    let mut foreman = fx.foreman("wordcount");
    let run = foreman.run_id();
    foreman.start_run(&mut fx.archive).await.unwrap();

    // Driver exits non-zero without writing anything; bookkeeping still runs.
    fx.sched.run_all(|_| 1);
    foreman.monitor_queue(&mut fx.archive).await.unwrap();

    assert!(foreman.is_finished());
    let r = fx.archive.run(run).unwrap();
    assert_eq!(r.state, RunState::Failed);
    let step = r.record(&ComponentKey::Step { run, step: 0 }).unwrap();
    assert_eq!(step.state, ComponentState::Failed);
    assert_eq!(step.failure, Some(FailureStage::Driver));
    assert_eq!(
        r.record(&ComponentKey::OutputCable { run, output: 0 })
            .unwrap()
            .state,
        ComponentState::Cancelled
    );
    assert_eq!(fx.progress(run), "!-!");
}

#[tokio::test]
async fn test_output_failing_content_check_fails_bookkeeping() {
    let mut fx = Fixture::single_step();
    let mut foreman = fx.foreman("wordcount");
    let run = foreman.run_id();
    foreman.start_run(&mut fx.archive).await.unwrap();

    // Three columns where the method declares two.
    fx.sched.run_all(|req| {
        fs::write(&req.args[1], "a,b,c\n1,2,3\n").unwrap();
        0
    });
    foreman.monitor_queue(&mut fx.archive).await.unwrap();

    let r = fx.archive.run(run).unwrap();
    assert_eq!(r.state, RunState::Failed);
    let step = r.record(&ComponentKey::Step { run, step: 0 }).unwrap();
    assert_eq!(step.failure, Some(FailureStage::Bookkeeping));
}

#[tokio::test]
async fn test_setup_failure_cancels_remaining_jobs() {
    let mut fx = Fixture::single_step();
    let mut foreman = fx.foreman("wordcount");
    let run = foreman.run_id();
    foreman.start_run(&mut fx.archive).await.unwrap();

    let subs = fx.sched.submissions();
    let (setup, driver, bookkeeping) = (subs[0].0, subs[1].0, subs[2].0);
    fx.sched.set_exit(setup, pipefleet::exec::JobState::Failed, Some(1));
    foreman.monitor_queue(&mut fx.archive).await.unwrap();

    let cancels = fx.sched.cancels();
    assert!(cancels.contains(&driver));
    assert!(cancels.contains(&bookkeeping));
    let step = fx
        .archive
        .component_record(&ComponentKey::Step { run, step: 0 })
        .unwrap();
    assert_eq!(step.failure, Some(FailureStage::Setup));
    assert_eq!(fx.archive.run(run).unwrap().state, RunState::Failed);
}

#[tokio::test]
async fn test_stop_run_cancels_jobs_and_components() {
    let mut fx = Fixture::single_step();
    let mut foreman = fx.foreman("wordcount");
    let run = foreman.run_id();
    foreman.start_run(&mut fx.archive).await.unwrap();

    foreman
        .stop_run(&mut fx.archive, Some("alice"))
        .await
        .unwrap();

    assert_eq!(fx.sched.cancels().len(), 3);
    assert!(fx.sched.unfinished().is_empty());
    assert!(foreman.is_finished());
    assert_eq!(foreman.in_flight().count(), 0);

    let r = fx.archive.run(run).unwrap();
    assert_eq!(r.state, RunState::Cancelled);
    assert_eq!(r.stopped_by.as_deref(), Some("alice"));
    assert!(!r.has_active_components());
    let step = r.record(&ComponentKey::Step { run, step: 0 }).unwrap();
    assert_eq!(step.state, ComponentState::Cancelled);
    assert_eq!(step.failure, Some(FailureStage::Stopped));
}

#[tokio::test]
async fn test_priority_change_is_pushed_once() {
    let mut fx = Fixture::single_step();
    let mut foreman = fx.foreman("wordcount");
    let run = foreman.run_id();
    foreman.start_run(&mut fx.archive).await.unwrap();

    fx.archive.run_mut(run).unwrap().priority = 5;
    foreman.monitor_queue(&mut fx.archive).await.unwrap();
    foreman.monitor_queue(&mut fx.archive).await.unwrap();

    let calls = fx.sched.priority_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0.len(), 3);
    assert_eq!(calls[0].1, 5);
}

#[tokio::test]
async fn test_accounting_failure_is_retried_next_poll() {
    let mut fx = Fixture::single_step();
    let mut foreman = fx.foreman("wordcount");
    let run = foreman.run_id();
    foreman.start_run(&mut fx.archive).await.unwrap();
    fx.sched.run_all(write_outputs(1));

    fx.sched.fail_status_queries(true);
    foreman.monitor_queue(&mut fx.archive).await.unwrap();
    assert!(!foreman.is_finished());
    assert_eq!(fx.archive.run(run).unwrap().state, RunState::Running);

    fx.sched.fail_status_queries(false);
    foreman.monitor_queue(&mut fx.archive).await.unwrap();
    assert_eq!(fx.archive.run(run).unwrap().state, RunState::Successful);
}

#[tokio::test]
async fn test_submission_failure_is_fatal() {
    let mut fx = Fixture::single_step();
    let mut foreman = fx.foreman("wordcount");
    fx.sched.fail_submissions(true);

    let err = foreman.start_run(&mut fx.archive).await.unwrap_err();
    assert!(err.is_fatal(), "got {err:?}");
}

/// `make` produces a non-retained output consumed by `use`.
fn recovery_fixture() -> Fixture {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let make = MethodBuilder::new("make")
        .driver(driver_file(dir.path(), "make.sh"))
        .input("raw")
        .output("mid")
        .build();
    let consume = MethodBuilder::new("use")
        .driver(driver_file(dir.path(), "use.sh"))
        .input("mid")
        .output("done")
        .reusable(pipefleet::types::Reusability::NonReusable)
        .build();
    let pipeline = PipelineBuilder::new("chain")
        .input("x")
        .method_step("make", &make, vec![trivial(from_input(0))])
        .delete_output(0)
        .method_step("use", &consume, vec![trivial(from_step(0, 0))])
        .output("y", trivial(from_step(1, 0)))
        .build();
    let library = LibraryBuilder::new()
        .method(&make)
        .method(&consume)
        .pipeline(&pipeline)
        .build();
    Fixture::with_library(dir, library)
}

/// Deterministic content per driver; `fail_make` makes `make` exit 1.
fn chain_driver(fail_make: bool) -> impl FnMut(&JobRequest) -> i32 {
    move |req: &JobRequest| {
        let is_make = req.program.ends_with("make.sh");
        if is_make && fail_make {
            return 1;
        }
        let body = if is_make { "col\nmade\n" } else { "col\nused\n" };
        fs::write(req.args.last().unwrap(), body).unwrap();
        0
    }
}

async fn drive(fx: &mut Fixture, foreman: &mut Foreman, fail_make: bool) {
    for _ in 0..10 {
        if foreman.is_finished() {
            return;
        }
        fx.sched.run_all(chain_driver(fail_make));
        foreman.monitor_queue(&mut fx.archive).await.unwrap();
    }
}

#[tokio::test]
async fn test_symbolic_input_is_recovered_by_rerunning_its_producer() {
    let mut fx = recovery_fixture();
    let mut first = fx.foreman("chain");
    first.start_run(&mut fx.archive).await.unwrap();
    drive(&mut fx, &mut first, false).await;
    assert_eq!(
        fx.archive.run(first.run_id()).unwrap().state,
        RunState::Successful
    );

    // The intermediate output was not retained.
    let mid = fx.archive.run(first.run_id()).unwrap().steps[0].outputs[0].unwrap();
    assert!(fx.archive.dataset(mid).unwrap().is_symbolic());

    let mut second = fx.foreman("chain");
    let run = second.run_id();
    second.start_run(&mut fx.archive).await.unwrap();

    // `make` is reused, but `use` needs its data back first.
    let make = fx
        .archive
        .component_record(&ComponentKey::Step { run, step: 0 })
        .unwrap();
    assert!(make.reused);
    assert_eq!(make.state, ComponentState::Complete);
    let recovery: Vec<_> = second.in_flight().filter(|t| t.is_recovery()).collect();
    assert_eq!(recovery.len(), 1);
    assert_eq!(recovery[0].key(), ComponentKey::Step { run, step: 0 });

    drive(&mut fx, &mut second, false).await;

    let r = fx.archive.run(run).unwrap();
    assert_eq!(r.state, RunState::Successful);
    assert_eq!(progress_string(&fx.archive, run).unwrap(), "**-*");
    // Two drivers per run: the second run re-ran `make` for recovery.
    assert_eq!(fx.sched.jobs_named("driver_").len(), 4);
    // Recovery leaves the archive's view of the dataset untouched.
    assert!(fx.archive.dataset(mid).unwrap().is_symbolic());
}

#[tokio::test]
async fn test_exhausted_recovery_fails_the_waiting_step() {
    let mut fx = recovery_fixture();
    let mut first = fx.foreman("chain");
    first.start_run(&mut fx.archive).await.unwrap();
    drive(&mut fx, &mut first, false).await;

    let mut cfg = config_in(fx.dir.path(), fx.library.clone());
    cfg.manager.max_recovery_attempts = 1;
    let settings = ForemanSettings::from_config(&cfg).unwrap();
    let run = fx
        .archive
        .create_run(fx.pipeline("chain"), vec![fx.input], "alice", 1)
        .unwrap();
    let mut second = Foreman::new(run, fx.sched.as_backend(), settings);
    second.start_run(&mut fx.archive).await.unwrap();

    drive(&mut fx, &mut second, true).await;

    assert!(second.is_finished());
    let r = fx.archive.run(run).unwrap();
    assert_eq!(r.state, RunState::Failed);
    let consumer = r.record(&ComponentKey::Step { run, step: 1 }).unwrap();
    assert_eq!(consumer.state, ComponentState::Failed);
    assert_eq!(consumer.failure, Some(FailureStage::Recovery));
}

#[tokio::test]
async fn test_nested_pipeline_runs_through_child_run() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let method = MethodBuilder::new("m")
        .driver(driver_file(dir.path(), "m.sh"))
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
    let library = LibraryBuilder::new()
        .method(&method)
        .pipeline(&inner)
        .pipeline(&outer)
        .build();
    let mut fx = Fixture::with_library(dir, library);

    let mut foreman = fx.foreman("outer");
    let run = foreman.run_id();
    foreman.start_run(&mut fx.archive).await.unwrap();
    assert_eq!(fx.progress(run), "(+-.)-.");

    // Jobs of the nested step carry two-level coordinates in their labels.
    let subs = fx.sched.submissions();
    assert!(subs[0].1.name.starts_with("setup_step1_1_"), "{}", subs[0].1.name);

    fx.sched.run_all(write_outputs(1));
    foreman.monitor_queue(&mut fx.archive).await.unwrap();

    assert_eq!(fx.progress(run), "(*-*)-*");
    assert_eq!(fx.archive.run(run).unwrap().state, RunState::Successful);
    let child = fx.archive.run(run).unwrap().steps[0].child_run.unwrap();
    assert_eq!(fx.archive.run(child).unwrap().state, RunState::Successful);
}

/// `outer` wraps `inner` (one step running `m.sh`); with `sibling`, a
/// failing `bad.sh` step runs next to the wrapped one.
fn nested_fixture(sibling: bool) -> Fixture {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let method = MethodBuilder::new("m")
        .driver(driver_file(dir.path(), "m.sh"))
        .input("a")
        .output("b")
        .build();
    let bad = MethodBuilder::new("bad")
        .driver(driver_file(dir.path(), "bad.sh"))
        .input("a")
        .output("b")
        .build();
    let inner = PipelineBuilder::new("inner")
        .input("a")
        .method_step("only", &method, vec![trivial(from_input(0))])
        .output("b", trivial(from_step(0, 0)))
        .build();
    let mut outer = PipelineBuilder::new("outer").input("x");
    if sibling {
        outer = outer.method_step("bad", &bad, vec![trivial(from_input(0))]);
    }
    let wrapped = usize::from(sibling);
    let outer = outer
        .pipeline_step("wrapped", &inner, vec![trivial(from_input(0))])
        .output("y", trivial(from_step(wrapped, 0)))
        .build();
    let library = LibraryBuilder::new()
        .method(&method)
        .method(&bad)
        .pipeline(&inner)
        .pipeline(&outer)
        .build();
    Fixture::with_library(dir, library)
}

#[tokio::test]
async fn test_nested_failure_fails_every_enclosing_run() {
    let mut fx = nested_fixture(false);
    let mut foreman = fx.foreman("outer");
    let run = foreman.run_id();
    foreman.start_run(&mut fx.archive).await.unwrap();

    fx.sched.run_all(|_| 1);
    foreman.monitor_queue(&mut fx.archive).await.unwrap();

    assert!(foreman.is_finished());
    assert_eq!(fx.progress(run), "(!-!)-!");
    let r = fx.archive.run(run).unwrap();
    assert_eq!(r.state, RunState::Failed);
    let child = r.steps[0].child_run.unwrap();
    assert_eq!(fx.archive.run(child).unwrap().state, RunState::Failed);

    let wrapping = r.record(&ComponentKey::Step { run, step: 0 }).unwrap();
    assert_eq!(wrapping.state, ComponentState::Failed);
    assert_eq!(wrapping.failure, Some(FailureStage::SubRun));
    let inner_step = fx
        .archive
        .component_record(&ComponentKey::Step { run: child, step: 0 })
        .unwrap();
    assert_eq!(inner_step.failure, Some(FailureStage::Driver));
}

#[tokio::test]
async fn test_stopping_a_nested_run_leaves_nothing_active() {
    let mut fx = nested_fixture(false);
    let mut foreman = fx.foreman("outer");
    let run = foreman.run_id();
    foreman.start_run(&mut fx.archive).await.unwrap();
    let child = fx.archive.run(run).unwrap().steps[0].child_run.unwrap();
    assert_eq!(fx.archive.run(child).unwrap().state, RunState::Running);

    foreman.stop_run(&mut fx.archive, None).await.unwrap();

    assert!(foreman.is_finished());
    assert!(fx.sched.unfinished().is_empty());
    assert_eq!(fx.archive.run(run).unwrap().state, RunState::Cancelled);
    let c = fx.archive.run(child).unwrap();
    assert_eq!(c.state, RunState::Cancelled);
    assert!(!c.has_active_components());
    assert!(!fx.archive.run(run).unwrap().has_active_components());
}

#[tokio::test]
async fn test_child_closes_when_its_last_task_finishes_after_a_sibling_failed() {
    let mut fx = nested_fixture(true);
    let mut foreman = fx.foreman("outer");
    let run = foreman.run_id();
    foreman.start_run(&mut fx.archive).await.unwrap();
    let child = fx.archive.run(run).unwrap().steps[1].child_run.unwrap();

    // `bad` fails in setup while the nested step is still queued.
    let bad_setup = fx.sched.jobs_named("setup_step1_");
    assert_eq!(bad_setup.len(), 1);
    fx.sched
        .set_exit(bad_setup[0].0, pipefleet::exec::JobState::Failed, Some(1));
    foreman.monitor_queue(&mut fx.archive).await.unwrap();

    assert!(!foreman.is_finished());
    assert_eq!(fx.archive.run(run).unwrap().state, RunState::Failing);
    assert_eq!(fx.archive.run(child).unwrap().state, RunState::Running);

    // The nested step completes; one poll closes both runs.
    fx.sched.run_all(write_outputs(1));
    foreman.monitor_queue(&mut fx.archive).await.unwrap();

    assert_eq!(fx.archive.run(child).unwrap().state, RunState::Failed);
    let wrapping = fx
        .archive
        .component_record(&ComponentKey::Step { run, step: 1 })
        .unwrap();
    assert_eq!(wrapping.failure, Some(FailureStage::SubRun));
    assert!(foreman.is_finished());
    assert_eq!(fx.archive.run(run).unwrap().state, RunState::Failed);
}

async fn run_to_end(fx: &mut Fixture, foreman: &mut Foreman) {
    foreman.start_run(&mut fx.archive).await.unwrap();
    for _ in 0..10 {
        if foreman.is_finished() {
            return;
        }
        fx.sched.run_all(write_outputs(1));
        foreman.monitor_queue(&mut fx.archive).await.unwrap();
    }
    panic!("run did not finish");
}

#[tokio::test]
async fn test_top_level_output_is_rematerialized_when_lost() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let method = MethodBuilder::new("count")
        .driver(driver_file(dir.path(), "count.sh"))
        .input("text")
        .output_with_columns("counts", 2)
        .build();
    let pipeline = PipelineBuilder::new("remapped")
        .input("x")
        .method_step("count", &method, vec![trivial(from_input(0))])
        .output("y", wired(from_step(0, 0), &[(0, 0), (1, 1)]))
        .build();
    let library = LibraryBuilder::new().method(&method).pipeline(&pipeline).build();
    let mut fx = Fixture::with_library(dir, library);

    let mut first = fx.foreman("remapped");
    run_to_end(&mut fx, &mut first).await;
    let r = fx.archive.run(first.run_id()).unwrap();
    assert_eq!(r.state, RunState::Successful);
    let output = r.output_datasets().unwrap()[0];
    assert!(!fx.archive.dataset(output).unwrap().is_symbolic());
    assert_eq!(fx.sched.jobs_named("cable_").len(), 1);

    // The archived copy goes missing.
    fx.archive.dataset_mut(output).unwrap().location = None;

    let mut second = fx.foreman("remapped");
    let run = second.run_id();
    run_to_end(&mut fx, &mut second).await;

    let r = fx.archive.run(run).unwrap();
    assert_eq!(r.state, RunState::Successful);
    assert!(r.record(&ComponentKey::Step { run, step: 0 }).unwrap().reused);
    assert_eq!(r.output_datasets().unwrap(), vec![output]);
    assert_eq!(fx.sched.jobs_named("cable_").len(), 2);
    let location = fx.archive.dataset(output).unwrap().location.clone().unwrap();
    assert_eq!(fs::read_to_string(location).unwrap(), TABLE);
}
