// tests/property_pipelines.rs

use std::fs;

use proptest::prelude::*;

use pipefleet::archive::Archive;
use pipefleet::exec::JobRequest;
use pipefleet::foreman::{Foreman, ForemanSettings};
use pipefleet::pipeline::Library;
use pipefleet::run::{ComponentKey, ComponentState, RunState, progress_string};
use pipefleet_test_utils::builders::{
    LibraryBuilder, MethodBuilder, PipelineBuilder, config_in, from_input, from_step, trivial,
};
use pipefleet_test_utils::scripted_scheduler::ScriptedScheduler;

// Step i reads either the pipeline input or the output of some step j < i.
// `sources[i] % (i + 1)` picks: 0 for the input, k for step k-1.
fn library_strategy(max_steps: usize) -> impl Strategy<Value = Vec<usize>> {
    (1..=max_steps).prop_flat_map(|steps| proptest::collection::vec(any::<usize>(), steps))
}

fn build_library(dir: &std::path::Path, sources: &[usize]) -> Library {
    let mut methods = Vec::new();
    let mut pipeline = PipelineBuilder::new("generated").input("x");
    for (i, raw) in sources.iter().enumerate() {
        let driver = dir.join(format!("m{i}.sh"));
        fs::write(&driver, "#!/bin/sh\n").unwrap();
        let method = MethodBuilder::new(&format!("m{i}"))
            .driver(driver)
            .input("in")
            .output("out")
            .build();
        let source = match raw % (i + 1) {
            0 => from_input(0),
            k => from_step(k - 1, 0),
        };
        pipeline = pipeline.method_step(&format!("s{i}"), &method, vec![trivial(source)]);
        methods.push(method);
    }
    let last = sources.len() - 1;
    let pipeline = pipeline.output("y", trivial(from_step(last, 0))).build();

    let mut lib = LibraryBuilder::new();
    for m in methods.iter() {
        lib = lib.method(m);
    }
    lib.pipeline(&pipeline).build()
}

/// Each driver writes a table naming its own script; `fail` names one that
/// exits 1 instead.
fn driver(fail: Option<String>) -> impl FnMut(&JobRequest) -> i32 {
    move |req: &JobRequest| {
        let script = req
            .program
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if fail.as_deref() == Some(script.as_str()) {
            return 1;
        }
        fs::write(req.args.last().unwrap(), format!("col\n{script}\n")).unwrap();
        0
    }
}

async fn drive(
    archive: &mut Archive,
    sched: &ScriptedScheduler,
    foreman: &mut Foreman,
    fail: Option<String>,
) {
    foreman.start_run(archive).await.unwrap();
    for _ in 0..50 {
        if foreman.is_finished() {
            return;
        }
        sched.run_all(driver(fail.clone()));
        foreman.monitor_queue(archive).await.unwrap();
    }
    panic!("run did not finish");
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_generated_pipelines_succeed_then_reuse(sources in library_strategy(5)) {
        let dir = tempfile::tempdir().unwrap();
        let library = build_library(dir.path(), &sources);
        let settings =
            ForemanSettings::from_config(&config_in(dir.path(), library.clone())).unwrap();
        let pipeline = library.pipeline("generated").unwrap();

        let input_path = dir.path().join("input.csv");
        fs::write(&input_path, "col\nraw\n").unwrap();
        let mut archive = Archive::new();
        let input = archive.register_dataset("x", &input_path).unwrap();
        let sched = ScriptedScheduler::new();

        let rt = runtime();
        let run = archive.create_run(pipeline.clone(), vec![input], "alice", 1).unwrap();
        let mut foreman = Foreman::new(run, sched.as_backend(), settings.clone());
        rt.block_on(drive(&mut archive, &sched, &mut foreman, None));

        prop_assert_eq!(archive.run(run).unwrap().state, RunState::Successful);
        let expected = format!("{}-*", "*".repeat(sources.len()));
        prop_assert_eq!(progress_string(&archive, run).unwrap(), expected.clone());
        prop_assert_eq!(sched.jobs_named("driver_").len(), sources.len());

        // Same pipeline, same input: nothing is submitted again.
        let submitted = sched.submissions().len();
        let again = archive.create_run(pipeline, vec![input], "alice", 1).unwrap();
        let mut foreman = Foreman::new(again, sched.as_backend(), settings);
        rt.block_on(drive(&mut archive, &sched, &mut foreman, None));

        prop_assert_eq!(archive.run(again).unwrap().state, RunState::Successful);
        prop_assert_eq!(progress_string(&archive, again).unwrap(), expected);
        prop_assert_eq!(sched.submissions().len(), submitted);
    }

    #[test]
    fn test_a_failing_step_fails_the_run(
        sources in library_strategy(5),
        pick in any::<usize>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let library = build_library(dir.path(), &sources);
        let settings =
            ForemanSettings::from_config(&config_in(dir.path(), library.clone())).unwrap();
        let pipeline = library.pipeline("generated").unwrap();

        let input_path = dir.path().join("input.csv");
        fs::write(&input_path, "col\nraw\n").unwrap();
        let mut archive = Archive::new();
        let input = archive.register_dataset("x", &input_path).unwrap();
        let sched = ScriptedScheduler::new();

        let failing = pick % sources.len();
        let rt = runtime();
        let run = archive.create_run(pipeline, vec![input], "alice", 1).unwrap();
        let mut foreman = Foreman::new(run, sched.as_backend(), settings);
        rt.block_on(drive(&mut archive, &sched, &mut foreman, Some(format!("m{failing}"))));

        prop_assert_eq!(archive.run(run).unwrap().state, RunState::Failed);
        prop_assert_eq!(
            archive.component_state(&ComponentKey::Step { run, step: failing }),
            Some(ComponentState::Failed)
        );
        prop_assert!(progress_string(&archive, run).unwrap().contains('!'));
    }
}
