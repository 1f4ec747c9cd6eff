// tests/config_validation.rs

use std::io::Write;

use tempfile::NamedTempFile;

use pipefleet::config::{load_and_validate, parse_str};
use pipefleet::config::ConfigFile;
use pipefleet::errors::FleetError;
use pipefleet::pipeline::{CableSource, Transformation};
use pipefleet::types::{Reusability, SchedulerKind};

fn validate(toml: &str) -> Result<ConfigFile, FleetError> {
    ConfigFile::try_from(parse_str(toml)?)
}

const WORDCOUNT: &str = r#"
[manager]
poll_interval_ms = 250
admins = ["root"]

[scheduler]
kind = "slurm"

[method.split]
driver = "split.sh"
inputs = ["text"]
outputs = ["words"]
columns = { words = 2 }

[method.count]
driver = "count.sh"
inputs = ["words"]
outputs = ["counts", "log"]
threads = 4
reusable = "non_reusable"

[pipeline.wordcount]
inputs = ["text"]

[[pipeline.wordcount.step]]
name = "split"
transformation = "split"
cables = [{ input = "text", source = "text" }]

[[pipeline.wordcount.step]]
name = "count"
transformation = "count"
cables = [{ input = "words", source = "split.words", wires = [[1, 0], [0, 1]], keep_output = true }]
delete_outputs = ["log"]

[[pipeline.wordcount.output]]
name = "counts"
source = "count.counts"
"#;

#[test]
fn test_full_config_resolves_library() {
    let cfg = validate(WORDCOUNT).expect("config should validate");

    assert_eq!(cfg.manager.poll_interval_ms, 250);
    assert_eq!(cfg.manager.admins, vec!["root".to_string()]);
    assert_eq!(cfg.scheduler.kind, SchedulerKind::Slurm);
    assert_eq!(cfg.scheduler.submit_command, "sbatch");
    assert!(cfg.maintenance.enabled);

    let split = cfg.library.method("split").expect("split method");
    assert_eq!(split.output_columns, vec![Some(2)]);
    assert_eq!(split.reusable, Reusability::Deterministic);

    let count = cfg.library.method("count").expect("count method");
    assert_eq!(count.threads, 4);
    assert_eq!(count.reusable, Reusability::NonReusable);

    let p = cfg.library.pipeline("wordcount").expect("pipeline");
    assert_eq!(p.steps.len(), 2);
    assert!(matches!(p.steps[0].transformation, Transformation::Method(_)));
    assert_eq!(p.steps[0].cables[0].source, CableSource::PipelineInput(0));
    assert!(p.steps[0].cables[0].is_trivial());

    let cable = &p.steps[1].cables[0];
    assert_eq!(cable.source, CableSource::StepOutput { step: 0, output: 0 });
    assert_eq!(cable.wires.len(), 2);
    assert!(cable.keep_output);
    assert_eq!(p.steps[1].outputs_to_delete, vec![1]);
    assert!(!p.steps[1].retains_output(1));

    assert_eq!(p.outputs.len(), 1);
    assert!(p.outputs[0].cable.keep_output);
}

#[test]
fn test_nested_pipeline_is_built_before_its_parent() {
    let cfg = validate(
        r#"
[method.m]
driver = "m.sh"
inputs = ["a"]
outputs = ["b"]

[pipeline.outer]
inputs = ["x"]

[[pipeline.outer.step]]
name = "wrapped"
transformation = "inner"
cables = [{ input = "a", source = "x" }]

[[pipeline.outer.output]]
name = "y"
source = "wrapped.b"

[pipeline.inner]
inputs = ["a"]

[[pipeline.inner.step]]
name = "only"
transformation = "m"
cables = [{ input = "a", source = "a" }]

[[pipeline.inner.output]]
name = "b"
source = "only.b"
"#,
    )
    .expect("nested config should validate");

    let outer = cfg.library.pipeline("outer").expect("outer");
    let sub = outer.steps[0]
        .transformation
        .as_pipeline()
        .expect("step wraps a pipeline");
    assert_eq!(sub.name, "inner");
}

#[test]
fn test_config_without_pipelines_is_rejected() {
    let err = validate("[manager]\npoll_interval_ms = 5\n").unwrap_err();
    match err {
        FleetError::ConfigError(msg) => assert!(msg.contains("at least one")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn test_unknown_transformation_returns_config_error() {
    let err = validate(
        r#"
[pipeline.p]
inputs = ["x"]

[[pipeline.p.step]]
name = "s"
transformation = "missing"
"#,
    )
    .unwrap_err();
    match err {
        FleetError::ConfigError(msg) => assert!(msg.contains("unknown transformation")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn test_unwired_input_is_rejected() {
    let err = validate(
        r#"
[method.m]
driver = "m.sh"
inputs = ["a", "b"]
outputs = ["c"]

[pipeline.p]
inputs = ["x"]

[[pipeline.p.step]]
name = "s"
transformation = "m"
cables = [{ input = "a", source = "x" }]
"#,
    )
    .unwrap_err();
    match err {
        FleetError::ConfigError(msg) => assert!(msg.contains("unwired")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn test_step_cycle_returns_structured_error() {
    let err = validate(
        r#"
[method.m]
driver = "m.sh"
inputs = ["a"]
outputs = ["b"]

[pipeline.p]
inputs = []

[[pipeline.p.step]]
name = "one"
transformation = "m"
cables = [{ input = "a", source = "two.b" }]

[[pipeline.p.step]]
name = "two"
transformation = "m"
cables = [{ input = "a", source = "one.b" }]
"#,
    )
    .unwrap_err();
    match err {
        FleetError::Cycle(msg) => assert!(msg.contains("cycle detected")),
        other => panic!("expected Cycle, got {other:?}"),
    }
}

#[test]
fn test_pipeline_nesting_cycle_is_rejected() {
    let err = validate(
        r#"
[pipeline.a]
inputs = []

[[pipeline.a.step]]
name = "s"
transformation = "b"

[pipeline.b]
inputs = []

[[pipeline.b.step]]
name = "s"
transformation = "a"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, FleetError::Cycle(_)), "got {err:?}");
}

#[test]
fn test_wire_gap_is_rejected() {
    let err = validate(
        r#"
[method.m]
driver = "m.sh"
inputs = ["a"]
outputs = ["b"]

[pipeline.p]
inputs = ["x"]

[[pipeline.p.step]]
name = "s"
transformation = "m"
cables = [{ input = "a", source = "x", wires = [[0, 3]] }]
"#,
    )
    .unwrap_err();
    match err {
        FleetError::ConfigError(msg) => assert!(msg.contains("gap")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn test_output_from_pipeline_input_is_rejected() {
    let err = validate(
        r#"
[pipeline.p]
inputs = ["x"]

[[pipeline.p.output]]
name = "y"
source = "x"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, FleetError::ConfigError(_)), "got {err:?}");
}

#[test]
fn test_relative_driver_resolved_against_config_dir() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Pipefleet.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    write!(
        file,
        r#"
[method.m]
driver = "scripts/m.sh"
inputs = ["a"]
outputs = ["b"]

[pipeline.p]
inputs = ["a"]
"#
    )
    .unwrap();

    let cfg = load_and_validate(&path).unwrap();
    let m = cfg.library.method("m").unwrap();
    assert_eq!(m.driver, dir.path().join("scripts/m.sh"));
}

#[test]
fn test_malformed_toml_returns_toml_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "[pipeline.p\ninputs = ").unwrap();
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, FleetError::TomlError(_)), "got {err:?}");
}
