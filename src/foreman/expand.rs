// src/foreman/expand.rs

//! Pipeline expansion: moves components forward as their inputs become
//! available, consulting the execution memo, and reports what must execute.
//!
//! Expansion only acts on pending components (and on running steps that wrap
//! a sub-pipeline, whose child run it expands in turn). It repeats until a
//! full pass changes nothing, so reuse cascades through the whole run tree in
//! one call.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::archive::{Archive, DatasetId, RunId};
use crate::errors::{FleetError, Result};
use crate::memo::{CableDecision, ExecutionMemo, StepDecision, record_trivial_cable};
use crate::pipeline::{Cable, CableSource, Pipeline, StepGraph, Transformation};
use crate::run::{ComponentKey, ComponentState, FailureStage, ParentLink, Run, RunState};

#[derive(Debug, Default)]
pub struct Expansion {
    /// Components that became ready and must execute.
    pub ready: Vec<ComponentKey>,
    /// Components that failed during expansion.
    pub failed: Vec<(ComponentKey, FailureStage)>,
}

pub fn expand(archive: &mut Archive, run: RunId) -> Result<Expansion> {
    let mut out = Expansion::default();
    expand_run(archive, run, &mut out)?;
    Ok(out)
}

fn expand_run(archive: &mut Archive, run_id: RunId, out: &mut Expansion) -> Result<()> {
    let pipeline = {
        let run = archive.run(run_id)?;
        if run.state != RunState::Running {
            return Ok(());
        }
        run.pipeline.clone()
    };
    let order = StepGraph::from_pipeline(&pipeline)
        .topological_order()
        .map_err(|step| {
            FleetError::Cycle(format!(
                "pipeline '{}' step '{}'",
                pipeline.name, pipeline.steps[step].name
            ))
        })?;

    loop {
        let mut progressed = false;
        for &step in order.iter() {
            progressed |= advance_step(archive, run_id, &pipeline, step, out)?;
        }
        for output in 0..pipeline.outputs.len() {
            progressed |= advance_output_cable(archive, run_id, &pipeline, output, out)?;
        }
        if !progressed || !out.failed.is_empty() {
            break;
        }
    }

    let run = archive.run_mut(run_id)?;
    if !run.is_top_level() && run.state == RunState::Running && run.all_complete() {
        run.finish();
        debug!(run_id = %run_id, "nested run complete");
    }
    Ok(())
}

fn cable_source(run: &Run, cable: &Cable) -> Option<DatasetId> {
    match cable.source {
        CableSource::PipelineInput(i) => run.inputs.get(i).copied(),
        CableSource::StepOutput { step, output } => {
            let s = run.steps.get(step)?;
            if s.record.state == ComponentState::Complete {
                s.outputs.get(output).copied().flatten()
            } else {
                None
            }
        }
    }
}

/// A dataset with neither a readable file nor a producer can never be read.
fn check_source(archive: &Archive, dataset: DatasetId) -> std::result::Result<(), String> {
    let ds = archive
        .dataset(dataset)
        .map_err(|e| e.to_string())?;
    let readable = ds.location.as_ref().is_some_and(|p| p.is_file());
    if !readable && ds.producer.is_none() {
        return Err(format!("dataset {} ('{}') has no readable data", ds.id, ds.name));
    }
    Ok(())
}

fn advance_step(
    archive: &mut Archive,
    run_id: RunId,
    pipeline: &Pipeline,
    step: usize,
    out: &mut Expansion,
) -> Result<bool> {
    let mut progressed = false;
    for input in 0..pipeline.steps[step].cables.len() {
        let key = ComponentKey::InputCable {
            run: run_id,
            step,
            input,
        };
        progressed |= advance_cable(archive, key, &pipeline.steps[step].cables[input], out)?;
    }

    let (state, child, inputs) = {
        let rs = &archive.run(run_id)?.steps[step];
        let inputs: Option<Vec<DatasetId>> = rs
            .cables
            .iter()
            .map(|c| {
                (c.record.state == ComponentState::Complete)
                    .then_some(c.output)
                    .flatten()
            })
            .collect();
        (rs.record.state, rs.child_run, inputs)
    };
    let key = ComponentKey::Step { run: run_id, step };

    match state {
        ComponentState::Pending => {
            let Some(inputs) = inputs else {
                return Ok(progressed);
            };
            match &pipeline.steps[step].transformation {
                Transformation::Method(method) => {
                    let retained: Vec<bool> = (0..method.outputs.len())
                        .map(|o| pipeline.steps[step].retains_output(o))
                        .collect();
                    let decision = ExecutionMemo::new(archive).decide_step(method, &inputs, &retained);
                    let rs = &mut archive.run_mut(run_id)?.steps[step];
                    match decision {
                        StepDecision::Reuse {
                            exec_record,
                            outputs,
                        } => {
                            rs.outputs = outputs.into_iter().map(Some).collect();
                            rs.record.complete(Some(exec_record), true);
                            debug!(component = %key, exec_record = %exec_record, "step reused");
                        }
                        StepDecision::FillIn { exec_record } => {
                            rs.record.exec_record = Some(exec_record);
                            rs.record.make_ready();
                            out.ready.push(key);
                        }
                        StepDecision::Execute => {
                            rs.record.make_ready();
                            out.ready.push(key);
                        }
                    }
                }
                Transformation::Pipeline(sub) => {
                    let child = archive.create_child_run(
                        ParentLink { run: run_id, step },
                        Arc::clone(sub),
                        inputs,
                    )?;
                    let rs = &mut archive.run_mut(run_id)?.steps[step];
                    rs.child_run = Some(child);
                    rs.record.begin_running();
                    debug!(component = %key, child = %child, "nested run created");
                    expand_run(archive, child, out)?;
                    complete_from_child(archive, run_id, step, child)?;
                }
            }
            Ok(true)
        }
        ComponentState::Running => {
            let Some(child) = child else {
                return Ok(progressed);
            };
            expand_run(archive, child, out)?;
            Ok(complete_from_child(archive, run_id, step, child)? || progressed)
        }
        _ => Ok(progressed),
    }
}

/// Complete the step wrapping `child` if the child run succeeded.
pub(crate) fn complete_from_child(
    archive: &mut Archive,
    run_id: RunId,
    step: usize,
    child: RunId,
) -> Result<bool> {
    let outputs = {
        let child_run = archive.run(child)?;
        if child_run.state != RunState::Successful {
            return Ok(false);
        }
        child_run.output_datasets()
    };
    let Some(outputs) = outputs else {
        return Ok(false);
    };
    let rs = &mut archive.run_mut(run_id)?.steps[step];
    rs.outputs = outputs.into_iter().map(Some).collect();
    Ok(rs.record.complete(None, false))
}

fn advance_output_cable(
    archive: &mut Archive,
    run_id: RunId,
    pipeline: &Pipeline,
    output: usize,
    out: &mut Expansion,
) -> Result<bool> {
    let key = ComponentKey::OutputCable {
        run: run_id,
        output,
    };
    advance_cable(archive, key, &pipeline.outputs[output].cable, out)
}

/// Quench a pending cable whose source is available.
fn advance_cable(
    archive: &mut Archive,
    key: ComponentKey,
    cable: &Cable,
    out: &mut Expansion,
) -> Result<bool> {
    let source = {
        let run = archive.run(key.run())?;
        match run.record(&key) {
            Some(rec) if rec.state == ComponentState::Pending => {}
            _ => return Ok(false),
        }
        match cable_source(run, cable) {
            Some(ds) => ds,
            None => return Ok(false),
        }
    };

    if let Err(reason) = check_source(archive, source) {
        warn!(component = %key, %reason, "invalid cable input");
        if let Some(rec) = archive.component_record_mut(&key) {
            rec.fail(FailureStage::Input);
        }
        out.failed.push((key, FailureStage::Input));
        return Ok(true);
    }

    if cable.is_trivial() {
        let er = record_trivial_cable(archive, source);
        set_cable_data(archive, &key, Some(source), Some(source))?;
        if let Some(rec) = archive.component_record_mut(&key) {
            rec.complete(Some(er), true);
        }
        return Ok(true);
    }

    let persist = archive.run(key.run())?.cable_must_persist(&key);
    let decision = ExecutionMemo::new(archive).decide_cable(&cable.signature(), source, persist);
    set_cable_data(archive, &key, Some(source), None)?;
    match decision {
        CableDecision::Reuse {
            exec_record,
            output,
        } => {
            set_cable_data(archive, &key, Some(source), Some(output))?;
            if let Some(rec) = archive.component_record_mut(&key) {
                rec.complete(Some(exec_record), true);
            }
            debug!(component = %key, exec_record = %exec_record, "cable reused");
        }
        CableDecision::FillIn { exec_record } => {
            if let Some(rec) = archive.component_record_mut(&key) {
                rec.exec_record = Some(exec_record);
                rec.make_ready();
            }
            out.ready.push(key);
        }
        CableDecision::Execute => {
            if let Some(rec) = archive.component_record_mut(&key) {
                rec.make_ready();
            }
            out.ready.push(key);
        }
    }
    Ok(true)
}

pub(crate) fn set_cable_data(
    archive: &mut Archive,
    key: &ComponentKey,
    input_data: Option<DatasetId>,
    output_data: Option<DatasetId>,
) -> Result<()> {
    let run = archive.run_mut(key.run())?;
    let cable = match *key {
        ComponentKey::InputCable { step, input, .. } => run
            .steps
            .get_mut(step)
            .and_then(|s| s.cables.get_mut(input)),
        ComponentKey::OutputCable { output, .. } => run.output_cables.get_mut(output),
        ComponentKey::Step { .. } => None,
    };
    if let Some(cable) = cable {
        cable.input = input_data;
        cable.output = output_data;
    }
    Ok(())
}
