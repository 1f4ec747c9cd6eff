// src/run/progress.rs

//! Compact progress strings and per-component run detail.
//!
//! One symbol per step, a `-` separator, one symbol per output cable:
//!
//! | symbol | meaning                                    |
//! |--------|--------------------------------------------|
//! | `?`    | component not created yet                  |
//! | `.`    | waiting on upstream                        |
//! | `:`    | ready (or an input cable is ready/running) |
//! | `+`    | running                                    |
//! | `*`    | complete                                   |
//! | `!`    | failed or cancelled                        |
//!
//! A step wrapping a sub-pipeline renders its child run in parentheses once
//! the child exists, e.g. `*(*+-.)-.`.

use serde::Serialize;

use crate::archive::{Archive, RunId};
use crate::errors::Result;
use crate::run::component::{
    ComponentKey, ComponentKind, ComponentState, Coordinates, FailureStage,
};
use crate::run::state::{ComponentRef, Run, RunCable, RunState, RunStep};

const NOT_STARTED: char = '?';
const SEPARATOR: char = '-';

/// Snapshot returned by `get_progress`.
#[derive(Debug, Clone, Serialize)]
pub struct RunProgress {
    pub run: RunId,
    pub state: RunState,
    pub summary: String,
    pub components: Vec<ComponentDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentDetail {
    pub coordinates: Coordinates,
    pub kind: ComponentKind,
    pub name: String,
    pub state: ComponentState,
    pub reused: bool,
    pub failure: Option<FailureStage>,
}

pub fn progress_string(archive: &Archive, run: RunId) -> Result<String> {
    let mut out = String::new();
    render(archive, archive.run(run)?, &mut out)?;
    Ok(out)
}

pub fn run_progress(archive: &Archive, run: RunId) -> Result<RunProgress> {
    let top = archive.run(run)?;
    let mut components = Vec::new();
    for id in archive.run_tree(run) {
        collect_details(archive, archive.run(id)?, &mut components);
    }
    Ok(RunProgress {
        run,
        state: top.state,
        summary: progress_string(archive, run)?,
        components,
    })
}

fn render(archive: &Archive, run: &Run, out: &mut String) -> Result<()> {
    if !run.is_started() {
        out.extend(run.pipeline.steps.iter().map(|_| NOT_STARTED));
        out.push(SEPARATOR);
        out.extend(run.pipeline.outputs.iter().map(|_| NOT_STARTED));
        return Ok(());
    }

    for step in run.steps.iter() {
        match step.child_run {
            Some(child) => {
                out.push('(');
                render(archive, archive.run(child)?, out)?;
                out.push(')');
            }
            None => out.push(step_symbol(step)),
        }
    }
    out.push(SEPARATOR);
    for cable in run.output_cables.iter() {
        out.push(cable_symbol(cable));
    }
    Ok(())
}

fn step_symbol(step: &RunStep) -> char {
    match step.record.state {
        ComponentState::Pending => {
            let feeding = step.cables.iter().any(|c| {
                matches!(
                    c.record.state,
                    ComponentState::Ready | ComponentState::Running
                )
            });
            if feeding { ':' } else { '.' }
        }
        other => state_symbol(other),
    }
}

fn cable_symbol(cable: &RunCable) -> char {
    state_symbol(cable.record.state)
}

fn state_symbol(state: ComponentState) -> char {
    match state {
        ComponentState::Pending => '.',
        ComponentState::Ready => ':',
        ComponentState::Running => '+',
        ComponentState::Complete => '*',
        ComponentState::Failed | ComponentState::Cancelled => '!',
    }
}

fn collect_details(archive: &Archive, run: &Run, out: &mut Vec<ComponentDetail>) {
    for key in run.component_keys() {
        if let Some(component) = run.component(&key) {
            out.push(detail(archive, run, component));
        }
    }
}

fn detail(archive: &Archive, run: &Run, component: ComponentRef<'_>) -> ComponentDetail {
    let key = component.key();
    let name = match key {
        ComponentKey::Step { step, .. } => run.pipeline.steps[step].name.clone(),
        ComponentKey::InputCable { step, input, .. } => {
            let s = &run.pipeline.steps[step];
            let input_name = s
                .transformation
                .input_names()
                .get(input)
                .map(|n| n.to_string())
                .unwrap_or_default();
            format!("{}.{}", s.name, input_name)
        }
        ComponentKey::OutputCable { output, .. } => run.pipeline.outputs[output].name.clone(),
    };
    let record = component.record();
    ComponentDetail {
        coordinates: archive.coordinates(&key),
        kind: key.kind(),
        name,
        state: record.state,
        reused: record.reused,
        failure: record.failure,
    }
}
