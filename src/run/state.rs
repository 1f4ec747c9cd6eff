// src/run/state.rs

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::archive::{DatasetId, RunId};
use crate::pipeline::Pipeline;
use crate::run::component::{ComponentKey, ComponentRecord, ComponentState};

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Enqueued, no Foreman yet.
    Pending,
    Running,
    Successful,
    /// A component failed; waiting for in-flight work to drain.
    Failing,
    /// Stopped or a component was cancelled; waiting for in-flight work to drain.
    Cancelling,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Successful | RunState::Failed | RunState::Cancelled
        )
    }

    /// Failing or cancelling: no new work may start.
    pub fn is_winding_down(self) -> bool {
        matches!(self, RunState::Failing | RunState::Cancelling)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Successful => "successful",
            RunState::Failing => "failing",
            RunState::Cancelling => "cancelling",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The step of the parent run that owns a nested run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentLink {
    pub run: RunId,
    pub step: usize,
}

/// One execution attempt of a pipeline against concrete inputs.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: RunId,
    pub pipeline: Arc<Pipeline>,
    pub inputs: Vec<DatasetId>,
    pub user: String,
    pub priority: u32,
    pub state: RunState,
    pub parent: Option<ParentLink>,
    /// Empty until the run is started.
    pub steps: Vec<RunStep>,
    pub output_cables: Vec<RunCable>,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub stopped_by: Option<String>,
    /// Private working directory, set by the Foreman.
    pub sandbox: Option<PathBuf>,
}

impl Run {
    pub fn new(
        id: RunId,
        pipeline: Arc<Pipeline>,
        inputs: Vec<DatasetId>,
        user: String,
        priority: u32,
        parent: Option<ParentLink>,
    ) -> Self {
        Self {
            id,
            pipeline,
            inputs,
            user,
            priority,
            state: RunState::Pending,
            parent,
            steps: Vec::new(),
            output_cables: Vec::new(),
            created: Utc::now(),
            started: None,
            finished: None,
            stopped_by: None,
            sandbox: None,
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// Whether the run's components have been created.
    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    /// Create every component in the pending state and mark the run running.
    pub fn start(&mut self) {
        if self.is_started() {
            return;
        }
        self.steps = self
            .pipeline
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| RunStep {
                index,
                record: ComponentRecord::default(),
                cables: (0..step.cables.len())
                    .map(RunCable::new)
                    .collect(),
                outputs: vec![None; step.transformation.output_names().len()],
                child_run: None,
            })
            .collect();
        self.output_cables = (0..self.pipeline.outputs.len()).map(RunCable::new).collect();
        self.state = RunState::Running;
        self.started = Some(Utc::now());
        debug!(run_id = %self.id, pipeline = %self.pipeline.name, "run components created");
    }

    /// Every component key of this run (not descending into child runs).
    pub fn component_keys(&self) -> Vec<ComponentKey> {
        let mut keys = Vec::new();
        for step in self.steps.iter() {
            for cable in step.cables.iter() {
                keys.push(ComponentKey::InputCable {
                    run: self.id,
                    step: step.index,
                    input: cable.index,
                });
            }
            keys.push(ComponentKey::Step {
                run: self.id,
                step: step.index,
            });
        }
        for cable in self.output_cables.iter() {
            keys.push(ComponentKey::OutputCable {
                run: self.id,
                output: cable.index,
            });
        }
        keys
    }

    pub fn record(&self, key: &ComponentKey) -> Option<&ComponentRecord> {
        match *key {
            ComponentKey::Step { step, .. } => self.steps.get(step).map(|s| &s.record),
            ComponentKey::InputCable { step, input, .. } => self
                .steps
                .get(step)
                .and_then(|s| s.cables.get(input))
                .map(|c| &c.record),
            ComponentKey::OutputCable { output, .. } => {
                self.output_cables.get(output).map(|c| &c.record)
            }
        }
    }

    pub fn record_mut(&mut self, key: &ComponentKey) -> Option<&mut ComponentRecord> {
        match *key {
            ComponentKey::Step { step, .. } => self.steps.get_mut(step).map(|s| &mut s.record),
            ComponentKey::InputCable { step, input, .. } => self
                .steps
                .get_mut(step)
                .and_then(|s| s.cables.get_mut(input))
                .map(|c| &mut c.record),
            ComponentKey::OutputCable { output, .. } => {
                self.output_cables.get_mut(output).map(|c| &mut c.record)
            }
        }
    }

    /// Borrow a component as the closed union of step and cable views.
    pub fn component(&self, key: &ComponentKey) -> Option<ComponentRef<'_>> {
        match *key {
            ComponentKey::Step { step, .. } => {
                let run_step = self.steps.get(step)?;
                Some(ComponentRef::Step { key: *key, run_step })
            }
            ComponentKey::InputCable { step, input, .. } => {
                let cable = self.steps.get(step)?.cables.get(input)?;
                Some(ComponentRef::InputCable { key: *key, cable })
            }
            ComponentKey::OutputCable { output, .. } => {
                let cable = self.output_cables.get(output)?;
                Some(ComponentRef::OutputCable { key: *key, cable })
            }
        }
    }

    /// Whether the output of cable `key` must stay materialized: the cable
    /// asks for it, or it delivers an output of a top-level run.
    pub fn cable_must_persist(&self, key: &ComponentKey) -> bool {
        let keep = match *key {
            ComponentKey::Step { .. } => return false,
            ComponentKey::InputCable { step, input, .. } => self
                .pipeline
                .steps
                .get(step)
                .and_then(|s| s.cables.get(input))
                .is_some_and(|c| c.keep_output),
            ComponentKey::OutputCable { output, .. } => self
                .pipeline
                .outputs
                .get(output)
                .is_some_and(|o| o.cable.keep_output),
        };
        keep || (key.is_output_cable() && self.is_top_level())
    }

    /// Whether any component of this run is pending, ready or running.
    pub fn has_active_components(&self) -> bool {
        self.steps.iter().any(|s| {
            s.record.state.is_active() || s.cables.iter().any(|c| c.record.state.is_active())
        }) || self.output_cables.iter().any(|c| c.record.state.is_active())
    }

    /// Every step and every output cable complete.
    pub fn all_complete(&self) -> bool {
        self.is_started()
            && self
                .steps
                .iter()
                .all(|s| s.record.state == ComponentState::Complete)
            && self
                .output_cables
                .iter()
                .all(|c| c.record.state == ComponentState::Complete)
    }

    pub fn any_unsuccessful(&self) -> bool {
        self.steps.iter().any(|s| {
            s.record.state.is_unsuccessful()
                || s.cables.iter().any(|c| c.record.state.is_unsuccessful())
        }) || self
            .output_cables
            .iter()
            .any(|c| c.record.state.is_unsuccessful())
    }

    /// Datasets produced by the output cables, once all are complete.
    pub fn output_datasets(&self) -> Option<Vec<DatasetId>> {
        self.output_cables.iter().map(|c| c.output).collect()
    }

    /// Move to the terminal state matching how the run is winding down.
    pub fn finish(&mut self) -> RunState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.state = match self.state {
            RunState::Failing => RunState::Failed,
            RunState::Cancelling => RunState::Cancelled,
            _ if self.all_complete() => RunState::Successful,
            _ if self.any_unsuccessful() => RunState::Failed,
            _ => RunState::Cancelled,
        };
        self.finished = Some(Utc::now());
        self.state
    }
}

/// A step of a run.
#[derive(Debug, Clone)]
pub struct RunStep {
    pub index: usize,
    pub record: ComponentRecord,
    pub cables: Vec<RunCable>,
    /// Output datasets, filled in on completion.
    pub outputs: Vec<Option<DatasetId>>,
    /// Nested run, for steps that wrap a sub-pipeline.
    pub child_run: Option<RunId>,
}

/// A cable of a run, feeding either a step input or a pipeline output.
#[derive(Debug, Clone)]
pub struct RunCable {
    pub index: usize,
    pub record: ComponentRecord,
    pub input: Option<DatasetId>,
    pub output: Option<DatasetId>,
}

impl RunCable {
    fn new(index: usize) -> Self {
        Self {
            index,
            record: ComponentRecord::default(),
            input: None,
            output: None,
        }
    }
}

/// Borrowed view of one run component.
#[derive(Debug, Clone, Copy)]
pub enum ComponentRef<'a> {
    Step {
        key: ComponentKey,
        run_step: &'a RunStep,
    },
    InputCable {
        key: ComponentKey,
        cable: &'a RunCable,
    },
    OutputCable {
        key: ComponentKey,
        cable: &'a RunCable,
    },
}

impl<'a> ComponentRef<'a> {
    pub fn key(&self) -> ComponentKey {
        match self {
            ComponentRef::Step { key, .. }
            | ComponentRef::InputCable { key, .. }
            | ComponentRef::OutputCable { key, .. } => *key,
        }
    }

    pub fn record(&self) -> &'a ComponentRecord {
        match self {
            ComponentRef::Step { run_step, .. } => &run_step.record,
            ComponentRef::InputCable { cable, .. } | ComponentRef::OutputCable { cable, .. } => {
                &cable.record
            }
        }
    }
}
