// src/run/component.rs

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::archive::{ExecLogId, ExecRecordId, RunId};

/// Lifecycle state of one run component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    /// Waiting for upstream cables to be quenched.
    Pending,
    /// Inputs available; not yet dispatched.
    Ready,
    /// One or more scheduler jobs outstanding (or a child run in progress).
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl ComponentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ComponentState::Complete | ComponentState::Failed | ComponentState::Cancelled
        )
    }

    /// Pending, ready or running.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn is_unsuccessful(self) -> bool {
        matches!(self, ComponentState::Failed | ComponentState::Cancelled)
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentState::Pending => "pending",
            ComponentState::Ready => "ready",
            ComponentState::Running => "running",
            ComponentState::Complete => "complete",
            ComponentState::Failed => "failed",
            ComponentState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Where in a task's life a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Setup,
    Driver,
    Bookkeeping,
    Cable,
    /// Symbolic input data could not be re-materialized.
    Recovery,
    /// A run input was missing or unreadable.
    Input,
    /// A nested run ended unsuccessfully.
    SubRun,
    /// Stopped on request.
    Stopped,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureStage::Setup => "setup",
            FailureStage::Driver => "driver",
            FailureStage::Bookkeeping => "bookkeeping",
            FailureStage::Cable => "cable",
            FailureStage::Recovery => "recovery",
            FailureStage::Input => "input",
            FailureStage::SubRun => "sub-run",
            FailureStage::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Identity of a run component: a step, the cable feeding one step input, or
/// a cable feeding one pipeline output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComponentKey {
    Step { run: RunId, step: usize },
    InputCable { run: RunId, step: usize, input: usize },
    OutputCable { run: RunId, output: usize },
}

impl ComponentKey {
    pub fn run(&self) -> RunId {
        match *self {
            ComponentKey::Step { run, .. }
            | ComponentKey::InputCable { run, .. }
            | ComponentKey::OutputCable { run, .. } => run,
        }
    }

    pub fn is_output_cable(&self) -> bool {
        matches!(self, ComponentKey::OutputCable { .. })
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentKey::Step { .. } => ComponentKind::Step,
            ComponentKey::InputCable { .. } => ComponentKind::InputCable,
            ComponentKey::OutputCable { .. } => ComponentKind::OutputCable,
        }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKey::Step { run, step } => write!(f, "{run}/step{}", step + 1),
            ComponentKey::InputCable { run, step, input } => {
                write!(f, "{run}/step{}/in{}", step + 1, input + 1)
            }
            ComponentKey::OutputCable { run, output } => write!(f, "{run}/out{}", output + 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Step,
    InputCable,
    OutputCable,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentKind::Step => "step",
            ComponentKind::InputCable => "input cable",
            ComponentKind::OutputCable => "output cable",
        };
        f.write_str(s)
    }
}

/// Position of a component inside nested runs, outermost first.
///
/// Step indices are stored zero-based and displayed one-based, e.g. step 2
/// of the sub-run of step 1 renders as `1.2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinates(pub Vec<usize>);

impl Coordinates {
    /// Nesting depth: 0 for components of the top-level run.
    pub fn depth(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// Filesystem-friendly rendering, e.g. `1_2`.
    pub fn label(&self) -> String {
        self.0
            .iter()
            .map(|i| (i + 1).to_string())
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|i| (i + 1).to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Mutable bookkeeping shared by steps and cables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRecord {
    pub state: ComponentState,
    pub exec_record: Option<ExecRecordId>,
    /// Most recent execution attempt, if the component executed.
    pub exec_log: Option<ExecLogId>,
    /// Whether the result came from the execution memo.
    pub reused: bool,
    pub failure: Option<FailureStage>,
}

impl Default for ComponentRecord {
    fn default() -> Self {
        Self {
            state: ComponentState::Pending,
            exec_record: None,
            exec_log: None,
            reused: false,
            failure: None,
        }
    }
}

impl ComponentRecord {
    /// Move to `next` unless already terminal. Returns whether the state changed.
    fn transition(&mut self, next: ComponentState) -> bool {
        if self.state.is_terminal() {
            debug!(
                from = %self.state,
                to = %next,
                "ignoring transition out of terminal state"
            );
            return false;
        }
        if self.state == next {
            return false;
        }
        self.state = next;
        true
    }

    pub fn make_ready(&mut self) -> bool {
        self.transition(ComponentState::Ready)
    }

    pub fn begin_running(&mut self) -> bool {
        self.transition(ComponentState::Running)
    }

    /// Steps wrapping a sub-pipeline complete without an execution record.
    pub fn complete(&mut self, exec_record: Option<ExecRecordId>, reused: bool) -> bool {
        if !self.transition(ComponentState::Complete) {
            return false;
        }
        if exec_record.is_some() {
            self.exec_record = exec_record;
        }
        self.reused = reused;
        true
    }

    pub fn fail(&mut self, stage: FailureStage) -> bool {
        if !self.transition(ComponentState::Failed) {
            return false;
        }
        self.failure = Some(stage);
        true
    }

    pub fn cancel(&mut self, stage: Option<FailureStage>) -> bool {
        if !self.transition(ComponentState::Cancelled) {
            return false;
        }
        self.failure = stage;
        true
    }
}
