// src/run/mod.rs

//! Run and component state machine.
//!
//! - `component.rs`: component identity, state, failure stages.
//! - `state.rs`: runs, steps and cables.
//! - `progress.rs`: progress strings and run detail.

pub mod component;
pub mod progress;
pub mod state;

pub use component::{
    ComponentKey, ComponentKind, ComponentRecord, ComponentState, Coordinates, FailureStage,
};
pub use progress::{ComponentDetail, RunProgress, progress_string, run_progress};
pub use state::{ComponentRef, ParentLink, Run, RunCable, RunState, RunStep};
