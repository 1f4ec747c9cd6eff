// src/worker/mod.rs

//! Out-of-process job entry points.
//!
//! Every scheduler job except a step's driver runs `pipefleet worker <phase>
//! <descriptor>`. The descriptor is the only input; results travel back to the
//! Foreman through the report file it names.

pub mod bookkeeping;
pub mod cable;
pub mod check;
pub mod descriptor;
pub mod setup;

use std::path::Path;

use anyhow::Result;

pub use check::{CheckVerdict, ContentCheck, CsvContentCheck};
pub use descriptor::{
    CableDescriptor, ExpectedOutput, OutputReport, StagedInput, StepDescriptor, TaskReport,
    read_toml, write_toml,
};

/// Which worker job to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Setup,
    Bookkeeping,
    Cable,
}

impl WorkerPhase {
    pub fn as_arg(self) -> &'static str {
        match self {
            WorkerPhase::Setup => "setup",
            WorkerPhase::Bookkeeping => "bookkeeping",
            WorkerPhase::Cable => "cable",
        }
    }
}

pub fn run_worker(phase: WorkerPhase, descriptor: &Path) -> Result<()> {
    match phase {
        WorkerPhase::Setup => {
            let desc: StepDescriptor = read_toml(descriptor)?;
            setup::run_setup(&desc)
        }
        WorkerPhase::Bookkeeping => {
            let desc: StepDescriptor = read_toml(descriptor)?;
            bookkeeping::run_bookkeeping(&desc, &CsvContentCheck).map(|_| ())
        }
        WorkerPhase::Cable => {
            let desc: CableDescriptor = read_toml(descriptor)?;
            cable::run_cable(&desc).map(|_| ())
        }
    }
}
