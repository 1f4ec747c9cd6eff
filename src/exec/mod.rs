// src/exec/mod.rs

//! Batch-scheduler layer.
//!
//! - [`backend`] defines the `SchedulerBackend` trait and job types.
//! - [`slurm`] drives a Slurm cluster through its command-line tools.
//! - [`accounting`] parses the Slurm accounting output.
//! - [`local`] is an in-process scheduler for single machines and tests.
//! - [`process`] runs one local job as an OS process.

pub mod accounting;
pub mod backend;
pub mod local;
pub mod process;
pub mod slurm;

use std::sync::Arc;

pub use backend::{
    BackendFuture, JobCategory, JobHandle, JobRequest, JobState, JobStatus, SchedulerBackend,
};
pub use local::LocalScheduler;
pub use slurm::SlurmScheduler;

use crate::config::SchedulerSection;
use crate::errors::Result;
use crate::types::SchedulerKind;

/// Build the backend selected by `[scheduler].kind`.
pub fn backend_from_config(cfg: &SchedulerSection) -> Result<Arc<dyn SchedulerBackend>> {
    Ok(match cfg.kind {
        SchedulerKind::Slurm => Arc::new(SlurmScheduler::from_config(cfg)?),
        SchedulerKind::Local => Arc::new(LocalScheduler::new(cfg.max_concurrent)),
    })
}
