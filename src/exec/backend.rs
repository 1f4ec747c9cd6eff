// src/exec/backend.rs

//! Pluggable batch-scheduler abstraction.
//!
//! The Foreman talks to a `SchedulerBackend` instead of a concrete cluster
//! tool. This makes it easy to swap in an in-process scheduler (see
//! [`LocalScheduler`](super::local::LocalScheduler)) or a scripted fake in
//! tests while keeping the Slurm implementation in [`slurm`](super::slurm).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::types::JobIdentity;

/// Boxed future returned by every backend call.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Opaque reference to a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobHandle(u64);

impl JobHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to submit one job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub name: String,
    pub workdir: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub identity: JobIdentity,
    pub priority: u32,
    pub cpus: u32,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    /// Start only once all of these succeeded; auto-cancel if any of them
    /// failed or was cancelled.
    pub after_success: Vec<JobHandle>,
    /// Start only once all of these reached any terminal state.
    pub after_completion: Vec<JobHandle>,
}

/// Scheduler-reported job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Queued,
    Running,
    Suspended,
    Resizing,
    Preempted,
    Completed,
    Failed,
    /// Killed externally (including by dependency failure).
    Cancelled,
    TimedOut,
    NodeFailed,
    /// No accounting data yet.
    Unknown,
}

/// Coarse partition of [`JobState`] the Foreman acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobCategory {
    Unfinished,
    Success,
    Failure,
    Cancelled,
    Unknown,
}

impl JobCategory {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            JobCategory::Success | JobCategory::Failure | JobCategory::Cancelled
        )
    }
}

impl JobState {
    pub fn category(self) -> JobCategory {
        match self {
            JobState::Queued
            | JobState::Running
            | JobState::Suspended
            | JobState::Resizing
            | JobState::Preempted => JobCategory::Unfinished,
            JobState::Completed => JobCategory::Success,
            JobState::Failed => JobCategory::Failure,
            JobState::Cancelled | JobState::TimedOut | JobState::NodeFailed => {
                JobCategory::Cancelled
            }
            JobState::Unknown => JobCategory::Unknown,
        }
    }

    pub fn is_finished(self) -> bool {
        self.category().is_finished()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Suspended => "suspended",
            JobState::Resizing => "resizing",
            JobState::Preempted => "preempted",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
            JobState::TimedOut => "timed out",
            JobState::NodeFailed => "node failed",
            JobState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Accounting snapshot of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub return_code: Option<i32>,
    pub signal: Option<i32>,
}

impl JobStatus {
    pub fn unknown() -> Self {
        Self {
            state: JobState::Unknown,
            start: None,
            end: None,
            return_code: None,
            signal: None,
        }
    }
}

/// Trait abstracting the external batch scheduler.
///
/// Production code uses [`SlurmScheduler`](super::slurm::SlurmScheduler) or
/// [`LocalScheduler`](super::local::LocalScheduler); tests provide their own
/// implementation that doesn't spawn anything.
pub trait SchedulerBackend: Send + Sync {
    /// Submit a job. Failure here is fatal to the caller.
    fn submit(&self, request: JobRequest) -> BackendFuture<'_, JobHandle>;

    fn cancel(&self, handle: JobHandle) -> BackendFuture<'_, ()>;

    /// Status of every handle asked for; handles without accounting data map
    /// to [`JobState::Unknown`].
    fn get_status(&self, handles: &[JobHandle]) -> BackendFuture<'_, HashMap<JobHandle, JobStatus>>;

    fn set_priority(&self, handles: &[JobHandle], priority: u32) -> BackendFuture<'_, ()>;

    fn is_alive(&self) -> BackendFuture<'_, bool>;
}
