// src/foreman/task.rs

//! In-flight tasks and how their job statuses map to an outcome.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::archive::{DatasetId, ExecLogId, ExecRecordId};
use crate::exec::{JobCategory, JobHandle, JobStatus};
use crate::run::{ComponentKey, FailureStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Why a component is being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPurpose {
    /// First execution for this run.
    Novel,
    /// Re-execution to re-materialize a symbolic dataset.
    Recovery { dataset: DatasetId },
}

/// A component waiting to be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingTask {
    pub key: ComponentKey,
    pub purpose: TaskPurpose,
}

impl PendingTask {
    pub fn novel(key: ComponentKey) -> Self {
        Self {
            key,
            purpose: TaskPurpose::Novel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskJobs {
    Step {
        setup: JobHandle,
        driver: JobHandle,
        bookkeeping: JobHandle,
    },
    Cable {
        job: JobHandle,
    },
}

impl TaskJobs {
    pub fn handles(&self) -> Vec<JobHandle> {
        match *self {
            TaskJobs::Step {
                setup,
                driver,
                bookkeeping,
            } => vec![setup, driver, bookkeeping],
            TaskJobs::Cable { job } => vec![job],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed(FailureStage),
    Cancelled(FailureStage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskProgress {
    Running,
    Finished(TaskOutcome),
}

/// A submitted task: a step's three jobs or a cable's single job.
#[derive(Debug, Clone)]
pub struct RunTask {
    pub id: TaskId,
    pub pending: PendingTask,
    pub label: String,
    pub depth: usize,
    pub jobs: TaskJobs,
    pub workdir: PathBuf,
    pub descriptor: PathBuf,
    pub report: PathBuf,
    pub exec_log: ExecLogId,
    pub inputs: Vec<DatasetId>,
    /// Record to fill in (or verify, for recovery) once outputs exist.
    pub exec_record: Option<ExecRecordId>,
    /// Driver (or cable job) accounting already copied into the exec log.
    pub logged: bool,
}

fn category(statuses: &HashMap<JobHandle, JobStatus>, handle: JobHandle) -> JobCategory {
    statuses
        .get(&handle)
        .map(|s| s.state.category())
        .unwrap_or(JobCategory::Unknown)
}

impl RunTask {
    pub fn key(&self) -> ComponentKey {
        self.pending.key
    }

    pub fn is_recovery(&self) -> bool {
        matches!(self.pending.purpose, TaskPurpose::Recovery { .. })
    }

    /// Map the current job statuses to the task's progress.
    ///
    /// For steps: setup gates everything; once setup succeeded, the task ends
    /// when bookkeeping ends, and a successful bookkeeping still reports the
    /// driver's own failure.
    pub fn evaluate(&self, statuses: &HashMap<JobHandle, JobStatus>) -> TaskProgress {
        use JobCategory as C;
        use TaskOutcome as O;

        match self.jobs {
            TaskJobs::Step {
                setup,
                driver,
                bookkeeping,
            } => match category(statuses, setup) {
                C::Unfinished | C::Unknown => TaskProgress::Running,
                C::Failure => TaskProgress::Finished(O::Failed(FailureStage::Setup)),
                C::Cancelled => TaskProgress::Finished(O::Cancelled(FailureStage::Setup)),
                C::Success => match category(statuses, bookkeeping) {
                    C::Unfinished | C::Unknown => TaskProgress::Running,
                    C::Failure => TaskProgress::Finished(O::Failed(FailureStage::Bookkeeping)),
                    C::Cancelled => {
                        TaskProgress::Finished(O::Cancelled(FailureStage::Bookkeeping))
                    }
                    C::Success => match category(statuses, driver) {
                        C::Unfinished | C::Unknown => TaskProgress::Running,
                        C::Success => TaskProgress::Finished(O::Succeeded),
                        C::Failure => TaskProgress::Finished(O::Failed(FailureStage::Driver)),
                        C::Cancelled => {
                            TaskProgress::Finished(O::Cancelled(FailureStage::Driver))
                        }
                    },
                },
            },
            TaskJobs::Cable { job } => match category(statuses, job) {
                C::Unfinished | C::Unknown => TaskProgress::Running,
                C::Success => TaskProgress::Finished(O::Succeeded),
                C::Failure => TaskProgress::Finished(O::Failed(FailureStage::Cable)),
                C::Cancelled => TaskProgress::Finished(O::Cancelled(FailureStage::Cable)),
            },
        }
    }

    /// Status of the job whose accounting belongs in the exec log, once it
    /// has finished and has not been logged yet.
    pub fn loggable_status<'a>(
        &self,
        statuses: &'a HashMap<JobHandle, JobStatus>,
    ) -> Option<&'a JobStatus> {
        if self.logged {
            return None;
        }
        let handle = match self.jobs {
            TaskJobs::Step { driver, .. } => driver,
            TaskJobs::Cable { job } => job,
        };
        statuses.get(&handle).filter(|s| s.state.is_finished())
    }

    /// Jobs that would otherwise still run after a setup failure.
    pub fn orphaned_by(&self, outcome: TaskOutcome) -> Vec<JobHandle> {
        match (self.jobs, outcome) {
            (
                TaskJobs::Step {
                    driver,
                    bookkeeping,
                    ..
                },
                TaskOutcome::Failed(FailureStage::Setup)
                | TaskOutcome::Cancelled(FailureStage::Setup),
            ) => vec![driver, bookkeeping],
            _ => Vec::new(),
        }
    }

    /// Handles not known to be finished.
    pub fn live_handles(&self, statuses: &HashMap<JobHandle, JobStatus>) -> Vec<JobHandle> {
        self.jobs
            .handles()
            .into_iter()
            .filter(|h| !category(statuses, *h).is_finished())
            .collect()
    }
}
