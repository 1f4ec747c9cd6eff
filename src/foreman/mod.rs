// src/foreman/mod.rs

//! Per-run orchestrator.
//!
//! A [`Foreman`] owns one top-level run. It expands the pipeline as inputs
//! become available, submits jobs for what cannot be reused, polls the
//! scheduler once per manager tick, and propagates failures through every
//! enclosing sub-run.
//!
//! - `expand.rs`: pipeline expansion and memo consultation.
//! - `sandbox.rs`: the run's working area and dataset locations.
//! - `task.rs`: in-flight tasks and job-status evaluation.
//! - `submit.rs`: descriptors, job submission and recovery.
//! - `finish.rs`: absorbing finished tasks.
//! - `propagate.rs`: failure propagation, mop-up and settling of sub-runs.

pub mod expand;
pub mod finish;
pub mod propagate;
pub mod sandbox;
pub mod submit;
pub mod task;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::archive::{Archive, DatasetId, RunId};
use crate::config::ConfigFile;
use crate::errors::Result;
use crate::exec::{JobHandle, SchedulerBackend};
use crate::run::{FailureStage, RunState, progress_string};
use crate::types::JobIdentity;

pub use expand::{Expansion, expand};
pub use sandbox::Sandbox;
pub use task::{PendingTask, RunTask, TaskId, TaskJobs, TaskOutcome, TaskProgress, TaskPurpose};

/// Paths and limits every Foreman needs.
#[derive(Debug, Clone)]
pub struct ForemanSettings {
    pub sandbox_root: PathBuf,
    pub archive_root: PathBuf,
    /// Program run by setup, bookkeeping and cable jobs.
    pub worker_program: PathBuf,
    pub identity: JobIdentity,
    pub max_recovery_attempts: u32,
}

impl ForemanSettings {
    pub fn from_config(cfg: &ConfigFile) -> anyhow::Result<Self> {
        let worker_program = match cfg.manager.worker_program.clone() {
            Some(p) => p,
            None => std::env::current_exe().context("locating the worker program")?,
        };
        Ok(Self {
            sandbox_root: cfg.manager.sandbox_root.clone(),
            archive_root: cfg.manager.archive_root.clone(),
            worker_program,
            identity: JobIdentity {
                uid: cfg.scheduler.uid,
                gid: cfg.scheduler.gid,
            },
            max_recovery_attempts: cfg.manager.max_recovery_attempts,
        })
    }
}

/// Recovery of one symbolic dataset.
#[derive(Debug, Default)]
struct Recovery {
    attempts: u32,
    in_progress: bool,
    waiters: Vec<PendingTask>,
}

pub struct Foreman {
    run_id: RunId,
    backend: Arc<dyn SchedulerBackend>,
    settings: ForemanSettings,
    sandbox: Sandbox,
    in_flight: BTreeMap<TaskId, RunTask>,
    next_task: u64,
    /// Priority last pushed to the scheduler.
    priority: u32,
    recoveries: HashMap<DatasetId, Recovery>,
    /// Tasks whose recovery failed, resubmitted on the next poll.
    retry: Vec<PendingTask>,
    finished: bool,
}

impl Foreman {
    pub fn new(
        run_id: RunId,
        backend: Arc<dyn SchedulerBackend>,
        settings: ForemanSettings,
    ) -> Self {
        let sandbox = Sandbox::new(&settings.sandbox_root, run_id);
        Self {
            run_id,
            backend,
            settings,
            sandbox,
            in_flight: BTreeMap::new(),
            next_task: 0,
            priority: 0,
            recoveries: HashMap::new(),
            retry: Vec::new(),
            finished: false,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Whether the run reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn in_flight(&self) -> impl Iterator<Item = &RunTask> {
        self.in_flight.values()
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Create the run's components, expand from the top and submit every
    /// ready task. A fully reusable run finishes here.
    pub async fn start_run(&mut self, archive: &mut Archive) -> Result<()> {
        self.sandbox.create()?;
        {
            let run = archive.run_mut(self.run_id)?;
            run.start();
            run.sandbox = Some(self.sandbox.root().to_path_buf());
            self.priority = run.priority;
            info!(
                run_id = %self.run_id,
                pipeline = %run.pipeline.name,
                user = %run.user,
                "starting run"
            );
        }

        let expansion = expand(archive, self.run_id)?;
        self.handle_expansion(archive, expansion).await?;
        self.maybe_finalize(archive)
    }

    /// Poll the scheduler once: absorb finished tasks, push priority changes,
    /// retry tasks whose recovery failed.
    pub async fn monitor_queue(&mut self, archive: &mut Archive) -> Result<()> {
        if self.finished {
            return Ok(());
        }

        if !self.retry.is_empty() {
            let retry = std::mem::take(&mut self.retry);
            debug!(run_id = %self.run_id, count = retry.len(), "retrying blocked tasks");
            let doomed = self.submit_pending(archive, retry).await?;
            self.fail_doomed(archive, doomed)?;
        }

        if self.in_flight.is_empty() {
            self.check_stalled(archive).await?;
            return self.maybe_finalize(archive);
        }

        let handles: Vec<JobHandle> = self
            .in_flight
            .values()
            .flat_map(|t| t.jobs.handles())
            .collect();
        let statuses = match self.backend.get_status(&handles).await {
            Ok(s) => s,
            Err(e) => {
                warn!(run_id = %self.run_id, error = %e, "status query failed; retrying next poll");
                return Ok(());
            }
        };

        let mut finished = Vec::new();
        for (id, task) in self.in_flight.iter_mut() {
            if let Some(status) = task.loggable_status(&statuses) {
                finish::log_job_status(archive, task, status);
                task.logged = true;
            }
            if let TaskProgress::Finished(outcome) = task.evaluate(&statuses) {
                finished.push((*id, outcome));
            }
        }

        for (id, outcome) in finished {
            let Some(task) = self.in_flight.remove(&id) else {
                continue;
            };
            for handle in task.orphaned_by(outcome) {
                if let Err(e) = self.backend.cancel(handle).await {
                    debug!(job_id = handle.id(), error = %e, "cancelling orphaned job failed");
                }
            }
            submit::remove_descriptor(&task.descriptor);
            self.worker_finished(archive, task, outcome).await?;
        }

        self.push_priority(archive, &statuses).await?;
        self.maybe_finalize(archive)
    }

    /// Push the run's priority to every still-running job if it changed.
    async fn push_priority(
        &mut self,
        archive: &Archive,
        statuses: &HashMap<JobHandle, crate::exec::JobStatus>,
    ) -> Result<()> {
        let desired = archive.run(self.run_id)?.priority;
        if desired == self.priority {
            return Ok(());
        }
        let handles: Vec<JobHandle> = self
            .in_flight
            .values()
            .flat_map(|t| t.live_handles(statuses))
            .collect();
        if handles.is_empty() {
            self.priority = desired;
            return Ok(());
        }
        match self.backend.set_priority(&handles, desired).await {
            Ok(()) => {
                info!(run_id = %self.run_id, priority = desired, jobs = handles.len(), "priority updated");
                self.priority = desired;
            }
            Err(e) => {
                warn!(run_id = %self.run_id, error = %e, "priority update failed; retrying next poll");
            }
        }
        Ok(())
    }

    /// Cancel every in-flight job, cancel every unfinished component and
    /// finalize the run. Returns once the run is terminal.
    pub async fn stop_run(&mut self, archive: &mut Archive, by: Option<&str>) -> Result<()> {
        info!(run_id = %self.run_id, by = by.unwrap_or("manager"), "stopping run");

        let tasks = std::mem::take(&mut self.in_flight);
        for task in tasks.values() {
            for handle in task.jobs.handles() {
                if let Err(e) = self.backend.cancel(handle).await {
                    warn!(job_id = handle.id(), error = %e, "cancel failed while stopping run");
                }
            }
            submit::remove_descriptor(&task.descriptor);
        }
        self.retry.clear();
        self.recoveries.clear();

        for id in archive.run_tree(self.run_id) {
            let run = archive.run_mut(id)?;
            if !run.state.is_terminal() && run.state != RunState::Failing {
                run.state = RunState::Cancelling;
            }
        }
        if let Some(user) = by {
            archive.run_mut(self.run_id)?.stopped_by = Some(user.to_string());
        }

        self.mop_up(archive, Some(FailureStage::Stopped))?;
        self.maybe_finalize(archive)
    }

    /// Finish the top-level run once nothing is active or in flight.
    fn maybe_finalize(&mut self, archive: &mut Archive) -> Result<()> {
        if self.finished || !self.in_flight.is_empty() {
            return Ok(());
        }
        let run = archive.run(self.run_id)?;
        if run.has_active_components() {
            return Ok(());
        }

        let state = archive.run_mut(self.run_id)?.finish();
        self.finished = true;
        let progress = progress_string(archive, self.run_id)?;
        match state {
            RunState::Successful => info!(run_id = %self.run_id, %progress, "run successful"),
            other => warn!(run_id = %self.run_id, state = %other, %progress, "run finished unsuccessfully"),
        }
        Ok(())
    }

    /// Nothing in flight yet components remain active: expand again, and if
    /// that yields no work either, give up on the run.
    async fn check_stalled(&mut self, archive: &mut Archive) -> Result<()> {
        let run = archive.run(self.run_id)?;
        if !run.has_active_components() || !self.retry.is_empty() {
            return Ok(());
        }
        if self.recoveries.values().any(|r| r.in_progress) {
            return Ok(());
        }

        let expansion = expand(archive, self.run_id)?;
        let idle = expansion.ready.is_empty() && expansion.failed.is_empty();
        self.handle_expansion(archive, expansion).await?;
        if idle && self.in_flight.is_empty() && self.retry.is_empty() {
            let run = archive.run(self.run_id)?;
            if run.state == RunState::Running {
                warn!(run_id = %self.run_id, "run has no runnable work left; failing it");
                archive.run_mut(self.run_id)?.state = RunState::Failing;
            }
            self.mop_up(archive, None)?;
        }
        Ok(())
    }
}
