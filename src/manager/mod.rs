// src/manager/mod.rs

//! Top-level orchestrator.
//!
//! The [`Manager`] owns the [`Archive`] and one [`Foreman`] per active
//! top-level run. Every tick it starts pending runs, lets each Foreman poll
//! the scheduler, drops Foremen whose run finished and gives background
//! maintenance one bounded slice. Requests arrive on an event channel and are
//! handled between ticks, so the archive only ever changes on this loop.

pub mod access;
pub mod handle;
pub mod maintenance;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::archive::{Archive, DatasetId, RunId};
use crate::config::ConfigFile;
use crate::errors::{FleetError, Result};
use crate::exec::SchedulerBackend;
use crate::foreman::{Foreman, ForemanSettings};
use crate::pipeline::Library;
use crate::run::{RunProgress, RunState, progress_string, run_progress};

pub use access::{AccessPolicy, OwnerOrAdmin};
pub use handle::{ManagerEvent, ManagerHandle};
pub use maintenance::{
    ExternalFileCheck, Maintenance, MaintenanceProgress, MaintenanceTask, SandboxCleanup,
};

/// Loop behaviour.
#[derive(Debug, Clone, Copy)]
pub struct ManagerOptions {
    /// Leave the loop once no run is pending or active.
    pub exit_when_idle: bool,
}

pub struct Manager {
    archive: Archive,
    library: Library,
    backend: Arc<dyn SchedulerBackend>,
    settings: ForemanSettings,
    foremen: BTreeMap<RunId, Foreman>,
    access: Box<dyn AccessPolicy>,
    maintenance: Maintenance,
    poll_interval: Duration,
    options: ManagerOptions,
    events: mpsc::Receiver<ManagerEvent>,
    handle: ManagerHandle,
    /// Last progress string logged per run.
    reported: BTreeMap<RunId, String>,
}

impl Manager {
    pub fn new(cfg: &ConfigFile, backend: Arc<dyn SchedulerBackend>) -> Result<Self> {
        let settings = ForemanSettings::from_config(cfg)?;
        let (tx, rx) = mpsc::channel(64);
        Ok(Self {
            archive: Archive::new(),
            library: cfg.library.clone(),
            backend,
            settings,
            foremen: BTreeMap::new(),
            access: Box::new(OwnerOrAdmin::new(cfg.manager.admins.clone())),
            maintenance: Maintenance::from_config(&cfg.maintenance),
            poll_interval: cfg.manager.poll_interval(),
            options: ManagerOptions {
                exit_when_idle: false,
            },
            events: rx,
            handle: ManagerHandle::new(tx),
            reported: BTreeMap::new(),
        })
    }

    pub fn with_options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_access_policy(mut self, policy: Box<dyn AccessPolicy>) -> Self {
        self.access = policy;
        self
    }

    pub fn with_maintenance(mut self, maintenance: Maintenance) -> Self {
        self.maintenance = maintenance;
        self
    }

    pub fn handle(&self) -> ManagerHandle {
        self.handle.clone()
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn archive_mut(&mut self) -> &mut Archive {
        &mut self.archive
    }

    pub fn foreman(&self, run: RunId) -> Option<&Foreman> {
        self.foremen.get(&run)
    }

    /// No run waits for a Foreman and no Foreman is active.
    pub fn is_idle(&self) -> bool {
        self.foremen.is_empty() && self.archive.pending_top_level_runs().is_empty()
    }

    pub fn register_dataset(&mut self, name: &str, path: &Path) -> Result<DatasetId> {
        self.archive.register_dataset(name, path)
    }

    /// Enqueue a run of `pipeline`; it starts on the next poll.
    pub fn enqueue_run(
        &mut self,
        pipeline: &str,
        inputs: Vec<DatasetId>,
        user: &str,
        priority: u32,
    ) -> Result<RunId> {
        let pipeline = self.library.pipeline(pipeline)?;
        for ds in inputs.iter() {
            self.archive.dataset(*ds)?;
        }
        let name = pipeline.name.clone();
        let id = self.archive.create_run(pipeline, inputs, user, priority)?;
        info!(run_id = %id, pipeline = %name, user, priority, "run enqueued");
        Ok(id)
    }

    /// Stop a top-level run on behalf of `user`.
    ///
    /// Returns once the run and every sub-run is terminal. Stopping a run that
    /// already finished is a no-op.
    pub async fn request_stop(&mut self, run: RunId, user: &str) -> Result<()> {
        {
            let r = self.archive.run(run)?;
            if !r.is_top_level() {
                return Err(FleetError::InvalidInput(format!(
                    "{run} is a sub-run; stop its top-level run instead"
                )));
            }
            if !self.access.may_stop(user, r) {
                return Err(FleetError::PermissionDenied(format!(
                    "{user} may not stop {run} owned by {}",
                    r.user
                )));
            }
            if r.state.is_terminal() {
                debug!(run_id = %run, state = %r.state, "stop requested for finished run");
                return Ok(());
            }
        }

        match self.foremen.remove(&run) {
            Some(mut foreman) => {
                foreman.stop_run(&mut self.archive, Some(user)).await?;
            }
            None => {
                let r = self.archive.run_mut(run)?;
                r.state = RunState::Cancelled;
                r.finished = Some(Utc::now());
                r.stopped_by = Some(user.to_string());
                info!(run_id = %run, by = user, "pending run cancelled");
            }
        }
        Ok(())
    }

    /// Change a run's priority. Its Foreman pushes the change to the
    /// scheduler on the next poll.
    pub fn set_priority(&mut self, run: RunId, priority: u32) -> Result<()> {
        for id in self.archive.run_tree(run) {
            self.archive.run_mut(id)?.priority = priority;
        }
        debug!(run_id = %run, priority, "priority requested");
        Ok(())
    }

    pub fn progress(&self, run: RunId) -> Result<RunProgress> {
        run_progress(&self.archive, run)
    }

    /// One tick: start pending runs, poll every Foreman, retire finished
    /// ones, then a slice of maintenance.
    ///
    /// Only fatal errors are returned; anything else stops the affected run.
    pub async fn poll_once(&mut self) -> Result<()> {
        for run in self.archive.pending_top_level_runs() {
            let mut foreman = Foreman::new(run, Arc::clone(&self.backend), self.settings.clone());
            let started = foreman.start_run(&mut self.archive).await;
            self.absorb(&mut foreman, started).await?;
            self.foremen.insert(run, foreman);
        }

        let ids: Vec<RunId> = self.foremen.keys().copied().collect();
        for id in ids {
            let Some(mut foreman) = self.foremen.remove(&id) else {
                continue;
            };
            let polled = foreman.monitor_queue(&mut self.archive).await;
            self.absorb(&mut foreman, polled).await?;
            if foreman.is_finished() {
                debug!(run_id = %id, "foreman retired");
            } else {
                self.foremen.insert(id, foreman);
            }
        }

        self.report_progress();
        self.maintenance.step(&mut self.archive);
        Ok(())
    }

    /// Pass fatal errors up; a run whose Foreman hit anything else is stopped.
    async fn absorb(&mut self, foreman: &mut Foreman, outcome: Result<()>) -> Result<()> {
        let Err(e) = outcome else {
            return Ok(());
        };
        if e.is_fatal() {
            error!(run_id = %foreman.run_id(), error = %e, "fatal scheduler error");
            if let Err(stop) = foreman.stop_run(&mut self.archive, None).await {
                warn!(run_id = %foreman.run_id(), error = %stop, "stopping run after fatal error failed");
            }
            return Err(e);
        }
        warn!(run_id = %foreman.run_id(), error = %e, "foreman error; stopping run");
        foreman.stop_run(&mut self.archive, None).await
    }

    fn report_progress(&mut self) {
        let runs: Vec<RunId> = self
            .archive
            .runs()
            .filter(|r| r.is_top_level() && r.is_started())
            .map(|r| r.id)
            .collect();
        for id in runs {
            let Ok(progress) = progress_string(&self.archive, id) else {
                continue;
            };
            if self.reported.get(&id) != Some(&progress) {
                info!(run_id = %id, %progress, "progress");
                self.reported.insert(id, progress);
            }
        }
    }

    /// Stop every active run, cancelling its jobs.
    pub async fn shutdown(&mut self) -> Result<()> {
        let foremen = std::mem::take(&mut self.foremen);
        if !foremen.is_empty() {
            info!(active = foremen.len(), "shutting down; stopping active runs");
        }
        for (id, mut foreman) in foremen {
            if let Err(e) = foreman.stop_run(&mut self.archive, None).await {
                warn!(run_id = %id, error = %e, "could not stop run during shutdown");
            }
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: ManagerEvent) -> bool {
        match event {
            ManagerEvent::RegisterDataset { name, path, reply } => {
                let _ = reply.send(self.register_dataset(&name, &path));
            }
            ManagerEvent::EnqueueRun {
                pipeline,
                inputs,
                user,
                priority,
                reply,
            } => {
                let _ = reply.send(self.enqueue_run(&pipeline, inputs, &user, priority));
            }
            ManagerEvent::StopRun { run, user, reply } => {
                let result = self.request_stop(run, &user).await;
                let _ = reply.send(result);
            }
            ManagerEvent::SetPriority {
                run,
                priority,
                reply,
            } => {
                let _ = reply.send(self.set_priority(run, priority));
            }
            ManagerEvent::GetProgress { run, reply } => {
                let _ = reply.send(self.progress(run));
            }
            ManagerEvent::ShutdownRequested => {
                info!("shutdown requested");
                return false;
            }
        }
        true
    }

    /// Main loop: poll on every tick, handle requests in between.
    ///
    /// A fatal scheduler error stops every active run and is returned.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "manager started"
        );
        match self.backend.is_alive().await {
            Ok(true) => {}
            Ok(false) => warn!("scheduler did not answer a liveness check"),
            Err(e) => warn!(error = %e, "scheduler liveness check failed"),
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        self.shutdown().await?;
                        return Err(e);
                    }
                    if self.options.exit_when_idle && self.is_idle() {
                        info!("nothing left to do; exiting");
                        break;
                    }
                }
                Some(event) = self.events.recv() => {
                    if !self.handle_event(event).await {
                        break;
                    }
                }
            }
        }

        self.shutdown().await?;
        info!("manager exiting");
        Ok(())
    }
}
