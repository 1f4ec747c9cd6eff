// src/exec/local.rs

//! In-process scheduler running jobs on the local machine.
//!
//! Jobs live in a shared table guarded by a `tokio::sync::Mutex`. A background
//! dispatcher task wakes up on a fixed tick, starts every queued job whose
//! dependencies are satisfied (up to `max_concurrent`), and cancels jobs whose
//! success-dependencies can no longer succeed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::errors::FleetError;
use crate::exec::backend::{
    BackendFuture, JobCategory, JobHandle, JobRequest, JobState, JobStatus, SchedulerBackend,
};
use crate::exec::process::{ProcessOutcome, run_process};

const DEFAULT_TICK: Duration = Duration::from_millis(50);

pub struct LocalScheduler {
    shared: Arc<Mutex<JobTable>>,
    dispatcher: JoinHandle<()>,
}

struct JobTable {
    next_id: u64,
    max_concurrent: usize,
    jobs: BTreeMap<JobHandle, LocalJob>,
}

struct LocalJob {
    request: JobRequest,
    state: JobState,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    return_code: Option<i32>,
    signal: Option<i32>,
    cancel: Option<oneshot::Sender<()>>,
}

impl LocalJob {
    fn status(&self) -> JobStatus {
        JobStatus {
            state: self.state,
            start: self.start,
            end: self.end,
            return_code: self.return_code,
            signal: self.signal,
        }
    }

    fn finish(&mut self, state: JobState) {
        self.state = state;
        self.end = Some(Utc::now());
        self.cancel = None;
    }
}

enum Readiness {
    Ready,
    Blocked,
    /// A success-dependency failed or was cancelled.
    Doomed,
}

impl JobTable {
    fn category_of(&self, handle: &JobHandle) -> JobCategory {
        self.jobs
            .get(handle)
            .map(|j| j.state.category())
            .unwrap_or(JobCategory::Unknown)
    }

    fn readiness(&self, job: &LocalJob) -> Readiness {
        let mut blocked = false;
        for dep in job.request.after_success.iter() {
            match self.category_of(dep) {
                JobCategory::Success => {}
                JobCategory::Failure | JobCategory::Cancelled => return Readiness::Doomed,
                JobCategory::Unfinished | JobCategory::Unknown => blocked = true,
            }
        }
        for dep in job.request.after_completion.iter() {
            if !self.category_of(dep).is_finished() {
                blocked = true;
            }
        }
        if blocked {
            Readiness::Blocked
        } else {
            Readiness::Ready
        }
    }

    fn running(&self) -> usize {
        self.jobs
            .values()
            .filter(|j| j.state == JobState::Running)
            .count()
    }

    /// Queued jobs, highest priority first, then oldest first.
    fn queued(&self) -> Vec<JobHandle> {
        let mut queued: Vec<(u32, JobHandle)> = self
            .jobs
            .iter()
            .filter(|(_, j)| j.state == JobState::Queued)
            .map(|(h, j)| (j.request.priority, *h))
            .collect();
        queued.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        queued.into_iter().map(|(_, h)| h).collect()
    }
}

impl LocalScheduler {
    /// Must be called from within a Tokio runtime.
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_tick(max_concurrent, DEFAULT_TICK)
    }

    pub fn with_tick(max_concurrent: usize, tick: Duration) -> Self {
        let shared = Arc::new(Mutex::new(JobTable {
            next_id: 0,
            max_concurrent: max_concurrent.max(1),
            jobs: BTreeMap::new(),
        }));
        let dispatcher = tokio::spawn(dispatch_loop(shared.clone(), tick));
        info!(max_concurrent, "local scheduler started");
        Self { shared, dispatcher }
    }
}

impl Drop for LocalScheduler {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch_loop(shared: Arc<Mutex<JobTable>>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        dispatch(&shared).await;
    }
}

async fn dispatch(shared: &Arc<Mutex<JobTable>>) {
    let mut table = shared.lock().await;
    let mut running = table.running();

    for handle in table.queued() {
        let readiness = match table.jobs.get(&handle) {
            Some(job) => table.readiness(job),
            None => continue,
        };
        match readiness {
            Readiness::Blocked => {}
            Readiness::Doomed => {
                if let Some(job) = table.jobs.get_mut(&handle) {
                    debug!(job_id = handle.id(), name = %job.request.name, "dependency failed; cancelling job");
                    job.finish(JobState::Cancelled);
                }
            }
            Readiness::Ready => {
                if running >= table.max_concurrent {
                    continue;
                }
                let Some(job) = table.jobs.get_mut(&handle) else {
                    continue;
                };
                let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
                job.state = JobState::Running;
                job.start = Some(Utc::now());
                job.cancel = Some(cancel_tx);
                let request = job.request.clone();
                running += 1;

                let shared = shared.clone();
                tokio::spawn(async move {
                    let outcome = run_process(&request, cancel_rx).await;
                    record_outcome(&shared, handle, outcome).await;
                });
            }
        }
    }
}

async fn record_outcome(shared: &Arc<Mutex<JobTable>>, handle: JobHandle, outcome: ProcessOutcome) {
    let mut table = shared.lock().await;
    let Some(job) = table.jobs.get_mut(&handle) else {
        return;
    };
    if job.state.is_finished() {
        // Already cancelled while the process was being killed.
        return;
    }
    match outcome {
        ProcessOutcome::Exited { code, signal } => {
            job.return_code = code;
            job.signal = signal;
            let state = if code == Some(0) {
                JobState::Completed
            } else {
                JobState::Failed
            };
            job.finish(state);
        }
        ProcessOutcome::Killed => job.finish(JobState::Cancelled),
        ProcessOutcome::SpawnFailed => {
            job.return_code = Some(-1);
            job.finish(JobState::Failed);
        }
    }
    debug!(job_id = handle.id(), state = %job.state, "local job finished");
}

impl SchedulerBackend for LocalScheduler {
    fn submit(&self, request: JobRequest) -> BackendFuture<'_, JobHandle> {
        Box::pin(async move {
            let mut table = self.shared.lock().await;
            let unknown = request
                .after_success
                .iter()
                .chain(request.after_completion.iter())
                .find(|h| !table.jobs.contains_key(*h));
            if let Some(h) = unknown {
                return Err(FleetError::Submission(format!(
                    "{}: unknown dependency {h}",
                    request.name
                )));
            }

            table.next_id += 1;
            let handle = JobHandle::new(table.next_id);
            debug!(job_id = handle.id(), name = %request.name, "job queued");
            table.jobs.insert(
                handle,
                LocalJob {
                    request,
                    state: JobState::Queued,
                    start: None,
                    end: None,
                    return_code: None,
                    signal: None,
                    cancel: None,
                },
            );
            Ok(handle)
        })
    }

    fn cancel(&self, handle: JobHandle) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let mut table = self.shared.lock().await;
            let job = table
                .jobs
                .get_mut(&handle)
                .ok_or_else(|| FleetError::Backend(format!("cancel: unknown job {handle}")))?;
            if job.state.is_finished() {
                return Ok(());
            }
            if let Some(cancel) = job.cancel.take() {
                let _ = cancel.send(());
            }
            job.finish(JobState::Cancelled);
            Ok(())
        })
    }

    fn get_status(
        &self,
        handles: &[JobHandle],
    ) -> BackendFuture<'_, HashMap<JobHandle, JobStatus>> {
        let handles = handles.to_vec();
        Box::pin(async move {
            let table = self.shared.lock().await;
            Ok(handles
                .into_iter()
                .map(|h| {
                    let status = table
                        .jobs
                        .get(&h)
                        .map(LocalJob::status)
                        .unwrap_or_else(JobStatus::unknown);
                    (h, status)
                })
                .collect())
        })
    }

    fn set_priority(&self, handles: &[JobHandle], priority: u32) -> BackendFuture<'_, ()> {
        let handles = handles.to_vec();
        Box::pin(async move {
            let mut table = self.shared.lock().await;
            for h in handles {
                if let Some(job) = table.jobs.get_mut(&h) {
                    job.request.priority = priority;
                }
            }
            Ok(())
        })
    }

    fn is_alive(&self) -> BackendFuture<'_, bool> {
        Box::pin(async move { Ok(!self.dispatcher.is_finished()) })
    }
}
