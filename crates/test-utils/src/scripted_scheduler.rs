use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use pipefleet::errors::FleetError;
use pipefleet::exec::{
    BackendFuture, JobCategory, JobHandle, JobRequest, JobState, JobStatus, SchedulerBackend,
};
use pipefleet::worker::{WorkerPhase, run_worker};

/// A scheduler that never runs anything by itself.
///
/// - records submissions, cancels and priority calls
/// - tests move jobs between states with [`ScriptedScheduler::set_state`]
/// - [`ScriptedScheduler::run_wave`] executes every queued job whose
///   dependencies allow it: worker jobs run in-process, drivers through a
///   test-provided closure.
#[derive(Clone, Default)]
pub struct ScriptedScheduler {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    jobs: BTreeMap<JobHandle, (JobRequest, JobStatus)>,
    cancels: Vec<JobHandle>,
    priority_calls: Vec<(Vec<JobHandle>, u32)>,
    fail_status: bool,
    fail_submit: bool,
}

impl ScriptedScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_backend(&self) -> Arc<dyn SchedulerBackend> {
        Arc::new(self.clone())
    }

    /// Every submitted job, in submission order.
    pub fn submissions(&self) -> Vec<(JobHandle, JobRequest)> {
        let inner = self.inner.lock().unwrap();
        inner
            .jobs
            .iter()
            .map(|(h, (r, _))| (*h, r.clone()))
            .collect()
    }

    /// Submitted jobs whose name starts with `prefix` (e.g. `"driver_"`).
    pub fn jobs_named(&self, prefix: &str) -> Vec<(JobHandle, JobRequest)> {
        self.submissions()
            .into_iter()
            .filter(|(_, r)| r.name.starts_with(prefix))
            .collect()
    }

    pub fn state_of(&self, handle: JobHandle) -> Option<JobState> {
        let inner = self.inner.lock().unwrap();
        inner.jobs.get(&handle).map(|(_, s)| s.state)
    }

    pub fn unfinished(&self) -> Vec<JobHandle> {
        let inner = self.inner.lock().unwrap();
        inner
            .jobs
            .iter()
            .filter(|(_, (_, s))| !s.state.is_finished())
            .map(|(h, _)| *h)
            .collect()
    }

    pub fn cancels(&self) -> Vec<JobHandle> {
        self.inner.lock().unwrap().cancels.clone()
    }

    pub fn priority_calls(&self) -> Vec<(Vec<JobHandle>, u32)> {
        self.inner.lock().unwrap().priority_calls.clone()
    }

    pub fn fail_status_queries(&self, fail: bool) {
        self.inner.lock().unwrap().fail_status = fail;
    }

    pub fn fail_submissions(&self, fail: bool) {
        self.inner.lock().unwrap().fail_submit = fail;
    }

    pub fn set_state(&self, handle: JobHandle, state: JobState) {
        self.set_exit(handle, state, None);
    }

    pub fn set_exit(&self, handle: JobHandle, state: JobState, return_code: Option<i32>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some((_, status)) = inner.jobs.get_mut(&handle) {
            if status.start.is_none() {
                status.start = Some(Utc::now());
            }
            if state.is_finished() {
                status.end = Some(Utc::now());
            }
            status.state = state;
            status.return_code = return_code;
        }
    }

    /// Run every queued job whose dependencies are settled, once.
    ///
    /// `driver` receives the driver's request (inputs then outputs in
    /// `args`) and returns its exit code. Returns how many jobs changed
    /// state.
    pub fn run_wave(&self, mut driver: impl FnMut(&JobRequest) -> i32) -> usize {
        let runnable: Vec<(JobHandle, JobRequest, bool)> = {
            let inner = self.inner.lock().unwrap();
            let category = |h: &JobHandle| {
                inner
                    .jobs
                    .get(h)
                    .map(|(_, s)| s.state.category())
                    .unwrap_or(JobCategory::Unknown)
            };
            inner
                .jobs
                .iter()
                .filter(|(_, (_, s))| s.state == JobState::Queued)
                .filter_map(|(h, (r, _))| {
                    let doomed = r.after_success.iter().any(|d| {
                        matches!(category(d), JobCategory::Failure | JobCategory::Cancelled)
                    });
                    let settled = r
                        .after_success
                        .iter()
                        .all(|d| category(d) == JobCategory::Success)
                        && r.after_completion.iter().all(|d| category(d).is_finished());
                    (doomed || settled).then(|| (*h, r.clone(), doomed))
                })
                .collect()
        };

        for (handle, request, doomed) in runnable.iter() {
            if *doomed {
                self.set_state(*handle, JobState::Cancelled);
                continue;
            }
            let code = match worker_phase(&request.name) {
                Some(phase) => {
                    let descriptor = PathBuf::from(&request.args[2]);
                    if run_worker(phase, &descriptor).is_ok() { 0 } else { 1 }
                }
                None => driver(request),
            };
            let state = if code == 0 {
                JobState::Completed
            } else {
                JobState::Failed
            };
            self.set_exit(*handle, state, Some(code));
        }
        runnable.len()
    }

    /// Call [`run_wave`](Self::run_wave) until nothing is runnable.
    pub fn run_all(&self, mut driver: impl FnMut(&JobRequest) -> i32) -> usize {
        let mut total = 0;
        loop {
            let n = self.run_wave(&mut driver);
            if n == 0 {
                return total;
            }
            total += n;
        }
    }
}

fn worker_phase(job_name: &str) -> Option<WorkerPhase> {
    if job_name.starts_with("setup_") {
        Some(WorkerPhase::Setup)
    } else if job_name.starts_with("bookkeeping_") {
        Some(WorkerPhase::Bookkeeping)
    } else if job_name.starts_with("cable_") {
        Some(WorkerPhase::Cable)
    } else {
        None
    }
}

impl SchedulerBackend for ScriptedScheduler {
    fn submit(&self, request: JobRequest) -> BackendFuture<'_, JobHandle> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_submit {
                return Err(FleetError::Submission("scripted submission failure".into()));
            }
            inner.next_id += 1;
            let handle = JobHandle::new(inner.next_id);
            let mut status = JobStatus::unknown();
            status.state = JobState::Queued;
            inner.jobs.insert(handle, (request, status));
            Ok(handle)
        })
    }

    fn cancel(&self, handle: JobHandle) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.cancels.push(handle);
            if let Some((_, status)) = inner.jobs.get_mut(&handle) {
                if !status.state.is_finished() {
                    status.state = JobState::Cancelled;
                    status.end = Some(Utc::now());
                }
            }
            Ok(())
        })
    }

    fn get_status(&self, handles: &[JobHandle]) -> BackendFuture<'_, HashMap<JobHandle, JobStatus>> {
        let handles = handles.to_vec();
        Box::pin(async move {
            let inner = self.inner.lock().unwrap();
            if inner.fail_status {
                return Err(FleetError::Backend("scripted accounting failure".into()));
            }
            Ok(handles
                .into_iter()
                .map(|h| {
                    let status = inner
                        .jobs
                        .get(&h)
                        .map(|(_, s)| s.clone())
                        .unwrap_or_else(JobStatus::unknown);
                    (h, status)
                })
                .collect())
        })
    }

    fn set_priority(&self, handles: &[JobHandle], priority: u32) -> BackendFuture<'_, ()> {
        let handles = handles.to_vec();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.priority_calls.push((handles, priority));
            Ok(())
        })
    }

    fn is_alive(&self) -> BackendFuture<'_, bool> {
        Box::pin(async { Ok(true) })
    }
}
