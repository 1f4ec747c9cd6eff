// tests/local_scheduler.rs
#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pipefleet::exec::{JobHandle, JobRequest, JobState, JobStatus, LocalScheduler, SchedulerBackend};
use pipefleet::types::JobIdentity;
use pipefleet_test_utils::{init_tracing, with_timeout};

fn sh(dir: &Path, name: &str, script: &str) -> JobRequest {
    JobRequest {
        name: name.to_string(),
        workdir: dir.to_path_buf(),
        program: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string(), script.to_string()],
        identity: JobIdentity::default(),
        priority: 1,
        cpus: 1,
        stdout_path: dir.join(format!("{name}.out")),
        stderr_path: dir.join(format!("{name}.err")),
        after_success: vec![],
        after_completion: vec![],
    }
}

fn scheduler(max_concurrent: usize) -> LocalScheduler {
    init_tracing();
    LocalScheduler::with_tick(max_concurrent, Duration::from_millis(5))
}

/// Poll until `handle` reaches a finished state.
async fn wait_finished(sched: &LocalScheduler, handle: JobHandle) -> JobStatus {
    with_timeout(async {
        loop {
            let statuses = sched.get_status(&[handle]).await.unwrap();
            let status = statuses[&handle].clone();
            if status.state.is_finished() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

async fn wait_state(sched: &LocalScheduler, handle: JobHandle, state: JobState) {
    with_timeout(async {
        loop {
            let statuses = sched.get_status(&[handle]).await.unwrap();
            if statuses[&handle].state == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

#[tokio::test]
async fn test_success_dependency_orders_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let sched = scheduler(4);

    let first = sched
        .submit(sh(dir.path(), "first", "sleep 0.05; echo first >> order"))
        .await
        .unwrap();
    let mut second = sh(dir.path(), "second", "echo second >> order");
    second.after_success = vec![first];
    let second = sched.submit(second).await.unwrap();

    let status = wait_finished(&sched, second).await;
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.return_code, Some(0));
    assert!(status.start.is_some() && status.end.is_some());
    assert_eq!(
        fs::read_to_string(dir.path().join("order")).unwrap(),
        "first\nsecond\n"
    );
}

#[tokio::test]
async fn test_failed_dependency_dooms_after_success_but_not_after_completion() {
    let dir = tempfile::tempdir().unwrap();
    let sched = scheduler(4);

    let failing = sched
        .submit(sh(dir.path(), "failing", "exit 3"))
        .await
        .unwrap();
    let mut doomed = sh(dir.path(), "doomed", "touch doomed_ran");
    doomed.after_success = vec![failing];
    let doomed = sched.submit(doomed).await.unwrap();
    let mut cleanup = sh(dir.path(), "cleanup", "touch cleanup_ran");
    cleanup.after_completion = vec![failing];
    let cleanup = sched.submit(cleanup).await.unwrap();

    let failed = wait_finished(&sched, failing).await;
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.return_code, Some(3));

    assert_eq!(wait_finished(&sched, doomed).await.state, JobState::Cancelled);
    assert_eq!(wait_finished(&sched, cleanup).await.state, JobState::Completed);
    assert!(!dir.path().join("doomed_ran").exists());
    assert!(dir.path().join("cleanup_ran").exists());
}

#[tokio::test]
async fn test_cancel_kills_running_process() {
    let dir = tempfile::tempdir().unwrap();
    let sched = scheduler(1);

    let sleeper = sched
        .submit(sh(dir.path(), "sleeper", "sleep 30"))
        .await
        .unwrap();
    wait_state(&sched, sleeper, JobState::Running).await;

    sched.cancel(sleeper).await.unwrap();
    let status = wait_finished(&sched, sleeper).await;
    assert_eq!(status.state, JobState::Cancelled);

    // Cancelling a finished job is a no-op.
    sched.cancel(sleeper).await.unwrap();
    let err = sched.cancel(JobHandle::new(999)).await.unwrap_err();
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_output_is_redirected_to_log_files() {
    let dir = tempfile::tempdir().unwrap();
    let sched = scheduler(2);

    let job = sched
        .submit(sh(dir.path(), "talk", "echo to-out; echo to-err >&2"))
        .await
        .unwrap();
    wait_finished(&sched, job).await;

    assert_eq!(
        fs::read_to_string(dir.path().join("talk.out")).unwrap(),
        "to-out\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("talk.err")).unwrap(),
        "to-err\n"
    );
}

#[tokio::test]
async fn test_unknown_dependency_is_a_submission_error() {
    let dir = tempfile::tempdir().unwrap();
    let sched = scheduler(1);

    let mut req = sh(dir.path(), "orphan", "true");
    req.after_completion = vec![JobHandle::new(77)];
    let err = sched.submit(req).await.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_missing_program_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let sched = scheduler(1);

    let mut req = sh(dir.path(), "ghost", "");
    req.program = dir.path().join("does-not-exist");
    let job = sched.submit(req).await.unwrap();

    let status = wait_finished(&sched, job).await;
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.return_code, Some(-1));
}

#[tokio::test]
async fn test_priority_decides_order_when_slots_are_scarce() {
    let dir = tempfile::tempdir().unwrap();
    let sched = scheduler(1);

    let blocker = sched
        .submit(sh(dir.path(), "blocker", "sleep 0.2"))
        .await
        .unwrap();
    wait_state(&sched, blocker, JobState::Running).await;

    let low = sched
        .submit(sh(dir.path(), "low", "echo low >> order"))
        .await
        .unwrap();
    let high = sched
        .submit(sh(dir.path(), "high", "echo high >> order"))
        .await
        .unwrap();
    sched.set_priority(&[high], 9).await.unwrap();

    wait_finished(&sched, low).await;
    wait_finished(&sched, high).await;
    assert_eq!(
        fs::read_to_string(dir.path().join("order")).unwrap(),
        "high\nlow\n"
    );
    assert!(sched.is_alive().await.unwrap());
}
