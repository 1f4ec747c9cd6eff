// src/exec/process.rs

//! Running one local job as an OS process.

use std::fs::File;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::exec::backend::JobRequest;

/// How a local job process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// Killed because the job was cancelled.
    Killed,
    /// The process could not be started at all.
    SpawnFailed,
}

/// Run the job's program with stdout/stderr redirected to the requested
/// files, until it exits or `cancel_rx` fires.
///
/// If the cancel channel fires the child is killed. If the sender is dropped
/// without sending, the process keeps running to completion.
pub async fn run_process(request: &JobRequest, cancel_rx: oneshot::Receiver<()>) -> ProcessOutcome {
    match run_process_inner(request, cancel_rx).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(job = %request.name, error = %format!("{err:#}"), "job process error");
            ProcessOutcome::SpawnFailed
        }
    }
}

async fn run_process_inner(
    request: &JobRequest,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<ProcessOutcome> {
    info!(
        job = %request.name,
        program = ?request.program,
        "starting job process"
    );

    let stdout = File::create(&request.stdout_path)
        .with_context(|| format!("creating stdout file {:?}", request.stdout_path))?;
    let stderr = File::create(&request.stderr_path)
        .with_context(|| format!("creating stderr file {:?}", request.stderr_path))?;

    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args)
        .current_dir(&request.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for job '{}'", request.name))?;

    let mut cancel_open = true;
    loop {
        tokio::select! {
            status_res = child.wait() => {
                let status = status_res.with_context(|| {
                    format!("waiting for process of job '{}'", request.name)
                })?;
                let code = status.code();
                let signal = exit_signal(&status);
                info!(
                    job = %request.name,
                    exit_code = ?code,
                    signal = ?signal,
                    success = status.success(),
                    "job process exited"
                );
                return Ok(ProcessOutcome::Exited { code, signal });
            }

            cancel = &mut cancel_rx, if cancel_open => {
                match cancel {
                    Ok(()) => {
                        info!(job = %request.name, "cancellation requested; killing process");
                        if let Err(e) = child.kill().await {
                            warn!(
                                job = %request.name,
                                error = %e,
                                "failed to kill job process on cancellation"
                            );
                        }
                        return Ok(ProcessOutcome::Killed);
                    }
                    Err(_) => {
                        debug!(job = %request.name, "cancel channel closed without cancellation");
                        cancel_open = false;
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
