// src/exec/slurm.rs

//! Slurm backend driven through its command-line tools.

use std::collections::HashMap;
use std::ffi::OsString;
use std::process::Stdio;

use anyhow::{Context, anyhow};
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::SchedulerSection;
use crate::errors::FleetError;
use crate::exec::accounting::{ACCOUNTING_FORMAT, parse_accounting};
use crate::exec::backend::{
    BackendFuture, JobHandle, JobRequest, JobStatus, SchedulerBackend,
};

pub struct SlurmScheduler {
    submit_command: String,
    cancel_command: String,
    accounting_command: String,
    priority_command: String,
    job_id: Regex,
}

impl SlurmScheduler {
    pub fn from_config(cfg: &SchedulerSection) -> crate::errors::Result<Self> {
        let job_id = Regex::new(r"^\s*(\d+)")
            .map_err(|e| FleetError::ConfigError(format!("job id pattern: {e}")))?;
        Ok(Self {
            submit_command: cfg.submit_command.clone(),
            cancel_command: cfg.cancel_command.clone(),
            accounting_command: cfg.accounting_command.clone(),
            priority_command: cfg.priority_command.clone(),
            job_id,
        })
    }

    /// Arguments for `sbatch`, program and program arguments last.
    pub fn submit_args(request: &JobRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--parsable".into(),
            "-D".into(),
            request.workdir.clone().into(),
            "-J".into(),
            request.name.clone().into(),
            format!("--priority={}", request.priority).into(),
            "-c".into(),
            request.cpus.to_string().into(),
            "-o".into(),
            request.stdout_path.clone().into(),
            "-e".into(),
            request.stderr_path.clone().into(),
        ];
        if let Some(uid) = request.identity.uid {
            args.push(format!("--uid={uid}").into());
        }
        if let Some(gid) = request.identity.gid {
            args.push(format!("--gid={gid}").into());
        }
        if let Some(dependency) = dependency_flag(request) {
            args.push("--kill-on-invalid-dep=yes".into());
            args.push(format!("--dependency={dependency}").into());
        }
        args.push(request.program.clone().into());
        args.extend(request.args.iter().map(OsString::from));
        args
    }

    fn parse_job_id(&self, stdout: &str) -> Option<u64> {
        self.job_id
            .captures(stdout)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

/// `afterok:1:2,afterany:3`, or `None` without dependencies.
pub fn dependency_flag(request: &JobRequest) -> Option<String> {
    let mut parts = Vec::new();
    if !request.after_success.is_empty() {
        parts.push(join_ids("afterok", &request.after_success));
    }
    if !request.after_completion.is_empty() {
        parts.push(join_ids("afterany", &request.after_completion));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}

fn join_ids(kind: &str, handles: &[JobHandle]) -> String {
    let mut s = kind.to_string();
    for h in handles {
        s.push(':');
        s.push_str(&h.to_string());
    }
    s
}

/// Run a scheduler tool and return its stdout.
async fn run_tool(program: &str, args: &[OsString]) -> anyhow::Result<String> {
    debug!(program, ?args, "running scheduler tool");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("spawning '{program}'"))?;

    if !output.status.success() {
        return Err(anyhow!(
            "'{program}' exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn id_list(handles: &[JobHandle]) -> String {
    handles
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl SchedulerBackend for SlurmScheduler {
    fn submit(&self, request: JobRequest) -> BackendFuture<'_, JobHandle> {
        Box::pin(async move {
            let args = Self::submit_args(&request);
            let stdout = run_tool(&self.submit_command, &args)
                .await
                .map_err(|e| FleetError::Submission(format!("{}: {e:#}", request.name)))?;
            let id = self.parse_job_id(&stdout).ok_or_else(|| {
                FleetError::Submission(format!(
                    "{}: unexpected submit output {:?}",
                    request.name,
                    stdout.trim()
                ))
            })?;
            info!(job_id = id, name = %request.name, "job submitted");
            Ok(JobHandle::new(id))
        })
    }

    fn cancel(&self, handle: JobHandle) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            run_tool(&self.cancel_command, &[handle.to_string().into()])
                .await
                .map_err(|e| FleetError::Backend(format!("cancel {handle}: {e:#}")))?;
            debug!(job_id = handle.id(), "job cancelled");
            Ok(())
        })
    }

    fn get_status(
        &self,
        handles: &[JobHandle],
    ) -> BackendFuture<'_, HashMap<JobHandle, JobStatus>> {
        let handles = handles.to_vec();
        Box::pin(async move {
            if handles.is_empty() {
                return Ok(HashMap::new());
            }
            let args: Vec<OsString> = vec![
                "--parsable2".into(),
                "--noheader".into(),
                "--format".into(),
                ACCOUNTING_FORMAT.into(),
                "-j".into(),
                id_list(&handles).into(),
            ];
            let stdout = run_tool(&self.accounting_command, &args)
                .await
                .map_err(|e| FleetError::Backend(format!("accounting query: {e:#}")))?;

            let mut parsed = parse_accounting(&stdout);
            let statuses = handles
                .into_iter()
                .map(|h| (h, parsed.remove(&h).unwrap_or_else(JobStatus::unknown)))
                .collect();
            Ok(statuses)
        })
    }

    fn set_priority(&self, handles: &[JobHandle], priority: u32) -> BackendFuture<'_, ()> {
        let handles = handles.to_vec();
        Box::pin(async move {
            if handles.is_empty() {
                return Ok(());
            }
            let args: Vec<OsString> = vec![
                "update".into(),
                format!("JobId={}", id_list(&handles)).into(),
                format!("Priority={priority}").into(),
            ];
            run_tool(&self.priority_command, &args)
                .await
                .map_err(|e| FleetError::Backend(format!("priority update: {e:#}")))?;
            Ok(())
        })
    }

    fn is_alive(&self) -> BackendFuture<'_, bool> {
        Box::pin(async move {
            let args: Vec<OsString> = vec![
                "--parsable2".into(),
                "--noheader".into(),
                "--format".into(),
                ACCOUNTING_FORMAT.into(),
            ];
            Ok(run_tool(&self.accounting_command, &args).await.is_ok())
        })
    }
}
