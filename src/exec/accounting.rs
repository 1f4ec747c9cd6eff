// src/exec/accounting.rs

//! Parsing of `sacct --parsable2 --noheader` output.
//!
//! Expected columns: `JobID|JobName|Start|End|State|Priority|ExitCode`.

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::exec::backend::{JobHandle, JobState, JobStatus};

/// Columns requested from the accounting tool, in order.
pub const ACCOUNTING_FORMAT: &str = "JobID,JobName,Start,End,State,Priority,ExitCode";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse accounting rows into a status per job.
///
/// Job step rows (`123.batch`, `123.0`) and malformed lines are skipped.
pub fn parse_accounting(output: &str) -> HashMap<JobHandle, JobStatus> {
    let mut statuses = HashMap::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() < 7 {
            warn!(line, "ignoring short accounting row");
            continue;
        }

        let job_id = fields[0];
        if job_id.contains('.') {
            continue;
        }
        let Ok(id) = job_id.parse::<u64>() else {
            debug!(job_id, "ignoring accounting row with non-numeric job id");
            continue;
        };

        let (return_code, signal) = parse_exit_code(fields[6]);
        statuses.insert(
            JobHandle::new(id),
            JobStatus {
                state: parse_state(fields[4]),
                start: parse_time(fields[2]),
                end: parse_time(fields[3]),
                return_code,
                signal,
            },
        );
    }

    statuses
}

/// Map a Slurm state string onto [`JobState`].
///
/// `CANCELLED by 1234` and similar suffixed forms keep only the first word.
pub fn parse_state(raw: &str) -> JobState {
    let word = raw.split_whitespace().next().unwrap_or("");
    match word.trim_end_matches('+') {
        "PENDING" | "REQUEUED" | "REQUEUE_FED" | "REQUEUE_HOLD" | "CONFIGURING" => {
            JobState::Queued
        }
        "RUNNING" | "COMPLETING" | "STAGE_OUT" | "SIGNALING" => JobState::Running,
        "SUSPENDED" | "STOPPED" => JobState::Suspended,
        "RESIZING" => JobState::Resizing,
        "PREEMPTED" => JobState::Preempted,
        "COMPLETED" => JobState::Completed,
        "FAILED" | "OUT_OF_MEMORY" | "BOOT_FAIL" => JobState::Failed,
        "CANCELLED" | "DEADLINE" | "REVOKED" => JobState::Cancelled,
        "TIMEOUT" => JobState::TimedOut,
        "NODE_FAIL" => JobState::NodeFailed,
        _ => JobState::Unknown,
    }
}

/// sacct prints times in the controller host's local zone, without an
/// offset. A time skipped by a DST change parses as `None`.
fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    match raw {
        "" | "Unknown" | "None" => None,
        s => NaiveDateTime::parse_from_str(s, TIME_FORMAT)
            .ok()
            .and_then(|t| Local.from_local_datetime(&t).earliest())
            .map(|t| t.with_timezone(&Utc)),
    }
}

/// `"code:signal"`, either half possibly missing.
fn parse_exit_code(raw: &str) -> (Option<i32>, Option<i32>) {
    let mut parts = raw.splitn(2, ':');
    let code = parts.next().and_then(|c| c.trim().parse().ok());
    let signal = parts
        .next()
        .and_then(|s| s.trim().parse().ok())
        .filter(|s: &i32| *s != 0);
    (code, signal)
}
