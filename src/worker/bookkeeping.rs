// src/worker/bookkeeping.rs

use anyhow::Result;
use tracing::{info, warn};

use crate::archive::checksum_file;
use crate::worker::check::ContentCheck;
use crate::worker::descriptor::{OutputReport, StepDescriptor, TaskReport, write_toml};

/// Checksum and check every expected output, then write the report.
///
/// Missing or invalid outputs are reported, not raised: the report is the
/// verdict. Only failing to write the report is an error.
pub fn run_bookkeeping(desc: &StepDescriptor, check: &dyn ContentCheck) -> Result<TaskReport> {
    let mut report = TaskReport::default();

    for output in desc.outputs.iter() {
        let entry = if !output.path.is_file() {
            OutputReport {
                name: output.name.clone(),
                path: output.path.clone(),
                passed: false,
                checksum: None,
                reason: Some("output was not produced".to_string()),
            }
        } else {
            let verdict = check.check(&output.path, output.columns);
            let checksum = checksum_file(&output.path)?;
            OutputReport {
                name: output.name.clone(),
                path: output.path.clone(),
                passed: verdict.passed,
                checksum: Some(checksum),
                reason: verdict.reason,
            }
        };
        if !entry.passed {
            warn!(
                component = %desc.component,
                output = %entry.name,
                reason = entry.reason.as_deref().unwrap_or(""),
                "output failed checks"
            );
        }
        report.outputs.push(entry);
    }

    write_toml(&desc.report, &report)?;
    info!(component = %desc.component, report = ?desc.report, "bookkeeping report written");
    Ok(report)
}
