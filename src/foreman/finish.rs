// src/foreman/finish.rs

//! Absorbing finished tasks: reading worker reports, filling in or creating
//! execution records, archiving retained outputs, and unblocking tasks that
//! waited on a recovery.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::archive::{Archive, DatasetId, ExecRecordId, TransformationKey};
use crate::errors::Result;
use crate::exec::JobStatus;
use crate::foreman::expand::{expand, set_cable_data};
use crate::foreman::task::{RunTask, TaskOutcome, TaskPurpose};
use crate::foreman::Foreman;
use crate::memo::{ProducedOutput, first_mismatch, record_execution};
use crate::pipeline::{Cable, Transformation};
use crate::run::{ComponentKey, FailureStage};
use crate::types::Reusability;
use crate::worker::{TaskReport, read_toml};

/// Bytes of captured output kept in an execution log.
const LOG_TAIL_BYTES: u64 = 64 * 1024;

fn read_tail(path: &Path) -> String {
    let Ok(mut file) = File::open(path) else {
        return String::new();
    };
    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
    if len > LOG_TAIL_BYTES && file.seek(SeekFrom::Start(len - LOG_TAIL_BYTES)).is_err() {
        return String::new();
    }
    let mut buf = Vec::new();
    if file.read_to_end(&mut buf).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Copy the driver's (or cable job's) accounting and output tails into the
/// task's execution log.
pub(crate) fn log_job_status(archive: &mut Archive, task: &RunTask, status: &JobStatus) {
    let Some(log) = archive.exec_log_mut(task.exec_log) else {
        return;
    };
    log.start = status.start;
    log.end = status.end.or(Some(chrono::Utc::now()));
    log.return_code = status.return_code;
    log.signal = status.signal;
    if let Some(path) = log.stdout_path.clone() {
        log.stdout = read_tail(&path);
    }
    if let Some(path) = log.stderr_path.clone() {
        log.stderr = read_tail(&path);
    }
}

/// What a successful task produced, once checked against the memo.
enum Absorbed {
    Done,
    Failed(FailureStage),
}

impl Foreman {
    pub(crate) async fn worker_finished(
        &mut self,
        archive: &mut Archive,
        task: RunTask,
        outcome: TaskOutcome,
    ) -> Result<()> {
        let key = task.key();
        match (task.pending.purpose, outcome) {
            (TaskPurpose::Recovery { dataset }, TaskOutcome::Succeeded) => {
                self.recovery_finished(archive, &task, dataset).await
            }
            (TaskPurpose::Recovery { dataset }, _) => {
                warn!(run_id = %self.run_id, task = %task.label, ?outcome, "recovery task did not succeed");
                self.recovery_failed(archive, dataset)
            }
            (TaskPurpose::Novel, TaskOutcome::Succeeded) => {
                let absorbed = match key {
                    ComponentKey::Step { .. } => self.absorb_step(archive, &task)?,
                    _ => self.absorb_cable(archive, &task)?,
                };
                match absorbed {
                    Absorbed::Done => {
                        info!(
                            run_id = %self.run_id,
                            task = %task.label,
                            depth = task.depth,
                            "task finished"
                        );
                        let expansion = expand(archive, self.run_id)?;
                        self.handle_expansion(archive, expansion).await
                    }
                    Absorbed::Failed(stage) => {
                        self.fail_component(archive, key, stage, false)?;
                        self.mop_up(archive, None)
                    }
                }
            }
            (TaskPurpose::Novel, TaskOutcome::Failed(stage)) => {
                self.fail_component(archive, key, stage, false)?;
                self.mop_up(archive, None)
            }
            (TaskPurpose::Novel, TaskOutcome::Cancelled(stage)) => {
                self.fail_component(archive, key, stage, true)?;
                self.mop_up(archive, None)
            }
        }
    }

    fn read_report(&self, task: &RunTask) -> Option<TaskReport> {
        match read_toml::<TaskReport>(&task.report) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(run_id = %self.run_id, task = %task.label, error = %e, "unreadable task report");
                None
            }
        }
    }

    fn absorb_step(&mut self, archive: &mut Archive, task: &RunTask) -> Result<Absorbed> {
        let ComponentKey::Step { run, step } = task.key() else {
            return Ok(Absorbed::Failed(FailureStage::Bookkeeping));
        };
        let Some(report) = self.read_report(task) else {
            return Ok(Absorbed::Failed(FailureStage::Bookkeeping));
        };
        if let Some(bad) = report.first_failure() {
            warn!(
                run_id = %self.run_id,
                task = %task.label,
                output = %bad.name,
                reason = bad.reason.as_deref().unwrap_or("unknown"),
                "output failed its content check"
            );
            return Ok(Absorbed::Failed(FailureStage::Bookkeeping));
        }
        let Some(checksums) = report.checksums() else {
            return Ok(Absorbed::Failed(FailureStage::Bookkeeping));
        };
        if archive
            .exec_log(task.exec_log)
            .is_some_and(|l| l.return_code.is_some_and(|rc| rc != 0))
        {
            return Ok(Absorbed::Failed(FailureStage::Driver));
        }

        let pipeline = archive.run(run)?.pipeline.clone();
        let step_def = &pipeline.steps[step];
        let Transformation::Method(method) = &step_def.transformation else {
            return Ok(Absorbed::Failed(FailureStage::Bookkeeping));
        };
        if checksums.len() != method.outputs.len() {
            return Ok(Absorbed::Failed(FailureStage::Bookkeeping));
        }
        let key = TransformationKey::Method(method.name.clone());

        let mut matched: Option<ExecRecordId> = None;
        if let Some(er) = task.exec_record {
            match first_mismatch(archive, er, &checksums) {
                None => matched = Some(er),
                Some(i) if method.reusable == Reusability::Deterministic => {
                    warn!(
                        run_id = %self.run_id,
                        task = %task.label,
                        exec_record = %er,
                        output = method.outputs.get(i).map(String::as_str).unwrap_or("?"),
                        "deterministic method reproduced different output"
                    );
                    return Ok(Absorbed::Failed(FailureStage::Bookkeeping));
                }
                Some(_) => {
                    debug!(task = %task.label, exec_record = %er, "output differs; recording fresh execution");
                }
            }
        }
        if matched.is_none() && method.reusable != Reusability::NonReusable {
            // another run may have recorded the same execution meanwhile
            matched = archive
                .find_exec_records(&key, &task.inputs)
                .iter()
                .map(|er| er.id)
                .find(|er| first_mismatch(archive, *er, &checksums).is_none());
        }

        let (er, outputs) = match matched {
            Some(er) => {
                let outputs = archive
                    .exec_record(er)
                    .map(|r| r.outputs.clone())
                    .unwrap_or_default();
                (er, outputs)
            }
            None => {
                let produced: Vec<ProducedOutput> = method
                    .outputs
                    .iter()
                    .zip(checksums.iter())
                    .map(|(name, checksum)| ProducedOutput {
                        name: name.clone(),
                        checksum: checksum.clone(),
                    })
                    .collect();
                record_execution(
                    archive,
                    key,
                    task.inputs.clone(),
                    &produced,
                    Some(task.exec_log),
                )
            }
        };

        for (i, (ds, out)) in outputs.iter().zip(report.outputs.iter()).enumerate() {
            self.sandbox.record_location(*ds, out.path.clone());
            if step_def.retains_output(i) {
                self.archive_output(archive, *ds, &out.path)?;
            }
        }

        let rs = &mut archive.run_mut(run)?.steps[step];
        rs.outputs = outputs.into_iter().map(Some).collect();
        rs.record.complete(Some(er), false);
        Ok(Absorbed::Done)
    }

    fn absorb_cable(&mut self, archive: &mut Archive, task: &RunTask) -> Result<Absorbed> {
        let key = task.key();
        let Some(report) = self.read_report(task) else {
            return Ok(Absorbed::Failed(FailureStage::Cable));
        };
        let Some(produced) = report.outputs.first().filter(|o| o.passed) else {
            return Ok(Absorbed::Failed(FailureStage::Cable));
        };
        let Some(checksum) = produced.checksum.clone() else {
            return Ok(Absorbed::Failed(FailureStage::Cable));
        };
        let Some(&source) = task.inputs.first() else {
            return Ok(Absorbed::Failed(FailureStage::Cable));
        };

        let run = archive.run(key.run())?;
        let pipeline = run.pipeline.clone();
        let materialize = run.cable_must_persist(&key);
        let (cable, name): (&Cable, String) = match key {
            ComponentKey::InputCable { step, input, .. } => {
                let cable = &pipeline.steps[step].cables[input];
                let name = pipeline.steps[step]
                    .transformation
                    .input_names()
                    .get(input)
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                (cable, name)
            }
            ComponentKey::OutputCable { output, .. } => {
                let oc = &pipeline.outputs[output];
                (&oc.cable, oc.name.clone())
            }
            ComponentKey::Step { .. } => return Ok(Absorbed::Failed(FailureStage::Cable)),
        };

        let sums = [checksum.clone()];
        let output = match task.exec_record {
            Some(er) if first_mismatch(archive, er, &sums).is_some() => {
                warn!(
                    run_id = %self.run_id,
                    task = %task.label,
                    exec_record = %er,
                    "cable reproduced different output"
                );
                return Ok(Absorbed::Failed(FailureStage::Cable));
            }
            Some(er) => archive
                .exec_record(er)
                .and_then(|r| r.outputs.first().copied()),
            None => None,
        };
        let output = match output {
            Some(ds) => ds,
            None => {
                let (_, datasets) = record_execution(
                    archive,
                    TransformationKey::Cable(cable.signature()),
                    vec![source],
                    &[ProducedOutput { name, checksum }],
                    Some(task.exec_log),
                );
                match datasets.first() {
                    Some(ds) => *ds,
                    None => return Ok(Absorbed::Failed(FailureStage::Cable)),
                }
            }
        };

        self.sandbox.record_location(output, produced.path.clone());
        if materialize {
            self.archive_output(archive, output, &produced.path)?;
        }
        let er = archive.dataset(output)?.producer;
        set_cable_data(archive, &key, Some(source), Some(output))?;
        if let Some(rec) = archive.component_record_mut(&key) {
            rec.complete(task.exec_record.or(er), false);
        }
        Ok(Absorbed::Done)
    }

    /// Archive `dataset` from `path` unless it is already materialized.
    fn archive_output(&self, archive: &mut Archive, dataset: DatasetId, path: &Path) -> Result<()> {
        if archive.dataset(dataset)?.is_symbolic() {
            archive.materialize(dataset, path, &self.settings.archive_root)?;
        }
        Ok(())
    }

    async fn recovery_finished(
        &mut self,
        archive: &mut Archive,
        task: &RunTask,
        dataset: DatasetId,
    ) -> Result<()> {
        let Some(report) = self.read_report(task) else {
            return self.recovery_failed(archive, dataset);
        };
        let verified = match (task.exec_record, report.checksums()) {
            (Some(er), Some(sums)) if first_mismatch(archive, er, &sums).is_none() => {
                archive.exec_record(er).map(|r| r.outputs.clone())
            }
            _ => None,
        };
        let Some(outputs) = verified else {
            warn!(run_id = %self.run_id, task = %task.label, %dataset, "recovered output does not match its record");
            return self.recovery_failed(archive, dataset);
        };

        for (ds, out) in outputs.iter().zip(report.outputs.iter()) {
            self.sandbox.record_location(*ds, out.path.clone());
        }
        let waiters = match self.recoveries.get_mut(&dataset) {
            Some(r) => {
                r.in_progress = false;
                std::mem::take(&mut r.waiters)
            }
            None => Vec::new(),
        };
        info!(run_id = %self.run_id, %dataset, waiters = waiters.len(), "dataset recovered");
        let doomed = self.submit_pending(archive, waiters).await?;
        self.fail_doomed(archive, doomed)
    }

    /// Blocked tasks retry on a later poll while attempts remain; after that
    /// they fail.
    fn recovery_failed(&mut self, archive: &mut Archive, dataset: DatasetId) -> Result<()> {
        let max = self.settings.max_recovery_attempts;
        let Some(recovery) = self.recoveries.get_mut(&dataset) else {
            return Ok(());
        };
        if recovery.attempts < max {
            recovery.in_progress = false;
            let waiters = std::mem::take(&mut recovery.waiters);
            debug!(run_id = %self.run_id, %dataset, attempts = recovery.attempts, "recovery will be retried");
            self.retry.extend(waiters);
            return Ok(());
        }
        warn!(run_id = %self.run_id, %dataset, attempts = recovery.attempts, "recovery attempts exhausted");
        let doomed = self.fail_recovery(dataset);
        self.fail_doomed(archive, doomed)
    }
}
