// src/foreman/submit.rs

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::archive::{Archive, DatasetId};
use crate::errors::{FleetError, Result};
use crate::exec::{JobHandle, JobRequest};
use crate::foreman::expand::Expansion;
use crate::foreman::propagate::settle;
use crate::foreman::task::{PendingTask, RunTask, TaskId, TaskJobs, TaskPurpose};
use crate::foreman::Foreman;
use crate::pipeline::Cable;
use crate::run::{ComponentKey, ComponentState, FailureStage};
use crate::worker::{
    CableDescriptor, ExpectedOutput, StagedInput, StepDescriptor, WorkerPhase, write_toml,
};

const DESCRIPTOR_FILE: &str = "task.toml";
const REPORT_FILE: &str = "report.toml";

pub(crate) fn remove_descriptor(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "could not delete task descriptor"),
    }
}

impl Foreman {
    /// Fail what expansion failed, or submit what it made ready.
    pub(crate) async fn handle_expansion(
        &mut self,
        archive: &mut Archive,
        expansion: Expansion,
    ) -> Result<()> {
        if !expansion.failed.is_empty() {
            for (key, stage) in expansion.failed {
                self.fail_component(archive, key, stage, false)?;
            }
            return self.mop_up(archive, None);
        }
        let pending = expansion.ready.into_iter().map(PendingTask::novel).collect();
        let doomed = self.submit_pending(archive, pending).await?;
        self.fail_doomed(archive, doomed)?;
        // A failing tree does not expand, so a child whose last task just
        // finished is closed here.
        let tree = archive.run_tree(self.run_id);
        settle(archive, &tree)
    }

    /// Submit every task whose inputs are readable; block the others on
    /// recovery of their symbolic inputs.
    ///
    /// Returns components that can no longer run because recovery is
    /// impossible or exhausted.
    pub(crate) async fn submit_pending(
        &mut self,
        archive: &mut Archive,
        tasks: Vec<PendingTask>,
    ) -> Result<Vec<(ComponentKey, FailureStage)>> {
        let mut queue: VecDeque<PendingTask> = tasks.into();
        let mut exhausted: Vec<DatasetId> = Vec::new();

        while let Some(task) = queue.pop_front() {
            if !self.still_wanted(archive, &task) {
                continue;
            }

            let inputs = self.task_inputs(archive, &task)?;
            let missing: Vec<DatasetId> = inputs
                .iter()
                .copied()
                .filter(|ds| self.sandbox.location_of(archive, *ds).is_none())
                .collect();

            if missing.is_empty() {
                self.launch(archive, task, inputs).await?;
                continue;
            }

            for ds in missing {
                let producer = find_producer(archive, self.run_id, ds);
                let max = self.settings.max_recovery_attempts;
                let recovery = self.recoveries.entry(ds).or_default();
                if !recovery.waiters.contains(&task) {
                    recovery.waiters.push(task);
                }
                if recovery.in_progress {
                    continue;
                }
                match producer {
                    Some(key) if recovery.attempts < max => {
                        recovery.in_progress = true;
                        recovery.attempts += 1;
                        info!(
                            run_id = %self.run_id,
                            dataset = %ds,
                            producer = %key,
                            attempt = recovery.attempts,
                            "recovering symbolic dataset"
                        );
                        queue.push_back(PendingTask {
                            key,
                            purpose: TaskPurpose::Recovery { dataset: ds },
                        });
                    }
                    Some(_) => exhausted.push(ds),
                    None => {
                        warn!(run_id = %self.run_id, dataset = %ds, "no component of this run can recover dataset");
                        exhausted.push(ds);
                    }
                }
            }
        }

        let mut doomed = Vec::new();
        for ds in exhausted {
            doomed.extend(self.fail_recovery(ds));
        }
        Ok(doomed)
    }

    fn still_wanted(&self, archive: &Archive, task: &PendingTask) -> bool {
        let run_active = archive
            .run(self.run_id)
            .map(|r| !r.state.is_terminal() && !r.state.is_winding_down())
            .unwrap_or(false);
        if !run_active {
            return false;
        }
        match task.purpose {
            TaskPurpose::Novel => archive.component_state(&task.key) == Some(ComponentState::Ready),
            TaskPurpose::Recovery { dataset } => self
                .recoveries
                .get(&dataset)
                .is_some_and(|r| r.in_progress),
        }
    }

    /// Give up on recovering `dataset`; returns the components that were
    /// waiting on it, directly or through nested recoveries.
    pub(crate) fn fail_recovery(&mut self, dataset: DatasetId) -> Vec<(ComponentKey, FailureStage)> {
        let Some(recovery) = self.recoveries.get_mut(&dataset) else {
            return Vec::new();
        };
        recovery.in_progress = false;
        let waiters = std::mem::take(&mut recovery.waiters);

        let mut doomed = Vec::new();
        for w in waiters {
            match w.purpose {
                TaskPurpose::Novel => doomed.push((w.key, FailureStage::Recovery)),
                TaskPurpose::Recovery { dataset: inner } => doomed.extend(self.fail_recovery(inner)),
            }
        }
        doomed
    }

    /// Inputs of the component, in order.
    fn task_inputs(&self, archive: &Archive, task: &PendingTask) -> Result<Vec<DatasetId>> {
        if let TaskPurpose::Recovery { .. } = task.purpose {
            let er = archive
                .component_record(&task.key)
                .and_then(|r| r.exec_record)
                .and_then(|id| archive.exec_record(id));
            if let Some(er) = er {
                return Ok(er.inputs.clone());
            }
        }

        let run = archive.run(task.key.run())?;
        let inputs = match task.key {
            ComponentKey::Step { step, .. } => run.steps[step]
                .cables
                .iter()
                .map(|c| c.output)
                .collect::<Option<Vec<_>>>(),
            ComponentKey::InputCable { step, input, .. } => {
                run.steps[step].cables[input].input.map(|d| vec![d])
            }
            ComponentKey::OutputCable { output, .. } => {
                run.output_cables[output].input.map(|d| vec![d])
            }
        };
        inputs.ok_or_else(|| {
            FleetError::InvalidInput(format!("component {} has unresolved inputs", task.key))
        })
    }

    fn allocate_task(&mut self) -> TaskId {
        self.next_task += 1;
        TaskId(self.next_task)
    }

    /// Write the descriptor and submit the jobs of one task.
    async fn launch(
        &mut self,
        archive: &mut Archive,
        pending: PendingTask,
        inputs: Vec<DatasetId>,
    ) -> Result<()> {
        let id = self.allocate_task();
        let coords = archive.coordinates(&pending.key);
        let prefix = match pending.key {
            ComponentKey::Step { .. } => "step".to_string(),
            ComponentKey::InputCable { input, .. } => format!("in{}_cable", input + 1),
            ComponentKey::OutputCable { .. } => "output".to_string(),
        };
        let label = format!("{prefix}{}_{id}", coords.label());
        let workdir = self.sandbox.prepare_task_dir(&label)?;
        let descriptor = workdir.join(DESCRIPTOR_FILE);
        let report = workdir.join(REPORT_FILE);
        let recovery = matches!(pending.purpose, TaskPurpose::Recovery { .. });
        let exec_log = archive.create_exec_log(pending.key, recovery);
        let priority = archive.run(self.run_id)?.priority;
        let exec_record = archive
            .component_record(&pending.key)
            .and_then(|r| r.exec_record);

        let input_paths: Vec<PathBuf> = inputs
            .iter()
            .map(|ds| {
                self.sandbox
                    .location_of(archive, *ds)
                    .ok_or(FleetError::UnknownDataset(ds.0))
            })
            .collect::<Result<_>>()?;

        let ctx = JobContext {
            label: &label,
            workdir: &workdir,
            descriptor: &descriptor,
            priority,
        };
        let jobs = match pending.key {
            ComponentKey::Step { run, step } => {
                let pipeline = archive.run(run)?.pipeline.clone();
                let step_def = &pipeline.steps[step];
                let method = step_def.transformation.as_method().ok_or_else(|| {
                    FleetError::InvalidInput(format!(
                        "step '{}' wraps a pipeline and cannot be submitted",
                        step_def.name
                    ))
                })?;
                let desc = StepDescriptor {
                    component: label.clone(),
                    method: method.name.clone(),
                    workdir: workdir.clone(),
                    driver_source: method.driver.clone(),
                    driver: workdir.join(
                        method
                            .driver
                            .file_name()
                            .map(PathBuf::from)
                            .unwrap_or_else(|| PathBuf::from("driver")),
                    ),
                    report: report.clone(),
                    inputs: method
                        .inputs
                        .iter()
                        .zip(input_paths.iter())
                        .map(|(name, source)| StagedInput {
                            name: name.clone(),
                            source: source.clone(),
                            dest: workdir.join("input_data").join(name),
                        })
                        .collect(),
                    outputs: method
                        .outputs
                        .iter()
                        .zip(method.output_columns.iter())
                        .map(|(name, columns)| ExpectedOutput {
                            name: name.clone(),
                            path: workdir.join("output_data").join(name),
                            columns: *columns,
                        })
                        .collect(),
                };
                write_toml(&descriptor, &desc)?;
                self.submit_step_jobs(&ctx, &desc, method.threads).await?
            }
            ComponentKey::InputCable { run, step, input } => {
                let pipeline = archive.run(run)?.pipeline.clone();
                let cable = &pipeline.steps[step].cables[input];
                self.submit_cable_job(&ctx, cable, &input_paths, &report).await?
            }
            ComponentKey::OutputCable { run, output } => {
                let pipeline = archive.run(run)?.pipeline.clone();
                let cable = &pipeline.outputs[output].cable;
                self.submit_cable_job(&ctx, cable, &input_paths, &report).await?
            }
        };

        if let Some(log) = archive.exec_log_mut(exec_log) {
            let (out, err) = match jobs {
                TaskJobs::Step { .. } => ("driver.out", "driver.err"),
                TaskJobs::Cable { .. } => ("cable.out", "cable.err"),
            };
            log.stdout_path = Some(workdir.join("logs").join(out));
            log.stderr_path = Some(workdir.join("logs").join(err));
        }
        if pending.purpose == TaskPurpose::Novel {
            if let Some(record) = archive.component_record_mut(&pending.key) {
                record.begin_running();
                record.exec_log = Some(exec_log);
            }
        }
        for r in self.recoveries.values_mut() {
            r.waiters.retain(|w| *w != pending);
        }

        info!(
            run_id = %self.run_id,
            task = %label,
            coordinates = %coords,
            recovery,
            jobs = ?jobs.handles(),
            "task submitted"
        );
        self.in_flight.insert(
            id,
            RunTask {
                id,
                pending,
                label,
                depth: coords.depth(),
                jobs,
                workdir,
                descriptor,
                report,
                exec_log,
                inputs,
                exec_record,
                logged: false,
            },
        );
        Ok(())
    }

    fn worker_request(&self, ctx: &JobContext<'_>, phase: WorkerPhase) -> JobRequest {
        let name = phase.as_arg();
        JobRequest {
            name: format!("{name}_{}", ctx.label),
            workdir: ctx.workdir.to_path_buf(),
            program: self.settings.worker_program.clone(),
            args: vec![
                "worker".to_string(),
                name.to_string(),
                ctx.descriptor.display().to_string(),
            ],
            identity: self.settings.identity,
            priority: ctx.priority,
            cpus: 1,
            stdout_path: ctx.workdir.join("logs").join(format!("{name}.out")),
            stderr_path: ctx.workdir.join("logs").join(format!("{name}.err")),
            after_success: Vec::new(),
            after_completion: Vec::new(),
        }
    }

    /// Setup, then driver (after setup succeeded), then bookkeeping (after
    /// the driver finished, whatever its outcome).
    async fn submit_step_jobs(
        &self,
        ctx: &JobContext<'_>,
        desc: &StepDescriptor,
        threads: u32,
    ) -> Result<TaskJobs> {
        let setup = self
            .backend
            .submit(self.worker_request(ctx, WorkerPhase::Setup))
            .await?;

        let mut args: Vec<String> = desc
            .inputs
            .iter()
            .map(|i| i.dest.display().to_string())
            .collect();
        args.extend(desc.outputs.iter().map(|o| o.path.display().to_string()));
        let driver_request = JobRequest {
            name: format!("driver_{}", ctx.label),
            workdir: ctx.workdir.to_path_buf(),
            program: desc.driver.clone(),
            args,
            identity: self.settings.identity,
            priority: ctx.priority,
            cpus: threads,
            stdout_path: ctx.workdir.join("logs").join("driver.out"),
            stderr_path: ctx.workdir.join("logs").join("driver.err"),
            after_success: vec![setup],
            after_completion: Vec::new(),
        };
        let driver = match self.backend.submit(driver_request).await {
            Ok(h) => h,
            Err(e) => {
                self.cancel_quietly(&[setup]).await;
                return Err(e);
            }
        };

        let mut bookkeeping_request = self.worker_request(ctx, WorkerPhase::Bookkeeping);
        bookkeeping_request.after_completion = vec![driver];
        let bookkeeping = match self.backend.submit(bookkeeping_request).await {
            Ok(h) => h,
            Err(e) => {
                self.cancel_quietly(&[setup, driver]).await;
                return Err(e);
            }
        };

        Ok(TaskJobs::Step {
            setup,
            driver,
            bookkeeping,
        })
    }

    async fn submit_cable_job(
        &self,
        ctx: &JobContext<'_>,
        cable: &Cable,
        input_paths: &[PathBuf],
        report: &Path,
    ) -> Result<TaskJobs> {
        let source = input_paths.first().cloned().ok_or_else(|| {
            FleetError::InvalidInput(format!("cable {} has no input", ctx.label))
        })?;
        let desc = CableDescriptor {
            component: ctx.label.to_string(),
            source,
            dest: ctx.workdir.join("output"),
            report: report.to_path_buf(),
            wires: cable.wires.clone(),
        };
        write_toml(ctx.descriptor, &desc)?;
        let job = self
            .backend
            .submit(self.worker_request(ctx, WorkerPhase::Cable))
            .await?;
        Ok(TaskJobs::Cable { job })
    }

    async fn cancel_quietly(&self, handles: &[JobHandle]) {
        for h in handles {
            if let Err(e) = self.backend.cancel(*h).await {
                debug!(job_id = h.id(), error = %e, "cancel after partial submission failed");
            }
        }
    }
}

struct JobContext<'a> {
    label: &'a str,
    workdir: &'a Path,
    descriptor: &'a Path,
    priority: u32,
}

/// The component of this run tree that first produced `dataset`.
pub(crate) fn find_producer(
    archive: &Archive,
    top: crate::archive::RunId,
    dataset: DatasetId,
) -> Option<ComponentKey> {
    let producer = archive.dataset(dataset).ok()?.producer?;
    for run_id in archive.run_tree(top) {
        let Ok(run) = archive.run(run_id) else {
            continue;
        };
        for key in run.component_keys() {
            let Some(record) = run.record(&key) else {
                continue;
            };
            if record.exec_record == Some(producer) && record.state == ComponentState::Complete {
                return Some(key);
            }
        }
    }
    None
}
