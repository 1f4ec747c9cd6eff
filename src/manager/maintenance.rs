// src/manager/maintenance.rs

//! Background maintenance, driven one bounded slice per poll.

use std::fs;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::archive::{Archive, DatasetId, checksum_file};
use crate::config::MaintenanceSection;
use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceProgress {
    /// The task completed a full pass.
    Finished,
    /// More work remains; call `step` again later.
    MoreWork,
}

/// A maintenance job that does a bounded amount of work per call.
pub trait MaintenanceTask: Send {
    fn name(&self) -> &'static str;

    fn step(&mut self, archive: &mut Archive) -> Result<MaintenanceProgress>;
}

/// Verifies archived dataset files in batches. A file that vanished or no
/// longer matches its checksum is dropped, leaving the dataset symbolic.
#[derive(Debug)]
pub struct ExternalFileCheck {
    batch: usize,
    after: Option<DatasetId>,
}

impl ExternalFileCheck {
    pub fn new(batch: usize) -> Self {
        Self {
            batch: batch.max(1),
            after: None,
        }
    }
}

impl MaintenanceTask for ExternalFileCheck {
    fn name(&self) -> &'static str {
        "external-file-check"
    }

    fn step(&mut self, archive: &mut Archive) -> Result<MaintenanceProgress> {
        let batch: Vec<DatasetId> = archive
            .datasets()
            .filter(|d| d.location.is_some() && self.after.is_none_or(|a| d.id > a))
            .map(|d| d.id)
            .take(self.batch)
            .collect();

        for id in batch.iter().copied() {
            let ds = archive.dataset_mut(id)?;
            let Some(path) = ds.location.clone() else {
                continue;
            };
            let intact = path.is_file()
                && checksum_file(&path)
                    .map(|sum| sum == ds.checksum)
                    .unwrap_or(false);
            if !intact {
                warn!(dataset = %id, path = ?path, "archived file missing or changed; dataset is now symbolic");
                ds.location = None;
            }
        }

        if batch.len() < self.batch {
            self.after = None;
            Ok(MaintenanceProgress::Finished)
        } else {
            self.after = batch.last().copied();
            Ok(MaintenanceProgress::MoreWork)
        }
    }
}

/// Removes sandboxes of finished top-level runs once past retention.
#[derive(Debug)]
pub struct SandboxCleanup {
    retention: Duration,
}

impl SandboxCleanup {
    pub fn new(retention: Duration) -> Self {
        Self { retention }
    }
}

impl MaintenanceTask for SandboxCleanup {
    fn name(&self) -> &'static str {
        "sandbox-cleanup"
    }

    fn step(&mut self, archive: &mut Archive) -> Result<MaintenanceProgress> {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let now = Utc::now();

        for run in archive.runs_mut() {
            if !run.is_top_level() || !run.state.is_terminal() {
                continue;
            }
            let expired = run.finished.is_some_and(|f| now - f >= retention);
            if !expired {
                continue;
            }
            let Some(dir) = run.sandbox.take() else {
                continue;
            };
            match fs::remove_dir_all(&dir) {
                Ok(()) => info!(run_id = %run.id, dir = ?dir, "sandbox removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(run_id = %run.id, dir = ?dir, error = %e, "could not remove sandbox");
                    run.sandbox = Some(dir);
                }
            }
        }
        Ok(MaintenanceProgress::Finished)
    }
}

/// Round-robin over the configured tasks.
pub struct Maintenance {
    tasks: Vec<Box<dyn MaintenanceTask>>,
    current: usize,
}

impl Maintenance {
    pub fn new(tasks: Vec<Box<dyn MaintenanceTask>>) -> Self {
        Self { tasks, current: 0 }
    }

    pub fn from_config(cfg: &MaintenanceSection) -> Self {
        if !cfg.enabled {
            return Self::new(Vec::new());
        }
        Self::new(vec![
            Box::new(ExternalFileCheck::new(cfg.file_check_batch)),
            Box::new(SandboxCleanup::new(Duration::from_secs(
                cfg.sandbox_retention_secs,
            ))),
        ])
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Run one slice of the current task; move on once it finishes a pass.
    pub fn step(&mut self, archive: &mut Archive) {
        let Some(task) = self.tasks.get_mut(self.current) else {
            return;
        };
        match task.step(archive) {
            Ok(MaintenanceProgress::MoreWork) => {}
            Ok(MaintenanceProgress::Finished) => {
                debug!(task = task.name(), "maintenance pass finished");
                self.current = (self.current + 1) % self.tasks.len();
            }
            Err(e) => {
                warn!(task = task.name(), error = %e, "maintenance step failed");
                self.current = (self.current + 1) % self.tasks.len();
            }
        }
    }
}
