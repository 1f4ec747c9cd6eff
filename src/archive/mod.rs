// src/archive/mod.rs

//! In-memory metadata store: datasets, execution records, execution logs and
//! runs.
//!
//! The [`Archive`] is the single source of truth for run state. It is owned by
//! the [`Manager`](crate::manager::Manager) and lent to Foremen one at a time,
//! so every mutation happens on the poll loop.

pub mod checksum;
pub mod ids;
pub mod records;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::errors::{FleetError, Result};
use crate::pipeline::Pipeline;
use crate::run::{
    ComponentKey, ComponentRecord, ComponentState, Coordinates, ParentLink, Run, RunState,
};

pub use checksum::{checksum_bytes, checksum_file};
pub use ids::{DatasetId, ExecLogId, ExecRecordId, RunId};
pub use records::{Dataset, ExecLog, ExecRecord, TransformationKey};

#[derive(Debug, Default)]
pub struct Archive {
    datasets: BTreeMap<DatasetId, Dataset>,
    exec_records: BTreeMap<ExecRecordId, ExecRecord>,
    exec_logs: BTreeMap<ExecLogId, ExecLog>,
    runs: BTreeMap<RunId, Run>,
    next_id: u64,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // ----- datasets -----

    /// Register an existing file as a materialized dataset with no producer.
    pub fn register_dataset(&mut self, name: &str, path: &Path) -> Result<DatasetId> {
        if !path.is_file() {
            return Err(FleetError::InvalidInput(format!(
                "dataset file {:?} does not exist",
                path
            )));
        }
        let checksum = checksum_file(path)?;
        let id = self.add_dataset(name, checksum, Some(path.to_path_buf()), None);
        info!(dataset = %id, name, path = ?path, "registered input dataset");
        Ok(id)
    }

    pub fn add_dataset(
        &mut self,
        name: &str,
        checksum: String,
        location: Option<PathBuf>,
        producer: Option<ExecRecordId>,
    ) -> DatasetId {
        let id = DatasetId(self.allocate());
        self.datasets.insert(
            id,
            Dataset {
                id,
                name: name.to_string(),
                checksum,
                location,
                producer,
                created: Utc::now(),
            },
        );
        id
    }

    pub fn dataset(&self, id: DatasetId) -> Result<&Dataset> {
        self.datasets
            .get(&id)
            .ok_or(FleetError::UnknownDataset(id.0))
    }

    pub fn dataset_mut(&mut self, id: DatasetId) -> Result<&mut Dataset> {
        self.datasets
            .get_mut(&id)
            .ok_or(FleetError::UnknownDataset(id.0))
    }

    pub fn datasets(&self) -> impl Iterator<Item = &Dataset> {
        self.datasets.values()
    }

    /// Copy `source` into `archive_root` and record it as the dataset's
    /// location.
    pub fn materialize(
        &mut self,
        id: DatasetId,
        source: &Path,
        archive_root: &Path,
    ) -> Result<PathBuf> {
        let name = self.dataset(id)?.name.clone();
        fs::create_dir_all(archive_root)?;
        let dest = archive_root.join(format!("{}_{}", id, name));
        fs::copy(source, &dest)?;
        self.dataset_mut(id)?.location = Some(dest.clone());
        debug!(dataset = %id, dest = ?dest, "dataset archived");
        Ok(dest)
    }

    // ----- execution records -----

    pub fn create_exec_record(
        &mut self,
        transformation: TransformationKey,
        inputs: Vec<DatasetId>,
        outputs: Vec<DatasetId>,
        generator: Option<ExecLogId>,
    ) -> ExecRecordId {
        let id = ExecRecordId(self.allocate());
        debug!(exec_record = %id, ?transformation, ?inputs, "execution record created");
        self.exec_records.insert(
            id,
            ExecRecord {
                id,
                transformation,
                inputs,
                outputs,
                generator,
                created: Utc::now(),
            },
        );
        id
    }

    pub fn exec_record(&self, id: ExecRecordId) -> Option<&ExecRecord> {
        self.exec_records.get(&id)
    }

    pub(crate) fn exec_record_mut(&mut self, id: ExecRecordId) -> Option<&mut ExecRecord> {
        self.exec_records.get_mut(&id)
    }

    /// Records of `transformation` whose ordered inputs equal `inputs`,
    /// oldest first.
    pub fn find_exec_records(
        &self,
        transformation: &TransformationKey,
        inputs: &[DatasetId],
    ) -> Vec<&ExecRecord> {
        self.exec_records
            .values()
            .filter(|er| er.transformation == *transformation && er.inputs == inputs)
            .collect()
    }

    // ----- execution logs -----

    pub fn create_exec_log(&mut self, component: ComponentKey, recovery: bool) -> ExecLogId {
        let id = ExecLogId(self.allocate());
        self.exec_logs.insert(
            id,
            ExecLog {
                id,
                component,
                recovery,
                start: None,
                end: None,
                return_code: None,
                signal: None,
                stdout_path: None,
                stderr_path: None,
                stdout: String::new(),
                stderr: String::new(),
            },
        );
        id
    }

    pub fn exec_log(&self, id: ExecLogId) -> Option<&ExecLog> {
        self.exec_logs.get(&id)
    }

    pub fn exec_log_mut(&mut self, id: ExecLogId) -> Option<&mut ExecLog> {
        self.exec_logs.get_mut(&id)
    }

    // ----- runs -----

    /// Enqueue a top-level run in the pending state.
    pub fn create_run(
        &mut self,
        pipeline: Arc<Pipeline>,
        inputs: Vec<DatasetId>,
        user: &str,
        priority: u32,
    ) -> Result<RunId> {
        self.insert_run(pipeline, inputs, user, priority, None)
    }

    /// Create a nested run for the step named by `parent`, already started.
    pub fn create_child_run(
        &mut self,
        parent: ParentLink,
        pipeline: Arc<Pipeline>,
        inputs: Vec<DatasetId>,
    ) -> Result<RunId> {
        let (user, priority) = {
            let p = self.run(parent.run)?;
            (p.user.clone(), p.priority)
        };
        let id = self.insert_run(pipeline, inputs, &user, priority, Some(parent))?;
        self.run_mut(id)?.start();
        Ok(id)
    }

    fn insert_run(
        &mut self,
        pipeline: Arc<Pipeline>,
        inputs: Vec<DatasetId>,
        user: &str,
        priority: u32,
        parent: Option<ParentLink>,
    ) -> Result<RunId> {
        if inputs.len() != pipeline.inputs.len() {
            return Err(FleetError::InvalidInput(format!(
                "pipeline '{}' takes {} inputs, got {}",
                pipeline.name,
                pipeline.inputs.len(),
                inputs.len()
            )));
        }
        for ds in inputs.iter() {
            self.dataset(*ds)?;
        }

        let id = RunId(self.allocate());
        self.runs.insert(
            id,
            Run::new(id, pipeline, inputs, user.to_string(), priority, parent),
        );
        Ok(id)
    }

    pub fn run(&self, id: RunId) -> Result<&Run> {
        self.runs.get(&id).ok_or(FleetError::UnknownRun(id.0))
    }

    pub fn run_mut(&mut self, id: RunId) -> Result<&mut Run> {
        self.runs.get_mut(&id).ok_or(FleetError::UnknownRun(id.0))
    }

    pub fn runs(&self) -> impl Iterator<Item = &Run> {
        self.runs.values()
    }

    pub fn runs_mut(&mut self) -> impl Iterator<Item = &mut Run> {
        self.runs.values_mut()
    }

    /// Top-level runs waiting for a Foreman, oldest first.
    pub fn pending_top_level_runs(&self) -> Vec<RunId> {
        self.runs
            .values()
            .filter(|r| r.is_top_level() && r.state == RunState::Pending)
            .map(|r| r.id)
            .collect()
    }

    /// `top` and every run nested beneath it, parents before children.
    pub fn run_tree(&self, top: RunId) -> Vec<RunId> {
        let mut out = Vec::new();
        let mut stack = vec![top];
        while let Some(id) = stack.pop() {
            let Ok(run) = self.run(id) else { continue };
            out.push(id);
            for step in run.steps.iter().rev() {
                if let Some(child) = step.child_run {
                    stack.push(child);
                }
            }
        }
        out
    }

    /// Position of a component across nested runs.
    pub fn coordinates(&self, key: &ComponentKey) -> Coordinates {
        let own = match *key {
            ComponentKey::Step { step, .. } | ComponentKey::InputCable { step, .. } => step,
            ComponentKey::OutputCable { output, .. } => output,
        };
        let mut coords = vec![own];
        let mut current = key.run();
        while let Ok(run) = self.run(current) {
            let Some(link) = run.parent else { break };
            coords.push(link.step);
            current = link.run;
        }
        coords.reverse();
        Coordinates(coords)
    }

    pub fn component_record(&self, key: &ComponentKey) -> Option<&ComponentRecord> {
        self.runs.get(&key.run())?.record(key)
    }

    pub fn component_record_mut(&mut self, key: &ComponentKey) -> Option<&mut ComponentRecord> {
        self.runs.get_mut(&key.run())?.record_mut(key)
    }

    pub fn component_state(&self, key: &ComponentKey) -> Option<ComponentState> {
        self.component_record(key).map(|r| r.state)
    }
}
