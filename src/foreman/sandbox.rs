// src/foreman/sandbox.rs

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::{Archive, DatasetId, RunId};
use crate::errors::Result;

/// A run's private working area plus the map of where each dataset the run
/// has touched can currently be read from.
///
/// Non-retained step outputs are symbolic in the archive but stay readable
/// here for the rest of the run.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    locations: HashMap<DatasetId, PathBuf>,
}

impl Sandbox {
    pub fn new(sandbox_root: &Path, run: RunId) -> Self {
        Self {
            root: sandbox_root.join(run.to_string()),
            locations: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Working directory of one task, with its `logs/` directory created.
    pub fn prepare_task_dir(&self, label: &str) -> Result<PathBuf> {
        let dir = self.root.join(label);
        fs::create_dir_all(dir.join("logs"))?;
        Ok(dir)
    }

    pub fn record_location(&mut self, dataset: DatasetId, path: PathBuf) {
        self.locations.insert(dataset, path);
    }

    /// Where `dataset` can be read right now: the sandbox copy if any, else
    /// its archived file. `None` means the data has to be recovered.
    pub fn location_of(&self, archive: &Archive, dataset: DatasetId) -> Option<PathBuf> {
        if let Some(path) = self.locations.get(&dataset).filter(|p| p.is_file()) {
            return Some(path.clone());
        }
        archive
            .dataset(dataset)
            .ok()?
            .location
            .clone()
            .filter(|p| p.is_file())
    }
}
