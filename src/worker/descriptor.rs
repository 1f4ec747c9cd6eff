// src/worker/descriptor.rs

//! Task descriptors handed to worker jobs, and the reports they write back.
//!
//! Both are TOML files. The Foreman writes a descriptor before submitting a
//! task's jobs and reads the report once the last job succeeded.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::pipeline::Wire;

/// Input for a step's setup and bookkeeping jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
    /// Human-readable component label, for logs.
    pub component: String,
    pub method: String,
    pub workdir: PathBuf,
    /// Driver as defined by the method.
    pub driver_source: PathBuf,
    /// Where setup copies the driver.
    pub driver: PathBuf,
    pub report: PathBuf,
    pub inputs: Vec<StagedInput>,
    pub outputs: Vec<ExpectedOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedInput {
    pub name: String,
    pub source: PathBuf,
    pub dest: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedOutput {
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<usize>,
}

/// Input for a cable job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CableDescriptor {
    pub component: String,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub report: PathBuf,
    /// Empty for a plain copy.
    #[serde(default)]
    pub wires: Vec<Wire>,
}

/// What a worker found after the work was done.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub outputs: Vec<OutputReport>,
}

impl TaskReport {
    /// The first output that did not pass its checks, if any.
    pub fn first_failure(&self) -> Option<&OutputReport> {
        self.outputs.iter().find(|o| !o.passed)
    }

    /// Checksums in output order; `None` if any output has none.
    pub fn checksums(&self) -> Option<Vec<String>> {
        self.outputs.iter().map(|o| o.checksum.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputReport {
    pub name: String,
    pub path: PathBuf,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub fn write_toml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = toml::to_string(value).with_context(|| format!("serializing {:?}", path))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    fs::write(path, text).with_context(|| format!("writing {:?}", path))
}

pub fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    toml::from_str(&text).with_context(|| format!("parsing {:?}", path))
}
