// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::pipeline::Library;
use crate::types::{Reusability, SchedulerKind};

/// Top-level configuration exactly as read from the TOML file.
///
/// ```toml
/// [manager]
/// poll_interval_ms = 500
///
/// [scheduler]
/// kind = "local"
///
/// [method.count]
/// driver = "scripts/count.sh"
/// inputs = ["text"]
/// outputs = ["counts"]
///
/// [pipeline.wordcount]
/// inputs = ["text"]
///
/// [[pipeline.wordcount.step]]
/// name = "count"
/// transformation = "count"
/// cables = [{ input = "text", source = "text" }]
///
/// [[pipeline.wordcount.output]]
/// name = "counts"
/// source = "count.counts"
/// ```
///
/// All sections except the definitions have defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub manager: ManagerSection,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub maintenance: MaintenanceSection,

    /// Methods keyed by name (`[method.<name>]`).
    #[serde(default)]
    pub method: BTreeMap<String, MethodConfig>,

    /// Pipelines keyed by name (`[pipeline.<name>]`).
    #[serde(default)]
    pub pipeline: BTreeMap<String, PipelineConfig>,
}

/// Validated configuration with the pipeline library resolved.
///
/// Only constructible through `TryFrom<RawConfigFile>` (see `validate.rs`).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub manager: ManagerSection,
    pub scheduler: SchedulerSection,
    pub maintenance: MaintenanceSection,
    pub library: Library,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        manager: ManagerSection,
        scheduler: SchedulerSection,
        maintenance: MaintenanceSection,
        library: Library,
    ) -> Self {
        Self {
            manager,
            scheduler,
            maintenance,
            library,
        }
    }
}

/// `[manager]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerSection {
    /// Time between two polls of the scheduler.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Root under which every run gets a private sandbox directory.
    #[serde(default = "default_sandbox_root")]
    pub sandbox_root: PathBuf,

    /// Root under which retained datasets are archived.
    #[serde(default = "default_archive_root")]
    pub archive_root: PathBuf,

    /// How many times recovery of a symbolic dataset is attempted before the
    /// task waiting on it is failed.
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// Users allowed to stop runs they do not own.
    #[serde(default)]
    pub admins: Vec<String>,

    /// Program launched by setup / bookkeeping / cable jobs. Defaults to the
    /// currently running executable.
    #[serde(default)]
    pub worker_program: Option<PathBuf>,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from("pipefleet/sandboxes")
}

fn default_archive_root() -> PathBuf {
    PathBuf::from("pipefleet/archive")
}

fn default_max_recovery_attempts() -> u32 {
    3
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            sandbox_root: default_sandbox_root(),
            archive_root: default_archive_root(),
            max_recovery_attempts: default_max_recovery_attempts(),
            admins: Vec::new(),
            worker_program: None,
        }
    }
}

impl ManagerSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default)]
    pub kind: SchedulerKind,

    #[serde(default = "default_submit_command")]
    pub submit_command: String,

    #[serde(default = "default_cancel_command")]
    pub cancel_command: String,

    #[serde(default = "default_accounting_command")]
    pub accounting_command: String,

    #[serde(default = "default_priority_command")]
    pub priority_command: String,

    /// Upper bound on simultaneously running jobs (local scheduler only).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Identity jobs are submitted under, when the cluster allows it.
    #[serde(default)]
    pub uid: Option<u32>,

    #[serde(default)]
    pub gid: Option<u32>,
}

fn default_submit_command() -> String {
    "sbatch".to_string()
}

fn default_cancel_command() -> String {
    "scancel".to_string()
}

fn default_accounting_command() -> String {
    "sacct".to_string()
}

fn default_priority_command() -> String {
    "scontrol".to_string()
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            kind: SchedulerKind::default(),
            submit_command: default_submit_command(),
            cancel_command: default_cancel_command(),
            accounting_command: default_accounting_command(),
            priority_command: default_priority_command(),
            max_concurrent: default_max_concurrent(),
            uid: None,
            gid: None,
        }
    }
}

/// `[maintenance]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Archived datasets verified per maintenance slice.
    #[serde(default = "default_file_check_batch")]
    pub file_check_batch: usize,

    /// Sandboxes of finished runs are removed once this old.
    #[serde(default = "default_sandbox_retention_secs")]
    pub sandbox_retention_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_file_check_batch() -> usize {
    25
}

fn default_sandbox_retention_secs() -> u64 {
    24 * 60 * 60
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            enabled: true,
            file_check_batch: default_file_check_batch(),
            sandbox_retention_secs: default_sandbox_retention_secs(),
        }
    }
}

/// `[method.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct MethodConfig {
    /// Driver program, copied into the step's working directory by setup.
    pub driver: PathBuf,

    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub outputs: Vec<String>,

    /// Expected column counts of delimited outputs, keyed by output name.
    #[serde(default)]
    pub columns: BTreeMap<String, usize>,

    #[serde(default = "default_threads")]
    pub threads: u32,

    #[serde(default)]
    pub reusable: Reusability,
}

fn default_threads() -> u32 {
    1
}

/// `[pipeline.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub step: Vec<StepConfig>,

    #[serde(default)]
    pub output: Vec<OutputCableConfig>,
}

/// One `[[pipeline.<name>.step]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    pub name: String,

    /// Name of a method or of another pipeline.
    pub transformation: String,

    /// One cable per input of the transformation.
    #[serde(default)]
    pub cables: Vec<CableConfig>,

    /// Outputs that are not retained once the step finishes.
    #[serde(default)]
    pub delete_outputs: Vec<String>,
}

/// Cable feeding one step input.
///
/// `source` is either a pipeline input name or `"<step>.<output>"`.
#[derive(Debug, Clone, Deserialize)]
pub struct CableConfig {
    pub input: String,
    pub source: String,

    /// `[source_column, dest_column]` pairs; empty means a trivial cable.
    #[serde(default)]
    pub wires: Vec<[usize; 2]>,

    #[serde(default)]
    pub keep_output: bool,
}

/// One `[[pipeline.<name>.output]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputCableConfig {
    pub name: String,

    /// `"<step>.<output>"`.
    pub source: String,

    #[serde(default)]
    pub wires: Vec<[usize; 2]>,
}
