// src/archive/records.rs

//! Datasets, execution records and execution logs.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::ids::{DatasetId, ExecLogId, ExecRecordId};
use crate::pipeline::CableSignature;
use crate::run::ComponentKey;

/// A data artifact.
///
/// A dataset is *symbolic* when its content is known (by checksum) but no
/// archived file backs it, e.g. a step output that was not retained.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    pub checksum: String,
    /// Archived file, if materialized.
    pub location: Option<PathBuf>,
    /// Execution record that first produced this dataset; `None` for
    /// uploaded inputs.
    pub producer: Option<ExecRecordId>,
    pub created: DateTime<Utc>,
}

impl Dataset {
    pub fn is_symbolic(&self) -> bool {
        self.location.is_none()
    }
}

/// What an execution record memoizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformationKey {
    Method(String),
    Cable(CableSignature),
}

impl TransformationKey {
    pub fn is_trivial_cable(&self) -> bool {
        matches!(self, TransformationKey::Cable(sig) if sig.is_trivial())
    }
}

/// Immutable association of a transformation and its exact ordered inputs
/// with the outputs it produced.
#[derive(Debug, Clone)]
pub struct ExecRecord {
    pub id: ExecRecordId,
    pub transformation: TransformationKey,
    pub inputs: Vec<DatasetId>,
    pub outputs: Vec<DatasetId>,
    /// Execution that produced the record; `None` for trivial cables.
    pub generator: Option<ExecLogId>,
    pub created: DateTime<Utc>,
}

/// One attempt at executing a transformation.
#[derive(Debug, Clone)]
pub struct ExecLog {
    pub id: ExecLogId,
    pub component: ComponentKey,
    /// Whether the attempt re-materialized symbolic data.
    pub recovery: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub return_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    /// Tail of the captured standard output.
    pub stdout: String,
    /// Tail of the captured standard error.
    pub stderr: String,
}

impl ExecLog {
    pub fn is_successful(&self) -> bool {
        self.end.is_some() && self.return_code == Some(0)
    }
}
