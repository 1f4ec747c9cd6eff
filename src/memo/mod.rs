// src/memo/mod.rs

//! Execution memo: decides whether a cable or step can reuse a previous
//! execution record, must fill one in, or must execute from scratch.
//!
//! Lookups are read-only against the [`Archive`]; the `record_*` functions
//! write new records once an execution has produced its outputs.

use tracing::{debug, trace};

use crate::archive::{Archive, DatasetId, ExecLogId, ExecRecordId, TransformationKey};
use crate::pipeline::{CableSignature, Method};
use crate::types::Reusability;

/// Outcome of a cable lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CableDecision {
    /// Take the match's output as-is.
    Reuse {
        exec_record: ExecRecordId,
        output: DatasetId,
    },
    /// Execute, then fill in the missing output of this record.
    FillIn { exec_record: ExecRecordId },
    Execute,
}

/// Outcome of a step lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepDecision {
    Reuse {
        exec_record: ExecRecordId,
        outputs: Vec<DatasetId>,
    },
    /// Execute, then fill in (or, for reusable methods, possibly replace) this
    /// record.
    FillIn { exec_record: ExecRecordId },
    Execute,
}

/// Read-only view of the archive answering reuse questions.
pub struct ExecutionMemo<'a> {
    archive: &'a Archive,
}

impl<'a> ExecutionMemo<'a> {
    pub fn new(archive: &'a Archive) -> Self {
        Self { archive }
    }

    fn is_materialized(&self, id: DatasetId) -> bool {
        self.archive
            .dataset(id)
            .map(|ds| !ds.is_symbolic())
            .unwrap_or(false)
    }

    /// Decide how a cable with `signature` applied to `input` is satisfied.
    ///
    /// Trivial cables never execute: the caller records them with
    /// [`record_trivial_cable`] instead.
    pub fn decide_cable(
        &self,
        signature: &CableSignature,
        input: DatasetId,
        keep_output: bool,
    ) -> CableDecision {
        let key = TransformationKey::Cable(signature.clone());
        let candidates = self.archive.find_exec_records(&key, &[input]);

        for er in candidates.iter() {
            let Some(&output) = er.outputs.first() else {
                continue;
            };
            if !keep_output || self.is_materialized(output) {
                trace!(exec_record = %er.id, %input, "cable reuse");
                return CableDecision::Reuse {
                    exec_record: er.id,
                    output,
                };
            }
        }

        match candidates.first() {
            Some(er) => {
                debug!(exec_record = %er.id, %input, "cable output must be filled in");
                CableDecision::FillIn { exec_record: er.id }
            }
            None => CableDecision::Execute,
        }
    }

    /// Decide how `method` applied to `inputs` is satisfied.
    ///
    /// `retained[i]` says whether output `i` must be materialized for reuse.
    pub fn decide_step(
        &self,
        method: &Method,
        inputs: &[DatasetId],
        retained: &[bool],
    ) -> StepDecision {
        if method.reusable == Reusability::NonReusable {
            return StepDecision::Execute;
        }

        let key = TransformationKey::Method(method.name.clone());
        let candidates: Vec<_> = self
            .archive
            .find_exec_records(&key, inputs)
            .into_iter()
            .filter(|er| er.outputs.len() == method.outputs.len())
            .collect();

        for er in candidates.iter() {
            let provides_all = er
                .outputs
                .iter()
                .zip(retained.iter())
                .all(|(ds, keep)| !*keep || self.is_materialized(*ds));
            if provides_all {
                trace!(exec_record = %er.id, method = %method.name, "step reuse");
                return StepDecision::Reuse {
                    exec_record: er.id,
                    outputs: er.outputs.clone(),
                };
            }
        }

        match candidates.first() {
            Some(er) => {
                debug!(
                    exec_record = %er.id,
                    method = %method.name,
                    "step must fill in missing outputs"
                );
                StepDecision::FillIn { exec_record: er.id }
            }
            None => StepDecision::Execute,
        }
    }
}

/// Find or create the record of a trivial cable on `input`. Its output is the
/// input dataset itself.
pub fn record_trivial_cable(archive: &mut Archive, input: DatasetId) -> ExecRecordId {
    let key = TransformationKey::Cable(CableSignature { wires: Vec::new() });
    if let Some(er) = archive.find_exec_records(&key, &[input]).first() {
        return er.id;
    }
    archive.create_exec_record(key, vec![input], vec![input], None)
}

/// One output produced by an execution.
#[derive(Debug, Clone)]
pub struct ProducedOutput {
    pub name: String,
    pub checksum: String,
}

/// Record a fresh execution: a new execution record plus one symbolic dataset
/// per output. Callers materialize the retained ones.
pub fn record_execution(
    archive: &mut Archive,
    transformation: TransformationKey,
    inputs: Vec<DatasetId>,
    outputs: &[ProducedOutput],
    generator: Option<ExecLogId>,
) -> (ExecRecordId, Vec<DatasetId>) {
    let er = archive.create_exec_record(transformation, inputs, Vec::new(), generator);
    let datasets: Vec<DatasetId> = outputs
        .iter()
        .map(|o| archive.add_dataset(&o.name, o.checksum.clone(), None, Some(er)))
        .collect();
    if let Some(record) = archive.exec_record_mut(er) {
        record.outputs = datasets.clone();
    }
    (er, datasets)
}

/// Index of the first output whose checksum differs from what `exec_record`
/// recorded, if any.
pub fn first_mismatch(
    archive: &Archive,
    exec_record: ExecRecordId,
    checksums: &[String],
) -> Option<usize> {
    let er = archive.exec_record(exec_record)?;
    if er.outputs.len() != checksums.len() {
        return Some(er.outputs.len().min(checksums.len()));
    }
    er.outputs
        .iter()
        .zip(checksums.iter())
        .position(|(ds, sum)| {
            archive
                .dataset(*ds)
                .map(|d| d.checksum != *sum)
                .unwrap_or(true)
        })
}
