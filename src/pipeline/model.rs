// src/pipeline/model.rs

//! Immutable pipeline definitions.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::Reusability;

/// An atomic executable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub name: String,
    /// Driver program; setup copies it into the step's working directory.
    pub driver: PathBuf,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Declared column count per output, parallel to `outputs`.
    pub output_columns: Vec<Option<usize>>,
    pub threads: u32,
    pub reusable: Reusability,
}

/// What a step runs.
#[derive(Debug, Clone)]
pub enum Transformation {
    Method(Arc<Method>),
    Pipeline(Arc<Pipeline>),
}

impl Transformation {
    pub fn name(&self) -> &str {
        match self {
            Transformation::Method(m) => &m.name,
            Transformation::Pipeline(p) => &p.name,
        }
    }

    pub fn input_names(&self) -> Vec<&str> {
        match self {
            Transformation::Method(m) => m.inputs.iter().map(String::as_str).collect(),
            Transformation::Pipeline(p) => p.inputs.iter().map(String::as_str).collect(),
        }
    }

    pub fn output_names(&self) -> Vec<&str> {
        match self {
            Transformation::Method(m) => m.outputs.iter().map(String::as_str).collect(),
            Transformation::Pipeline(p) => p.outputs.iter().map(|o| o.name.as_str()).collect(),
        }
    }

    pub fn as_method(&self) -> Option<&Arc<Method>> {
        match self {
            Transformation::Method(m) => Some(m),
            Transformation::Pipeline(_) => None,
        }
    }

    pub fn as_pipeline(&self) -> Option<&Arc<Pipeline>> {
        match self {
            Transformation::Method(_) => None,
            Transformation::Pipeline(p) => Some(p),
        }
    }
}

/// A DAG of steps wired by cables.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,
    pub inputs: Vec<String>,
    pub steps: Vec<Step>,
    pub outputs: Vec<OutputCable>,
}

/// One node of a pipeline.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub transformation: Transformation,
    /// One cable per transformation input, in input order.
    pub cables: Vec<Cable>,
    /// Indices of outputs that are not retained after the step runs.
    pub outputs_to_delete: Vec<usize>,
}

impl Step {
    pub fn retains_output(&self, output: usize) -> bool {
        !self.outputs_to_delete.contains(&output)
    }

    /// Indices of the steps this one reads from.
    pub fn upstream_steps(&self) -> Vec<usize> {
        let mut steps: Vec<usize> = self
            .cables
            .iter()
            .filter_map(|c| match c.source {
                CableSource::StepOutput { step, .. } => Some(step),
                CableSource::PipelineInput(_) => None,
            })
            .collect();
        steps.sort_unstable();
        steps.dedup();
        steps
    }
}

/// Where a cable reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CableSource {
    PipelineInput(usize),
    StepOutput { step: usize, output: usize },
}

/// Column remapping: `dest[dest_column] = source[source_column]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Wire {
    pub source_column: usize,
    pub dest_column: usize,
}

/// Typed wiring between a source and a step input or pipeline output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cable {
    pub source: CableSource,
    pub wires: Vec<Wire>,
    /// Whether the cable's output must be materialized and archived.
    pub keep_output: bool,
}

impl Cable {
    /// A cable without column remapping passes its input through untouched.
    pub fn is_trivial(&self) -> bool {
        self.wires.is_empty()
    }

    /// The structural identity used to match execution records across runs.
    pub fn signature(&self) -> CableSignature {
        let mut wires = self.wires.clone();
        wires.sort_by_key(|w| (w.dest_column, w.source_column));
        CableSignature { wires }
    }
}

/// Structural identity of a cable: two cables with the same signature
/// transform identical input into identical output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CableSignature {
    pub wires: Vec<Wire>,
}

impl CableSignature {
    pub fn is_trivial(&self) -> bool {
        self.wires.is_empty()
    }
}

impl fmt::Display for CableSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.wires.is_empty() {
            return write!(f, "trivial");
        }
        let parts: Vec<String> = self
            .wires
            .iter()
            .map(|w| format!("{}>{}", w.source_column, w.dest_column))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// A pipeline output fed by a cable from a step output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputCable {
    pub name: String,
    pub cable: Cable,
}
