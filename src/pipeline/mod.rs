// src/pipeline/mod.rs

//! Pipeline definitions.
//!
//! - [`model`] holds methods, pipelines, steps and cables.
//! - [`graph`] answers step adjacency questions for one pipeline.
//! - [`library`] is the read-only definition lookup the rest of the crate uses.

pub mod graph;
pub mod library;
pub mod model;

pub use graph::StepGraph;
pub use library::Library;
pub use model::{
    Cable, CableSignature, CableSource, Method, OutputCable, Pipeline, Step, Transformation, Wire,
};
