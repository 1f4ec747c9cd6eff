// src/pipeline/library.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::{FleetError, Result};
use crate::pipeline::model::{Method, Pipeline};

/// Read-only lookup of every method and pipeline definition.
#[derive(Debug, Clone, Default)]
pub struct Library {
    methods: BTreeMap<String, Arc<Method>>,
    pipelines: BTreeMap<String, Arc<Pipeline>>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_method(&mut self, method: Method) -> Arc<Method> {
        let method = Arc::new(method);
        self.methods.insert(method.name.clone(), Arc::clone(&method));
        method
    }

    pub fn add_pipeline(&mut self, pipeline: Pipeline) -> Arc<Pipeline> {
        let pipeline = Arc::new(pipeline);
        self.pipelines
            .insert(pipeline.name.clone(), Arc::clone(&pipeline));
        pipeline
    }

    pub fn method(&self, name: &str) -> Option<&Arc<Method>> {
        self.methods.get(name)
    }

    pub fn pipeline(&self, name: &str) -> Result<Arc<Pipeline>> {
        self.pipelines
            .get(name)
            .cloned()
            .ok_or_else(|| FleetError::UnknownPipeline(name.to_string()))
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<Method>> {
        self.methods.values()
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &Arc<Pipeline>> {
        self.pipelines.values()
    }
}
