#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pipefleet::config::{ConfigFile, MaintenanceSection, ManagerSection, SchedulerSection};
use pipefleet::pipeline::{
    Cable, CableSource, Library, Method, OutputCable, Pipeline, Step, Transformation, Wire,
};
use pipefleet::types::Reusability;

/// Builder for `Method`.
pub struct MethodBuilder {
    method: Method,
}

impl MethodBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            method: Method {
                name: name.to_string(),
                driver: PathBuf::from(format!("{name}.sh")),
                inputs: vec![],
                outputs: vec![],
                output_columns: vec![],
                threads: 1,
                reusable: Reusability::Deterministic,
            },
        }
    }

    pub fn driver(mut self, path: impl AsRef<Path>) -> Self {
        self.method.driver = path.as_ref().to_path_buf();
        self
    }

    pub fn input(mut self, name: &str) -> Self {
        self.method.inputs.push(name.to_string());
        self
    }

    pub fn output(mut self, name: &str) -> Self {
        self.method.outputs.push(name.to_string());
        self.method.output_columns.push(None);
        self
    }

    pub fn output_with_columns(mut self, name: &str, columns: usize) -> Self {
        self.method.outputs.push(name.to_string());
        self.method.output_columns.push(Some(columns));
        self
    }

    pub fn threads(mut self, threads: u32) -> Self {
        self.method.threads = threads;
        self
    }

    pub fn reusable(mut self, reusable: Reusability) -> Self {
        self.method.reusable = reusable;
        self
    }

    pub fn build(self) -> Arc<Method> {
        Arc::new(self.method)
    }
}

/// A cable with no column remapping.
pub fn trivial(source: CableSource) -> Cable {
    Cable {
        source,
        wires: vec![],
        keep_output: false,
    }
}

/// A cable remapping `(source_column, dest_column)` pairs.
pub fn wired(source: CableSource, pairs: &[(usize, usize)]) -> Cable {
    Cable {
        source,
        wires: pairs
            .iter()
            .map(|&(source_column, dest_column)| Wire {
                source_column,
                dest_column,
            })
            .collect(),
        keep_output: false,
    }
}

pub fn from_input(index: usize) -> CableSource {
    CableSource::PipelineInput(index)
}

pub fn from_step(step: usize, output: usize) -> CableSource {
    CableSource::StepOutput { step, output }
}

/// Builder for `Pipeline`.
pub struct PipelineBuilder {
    pipeline: Pipeline,
}

impl PipelineBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            pipeline: Pipeline {
                name: name.to_string(),
                inputs: vec![],
                steps: vec![],
                outputs: vec![],
            },
        }
    }

    pub fn input(mut self, name: &str) -> Self {
        self.pipeline.inputs.push(name.to_string());
        self
    }

    /// A step running `method`, one cable per method input.
    pub fn method_step(mut self, name: &str, method: &Arc<Method>, cables: Vec<Cable>) -> Self {
        self.pipeline.steps.push(Step {
            name: name.to_string(),
            transformation: Transformation::Method(Arc::clone(method)),
            cables,
            outputs_to_delete: vec![],
        });
        self
    }

    /// A step wrapping `sub`.
    pub fn pipeline_step(mut self, name: &str, sub: &Arc<Pipeline>, cables: Vec<Cable>) -> Self {
        self.pipeline.steps.push(Step {
            name: name.to_string(),
            transformation: Transformation::Pipeline(Arc::clone(sub)),
            cables,
            outputs_to_delete: vec![],
        });
        self
    }

    /// Mark output `output` of the last added step as not retained.
    pub fn delete_output(mut self, output: usize) -> Self {
        if let Some(step) = self.pipeline.steps.last_mut() {
            step.outputs_to_delete.push(output);
        }
        self
    }

    pub fn output(mut self, name: &str, cable: Cable) -> Self {
        self.pipeline.outputs.push(OutputCable {
            name: name.to_string(),
            cable,
        });
        self
    }

    pub fn build(self) -> Arc<Pipeline> {
        Arc::new(self.pipeline)
    }
}

/// Builder for `Library`.
#[derive(Default)]
pub struct LibraryBuilder {
    library: Library,
}

impl LibraryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: &Arc<Method>) -> Self {
        self.library.add_method(method.as_ref().clone());
        self
    }

    pub fn pipeline(mut self, pipeline: &Arc<Pipeline>) -> Self {
        self.library.add_pipeline(pipeline.as_ref().clone());
        self
    }

    pub fn build(self) -> Library {
        self.library
    }
}

/// A `ConfigFile` rooted in `dir` holding `library`, with maintenance off.
pub fn config_in(dir: &Path, library: Library) -> ConfigFile {
    ConfigFile {
        manager: ManagerSection {
            poll_interval_ms: 10,
            sandbox_root: dir.join("sandboxes"),
            archive_root: dir.join("archive"),
            worker_program: Some(PathBuf::from("pipefleet")),
            ..ManagerSection::default()
        },
        scheduler: SchedulerSection::default(),
        maintenance: MaintenanceSection {
            enabled: false,
            ..MaintenanceSection::default()
        },
        library,
    }
}
