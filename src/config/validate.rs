// src/config/validate.rs

use std::collections::{BTreeMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{
    CableConfig, ConfigFile, MethodConfig, PipelineConfig, RawConfigFile, StepConfig,
};
use crate::errors::{FleetError, Result};
use crate::pipeline::{
    Cable, CableSource, Library, Method, OutputCable, Pipeline, Step, StepGraph, Transformation,
    Wire,
};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = FleetError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_global_config(&raw)?;
        let library = build_library(&raw)?;
        Ok(ConfigFile::new_unchecked(
            raw.manager,
            raw.scheduler,
            raw.maintenance,
            library,
        ))
    }
}

fn config_error(msg: impl Into<String>) -> FleetError {
    FleetError::ConfigError(msg.into())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pipeline.is_empty() {
        return Err(config_error(
            "config must contain at least one [pipeline.<name>] section",
        ));
    }

    if cfg.manager.poll_interval_ms == 0 {
        return Err(config_error("[manager].poll_interval_ms must be >= 1 (got 0)"));
    }

    if cfg.scheduler.max_concurrent == 0 {
        return Err(config_error("[scheduler].max_concurrent must be >= 1 (got 0)"));
    }

    for name in cfg.method.keys() {
        if cfg.pipeline.contains_key(name) {
            return Err(config_error(format!(
                "'{name}' is defined both as a method and as a pipeline"
            )));
        }
    }

    Ok(())
}

/// Resolve every definition into a [`Library`].
///
/// Pipelines are built in nesting order so that a step wrapping a
/// sub-pipeline can hold the already-built definition.
fn build_library(cfg: &RawConfigFile) -> Result<Library> {
    let mut library = Library::new();

    for (name, mc) in cfg.method.iter() {
        library.add_method(build_method(name, mc)?);
    }

    for name in pipeline_build_order(cfg)? {
        let pc = &cfg.pipeline[name];
        let pipeline = build_pipeline(name, pc, &library)?;
        library.add_pipeline(pipeline);
    }

    Ok(library)
}

fn build_method(name: &str, mc: &MethodConfig) -> Result<Method> {
    check_identifier("method", name)?;

    if mc.threads == 0 {
        return Err(config_error(format!("method '{name}' must request >= 1 thread")));
    }

    ensure_unique(&mc.inputs, &format!("inputs of method '{name}'"))?;
    ensure_unique(&mc.outputs, &format!("outputs of method '{name}'"))?;

    for key in mc.columns.keys() {
        if !mc.outputs.contains(key) {
            return Err(config_error(format!(
                "method '{name}' declares columns for unknown output '{key}'"
            )));
        }
    }

    let output_columns = mc
        .outputs
        .iter()
        .map(|o| mc.columns.get(o).copied())
        .collect();

    Ok(Method {
        name: name.to_string(),
        driver: mc.driver.clone(),
        inputs: mc.inputs.clone(),
        outputs: mc.outputs.clone(),
        output_columns,
        threads: mc.threads,
        reusable: mc.reusable,
    })
}

/// Order pipelines so that nested pipelines come before the pipelines that
/// wrap them, rejecting recursive nesting.
fn pipeline_build_order(cfg: &RawConfigFile) -> Result<Vec<&str>> {
    // Edge direction: sub-pipeline -> wrapping pipeline.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.pipeline.keys() {
        graph.add_node(name.as_str());
    }

    for (name, pc) in cfg.pipeline.iter() {
        for step in pc.step.iter() {
            if step.transformation == *name {
                return Err(FleetError::Cycle(format!(
                    "pipeline '{name}' contains itself through step '{}'",
                    step.name
                )));
            }
            if cfg.pipeline.contains_key(&step.transformation) {
                graph.add_edge(step.transformation.as_str(), name.as_str(), ());
            }
        }
    }

    toposort(&graph, None).map_err(|cycle| {
        FleetError::Cycle(format!(
            "pipeline nesting cycle involving '{}'",
            cycle.node_id()
        ))
    })
}

fn build_pipeline(name: &str, pc: &PipelineConfig, library: &Library) -> Result<Pipeline> {
    check_identifier("pipeline", name)?;
    ensure_unique(&pc.inputs, &format!("inputs of pipeline '{name}'"))?;

    let step_names: Vec<String> = pc.step.iter().map(|s| s.name.clone()).collect();
    ensure_unique(&step_names, &format!("steps of pipeline '{name}'"))?;

    // Resolve transformations first; cable sources need every step's outputs.
    let mut transformations = Vec::with_capacity(pc.step.len());
    for sc in pc.step.iter() {
        check_identifier("step", &sc.name)?;
        transformations.push(resolve_transformation(name, sc, library)?);
    }

    let mut steps = Vec::with_capacity(pc.step.len());
    for (idx, sc) in pc.step.iter().enumerate() {
        let transformation = transformations[idx].clone();
        let ctx = SourceContext {
            pipeline: name,
            inputs: &pc.inputs,
            step_names: &step_names,
            transformations: &transformations,
        };
        steps.push(build_step(idx, sc, transformation, &ctx)?);
    }

    let mut outputs = Vec::with_capacity(pc.output.len());
    let output_names: Vec<String> = pc.output.iter().map(|o| o.name.clone()).collect();
    ensure_unique(&output_names, &format!("outputs of pipeline '{name}'"))?;

    for oc in pc.output.iter() {
        let ctx = SourceContext {
            pipeline: name,
            inputs: &pc.inputs,
            step_names: &step_names,
            transformations: &transformations,
        };
        let source = ctx.resolve(&oc.source)?;
        if let CableSource::PipelineInput(_) = source {
            return Err(config_error(format!(
                "output '{}' of pipeline '{name}' must come from a step output, not '{}'",
                oc.name, oc.source
            )));
        }
        outputs.push(OutputCable {
            name: oc.name.clone(),
            cable: Cable {
                source,
                wires: build_wires(&oc.wires, &format!("output '{}'", oc.name))?,
                keep_output: true,
            },
        });
    }

    let pipeline = Pipeline {
        name: name.to_string(),
        inputs: pc.inputs.clone(),
        steps,
        outputs,
    };

    if let Err(step) = StepGraph::from_pipeline(&pipeline).topological_order() {
        return Err(FleetError::Cycle(format!(
            "cycle detected in pipeline '{name}' involving step '{}'",
            pipeline.steps[step].name
        )));
    }

    Ok(pipeline)
}

fn resolve_transformation(
    pipeline: &str,
    sc: &StepConfig,
    library: &Library,
) -> Result<Transformation> {
    if let Some(method) = library.method(&sc.transformation) {
        return Ok(Transformation::Method(method.clone()));
    }
    if let Ok(sub) = library.pipeline(&sc.transformation) {
        return Ok(Transformation::Pipeline(sub));
    }
    Err(config_error(format!(
        "step '{}' of pipeline '{pipeline}' uses unknown transformation '{}'",
        sc.name, sc.transformation
    )))
}

fn build_step(
    idx: usize,
    sc: &StepConfig,
    transformation: Transformation,
    ctx: &SourceContext<'_>,
) -> Result<Step> {
    let input_names = transformation.input_names();
    let output_names = transformation.output_names();

    let mut by_input: BTreeMap<&str, &CableConfig> = BTreeMap::new();
    for cc in sc.cables.iter() {
        if !input_names.contains(&cc.input.as_str()) {
            return Err(config_error(format!(
                "step '{}' wires unknown input '{}'",
                sc.name, cc.input
            )));
        }
        if by_input.insert(cc.input.as_str(), cc).is_some() {
            return Err(config_error(format!(
                "step '{}' wires input '{}' more than once",
                sc.name, cc.input
            )));
        }
    }

    let mut cables = Vec::with_capacity(input_names.len());
    for input in input_names {
        let cc = by_input.get(input).ok_or_else(|| {
            config_error(format!("step '{}' leaves input '{input}' unwired", sc.name))
        })?;
        let source = ctx.resolve(&cc.source)?;
        if let CableSource::StepOutput { step, .. } = source {
            if step == idx {
                return Err(FleetError::Cycle(format!(
                    "step '{}' reads its own output",
                    sc.name
                )));
            }
        }
        cables.push(Cable {
            source,
            wires: build_wires(&cc.wires, &format!("cable into '{}.{input}'", sc.name))?,
            keep_output: cc.keep_output,
        });
    }

    let mut outputs_to_delete = Vec::new();
    for out in sc.delete_outputs.iter() {
        let pos = output_names
            .iter()
            .position(|o| o == out)
            .ok_or_else(|| {
                config_error(format!(
                    "step '{}' deletes unknown output '{out}'",
                    sc.name
                ))
            })?;
        outputs_to_delete.push(pos);
    }

    Ok(Step {
        name: sc.name.clone(),
        transformation,
        cables,
        outputs_to_delete,
    })
}

fn build_wires(raw: &[[usize; 2]], what: &str) -> Result<Vec<Wire>> {
    let mut dests = HashSet::new();
    let mut wires = Vec::with_capacity(raw.len());
    for [source_column, dest_column] in raw.iter().copied() {
        if !dests.insert(dest_column) {
            return Err(config_error(format!(
                "{what} writes destination column {dest_column} twice"
            )));
        }
        wires.push(Wire {
            source_column,
            dest_column,
        });
    }
    if !wires.is_empty() {
        let width = wires.len();
        if let Some(w) = wires.iter().find(|w| w.dest_column >= width) {
            return Err(config_error(format!(
                "{what} leaves a gap: destination column {} with only {width} wires",
                w.dest_column
            )));
        }
    }
    Ok(wires)
}

/// Resolves cable source strings within one pipeline.
struct SourceContext<'a> {
    pipeline: &'a str,
    inputs: &'a [String],
    step_names: &'a [String],
    transformations: &'a [Transformation],
}

impl SourceContext<'_> {
    fn resolve(&self, source: &str) -> Result<CableSource> {
        match source.split_once('.') {
            None => self
                .inputs
                .iter()
                .position(|i| i == source)
                .map(CableSource::PipelineInput)
                .ok_or_else(|| {
                    config_error(format!(
                        "pipeline '{}' has no input named '{source}'",
                        self.pipeline
                    ))
                }),
            Some((step_name, output)) => {
                let step = self
                    .step_names
                    .iter()
                    .position(|s| s == step_name)
                    .ok_or_else(|| {
                        config_error(format!(
                            "pipeline '{}' has no step named '{step_name}'",
                            self.pipeline
                        ))
                    })?;
                let output = self.transformations[step]
                    .output_names()
                    .iter()
                    .position(|o| *o == output)
                    .ok_or_else(|| {
                        config_error(format!(
                            "step '{step_name}' of pipeline '{}' has no output '{output}'",
                            self.pipeline
                        ))
                    })?;
                Ok(CableSource::StepOutput { step, output })
            }
        }
    }
}

fn check_identifier(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') || name.contains(char::is_whitespace) {
        return Err(config_error(format!(
            "{kind} name '{name}' must be non-empty and contain no '.' or whitespace"
        )));
    }
    Ok(())
}

fn ensure_unique(names: &[String], what: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for n in names {
        if !seen.insert(n.as_str()) {
            return Err(config_error(format!("duplicate name '{n}' in {what}")));
        }
    }
    Ok(())
}
