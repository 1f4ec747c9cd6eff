// src/pipeline/graph.rs

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::pipeline::model::Pipeline;

/// Step adjacency for one pipeline, keyed by step index.
///
/// Edge direction: producer -> consumer. Acyclicity is established by
/// `config::validate`; this type just answers adjacency questions.
#[derive(Debug, Clone)]
pub struct StepGraph {
    graph: DiGraphMap<usize, ()>,
}

impl StepGraph {
    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();

        for idx in 0..pipeline.steps.len() {
            graph.add_node(idx);
        }

        for (idx, step) in pipeline.steps.iter().enumerate() {
            for upstream in step.upstream_steps() {
                graph.add_edge(upstream, idx, ());
            }
        }

        Self { graph }
    }

    /// Steps whose outputs feed `step`.
    pub fn dependencies_of(&self, step: usize) -> Vec<usize> {
        let mut deps: Vec<usize> = self
            .graph
            .neighbors_directed(step, Direction::Incoming)
            .collect();
        deps.sort_unstable();
        deps
    }

    /// Steps reading from `step`.
    pub fn dependents_of(&self, step: usize) -> Vec<usize> {
        let mut deps: Vec<usize> = self
            .graph
            .neighbors_directed(step, Direction::Outgoing)
            .collect();
        deps.sort_unstable();
        deps
    }

    /// Steps in an order where every producer precedes its consumers.
    ///
    /// Returns the offending step index if the graph has a cycle.
    pub fn topological_order(&self) -> Result<Vec<usize>, usize> {
        toposort(&self.graph, None).map_err(|cycle| cycle.node_id())
    }
}
