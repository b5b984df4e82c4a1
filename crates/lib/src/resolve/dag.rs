//! Stage dependency graph.
//!
//! Edges run from a dependency to its dependent. Node indices follow
//! declaration order, which is used to break ties so that plans are stable.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};

use crate::recipe::StageDef;

use super::types::ConfigError;

/// A DAG of named stages.
pub struct StageGraph {
  graph: DiGraph<String, ()>,
  nodes: HashMap<String, NodeIndex>,
}

impl StageGraph {
  /// Build the graph from stage declarations.
  ///
  /// # Errors
  ///
  /// `UnknownStage` for references to undeclared stages, `Cycle` when the
  /// references loop.
  pub fn from_stages(stages: &[StageDef]) -> Result<Self, ConfigError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    for stage in stages {
      let idx = graph.add_node(stage.name.clone());
      nodes.insert(stage.name.clone(), idx);
    }

    for stage in stages {
      let dependent = nodes[&stage.name];
      for reference in stage.stage_references() {
        let Some(&dependency) = nodes.get(reference) else {
          return Err(ConfigError::UnknownStage {
            stage: stage.name.clone(),
            reference: reference.to_string(),
          });
        };
        graph.update_edge(dependency, dependent, ());
      }
    }

    let dag = Self { graph, nodes };
    dag.verify_acyclic()?;
    Ok(dag)
  }

  fn verify_acyclic(&self) -> Result<(), ConfigError> {
    toposort(&self.graph, None).map_err(|cycle| ConfigError::Cycle(self.graph[cycle.node_id()].clone()))?;
    Ok(())
  }

  /// Stages with dependencies first; ties go to the earlier declaration.
  pub fn topological_order(&self) -> Result<Vec<String>, ConfigError> {
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();

    let mut ready: BinaryHeap<Reverse<NodeIndex>> = in_degree
      .iter()
      .filter(|(_, deg)| **deg == 0)
      .map(|(idx, _)| Reverse(*idx))
      .collect();

    let mut order = Vec::with_capacity(self.graph.node_count());
    while let Some(Reverse(idx)) = ready.pop() {
      order.push(self.graph[idx].clone());
      for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
        if let Some(deg) = in_degree.get_mut(&dependent) {
          *deg = deg.saturating_sub(1);
          if *deg == 0 {
            ready.push(Reverse(dependent));
          }
        }
      }
    }

    if order.len() != self.graph.node_count() {
      let stuck = in_degree
        .iter()
        .filter(|(_, deg)| **deg > 0)
        .map(|(idx, _)| *idx)
        .min()
        .map(|idx| self.graph[idx].clone())
        .unwrap_or_default();
      return Err(ConfigError::Cycle(stuck));
    }

    Ok(order)
  }

  /// Stages grouped into waves: every stage's dependencies sit in earlier
  /// waves, so the stages of one wave are independent of each other.
  pub fn waves(&self) -> Result<Vec<Vec<String>>, ConfigError> {
    let mut level: HashMap<NodeIndex, usize> = HashMap::new();

    for name in self.topological_order()? {
      let idx = self.nodes[&name];
      let depth = self
        .graph
        .neighbors_directed(idx, Direction::Incoming)
        .filter_map(|dep| level.get(&dep))
        .map(|l| l + 1)
        .max()
        .unwrap_or(0);
      level.insert(idx, depth);
    }

    let max_level = level.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<NodeIndex>> = vec![Vec::new(); max_level + 1];
    for (idx, l) in level {
      waves[l].push(idx);
    }

    Ok(
      waves
        .into_iter()
        .filter(|w| !w.is_empty())
        .map(|mut w| {
          w.sort();
          w.into_iter().map(|idx| self.graph[idx].clone()).collect()
        })
        .collect(),
    )
  }

  /// Direct dependencies of a stage, in declaration order.
  pub fn dependencies(&self, name: &str) -> Vec<String> {
    let Some(&idx) = self.nodes.get(name) else {
      return Vec::new();
    };

    let mut deps: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Incoming).collect();
    deps.sort();
    deps.into_iter().map(|d| self.graph[d].clone()).collect()
  }

  /// The stage itself and everything it transitively depends on.
  pub fn closure(&self, name: &str) -> Vec<String> {
    let Some(&start) = self.nodes.get(name) else {
      return Vec::new();
    };

    let reversed = Reversed(&self.graph);
    let mut dfs = Dfs::new(reversed, start);
    let mut found = Vec::new();
    while let Some(idx) = dfs.next(reversed) {
      found.push(idx);
    }

    found.sort();
    found.into_iter().map(|idx| self.graph[idx].clone()).collect()
  }

  pub fn stage_count(&self) -> usize {
    self.nodes.len()
  }
}
