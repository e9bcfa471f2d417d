//! Load-order dependencies between the objects of one submission.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::{Directed, Direction};
use std::collections::{HashMap, HashSet};

use crate::error::{Error, ErrorKind, Result};
use crate::request::LoadRequest;

/// Objects as nodes, with an edge from every prerequisite to each object
/// whose records look it up. Self-references are kept out of the graph.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: Graph<String, (), Directed>,
    nodes: HashMap<String, NodeIndex>,
    self_referencing: HashSet<String>,
}

impl DependencyGraph {
    /// Build the graph from the lookups declared by each request's records.
    ///
    /// Lookups into objects that are not part of the submission are ignored
    /// here; validation rejects them before a graph is built.
    pub fn build(requests: &[LoadRequest]) -> Self {
        let mut graph = Graph::<String, (), Directed>::new();
        let mut nodes = HashMap::with_capacity(requests.len());

        for request in requests {
            nodes
                .entry(request.object_name.clone())
                .or_insert_with(|| graph.add_node(request.object_name.clone()));
        }

        let mut self_referencing = HashSet::new();
        for request in requests {
            let dependent = nodes[&request.object_name];
            for lookup in request.records.iter().flat_map(|r| r.lookups.iter()) {
                if lookup.target_object == request.object_name {
                    self_referencing.insert(request.object_name.clone());
                    continue;
                }
                if let Some(&prerequisite) = nodes.get(&lookup.target_object) {
                    graph.update_edge(prerequisite, dependent, ());
                }
            }
        }

        Self {
            graph,
            nodes,
            self_referencing,
        }
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// True when records of `object` look up other records of `object`.
    pub fn is_self_referencing(&self, object: &str) -> bool {
        self.self_referencing.contains(object)
    }

    /// Objects that must be loaded before `object`, in submission order.
    pub fn prerequisites(&self, object: &str) -> Vec<&str> {
        self.neighbors(object, Direction::Incoming)
    }

    /// Objects whose records look up `object`, in submission order.
    pub fn dependents(&self, object: &str) -> Vec<&str> {
        self.neighbors(object, Direction::Outgoing)
    }

    fn neighbors(&self, object: &str, direction: Direction) -> Vec<&str> {
        let Some(&node) = self.nodes.get(object) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(node, direction).collect();
        found.sort();
        found.into_iter().map(|n| self.graph[n].as_str()).collect()
    }

    /// Group the objects into waves.
    ///
    /// Kahn's algorithm, one BFS layer at a time. Every prerequisite of an
    /// object lands in a strictly earlier wave. Within a layer the objects
    /// keep submission order; a self-referencing object is split out into a
    /// single-object wave after the rest of its layer.
    pub fn order(&self) -> Result<Vec<Vec<String>>> {
        let mut indegree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .count()
            })
            .collect();

        let mut layer: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| indegree[n.index()] == 0)
            .collect();
        let mut waves = Vec::new();
        let mut placed = 0usize;

        while !layer.is_empty() {
            layer.sort();
            placed += layer.len();

            let (own_wave, shared): (Vec<NodeIndex>, Vec<NodeIndex>) = layer
                .iter()
                .partition(|n| self.self_referencing.contains(&self.graph[**n]));
            if !shared.is_empty() {
                waves.push(shared.iter().map(|n| self.graph[*n].clone()).collect());
            }
            for node in own_wave {
                waves.push(vec![self.graph[node].clone()]);
            }

            let mut next = Vec::new();
            for node in layer {
                for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                    let remaining = &mut indegree[dependent.index()];
                    *remaining -= 1;
                    if *remaining == 0 {
                        next.push(dependent);
                    }
                }
            }
            layer = next;
        }

        if placed < self.graph.node_count() {
            return Err(Error::new(ErrorKind::CyclicDependency {
                objects: self.cycle_members(),
            }));
        }

        Ok(waves)
    }

    /// Objects on a cycle, in submission order.
    fn cycle_members(&self) -> Vec<String> {
        let mut members: Vec<NodeIndex> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .flatten()
            .collect();
        members.sort();
        members.into_iter().map(|n| self.graph[n].clone()).collect()
    }
}
