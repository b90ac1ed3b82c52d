use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use tracing::debug;

use crate::error::LoadError;
use crate::template::Resource;

/// Resource dependency edges, built once at load time. Edges point from a
/// dependency to the resource that needs it.
#[derive(Debug, Clone)]
pub(crate) struct DependencyGraph {
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl DependencyGraph {
    pub(crate) fn build(resources: &[Resource], index: &HashMap<String, usize>) -> Result<Self, LoadError> {
        let mut g: DiGraph<usize, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..resources.len()).map(|i| g.add_node(i)).collect();
        for (i, r) in resources.iter().enumerate() {
            for name in r.referenced_names() {
                let Some(&j) = index.get(name) else { continue };
                if i == j {
                    return Err(LoadError::CircularDependency(vec![r.logical_id.clone(), r.logical_id.clone()]));
                }
                g.update_edge(nodes[j], nodes[i], ());
            }
        }

        let order: Vec<usize> = match toposort(&g, None) {
            Ok(sorted) => sorted.into_iter().map(|ix| g[ix]).collect(),
            Err(_) => return Err(LoadError::CircularDependency(cycle(&g, resources))),
        };

        let by_name = |mut v: Vec<usize>| {
            v.sort_by(|a, b| resources[*a].logical_id.cmp(&resources[*b].logical_id));
            v
        };
        let dependencies = nodes
            .iter()
            .map(|&n| by_name(g.neighbors_directed(n, Direction::Incoming).map(|ix| g[ix]).collect()))
            .collect();
        let dependents = nodes
            .iter()
            .map(|&n| by_name(g.neighbors_directed(n, Direction::Outgoing).map(|ix| g[ix]).collect()))
            .collect();
        debug!(resources = resources.len(), edges = g.edge_count(), "dependency graph built");
        Ok(Self { dependencies, dependents, order })
    }

    pub(crate) fn dependencies(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        self.dependencies[i].iter().copied()
    }

    pub(crate) fn dependents(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        self.dependents[i].iter().copied()
    }

    pub(crate) fn order(&self) -> &[usize] {
        &self.order
    }
}

/// Members of the first strongly connected component with more than one
/// node, in declaration order, closed back onto the first member.
fn cycle(g: &DiGraph<usize, ()>, resources: &[Resource]) -> Vec<String> {
    let mut members: Vec<usize> = tarjan_scc(g)
        .into_iter()
        .find(|scc| scc.len() > 1)
        .map(|scc| scc.into_iter().map(|ix| g[ix]).collect())
        .unwrap_or_default();
    members.sort_unstable();
    let mut names: Vec<String> = members.iter().map(|&i| resources[i].logical_id.clone()).collect();
    if let Some(first) = names.first().cloned() {
        names.push(first);
    }
    names
}
