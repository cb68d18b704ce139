//! Dependency graph and cycle checking.
//!
//! The graph is rebuilt on demand from the full dependency relation as an
//! arena of nodes keyed by item id with parallel adjacency lists — no
//! object graphs, no back-pointers. Only `blocks` and `parent-of` edges
//! are structural; `relates-to` and `duplicates` never participate in
//! cycle rejection.

use std::collections::HashMap;

use crate::model::Dependency;

/// Directed dependency graph over structural edges.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Item id per node index.
    ids: Vec<i64>,
    /// Node index per item id.
    index: HashMap<i64, usize>,
    /// Outgoing edges, parallel to `ids`: node -> nodes it depends on.
    edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build a graph from the current full edge set.
    ///
    /// Non-structural edges are dropped here so every query below only
    /// ever sees edges that can constrain ordering.
    #[must_use]
    pub fn from_edges(deps: &[Dependency]) -> Self {
        let mut graph = Self::default();
        for dep in deps {
            if !dep.dependency_type.is_structural() {
                continue;
            }
            let from = graph.node(dep.item_id);
            let to = graph.node(dep.depends_on_id);
            graph.edges[from].push(to);
        }
        graph
    }

    fn node(&mut self, id: i64) -> usize {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.ids.len();
        self.ids.push(id);
        self.index.insert(id, idx);
        self.edges.push(Vec::new());
        idx
    }

    /// Whether `to` is reachable from `from` over existing edges.
    #[must_use]
    pub fn is_reachable(&self, from: i64, to: i64) -> bool {
        self.path(from, to).is_some()
    }

    /// Find a path of item ids from `from` to `to`, if one exists.
    ///
    /// Depth-first; the returned path includes both endpoints. `from ==
    /// to` yields the trivial single-node path when the node exists.
    #[must_use]
    pub fn path(&self, from: i64, to: i64) -> Option<Vec<i64>> {
        let start = *self.index.get(&from)?;
        let goal = *self.index.get(&to)?;

        let mut visited = vec![false; self.ids.len()];
        let mut trail = Vec::new();
        if self.dfs(start, goal, &mut visited, &mut trail) {
            Some(trail.iter().map(|&idx| self.ids[idx]).collect())
        } else {
            None
        }
    }

    fn dfs(&self, node: usize, goal: usize, visited: &mut [bool], trail: &mut Vec<usize>) -> bool {
        visited[node] = true;
        trail.push(node);
        if node == goal {
            return true;
        }
        for &next in &self.edges[node] {
            if !visited[next] && self.dfs(next, goal, visited, trail) {
                return true;
            }
        }
        trail.pop();
        false
    }

    /// Whether persisting the edge `item_id -> depends_on_id` would close
    /// a cycle.
    ///
    /// True iff `item_id` is already reachable from `depends_on_id`: the
    /// new edge would then complete a loop back to its own source.
    #[must_use]
    pub fn would_create_cycle(&self, item_id: i64, depends_on_id: i64) -> bool {
        self.is_reachable(depends_on_id, item_id)
    }

    /// The offending path for a rejected edge, for reporting back to the
    /// caller: the existing chain from `depends_on_id` to `item_id`.
    #[must_use]
    pub fn cycle_path(&self, item_id: i64, depends_on_id: i64) -> Option<Vec<i64>> {
        self.path(depends_on_id, item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DependencyType;
    use chrono::Utc;

    fn edge(item_id: i64, depends_on_id: i64, dependency_type: DependencyType) -> Dependency {
        Dependency {
            item_id,
            depends_on_id,
            dependency_type,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_graph_has_no_cycles() {
        let graph = DependencyGraph::from_edges(&[]);
        assert!(!graph.would_create_cycle(1, 2));
    }

    #[test]
    fn test_direct_back_edge_is_a_cycle() {
        // 2 blocks-depends-on 1; adding 1 -> 2 closes the loop.
        let graph = DependencyGraph::from_edges(&[edge(2, 1, DependencyType::Blocks)]);
        assert!(graph.would_create_cycle(1, 2));
        assert!(!graph.would_create_cycle(3, 1));
    }

    #[test]
    fn test_transitive_cycle_detected() {
        // 3 -> 2 -> 1; adding 1 -> 3 would close a three-node loop.
        let graph = DependencyGraph::from_edges(&[
            edge(3, 2, DependencyType::Blocks),
            edge(2, 1, DependencyType::ParentOf),
        ]);
        assert!(graph.would_create_cycle(1, 3));
        assert_eq!(graph.cycle_path(1, 3), Some(vec![3, 2, 1]));
    }

    #[test]
    fn test_non_structural_edges_ignored() {
        let graph = DependencyGraph::from_edges(&[
            edge(2, 1, DependencyType::RelatesTo),
            edge(2, 1, DependencyType::Duplicates),
        ]);
        assert!(!graph.would_create_cycle(1, 2));
    }

    #[test]
    fn test_reachability_is_directional() {
        let graph = DependencyGraph::from_edges(&[edge(2, 1, DependencyType::Blocks)]);
        assert!(graph.is_reachable(2, 1));
        assert!(!graph.is_reachable(1, 2));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        // 4 depends on 2 and 3, both depend on 1. No loop anywhere.
        let graph = DependencyGraph::from_edges(&[
            edge(4, 2, DependencyType::Blocks),
            edge(4, 3, DependencyType::Blocks),
            edge(2, 1, DependencyType::Blocks),
            edge(3, 1, DependencyType::Blocks),
        ]);
        assert!(!graph.would_create_cycle(4, 1));
        // But the reverse direction would be.
        assert!(graph.would_create_cycle(1, 4));
    }
}
