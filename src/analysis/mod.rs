//! Flow graph analysis (spec §4.12). Walks a [`crate::metadata::CompositionNode`]
//! tree (the only place flow structure is recorded, since `Flow::transform`
//! itself is an opaque closure) and derives metrics and pattern hints.
//! Behind the `analysis` feature.

mod patterns;

pub use patterns::{detect_patterns, Pattern};

use serde::Serialize;

use crate::flow::Flow;
use crate::metadata::CompositionNode;

/// One node in the reconstructed composition graph, with a stable index
/// used by [`Report::edges`].
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub index: usize,
    pub name: String,
    pub complexity: u32,
    pub kind: &'static str,
}

/// A directed edge between two [`GraphNode`] indices, tagged with the
/// composition kind that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub from: usize,
    pub to: usize,
    pub kind: &'static str,
}

/// The full analysis output for one flow (spec §4.12): graph, derived
/// metrics, and pattern hints. Exportable as JSON via [`Report::to_json`].
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub total_complexity: u32,
    pub depth: u32,
    pub critical_path: Vec<usize>,
    pub has_cycle: bool,
    pub patterns: Vec<Pattern>,
}

impl Report {
    #[cfg(feature = "analysis")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

struct Builder {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

impl Builder {
    fn push_leaf(&mut self, name: &str, complexity: u32) -> usize {
        let index = self.nodes.len();
        self.nodes.push(GraphNode {
            index,
            name: name.to_string(),
            complexity,
            kind: "leaf",
        });
        index
    }

    /// Returns `(root_index, depth, complexity)` for the subtree rooted
    /// at `node`.
    fn walk(&mut self, node: &CompositionNode) -> (usize, u32, u32) {
        match node {
            CompositionNode::Leaf { name, complexity } => {
                let idx = self.push_leaf(name, *complexity);
                (idx, 1, *complexity)
            }
            CompositionNode::Sequence(children) => {
                let root = self.nodes.len();
                self.nodes.push(GraphNode {
                    index: root,
                    name: "sequence".to_string(),
                    complexity: children.len() as u32,
                    kind: "sequence",
                });
                let mut depth = 1;
                let mut complexity = 1;
                let mut previous = root;
                for child in children {
                    let (child_idx, child_depth, child_complexity) = self.walk(child);
                    self.edges.push(GraphEdge {
                        from: previous,
                        to: child_idx,
                        kind: "sequence",
                    });
                    previous = child_idx;
                    depth += child_depth;
                    complexity += child_complexity;
                }
                (root, depth, complexity)
            }
            CompositionNode::Parallel(children) => {
                let root = self.nodes.len();
                self.nodes.push(GraphNode {
                    index: root,
                    name: "parallel".to_string(),
                    complexity: 1,
                    kind: "parallel",
                });
                let mut max_child_depth = 0;
                let mut complexity = 1;
                for child in children {
                    let (child_idx, child_depth, child_complexity) = self.walk(child);
                    self.edges.push(GraphEdge {
                        from: root,
                        to: child_idx,
                        kind: "parallel",
                    });
                    max_child_depth = max_child_depth.max(child_depth);
                    complexity += child_complexity;
                }
                (root, 1 + max_child_depth, complexity)
            }
        }
    }
}

/// Walk `flow`'s recorded composition shape and compute an analysis
/// report. Flows built solely from [`Flow::new`] without further
/// composition analyse as a single leaf node.
pub fn analyze<In, Out>(flow: &Flow<In, Out>) -> Report
where
    In: Send + 'static,
    Out: Send + 'static,
{
    let mut builder = Builder {
        nodes: Vec::new(),
        edges: Vec::new(),
    };
    let (root, depth, total_complexity) = match flow.metadata().node() {
        Some(node) => builder.walk(node),
        None => {
            let idx = builder.push_leaf(flow.name(), 1);
            (idx, 1, 1)
        }
    };
    let critical_path = longest_path_from(&builder.nodes, &builder.edges, root);
    let has_cycle = detect_cycle(&builder.nodes, &builder.edges);
    let patterns = detect_patterns(&builder.nodes, &builder.edges);
    Report {
        nodes: builder.nodes,
        edges: builder.edges,
        total_complexity,
        depth,
        critical_path,
        has_cycle,
        patterns,
    }
}

fn longest_path_from(nodes: &[GraphNode], edges: &[GraphEdge], root: usize) -> Vec<usize> {
    // Composition trees built by `Builder::walk` are acyclic and small
    // (bounded by the number of combinators in a pipeline), so a plain
    // DFS suffices without memoization.
    fn dfs(edges: &[GraphEdge], node: usize, visiting: &mut Vec<usize>) -> Vec<usize> {
        visiting.push(node);
        let mut best: Vec<usize> = visiting.clone();
        for edge in edges.iter().filter(|e| e.from == node) {
            if visiting.contains(&edge.to) {
                continue;
            }
            let candidate = dfs(edges, edge.to, visiting);
            if candidate.len() > best.len() {
                best = candidate;
            }
        }
        visiting.pop();
        best
    }
    if nodes.is_empty() {
        return Vec::new();
    }
    dfs(edges, root, &mut Vec::new())
}

fn detect_cycle(nodes: &[GraphNode], edges: &[GraphEdge]) -> bool {
    let mut visiting = vec![false; nodes.len()];
    let mut done = vec![false; nodes.len()];

    fn visit(node: usize, edges: &[GraphEdge], visiting: &mut [bool], done: &mut [bool]) -> bool {
        if done[node] {
            return false;
        }
        if visiting[node] {
            return true;
        }
        visiting[node] = true;
        for edge in edges.iter().filter(|e| e.from == node) {
            if visit(edge.to, edges, visiting, done) {
                return true;
            }
        }
        visiting[node] = false;
        done[node] = true;
        false
    }

    (0..nodes.len()).any(|n| visit(n, edges, &mut visiting, &mut done))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::transform::{filter, map};
    use crate::flow::identity;

    #[test]
    fn single_leaf_flow_analyzes_trivially() {
        let flow: Flow<i32, i32> = identity();
        let report = analyze(&flow);
        assert_eq!(report.nodes.len(), 1);
        assert_eq!(report.total_complexity, 1);
        assert!(!report.has_cycle);
    }

    #[test]
    fn sequential_composition_builds_a_chain() {
        let flow = map(|x: i32| x + 1).then(&filter(|x: &i32| *x > 0));
        let report = analyze(&flow);
        // One synthetic "sequence" root plus one leaf per composed flow.
        assert_eq!(report.nodes.len(), 3);
        assert_eq!(report.edges.len(), 2);
        assert_eq!(report.depth, 3);
    }

    #[test]
    fn map_filter_pattern_is_detected() {
        let flow = map(|x: i32| x + 1).then(&filter(|x: &i32| *x > 0));
        let report = analyze(&flow);
        assert!(report
            .patterns
            .iter()
            .any(|p| matches!(p, Pattern::MapFilterFusion { .. })));
    }
}
