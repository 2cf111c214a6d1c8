//! Pattern detection over a composition graph (spec §4.12).

use serde::Serialize;

use super::{GraphEdge, GraphNode};

/// A detected structural hint, with enough context to explain itself
/// without re-walking the graph.
#[derive(Debug, Clone, Serialize)]
pub enum Pattern {
    /// A `map` immediately followed by a `filter` (or vice versa):
    /// candidate for fusing into one combinator pass.
    MapFilterFusion { first: usize, second: usize },
    /// A sequential chain longer than the threshold: candidate for
    /// inserting a `batch` to reduce per-item overhead.
    LongLinearPipeline { length: usize },
    /// A `parallel`-style fan-out wider than the threshold: candidate for
    /// bounding concurrency via `parallel_map`.
    DeepParallelFanOut { width: usize },
}

const LONG_PIPELINE_THRESHOLD: usize = 6;
const WIDE_FAN_OUT_THRESHOLD: usize = 4;

fn is_map_or_filter(name: &str) -> bool {
    name == "map" || name == "filter"
}

pub fn detect_patterns(nodes: &[GraphNode], edges: &[GraphEdge]) -> Vec<Pattern> {
    let mut patterns = Vec::new();

    for edge in edges.iter().filter(|e| e.kind == "sequence") {
        let (Some(from), Some(to)) = (find(nodes, edge.from), find(nodes, edge.to)) else {
            continue;
        };
        if is_map_or_filter(&from.name) && is_map_or_filter(&to.name) {
            patterns.push(Pattern::MapFilterFusion {
                first: from.index,
                second: to.index,
            });
        }
    }

    let longest_chain = longest_sequence_chain(nodes, edges);
    if longest_chain > LONG_PIPELINE_THRESHOLD {
        patterns.push(Pattern::LongLinearPipeline {
            length: longest_chain,
        });
    }

    for node in nodes.iter().filter(|n| n.kind == "parallel") {
        let width = edges.iter().filter(|e| e.from == node.index).count();
        if width > WIDE_FAN_OUT_THRESHOLD {
            patterns.push(Pattern::DeepParallelFanOut { width });
        }
    }

    patterns
}

fn find(nodes: &[GraphNode], index: usize) -> Option<&GraphNode> {
    nodes.iter().find(|n| n.index == index)
}

fn longest_sequence_chain(nodes: &[GraphNode], edges: &[GraphEdge]) -> usize {
    let sequence_edges: Vec<&GraphEdge> = edges.iter().filter(|e| e.kind == "sequence").collect();
    let mut best = 0;
    for node in nodes {
        let mut length = 1;
        let mut current = node.index;
        loop {
            match sequence_edges.iter().find(|e| e.from == current) {
                Some(edge) => {
                    length += 1;
                    current = edge.to;
                }
                None => break,
            }
        }
        best = best.max(length);
    }
    best
}
