//! Bellman-Ford negative-cycle detection
//!
//! Runs full shortest-path relaxation from one reference currency, then one
//! extra pass: the first edge that can still be relaxed lies on (or leads
//! into) a negative cycle. The tolerance keeps rounding noise on zero-weight
//! cycles (fair markets) from being reported.
//!
//! The detector holds no state between runs.

use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use tracing::trace;

use crate::cartographer::PriceGraph;
use crate::currency::Currency;

/// Default relaxation tolerance
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

/// Result of one shortest-path run
#[derive(Debug, Clone, Default)]
pub struct ShortestPaths {
    /// Unreachable currencies stay at +inf
    pub distances: HashMap<Currency, f64>,
    pub predecessor: HashMap<Currency, Currency>,
    /// (u, v) of the first edge still relaxable after |V| - 1 passes
    pub negative_edge: Option<(Currency, Currency)>,
}

impl ShortestPaths {
    pub fn has_negative_cycle(&self) -> bool {
        self.negative_edge.is_some()
    }
}

pub struct NegativeCycleDetector<'a> {
    graph: &'a PriceGraph,
    tolerance: f64,
}

impl<'a> NegativeCycleDetector<'a> {
    pub fn new(graph: &'a PriceGraph, tolerance: f64) -> Self {
        Self { graph, tolerance }
    }

    pub fn shortest_paths(&self, source: Currency) -> ShortestPaths {
        let Some(source_node) = self.graph.get_node(source) else {
            return ShortestPaths::default();
        };

        let graph = &self.graph.graph;
        let n = graph.node_count();
        let mut distance = vec![f64::INFINITY; n];
        let mut predecessor = vec![None; n];
        distance[source_node.index()] = 0.0;

        for pass in 0..n.saturating_sub(1) {
            let mut relaxed = false;

            for edge in graph.edge_references() {
                let (u, v) = (edge.source().index(), edge.target().index());
                if self.can_relax(distance[u], edge.weight().weight, distance[v]) {
                    distance[v] = distance[u] + edge.weight().weight;
                    predecessor[v] = Some(edge.source());
                    relaxed = true;
                }
            }

            // Converged: the remaining passes (and the check) would change nothing
            if !relaxed {
                trace!("Bellman-Ford converged after {} passes", pass + 1);
                break;
            }
        }

        let negative_edge = graph
            .edge_references()
            .find(|edge| {
                self.can_relax(
                    distance[edge.source().index()],
                    edge.weight().weight,
                    distance[edge.target().index()],
                )
            })
            .and_then(|edge| {
                Some((
                    self.graph.get_currency(edge.source())?,
                    self.graph.get_currency(edge.target())?,
                ))
            });

        let mut result = ShortestPaths {
            negative_edge,
            ..ShortestPaths::default()
        };
        for node in graph.node_indices() {
            let Some(currency) = self.graph.get_currency(node) else {
                continue;
            };
            result.distances.insert(currency, distance[node.index()]);
            if let Some(pred) = predecessor[node.index()].and_then(|p| self.graph.get_currency(p)) {
                result.predecessor.insert(currency, pred);
            }
        }

        result
    }

    #[inline]
    fn can_relax(&self, from: f64, weight: f64, to: f64) -> bool {
        from.is_finite() && from + weight < to - self.tolerance
    }
}
