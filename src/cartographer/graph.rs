//! Graph Construction
//!
//! Vertices are currencies. Each fresh quote (A, B, price) adds two edges:
//! A -> B weighted -log10(price) and B -> A weighted +log10(price).
//! A cycle whose weights sum below zero compounds to a rate above 1.0.
//!
//! A `PriceGraph` is built once from a snapshot and never mutated after it
//! is published as the active graph.

use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::quote_store::QuoteBook;
use crate::currency::{Currency, CurrencyPair};

/// Edge data in the price graph
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateEdge {
    /// Conversion rate along this edge (quote price, or its reciprocal)
    pub rate: f64,
    /// -log10(rate)
    pub weight: f64,
}

/// The price graph
#[derive(Debug, Clone, Default)]
pub struct PriceGraph {
    pub graph: DiGraph<Currency, RateEdge>,
    currency_to_node: HashMap<Currency, NodeIndex>,
}

impl PriceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a quote book, keeping only quotes still inside `window` at `now`.
    ///
    /// The snapshot may have been taken a while ago; a quote that was fresh
    /// when merged can have aged out by the time it is consumed here.
    pub fn from_quotes(quotes: &QuoteBook, now: DateTime<Utc>, window: chrono::Duration) -> Self {
        let mut graph = Self::new();
        let mut aged_out = 0usize;

        for (pair, quote) in quotes {
            if !quote.is_fresh(now, window) {
                aged_out += 1;
                continue;
            }
            graph.add_quote(*pair, quote.price);
        }

        debug!(
            "Graph built: {} nodes, {} edges ({} quotes aged out before use)",
            graph.node_count(),
            graph.edge_count(),
            aged_out
        );

        graph
    }

    /// Add both directions for one quote. Returns false if the quote is unusable.
    pub fn add_quote(&mut self, pair: CurrencyPair, price: f64) -> bool {
        // A self-loop would read as a one-leg cycle whenever price > 1
        if pair.base == pair.quote {
            warn!("Skipping {}: base and quote are the same currency", pair);
            return false;
        }
        if price <= 0.0 || !price.is_finite() {
            warn!("Skipping {} with invalid price {}", pair, price);
            return false;
        }

        let log_price = price.log10();
        self.add_edge(pair.base, pair.quote, RateEdge {
            rate: price,
            weight: -log_price,
        });
        self.add_edge(pair.quote, pair.base, RateEdge {
            rate: 1.0 / price,
            weight: log_price,
        });
        true
    }

    fn add_edge(&mut self, from: Currency, to: Currency, edge: RateEdge) {
        let from = self.get_or_create_node(from);
        let to = self.get_or_create_node(to);
        self.graph.add_edge(from, to, edge);
    }

    fn get_or_create_node(&mut self, currency: Currency) -> NodeIndex {
        if let Some(&node) = self.currency_to_node.get(&currency) {
            return node;
        }

        let node = self.graph.add_node(currency);
        self.currency_to_node.insert(currency, node);
        node
    }

    pub fn get_node(&self, currency: Currency) -> Option<NodeIndex> {
        self.currency_to_node.get(&currency).copied()
    }

    pub fn get_currency(&self, node: NodeIndex) -> Option<Currency> {
        self.graph.node_weight(node).copied()
    }

    pub fn contains(&self, currency: Currency) -> bool {
        self.currency_to_node.contains_key(&currency)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}
