//! Graph Builder - the analysis task
//!
//! Waits (with a short timeout, to stay responsive to stop) for the next
//! snapshot, rebuilds the price graph from the quotes that are still fresh,
//! swaps it in as the active graph and runs detection on it straight away.
//! Only this task ever reads the graph it builds, so no lock is needed.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::stats::{bump, PipelineStats};
use crate::brain::{reconstruct_cycle, ArbitrageEvaluator, NegativeCycleDetector, ProfitReport};
use crate::cartographer::{PriceGraph, QuoteStore, Snapshot, SnapshotReceiver};
use crate::currency::Currency;
use crate::journal::OpportunityJournal;

pub struct GraphBuilder {
    pub(crate) store: Arc<QuoteStore>,
    pub(crate) active_graph: Arc<ArcSwap<PriceGraph>>,
    pub(crate) stats: Arc<PipelineStats>,
    pub(crate) reference: Currency,
    pub(crate) tolerance: f64,
    pub(crate) evaluator: ArbitrageEvaluator,
    pub(crate) journal: Option<OpportunityJournal>,
    pub(crate) reports: broadcast::Sender<ProfitReport>,
    pub(crate) poll_interval: Duration,
}

impl GraphBuilder {
    /// Rebuild, publish, detect. Returns the report if a new cycle was found.
    pub fn process(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> Option<ProfitReport> {
        let graph = Arc::new(PriceGraph::from_quotes(
            &snapshot.quotes,
            now,
            self.store.staleness(),
        ));
        self.active_graph.store(Arc::clone(&graph));
        bump(&self.stats.graphs_built, 1);

        let paths = NegativeCycleDetector::new(&graph, self.tolerance).shortest_paths(self.reference);
        let negative_edge = paths.negative_edge?;
        bump(&self.stats.cycles_detected, 1);

        let Some(cycle) = reconstruct_cycle(&paths.predecessor, negative_edge) else {
            warn!(
                "Negative edge {} -> {} but no cycle could be rebuilt",
                negative_edge.0, negative_edge.1
            );
            return None;
        };

        let Some(report) = self.evaluator.report_if_new(&self.store, &cycle) else {
            bump(&self.stats.duplicate_cycles, 1);
            return None;
        };

        bump(&self.stats.opportunities_reported, 1);
        bump(&self.stats.missing_rates, report.missing_legs());

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(&report) {
                warn!("Failed to write opportunity to {}: {}", journal.path().display(), e);
            }
        }

        // Nobody listening is fine
        let _ = self.reports.send(report.clone());
        Some(report)
    }

    pub async fn run(self, mut snapshots: SnapshotReceiver, stop: watch::Receiver<bool>) {
        info!(
            "Graph builder started (reference {}, tolerance {:e})",
            self.reference, self.tolerance
        );

        loop {
            if *stop.borrow() {
                break;
            }

            match tokio::time::timeout(self.poll_interval, snapshots.changed()).await {
                // Nothing new, go check the stop flag
                Err(_) => continue,
                Ok(Err(_)) => {
                    debug!("Snapshot channel closed");
                    break;
                }
                Ok(Ok(())) => {
                    let snapshot = Arc::clone(&snapshots.borrow_and_update());
                    let lag_ms = snapshot
                        .taken_at
                        .map(|taken| (Utc::now() - taken).num_milliseconds())
                        .unwrap_or_default();
                    debug!(
                        "Processing snapshot v{} ({} quotes, taken {} ms ago)",
                        snapshot.version,
                        snapshot.len(),
                        lag_ms
                    );
                    self.process(&snapshot, Utc::now());
                }
            }
        }

        info!("Graph builder stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartographer::snapshot_channel;
    use crate::currency::{CurrencyPair, Quote};

    fn ccy(code: &str) -> Currency {
        code.parse().unwrap()
    }

    fn builder(store: Arc<QuoteStore>) -> GraphBuilder {
        let (reports, _) = broadcast::channel(16);
        GraphBuilder {
            store,
            active_graph: Arc::new(ArcSwap::from_pointee(PriceGraph::new())),
            stats: Arc::new(PipelineStats::default()),
            reference: ccy("USD"),
            tolerance: crate::brain::DEFAULT_TOLERANCE,
            evaluator: ArbitrageEvaluator::default(),
            journal: None,
            reports,
            poll_interval: Duration::from_millis(10),
        }
    }

    fn merge_triangle(store: &QuoteStore, now: DateTime<Utc>, rates: [f64; 3]) {
        let legs = [("USD", "EUR"), ("EUR", "GBP"), ("GBP", "USD")];
        for ((b, q), p) in legs.into_iter().zip(rates) {
            store.merge(CurrencyPair::new(ccy(b), ccy(q)), Quote::new(p, now));
        }
    }

    #[test]
    fn test_process_reports_once() {
        let store = Arc::new(QuoteStore::new(chrono::Duration::milliseconds(1500)));
        let now = Utc::now();
        merge_triangle(&store, now, [0.9, 0.8, 1.5]);

        let builder = builder(store.clone());
        let report = builder.process(&store.snapshot(), now).expect("opportunity");
        assert!((report.final_amount - 108.0).abs() < 1e-9);
        assert_eq!(builder.active_graph.load().node_count(), 3);

        // Same cycle again: suppressed
        assert!(builder.process(&store.snapshot(), now).is_none());

        let stats = builder.stats.snapshot();
        assert_eq!(stats.graphs_built, 2);
        assert_eq!(stats.cycles_detected, 2);
        assert_eq!(stats.opportunities_reported, 1);
        assert_eq!(stats.duplicate_cycles, 1);
    }

    #[test]
    fn test_process_fair_market() {
        let store = Arc::new(QuoteStore::new(chrono::Duration::milliseconds(1500)));
        let now = Utc::now();
        merge_triangle(&store, now, [2.0, 0.5, 1.0]);

        let builder = builder(store.clone());
        assert!(builder.process(&store.snapshot(), now).is_none());
        assert_eq!(builder.stats.snapshot().cycles_detected, 0);
    }

    #[test]
    fn test_process_ignores_same_currency_quote() {
        let store = Arc::new(QuoteStore::new(chrono::Duration::milliseconds(1500)));
        let now = Utc::now();
        store.merge(CurrencyPair::new(ccy("USD"), ccy("USD")), Quote::new(1.01, now));
        store.merge(CurrencyPair::new(ccy("EUR"), ccy("USD")), Quote::new(1.1, now));

        let builder = builder(store.clone());
        assert!(builder.process(&store.snapshot(), now).is_none());

        let graph = builder.active_graph.load();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(builder.stats.snapshot().cycles_detected, 0);
    }

    #[test]
    fn test_process_refilters_aged_snapshot() {
        let store = Arc::new(QuoteStore::new(chrono::Duration::milliseconds(1500)));
        let merged_at = Utc::now();
        merge_triangle(&store, merged_at, [0.9, 0.8, 1.5]);
        let snapshot = store.snapshot();

        // Consumed two seconds later: every quote has aged out
        let builder = builder(store.clone());
        let later = merged_at + chrono::Duration::seconds(2);
        assert!(builder.process(&snapshot, later).is_none());
        assert!(builder.active_graph.load().is_empty());
    }

    #[tokio::test]
    async fn test_run_consumes_latest_snapshot() {
        let (tx, rx) = snapshot_channel();
        let store = Arc::new(QuoteStore::with_publisher(
            chrono::Duration::milliseconds(1500),
            tx,
        ));
        let builder = builder(store.clone());
        let mut reports = builder.reports.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(builder.run(rx, stop_rx));
        merge_triangle(&store, Utc::now(), [0.9, 0.8, 1.5]);

        let report = tokio::time::timeout(Duration::from_secs(2), reports.recv())
            .await
            .expect("no report in time")
            .expect("report channel closed");
        assert_eq!(report.path.hop_count(), 3);

        stop_tx.send_replace(true);
        let joined = tokio_test::assert_ok!(tokio::time::timeout(Duration::from_secs(1), handle).await);
        tokio_test::assert_ok!(joined);
    }
}
