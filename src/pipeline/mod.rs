//! Pipeline controller
//!
//! Owns everything the two tasks share: the quote store (which also holds
//! the last reported path), the active graph slot, the snapshot channel,
//! the stop signal and the counters. Nothing here is global.

mod builder;
pub mod stats;

use arc_swap::ArcSwap;
use eyre::{eyre, Result, WrapErr};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use builder::GraphBuilder;
pub use stats::{PipelineStats, PipelineStatsSnapshot};

use crate::brain::{ArbitrageEvaluator, ProfitReport};
use crate::cartographer::{self, snapshot_channel, FeedListener, PriceGraph, QuoteStore, SnapshotReceiver};
use crate::config::Config;
use crate::journal::OpportunityJournal;

/// Reports buffered per subscriber before the slowest one starts lagging
const REPORT_CHANNEL_CAPACITY: usize = 64;

pub struct Pipeline {
    config: Config,
    feed_addr: SocketAddr,
    socket: Arc<UdpSocket>,
    store: Arc<QuoteStore>,
    active_graph: Arc<ArcSwap<PriceGraph>>,
    stats: Arc<PipelineStats>,
    snapshots: Option<SnapshotReceiver>,
    stop_tx: watch::Sender<bool>,
    reports: broadcast::Sender<ProfitReport>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Pipeline {
    /// Validate the config and bind the receive socket. A bind failure is fatal.
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;
        let feed_addr = config.feed_addr()?;
        let listen_addr = config.listen_addr()?;

        let socket = UdpSocket::bind(listen_addr)
            .await
            .wrap_err_with(|| format!("failed to bind UDP socket on {}", listen_addr))?;

        let (snapshot_tx, snapshot_rx) = snapshot_channel();
        let store = QuoteStore::with_publisher(config.staleness(), snapshot_tx);
        let (stop_tx, _) = watch::channel(false);
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            feed_addr,
            socket: Arc::new(socket),
            store: Arc::new(store),
            active_graph: Arc::new(ArcSwap::from_pointee(PriceGraph::new())),
            stats: Arc::new(PipelineStats::default()),
            snapshots: Some(snapshot_rx),
            stop_tx,
            reports,
            tasks: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send the subscription request to the provider
    pub async fn subscribe(&self) -> Result<()> {
        cartographer::subscribe(&self.socket, self.feed_addr).await
    }

    /// Spawn the feed listener and the graph builder
    pub fn start(&mut self) -> Result<()> {
        let snapshots = self
            .snapshots
            .take()
            .ok_or_else(|| eyre!("pipeline already started"))?;

        let journal = self
            .config
            .opportunity_log
            .then(|| OpportunityJournal::new(&self.config.opportunity_log_path));

        let builder = GraphBuilder {
            store: Arc::clone(&self.store),
            active_graph: Arc::clone(&self.active_graph),
            stats: Arc::clone(&self.stats),
            reference: self.config.reference()?,
            tolerance: self.config.cycle_tolerance,
            evaluator: ArbitrageEvaluator::new(
                self.config.notional_amount,
                self.config.canonical_cycles,
            ),
            journal,
            reports: self.reports.clone(),
            poll_interval: self.config.graph_poll_interval(),
        };
        let listener = FeedListener::new(
            Arc::clone(&self.socket),
            Arc::clone(&self.store),
            Arc::clone(&self.stats),
            self.config.recv_buffer_size,
        );

        let stop = self.stop_tx.subscribe();
        self.tasks
            .push(("graph builder", tokio::spawn(builder.run(snapshots, stop.clone()))));
        self.tasks
            .push(("feed listener", tokio::spawn(listener.run(stop))));

        info!("Pipeline started on {}", self.local_addr()?);
        Ok(())
    }

    /// Raise the stop signal and join both tasks, each within the shutdown timeout.
    /// A task that misses the deadline is left to finish on its own.
    pub async fn stop(&mut self) {
        self.stop_tx.send_replace(true);
        let deadline = self.config.shutdown_timeout();

        for (name, handle) in self.tasks.drain(..) {
            match tokio::time::timeout(deadline, handle).await {
                Ok(Ok(())) => debug!("{} stopped", name),
                Ok(Err(e)) => error!("{} ended abnormally: {}", name, e),
                Err(_) => warn!("{} did not stop within {:?}, abandoning it", name, deadline),
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|(_, handle)| !handle.is_finished())
    }

    pub fn store(&self) -> &Arc<QuoteStore> {
        &self.store
    }

    /// The graph most recently built; never one under construction
    pub fn active_graph(&self) -> Arc<PriceGraph> {
        self.active_graph.load_full()
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Receive every profit report from now on
    pub fn subscribe_reports(&self) -> broadcast::Receiver<ProfitReport> {
        self.reports.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
