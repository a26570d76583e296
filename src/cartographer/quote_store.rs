//! Quote Store - the live, time-bounded view of the feed
//!
//! One `parking_lot::Mutex` guards the quotes AND the last reported
//! arbitrage path. Every change publishes a snapshot, taken under that
//! same lock, to the watch channel the graph builder listens on.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::brain::ArbitragePath;
use crate::currency::{CurrencyPair, Quote};

/// Quotes keyed by pair. Ordered so graphs built from it are deterministic.
pub type QuoteBook = BTreeMap<CurrencyPair, Quote>;

/// Default staleness window (1.5 seconds)
pub const DEFAULT_STALENESS_MS: i64 = 1500;

/// Immutable point-in-time copy of the store
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub quotes: QuoteBook,
    /// Bumped on every change, so consumers can tell snapshots apart
    pub version: u64,
    pub taken_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

pub type SnapshotSender = watch::Sender<Arc<Snapshot>>;
pub type SnapshotReceiver = watch::Receiver<Arc<Snapshot>>;

/// Latest-value-wins hand-off between ingestion and the graph builder
pub fn snapshot_channel() -> (SnapshotSender, SnapshotReceiver) {
    watch::channel(Arc::new(Snapshot::default()))
}

/// What a single merge did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    /// Older or same timestamp as what we hold; dropped
    Outdated,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, MergeOutcome::Outdated)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    pub updated: usize,
    pub outdated: usize,
}

impl MergeSummary {
    pub fn changed(&self) -> bool {
        self.inserted + self.updated > 0
    }

    fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Updated => self.updated += 1,
            MergeOutcome::Outdated => self.outdated += 1,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    quotes: QuoteBook,
    last_reported: Option<ArbitragePath>,
    version: u64,
}

impl StoreState {
    fn merge_one(&mut self, pair: CurrencyPair, quote: Quote) -> MergeOutcome {
        match self.quotes.get_mut(&pair) {
            None => {
                info!("Adding new quotes for: {}", pair);
                self.quotes.insert(pair, quote);
                MergeOutcome::Inserted
            }
            Some(existing) if existing.observed_at < quote.observed_at => {
                *existing = quote;
                MergeOutcome::Updated
            }
            Some(existing) => {
                debug!(
                    "Outdated quote for {} dropped ({} <= {})",
                    pair, quote.observed_at, existing.observed_at
                );
                MergeOutcome::Outdated
            }
        }
    }

    fn snapshot(&self, now: DateTime<Utc>) -> Snapshot {
        Snapshot {
            quotes: self.quotes.clone(),
            version: self.version,
            taken_at: Some(now),
        }
    }
}

/// Mutex-protected pair -> quote map with newest-wins merges and eviction
pub struct QuoteStore {
    state: Mutex<StoreState>,
    staleness: chrono::Duration,
    publisher: Option<SnapshotSender>,
}

impl QuoteStore {
    /// A store nobody listens to (tests, offline use)
    pub fn new(staleness: chrono::Duration) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            staleness,
            publisher: None,
        }
    }

    /// A store that pushes a snapshot to `publisher` on every change
    pub fn with_publisher(staleness: chrono::Duration, publisher: SnapshotSender) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            staleness,
            publisher: Some(publisher),
        }
    }

    pub fn staleness(&self) -> chrono::Duration {
        self.staleness
    }

    /// Merge one quote. Returns whether the store changed.
    pub fn merge(&self, pair: CurrencyPair, quote: Quote) -> bool {
        self.merge_batch(std::iter::once((pair, quote))).changed()
    }

    /// Merge a decoded datagram in one critical section, publishing at most once
    pub fn merge_batch<I>(&self, quotes: I) -> MergeSummary
    where
        I: IntoIterator<Item = (CurrencyPair, Quote)>,
    {
        let mut summary = MergeSummary::default();
        let mut state = self.state.lock();

        for (pair, quote) in quotes {
            summary.record(state.merge_one(pair, quote));
        }

        if summary.changed() {
            self.publish_locked(&mut state);
        }
        summary
    }

    /// Drop every quote older than the staleness window. Returns how many went.
    pub fn evict_stale(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock();
        let window = self.staleness;

        let before = state.quotes.len();
        state.quotes.retain(|pair, quote| {
            if quote.is_fresh(now, window) {
                return true;
            }
            let age = quote.age(now).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6;
            info!(
                "Removing quote {}: {} aged {:.3} seconds",
                pair, quote.price, age
            );
            false
        });

        let removed = before - state.quotes.len();
        if removed > 0 {
            self.publish_locked(&mut state);
        }
        removed
    }

    /// Consistent copy of everything currently held
    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().snapshot(Utc::now())
    }

    pub fn get(&self, pair: &CurrencyPair) -> Option<Quote> {
        self.state.lock().quotes.get(pair).copied()
    }

    pub fn len(&self) -> usize {
        self.state.lock().quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().quotes.is_empty()
    }

    /// Run `f` with the live quotes and the last reported path, under the store lock
    pub fn with_report_state<R>(
        &self,
        f: impl FnOnce(&QuoteBook, &mut Option<ArbitragePath>) -> R,
    ) -> R {
        let mut state = self.state.lock();
        let StoreState {
            quotes,
            last_reported,
            ..
        } = &mut *state;
        f(quotes, last_reported)
    }

    pub fn last_reported(&self) -> Option<ArbitragePath> {
        self.state.lock().last_reported.clone()
    }

    fn publish_locked(&self, state: &mut StoreState) {
        state.version += 1;
        if let Some(publisher) = &self.publisher {
            // send_replace never fails, even with the builder gone
            publisher.send_replace(Arc::new(state.snapshot(Utc::now())));
        }
    }
}
