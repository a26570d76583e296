//! Phase 1: The Cartographer (Data Ingest)
//!
//! UDP quote feed -> quote store -> snapshots -> price graph.

pub mod codec;
mod feed;
mod graph;
mod quote_store;

pub use codec::CodecError;
pub use feed::{FeedListener, subscribe};
pub use graph::{PriceGraph, RateEdge};
pub use quote_store::{
    snapshot_channel, MergeOutcome, MergeSummary, QuoteBook, QuoteStore, Snapshot,
    SnapshotReceiver, SnapshotSender, DEFAULT_STALENESS_MS,
};
