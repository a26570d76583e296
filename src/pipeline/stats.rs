//! Pipeline counters
//!
//! Plain relaxed atomics, bumped by both tasks and read by whoever asks.

use console::style;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub datagrams_received: AtomicU64,
    pub records_decoded: AtomicU64,
    pub malformed_records: AtomicU64,
    pub quotes_merged: AtomicU64,
    pub outdated_quotes: AtomicU64,
    pub stale_evictions: AtomicU64,
    pub socket_errors: AtomicU64,
    pub graphs_built: AtomicU64,
    pub cycles_detected: AtomicU64,
    pub opportunities_reported: AtomicU64,
    pub duplicate_cycles: AtomicU64,
    pub missing_rates: AtomicU64,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64, by: usize) {
    counter.fetch_add(by as u64, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            records_decoded: self.records_decoded.load(Ordering::Relaxed),
            malformed_records: self.malformed_records.load(Ordering::Relaxed),
            quotes_merged: self.quotes_merged.load(Ordering::Relaxed),
            outdated_quotes: self.outdated_quotes.load(Ordering::Relaxed),
            stale_evictions: self.stale_evictions.load(Ordering::Relaxed),
            socket_errors: self.socket_errors.load(Ordering::Relaxed),
            graphs_built: self.graphs_built.load(Ordering::Relaxed),
            cycles_detected: self.cycles_detected.load(Ordering::Relaxed),
            opportunities_reported: self.opportunities_reported.load(Ordering::Relaxed),
            duplicate_cycles: self.duplicate_cycles.load(Ordering::Relaxed),
            missing_rates: self.missing_rates.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    pub datagrams_received: u64,
    pub records_decoded: u64,
    pub malformed_records: u64,
    pub quotes_merged: u64,
    pub outdated_quotes: u64,
    pub stale_evictions: u64,
    pub socket_errors: u64,
    pub graphs_built: u64,
    pub cycles_detected: u64,
    pub opportunities_reported: u64,
    pub duplicate_cycles: u64,
    pub missing_rates: u64,
}

impl PipelineStatsSnapshot {
    pub fn print_summary(&self) {
        println!();
        println!("{}", style("Summary:").bold());
        println!("  • Datagrams received:     {}", self.datagrams_received);
        println!(
            "  • Records decoded:        {} ({} malformed)",
            self.records_decoded, self.malformed_records
        );
        println!(
            "  • Quotes merged:          {} ({} outdated dropped)",
            self.quotes_merged, self.outdated_quotes
        );
        println!("  • Stale quotes evicted:   {}", self.stale_evictions);
        println!("  • Graphs built:           {}", self.graphs_built);
        println!("  • Negative cycles:        {}", self.cycles_detected);
        println!(
            "  • Opportunities reported: {}",
            style(self.opportunities_reported).green().bold()
        );
        println!("  • Duplicates suppressed:  {}", self.duplicate_cycles);
        if self.missing_rates > 0 {
            println!(
                "  • Missing rates:          {}",
                style(self.missing_rates).yellow()
            );
        }
        if self.socket_errors > 0 {
            println!("  • Socket errors:          {}", style(self.socket_errors).red());
        }
        println!();
    }
}
