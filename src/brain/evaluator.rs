//! Arbitrage Evaluator
//!
//! Turns a detected negative edge into a closed trading cycle, prices it
//! against the live quotes and suppresses repeats of the last reported cycle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cartographer::{QuoteBook, QuoteStore};
use crate::currency::{Currency, CurrencyPair};

/// Default notional for profit reports
pub const DEFAULT_NOTIONAL: f64 = 100.0;

/// Closed cycle `[v0, v1, ..., vk]` with `v0 == vk`, in trade order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ArbitragePath(Vec<Currency>);

impl ArbitragePath {
    /// Returns `None` unless the sequence is closed and has at least one leg
    pub fn new(vertices: Vec<Currency>) -> Option<Self> {
        if vertices.len() < 2 || vertices.first() != vertices.last() {
            return None;
        }
        Some(Self(vertices))
    }

    pub fn vertices(&self) -> &[Currency] {
        &self.0
    }

    pub fn hop_count(&self) -> usize {
        self.0.len() - 1
    }

    /// Consecutive (from, to) trades
    pub fn legs(&self) -> impl Iterator<Item = (Currency, Currency)> + '_ {
        self.0.windows(2).map(|w| (w[0], w[1]))
    }

    /// Same cycle rotated to start at its smallest currency.
    ///
    /// A cycle found from a different vertex compares equal after this.
    pub fn canonical(&self) -> Self {
        let open = &self.0[..self.0.len() - 1];
        let start = open
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| **c)
            .map(|(i, _)| i)
            .unwrap_or(0);

        let mut rotated: Vec<Currency> = open[start..].iter().chain(&open[..start]).copied().collect();
        rotated.push(rotated[0]);
        Self(rotated)
    }
}

impl fmt::Display for ArbitragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self.0.iter().map(|c| c.as_str()).collect();
        f.write_str(&parts.join(" → "))
    }
}

/// Rebuild the cycle behind a relaxable edge `(u, v)` from the predecessor map.
///
/// The predecessor chain from `u` may pass through vertices that only lead
/// into the cycle; those are cut off. Returns `None` if the chain dead-ends.
pub fn reconstruct_cycle(
    predecessor: &HashMap<Currency, Currency>,
    negative_edge: (Currency, Currency),
) -> Option<ArbitragePath> {
    let (u, v) = negative_edge;
    let mut cycle = vec![v, u];
    let mut current = *predecessor.get(&u)?;

    // Each step adds a new vertex, so the walk is bounded by the map size
    while !cycle.contains(&current) {
        cycle.push(current);
        current = match predecessor.get(&current) {
            Some(pred) => *pred,
            None => {
                debug!("Predecessor chain from {} dead-ends at {}", u, current);
                return None;
            }
        };
    }

    let start = cycle.iter().position(|c| *c == current)?;
    let mut cycle = cycle.split_off(start);
    cycle.push(cycle[0]);
    cycle.reverse();

    ArbitragePath::new(cycle)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no rate for {from} -> {to} (neither direct nor reciprocal)")]
pub struct MissingRate {
    pub from: Currency,
    pub to: Currency,
}

/// Rate for converting `from` into `to`: the direct quote, else 1 / the reversed one
pub fn lookup_rate(quotes: &QuoteBook, from: Currency, to: Currency) -> Result<f64, MissingRate> {
    let pair = CurrencyPair::new(from, to);
    if let Some(quote) = quotes.get(&pair) {
        return Ok(quote.price);
    }
    if let Some(quote) = quotes.get(&pair.reversed()) {
        return Ok(1.0 / quote.price);
    }
    Err(MissingRate { from, to })
}

/// One trade in a profit report
#[derive(Debug, Clone, Serialize)]
pub struct TradeLeg {
    pub from: Currency,
    pub to: Currency,
    /// `None` when the rate was missing and the leg was skipped
    pub rate: Option<f64>,
    /// Running amount after this leg
    pub amount: f64,
}

/// Compounded result of walking a cycle
#[derive(Debug, Clone, Serialize)]
pub struct ProfitReport {
    pub path: ArbitragePath,
    pub legs: Vec<TradeLeg>,
    pub start_amount: f64,
    pub final_amount: f64,
    pub detected_at: DateTime<Utc>,
}

impl ProfitReport {
    pub fn return_multiplier(&self) -> f64 {
        self.final_amount / self.start_amount
    }

    pub fn profit_percentage(&self) -> f64 {
        (self.return_multiplier() - 1.0) * 100.0
    }

    pub fn missing_legs(&self) -> usize {
        self.legs.iter().filter(|l| l.rate.is_none()).count()
    }

    /// False if any leg had to be skipped; the final amount is then partial
    pub fn is_complete(&self) -> bool {
        self.missing_legs() == 0
    }
}

/// Prices cycles and remembers the last one it reported
#[derive(Debug, Clone, Copy)]
pub struct ArbitrageEvaluator {
    notional: f64,
    canonical: bool,
}

impl ArbitrageEvaluator {
    pub fn new(notional: f64, canonical: bool) -> Self {
        Self { notional, canonical }
    }

    pub fn notional(&self) -> f64 {
        self.notional
    }

    /// Walk the cycle leg by leg. Missing rates are flagged and skipped.
    pub fn evaluate(&self, path: &ArbitragePath, quotes: &QuoteBook) -> ProfitReport {
        let mut amount = self.notional;
        let mut legs = Vec::with_capacity(path.hop_count());

        for (from, to) in path.legs() {
            let rate = match lookup_rate(quotes, from, to) {
                Ok(rate) => {
                    amount *= rate;
                    Some(rate)
                }
                Err(e) => {
                    warn!("{} - leg skipped", e);
                    None
                }
            };
            legs.push(TradeLeg { from, to, rate, amount });
        }

        ProfitReport {
            path: path.clone(),
            legs,
            start_amount: self.notional,
            final_amount: amount,
            detected_at: Utc::now(),
        }
    }

    /// Evaluate `path` unless it is the cycle we reported last.
    ///
    /// The comparison, the update of the last reported path and the rate
    /// lookups all happen under the quote store lock.
    pub fn report_if_new(&self, store: &QuoteStore, path: &ArbitragePath) -> Option<ProfitReport> {
        let key = if self.canonical {
            path.canonical()
        } else {
            path.clone()
        };

        store.with_report_state(|quotes, last_reported| {
            if last_reported.as_ref() == Some(&key) {
                debug!("Cycle {} already reported", path);
                return None;
            }
            *last_reported = Some(key);

            let report = self.evaluate(path, quotes);
            log_report(&report);
            Some(report)
        })
    }
}

impl Default for ArbitrageEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIONAL, true)
    }
}

fn log_report(report: &ProfitReport) {
    info!("ARBITRAGE OPPORTUNITY: {}", report.path);
    for leg in &report.legs {
        match leg.rate {
            Some(rate) => info!("\t{} -> {}: by {} for {:.6}", leg.from, leg.to, rate, leg.amount),
            None => info!("\t{} -> {}: no rate, holding {:.6}", leg.from, leg.to, leg.amount),
        }
    }
    info!(
        "\t{:.2} -> {:.6} ({:+.4}%){}",
        report.start_amount,
        report.final_amount,
        report.profit_percentage(),
        if report.is_complete() { "" } else { " [incomplete]" }
    );
}
