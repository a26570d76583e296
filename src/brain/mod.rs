//! Phase 2: The Brain
//!
//! Responsible for:
//! - Finding negative cycles (arbitrage opportunities) using Bellman-Ford
//! - Rebuilding the cycle and pricing it against live quotes

mod bellman_ford;
mod evaluator;

pub use bellman_ford::{NegativeCycleDetector, ShortestPaths, DEFAULT_TOLERANCE};
pub use evaluator::{
    lookup_rate, reconstruct_cycle, ArbitrageEvaluator, ArbitragePath, MissingRate, ProfitReport,
    TradeLeg, DEFAULT_NOTIONAL,
};
