//! FX Sniper - real-time forex arbitrage detection
//!
//! Quotes arrive over UDP, land in a time-bounded store, and every change
//! is turned into a fresh price graph that Bellman-Ford searches for
//! negative (profitable) cycles.

pub mod brain;
pub mod cartographer;
pub mod config;
pub mod currency;
pub mod journal;
pub mod pipeline;

pub use config::Config;
pub use pipeline::Pipeline;
