//! Configuration for the FX sniper
//!
//! Loaded from environment variables (and `.env`), or from a TOML file.
//! Every field has a default that matches the reference forex provider setup.

use eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::brain::{DEFAULT_NOTIONAL, DEFAULT_TOLERANCE};
use crate::cartographer::codec::QUOTE_RECORD_SIZE;
use crate::cartographer::DEFAULT_STALENESS_MS;
use crate::currency::Currency;

/// Longest staleness window accepted (one hour)
pub const MAX_STALENESS_MS: u64 = 3_600_000;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // ========== Network Settings ==========
    /// Forex provider host
    pub feed_host: String,

    /// Forex provider port
    pub feed_port: u16,

    /// Local address to receive quotes on (sent in the subscription)
    pub listen_host: String,

    /// Local port, 0 = pick any
    pub listen_port: u16,

    /// Receive buffer per datagram in bytes
    pub recv_buffer_size: usize,

    // ========== Detection Settings ==========
    /// Currency Bellman-Ford starts from
    pub reference_currency: String,

    /// Quotes older than this are evicted (milliseconds)
    pub staleness_ms: u64,

    /// Relaxation slack that keeps fair markets from looking profitable
    pub cycle_tolerance: f64,

    /// Starting amount for profit reports
    pub notional_amount: f64,

    /// Rotate cycles to a canonical start before comparing with the last report
    pub canonical_cycles: bool,

    // ========== Task Settings ==========
    /// How long the graph builder waits for a snapshot before re-checking stop (ms)
    pub graph_poll_ms: u64,

    /// How long shutdown waits for each task (ms)
    pub shutdown_timeout_ms: u64,

    // ========== Journal ==========
    /// Append reported opportunities to a JSON-lines file
    pub opportunity_log: bool,

    /// Path of that file
    pub opportunity_log_path: String,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            // Network
            feed_host: env::var("FEED_HOST").unwrap_or(defaults.feed_host),
            feed_port: env_or("FEED_PORT", defaults.feed_port),
            listen_host: env::var("LISTEN_HOST").unwrap_or(defaults.listen_host),
            listen_port: env_or("LISTEN_PORT", defaults.listen_port),
            recv_buffer_size: env_or("RECV_BUFFER_SIZE", defaults.recv_buffer_size),

            // Detection
            reference_currency: env::var("REFERENCE_CURRENCY")
                .map(|s| s.to_uppercase())
                .unwrap_or(defaults.reference_currency),
            staleness_ms: env_or("STALENESS_MS", defaults.staleness_ms),
            cycle_tolerance: env_or("CYCLE_TOLERANCE", defaults.cycle_tolerance),
            notional_amount: env_or("NOTIONAL_AMOUNT", defaults.notional_amount),
            canonical_cycles: env_or("CANONICAL_CYCLES", defaults.canonical_cycles),

            // Tasks
            graph_poll_ms: env_or("GRAPH_POLL_MS", defaults.graph_poll_ms),
            shutdown_timeout_ms: env_or("SHUTDOWN_TIMEOUT_MS", defaults.shutdown_timeout_ms),

            // Journal
            opportunity_log: env_or("OPPORTUNITY_LOG", defaults.opportunity_log),
            opportunity_log_path: env::var("OPPORTUNITY_LOG_PATH")
                .unwrap_or(defaults.opportunity_log_path),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("cannot read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration before binding anything
    pub fn validate(&self) -> Result<()> {
        self.reference()?;

        if self.staleness_ms == 0 || self.staleness_ms > MAX_STALENESS_MS {
            return Err(eyre!(
                "STALENESS_MS must be between 1 and {} (got {})",
                MAX_STALENESS_MS,
                self.staleness_ms
            ));
        }
        if !self.cycle_tolerance.is_finite() || self.cycle_tolerance < 0.0 {
            return Err(eyre!(
                "CYCLE_TOLERANCE must be a finite, non-negative number (got {})",
                self.cycle_tolerance
            ));
        }
        if !self.notional_amount.is_finite() || self.notional_amount <= 0.0 {
            return Err(eyre!(
                "NOTIONAL_AMOUNT must be positive (got {})",
                self.notional_amount
            ));
        }
        if self.graph_poll_ms == 0 {
            return Err(eyre!("GRAPH_POLL_MS must be positive"));
        }
        if self.recv_buffer_size < QUOTE_RECORD_SIZE {
            return Err(eyre!(
                "RECV_BUFFER_SIZE must hold at least one {}-byte record (got {})",
                QUOTE_RECORD_SIZE,
                self.recv_buffer_size
            ));
        }

        Ok(())
    }

    pub fn reference(&self) -> Result<Currency> {
        self.reference_currency
            .parse()
            .map_err(|e| eyre!("REFERENCE_CURRENCY: {}", e))
    }

    /// Resolve the provider address (first IPv4 match)
    pub fn feed_addr(&self) -> Result<SocketAddr> {
        resolve_v4(&self.feed_host, self.feed_port)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        resolve_v4(&self.listen_host, self.listen_port)
    }

    pub fn staleness(&self) -> chrono::Duration {
        // Clamped so an unvalidated config cannot overflow the conversion
        chrono::Duration::milliseconds(self.staleness_ms.min(MAX_STALENESS_MS) as i64)
    }

    pub fn graph_poll_interval(&self) -> Duration {
        Duration::from_millis(self.graph_poll_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║              FX SNIPER - CONFIGURATION                     ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ FEED                                                       ║");
        println!("║ • Provider:        {:^40} ║", format!("{}:{}", self.feed_host, self.feed_port));
        println!("║ • Listen on:       {:^40} ║", format!("{}:{}", self.listen_host, self.listen_port));
        println!("║ • Recv Buffer:     {:>34} bytes ║", self.recv_buffer_size);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ DETECTION                                                  ║");
        println!("║ • Reference:       {:^40} ║", self.reference_currency);
        println!("║ • Staleness:       {:>37} ms ║", self.staleness_ms);
        println!("║ • Tolerance:       {:^40e} ║", self.cycle_tolerance);
        println!("║ • Notional:        {:^40.2} ║", self.notional_amount);
        println!("║ • Canonical Dedupe:{:^40} ║",
            if self.canonical_cycles { "✓ Enabled" } else { "✗ Exact sequence" }
        );
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ JOURNAL                                                    ║");
        println!("║ • Opportunity Log: {:^40} ║",
            if self.opportunity_log { self.opportunity_log_path.as_str() } else { "✗ Disabled" }
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

fn resolve_v4(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .wrap_err_with(|| format!("cannot resolve {}:{}", host, port))?
        .find(|addr| addr.is_ipv4())
        .ok_or_else(|| eyre!("{}:{} has no IPv4 address", host, port))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_host: "127.0.0.1".to_string(),
            feed_port: 50403,
            listen_host: "127.0.0.1".to_string(),
            listen_port: 0,
            recv_buffer_size: 4096,
            reference_currency: "USD".to_string(),
            staleness_ms: DEFAULT_STALENESS_MS as u64,
            cycle_tolerance: DEFAULT_TOLERANCE,
            notional_amount: DEFAULT_NOTIONAL,
            canonical_cycles: true,
            graph_poll_ms: 100,
            shutdown_timeout_ms: 1000,
            opportunity_log: false,
            opportunity_log_path: "./logs/opportunities.jsonl".to_string(),
        }
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reference().unwrap().as_str(), "USD");
        assert_eq!(config.staleness(), chrono::Duration::milliseconds(1500));
        assert_eq!(config.cycle_tolerance, 1e-9);
        assert_eq!(config.notional_amount, 100.0);
        assert_eq!(
            config.feed_addr().unwrap(),
            "127.0.0.1:50403".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.reference_currency = "DOLLAR".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cycle_tolerance = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.notional_amount = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.recv_buffer_size = 16;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.staleness_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_staleness_rejected() {
        let mut config = Config::default();
        config.staleness_ms = u64::MAX;
        assert!(config.validate().is_err());
        // Still no panic if someone skips validation
        assert_eq!(
            config.staleness(),
            chrono::Duration::milliseconds(MAX_STALENESS_MS as i64)
        );

        config.staleness_ms = MAX_STALENESS_MS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_round_trip() {
        let mut config = Config::default();
        config.reference_currency = "EUR".to_string();
        config.feed_port = 6000;

        let path = std::env::temp_dir().join(format!("fx-sniper-config-{}.toml", std::process::id()));
        config.save_to_file(&path).unwrap();
        let back = Config::from_file(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(back.reference_currency, "EUR");
        assert_eq!(back.feed_port, 6000);
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("reference_currency = \"GBP\"\n").unwrap();
        assert_eq!(config.reference_currency, "GBP");
        assert_eq!(config.staleness_ms, 1500);
        assert_eq!(config.feed_port, 50403);
    }
}
