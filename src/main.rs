//! The FX Sniper - Forex Arbitrage Detection
//!
//! Run with: cargo run
//!
//! Subscribes to the forex provider, keeps a live view of quotes and logs
//! every new arbitrage cycle until Ctrl-C.

use clap::Parser;
use color_eyre::eyre::Result;
use console::style;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fx_sniper::{Config, Pipeline};

#[derive(Debug, Parser)]
#[command(name = "fx-sniper", version, about = "Forex arbitrage detection over a UDP quote feed")]
struct Cli {
    /// TOML config file (replaces environment settings)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Provider address, HOST:PORT
    #[arg(long)]
    feed: Option<String>,

    /// Reference currency for cycle detection
    #[arg(long)]
    reference: Option<String>,

    /// Append opportunities to the configured JSON-lines file
    #[arg(long)]
    log_opportunities: bool,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::from_env(),
        };

        if let Some(feed) = &self.feed {
            let (host, port) = feed
                .rsplit_once(':')
                .ok_or_else(|| color_eyre::eyre::eyre!("--feed must be HOST:PORT, got {}", feed))?;
            config.feed_host = host.to_string();
            config.feed_port = port.parse()?;
        }
        if let Some(reference) = &self.reference {
            config.reference_currency = reference.to_uppercase();
        }
        if self.log_opportunities {
            config.opportunity_log = true;
        }

        Ok(config)
    }
}

fn print_banner() {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" 🎯 THE FX SNIPER - Forex Arbitrage Detection").cyan().bold()
    );
    println!(
        "{}",
        style("    UDP Quote Feed | 1.5s Staleness | Bellman-Ford").cyan()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fx_sniper=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    print_banner();

    // Load configuration
    let config = cli.load_config()?;

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        error!("Please check your .env file or --config");
        return Err(e);
    }

    // Print configuration summary
    config.print_summary();
    println!();

    let mut pipeline = Pipeline::bind(config).await?;

    if let Err(e) = pipeline.subscribe().await {
        warn!("Subscription failed: {:#}", e);
    }
    pipeline.start()?;

    println!(
        "{} Listening on {} - press Ctrl-C to stop",
        style("✓").green(),
        pipeline.local_addr()?
    );

    let mut heartbeat = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                if let Err(e) = signal {
                    error!("Cannot listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = heartbeat.tick() => {
                if !pipeline.is_running() {
                    warn!("Pipeline tasks exited on their own");
                    break;
                }
                debug!("{} quotes live", pipeline.store().len());
            }
        }
    }

    println!();
    info!("Subscriber shutting down...");
    pipeline.stop().await;

    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").green()
    );
    println!("{}", style(" ✅ SESSION COMPLETE").green().bold());
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").green()
    );
    pipeline.stats().print_summary();

    Ok(())
}
