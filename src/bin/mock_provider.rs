//! Mock Forex Provider
//!
//! Run with: cargo run --bin mock-provider
//!
//! Stands in for the real feed on localhost:
//! - accepts 6-byte subscription requests
//! - publishes USD-based quotes from a random walk every tick
//! - every so often slips in a mispriced cross to open a triangle
//! - now and then repeats an old timestamp, which subscribers must drop

use chrono::Utc;
use clap::Parser;
use color_eyre::eyre::Result;
use console::style;
use fx_sniper::cartographer::codec::{self, QUOTE_RECORD_SIZE, SUBSCRIPTION_SIZE};
use fx_sniper::currency::{Currency, CurrencyPair};
use rand::Rng;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "mock-provider", about = "Local forex quote publisher for testing")]
struct Args {
    /// Port to accept subscriptions on
    #[arg(long, default_value_t = 50403)]
    port: u16,

    /// Milliseconds between quote batches
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,

    /// Inject a mispriced cross every N batches (0 = never)
    #[arg(long, default_value_t = 8)]
    arbitrage_every: u64,

    /// Size of the injected mispricing, in percent
    #[arg(long, default_value_t = 0.5)]
    edge_pct: f64,

    /// Append a few junk bytes to every Nth batch (0 = never)
    #[arg(long, default_value_t = 0)]
    junk_every: u64,
}

/// USD value of one unit of each currency; every published price derives from these
struct Market {
    usd_value: Vec<(Currency, f64)>,
}

impl Market {
    fn new() -> Result<Self> {
        let seed = [
            ("EUR", 1.08),
            ("GBP", 1.27),
            ("JPY", 1.0 / 150.0),
            ("CHF", 1.0 / 0.88),
            ("AUD", 0.66),
            ("CAD", 1.0 / 1.36),
        ];
        let usd_value = seed
            .iter()
            .map(|(code, v)| Ok((code.parse::<Currency>()?, *v)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { usd_value })
    }

    fn walk(&mut self, rng: &mut impl Rng) {
        for (_, value) in &mut self.usd_value {
            *value *= 1.0 + rng.gen_range(-0.0005..0.0005);
        }
    }

    /// Every currency against USD: a star, so no cycles beyond round trips
    fn usd_quotes(&self, usd: Currency) -> Vec<(CurrencyPair, f64)> {
        self.usd_value
            .iter()
            .map(|(c, v)| (CurrencyPair::new(*c, usd), *v))
            .collect()
    }

    /// A cross rate pushed `edge_pct` away from fair
    fn mispriced_cross(&self, rng: &mut impl Rng, edge_pct: f64) -> Option<(CurrencyPair, f64)> {
        let n = self.usd_value.len();
        let i = rng.gen_range(0..n);
        let j = (i + rng.gen_range(1..n)) % n;
        let (base, base_usd) = self.usd_value.get(i)?;
        let (quote, quote_usd) = self.usd_value.get(j)?;
        let fair = base_usd / quote_usd;
        Some((CurrencyPair::new(*base, *quote), fair * (1.0 + edge_pct / 100.0)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();
    let socket = UdpSocket::bind(("127.0.0.1", args.port)).await?;

    println!();
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║          MOCK FOREX PROVIDER                               ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "{} Accepting subscriptions on {}",
        style("✓").green(),
        socket.local_addr()?
    );

    let usd: Currency = "USD".parse()?;
    let mut market = Market::new()?;
    let mut subscribers: HashSet<SocketAddr> = HashSet::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut buf = [0u8; 64];
    let mut batch_no: u64 = 0;

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) if len == SUBSCRIPTION_SIZE => {
                    match codec::deserialize_address(&buf[..len]) {
                        Ok(addr) => {
                            info!("New subscriber {} (request from {})", addr, from);
                            subscribers.insert(SocketAddr::V4(addr));
                        }
                        Err(e) => warn!("Bad subscription from {}: {}", from, e),
                    }
                }
                Ok((len, from)) => warn!("Ignoring {} bytes from {}", len, from),
                Err(e) => warn!("Receive error: {}", e),
            },
            _ = ticker.tick() => {
                if subscribers.is_empty() {
                    continue;
                }
                batch_no += 1;

                let datagram = {
                    let mut rng = rand::thread_rng();
                    market.walk(&mut rng);
                    let now = Utc::now();

                    let mut quotes = market.usd_quotes(usd);
                    if args.arbitrage_every > 0 && batch_no % args.arbitrage_every == 0 {
                        if let Some((pair, price)) = market.mispriced_cross(&mut rng, args.edge_pct) {
                            info!("Injecting {} at {:.6} ({:+}% off fair)", pair, price, args.edge_pct);
                            quotes.push((pair, price));
                        }
                    }

                    let mut datagram = Vec::with_capacity((quotes.len() + 2) * QUOTE_RECORD_SIZE);
                    for (pair, price) in &quotes {
                        datagram.extend_from_slice(&codec::encode_quote(*pair, *price as f32, now));
                    }

                    // Replay the first quote a second in the past
                    if batch_no % 10 == 0 {
                        if let Some((pair, price)) = quotes.first() {
                            let old = now - chrono::Duration::seconds(1);
                            datagram.extend_from_slice(&codec::encode_quote(*pair, *price as f32, old));
                        }
                    }
                    if args.junk_every > 0 && batch_no % args.junk_every == 0 {
                        datagram.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0x00]);
                    }
                    datagram
                };

                for subscriber in &subscribers {
                    if let Err(e) = socket.send_to(&datagram, subscriber).await {
                        warn!("Send to {} failed: {}", subscriber, e);
                    }
                }
            }
        }
    }
}
