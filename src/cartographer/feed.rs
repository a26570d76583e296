//! Feed Listener - the ingestion task
//!
//! Owns the receive loop on the UDP socket: decode every record in a
//! datagram, merge the batch into the quote store, then evict stale quotes.
//! The store publishes the resulting snapshot itself.

use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::codec::{self, SUBSCRIPTION_SIZE};
use super::quote_store::{MergeSummary, QuoteStore};
use crate::pipeline::stats::{bump, PipelineStats};

/// Send the 6-byte subscription request carrying our return address
pub async fn subscribe(socket: &UdpSocket, feed: SocketAddr) -> Result<()> {
    let local = socket.local_addr().wrap_err("socket has no local address")?;
    if local.ip().is_unspecified() {
        warn!(
            "Subscribing with unspecified address {}; the provider cannot reply to it",
            local
        );
    }

    let request = codec::serialize_socket_addr(local)?;
    let sent = socket
        .send_to(&request, feed)
        .await
        .wrap_err_with(|| format!("subscription to {} failed", feed))?;
    if sent != SUBSCRIPTION_SIZE {
        warn!("Subscription request truncated: {} of {} bytes", sent, SUBSCRIPTION_SIZE);
    }

    info!("Subscription request sent to {} (reply to {})", feed, local);
    Ok(())
}

pub struct FeedListener {
    socket: Arc<UdpSocket>,
    store: Arc<QuoteStore>,
    stats: Arc<PipelineStats>,
    buffer_size: usize,
}

impl FeedListener {
    pub fn new(
        socket: Arc<UdpSocket>,
        store: Arc<QuoteStore>,
        stats: Arc<PipelineStats>,
        buffer_size: usize,
    ) -> Self {
        Self {
            socket,
            store,
            stats,
            buffer_size,
        }
    }

    /// Decode, merge and evict for one datagram
    pub fn ingest(&self, datagram: &[u8], now: DateTime<Utc>) -> MergeSummary {
        bump(&self.stats.datagrams_received, 1);

        let mut quotes = Vec::with_capacity(datagram.len() / codec::QUOTE_RECORD_SIZE + 1);
        for (chunk, decoded) in codec::decode_datagram(datagram) {
            match decoded {
                Ok(quote) => quotes.push(quote),
                Err(e) => {
                    bump(&self.stats.malformed_records, 1);
                    warn!("Skipping record: {} [{}]", e, hex::encode(chunk));
                }
            }
        }
        bump(&self.stats.records_decoded, quotes.len());

        let summary = self.store.merge_batch(quotes);
        bump(&self.stats.quotes_merged, summary.inserted + summary.updated);
        bump(&self.stats.outdated_quotes, summary.outdated);

        let evicted = self.store.evict_stale(now);
        bump(&self.stats.stale_evictions, evicted);

        summary
    }

    /// Receive until the stop signal is raised
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut buf = vec![0u8; self.buffer_size];
        info!("Feed listener started on {:?}", self.socket.local_addr().ok());

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                changed = stop.changed() => {
                    // A dropped sender means the controller is gone: stop too
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => {
                        trace!("{} bytes from {}", len, from);
                        self.ingest(&buf[..len], Utc::now());
                    }
                    Err(e) if *stop.borrow() => {
                        debug!("Receive failed during shutdown: {}", e);
                        break;
                    }
                    Err(e) => {
                        bump(&self.stats.socket_errors, 1);
                        warn!("Error receiving updates: {}", e);
                    }
                },
            }
        }

        info!("Feed listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartographer::codec::encode_quote;
    use crate::currency::CurrencyPair;

    fn pair(base: &str, quote: &str) -> CurrencyPair {
        CurrencyPair::new(base.parse().unwrap(), quote.parse().unwrap())
    }

    async fn listener() -> FeedListener {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        FeedListener::new(
            Arc::new(socket),
            Arc::new(QuoteStore::new(chrono::Duration::milliseconds(1500))),
            Arc::new(PipelineStats::default()),
            4096,
        )
    }

    #[tokio::test]
    async fn test_ingest_merges_good_records_and_skips_bad() {
        let feed = listener().await;
        let now = Utc::now();

        let mut datagram = Vec::new();
        datagram.extend_from_slice(&encode_quote(pair("EUR", "USD"), 1.08, now));
        datagram.extend_from_slice(&encode_quote(pair("USD", "JPY"), 150.2, now));
        datagram.extend_from_slice(b"GBPUSD");

        let summary = feed.ingest(&datagram, now);
        assert_eq!(summary.inserted, 2);
        assert_eq!(feed.store.len(), 2);

        let stats = feed.stats.snapshot();
        assert_eq!(stats.datagrams_received, 1);
        assert_eq!(stats.records_decoded, 2);
        assert_eq!(stats.malformed_records, 1);
    }

    #[tokio::test]
    async fn test_ingest_evicts_after_merge() {
        let feed = listener().await;
        let now = Utc::now();
        let old = now - chrono::Duration::seconds(3);

        let datagram = encode_quote(pair("EUR", "USD"), 1.08, old);
        feed.ingest(&datagram, now);

        // Merged, then immediately too old to keep
        assert!(feed.store.is_empty());
        let stats = feed.stats.snapshot();
        assert_eq!(stats.quotes_merged, 1);
        assert_eq!(stats.stale_evictions, 1);
    }

    #[tokio::test]
    async fn test_run_receives_and_stops() {
        let feed = listener().await;
        let addr = feed.socket.local_addr().unwrap();
        let store = feed.store.clone();
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(feed.run(stop_rx));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let record = encode_quote(pair("EUR", "USD"), 1.08, Utc::now());
        sender.send_to(&record, addr).await.unwrap();

        for _ in 0..100 {
            if !store.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(store.len(), 1);

        stop_tx.send_replace(true);
        let joined = tokio_test::assert_ok!(
            tokio::time::timeout(std::time::Duration::from_secs(1), handle).await
        );
        tokio_test::assert_ok!(joined);
    }

    #[tokio::test]
    async fn test_run_survives_receive_error() {
        // Reserve a loopback port, then free it so nothing answers there
        let peer_addr = {
            let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            peer.local_addr().unwrap()
        };

        // A connected UDP socket reports the ICMP port-unreachable as an
        // error on its next receive
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(peer_addr).await.unwrap();
        socket.send(b"ping").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let addr = socket.local_addr().unwrap();
        let feed = FeedListener::new(
            Arc::new(socket),
            Arc::new(QuoteStore::new(chrono::Duration::milliseconds(1500))),
            Arc::new(PipelineStats::default()),
            4096,
        );
        let store = feed.store.clone();
        let stats = feed.stats.clone();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(feed.run(stop_rx));

        for _ in 0..100 {
            if stats.snapshot().socket_errors > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(stats.snapshot().socket_errors, 1);
        assert!(!handle.is_finished());

        // Still receiving: the connected peer comes up and sends a quote
        let peer = UdpSocket::bind(peer_addr).await.unwrap();
        let record = encode_quote(pair("EUR", "USD"), 1.08, Utc::now());
        peer.send_to(&record, addr).await.unwrap();

        for _ in 0..100 {
            if !store.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(store.len(), 1);

        stop_tx.send_replace(true);
        let joined = tokio_test::assert_ok!(
            tokio::time::timeout(std::time::Duration::from_secs(1), handle).await
        );
        tokio_test::assert_ok!(joined);
    }

    #[tokio::test]
    async fn test_subscribe_sends_return_address() {
        let provider = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        subscribe(&client, provider.local_addr().unwrap()).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = provider.recv_from(&mut buf).await.unwrap();
        assert_eq!(len, SUBSCRIPTION_SIZE);

        let addr = codec::deserialize_address(&buf[..len]).unwrap();
        assert_eq!(SocketAddr::V4(addr), client.local_addr().unwrap());
        assert_eq!(from, client.local_addr().unwrap());
    }
}
