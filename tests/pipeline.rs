//! End-to-end: a fake provider on loopback feeds the pipeline over UDP.

use chrono::Utc;
use fx_sniper::cartographer::codec::{self, SUBSCRIPTION_SIZE};
use fx_sniper::currency::CurrencyPair;
use fx_sniper::{Config, Pipeline};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

fn pair(base: &str, quote: &str) -> CurrencyPair {
    CurrencyPair::new(base.parse().unwrap(), quote.parse().unwrap())
}

fn test_config(feed: SocketAddr) -> Config {
    Config {
        feed_host: feed.ip().to_string(),
        feed_port: feed.port(),
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        graph_poll_ms: 20,
        shutdown_timeout_ms: 500,
        ..Config::default()
    }
}

fn triangle_datagram(rates: [f32; 3]) -> Vec<u8> {
    let now = Utc::now();
    let legs = [pair("USD", "EUR"), pair("EUR", "GBP"), pair("GBP", "USD")];
    legs.iter()
        .zip(rates)
        .flat_map(|(p, r)| codec::encode_quote(*p, r, now))
        .collect()
}

/// Bind a provider, start the pipeline, and return the address it subscribed with
async fn start_pipeline() -> (UdpSocket, Pipeline, SocketAddr) {
    let provider = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut pipeline = Pipeline::bind(test_config(provider.local_addr().unwrap()))
        .await
        .unwrap();
    pipeline.start().unwrap();
    pipeline.subscribe().await.unwrap();

    let mut buf = [0u8; 64];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), provider.recv_from(&mut buf))
        .await
        .expect("no subscription received")
        .unwrap();
    assert_eq!(len, SUBSCRIPTION_SIZE);
    let subscriber = SocketAddr::V4(codec::deserialize_address(&buf[..len]).unwrap());
    assert_eq!(subscriber, pipeline.local_addr().unwrap());

    (provider, pipeline, subscriber)
}

#[tokio::test]
async fn test_feed_to_opportunity() {
    let (provider, mut pipeline, subscriber) = start_pipeline().await;
    let mut reports = pipeline.subscribe_reports();

    provider
        .send_to(&triangle_datagram([0.9, 0.8, 1.5]), subscriber)
        .await
        .unwrap();

    let report = tokio::time::timeout(Duration::from_secs(2), reports.recv())
        .await
        .expect("no opportunity reported")
        .unwrap();

    assert_eq!(report.path.hop_count(), 3);
    assert!(report.is_complete());
    // f32 on the wire: 108 only to a few decimal places
    assert!((report.final_amount - 108.0).abs() < 1e-3, "got {}", report.final_amount);
    assert_eq!(pipeline.active_graph().node_count(), 3);

    pipeline.stop().await;
    let stats = pipeline.stats();
    assert_eq!(stats.records_decoded, 3);
    assert_eq!(stats.opportunities_reported, 1);
}

#[tokio::test]
async fn test_bad_datagram_does_not_stop_ingestion() {
    let (provider, mut pipeline, subscriber) = start_pipeline().await;
    let mut reports = pipeline.subscribe_reports();

    provider.send_to(&[0xde, 0xad, 0xbe], subscriber).await.unwrap();
    provider
        .send_to(&triangle_datagram([0.9, 0.8, 1.5]), subscriber)
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), reports.recv())
        .await
        .expect("no opportunity reported")
        .unwrap();

    pipeline.stop().await;
    let stats = pipeline.stats();
    assert_eq!(stats.datagrams_received, 2);
    assert_eq!(stats.malformed_records, 1);
}

#[tokio::test]
async fn test_fair_market_reports_nothing() {
    let (provider, mut pipeline, subscriber) = start_pipeline().await;
    let mut reports = pipeline.subscribe_reports();

    provider
        .send_to(&triangle_datagram([2.0, 0.5, 1.0]), subscriber)
        .await
        .unwrap();

    // Wait for the graph to be built from all three quotes
    let deadline = Instant::now() + Duration::from_secs(2);
    while pipeline.active_graph().edge_count() < 6 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pipeline.active_graph().edge_count(), 6);
    assert!(reports.try_recv().is_err());

    pipeline.stop().await;
}

#[tokio::test]
async fn test_stop_is_bounded() {
    let (_provider, mut pipeline, _) = start_pipeline().await;
    assert!(pipeline.is_running());

    let listen_addr = pipeline.local_addr().unwrap();

    let started = Instant::now();
    pipeline.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2));

    // Both tasks have finished and dropped their handles on the store
    assert_eq!(Arc::strong_count(pipeline.store()), 1);

    // ...and on the socket: once the pipeline is gone the port is free again
    drop(pipeline);
    let rebound = UdpSocket::bind(listen_addr).await;
    assert!(rebound.is_ok(), "listen port still held: {:?}", rebound.err());
}
