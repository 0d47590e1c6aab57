//! Simple example of using reqwest-proxy-guard.
//!
//! Reads proxies from a plain-text list and keeps the pool in process memory. Pass a
//! file path or URL with one `[user:pass@]host:port` per line.

use reqwest_middleware::ClientBuilder;
use reqwest_proxy_guard::{
    ListSource, MemoryStore, ProxyGuardConfig, ProxyGuardMiddleware, ProxyPool, Strategy,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let list = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "proxies.txt".to_string());

    println!("Initializing proxy pool from {}...", list);

    let config = ProxyGuardConfig::builder()
        .fail_count(3)
        .retry_count(2)
        .request_timeout(Duration::from_secs(5))
        .strategy(Strategy::Smart)
        // keep a favoured proxy from taking every request
        .cooldown(Some(Duration::from_secs(10)))
        .build();

    let pool = ProxyPool::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(ListSource::new(list)),
    )
    .await?;
    let loaded = pool.initialize_proxies(250).await?;
    println!("Loaded {} proxies", loaded);

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(ProxyGuardMiddleware::new(pool.clone()))
        .build();

    println!("Sending request...");
    let response = client.get("https://httpbin.org/ip").send().await?;

    println!("Status: {}", response.status());
    println!("Response: {}", response.text().await?);

    let stats = pool.get_stats().await?;
    println!(
        "Pool: {} live, {} evicted, {}% success",
        stats.total_proxies, stats.evicted_proxies, stats.overall_success_rate
    );

    Ok(())
}
