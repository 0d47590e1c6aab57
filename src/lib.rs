//! # reqwest-proxy-guard
//!
//! A pool of outbound HTTP proxies shared by any number of clients through a key-value
//! store, with three rotation strategies and automatic retirement of proxies that keep
//! failing.
//!
//! Callers ask the pool for a proxy, make their request through it, and report back
//! whether it worked. Success and failure counters are updated atomically in the store, so
//! clients in separate processes can share one pool without coordinating. A proxy whose
//! failure count reaches `fail_count` is evicted exactly once and never handed out again.
//!
//! ```no_run
//! use reqwest_proxy_guard::{MemoryStore, ProxyGuardConfig, ProxyPool, Strategy, WebshareClient};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> reqwest_proxy_guard::Result<()> {
//! let config = ProxyGuardConfig::builder().api_key("your-api-key").build();
//! let source = Arc::new(WebshareClient::new(&config)?);
//! let pool = ProxyPool::new(config, Arc::new(MemoryStore::new()), source).await?;
//! pool.initialize_proxies(100).await?;
//!
//! let proxy = pool.get_proxy(Strategy::Smart, Some(Duration::from_secs(60))).await?;
//! let client = reqwest::Client::builder().proxy(proxy.to_reqwest_proxy()?).build()?;
//! let ok = client.get("https://httpbin.org/ip").send().await.is_ok();
//! pool.report_proxy(&proxy, ok).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod middleware;
pub mod pool;
pub mod proxy;
pub mod stats;
pub mod store;
pub mod strategy;
pub mod vendor;
mod utils;

pub use config::{ProxyGuardConfig, ProxyGuardConfigBuilder};
pub use error::{Error, Result};
pub use middleware::ProxyGuardMiddleware;
pub use pool::{ProxyPool, RefreshSummary, ReportOutcome, Snapshot};
pub use proxy::{Credentials, ProxyAddress, ProxyHandle, ProxyRecord};
pub use stats::{compute_stats, PoolStats, ProxyStats};
pub use store::memory::MemoryStore;
#[cfg(feature = "redis")]
pub use store::redis::RedisStore;
pub use store::StateStore;
pub use strategy::Strategy;
pub use vendor::{ListSource, ProxySource, StaticSource, WebshareClient};
