//! Configuration for the proxy pool.

use crate::strategy::Strategy;
use std::time::Duration;

/// Default Webshare proxy list endpoint.
pub const DEFAULT_VENDOR_URL: &str = "https://proxy.webshare.io/api/proxy/list/";

/// Configuration for the proxy pool.
#[derive(Debug, Clone)]
pub struct ProxyGuardConfig {
    /// API key for the proxy vendor.
    pub api_key: Option<String>,
    /// Number of proxies to request from the vendor.
    pub amount: usize,
    /// Number of failures after which a proxy is evicted.
    pub fail_count: u64,
    /// Host of the state store.
    pub store_host: String,
    /// Port of the state store.
    pub store_port: u16,
    /// Logical database index of the state store.
    pub store_db: u32,
    /// Password for the state store.
    pub store_password: Option<String>,
    /// Upper bound for a single state store call.
    pub store_timeout: Duration,
    /// Prefix for every key the pool writes.
    pub key_prefix: String,
    /// Proxy list endpoint of the vendor.
    pub vendor_url: String,
    /// Page size used when paginating the vendor list.
    pub page_size: usize,
    /// Timeout for vendor calls and proxied requests.
    pub request_timeout: Duration,
    /// Strategy used by the middleware.
    pub strategy: Strategy,
    /// Cooldown applied by the middleware on SMART selection.
    pub cooldown: Option<Duration>,
    /// Number of times the middleware retries a request with a different proxy.
    pub retry_count: usize,
}

impl ProxyGuardConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyGuardConfigBuilder {
        ProxyGuardConfigBuilder::new()
    }

    /// Connection URL for the state store, e.g. `redis://:secret@localhost:6379/0`.
    pub fn store_url(&self) -> String {
        match &self.store_password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.store_host, self.store_port, self.store_db
            ),
            None => format!(
                "redis://{}:{}/{}",
                self.store_host, self.store_port, self.store_db
            ),
        }
    }
}

impl Default for ProxyGuardConfig {
    fn default() -> Self {
        ProxyGuardConfigBuilder::new().build()
    }
}

/// Builder for `ProxyGuardConfig`.
#[derive(Default)]
pub struct ProxyGuardConfigBuilder {
    api_key: Option<String>,
    amount: Option<usize>,
    fail_count: Option<u64>,
    store_host: Option<String>,
    store_port: Option<u16>,
    store_db: Option<u32>,
    store_password: Option<String>,
    store_timeout: Option<Duration>,
    key_prefix: Option<String>,
    vendor_url: Option<String>,
    page_size: Option<usize>,
    request_timeout: Option<Duration>,
    strategy: Option<Strategy>,
    cooldown: Option<Option<Duration>>,
    retry_count: Option<usize>,
}

impl ProxyGuardConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the vendor API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the number of proxies to request from the vendor.
    pub fn amount(mut self, amount: usize) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Set the failure threshold for eviction.
    pub fn fail_count(mut self, count: u64) -> Self {
        self.fail_count = Some(count);
        self
    }

    pub fn store_host(mut self, host: impl Into<String>) -> Self {
        self.store_host = Some(host.into());
        self
    }

    pub fn store_port(mut self, port: u16) -> Self {
        self.store_port = Some(port);
        self
    }

    pub fn store_db(mut self, db: u32) -> Self {
        self.store_db = Some(db);
        self
    }

    pub fn store_password(mut self, password: impl Into<String>) -> Self {
        self.store_password = Some(password.into());
        self
    }

    /// Set the timeout applied to each state store call.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    /// Set the prefix for every key the pool writes.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Set the vendor list endpoint.
    pub fn vendor_url(mut self, url: impl Into<String>) -> Self {
        self.vendor_url = Some(url.into());
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Set the timeout for vendor calls and proxied requests.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the strategy used by the middleware.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Set the SMART cooldown used by the middleware. `None` disables it.
    pub fn cooldown(mut self, cooldown: Option<Duration>) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Set the number of times to retry a request with different proxies.
    pub fn retry_count(mut self, count: usize) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyGuardConfig {
        ProxyGuardConfig {
            api_key: self.api_key,
            amount: self.amount.unwrap_or(250),
            fail_count: self.fail_count.unwrap_or(3).max(1),
            store_host: self.store_host.unwrap_or_else(|| "localhost".to_string()),
            store_port: self.store_port.unwrap_or(6379),
            store_db: self.store_db.unwrap_or(0),
            store_password: self.store_password,
            store_timeout: self.store_timeout.unwrap_or(Duration::from_secs(5)),
            key_prefix: self.key_prefix.unwrap_or_else(|| "proxyguard".to_string()),
            vendor_url: self.vendor_url.unwrap_or_else(|| DEFAULT_VENDOR_URL.to_string()),
            page_size: self.page_size.unwrap_or(250).max(1),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(10)),
            strategy: self.strategy.unwrap_or_default(),
            cooldown: self.cooldown.unwrap_or(Some(Duration::from_secs(60))),
            retry_count: self.retry_count.unwrap_or(2),
        }
    }
}
