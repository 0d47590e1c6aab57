//! Middleware implementation for reqwest.

use crate::error::Error as PoolError;
use crate::pool::ProxyPool;
use crate::strategy::Strategy;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{info, warn};
use reqwest_middleware::{Error, Middleware, Next, Result};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// Statuses produced by the proxy itself rather than the target.
fn is_proxy_failure(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::PROXY_AUTHENTICATION_REQUIRED
            | StatusCode::BAD_GATEWAY
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Middleware that sends each request through a proxy picked from a shared pool and
/// reports how it went.
#[derive(Clone)]
pub struct ProxyGuardMiddleware {
    /// The proxy pool.
    pool: Arc<ProxyPool>,
    strategy: Strategy,
    cooldown: Option<Duration>,
    retry_count: usize,
}

impl ProxyGuardMiddleware {
    /// Create a middleware using the strategy, cooldown and retry count from the pool's
    /// configuration.
    pub fn new(pool: Arc<ProxyPool>) -> Self {
        let strategy = pool.config.strategy;
        let cooldown = pool.config.cooldown;
        let retry_count = pool.config.retry_count;
        Self {
            pool,
            strategy,
            cooldown,
            retry_count,
        }
    }

    /// Override the selection strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Override the SMART cooldown.
    pub fn with_cooldown(mut self, cooldown: Option<Duration>) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Override how many other proxies a failed request is retried with.
    pub fn with_retry_count(mut self, retry_count: usize) -> Self {
        self.retry_count = retry_count;
        self
    }

    async fn report(&self, proxy: &crate::proxy::ProxyHandle, success: bool) {
        if let Err(e) = self.pool.report_proxy(proxy, success).await {
            warn!("Could not record outcome for proxy {}: {}", proxy, e);
        }
    }
}

#[async_trait]
impl Middleware for ProxyGuardMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        _extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let mut retry_count = 0;

        loop {
            let proxy = match self.pool.get_proxy(self.strategy, self.cooldown).await {
                Ok(proxy) => proxy,
                Err(PoolError::PoolExhausted) => {
                    warn!("No proxy available for {} selection", self.strategy);
                    return Err(Error::Middleware(anyhow!(PoolError::PoolExhausted)));
                }
                Err(e) => return Err(Error::Middleware(anyhow!(e))),
            };

            let proxied_request = req.try_clone().ok_or_else(|| {
                Error::Middleware(anyhow!(
                    "Request object is not cloneable. Are you passing a streaming body?"
                ))
            })?;

            info!("Using proxy: {} (attempt {})", proxy, retry_count + 1);

            let client = proxy.to_reqwest_proxy().and_then(|p| {
                reqwest::Client::builder()
                    .proxy(p)
                    .timeout(self.pool.config.request_timeout)
                    .build()
                    .map_err(PoolError::from)
            });
            let client = match client {
                Ok(c) => c,
                Err(e) => {
                    warn!("Failed to build client with proxy {}: {}", proxy, e);
                    self.report(&proxy, false).await;
                    retry_count += 1;
                    if retry_count > self.retry_count {
                        return Err(Error::Middleware(anyhow!(e)));
                    }
                    continue;
                }
            };

            match client.execute(proxied_request).await {
                Ok(response) if is_proxy_failure(response.status()) => {
                    warn!(
                        "Proxy {} answered {} (attempt {})",
                        proxy,
                        response.status(),
                        retry_count + 1
                    );
                    self.report(&proxy, false).await;

                    retry_count += 1;
                    if retry_count > self.retry_count {
                        return Ok(response);
                    }
                }
                Ok(response) => {
                    self.report(&proxy, true).await;
                    return Ok(response);
                }
                Err(err) => {
                    warn!(
                        "Request failed with proxy {} (attempt {}): {}",
                        proxy,
                        retry_count + 1,
                        err
                    );
                    self.report(&proxy, false).await;

                    retry_count += 1;
                    if retry_count > self.retry_count {
                        return Err(Error::Reqwest(err));
                    }
                }
            }
        }
    }
}
