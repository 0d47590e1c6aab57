//! Sources the pool loads proxies from.

use crate::config::ProxyGuardConfig;
use crate::error::{Error, Result};
use crate::proxy::{Credentials, ProxyAddress, ProxyHandle};

use async_trait::async_trait;
use futures::future;
use log::{debug, info, warn};
use parking_lot::RwLock;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

/// Supplies the proxies a pool is built from.
#[async_trait]
pub trait ProxySource: Send + Sync {
    /// Fetch up to `amount` proxies.
    async fn fetch_proxies(&self, amount: usize) -> Result<Vec<ProxyHandle>>;
}

#[derive(Debug, Deserialize)]
struct ListPage {
    results: Vec<ListedProxy>,
}

#[derive(Debug, Deserialize)]
struct ListedProxy {
    proxy_address: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    /// v2 API
    #[serde(default)]
    port: Option<u16>,
    /// v1 API
    #[serde(default)]
    ports: Option<ListedPorts>,
    #[serde(default = "default_valid")]
    valid: bool,
}

#[derive(Debug, Deserialize)]
struct ListedPorts {
    http: u16,
}

fn default_valid() -> bool {
    true
}

impl ListedProxy {
    fn into_handle(self) -> Option<ProxyHandle> {
        if !self.valid {
            return None;
        }
        let port = self.port.or(self.ports.map(|p| p.http))?;
        let credentials = match (self.username, self.password) {
            (Some(user), Some(password)) if !user.is_empty() => {
                Some(Credentials::new(user, password))
            }
            _ => None,
        };
        Some(ProxyHandle::new(
            ProxyAddress::new(self.proxy_address, port),
            credentials,
        ))
    }
}

/// Client for the Webshare proxy list API.
pub struct WebshareClient {
    client: Client,
    api_key: String,
    url: String,
    page_size: usize,
}

impl WebshareClient {
    /// Build a client from the pool configuration. Fails without an API key.
    pub fn new(config: &ProxyGuardConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("API key is not set".to_string()))?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            api_key,
            url: config.vendor_url.clone(),
            page_size: config.page_size,
        })
    }

    fn authorization(&self) -> String {
        if self.api_key.starts_with("Token ") {
            self.api_key.clone()
        } else {
            format!("Token {}", self.api_key)
        }
    }

    async fn fetch_page(&self, page: usize) -> Result<Vec<ProxyHandle>> {
        let page_size = self.page_size.to_string();
        let page_number = page.to_string();
        let response = self
            .client
            .get(&self.url)
            .query(&[("page_size", page_size.as_str()), ("page", page_number.as_str())])
            .header(AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(|e| Error::UpstreamFetch(e.to_string()))?;

        let status = response.status();
        // the list is shorter than we asked for
        if status == StatusCode::NOT_FOUND && page > 1 {
            debug!("Proxy list ends before page {}", page);
            return Ok(Vec::new());
        }
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));
        if !status.is_success() || !is_json {
            return Err(Error::UpstreamFetch(format!(
                "proxy list page {} returned {}",
                page, status
            )));
        }

        let body: ListPage = response
            .json()
            .await
            .map_err(|e| Error::UpstreamFetch(format!("malformed proxy list page {}: {}", page, e)))?;
        debug!("Proxy list page {} carried {} entries", page, body.results.len());

        Ok(body
            .results
            .into_iter()
            .filter_map(ListedProxy::into_handle)
            .collect())
    }
}

#[async_trait]
impl ProxySource for WebshareClient {
    async fn fetch_proxies(&self, amount: usize) -> Result<Vec<ProxyHandle>> {
        let pages = amount.div_ceil(self.page_size).max(1);
        let fetched = future::try_join_all((1..=pages).map(|page| self.fetch_page(page))).await?;

        let mut proxies: Vec<ProxyHandle> = fetched.into_iter().flatten().collect();
        proxies.truncate(amount);
        info!("Fetched {} proxies across {} pages", proxies.len(), pages);
        Ok(proxies)
    }
}

/// Reads a plain-text proxy list from an http(s) URL or a local file.
pub struct ListSource {
    location: String,
    client: Client,
}

impl ListSource {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ProxySource for ListSource {
    async fn fetch_proxies(&self, amount: usize) -> Result<Vec<ProxyHandle>> {
        let content = if self.location.starts_with("http") {
            self.client
                .get(&self.location)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| Error::UpstreamFetch(e.to_string()))?
                .text()
                .await
                .map_err(|e| Error::UpstreamFetch(e.to_string()))?
        } else {
            tokio::fs::read_to_string(&self.location)
                .await
                .map_err(|e| Error::UpstreamFetch(format!("{}: {}", self.location, e)))?
        };

        let mut proxies = parse_proxy_list(&content);
        proxies.truncate(amount);
        info!("Read {} proxies from {}", proxies.len(), self.location);
        Ok(proxies)
    }
}

/// Parse one proxy per line. Blank lines and `#` comments are skipped.
pub fn parse_proxy_list(content: &str) -> Vec<ProxyHandle> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match line.parse() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Skipping proxy list entry {:?}: {}", line, e);
                None
            }
        })
        .collect()
}

/// A fixed list of proxies, replaceable at runtime.
#[derive(Default)]
pub struct StaticSource {
    proxies: RwLock<Vec<ProxyHandle>>,
}

impl StaticSource {
    pub fn new(proxies: Vec<ProxyHandle>) -> Self {
        Self {
            proxies: RwLock::new(proxies),
        }
    }

    /// Replace what the next fetch returns.
    pub fn replace(&self, proxies: Vec<ProxyHandle>) {
        *self.proxies.write() = proxies;
    }
}

#[async_trait]
impl ProxySource for StaticSource {
    async fn fetch_proxies(&self, amount: usize) -> Result<Vec<ProxyHandle>> {
        Ok(self.proxies.read().iter().take(amount).cloned().collect())
    }
}
