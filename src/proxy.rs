//! Proxy representation and health counters.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;
use url::Url;

/// Connection target of a proxy. Unique within a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyAddress {
    pub host: String,
    pub port: u16,
}

impl ProxyAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ProxyAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidProxy(format!("missing port in {:?}", s)))?;
        if host.is_empty() {
            return Err(Error::InvalidProxy(format!("missing host in {:?}", s)));
        }
        let port = port
            .parse()
            .map_err(|_| Error::InvalidProxy(format!("bad port in {:?}", s)))?;
        Ok(Self::new(host, port))
    }
}

/// Username/password pair for an authenticated proxy.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keep passwords out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// One proxy tracked by the pool, as read from the state store.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRecord {
    pub address: ProxyAddress,
    pub credentials: Option<Credentials>,
    /// Number of successful requests reported for this proxy.
    pub success_count: u64,
    /// Number of failed requests reported for this proxy.
    pub failure_count: u64,
    /// When the proxy was last handed out.
    pub last_used_at: Option<SystemTime>,
    /// While in the future, SMART selection skips this proxy.
    pub cooldown_until: Option<SystemTime>,
    /// Load order, used by SEQUENTIAL selection.
    pub sequence_index: u64,
}

impl ProxyRecord {
    /// A fresh record with zeroed counters.
    pub fn new(address: ProxyAddress, credentials: Option<Credentials>, sequence_index: u64) -> Self {
        Self {
            address,
            credentials,
            success_count: 0,
            failure_count: 0,
            last_used_at: None,
            cooldown_until: None,
            sequence_index,
        }
    }

    pub fn total_attempts(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Fraction of successful requests. A proxy nobody has tried yet scores 1.0.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_attempts();
        if total == 0 {
            return 1.0;
        }
        self.success_count as f64 / total as f64
    }

    /// Whether the record is cooling down at `now`.
    pub fn is_cooling_down(&self, now: SystemTime) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }

    pub fn handle(&self) -> ProxyHandle {
        ProxyHandle {
            address: self.address.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

/// What callers get back from the pool: enough to route a request through the proxy
/// and to report the outcome afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyHandle {
    pub address: ProxyAddress,
    pub credentials: Option<Credentials>,
}

impl ProxyHandle {
    pub fn new(address: ProxyAddress, credentials: Option<Credentials>) -> Self {
        Self {
            address,
            credentials,
        }
    }

    /// The proxy as an `http://` URL, credentials included.
    pub fn url(&self) -> String {
        match &self.credentials {
            Some(c) => format!("http://{}:{}@{}", c.username, c.password, self.address),
            None => format!("http://{}", self.address),
        }
    }

    /// Convert the handle to a reqwest::Proxy that routes all schemes.
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy> {
        let proxy = reqwest::Proxy::all(format!("http://{}", self.address))?;
        Ok(match &self.credentials {
            Some(c) => proxy.basic_auth(&c.username, &c.password),
            None => proxy,
        })
    }
}

impl fmt::Display for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.address.fmt(f)
    }
}

/// Accepts `host:port`, `user:pass@host:port`, and either with an `http://` or
/// `https://` scheme in front.
impl FromStr for ProxyHandle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidProxy("proxy string is empty".to_string()));
        }
        let url = if s.contains("://") {
            Url::parse(s)?
        } else {
            Url::parse(&format!("http://{}", s))?
        };
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidProxy(format!(
                "unsupported scheme {:?}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidProxy(format!("missing host in {:?}", s)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidProxy(format!("missing port in {:?}", s)))?;

        let credentials = match (url.username(), url.password()) {
            ("", _) => None,
            (user, password) => Some(Credentials::new(user, password.unwrap_or_default())),
        };

        Ok(Self::new(ProxyAddress::new(host, port), credentials))
    }
}
