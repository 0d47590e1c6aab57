//! State store port and the adapter the pool talks to.
//!
//! The pool never keeps proxy state in process memory. Everything lives in a shared
//! key-value store so that independent clients, possibly in separate processes, see the
//! same counters. The [`StateStore`] trait is the port a backend implements; [`Store`]
//! wraps a backend with per-call timeouts and the pool's key layout.
//!
//! Every mutation the pool makes is either a single primitive (`incr`) or a
//! [`Transaction`]: a list of guards checked and a list of ops applied as one atomic step.
//! A transaction whose guards do not hold is not applied at all and reports
//! [`Commit::Aborted`].

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use crate::error::{Error, Result};
use crate::utils::duration_millis;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A precondition checked atomically before a transaction's ops run.
///
/// Counter guards read a missing key as 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Guard {
    Exists { key: String },
    Absent { key: String },
    Equals { key: String, value: String },
    CounterBelow { key: String, limit: i64 },
    CounterEquals { key: String, value: i64 },
    CounterAtLeast { key: String, value: i64 },
    Member { set: String, member: String },
    NotMember { set: String, member: String },
}

impl Guard {
    pub fn absent(key: impl Into<String>) -> Self {
        Guard::Absent { key: key.into() }
    }

    pub fn member(set: impl Into<String>, member: impl Into<String>) -> Self {
        Guard::Member {
            set: set.into(),
            member: member.into(),
        }
    }

    /// `Absent` when `value` is `None`, `Equals` otherwise.
    pub fn unchanged(key: impl Into<String>, value: Option<String>) -> Self {
        match value {
            Some(value) => Guard::Equals {
                key: key.into(),
                value,
            },
            None => Guard::Absent { key: key.into() },
        }
    }
}

/// A write applied as part of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Op {
    Set { key: String, value: String },
    SetWithTtl { key: String, value: String, ttl_ms: u64 },
    Delete { key: String },
    Incr { key: String, by: i64 },
    SetAdd { set: String, member: String },
    SetRemove { set: String, member: String },
}

impl Op {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Op::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn set_with_ttl(key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        Op::SetWithTtl {
            key: key.into(),
            value: value.into(),
            // a zero TTL would be rejected by most stores
            ttl_ms: duration_millis(ttl).max(1),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Op::Delete { key: key.into() }
    }

    pub fn incr(key: impl Into<String>, by: i64) -> Self {
        Op::Incr {
            key: key.into(),
            by,
        }
    }

    pub fn set_add(set: impl Into<String>, member: impl Into<String>) -> Self {
        Op::SetAdd {
            set: set.into(),
            member: member.into(),
        }
    }

    pub fn set_remove(set: impl Into<String>, member: impl Into<String>) -> Self {
        Op::SetRemove {
            set: set.into(),
            member: member.into(),
        }
    }
}

/// Guards plus ops, applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub guards: Vec<Guard>,
    pub ops: Vec<Op>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(mut self, guard: Guard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn op(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }

    pub fn push_guard(&mut self, guard: Guard) {
        self.guards.push(guard);
    }

    pub fn push_op(&mut self, op: Op) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Outcome of [`StateStore::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    /// All guards held and every op was applied. Carries the new value of each
    /// `Incr` op, in op order.
    Applied(Vec<i64>),
    /// A guard did not hold; nothing was written.
    Aborted,
}

impl Commit {
    pub fn is_applied(&self) -> bool {
        matches!(self, Commit::Applied(_))
    }
}

/// Backend contract for the shared key-value store.
///
/// Implementations must make `incr`, `get_many` and `commit` atomic with respect to every
/// other call on the same store. Failures are reported as [`Error::StoreUnavailable`].
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Check the store is reachable.
    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Read several keys in one atomic step.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Set a key that disappears after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Add `by` to an integer key (missing reads as 0) and return the new value.
    async fn incr(&self, key: &str, by: i64) -> Result<i64>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Add a member to a set. Returns whether it was newly added.
    async fn set_add(&self, set: &str, member: &str) -> Result<bool>;

    /// Remove a member from a set. Returns whether it was present.
    async fn set_remove(&self, set: &str, member: &str) -> Result<bool>;

    async fn set_members(&self, set: &str) -> Result<Vec<String>>;

    async fn set_len(&self, set: &str) -> Result<usize>;

    /// Every key (plain or set) starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Check every guard, then apply every op, as one atomic step.
    async fn commit(&self, tx: &Transaction) -> Result<Commit>;
}

/// Key layout of one pool inside the store.
#[derive(Debug, Clone)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Set of addresses eligible for selection.
    pub fn live(&self) -> String {
        format!("{}:live", self.prefix)
    }

    /// Set of addresses retired after reaching the failure threshold.
    pub fn evicted(&self) -> String {
        format!("{}:evicted", self.prefix)
    }

    /// Counter handing out sequence indices.
    pub fn sequence(&self) -> String {
        format!("{}:seq", self.prefix)
    }

    /// Round-robin cursor.
    pub fn cursor(&self) -> String {
        format!("{}:cursor", self.prefix)
    }

    fn record(&self, address: &(impl fmt::Display + ?Sized), field: &str) -> String {
        format!("{}:proxy:{}:{}", self.prefix, address, field)
    }

    pub fn meta(&self, address: &(impl fmt::Display + ?Sized)) -> String {
        self.record(address, "meta")
    }

    pub fn success(&self, address: &(impl fmt::Display + ?Sized)) -> String {
        self.record(address, "success")
    }

    pub fn failure(&self, address: &(impl fmt::Display + ?Sized)) -> String {
        self.record(address, "failure")
    }

    pub fn last_used(&self, address: &(impl fmt::Display + ?Sized)) -> String {
        self.record(address, "last_used")
    }

    pub fn cooldown(&self, address: &(impl fmt::Display + ?Sized)) -> String {
        self.record(address, "cooldown")
    }

    /// All per-record keys, in the order `meta, success, failure, last_used, cooldown`.
    pub fn record_keys(&self, address: &(impl fmt::Display + ?Sized)) -> [String; RECORD_FIELDS] {
        [
            self.meta(address),
            self.success(address),
            self.failure(address),
            self.last_used(address),
            self.cooldown(address),
        ]
    }
}

/// Number of keys [`Keyspace::record_keys`] returns.
pub const RECORD_FIELDS: usize = 5;

/// A [`StateStore`] bounded by a per-call timeout, plus the pool's key layout.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn StateStore>,
    timeout: Duration,
    keys: Keyspace,
}

impl Store {
    pub fn new(backend: Arc<dyn StateStore>, timeout: Duration, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            timeout,
            keys: Keyspace::new(prefix),
        }
    }

    pub fn keys(&self) -> &Keyspace {
        &self.keys
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::StoreUnavailable(format!(
                "{} timed out after {:?}",
                what, self.timeout
            ))),
        }
    }

    pub async fn ping(&self) -> Result<()> {
        self.bounded("ping", self.backend.ping()).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.bounded("get", self.backend.get(key)).await
    }

    pub async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values = self.bounded("get_many", self.backend.get_many(keys)).await?;
        if values.len() != keys.len() {
            return Err(Error::StoreUnavailable(format!(
                "get_many returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }
        Ok(values)
    }

    pub async fn incr(&self, key: &str, by: i64) -> Result<i64> {
        self.bounded("incr", self.backend.incr(key, by)).await
    }

    pub async fn set_members(&self, set: &str) -> Result<Vec<String>> {
        self.bounded("set_members", self.backend.set_members(set)).await
    }

    pub async fn set_len(&self, set: &str) -> Result<usize> {
        self.bounded("set_len", self.backend.set_len(set)).await
    }

    pub async fn is_member(&self, set: &str, member: &str) -> Result<bool> {
        let tx = Transaction::new().guard(Guard::member(set, member));
        Ok(self.commit(&tx).await?.is_applied())
    }

    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.bounded("keys_with_prefix", self.backend.keys_with_prefix(prefix))
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.bounded("delete", self.backend.delete(key)).await
    }

    pub async fn commit(&self, tx: &Transaction) -> Result<Commit> {
        self.bounded("commit", self.backend.commit(tx)).await
    }
}
