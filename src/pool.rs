//! Core proxy pool implementation.
//!
//! A [`ProxyPool`] holds no proxy state of its own. Counters, cooldowns and membership live
//! in the state store, so any number of pools, in any number of processes, can share one
//! set of proxies. Each mutation is a single store transaction; when a transaction aborts
//! because another client got there first, the pool re-reads and plans again.

use crate::config::ProxyGuardConfig;
use crate::error::{Error, Result};
use crate::proxy::{Credentials, ProxyAddress, ProxyHandle, ProxyRecord};
use crate::stats::{compute_stats, PoolStats};
use crate::store::{Commit, Guard, Op, StateStore, Store, Transaction, RECORD_FIELDS};
use crate::strategy::{self, SelectionContext, Strategy};
use crate::utils::{parse_counter, parse_timestamp, to_millis};
use crate::vendor::ProxySource;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time;

/// How many times a conflicting commit is re-planned before giving up.
pub const MAX_COMMIT_ATTEMPTS: usize = 16;

/// Longest SMART cooldown written to the store. Longer requests are capped.
pub const MAX_COOLDOWN: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Stored identity of a record. Counters live in their own keys.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct RecordMeta {
    host: String,
    port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    sequence_index: u64,
}

impl RecordMeta {
    fn new(handle: &ProxyHandle, sequence_index: u64) -> Self {
        let (username, password) = match &handle.credentials {
            Some(c) => (Some(c.username.clone()), Some(c.password.clone())),
            None => (None, None),
        };
        Self {
            host: handle.address.host.clone(),
            port: handle.address.port,
            username,
            password,
            sequence_index,
        }
    }
}

/// Point-in-time view of the live proxies.
#[derive(Debug, Clone)]
pub struct Snapshot {
    records: Vec<ProxyRecord>,
    evicted: usize,
}

impl Snapshot {
    /// Build a snapshot from records, ordered by sequence index.
    pub fn from_records(mut records: Vec<ProxyRecord>) -> Self {
        records.sort_by_key(|r| r.sequence_index);
        Self {
            records,
            evicted: 0,
        }
    }

    /// Live records, ordered by sequence index.
    pub fn records(&self) -> &[ProxyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of evicted proxies still tracked by the pool.
    pub fn evicted(&self) -> usize {
        self.evicted
    }

    pub fn get(&self, address: &ProxyAddress) -> Option<&ProxyRecord> {
        self.records.iter().find(|r| &r.address == address)
    }
}

/// What a call to [`ProxyPool::report`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The counter was incremented.
    Recorded,
    /// The failure counter reached the threshold and this report retired the proxy.
    Evicted,
    /// The proxy is no longer live; nothing was written.
    Unknown,
}

/// Result of [`ProxyPool::update_proxies`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshSummary {
    pub added: usize,
    pub removed: usize,
    pub retained: usize,
    /// Retained proxies whose credentials changed upstream.
    pub updated: usize,
}

/// A pool of proxies shared through a state store.
pub struct ProxyPool {
    store: Store,
    source: Arc<dyn ProxySource>,
    /// Configuration for the pool.
    pub config: ProxyGuardConfig,
}

impl ProxyPool {
    /// Attach to the pool kept in `store`, loading new proxies from `source`.
    ///
    /// Fails if the store cannot be reached. Does not load any proxies.
    pub async fn new(
        config: ProxyGuardConfig,
        store: Arc<dyn StateStore>,
        source: Arc<dyn ProxySource>,
    ) -> Result<Arc<Self>> {
        let store = Store::new(store, config.store_timeout, config.key_prefix.clone());
        store.ping().await?;

        let live = store.set_len(&store.keys().live()).await?;
        if live == 0 {
            info!("No proxies found in store. Run initialize_proxies() to load them.");
        } else {
            info!("Attached to proxy pool {:?} with {} live proxies", config.key_prefix, live);
        }

        Ok(Arc::new(Self {
            store,
            source,
            config,
        }))
    }

    /// Attach to a Redis-backed pool fed by Webshare, both taken from `config`.
    #[cfg(feature = "redis")]
    pub async fn connect(config: ProxyGuardConfig) -> Result<Arc<Self>> {
        let url = config.store_url();
        let store = time::timeout(
            config.store_timeout,
            crate::store::redis::RedisStore::connect(&url),
        )
        .await
        .map_err(|_| Error::StoreUnavailable(format!("connect timed out after {:?}", config.store_timeout)))??;
        let source = crate::vendor::WebshareClient::new(&config)?;
        Self::new(config, Arc::new(store), Arc::new(source)).await
    }

    /// Failure threshold, never below 1 even if `config` was edited directly.
    fn fail_count(&self) -> u64 {
        self.config.fail_count.max(1)
    }

    /// Fetch from the source, keeping the first occurrence of each address.
    async fn fetch(&self, amount: usize) -> Result<Vec<ProxyHandle>> {
        let fetched = self.source.fetch_proxies(amount).await?;
        let mut seen = HashSet::new();
        Ok(fetched
            .into_iter()
            .filter(|p| seen.insert(p.address.clone()))
            .collect())
    }

    /// Reserve `count` consecutive sequence indices and return the first.
    async fn reserve_sequence(&self, count: usize) -> Result<u64> {
        let end = self
            .store
            .incr(&self.store.keys().sequence(), count as i64)
            .await?;
        Ok((end - count as i64).max(0) as u64)
    }

    fn push_insert(&self, tx: &mut Transaction, handle: &ProxyHandle, sequence_index: u64) -> Result<()> {
        let keys = self.store.keys();
        let address = &handle.address;
        let meta = serde_json::to_string(&RecordMeta::new(handle, sequence_index))
            .map_err(|e| Error::InvalidProxy(format!("{}: {}", address, e)))?;

        tx.push_guard(Guard::absent(keys.meta(address)));
        tx.push_op(Op::set(keys.meta(address), meta));
        tx.push_op(Op::set(keys.success(address), "0"));
        tx.push_op(Op::set(keys.failure(address), "0"));
        tx.push_op(Op::delete(keys.last_used(address)));
        tx.push_op(Op::delete(keys.cooldown(address)));
        tx.push_op(Op::set_add(keys.live(), address.to_string()));
        Ok(())
    }

    fn push_removal(&self, tx: &mut Transaction, address: &str) {
        let keys = self.store.keys();
        for key in keys.record_keys(address) {
            tx.push_op(Op::delete(key));
        }
        tx.push_op(Op::set_remove(keys.live(), address));
        tx.push_op(Op::set_remove(keys.evicted(), address));
    }

    /// Fetch `amount` proxies and add the ones the pool does not know yet.
    ///
    /// Known addresses, live or evicted, keep their counters. Returns how many records were
    /// added. Safe to run repeatedly and from several clients at once.
    pub async fn initialize_proxies(&self, amount: usize) -> Result<usize> {
        let fetched = self.fetch(amount).await?;
        let meta_keys: Vec<String> = fetched
            .iter()
            .map(|p| self.store.keys().meta(&p.address))
            .collect();

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let existing = self.store.get_many(&meta_keys).await?;
            let fresh: Vec<&ProxyHandle> = fetched
                .iter()
                .zip(existing)
                .filter(|(_, meta)| meta.is_none())
                .map(|(p, _)| p)
                .collect();

            if fresh.is_empty() {
                info!("All {} fetched proxies are already in the pool", fetched.len());
                return Ok(0);
            }

            let first = self.reserve_sequence(fresh.len()).await?;
            let mut tx = Transaction::new();
            for (offset, handle) in fresh.iter().enumerate() {
                self.push_insert(&mut tx, handle, first + offset as u64)?;
            }

            match self.store.commit(&tx).await? {
                Commit::Applied(_) => {
                    info!(
                        "Loaded {} new proxies ({} already known)",
                        fresh.len(),
                        fetched.len() - fresh.len()
                    );
                    return Ok(fresh.len());
                }
                Commit::Aborted => debug!("Proxy load raced another writer, re-planning"),
            }
        }

        Err(Error::Contention {
            attempts: MAX_COMMIT_ATTEMPTS,
        })
    }

    /// Re-fetch from the source and reconcile the pool with it.
    ///
    /// New addresses are added with zeroed counters, addresses the source no longer returns
    /// are deleted whether live or evicted, and retained proxies keep their counters. A retained
    /// proxy whose credentials changed upstream gets the new ones.
    pub async fn update_proxies(&self) -> Result<RefreshSummary> {
        let fetched = self.fetch(self.config.amount).await?;
        let wanted: HashSet<String> = fetched.iter().map(|p| p.address.to_string()).collect();
        let keys = self.store.keys();

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let mut known: HashSet<String> =
                self.store.set_members(&keys.live()).await?.into_iter().collect();
            known.extend(self.store.set_members(&keys.evicted()).await?);

            let removed: Vec<&String> = known.iter().filter(|a| !wanted.contains(*a)).collect();
            let added: Vec<&ProxyHandle> = fetched
                .iter()
                .filter(|p| !known.contains(&p.address.to_string()))
                .collect();
            let rotated = self.rotated_credentials(&fetched, &known).await?;
            let summary = RefreshSummary {
                added: added.len(),
                removed: removed.len(),
                retained: known.len() - removed.len(),
                updated: rotated.len(),
            };

            if added.is_empty() && removed.is_empty() && rotated.is_empty() {
                info!("Proxy pool already up to date ({} proxies)", summary.retained);
                return Ok(summary);
            }

            let mut tx = Transaction::new();
            for (key, stored, meta) in rotated {
                // counters and sequence index stay, only the login changes
                tx.push_guard(Guard::Equals {
                    key: key.clone(),
                    value: stored,
                });
                tx.push_op(Op::set(key, meta));
            }
            if !added.is_empty() {
                let first = self.reserve_sequence(added.len()).await?;
                for (offset, handle) in added.iter().enumerate() {
                    self.push_insert(&mut tx, handle, first + offset as u64)?;
                }
            }
            for address in &removed {
                self.push_removal(&mut tx, address);
            }

            match self.store.commit(&tx).await? {
                Commit::Applied(_) => {
                    info!(
                        "Refreshed proxy pool: {} added, {} removed, {} retained ({} with new credentials)",
                        summary.added, summary.removed, summary.retained, summary.updated
                    );
                    return Ok(summary);
                }
                Commit::Aborted => debug!("Proxy refresh raced another writer, re-planning"),
            }
        }

        Err(Error::Contention {
            attempts: MAX_COMMIT_ATTEMPTS,
        })
    }

    /// Known proxies whose fetched credentials differ from the stored ones, as
    /// `(meta key, stored meta, replacement meta)`.
    async fn rotated_credentials(
        &self,
        fetched: &[ProxyHandle],
        known: &HashSet<String>,
    ) -> Result<Vec<(String, String, String)>> {
        let retained: Vec<&ProxyHandle> = fetched
            .iter()
            .filter(|p| known.contains(&p.address.to_string()))
            .collect();
        let meta_keys: Vec<String> = retained
            .iter()
            .map(|p| self.store.keys().meta(&p.address))
            .collect();
        let stored = self.store.get_many(&meta_keys).await?;

        let mut rotated = Vec::new();
        for ((handle, key), raw) in retained.into_iter().zip(meta_keys).zip(stored) {
            let Some(raw) = raw else { continue };
            let current: RecordMeta = match serde_json::from_str(&raw) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("Leaving unreadable record {} alone: {}", handle.address, e);
                    continue;
                }
            };
            let wanted = RecordMeta::new(handle, current.sequence_index);
            if wanted != current {
                debug!("Credentials of {} changed upstream", handle.address);
                let meta = serde_json::to_string(&wanted)
                    .map_err(|e| Error::InvalidProxy(format!("{}: {}", handle.address, e)))?;
                rotated.push((key, raw, meta));
            }
        }
        Ok(rotated)
    }

    fn unknown(&self, address: &ProxyAddress) -> ReportOutcome {
        debug!("Ignoring report for {}, which is no longer in the pool", address);
        ReportOutcome::Unknown
    }

    /// Record the outcome of a request made through `address`.
    ///
    /// The failure that brings the counter to `fail_count` retires the proxy in the same
    /// transaction. Reports for proxies that are gone are ignored.
    pub async fn report(&self, address: &ProxyAddress, success: bool) -> Result<ReportOutcome> {
        let keys = self.store.keys();
        let in_pool = Guard::member(keys.live(), address.to_string());

        if success {
            let tx = Transaction::new()
                .guard(in_pool)
                .op(Op::incr(keys.success(address), 1));
            return Ok(match self.store.commit(&tx).await? {
                Commit::Applied(_) => ReportOutcome::Recorded,
                Commit::Aborted => self.unknown(address),
            });
        }

        let failure = keys.failure(address);
        let fail_count = self.fail_count();
        let last_allowed = i64::try_from(fail_count).unwrap_or(i64::MAX) - 1;

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let below = Transaction::new()
                .guard(in_pool.clone())
                .guard(Guard::CounterBelow {
                    key: failure.clone(),
                    limit: last_allowed,
                })
                .op(Op::incr(failure.clone(), 1));
            if let Commit::Applied(counts) = self.store.commit(&below).await? {
                debug!("Proxy {} failure count now {:?}", address, counts.first());
                return Ok(ReportOutcome::Recorded);
            }

            let crossing = Transaction::new()
                .guard(in_pool.clone())
                .guard(Guard::CounterAtLeast {
                    key: failure.clone(),
                    value: last_allowed,
                })
                .op(Op::incr(failure.clone(), 1))
                .op(Op::set_remove(keys.live(), address.to_string()))
                .op(Op::set_add(keys.evicted(), address.to_string()))
                .op(Op::delete(keys.cooldown(address)));
            if let Commit::Applied(counts) = self.store.commit(&crossing).await? {
                warn!(
                    "Evicted proxy {} after {} failures",
                    address,
                    counts.first().copied().unwrap_or(last_allowed + 1)
                );
                return Ok(ReportOutcome::Evicted);
            }

            if !self.store.is_member(&keys.live(), &address.to_string()).await? {
                return Ok(self.unknown(address));
            }
            debug!("Failure report for {} raced another reporter, re-planning", address);
        }

        Err(Error::Contention {
            attempts: MAX_COMMIT_ATTEMPTS,
        })
    }

    /// Record the outcome of a request made through `proxy`.
    pub async fn report_proxy(&self, proxy: &ProxyHandle, success: bool) -> Result<ReportOutcome> {
        self.report(&proxy.address, success).await
    }

    fn decode_record(&self, fields: &[Option<String>]) -> Result<Option<ProxyRecord>> {
        let Some(meta) = fields[0].as_deref() else {
            return Ok(None);
        };
        let meta: RecordMeta = serde_json::from_str(meta)
            .map_err(|e| Error::StoreUnavailable(format!("unreadable record meta: {}", e)))?;

        let credentials = match (meta.username, meta.password) {
            (Some(username), password) => Some(Credentials::new(username, password.unwrap_or_default())),
            (None, _) => None,
        };
        let mut record = ProxyRecord::new(
            ProxyAddress::new(meta.host, meta.port),
            credentials,
            meta.sequence_index,
        );
        record.success_count = parse_counter(fields[1].as_deref())?;
        record.failure_count = parse_counter(fields[2].as_deref())?;
        record.last_used_at = parse_timestamp(fields[3].as_deref())?;
        record.cooldown_until = parse_timestamp(fields[4].as_deref())?;
        Ok(Some(record))
    }

    /// Read every live record.
    ///
    /// Records deleted or retired while the snapshot is taken are left out.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let keys = self.store.keys();
        let members = self.store.set_members(&keys.live()).await?;
        let evicted = self.store.set_len(&keys.evicted()).await?;

        let record_keys: Vec<String> = members
            .iter()
            .flat_map(|m| keys.record_keys(m.as_str()))
            .collect();
        let values = self.store.get_many(&record_keys).await?;
        let fail_count = self.fail_count();

        let mut records = Vec::with_capacity(members.len());
        for (member, fields) in members.iter().zip(values.chunks(RECORD_FIELDS)) {
            match self.decode_record(fields) {
                Ok(Some(record)) if record.failure_count < fail_count => {
                    records.push(record)
                }
                Ok(Some(_)) => debug!("Skipping {}, retired while reading", member),
                Ok(None) => debug!("Skipping {}, removed while reading", member),
                Err(e) => warn!("Skipping unreadable record {}: {}", member, e),
            }
        }
        let mut snapshot = Snapshot::from_records(records);
        snapshot.evicted = evicted;
        Ok(snapshot)
    }

    /// Pick a live proxy under `strategy`.
    ///
    /// For SMART, a non-zero `cooldown` keeps the chosen proxy out of SMART selection for
    /// that long. RANDOM and SEQUENTIAL ignore it.
    pub async fn get_proxy(&self, strategy: Strategy, cooldown: Option<Duration>) -> Result<ProxyHandle> {
        let snapshot = self.snapshot().await?;
        if snapshot.is_empty() {
            return Err(Error::PoolExhausted);
        }

        let keys = self.store.keys();
        let mut ctx = SelectionContext::at(SystemTime::now());
        if strategy == Strategy::Sequential {
            let ticket = self.store.incr(&keys.cursor(), 1).await?;
            ctx = ctx.with_cursor((ticket - 1).max(0) as u64);
        }

        let order = {
            let mut rng = rand::rng();
            strategy::candidates(&snapshot, strategy, &ctx, &mut rng)?
        };
        let cooldown = cooldown
            .filter(|c| strategy == Strategy::Smart && !c.is_zero())
            .map(|c| c.min(MAX_COOLDOWN));

        for record in order {
            let address = &record.address;
            let now = SystemTime::now();
            let mut tx = Transaction::new()
                .guard(Guard::member(keys.live(), address.to_string()))
                .op(Op::set(keys.last_used(address), to_millis(now).to_string()));

            if strategy == Strategy::Smart {
                // someone else may have claimed it since the snapshot
                tx.push_guard(Guard::unchanged(
                    keys.cooldown(address),
                    record.cooldown_until.map(|t| to_millis(t).to_string()),
                ));
                if let Some(cooldown) = cooldown {
                    tx.push_op(Op::set_with_ttl(
                        keys.cooldown(address),
                        to_millis(now.checked_add(cooldown).unwrap_or(now)).to_string(),
                        cooldown,
                    ));
                }
            }

            match self.store.commit(&tx).await? {
                Commit::Applied(_) => {
                    debug!("Selected proxy {} ({})", address, strategy);
                    return Ok(record.handle());
                }
                Commit::Aborted => debug!("Proxy {} changed since snapshot, trying next", address),
            }
        }

        Err(Error::PoolExhausted)
    }

    /// Get statistics about the proxy pool.
    pub async fn get_stats(&self) -> Result<PoolStats> {
        Ok(compute_stats(&self.snapshot().await?))
    }

    /// Delete every key belonging to this pool. Returns how many keys were removed.
    pub async fn purge(&self) -> Result<usize> {
        let prefix = format!("{}:", self.store.keys().prefix());
        let doomed = self.store.keys_with_prefix(&prefix).await?;

        let mut tx = Transaction::new();
        for key in &doomed {
            tx.push_op(Op::delete(key.clone()));
        }
        if !tx.is_empty() {
            self.store.commit(&tx).await?;
        }

        warn!("Purged {} keys of proxy pool {:?}", doomed.len(), self.config.key_prefix);
        Ok(doomed.len())
    }

    /// Run [`update_proxies`](Self::update_proxies) every `interval` until the handle is
    /// aborted. Failures are logged and the loop carries on.
    pub fn spawn_refresh_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                time::sleep(interval).await;
                match pool.update_proxies().await {
                    Ok(summary) => info!(
                        "Scheduled refresh: {} added, {} removed",
                        summary.added, summary.removed
                    ),
                    Err(e) => warn!("Scheduled proxy refresh failed: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::vendor::StaticSource;

    async fn pool_with(proxies: &[&str], fail_count: u64) -> (Arc<ProxyPool>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(StaticSource::new(
            proxies.iter().map(|p| p.parse().unwrap()).collect(),
        ));
        let config = ProxyGuardConfig::builder().fail_count(fail_count).build();
        let pool = ProxyPool::new(config, store.clone(), source).await.unwrap();
        (pool, store)
    }

    #[tokio::test]
    async fn test_initialize_writes_complete_records() {
        let (pool, store) = pool_with(&["u:p@10.0.0.1:1", "10.0.0.2:2"], 3).await;
        assert_eq!(pool.initialize_proxies(10).await.unwrap(), 2);

        let raw = store.get("proxyguard:proxy:10.0.0.1:1:meta").await.unwrap().unwrap();
        let meta: RecordMeta = serde_json::from_str(&raw).unwrap();
        assert_eq!(meta.sequence_index, 0);
        assert_eq!(meta.username.as_deref(), Some("u"));
        assert_eq!(
            store.get("proxyguard:proxy:10.0.0.2:2:failure").await.unwrap().as_deref(),
            Some("0")
        );

        let snapshot = pool.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.records()[0].credentials,
            Some(Credentials::new("u", "p"))
        );
        assert_eq!(snapshot.records()[1].sequence_index, 1);
    }

    #[tokio::test]
    async fn test_snapshot_skips_half_deleted_and_corrupt_records() {
        let (pool, store) = pool_with(&["10.0.0.1:1", "10.0.0.2:2", "10.0.0.3:3"], 3).await;
        pool.initialize_proxies(10).await.unwrap();

        // meta gone but membership left behind
        store.delete("proxyguard:proxy:10.0.0.2:2:meta").await.unwrap();
        store.set("proxyguard:proxy:10.0.0.3:3:success", "many").await.unwrap();

        let snapshot = pool.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.records()[0].address.port, 1);
    }

    #[tokio::test]
    async fn test_selection_records_last_use() {
        let (pool, _store) = pool_with(&["10.0.0.1:1"], 3).await;
        pool.initialize_proxies(10).await.unwrap();

        let before = SystemTime::now() - Duration::from_secs(1);
        pool.get_proxy(Strategy::Random, None).await.unwrap();

        let snapshot = pool.snapshot().await.unwrap();
        let used = snapshot.records()[0].last_used_at.unwrap();
        assert!(used >= before);
        // RANDOM never writes a cooldown
        assert!(snapshot.records()[0].cooldown_until.is_none());
    }

    #[tokio::test]
    async fn test_fail_count_of_one_evicts_on_first_failure() {
        let (pool, _store) = pool_with(&["10.0.0.1:1"], 1).await;
        pool.initialize_proxies(10).await.unwrap();
        let addr = ProxyAddress::new("10.0.0.1", 1);

        assert_eq!(pool.report(&addr, false).await.unwrap(), ReportOutcome::Evicted);
        assert_eq!(pool.report(&addr, false).await.unwrap(), ReportOutcome::Unknown);
        assert!(pool.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lowered_threshold_still_evicts() {
        let (pool, store) = pool_with(&["10.0.0.1:1"], 3).await;
        pool.initialize_proxies(10).await.unwrap();
        // counter left over from a run with a higher threshold
        store.set("proxyguard:proxy:10.0.0.1:1:failure", "7").await.unwrap();

        let outcome = pool.report(&ProxyAddress::new("10.0.0.1", 1), false).await.unwrap();
        assert_eq!(outcome, ReportOutcome::Evicted);
    }

    #[tokio::test]
    async fn test_huge_cooldown_is_capped() {
        let (pool, _store) = pool_with(&["10.0.0.1:1"], 3).await;
        pool.initialize_proxies(10).await.unwrap();

        let forever = Some(Duration::from_secs(u64::MAX));
        pool.get_proxy(Strategy::Smart, forever).await.unwrap();

        let record = pool.snapshot().await.unwrap().records()[0].clone();
        let until = record.cooldown_until.unwrap();
        assert!(until <= SystemTime::now() + MAX_COOLDOWN);
        assert!(matches!(
            pool.get_proxy(Strategy::Smart, forever).await,
            Err(Error::PoolExhausted)
        ));
    }

    #[tokio::test]
    async fn test_zero_fail_count_in_config_acts_as_one() {
        let (pool, store) = pool_with(&["10.0.0.1:1"], 3).await;
        pool.initialize_proxies(10).await.unwrap();

        let mut config = pool.config.clone();
        config.fail_count = 0;
        let pool = ProxyPool::new(config, store, Arc::new(StaticSource::default()))
            .await
            .unwrap();

        assert_eq!(pool.snapshot().await.unwrap().len(), 1);
        let addr = ProxyAddress::new("10.0.0.1", 1);
        assert_eq!(pool.report(&addr, true).await.unwrap(), ReportOutcome::Recorded);
        assert_eq!(pool.report(&addr, false).await.unwrap(), ReportOutcome::Evicted);
        assert!(pool.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_removes_everything_under_prefix() {
        let (pool, store) = pool_with(&["10.0.0.1:1", "10.0.0.2:2"], 3).await;
        pool.initialize_proxies(10).await.unwrap();
        store.set("unrelated", "keep").await.unwrap();

        assert!(pool.purge().await.unwrap() > 0);
        assert!(store.keys_with_prefix("proxyguard:").await.unwrap().is_empty());
        assert_eq!(store.get("unrelated").await.unwrap().as_deref(), Some("keep"));
        assert_eq!(pool.get_stats().await.unwrap().total_proxies, 0);
    }
}
