use async_trait::async_trait;
use reqwest_proxy_guard::{
    Error, MemoryStore, ProxyAddress, ProxyGuardConfig, ProxyHandle, ProxyPool, ProxySource,
    ReportOutcome, StateStore, StaticSource, Strategy,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn handles(addresses: &[&str]) -> Vec<ProxyHandle> {
    addresses.iter().map(|a| a.parse().unwrap()).collect()
}

fn addr(s: &str) -> ProxyAddress {
    s.parse().unwrap()
}

/// Source that can be switched into failure mode.
struct FlakySource {
    inner: StaticSource,
    down: AtomicBool,
}

#[async_trait]
impl ProxySource for FlakySource {
    async fn fetch_proxies(&self, amount: usize) -> reqwest_proxy_guard::Result<Vec<ProxyHandle>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::UpstreamFetch("vendor returned 502".to_string()));
        }
        self.inner.fetch_proxies(amount).await
    }
}

struct Harness {
    pool: Arc<ProxyPool>,
    source: Arc<FlakySource>,
    store: Arc<MemoryStore>,
}

async fn harness(addresses: &[&str], fail_count: u64) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FlakySource {
        inner: StaticSource::new(handles(addresses)),
        down: AtomicBool::new(false),
    });
    let config = ProxyGuardConfig::builder()
        .fail_count(fail_count)
        .amount(100)
        .build();
    let pool = ProxyPool::new(config, store.clone(), source.clone())
        .await
        .unwrap();
    Harness {
        pool,
        source,
        store,
    }
}

/// A second client of the same pool, as another process would be.
async fn second_client(h: &Harness, fail_count: u64) -> Arc<ProxyPool> {
    let config = ProxyGuardConfig::builder().fail_count(fail_count).build();
    ProxyPool::new(config, h.store.clone(), h.source.clone())
        .await
        .unwrap()
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let h = harness(&["10.0.0.1:1", "10.0.0.2:2", "10.0.0.3:3"], 3).await;

    assert_eq!(h.pool.initialize_proxies(100).await.unwrap(), 3);
    h.pool.report(&addr("10.0.0.1:1"), true).await.unwrap();
    h.pool.report(&addr("10.0.0.2:2"), false).await.unwrap();
    let before = h.pool.snapshot().await.unwrap();

    assert_eq!(h.pool.initialize_proxies(100).await.unwrap(), 0);
    let after = h.pool.snapshot().await.unwrap();

    assert_eq!(after.len(), 3);
    for record in before.records() {
        let again = after.get(&record.address).unwrap();
        assert_eq!(again.success_count, record.success_count);
        assert_eq!(again.failure_count, record.failure_count);
        assert_eq!(again.sequence_index, record.sequence_index);
    }
}

#[tokio::test]
async fn initialize_collapses_duplicate_addresses() {
    let h = harness(&["10.0.0.1:1", "u:p@10.0.0.1:1", "10.0.0.2:2"], 3).await;
    assert_eq!(h.pool.initialize_proxies(100).await.unwrap(), 2);
    assert_eq!(h.pool.snapshot().await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_initialize_adds_each_address_once() {
    let h = harness(&["10.0.0.1:1", "10.0.0.2:2", "10.0.0.3:3", "10.0.0.4:4"], 3).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pool = second_client(&h, 3).await;
        tasks.push(tokio::spawn(async move { pool.initialize_proxies(100).await }));
    }
    let mut added = 0;
    for task in tasks {
        added += task.await.unwrap().unwrap();
    }

    assert_eq!(added, 4);
    let snapshot = h.pool.snapshot().await.unwrap();
    let indices: HashSet<u64> = snapshot.records().iter().map(|r| r.sequence_index).collect();
    assert_eq!(indices.len(), 4);
}

#[tokio::test]
async fn upstream_failure_leaves_pool_untouched() {
    let h = harness(&["10.0.0.1:1"], 3).await;
    h.pool.initialize_proxies(100).await.unwrap();
    h.pool.report(&addr("10.0.0.1:1"), true).await.unwrap();

    h.source.down.store(true, Ordering::SeqCst);
    assert!(matches!(
        h.pool.initialize_proxies(100).await,
        Err(Error::UpstreamFetch(_))
    ));
    assert!(matches!(
        h.pool.update_proxies().await,
        Err(Error::UpstreamFetch(_))
    ));

    let snapshot = h.pool.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.records()[0].success_count, 1);
}

#[tokio::test]
async fn update_adds_new_removes_missing_and_keeps_counters() {
    let h = harness(&["10.0.0.1:1", "10.0.0.2:2"], 3).await;
    h.pool.initialize_proxies(100).await.unwrap();

    let kept = addr("10.0.0.2:2");
    h.pool.report(&kept, true).await.unwrap();
    h.pool.report(&kept, true).await.unwrap();
    h.pool.report(&kept, false).await.unwrap();
    let kept_before = h.pool.snapshot().await.unwrap().get(&kept).cloned().unwrap();

    // vendor drops A and adds B
    h.source
        .inner
        .replace(handles(&["10.0.0.2:2", "10.0.0.3:3"]));
    let summary = h.pool.update_proxies().await.unwrap();
    assert_eq!((summary.added, summary.removed, summary.retained), (1, 1, 1));

    let snapshot = h.pool.snapshot().await.unwrap();
    assert!(snapshot.get(&addr("10.0.0.1:1")).is_none());

    let fresh = snapshot.get(&addr("10.0.0.3:3")).unwrap();
    assert_eq!((fresh.success_count, fresh.failure_count), (0, 0));
    assert!(fresh.sequence_index > kept_before.sequence_index);

    let kept_after = snapshot.get(&kept).unwrap();
    assert_eq!(kept_after.success_count, kept_before.success_count);
    assert_eq!(kept_after.failure_count, kept_before.failure_count);
    assert_eq!(kept_after.sequence_index, kept_before.sequence_index);

    // nothing left behind for the removed proxy
    assert!(h
        .store
        .keys_with_prefix("proxyguard:proxy:10.0.0.1:1:")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn refresh_picks_up_rotated_credentials() {
    let h = harness(&["u:old@10.0.0.1:1", "10.0.0.2:2"], 3).await;
    h.pool.initialize_proxies(100).await.unwrap();
    let target = addr("10.0.0.1:1");
    h.pool.report(&target, true).await.unwrap();
    h.pool.report(&target, false).await.unwrap();
    let before = h.pool.snapshot().await.unwrap().get(&target).cloned().unwrap();

    h.source
        .inner
        .replace(handles(&["u:new@10.0.0.1:1", "10.0.0.2:2"]));
    let summary = h.pool.update_proxies().await.unwrap();
    assert_eq!(
        (summary.added, summary.removed, summary.retained, summary.updated),
        (0, 0, 2, 1)
    );

    let after = h.pool.snapshot().await.unwrap().get(&target).cloned().unwrap();
    assert_eq!(after.credentials.as_ref().unwrap().password, "new");
    assert_eq!(after.sequence_index, before.sequence_index);
    assert_eq!(
        (after.success_count, after.failure_count),
        (before.success_count, before.failure_count)
    );

    let picked = h.pool.get_proxy(Strategy::Sequential, None).await.unwrap();
    assert_eq!(picked.address, target);
    assert_eq!(picked.credentials.unwrap().password, "new");

    // nothing changed, nothing written
    assert_eq!(h.pool.update_proxies().await.unwrap().updated, 0);
}

#[tokio::test]
async fn eviction_survives_refresh_until_vendor_drops_it() {
    let h = harness(&["10.0.0.1:1", "10.0.0.2:2"], 2).await;
    h.pool.initialize_proxies(100).await.unwrap();

    let bad = addr("10.0.0.1:1");
    h.pool.report(&bad, false).await.unwrap();
    assert_eq!(h.pool.report(&bad, false).await.unwrap(), ReportOutcome::Evicted);

    // still returned by the vendor: stays evicted
    let summary = h.pool.update_proxies().await.unwrap();
    assert_eq!((summary.added, summary.removed), (0, 0));
    assert_eq!(h.pool.initialize_proxies(100).await.unwrap(), 0);
    let stats = h.pool.get_stats().await.unwrap();
    assert_eq!((stats.total_proxies, stats.evicted_proxies), (1, 1));

    // dropped by the vendor: forgotten, so it may come back fresh later
    h.source.inner.replace(handles(&["10.0.0.2:2"]));
    let summary = h.pool.update_proxies().await.unwrap();
    assert_eq!(summary.removed, 1);
    assert_eq!(h.pool.get_stats().await.unwrap().evicted_proxies, 0);

    h.source
        .inner
        .replace(handles(&["10.0.0.1:1", "10.0.0.2:2"]));
    assert_eq!(h.pool.update_proxies().await.unwrap().added, 1);
    let back = h.pool.snapshot().await.unwrap().get(&bad).cloned().unwrap();
    assert_eq!(back.failure_count, 0);
}

#[tokio::test]
async fn concurrent_failures_evict_exactly_once() {
    let h = harness(&["10.0.0.1:1", "10.0.0.2:2"], 3).await;
    h.pool.initialize_proxies(100).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..40 {
        let pool = second_client(&h, 3).await;
        tasks.push(tokio::spawn(async move {
            pool.report(&addr("10.0.0.1:1"), false).await
        }));
    }

    let mut recorded = 0;
    let mut evicted = 0;
    let mut unknown = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            ReportOutcome::Recorded => recorded += 1,
            ReportOutcome::Evicted => evicted += 1,
            ReportOutcome::Unknown => unknown += 1,
        }
    }

    assert_eq!(evicted, 1);
    assert_eq!(recorded, 2);
    assert_eq!(unknown, 37);

    // counters stop at the threshold
    let stored = h
        .store
        .get("proxyguard:proxy:10.0.0.1:1:failure")
        .await
        .unwrap();
    assert_eq!(stored.as_deref(), Some("3"));
    let stats = h.pool.get_stats().await.unwrap();
    assert_eq!((stats.total_proxies, stats.evicted_proxies), (1, 1));
}

#[tokio::test]
async fn report_on_unknown_proxy_is_a_no_op() {
    let h = harness(&["10.0.0.1:1"], 3).await;
    h.pool.initialize_proxies(100).await.unwrap();

    let stranger = addr("192.168.1.1:8080");
    assert_eq!(h.pool.report(&stranger, true).await.unwrap(), ReportOutcome::Unknown);
    assert_eq!(h.pool.report(&stranger, false).await.unwrap(), ReportOutcome::Unknown);
    assert!(h
        .store
        .keys_with_prefix("proxyguard:proxy:192.168.1.1:8080:")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn report_racing_removal_is_tolerated() {
    let h = harness(&["10.0.0.1:1", "10.0.0.2:2"], 3).await;
    h.pool.initialize_proxies(100).await.unwrap();

    let handle = h.pool.get_proxy(Strategy::Sequential, None).await.unwrap();
    assert_eq!(handle.address, addr("10.0.0.1:1"));

    h.source.inner.replace(handles(&["10.0.0.2:2"]));
    h.pool.update_proxies().await.unwrap();

    assert_eq!(
        h.pool.report_proxy(&handle, false).await.unwrap(),
        ReportOutcome::Unknown
    );
}

#[tokio::test]
async fn sequential_visits_each_proxy_once_per_round() {
    let addresses = ["10.0.0.1:1", "10.0.0.2:2", "10.0.0.3:3", "10.0.0.4:4"];
    let h = harness(&addresses, 3).await;
    h.pool.initialize_proxies(100).await.unwrap();

    let mut picks = Vec::new();
    for _ in 0..addresses.len() * 2 {
        let handle = h.pool.get_proxy(Strategy::Sequential, None).await.unwrap();
        picks.push(handle.address.to_string());
    }

    let expected: Vec<String> = addresses
        .iter()
        .chain(addresses.iter())
        .map(|a| a.to_string())
        .collect();
    assert_eq!(picks, expected);
}

#[tokio::test]
async fn sequential_is_fair_across_clients() {
    let h = harness(&["10.0.0.1:1", "10.0.0.2:2", "10.0.0.3:3"], 3).await;
    h.pool.initialize_proxies(100).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..30 {
        let pool = second_client(&h, 3).await;
        tasks.push(tokio::spawn(async move {
            pool.get_proxy(Strategy::Sequential, None).await
        }));
    }

    let mut counts = std::collections::HashMap::new();
    for task in tasks {
        let handle = task.await.unwrap().unwrap();
        *counts.entry(handle.address.to_string()).or_insert(0) += 1;
    }
    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|&n| n == 10), "{counts:?}");
}

#[tokio::test]
async fn sequential_skips_evicted_proxy() {
    let h = harness(&["10.0.0.1:1", "10.0.0.2:2", "10.0.0.3:3"], 1).await;
    h.pool.initialize_proxies(100).await.unwrap();

    assert_eq!(
        h.pool.get_proxy(Strategy::Sequential, None).await.unwrap().address,
        addr("10.0.0.1:1")
    );
    h.pool.report(&addr("10.0.0.2:2"), false).await.unwrap();

    let next = h.pool.get_proxy(Strategy::Sequential, None).await.unwrap();
    assert_ne!(next.address, addr("10.0.0.2:2"));
}

#[tokio::test]
async fn smart_follows_success_rate_and_evictions() {
    let h = harness(&["10.0.0.1:1", "10.0.0.2:2"], 3).await;
    h.pool.initialize_proxies(100).await.unwrap();

    let p1 = addr("10.0.0.1:1");
    let p2 = addr("10.0.0.2:2");
    for success in [true, true, true, false] {
        h.pool.report(&p1, success).await.unwrap();
    }

    // untried P2 scores 1.0 and beats P1's 0.75
    let first = h.pool.get_proxy(Strategy::Smart, None).await.unwrap();
    assert_eq!(first.address, p2);

    let outcomes = [
        h.pool.report(&p2, false).await.unwrap(),
        h.pool.report(&p2, false).await.unwrap(),
        h.pool.report(&p2, false).await.unwrap(),
    ];
    assert_eq!(
        outcomes,
        [
            ReportOutcome::Recorded,
            ReportOutcome::Recorded,
            ReportOutcome::Evicted
        ]
    );

    for _ in 0..3 {
        let picked = h.pool.get_proxy(Strategy::Smart, None).await.unwrap();
        assert_eq!(picked.address, p1);
    }
    let snapshot = h.pool.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.records()[0].success_rate(), 0.75);
}

#[tokio::test]
async fn smart_cooldown_excludes_recent_pick() {
    let h = harness(&["10.0.0.1:1", "10.0.0.2:2"], 3).await;
    h.pool.initialize_proxies(100).await.unwrap();
    let cooldown = Some(Duration::from_millis(300));

    let first = h.pool.get_proxy(Strategy::Smart, cooldown).await.unwrap();
    let second = h.pool.get_proxy(Strategy::Smart, cooldown).await.unwrap();
    assert_ne!(first.address, second.address);

    // both cooling down
    assert!(matches!(
        h.pool.get_proxy(Strategy::Smart, cooldown).await,
        Err(Error::PoolExhausted)
    ));
    // other strategies are not throttled
    assert!(h.pool.get_proxy(Strategy::Random, cooldown).await.is_ok());
    assert!(h.pool.get_proxy(Strategy::Sequential, cooldown).await.is_ok());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(h.pool.get_proxy(Strategy::Smart, cooldown).await.is_ok());
}

#[tokio::test]
async fn concurrent_smart_callers_never_share_a_cooling_proxy() {
    let addresses = ["10.0.0.1:1", "10.0.0.2:2", "10.0.0.3:3", "10.0.0.4:4", "10.0.0.5:5"];
    let h = harness(&addresses, 3).await;
    h.pool.initialize_proxies(100).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..addresses.len() {
        let pool = second_client(&h, 3).await;
        tasks.push(tokio::spawn(async move {
            pool.get_proxy(Strategy::Smart, Some(Duration::from_secs(30)))
                .await
        }));
    }

    let mut picked = HashSet::new();
    for task in tasks {
        // a caller may lose every race, but never gets a duplicate
        if let Ok(handle) = task.await.unwrap() {
            assert!(picked.insert(handle.address.to_string()));
        }
    }
    assert!(!picked.is_empty());
}

#[tokio::test]
async fn empty_pool_reports_zero_stats_and_exhaustion() {
    let h = harness(&[], 3).await;

    let stats = h.pool.get_stats().await.unwrap();
    assert_eq!(stats.total_proxies, 0);
    assert_eq!(stats.overall_success_rate, 0.0);

    for strategy in [Strategy::Smart, Strategy::Random, Strategy::Sequential] {
        assert!(matches!(
            h.pool.get_proxy(strategy, None).await,
            Err(Error::PoolExhausted)
        ));
    }
}

#[tokio::test]
async fn stats_cover_live_proxies() {
    let h = harness(&["10.0.0.1:1", "10.0.0.2:2"], 3).await;
    h.pool.initialize_proxies(100).await.unwrap();

    h.pool.report(&addr("10.0.0.1:1"), true).await.unwrap();
    h.pool.report(&addr("10.0.0.1:1"), true).await.unwrap();
    h.pool.report(&addr("10.0.0.2:2"), true).await.unwrap();
    h.pool.report(&addr("10.0.0.2:2"), false).await.unwrap();

    let stats = h.pool.get_stats().await.unwrap();
    assert_eq!(stats.total_proxies, 2);
    assert_eq!(stats.total_successes, 3);
    assert_eq!(stats.total_failures, 1);
    assert_eq!(stats.overall_success_rate, 75.0);
}
