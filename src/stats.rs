//! Usage statistics for a pool snapshot.

use crate::pool::Snapshot;
use crate::proxy::ProxyAddress;

use serde::Serialize;

/// Counters for one live proxy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyStats {
    pub address: ProxyAddress,
    pub successes: u64,
    pub failures: u64,
    pub total: u64,
    /// Percentage, 0 when the proxy has not been used.
    pub success_rate: f64,
}

/// Pool-wide counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    /// Live proxies.
    pub total_proxies: usize,
    /// Proxies retired after reaching the failure threshold.
    pub evicted_proxies: usize,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Percentage over live proxies, 0 when nothing was reported.
    pub overall_success_rate: f64,
    pub proxies: Vec<ProxyStats>,
}

fn percentage(successes: u64, failures: u64) -> f64 {
    let total = successes + failures;
    if total == 0 {
        return 0.0;
    }
    let rate = successes as f64 / total as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

/// Summarize a snapshot.
pub fn compute_stats(snapshot: &Snapshot) -> PoolStats {
    let proxies: Vec<ProxyStats> = snapshot
        .records()
        .iter()
        .map(|r| ProxyStats {
            address: r.address.clone(),
            successes: r.success_count,
            failures: r.failure_count,
            total: r.total_attempts(),
            success_rate: percentage(r.success_count, r.failure_count),
        })
        .collect();

    let total_successes: u64 = proxies.iter().map(|p| p.successes).sum();
    let total_failures: u64 = proxies.iter().map(|p| p.failures).sum();

    PoolStats {
        total_proxies: proxies.len(),
        evicted_proxies: snapshot.evicted(),
        total_requests: total_successes + total_failures,
        total_successes,
        total_failures,
        overall_success_rate: percentage(total_successes, total_failures),
        proxies,
    }
}
