//! Proxy selection strategies.
//!
//! Selection is a pure function of a pool [`Snapshot`]: it orders the live records by
//! preference and the pool claims the first one it can. Nothing here touches the store,
//! so every strategy can be tested against a hand-built snapshot.

use crate::error::{Error, Result};
use crate::pool::Snapshot;
use crate::proxy::ProxyRecord;

use rand::seq::SliceRandom;
use rand::Rng;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Policy deciding which live proxy serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Strategy {
    /// Highest success rate first, skipping proxies that are cooling down.
    #[default]
    Smart,
    /// Uniformly random.
    Random,
    /// Round-robin in load order, shared across every client of the pool.
    Sequential,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Smart => "smart",
            Self::Random => "random",
            Self::Sequential => "sequential",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "smart" => Ok(Self::Smart),
            "random" => Ok(Self::Random),
            "sequential" | "round_robin" | "round-robin" | "roundrobin" => Ok(Self::Sequential),
            other => Err(format!("unknown strategy {:?}", other)),
        }
    }
}

/// Inputs to a selection besides the snapshot itself.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext {
    /// Reference time for cooldown checks.
    pub now: SystemTime,
    /// Value of the shared round-robin cursor, for SEQUENTIAL.
    pub cursor: Option<u64>,
}

impl SelectionContext {
    pub fn at(now: SystemTime) -> Self {
        Self { now, cursor: None }
    }

    pub fn with_cursor(mut self, cursor: u64) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

/// Order the records of `snapshot` by preference under `strategy`.
///
/// Fails with `PoolExhausted` when nothing is eligible.
pub fn candidates<'a, R>(
    snapshot: &'a Snapshot,
    strategy: Strategy,
    ctx: &SelectionContext,
    rng: &mut R,
) -> Result<Vec<&'a ProxyRecord>>
where
    R: Rng + ?Sized,
{
    if snapshot.is_empty() {
        return Err(Error::PoolExhausted);
    }

    let ordered = match strategy {
        Strategy::Sequential => sequential(snapshot, ctx.cursor.unwrap_or(0)),
        Strategy::Random => {
            let mut records: Vec<&ProxyRecord> = snapshot.records().iter().collect();
            records.shuffle(rng);
            records
        }
        Strategy::Smart => smart(snapshot, ctx.now),
    };

    if ordered.is_empty() {
        return Err(Error::PoolExhausted);
    }
    Ok(ordered)
}

/// Every record, starting at rank `cursor % n` by sequence index and wrapping, so a record
/// evicted since the cursor was taken can be skipped forward.
fn sequential(snapshot: &Snapshot, cursor: u64) -> Vec<&ProxyRecord> {
    let mut records: Vec<&ProxyRecord> = snapshot.records().iter().collect();
    records.sort_by_key(|r| r.sequence_index);
    let start = (cursor % records.len() as u64) as usize;
    records.rotate_left(start);
    records
}

fn smart(snapshot: &Snapshot, now: SystemTime) -> Vec<&ProxyRecord> {
    let mut records: Vec<&ProxyRecord> = snapshot
        .records()
        .iter()
        .filter(|r| !r.is_cooling_down(now))
        .collect();
    records.sort_by(|a, b| {
        b.success_rate()
            .partial_cmp(&a.success_rate())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.last_used_at.cmp(&b.last_used_at))
            .then_with(|| a.sequence_index.cmp(&b.sequence_index))
    });
    records
}
