//! In-process state store.
//!
//! Shares a pool between tasks of one process, and backs the test suite. One mutex guards
//! the whole keyspace, which makes every call trivially atomic.

use super::{Commit, Guard, Op, StateStore, Transaction};
use crate::error::{Error, Result};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct Data {
    values: HashMap<String, Entry>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl Data {
    fn value(&self, key: &str) -> Option<&str> {
        let now = Instant::now();
        self.values
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.as_str())
    }

    fn counter(&self, key: &str) -> Result<i64> {
        match self.value(key) {
            Some(raw) => raw.parse().map_err(|_| {
                Error::StoreUnavailable(format!("value at {} is not an integer", key))
            }),
            None => Ok(0),
        }
    }

    fn incr(&mut self, key: &str, by: i64) -> Result<i64> {
        let next = self.counter(key)? + by;
        let expires_at = self
            .values
            .get(key)
            .and_then(|e| e.expires_at)
            .filter(|at| *at > Instant::now());
        self.values.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    fn is_member(&self, set: &str, member: &str) -> bool {
        self.sets.get(set).is_some_and(|s| s.contains(member))
    }

    fn check(&self, guard: &Guard) -> Result<bool> {
        Ok(match guard {
            Guard::Exists { key } => self.value(key).is_some(),
            Guard::Absent { key } => self.value(key).is_none(),
            Guard::Equals { key, value } => self.value(key) == Some(value.as_str()),
            Guard::CounterBelow { key, limit } => self.counter(key)? < *limit,
            Guard::CounterEquals { key, value } => self.counter(key)? == *value,
            Guard::CounterAtLeast { key, value } => self.counter(key)? >= *value,
            Guard::Member { set, member } => self.is_member(set, member),
            Guard::NotMember { set, member } => !self.is_member(set, member),
        })
    }

    fn apply(&mut self, op: &Op, incremented: &mut Vec<i64>) -> Result<()> {
        match op {
            Op::Set { key, value } => {
                self.values.insert(
                    key.clone(),
                    Entry {
                        value: value.clone(),
                        expires_at: None,
                    },
                );
            }
            Op::SetWithTtl { key, value, ttl_ms } => {
                self.values.insert(
                    key.clone(),
                    Entry {
                        value: value.clone(),
                        // past what Instant can hold means never
                        expires_at: Instant::now().checked_add(Duration::from_millis(*ttl_ms)),
                    },
                );
            }
            Op::Delete { key } => {
                self.values.remove(key);
                self.sets.remove(key);
            }
            Op::Incr { key, by } => incremented.push(self.incr(key, *by)?),
            Op::SetAdd { set, member } => {
                self.sets.entry(set.clone()).or_default().insert(member.clone());
            }
            Op::SetRemove { set, member } => {
                if let Some(members) = self.sets.get_mut(set) {
                    members.remove(member);
                    if members.is_empty() {
                        self.sets.remove(set);
                    }
                }
            }
        }
        Ok(())
    }
}

/// State store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Data>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().value(key).map(str::to_string))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let inner = self.inner.lock();
        Ok(keys
            .iter()
            .map(|k| inner.value(k).map(str::to_string))
            .collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.apply(&Op::set(key, value), &mut Vec::new())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.apply(&Op::set_with_ttl(key, value, ttl), &mut Vec::new())
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64> {
        self.inner.lock().incr(key, by)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        let existed = inner.value(key).is_some() || inner.sets.contains_key(key);
        inner.values.remove(key);
        inner.sets.remove(key);
        Ok(existed)
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        let was_member = inner.is_member(set, member);
        inner.apply(&Op::set_remove(set, member), &mut Vec::new())?;
        Ok(was_member)
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .sets
            .get(set)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_len(&self, set: &str) -> Result<usize> {
        Ok(self.inner.lock().sets.get(set).map_or(0, BTreeSet::len))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        let now = Instant::now();
        let mut keys: Vec<String> = inner
            .values
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k.clone())
            .chain(inner.sets.keys().filter(|k| k.starts_with(prefix)).cloned())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn commit(&self, tx: &Transaction) -> Result<Commit> {
        let mut inner = self.inner.lock();

        for guard in &tx.guards {
            if !inner.check(guard)? {
                return Ok(Commit::Aborted);
            }
        }

        // Remember what the ops touch so a failing op can be rolled back.
        let mut saved_values = HashMap::new();
        let mut saved_sets = HashMap::new();
        for op in &tx.ops {
            match op {
                Op::Set { key, .. }
                | Op::SetWithTtl { key, .. }
                | Op::Incr { key, .. }
                | Op::Delete { key } => {
                    saved_values
                        .entry(key.clone())
                        .or_insert_with(|| inner.values.get(key).cloned());
                    saved_sets
                        .entry(key.clone())
                        .or_insert_with(|| inner.sets.get(key).cloned());
                }
                Op::SetAdd { set, .. } | Op::SetRemove { set, .. } => {
                    saved_sets
                        .entry(set.clone())
                        .or_insert_with(|| inner.sets.get(set).cloned());
                }
            }
        }

        let mut incremented = Vec::new();
        for op in &tx.ops {
            if let Err(err) = inner.apply(op, &mut incremented) {
                for (key, entry) in saved_values {
                    match entry {
                        Some(entry) => inner.values.insert(key, entry),
                        None => inner.values.remove(&key),
                    };
                }
                for (set, members) in saved_sets {
                    match members {
                        Some(members) => inner.sets.insert(set, members),
                        None => inner.sets.remove(&set),
                    };
                }
                return Err(err);
            }
        }

        Ok(Commit::Applied(incremented))
    }
}
