//! Redis-backed state store.
//!
//! Transactions run as a Lua script, so guards and ops execute without any other client
//! interleaving. The script checks every guard before its first write.

use super::{Commit, StateStore, Transaction};
use crate::error::{Error, Result};
use crate::utils::duration_millis;

use async_trait::async_trait;
use log::info;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::time::Duration;

const COMMIT_SCRIPT: &str = r#"
local tx = cjson.decode(ARGV[1])

local function counter(key)
  return tonumber(redis.call('GET', key) or '0') or 0
end

for _, g in ipairs(tx.guards) do
  local ok
  if g.kind == 'exists' then
    ok = redis.call('EXISTS', g.key) == 1
  elseif g.kind == 'absent' then
    ok = redis.call('EXISTS', g.key) == 0
  elseif g.kind == 'equals' then
    ok = redis.call('GET', g.key) == g.value
  elseif g.kind == 'counter_below' then
    ok = counter(g.key) < g.limit
  elseif g.kind == 'counter_equals' then
    ok = counter(g.key) == g.value
  elseif g.kind == 'counter_at_least' then
    ok = counter(g.key) >= g.value
  elseif g.kind == 'member' then
    ok = redis.call('SISMEMBER', g.set, g.member) == 1
  elseif g.kind == 'not_member' then
    ok = redis.call('SISMEMBER', g.set, g.member) == 0
  else
    return redis.error_reply('unknown guard ' .. tostring(g.kind))
  end
  if not ok then
    return {0}
  end
end

local out = {1}
for _, op in ipairs(tx.ops) do
  if op.kind == 'set' then
    redis.call('SET', op.key, op.value)
  elseif op.kind == 'set_with_ttl' then
    redis.call('SET', op.key, op.value, 'PX', op.ttl_ms)
  elseif op.kind == 'delete' then
    redis.call('DEL', op.key)
  elseif op.kind == 'incr' then
    out[#out + 1] = redis.call('INCRBY', op.key, op.by)
  elseif op.kind == 'set_add' then
    redis.call('SADD', op.set, op.member)
  elseif op.kind == 'set_remove' then
    redis.call('SREM', op.set, op.member)
  else
    return redis.error_reply('unknown op ' .. tostring(op.kind))
  end
end
return out
"#;

fn unavailable(err: redis::RedisError) -> Error {
    Error::StoreUnavailable(err.to_string())
}

/// State store living in a Redis server shared by every client of the pool.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    commit_script: Script,
}

impl RedisStore {
    /// Connect to `url`, e.g. `redis://localhost:6379/0`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        info!("Connected to state store at {}", redact(url));
        Ok(Self {
            conn,
            commit_script: Script::new(COMMIT_SCRIPT),
        })
    }
}

fn redact(url: &str) -> String {
    match url.rsplit_once('@') {
        Some((_, host)) => format!("redis://***@{}", host),
        None => url.to_string(),
    }
}

/// Escape glob metacharacters so a prefix matches literally.
fn glob_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('*');
    out
}

#[async_trait]
impl StateStore for RedisStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(unavailable)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let mut conn = self.conn.clone();
        redis::cmd("MGET")
            .arg(keys.to_vec())
            .query_async(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set(key, value).await.map_err(unavailable)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(duration_millis(ttl).max(1))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.incr(key, by).await.map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await.map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(set, member).await.map_err(unavailable)?;
        Ok(added > 0)
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.srem(set, member).await.map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(set).await.map_err(unavailable)
    }

    async fn set_len(&self, set: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        conn.scard(set).await.map_err(unavailable)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = glob_escape(prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn commit(&self, tx: &Transaction) -> Result<Commit> {
        let payload = serde_json::to_string(tx)
            .map_err(|e| Error::StoreUnavailable(format!("cannot encode transaction: {}", e)))?;
        let mut conn = self.conn.clone();
        let reply: Vec<i64> = self
            .commit_script
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        match reply.split_first() {
            Some((&1, incremented)) => Ok(Commit::Applied(incremented.to_vec())),
            Some((&0, _)) => Ok(Commit::Aborted),
            _ => Err(Error::StoreUnavailable(format!(
                "unexpected commit reply {:?}",
                reply
            ))),
        }
    }
}
