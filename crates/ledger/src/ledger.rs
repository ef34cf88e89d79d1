//! Async Redis DAO.
//!
//! The durable ledger behind every process: namespaced hashes with JSON
//! values, raw integer hashes for counters, sets, queues, and atomic NX+TTL
//! locks. All operations go through one multiplexed connection; the
//! connection is cheap to clone and safe to share across tasks.

use std::collections::HashMap;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use inquest_core::config::RedisConfig;

use crate::error::LedgerError;

#[derive(Clone)]
pub struct Ledger {
    conn: MultiplexedConnection,
}

impl Ledger {
    /// Connect and verify with a ping. Connection failure here is fatal to
    /// the calling process.
    pub async fn connect(config: &RedisConfig) -> Result<Self, LedgerError> {
        let client = redis::Client::open(config.url())?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        let ledger = Self { conn };
        ledger.ping().await?;
        info!(host = %config.host, port = config.port, "ledger connected");
        Ok(ledger)
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    // ── Namespaced hashes (JSON values) ──────────────────────────────

    pub async fn hset<V: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        field: &str,
        value: &V,
    ) -> Result<(), LedgerError> {
        let encoded = serde_json::to_string(value)?;
        let _: () = self
            .conn()
            .hset(format!("{namespace}:{key}"), field, encoded)
            .await?;
        Ok(())
    }

    pub async fn hget<V: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
        field: &str,
    ) -> Result<Option<V>, LedgerError> {
        let raw: Option<String> = self.conn().hget(format!("{namespace}:{key}"), field).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn hgetall(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<HashMap<String, serde_json::Value>, LedgerError> {
        let raw: HashMap<String, String> = self.conn().hgetall(format!("{namespace}:{key}")).await?;
        let mut decoded = HashMap::with_capacity(raw.len());
        for (field, json) in raw {
            decoded.insert(field, serde_json::from_str(&json)?);
        }
        Ok(decoded)
    }

    pub async fn hexists(&self, namespace: &str, key: &str, field: &str) -> Result<bool, LedgerError> {
        Ok(self.conn().hexists(format!("{namespace}:{key}"), field).await?)
    }

    pub async fn hdel(&self, namespace: &str, key: &str, field: &str) -> Result<(), LedgerError> {
        let _: () = self.conn().hdel(format!("{namespace}:{key}"), field).await?;
        Ok(())
    }

    // ── Raw hashes (integer counters) ────────────────────────────────

    /// Atomic increment of an integer hash field; returns the new value.
    pub async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, LedgerError> {
        Ok(self.conn().hincr(key, field, delta).await?)
    }

    pub async fn hdel_raw(&self, key: &str, field: &str) -> Result<(), LedgerError> {
        let _: () = self.conn().hdel(key, field).await?;
        Ok(())
    }

    // ── Sets ─────────────────────────────────────────────────────────

    /// Returns the number of members newly added — 1 on first insert, 0 on
    /// repeats — which is what makes atomic first-seen tests possible.
    pub async fn sadd(&self, key: &str, member: &str) -> Result<i64, LedgerError> {
        Ok(self.conn().sadd(key, member).await?)
    }

    pub async fn sismember(&self, key: &str, member: &str) -> Result<bool, LedgerError> {
        Ok(self.conn().sismember(key, member).await?)
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>, LedgerError> {
        Ok(self.conn().smembers(key).await?)
    }

    pub async fn srem(&self, key: &str, member: &str) -> Result<(), LedgerError> {
        let _: () = self.conn().srem(key, member).await?;
        Ok(())
    }

    // ── Lists (queues) ───────────────────────────────────────────────

    pub async fn lpush(&self, key: &str, values: &[String]) -> Result<i64, LedgerError> {
        Ok(self.conn().lpush(key, values).await?)
    }

    /// Blocking right-pop with a timeout; `None` on timeout. Callers loop
    /// on this with a short timeout so shutdown flags get re-checked.
    pub async fn brpop(&self, key: &str, timeout_secs: f64) -> Result<Option<String>, LedgerError> {
        let popped: Option<(String, String)> = self.conn().brpop(key, timeout_secs).await?;
        Ok(popped.map(|(_, value)| value))
    }

    pub async fn llen(&self, key: &str) -> Result<i64, LedgerError> {
        Ok(self.conn().llen(key).await?)
    }

    // ── Strings / locks ──────────────────────────────────────────────

    /// `SET key 1 NX EX ttl` — succeeds iff no current holder.
    pub async fn set_nx_ex(&self, key: &str, ttl_secs: u64) -> Result<bool, LedgerError> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut self.conn())
            .await?;
        Ok(reply.is_some())
    }

    pub async fn delete(&self, key: &str) -> Result<(), LedgerError> {
        let _: () = self.conn().del(key).await?;
        Ok(())
    }

    // ── Health ───────────────────────────────────────────────────────

    pub async fn ping(&self) -> Result<(), LedgerError> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn()).await?;
        Ok(())
    }
}
