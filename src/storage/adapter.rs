//! Thin, typed wrapper over a Redis-shaped key/value+list+hash+sorted-set
//! store. Every command funnels through here so failures are classified
//! once and connection readiness is gated in one place, following the
//! teacher's `RedisStorage::conn: ConnectionManager` shape.

use crate::config::RedisConfig;
use crate::error::{classify_redis_error, ErrorContext, QueueError, Result};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, IntoConnectionInfo, Script};
use std::collections::HashMap;
use std::time::Duration;

macro_rules! embed_script {
    ($name:literal) => {
        Script::new(include_str!(concat!("lua/", $name)))
    };
}

#[derive(Clone)]
pub(crate) struct Scripts {
    pub push_item: Script,
    pub pop_fifo: Script,
    pub pop_batch: Script,
    pub update_item: Script,
    pub delete_item: Script,
    pub move_item: Script,
    pub requeue_item: Script,
    pub delete_queue: Script,
    pub rate_limit_check: Script,
    pub rate_limit_record_start: Script,
    pub due_scheduled_jobs: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            push_item: embed_script!("push_item.lua"),
            pop_fifo: embed_script!("pop_fifo.lua"),
            pop_batch: embed_script!("pop_batch.lua"),
            update_item: embed_script!("update_item.lua"),
            delete_item: embed_script!("delete_item.lua"),
            move_item: embed_script!("move_item.lua"),
            requeue_item: embed_script!("requeue_item.lua"),
            delete_queue: embed_script!("delete_queue.lua"),
            rate_limit_check: embed_script!("rate_limit_check.lua"),
            rate_limit_record_start: embed_script!("rate_limit_record_start.lua"),
            due_scheduled_jobs: embed_script!("due_scheduled_jobs.lua"),
        }
    }
}

/// Connects to Redis and returns a ready-to-clone [`ConnectionManager`],
/// honoring the configured connect/response timeouts and retry budget.
pub async fn connect<S: IntoConnectionInfo>(
    redis: S,
    manager_config: ConnectionManagerConfig,
) -> std::result::Result<ConnectionManager, redis::RedisError> {
    let client = Client::open(redis.into_connection_info()?)?;
    client.get_connection_manager_with_config(manager_config).await
}

/// Storage adapter. Cheap to clone (the inner `ConnectionManager` is
/// internally reference-counted, same as the teacher's `RedisStorage`).
#[derive(Clone)]
pub struct StorageAdapter {
    conn: ConnectionManager,
    pub(crate) scripts: Scripts,
}

impl StorageAdapter {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            scripts: Scripts::load(),
        }
    }

    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(config.connect_timeout)
            .set_response_timeout(config.command_timeout)
            .set_number_of_retries(config.max_retries_per_request as usize);
        let conn = connect(config.connection_url(), manager_config)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("connect"), e))?;
        Ok(Self::new(conn))
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Waits until `PING` succeeds or `timeout` elapses.
    pub async fn wait_for_connection(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.ping().await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(QueueError::timeout(
                    ErrorContext::new("wait_for_connection"),
                    timeout.as_millis() as u64,
                ));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("ping"), e))?;
        Ok(())
    }

    // -- hashes --------------------------------------------------------

    pub async fn hset_many(&self, key: &str, fields: &HashMap<String, String>) -> Result<()> {
        let mut conn = self.conn();
        let pairs: Vec<(&String, &String)> = fields.iter().collect();
        let _: () = conn
            .hset_multiple(key, &pairs)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("hset_many").queue(key), e))?;
        Ok(())
    }

    pub async fn hset_field(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn
            .hset(key, field, value)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("hset_field").queue(key), e))?;
        Ok(())
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn();
        conn.hgetall(key)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("hgetall").queue(key), e))
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        conn.hget(key, field)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("hget").queue(key), e))
    }

    pub async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn();
        conn.hincr(key, field, delta)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("hincrby").queue(key), e))
    }

    pub async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn
            .hdel(key, field)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("hdel").queue(key), e))?;
        Ok(())
    }

    // -- keys ------------------------------------------------------------

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        conn.exists(key)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("exists").queue(key), e))
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("del").queue(key), e))?;
        Ok(())
    }

    pub async fn expire(&self, key: &str, seconds: i64) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn
            .expire(key, seconds)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("expire").queue(key), e))?;
        Ok(())
    }

    pub async fn pexpire(&self, key: &str, millis: i64) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn
            .pexpire(key, millis)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("pexpire").queue(key), e))?;
        Ok(())
    }

    pub async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(|e| classify_redis_error(ErrorContext::new("scan_match"), e))?;
            out.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(out)
    }

    // -- lists -------------------------------------------------------------

    pub async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn
            .lpush(key, value)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("lpush").queue(key), e))?;
        Ok(())
    }

    pub async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn
            .rpush(key, value)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("rpush").queue(key), e))?;
        Ok(())
    }

    pub async fn llen(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn();
        conn.llen(key)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("llen").queue(key), e))
    }

    pub async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.conn();
        conn.lrange(key, start, stop)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("lrange").queue(key), e))
    }

    pub async fn lindex(&self, key: &str, index: isize) -> Result<Option<String>> {
        let mut conn = self.conn();
        conn.lindex(key, index)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("lindex").queue(key), e))
    }

    /// Rewrites a whole list atomically (`DEL` + `RPUSH` in the given
    /// order), used by the write-back flusher to sync a dirty items-cache
    /// mirror back to Redis in one round trip.
    pub async fn replace_list(&self, key: &str, values: &[String]) -> Result<()> {
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic().del(key);
        if !values.is_empty() {
            pipe.rpush(key, values);
        }
        pipe.query_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("replace_list").queue(key), e))
    }

    // -- sorted sets ---------------------------------------------------------

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn
            .zadd(key, member, score)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("zadd").queue(key), e))?;
        Ok(())
    }

    pub async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn
            .zrem(key, member)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("zrem").queue(key), e))?;
        Ok(())
    }

    pub async fn zrangebyscore_limit(
        &self,
        key: &str,
        min: &str,
        max: &str,
        offset: isize,
        count: isize,
    ) -> Result<Vec<String>> {
        let mut conn = self.conn();
        conn.zrangebyscore_limit(key, min, max, offset, count)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("zrangebyscore").queue(key), e))
    }

    pub async fn zrange_withscores(&self, key: &str, start: isize, stop: isize) -> Result<Vec<(String, f64)>> {
        let mut conn = self.conn();
        conn.zrange_withscores(key, start, stop)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("zrange_withscores").queue(key), e))
    }

    pub async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn();
        conn.zcard(key)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("zcard").queue(key), e))
    }

    // -- sets -----------------------------------------------------------------

    pub async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn
            .sadd(key, member)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("sadd").queue(key), e))?;
        Ok(())
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        conn.smembers(key)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("smembers").queue(key), e))
    }

    pub async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn();
        conn.sismember(key, member)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("sismember").queue(key), e))
    }

    // -- scripted primitives ---------------------------------------------

    pub async fn push_item(&self, items_key: &str, meta_key: &str, item_json: &str) -> Result<u64> {
        let mut conn = self.conn();
        self.scripts
            .push_item
            .key(items_key)
            .key(meta_key)
            .arg(item_json)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("push_item").queue(items_key), e))
    }

    pub async fn pop_fifo(&self, items_key: &str, meta_key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        self.scripts
            .pop_fifo
            .key(items_key)
            .key(meta_key)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("pop_fifo").queue(items_key), e))
    }

    pub async fn pop_batch(&self, items_key: &str, meta_key: &str, n: usize) -> Result<Vec<String>> {
        let mut conn = self.conn();
        self.scripts
            .pop_batch
            .key(items_key)
            .key(meta_key)
            .arg(n)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("pop_batch").queue(items_key), e))
    }

    pub async fn update_item(
        &self,
        items_key: &str,
        meta_key: &str,
        item_id: &str,
        new_item_json: &str,
    ) -> Result<Option<String>> {
        let mut conn = self.conn();
        self.scripts
            .update_item
            .key(items_key)
            .key(meta_key)
            .arg(item_id)
            .arg(new_item_json)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("update_item").queue(items_key).item(item_id), e))
    }

    pub async fn delete_item(&self, items_key: &str, meta_key: &str, item_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        self.scripts
            .delete_item
            .key(items_key)
            .key(meta_key)
            .arg(item_id)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("delete_item").queue(items_key).item(item_id), e))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn move_item(
        &self,
        src_items_key: &str,
        src_meta_key: &str,
        dst_items_key: &str,
        dst_meta_key: &str,
        item_id: &str,
        new_item_json: &str,
        position: &str,
    ) -> Result<Option<String>> {
        let mut conn = self.conn();
        self.scripts
            .move_item
            .key(src_items_key)
            .key(src_meta_key)
            .key(dst_items_key)
            .key(dst_meta_key)
            .arg(item_id)
            .arg(new_item_json)
            .arg(position)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("move_item").item(item_id), e))
    }

    pub async fn requeue_item(
        &self,
        items_key: &str,
        meta_key: &str,
        item_id: &str,
        new_item_json: &str,
        position: &str,
        index: usize,
    ) -> Result<Option<String>> {
        let mut conn = self.conn();
        self.scripts
            .requeue_item
            .key(items_key)
            .key(meta_key)
            .arg(item_id)
            .arg(new_item_json)
            .arg(position)
            .arg(index)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("requeue_item").queue(items_key).item(item_id), e))
    }

    pub async fn delete_queue_keys(&self, fixed_keys: &[&str], scan_patterns: &[&str]) -> Result<i64> {
        let mut conn = self.conn();
        let mut invocation = self.scripts.delete_queue.prepare_invoke();
        for k in fixed_keys {
            invocation.key(*k);
        }
        for p in scan_patterns {
            invocation.arg(*p);
        }
        invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("delete_queue_keys"), e))
    }

    pub async fn due_scheduled_jobs(&self, scheduled_key: &str, now_ms: i64, limit: usize) -> Result<Vec<String>> {
        let mut conn = self.conn();
        self.scripts
            .due_scheduled_jobs
            .key(scheduled_key)
            .arg(now_ms)
            .arg(limit)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("due_scheduled_jobs").queue(scheduled_key), e))
    }

    /// Checks configured rate-limit windows plus the concurrent gauge
    /// without mutating any counter.
    pub async fn rate_limit_check(
        &self,
        counters_key: &str,
        windows: &[(String, Option<u64>)],
        concurrent_cap: Option<u64>,
    ) -> Result<(bool, String, String)> {
        let mut conn = self.conn();
        let mut invocation = self.scripts.rate_limit_check.prepare_invoke();
        invocation.key(counters_key);
        invocation.arg(windows.len());
        for (field, _) in windows {
            invocation.arg(field);
        }
        for (_, cap) in windows {
            invocation.arg(cap.map(|c| c.to_string()).unwrap_or_default());
        }
        invocation.arg(concurrent_cap.map(|c| c.to_string()).unwrap_or_default());
        let (allowed, reason, window): (i64, String, String) = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("rate_limit_check").queue(counters_key), e))?;
        Ok((allowed == 1, reason, window))
    }

    pub async fn rate_limit_record_start(
        &self,
        counters_key: &str,
        windows: &[String],
        safety_ttl_seconds: i64,
    ) -> Result<i64> {
        let mut conn = self.conn();
        let mut invocation = self.scripts.rate_limit_record_start.prepare_invoke();
        invocation.key(counters_key);
        invocation.arg(windows.len());
        for field in windows {
            invocation.arg(field);
        }
        invocation.arg(safety_ttl_seconds);
        invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error(ErrorContext::new("rate_limit_record_start").queue(counters_key), e))
    }
}
