//! concord-kv
//!
//! The shared key-value store contract (§4.6, §5): rate-limit sorted sets,
//! idempotency locks, tenant-config cache entries, and the config-reload
//! pub/sub channel. [`SharedCache`] is the trait the rate limiter and
//! tenant-context cache depend on; [`RedisCache`] is the production
//! implementation. Every mutating operation here runs as a single atomic
//! script so two dispatcher instances racing on the same key never produce
//! a torn read-modify-write (§5's "mutated only through atomic script
//! execution").

pub mod error;

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tokio::sync::mpsc;
use tracing::warn;

pub use error::KvError;

/// Outcome of a sliding-window rate-limit consume (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConsume {
    pub allowed: bool,
    pub remaining: i64,
}

#[async_trait]
pub trait SharedCache: Send + Sync + 'static {
    /// Atomically: drop members older than `now_ms - window_ms`, count what
    /// remains, and — only if that count is below `limit` — insert a new
    /// member scored `now_ms`, refreshing the key's expiry to
    /// `window_ms/1000 + 60` seconds. Returns whether the new request was
    /// admitted and how many requests remain in the window afterward.
    async fn consume_sliding_window(
        &self,
        key: &str,
        window_ms: i64,
        limit: i64,
        now_ms: i64,
        member: &str,
    ) -> Result<WindowConsume, KvError>;

    /// `SET key token NX PX ttl_ms` — acquire a distributed lock. Returns
    /// `false` if already held.
    async fn try_acquire_lock(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool, KvError>;

    /// Release the lock only if it is still held by `token` (guards against
    /// releasing a lock some other holder re-acquired after our TTL lapsed).
    async fn release_lock(&self, key: &str, token: &str) -> Result<(), KvError>;

    async fn get_string(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set_string_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;

    async fn publish(&self, channel: &str, message: &str) -> Result<(), KvError>;

    /// Subscribe to a pub/sub channel; messages arrive on the returned
    /// receiver until it is dropped.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, KvError>;
}

/// Atomic sliding-window consume: ZREMRANGEBYSCORE, ZCARD, conditional
/// ZADD, EXPIRE — all in one round trip so no two callers can interleave.
const CONSUME_WINDOW_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local count = redis.call('ZCARD', KEYS[1])
local limit = tonumber(ARGV[3])
if count < limit then
    redis.call('ZADD', KEYS[1], ARGV[2], ARGV[4])
    redis.call('EXPIRE', KEYS[1], ARGV[5])
    return {1, limit - count - 1}
else
    return {0, 0}
end
"#;

/// `SET key value NX PX ttl` via EVAL so the existence check and the set
/// happen atomically.
const ACQUIRE_LOCK_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
    return 1
else
    return 0
end
"#;

/// Delete the key only if its value still matches our token.
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Redis-backed implementation of [`SharedCache`].
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn consume_sliding_window(
        &self,
        key: &str,
        window_ms: i64,
        limit: i64,
        now_ms: i64,
        member: &str,
    ) -> Result<WindowConsume, KvError> {
        let floor = now_ms - window_ms;
        let expire_secs = window_ms / 1000 + 60;
        let mut conn = self.conn.clone();
        let (allowed, remaining): (i64, i64) = Script::new(CONSUME_WINDOW_SCRIPT)
            .key(key)
            .arg(floor)
            .arg(now_ms)
            .arg(limit)
            .arg(member)
            .arg(expire_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(WindowConsume {
            allowed: allowed == 1,
            remaining,
        })
    }

    async fn try_acquire_lock(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let acquired: i64 = Script::new(ACQUIRE_LOCK_SCRIPT)
            .key(key)
            .arg(token)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(acquired == 1)
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: i64 = Script::new(RELEASE_LOCK_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_string_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(channel, message).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, KvError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        let (tx, rx) = mpsc::channel(64);
        let channel = channel.to_string();
        tokio::spawn(async move {
            use futures::StreamExt;
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, %channel, "failed to decode pub/sub payload");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// An in-process fake for tests that don't need a live Redis instance.
#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeCache {
        strings: Mutex<HashMap<String, String>>,
        sets: Mutex<HashMap<String, Vec<(i64, String)>>>,
        locks: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl SharedCache for FakeCache {
        async fn consume_sliding_window(
            &self,
            key: &str,
            window_ms: i64,
            limit: i64,
            now_ms: i64,
            member: &str,
        ) -> Result<WindowConsume, KvError> {
            let mut sets = self.sets.lock().unwrap();
            let entry = sets.entry(key.to_string()).or_default();
            entry.retain(|(score, _)| *score >= now_ms - window_ms);
            if (entry.len() as i64) < limit {
                entry.push((now_ms, member.to_string()));
                Ok(WindowConsume {
                    allowed: true,
                    remaining: limit - entry.len() as i64,
                })
            } else {
                Ok(WindowConsume {
                    allowed: false,
                    remaining: 0,
                })
            }
        }

        async fn try_acquire_lock(
            &self,
            key: &str,
            token: &str,
            _ttl_ms: u64,
        ) -> Result<bool, KvError> {
            let mut locks = self.locks.lock().unwrap();
            if locks.contains_key(key) {
                return Ok(false);
            }
            locks.insert(key.to_string(), token.to_string());
            Ok(true)
        }

        async fn release_lock(&self, key: &str, token: &str) -> Result<(), KvError> {
            let mut locks = self.locks.lock().unwrap();
            if locks.get(key).map(|v| v.as_str()) == Some(token) {
                locks.remove(key);
            }
            Ok(())
        }

        async fn get_string(&self, key: &str) -> Result<Option<String>, KvError> {
            Ok(self.strings.lock().unwrap().get(key).cloned())
        }

        async fn set_string_ex(
            &self,
            key: &str,
            value: &str,
            _ttl_secs: u64,
        ) -> Result<(), KvError> {
            self.strings
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), KvError> {
            self.strings.lock().unwrap().remove(key);
            Ok(())
        }

        async fn publish(&self, _channel: &str, _message: &str) -> Result<(), KvError> {
            Ok(())
        }

        async fn subscribe(&self, _channel: &str) -> Result<mpsc::Receiver<String>, KvError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn sliding_window_blocks_past_limit() {
        let cache = FakeCache::default();
        for i in 0..3 {
            let r = cache
                .consume_sliding_window("rl:t:a", 60_000, 3, 1_000 + i, &format!("tok{i}"))
                .await
                .unwrap();
            assert!(r.allowed);
        }
        let r = cache
            .consume_sliding_window("rl:t:a", 60_000, 3, 1_003, "tok3")
            .await
            .unwrap();
        assert!(!r.allowed);
    }

    #[tokio::test]
    async fn lock_round_trips() {
        let cache = FakeCache::default();
        assert!(cache.try_acquire_lock("lock:e1", "a", 1000).await.unwrap());
        assert!(!cache.try_acquire_lock("lock:e1", "b", 1000).await.unwrap());
        cache.release_lock("lock:e1", "a").await.unwrap();
        assert!(cache.try_acquire_lock("lock:e1", "b", 1000).await.unwrap());
    }
}
