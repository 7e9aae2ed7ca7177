//! 进程内锁存储
//!
//! 语义与 Redis 实现一致：每个操作在持有互斥锁期间一次完成。
//! 过期时间基于 `tokio::time::Instant`，暂停时钟的测试可以精确推进时间。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::LockStore;
use crate::error::StoreError;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// 内存锁存储
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    entries: Mutex<HashMap<String, Entry>>,
    /// 每次操作前的人为延迟，用于模拟慢存储
    latency: Option<Duration>,
    acquire_calls: AtomicUsize,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每个操作都先等待 `latency` 再执行
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// 当前未过期的值
    pub fn value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// 剩余存活时间
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at - now)
    }

    /// 直接写入一个条目，不检查是否已存在
    pub fn insert(&self, key: &str, value: &str, lease: Duration) {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + lease,
            },
        );
    }

    /// `acquire_if_absent` 被调用的次数
    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// 在锁内执行 `f`，已过期的条目先被清除
    fn with_live_entry<T>(&self, key: &str, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        f(&mut entries)
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire_if_absent(
        &self,
        key: &str,
        token: &str,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        Ok(self.with_live_entry(key, |entries| {
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: token.to_string(),
                    expires_at: Instant::now() + lease,
                },
            );
            true
        }))
    }

    async fn extend_if_owned(
        &self,
        key: &str,
        token: &str,
        lease_millis: u64,
    ) -> Result<i64, StoreError> {
        self.simulate_latency().await;

        Ok(self.with_live_entry(key, |entries| match entries.get_mut(key) {
            Some(entry) if entry.value == token => {
                entry.expires_at = Instant::now() + Duration::from_millis(lease_millis);
                1
            }
            _ => 0,
        }))
    }

    async fn delete_if_owned(&self, key: &str, token: &str) -> Result<i64, StoreError> {
        self.simulate_latency().await;

        Ok(self.with_live_entry(key, |entries| {
            let owned = entries.get(key).is_some_and(|entry| entry.value == token);
            if owned {
                entries.remove(key);
                1
            } else {
                0
            }
        }))
    }
}
