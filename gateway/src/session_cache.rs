//! 活跃会话缓存
//!
//! `identity:partition` → 活跃会话 ID 集合。
//! 容量有界（LRU 淘汰），写入后固定 TTL 过期，读取不续期。
//! 不做主动失效：撤销最长在一个 TTL 后生效。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use moka::{future::Cache as MokaCache, policy::EvictionPolicy};
use passgate_config::SessionCacheConfig;
use tracing::debug;

use crate::metrics;

/// 活跃会话 ID 集合（只读共享）
pub type SessionIds = Arc<HashSet<String>>;

#[derive(Clone)]
pub struct SessionCache {
    inner: MokaCache<String, SessionIds>,
}

impl SessionCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let inner = MokaCache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self { inner }
    }

    pub fn from_config(config: &SessionCacheConfig) -> Self {
        Self::new(config.max_capacity, config.ttl())
    }

    /// 查询缓存，过期条目视为不存在
    pub async fn get(&self, key: &str) -> Option<SessionIds> {
        let entry = self.inner.get(key).await;
        metrics::record_cache_lookup(entry.is_some());
        debug!(key = %key, hit = entry.is_some(), "Session cache lookup");
        entry
    }

    /// 写入（覆盖）并重置 TTL
    pub async fn put(&self, key: impl Into<String>, session_ids: HashSet<String>) -> SessionIds {
        let value = Arc::new(session_ids);
        self.inner.insert(key.into(), value.clone()).await;
        value
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// 执行挂起的淘汰任务
    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}
