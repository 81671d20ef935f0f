//! In-progress application store — sharded, per-user keyed records.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use super::model::ApplicationRecord;

/// Default number of shards for [`InMemoryApplicationStore`].
pub const DEFAULT_SHARDS: usize = 16;

/// Keyed container for in-progress applications.
///
/// Every operation is atomic on its own; no lock is held between calls, so a
/// caller may await anything (e.g. a database write) between `load` and
/// `save` without blocking other users.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    /// The stored record, or a fresh one carrying only `user_id`.
    async fn load(&self, user_id: i64) -> ApplicationRecord;

    /// Replace the stored record.
    async fn save(&self, user_id: i64, record: ApplicationRecord);

    /// Drop the stored record; the next `load` returns a fresh one.
    async fn clear(&self, user_id: i64);

    /// Remove entries not touched for longer than `max_idle`.
    /// Returns the number of entries removed.
    async fn evict_idle(&self, max_idle: Duration) -> usize;

    /// Number of tracked records.
    async fn len(&self) -> usize;
}

struct Entry {
    record: ApplicationRecord,
    touched_at: Instant,
}

/// In-memory store split into independently locked shards.
pub struct InMemoryApplicationStore {
    shards: Vec<RwLock<HashMap<i64, Entry>>>,
}

impl InMemoryApplicationStore {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Create a store with `shards` locks (at least one).
    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, user_id: i64) -> &RwLock<HashMap<i64, Entry>> {
        let idx = user_id.unsigned_abs() % self.shards.len() as u64;
        &self.shards[idx as usize]
    }
}

impl Default for InMemoryApplicationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApplicationStore for InMemoryApplicationStore {
    async fn load(&self, user_id: i64) -> ApplicationRecord {
        let shard = self.shard(user_id).read().await;
        match shard.get(&user_id) {
            Some(entry) => entry.record.clone(),
            None => ApplicationRecord {
                user_id,
                ..Default::default()
            },
        }
    }

    async fn save(&self, user_id: i64, record: ApplicationRecord) {
        let mut shard = self.shard(user_id).write().await;
        shard.insert(
            user_id,
            Entry {
                record,
                touched_at: Instant::now(),
            },
        );
    }

    async fn clear(&self, user_id: i64) {
        let removed = self.shard(user_id).write().await.remove(&user_id);
        if removed.is_some() {
            debug!(user_id, "Application record cleared");
        }
    }

    async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut evicted = 0;
        for shard in &self.shards {
            let mut shard = shard.write().await;
            let before = shard.len();
            shard.retain(|_, entry| entry.touched_at.elapsed() <= max_idle);
            evicted += before - shard.len();
        }
        if evicted > 0 {
            info!(count = evicted, "Evicted idle applications");
        }
        evicted
    }

    async fn len(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.read().await.len();
        }
        total
    }
}

/// Spawn a background task that periodically evicts idle records.
pub fn spawn_eviction_task(
    store: std::sync::Arc<dyn ApplicationStore>,
    max_idle: Duration,
) -> tokio::task::JoinHandle<()> {
    let period = (max_idle / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            store.evict_idle(max_idle).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::beta::model::Provider;

    #[tokio::test]
    async fn load_unknown_user_returns_fresh_record() {
        let store = InMemoryApplicationStore::new();
        let record = store.load(99).await;
        assert_eq!(record.user_id, 99);
        assert_eq!(record.filled_count(), 0);
        assert_eq!(store.len().await, 0, "load must not insert");
    }

    #[tokio::test]
    async fn save_then_load() {
        let store = InMemoryApplicationStore::new();
        let mut record = ApplicationRecord::new(1, 1, "alice");
        record.has_api_key = Some(true);
        record.provider = Some(Provider::OpenAi);
        store.save(1, record.clone()).await;

        assert_eq!(store.load(1).await, record);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn clear_resets_to_fresh() {
        let store = InMemoryApplicationStore::new();
        let mut record = ApplicationRecord::new(3, 3, "carol");
        record.email = "c@d.com".into();
        store.save(3, record).await;

        store.clear(3).await;
        let fresh = store.load(3).await;
        assert!(fresh.email.is_empty());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn negative_ids_map_to_a_shard() {
        let store = InMemoryApplicationStore::with_shards(4);
        store.save(-17, ApplicationRecord::new(-17, -17, "grp")).await;
        assert_eq!(store.load(-17).await.display_name, "grp");
    }

    #[tokio::test]
    async fn zero_shards_is_clamped() {
        let store = InMemoryApplicationStore::with_shards(0);
        store.save(1, ApplicationRecord::new(1, 1, "a")).await;
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn evict_idle_removes_stale_entries() {
        let store = InMemoryApplicationStore::new();
        store.save(1, ApplicationRecord::new(1, 1, "a")).await;
        store.save(2, ApplicationRecord::new(2, 2, "b")).await;

        assert_eq!(store.evict_idle(Duration::from_secs(3600)).await, 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.evict_idle(Duration::from_millis(5)).await, 2);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_task_drops_idle_records() {
        let store: Arc<dyn ApplicationStore> = Arc::new(InMemoryApplicationStore::new());
        store.save(1, ApplicationRecord::new(1, 1, "a")).await;
        store.save(2, ApplicationRecord::new(2, 2, "b")).await;

        let handle = spawn_eviction_task(Arc::clone(&store), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.len().await, 2, "records younger than max_idle stay");

        // Touching a record restarts its idle clock.
        store.save(2, ApplicationRecord::new(2, 2, "b")).await;

        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(store.len().await, 1);
        assert_eq!(store.load(2).await.display_name, "b");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.len().await, 0);

        handle.abort();
    }

    #[tokio::test]
    async fn concurrent_users_do_not_interfere() {
        let store: Arc<dyn ApplicationStore> = Arc::new(InMemoryApplicationStore::with_shards(3));
        let mut handles = Vec::new();
        for user_id in 0..64i64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut record = store.load(user_id).await;
                record.email = format!("user{user_id}@example.com");
                store.save(user_id, record).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.len().await, 64);
        for user_id in 0..64i64 {
            assert_eq!(
                store.load(user_id).await.email,
                format!("user{user_id}@example.com")
            );
        }
    }
}
