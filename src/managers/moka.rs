use crate::{CacheStore, Result};

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use moka::{future::Cache, Expiry};

/// Longest lifetime handed to moka, which caps expiries at 1000 years.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// How an entry's expiry changes when it is written.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Lifetime {
    Forever,
    For(Duration),
    Unchanged,
}

#[derive(Debug)]
struct Entry {
    data: Vec<u8>,
    lifetime: Lifetime,
}

struct EntryExpiry;

impl Expiry<String, Arc<Entry>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<Entry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        match value.lifetime {
            Lifetime::For(ttl) => Some(ttl),
            Lifetime::Forever | Lifetime::Unchanged => None,
        }
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<Entry>,
        _updated_at: Instant,
        duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        match value.lifetime {
            Lifetime::For(ttl) => Some(ttl),
            Lifetime::Forever => None,
            Lifetime::Unchanged => duration_until_expiry,
        }
    }
}

/// Implements [`CacheStore`] with [`moka`](https://github.com/moka-rs/moka) as the backend.
///
/// Entries expire after their own ttl and counters are incremented atomically.
#[cfg_attr(docsrs, doc(cfg(feature = "manager-moka")))]
#[derive(Clone)]
pub struct MokaStore {
    cache: Arc<Cache<String, Arc<Entry>>>,
}

impl fmt::Debug for MokaStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MokaStore")
            .field("entries", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl Default for MokaStore {
    fn default() -> Self {
        Self::with_capacity(10_000)
    }
}

impl MokaStore {
    /// Creates a store holding at most `capacity` entries.
    pub fn with_capacity(capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .expire_after(EntryExpiry)
            .build();
        Self { cache: Arc::new(cache) }
    }

    /// Clears out the entire cache.
    pub async fn clear(&self) -> Result<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheStore for MokaStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.cache.get(key).await.map(|entry| entry.data.clone()))
    }

    async fn set(
        &self,
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let lifetime =
            ttl.map_or(Lifetime::Forever, |ttl| Lifetime::For(ttl.min(MAX_TTL)));
        self.cache.insert(key, Arc::new(Entry { data: value, lifetime })).await;
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key).await;
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn increment(&self, key: &str, step: u64) -> Result<Option<u64>> {
        let entry = self
            .cache
            .entry(key.to_string())
            .and_upsert_with(|existing| {
                let current = existing
                    .and_then(|e| {
                        std::str::from_utf8(&e.value().data)
                            .ok()
                            .and_then(|s| s.parse::<u64>().ok())
                    })
                    .unwrap_or(0);
                let data = current.saturating_add(step).to_string().into_bytes();
                std::future::ready(Arc::new(Entry {
                    data,
                    lifetime: Lifetime::Unchanged,
                }))
            })
            .await;
        let count = std::str::from_utf8(&entry.value().data)?.parse::<u64>()?;
        Ok(Some(count))
    }
}
