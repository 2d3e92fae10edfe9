use std::{path::PathBuf, time::Duration};

use crate::{unix_now, CacheStore, Result};

use serde::{Deserialize, Serialize};

/// Implements [`CacheStore`] with [`cacache`](https://github.com/zkat/cacache-rs) as the backend.
///
/// Expiry is checked on read; expired entries are removed lazily.
#[cfg_attr(docsrs, doc(cfg(feature = "manager-cacache")))]
#[derive(Debug, Clone)]
pub struct CacacheStore {
    /// Directory where the cache will be stored.
    pub path: PathBuf,
}

impl Default for CacacheStore {
    fn default() -> Self {
        Self { path: "./http-kernel-cache".into() }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct Envelope {
    expires_at: Option<u64>,
    data: Vec<u8>,
}

impl CacacheStore {
    /// Creates a store rooted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Clears out the entire cache.
    pub async fn clear(&self) -> Result<()> {
        cacache::clear(&self.path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheStore for CacacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let envelope: Envelope = match cacache::read(&self.path, key).await {
            Ok(d) => postcard::from_bytes(&d)?,
            Err(_e) => {
                return Ok(None);
            }
        };
        if envelope.expires_at.is_some_and(|at| at <= unix_now()) {
            log::debug!("Removing expired cache entry {key}");
            self.delete(key).await?;
            return Ok(None);
        }
        Ok(Some(envelope.data))
    }

    async fn set(
        &self,
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let envelope = Envelope {
            expires_at: ttl.map(|ttl| unix_now().saturating_add(ttl.as_secs())),
            data: value,
        };
        let bytes = postcard::to_allocvec(&envelope)?;
        cacache::write(&self.path, key, bytes).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        Ok(cacache::remove(&self.path, key).await?)
    }
}
