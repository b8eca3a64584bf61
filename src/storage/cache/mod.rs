// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Cache-store backend: one key per record plus a time-sorted index
//
// Layout:
//   <prefix><timestamp>:<id>  -> JSON record, with TTL
//   <prefix>index             -> sorted set of record keys scored by timestamp

mod client;
mod memory;
mod redis_client;

pub use client::CacheClient;
pub use memory::MemoryCacheClient;
pub use redis_client::RedisCacheClient;

use super::backend::Storage;
use crate::config::RedisConfig;
use crate::error::Result;
use crate::filter::{paginate, QueryFilter};
use crate::record::Record;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_KEY_PREFIX: &str = "audit:";
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Extra index entries read per query to make up for filtered-out records
const OVER_READ: usize = 100;

pub struct CacheStorage {
    client: Arc<dyn CacheClient>,
    key_prefix: String,
    ttl: Duration,
    expire_index: bool,
}

impl CacheStorage {
    /// Wrap an existing client; empty prefix and zero TTL fall back to defaults
    pub fn new(client: Arc<dyn CacheClient>, config: &RedisConfig) -> Self {
        let key_prefix = if config.key_prefix.is_empty() {
            DEFAULT_KEY_PREFIX.to_string()
        } else {
            config.key_prefix.clone()
        };
        let ttl = if config.ttl_seconds == 0 {
            DEFAULT_TTL
        } else {
            config.ttl()
        };

        Self {
            client,
            key_prefix,
            ttl,
            expire_index: config.expire_index,
        }
    }

    /// Connect to the Redis server named by `config.url`
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let client = RedisCacheClient::connect(&config.url).await?;
        client.ping().await?;
        Ok(Self::new(Arc::new(client), &config))
    }

    /// Backed by a process-local `MemoryCacheClient`
    pub fn in_memory(config: &RedisConfig) -> Self {
        Self::new(Arc::new(MemoryCacheClient::new()), config)
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn index_key(&self) -> String {
        format!("{}index", self.key_prefix)
    }

    /// Storage key for a record
    ///
    /// The discriminator is the first of event id, challenge id, user id that
    /// is set; records with none of them get a random UUID so two of them at
    /// the same second do not overwrite each other.
    pub fn record_key(&self, record: &Record) -> String {
        let discriminator = [&record.event_id, &record.challenge_id, &record.user_id]
            .into_iter()
            .find_map(|id| id.as_deref().filter(|id| !id.is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        format!("{}{}:{}", self.key_prefix, record.timestamp, discriminator)
    }

    /// Remove index entries whose record key has expired
    ///
    /// Returns how many pointers were removed.
    pub async fn cleanup(&self) -> Result<u64> {
        let index_key = self.index_key();
        let keys = self.client.sorted_range_all(&index_key).await?;

        let mut removed = 0;
        for key in keys {
            match self.client.exists(&key).await {
                Ok(true) => {}
                Ok(false) => {
                    if self.client.sorted_remove(&index_key, &key).await? {
                        removed += 1;
                    }
                }
                Err(e) => debug!("Skipping index entry '{}': {}", key, e),
            }
        }

        if removed > 0 {
            info!("Removed {} stale entries from '{}'", removed, index_key);
        }

        Ok(removed)
    }
}

#[async_trait]
impl Storage for CacheStorage {
    async fn write(&self, record: &Record) -> Result<()> {
        let key = self.record_key(record);
        let data = serde_json::to_vec(record)?;

        self.client.set_with_ttl(&key, &data, self.ttl).await?;

        let index_key = self.index_key();
        self.client
            .sorted_add(&index_key, &key, record.timestamp as f64)
            .await?;

        if self.expire_index {
            self.client.expire(&index_key, self.ttl).await?;
        }

        Ok(())
    }

    async fn query(&self, filter: &QueryFilter) -> Result<Vec<Record>> {
        let filter = filter.normalized();
        let index_key = self.index_key();

        let min = (filter.start_time > 0).then_some(filter.start_time);
        let max = (filter.end_time > 0).then_some(filter.end_time);
        let count = filter.limit_usize() + filter.offset_usize() + OVER_READ;

        let keys = self
            .client
            .sorted_range_by_score_rev(&index_key, min, max, count)
            .await?;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let data = match self.client.get(&key).await {
                Ok(Some(data)) => data,
                Ok(None) => {
                    // Expired record, drop its index pointer.
                    if let Err(e) = self.client.sorted_remove(&index_key, &key).await {
                        debug!("Failed to remove stale index entry '{}': {}", key, e);
                    }
                    continue;
                }
                Err(e) => {
                    debug!("Failed to read '{}': {}", key, e);
                    continue;
                }
            };

            match Record::from_json(&data) {
                Ok(record) if filter.matches(&record) => records.push(record),
                Ok(_) => {}
                Err(e) => debug!("Skipping undecodable value at '{}': {}", key, e),
            }
        }

        Ok(paginate(records, &filter))
    }

    async fn close(&self) -> Result<()> {
        self.client.close().await
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Health check failed - cache store unreachable: {}", e);
                Ok(false)
            }
        }
    }

    fn backend_type(&self) -> &str {
        "redis"
    }
}
