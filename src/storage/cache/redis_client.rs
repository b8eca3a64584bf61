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

// Redis implementation of CacheClient

use super::client::{ttl_seconds, CacheClient};
use crate::error::{AuditError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

/// Cache client over a multiplexed, auto-reconnecting Redis connection
pub struct RedisCacheClient {
    conn: ConnectionManager,
    closed: AtomicBool,
}

impl RedisCacheClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!("Connected to Redis at {}", redacted(url));

        Ok(Self {
            conn,
            closed: AtomicBool::new(false),
        })
    }

    fn connection(&self) -> Result<ConnectionManager> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AuditError::Closed);
        }
        Ok(self.conn.clone())
    }
}

/// Strip credentials from a connection URL before logging it
fn redacted(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

fn score_bound(bound: Option<i64>, unbounded: &str) -> String {
    bound.map_or_else(|| unbounded.to_string(), |v| v.to_string())
}

#[async_trait]
impl CacheClient for RedisCacheClient {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection()?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.connection()?;
        let _: () = conn.set_ex(key, value, ttl_seconds(ttl)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection()?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection()?;
        let seconds = i64::try_from(ttl_seconds(ttl)).unwrap_or(i64::MAX);
        let _: bool = conn.expire(key, seconds).await?;
        Ok(())
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.connection()?;
        let _: i64 = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.connection()?;
        let removed: i64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn sorted_range_by_score_rev(
        &self,
        key: &str,
        min: Option<i64>,
        max: Option<i64>,
        count: usize,
    ) -> Result<Vec<String>> {
        let mut conn = self.connection()?;
        let count = isize::try_from(count).unwrap_or(isize::MAX);
        let members: Vec<String> = conn
            .zrevrangebyscore_limit(
                key,
                score_bound(max, "+inf"),
                score_bound(min, "-inf"),
                0,
                count,
            )
            .await?;
        Ok(members)
    }

    async fn sorted_range_all(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection()?;
        let members: Vec<String> = conn.zrange(key, 0, -1).await?;
        Ok(members)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // The manager drops its connection with the last clone.
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
