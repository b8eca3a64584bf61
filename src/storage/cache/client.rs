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

// Key-value / sorted-set operations the cache-store backend needs

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Minimal Redis-style command surface
///
/// Score bounds are inclusive; `None` means unbounded on that side.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Value stored at `key`, `None` if missing or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<()>;

    /// Returns true if the member was present
    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool>;

    /// Members with `min <= score <= max`, highest score first, at most `count`
    async fn sorted_range_by_score_rev(
        &self,
        key: &str,
        min: Option<i64>,
        max: Option<i64>,
        count: usize,
    ) -> Result<Vec<String>>;

    /// Every member, lowest score first
    async fn sorted_range_all(&self, key: &str) -> Result<Vec<String>>;

    async fn ping(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// TTL rounded up to whole seconds, never below one
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_seconds_rounds_up() {
        assert_eq!(ttl_seconds(Duration::from_secs(60)), 60);
        assert_eq!(ttl_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_seconds(Duration::from_millis(10)), 1);
        assert_eq!(ttl_seconds(Duration::ZERO), 1);
    }
}
