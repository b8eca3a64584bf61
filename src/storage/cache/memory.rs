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

// In-process CacheClient with expiry, for tests and single-process deployments

use super::client::CacheClient;
use crate::error::{AuditError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

enum Value {
    Bytes(Vec<u8>),
    Sorted(HashMap<String, f64>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
pub struct MemoryCacheClient {
    entries: DashMap<String, Entry>,
    closed: AtomicBool,
}

impl MemoryCacheClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a key outright, as if it had expired
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(AuditError::Closed)
        } else {
            Ok(())
        }
    }

    /// Drop `key` if its TTL has passed
    fn evict_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }

    fn sorted_members(&self, key: &str) -> Result<Vec<(String, f64)>> {
        self.evict_expired(key);
        match self.entries.get(key) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                Value::Sorted(set) => Ok(set.iter().map(|(m, s)| (m.clone(), *s)).collect()),
                Value::Bytes(_) => Err(wrong_type(key)),
            },
        }
    }
}

fn wrong_type(key: &str) -> AuditError {
    AuditError::Cache(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

/// Expiry instant for `ttl` from now; `None` (never) if it does not fit in an `Instant`
fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

/// Score ascending, ties broken by member name
fn by_score(a: &(String, f64), b: &(String, f64)) -> CmpOrdering {
    a.1.partial_cmp(&b.1)
        .unwrap_or(CmpOrdering::Equal)
        .then_with(|| a.0.cmp(&b.0))
}

#[async_trait]
impl CacheClient for MemoryCacheClient {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        self.evict_expired(key);
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Bytes(bytes) => Ok(Some(bytes.clone())),
                Value::Sorted(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.check_open()?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(value.to_vec()),
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_open()?;
        self.evict_expired(key);
        Ok(self.entries.contains_key(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.check_open()?;
        self.evict_expired(key);
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = deadline(ttl);
        }
        Ok(())
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.check_open()?;
        self.evict_expired(key);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Sorted(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Sorted(set) => {
                set.insert(member.to_string(), score);
                Ok(())
            }
            Value::Bytes(_) => Err(wrong_type(key)),
        }
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool> {
        self.check_open()?;
        self.evict_expired(key);
        match self.entries.get_mut(key) {
            None => Ok(false),
            Some(mut entry) => match &mut entry.value {
                Value::Sorted(set) => Ok(set.remove(member).is_some()),
                Value::Bytes(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn sorted_range_by_score_rev(
        &self,
        key: &str,
        min: Option<i64>,
        max: Option<i64>,
        count: usize,
    ) -> Result<Vec<String>> {
        self.check_open()?;
        let mut members: Vec<(String, f64)> = self
            .sorted_members(key)?
            .into_iter()
            .filter(|(_, score)| min.map_or(true, |min| *score >= min as f64))
            .filter(|(_, score)| max.map_or(true, |max| *score <= max as f64))
            .collect();

        members.sort_by(|a, b| by_score(b, a));
        Ok(members.into_iter().take(count).map(|(m, _)| m).collect())
    }

    async fn sorted_range_all(&self, key: &str) -> Result<Vec<String>> {
        self.check_open()?;
        let mut members = self.sorted_members(key)?;
        members.sort_by(by_score);
        Ok(members.into_iter().map(|(m, _)| m).collect())
    }

    async fn ping(&self) -> Result<()> {
        self.check_open()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
