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

// Configuration types for audit-store

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub logger: LoggerConfig,

    #[serde(default)]
    pub writer: WriterConfig,

    /// Backends to write to; more than one entry fans out
    #[serde(default)]
    pub storage: Vec<StorageConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AuditConfig {
    /// Storage entries with the logger TTL filled into redis entries that
    /// do not set their own
    pub fn effective_storage(&self) -> Vec<StorageConfig> {
        self.storage
            .iter()
            .cloned()
            .map(|mut entry| {
                if let Some(redis) = entry.redis.as_mut() {
                    if redis.ttl_seconds == 0 {
                        redis.ttl_seconds = self.logger.ttl_seconds;
                    }
                }
                entry
            })
            .collect()
    }
}

/// Settings for the logger facade
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Mask phone numbers / email addresses before they are stored
    #[serde(default = "default_true")]
    pub mask_destination: bool,

    /// Retention for backends that support expiry; used by redis entries
    /// that leave their own `ttl_seconds` unset
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mask_destination: true,
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

impl LoggerConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Async writer pool settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WriterConfig {
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            workers: default_workers(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl WriterConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Replace zero values with defaults
    pub fn sanitized(&self) -> Self {
        Self {
            queue_size: if self.queue_size == 0 {
                default_queue_size()
            } else {
                self.queue_size
            },
            workers: if self.workers == 0 {
                default_workers()
            } else {
                self.workers
            },
            stop_timeout_ms: if self.stop_timeout_ms == 0 {
                default_stop_timeout_ms()
            } else {
                self.stop_timeout_ms
            },
        }
    }
}

/// One storage backend: a type tag plus the options for that type
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Backend type: "file", "database" (or "db"), "redis", "none"
    pub backend: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,
}

impl StorageConfig {
    pub fn file(config: FileConfig) -> Self {
        Self {
            backend: "file".to_string(),
            file: Some(config),
            ..Default::default()
        }
    }

    pub fn database(config: DatabaseConfig) -> Self {
        Self {
            backend: "database".to_string(),
            database: Some(config),
            ..Default::default()
        }
    }

    pub fn redis(config: RedisConfig) -> Self {
        Self {
            backend: "redis".to_string(),
            redis: Some(config),
            ..Default::default()
        }
    }

    pub fn none() -> Self {
        Self {
            backend: "none".to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileConfig {
    pub path: String,

    /// Lines longer than this are rejected on write and skipped on read
    #[serde(default = "default_max_record_size")]
    pub max_record_size: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: "/var/log/audit/audit.jsonl".to_string(),
            max_record_size: default_max_record_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// postgres://, postgresql://, mysql:// or sqlite: URL
    pub url: String,

    #[serde(default = "default_table_name")]
    pub table_name: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            table_name: default_table_name(),
            max_connections: default_max_connections(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    pub url: String,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// 0 inherits `logger.ttl_seconds`
    #[serde(default)]
    pub ttl_seconds: u64,

    /// Give the sorted index the same TTL as the records
    #[serde(default = "default_true")]
    pub expire_index: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: default_key_prefix(),
            ttl_seconds: 0,
            expire_index: true,
        }
    }
}

impl RedisConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_ttl_seconds() -> u64 { 7 * 24 * 60 * 60 }
fn default_queue_size() -> usize { 1000 }
fn default_workers() -> usize { 2 }
fn default_stop_timeout_ms() -> u64 { 10_000 }
fn default_max_record_size() -> usize { 1024 * 1024 }
fn default_table_name() -> String { "audit_logs".to_string() }
fn default_max_connections() -> u32 { 10 }
fn default_connect_timeout() -> u64 { 5 }
fn default_key_prefix() -> String { "audit:".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
