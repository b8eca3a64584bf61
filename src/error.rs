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

// Error types shared by the storage backends and the write pipeline

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Error, Debug)]
pub enum AuditError {
    /// Invalid or missing configuration detected at construction time
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unsupported storage backend: '{0}'")]
    UnsupportedBackend(String),

    #[error("invalid table name '{0}': only [A-Za-z0-9_] allowed, 1-40 characters")]
    InvalidTableName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache store error: {0}")]
    Cache(String),

    #[error("storage is closed")]
    Closed,

    #[error("no storage configured")]
    NoStorage,
}

impl From<redis::RedisError> for AuditError {
    fn from(err: redis::RedisError) -> Self {
        AuditError::Cache(err.to_string())
    }
}

impl AuditError {
    /// True for errors raised while building a backend from configuration
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            AuditError::Config(_) | AuditError::UnsupportedBackend(_) | AuditError::InvalidTableName(_)
        )
    }
}
