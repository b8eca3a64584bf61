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

// Backend factory for creating storage backends from configuration

use super::backend::Storage;
use super::cache::CacheStorage;
use super::database::DatabaseStorage;
use super::file::FileStorage;
use super::multi::MultiStorage;
use super::noop::NoopStorage;
use crate::config::StorageConfig;
use crate::error::{AuditError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Backend kinds that can be built from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    File,
    Database,
    Redis,
    None,
}

impl StorageType {
    /// Parse a backend tag, case-insensitively; `db` is accepted for `database`
    pub fn parse(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StorageType::File),
            "database" | "db" => Ok(StorageType::Database),
            "redis" => Ok(StorageType::Redis),
            "none" => Ok(StorageType::None),
            _ => Err(AuditError::UnsupportedBackend(tag.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::File => "file",
            StorageType::Database => "database",
            StorageType::Redis => "redis",
            StorageType::None => "none",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct BackendFactory;

impl BackendFactory {
    /// Create storage backend from configuration
    pub async fn create(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
        let storage_type = StorageType::parse(&config.backend)?;

        let storage: Arc<dyn Storage> = match storage_type {
            StorageType::File => {
                let file = config
                    .file
                    .clone()
                    .ok_or_else(|| missing("file", "path"))?;
                if file.path.trim().is_empty() {
                    return Err(missing("file", "path"));
                }
                Arc::new(FileStorage::new(file).await?)
            }

            StorageType::Database => {
                let database = config
                    .database
                    .clone()
                    .ok_or_else(|| missing("database", "url"))?;
                if database.url.trim().is_empty() {
                    return Err(missing("database", "url"));
                }
                Arc::new(DatabaseStorage::connect(database).await?)
            }

            StorageType::Redis => {
                let redis = config
                    .redis
                    .clone()
                    .ok_or_else(|| missing("redis", "url"))?;
                if redis.url.trim().is_empty() {
                    return Err(missing("redis", "url"));
                }
                Arc::new(CacheStorage::connect(redis).await?)
            }

            StorageType::None => Arc::new(NoopStorage::new()),
        };

        info!("Created {} audit storage", storage_type);
        Ok(storage)
    }

    /// Create every configured backend and fan out over them
    ///
    /// Backends already opened are closed again if a later one fails.
    pub async fn create_multi(configs: &[StorageConfig]) -> Result<MultiStorage> {
        let mut backends = Vec::with_capacity(configs.len());

        for config in configs {
            match Self::create(config).await {
                Ok(backend) => backends.push(backend),
                Err(e) => {
                    for backend in &backends {
                        let _ = backend.close().await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(MultiStorage::new(backends))
    }

    /// Single backend for one entry, fan-out for several, no-op for none
    pub async fn create_all(configs: &[StorageConfig]) -> Result<Arc<dyn Storage>> {
        match configs {
            [] => Ok(Arc::new(NoopStorage::new())),
            [single] => Self::create(single).await,
            many => Ok(Arc::new(Self::create_multi(many).await?)),
        }
    }
}

fn missing(backend: &str, option: &str) -> AuditError {
    AuditError::Config(format!("{} backend requires {}.{}", backend, backend, option))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, FileConfig, RedisConfig};
    use tempfile::TempDir;

    #[test]
    fn test_parse_storage_type() {
        assert_eq!(StorageType::parse("file").unwrap(), StorageType::File);
        assert_eq!(StorageType::parse("FILE").unwrap(), StorageType::File);
        assert_eq!(StorageType::parse("db").unwrap(), StorageType::Database);
        assert_eq!(StorageType::parse("Database").unwrap(), StorageType::Database);
        assert_eq!(StorageType::parse("redis").unwrap(), StorageType::Redis);
        assert_eq!(StorageType::parse("none").unwrap(), StorageType::None);
        assert!(matches!(
            StorageType::parse("cassandra"),
            Err(AuditError::UnsupportedBackend(_))
        ));
    }

    #[tokio::test]
    async fn test_create_file_backend() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig::file(FileConfig {
            path: temp_dir.path().join("audit.jsonl").display().to_string(),
            ..Default::default()
        });

        let backend = BackendFactory::create(&config).await.unwrap();
        assert_eq!(backend.backend_type(), "file");
    }

    #[tokio::test]
    async fn test_create_database_backend() {
        let config = StorageConfig::database(DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        });

        let backend = BackendFactory::create(&config).await.unwrap();
        assert_eq!(backend.backend_type(), "database");
    }

    #[tokio::test]
    async fn test_create_none_backend() {
        let backend = BackendFactory::create(&StorageConfig::none()).await.unwrap();
        assert_eq!(backend.backend_type(), "none");
    }

    #[tokio::test]
    async fn test_missing_options_fail_fast() {
        let config = StorageConfig {
            backend: "file".to_string(),
            ..Default::default()
        };
        let err = BackendFactory::create(&config).await.err().unwrap();
        assert!(err.is_config());

        let config = StorageConfig::database(DatabaseConfig::default());
        let err = BackendFactory::create(&config).await.err().unwrap();
        assert!(err.to_string().contains("database.url"));

        let config = StorageConfig::redis(RedisConfig {
            url: String::new(),
            ..Default::default()
        });
        assert!(BackendFactory::create(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_create_unknown_backend() {
        let config = StorageConfig {
            backend: "unknown_backend".to_string(),
            ..Default::default()
        };

        let err = BackendFactory::create(&config).await.err().unwrap();
        assert!(err.to_string().contains("unsupported storage backend"));
    }

    #[tokio::test]
    async fn test_create_multi() {
        let temp_dir = TempDir::new().unwrap();
        let configs = vec![
            StorageConfig::file(FileConfig {
                path: temp_dir.path().join("audit.jsonl").display().to_string(),
                ..Default::default()
            }),
            StorageConfig::database(DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                ..Default::default()
            }),
        ];

        let multi = BackendFactory::create_multi(&configs).await.unwrap();
        assert_eq!(multi.len(), 2);
        assert_eq!(multi.backends()[0].backend_type(), "file");

        let all = BackendFactory::create_all(&configs).await.unwrap();
        assert_eq!(all.backend_type(), "multi");

        let empty = BackendFactory::create_all(&[]).await.unwrap();
        assert_eq!(empty.backend_type(), "none");
    }
}
