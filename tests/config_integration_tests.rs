// Configuration system integration tests

use audit_store::config::{load_config, load_config_with_env, ConfigLoader};
use audit_store::storage::{BackendFactory, StorageType};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_load_default_config() {
    let config_path = PathBuf::from("config/audit.yaml");

    if config_path.exists() {
        let result = load_config(&config_path);
        assert!(result.is_ok(), "Failed to load default config: {:?}", result.err());

        let config = result.unwrap();

        // Verify defaults
        assert!(config.logger.enabled);
        assert!(config.logger.mask_destination);
        assert_eq!(config.logger.ttl_seconds, 604800);
        assert_eq!(config.writer.queue_size, 1000);
        assert_eq!(config.writer.workers, 2);
        assert_eq!(config.storage.len(), 2);
        assert_eq!(config.storage[0].backend, "file");
        assert_eq!(config.storage[1].backend, "database");
    }
}

#[test]
fn test_config_with_env_vars() {
    let temp_config = r#"
writer:
  queue_size: ${AUDIT_CFG_TEST_QUEUE:-500}
  workers: 4

storage:
  - backend: db
    database:
      url: "${AUDIT_CFG_TEST_DB_URL:-sqlite::memory:}"
      table_name: ${AUDIT_CFG_TEST_TABLE:-otp_audit}

  - backend: redis
    redis:
      url: ${AUDIT_CFG_TEST_REDIS}
      key_prefix: "otp:"
      ttl_seconds: 3600

logging:
  level: debug
  format: json
"#;

    std::env::set_var("AUDIT_CFG_TEST_REDIS", "redis://cache:6379/2");
    std::env::remove_var("AUDIT_CFG_TEST_QUEUE");

    let config = ConfigLoader::parse(temp_config).expect("Failed to parse config");

    assert_eq!(config.writer.queue_size, 500);
    assert_eq!(config.writer.workers, 4);
    assert_eq!(config.writer.stop_timeout_ms, 10_000);

    let database = config.storage[0].database.as_ref().unwrap();
    assert_eq!(StorageType::parse(&config.storage[0].backend).unwrap(), StorageType::Database);
    assert_eq!(database.url, "sqlite::memory:");
    assert_eq!(database.table_name, "otp_audit");
    assert_eq!(database.max_connections, 10);

    let redis = config.storage[1].redis.as_ref().unwrap();
    assert_eq!(redis.url, "redis://cache:6379/2");
    assert_eq!(redis.key_prefix, "otp:");
    assert_eq!(redis.ttl_seconds, 3600);
    assert!(redis.expire_index);

    assert_eq!(config.logging.format, "json");

    std::env::remove_var("AUDIT_CFG_TEST_REDIS");
}

#[test]
fn test_env_overrides_apply_to_matching_backends() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("audit.yaml");
    fs::write(
        &config_path,
        r#"
storage:
  - backend: file
    file:
      path: /tmp/original.jsonl
  - backend: database
    database:
      url: postgres://localhost/original
"#,
    )
    .unwrap();

    let override_path = temp_dir.path().join("override.jsonl");
    std::env::set_var("AUDIT_FILE_PATH", override_path.display().to_string());
    std::env::set_var("AUDIT_DATABASE_URL", "mysql://localhost/override");

    let config = load_config_with_env(&config_path).unwrap();

    std::env::remove_var("AUDIT_FILE_PATH");
    std::env::remove_var("AUDIT_DATABASE_URL");

    assert_eq!(
        config.storage[0].file.as_ref().unwrap().path,
        override_path.display().to_string()
    );
    assert_eq!(
        config.storage[1].database.as_ref().unwrap().url,
        "mysql://localhost/override"
    );
}

#[test]
fn test_invalid_configs_rejected() {
    let invalid = [
        // unknown backend
        "storage:\n  - backend: cassandra\n",
        // missing section
        "storage:\n  - backend: redis\n",
        // unsafe table name
        "storage:\n  - backend: database\n    database:\n      url: \"sqlite::memory:\"\n      table_name: \"x; drop table y\"\n",
        // zero workers
        "writer:\n  workers: 0\n",
        // bad log level
        "logging:\n  level: loud\n",
    ];

    for content in invalid {
        assert!(ConfigLoader::parse(content).is_err(), "accepted: {}", content);
    }
}

#[test]
fn test_missing_file() {
    let result = load_config("/nonexistent/audit.yaml");
    assert!(result.is_err());
}

#[tokio::test]
async fn test_config_builds_backends() {
    let temp_dir = TempDir::new().unwrap();
    let content = format!(
        r#"
storage:
  - backend: FILE
    file:
      path: {}
  - backend: database
    database:
      url: "sqlite::memory:"
"#,
        temp_dir.path().join("audit.jsonl").display()
    );

    let config = ConfigLoader::parse(&content).unwrap();
    let storage = BackendFactory::create_all(&config.storage).await.unwrap();

    assert_eq!(storage.backend_type(), "multi");
    storage.close().await.unwrap();
}

#[test]
fn test_redis_ttl_inherits_logger_ttl() {
    let config = ConfigLoader::parse(
        r#"
logger:
  ttl_seconds: 86400

storage:
  - backend: redis
    redis:
      url: redis://cache:6379
  - backend: redis
    redis:
      url: redis://cache:6379
      ttl_seconds: 60
  - backend: file
    file:
      path: /tmp/audit.jsonl
"#,
    )
    .expect("Failed to parse config");

    assert_eq!(config.storage[0].redis.as_ref().unwrap().ttl_seconds, 0);

    let effective = config.effective_storage();
    assert_eq!(effective.len(), 3);
    assert_eq!(effective[0].redis.as_ref().unwrap().ttl_seconds, 86400);
    assert_eq!(effective[1].redis.as_ref().unwrap().ttl_seconds, 60);
    assert!(effective[2].redis.is_none());
}
