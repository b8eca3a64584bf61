// Configuration module for audit-store
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AuditConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
///
/// `AUDIT_FILE_PATH`, `AUDIT_DATABASE_URL` and `AUDIT_REDIS_URL` replace the
/// matching option of every configured backend of that type.
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<AuditConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

fn apply_env_overrides(config: &mut AuditConfig) {
    let file_path = std::env::var("AUDIT_FILE_PATH").ok();
    let database_url = std::env::var("AUDIT_DATABASE_URL").ok();
    let redis_url = std::env::var("AUDIT_REDIS_URL").ok();

    for storage in &mut config.storage {
        if let (Some(path), Some(file)) = (&file_path, storage.file.as_mut()) {
            file.path = path.clone();
        }
        if let (Some(url), Some(database)) = (&database_url, storage.database.as_mut()) {
            database.url = url.clone();
        }
        if let (Some(url), Some(redis)) = (&redis_url, storage.redis.as_mut()) {
            redis.url = url.clone();
        }
    }
}
