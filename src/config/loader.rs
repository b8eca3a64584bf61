// Configuration loader with environment variable substitution

use super::types::*;
use crate::storage::database::validate_table_name;
use crate::storage::StorageType;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<AuditConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::parse(&content)
    }

    /// Parse configuration text, substituting environment variables first
    pub fn parse(content: &str) -> Result<AuditConfig> {
        let content = Self::substitute_env_vars(content)?;

        let config: AuditConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${AUDIT_TABLE:-audit_logs} -> audit_logs (if AUDIT_TABLE not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
            .context("Invalid substitution pattern")?;

        let replaced = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    // Keep original if no default and var not found
                    None => format!("${{{}}}", var_name),
                },
            }
        });

        Ok(replaced.to_string())
    }

    /// Validate configuration
    pub fn validate(config: &AuditConfig) -> Result<()> {
        if config.writer.queue_size == 0 {
            bail!("writer.queue_size must be > 0");
        }

        if config.writer.workers == 0 {
            bail!("writer.workers must be > 0");
        }

        for (i, storage) in config.storage.iter().enumerate() {
            let storage_type = StorageType::parse(&storage.backend)
                .with_context(|| format!("storage[{}]", i))?;

            match storage_type {
                StorageType::File => {
                    let file = storage.file.as_ref().with_context(|| {
                        format!("storage[{}]: file backend selected but file config missing", i)
                    })?;
                    if file.path.trim().is_empty() {
                        bail!("storage[{}]: file.path cannot be empty", i);
                    }
                }
                StorageType::Database => {
                    let database = storage.database.as_ref().with_context(|| {
                        format!(
                            "storage[{}]: database backend selected but database config missing",
                            i
                        )
                    })?;
                    if database.url.trim().is_empty() {
                        bail!("storage[{}]: database.url cannot be empty", i);
                    }
                    validate_table_name(&database.table_name)
                        .with_context(|| format!("storage[{}]", i))?;
                }
                StorageType::Redis => {
                    let redis = storage.redis.as_ref().with_context(|| {
                        format!("storage[{}]: redis backend selected but redis config missing", i)
                    })?;
                    if redis.url.trim().is_empty() {
                        bail!("storage[{}]: redis.url cannot be empty", i);
                    }
                }
                StorageType::None => {}
            }
        }

        match config.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => bail!("logging.level '{}' is not one of trace, debug, info, warn, error", other),
        }

        Ok(())
    }
}
