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

use anyhow::{bail, Context, Result};
use audit_store::config::{AuditConfig, LoggingConfig};
use audit_store::storage::{BackendFactory, CacheStorage, FileStorage, Storage, StorageType};
use audit_store::{load_config_with_env, QueryFilter};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Audit Store - inspect and maintain audit log storage
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/audit.yaml")]
    config: PathBuf,

    /// Log format (overrides config file): text or json
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print matching records as JSON lines, newest first
    Query(QueryArgs),
    /// Rotate every configured file backend
    Rotate,
    /// Drop index entries for expired records in every Redis backend
    Cleanup,
    /// Check that every configured backend is reachable
    Health,
}

#[derive(ClapArgs, Debug)]
struct QueryArgs {
    #[arg(long)]
    event_type: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    challenge_id: Option<String>,
    #[arg(long)]
    session_id: Option<String>,
    #[arg(long)]
    channel: Option<String>,
    #[arg(long)]
    result: Option<String>,
    #[arg(long)]
    ip: Option<String>,
    /// Inclusive lower bound, Unix seconds
    #[arg(long, default_value_t = 0)]
    start: i64,
    /// Inclusive upper bound, Unix seconds
    #[arg(long, default_value_t = 0)]
    end: i64,
    #[arg(long, default_value_t = 100)]
    limit: i64,
    #[arg(long, default_value_t = 0)]
    offset: i64,
}

impl From<QueryArgs> for QueryFilter {
    fn from(args: QueryArgs) -> Self {
        QueryFilter {
            event_type: args.event_type,
            user_id: args.user_id,
            challenge_id: args.challenge_id,
            session_id: args.session_id,
            channel: args.channel,
            result: args.result,
            ip: args.ip,
            start_time: args.start,
            end_time: args.end,
            limit: args.limit,
            offset: args.offset,
        }
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(logging.level.to_lowercase()))
        .context("Invalid log level")?;

    // Logs go to stderr so query output stays machine-readable.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match logging.format.to_lowercase().as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

async fn run_query(config: &AuditConfig, args: QueryArgs) -> Result<()> {
    let storage = BackendFactory::create_all(&config.effective_storage())
        .await
        .context("Failed to open storage")?;

    let filter = QueryFilter::from(args);
    let records = storage.query(&filter).await;
    storage.close().await?;

    for record in records? {
        println!("{}", record.to_json()?);
    }
    Ok(())
}

async fn run_rotate(config: &AuditConfig) -> Result<()> {
    let mut rotated = 0;

    for storage_config in &config.storage {
        if StorageType::parse(&storage_config.backend)? != StorageType::File {
            continue;
        }
        let Some(file_config) = storage_config.file.clone() else {
            continue;
        };

        let storage = FileStorage::new(file_config).await?;
        let archived = storage.rotate().await?;
        storage.close().await?;

        println!("{} -> {}", storage.path().display(), archived.display());
        rotated += 1;
    }

    if rotated == 0 {
        warn!("No file backends configured, nothing to rotate");
    }
    Ok(())
}

async fn run_cleanup(config: &AuditConfig) -> Result<()> {
    let mut cleaned = 0;

    for storage_config in &config.storage {
        if StorageType::parse(&storage_config.backend)? != StorageType::Redis {
            continue;
        }
        let Some(redis_config) = storage_config.redis.clone() else {
            continue;
        };

        let storage = CacheStorage::connect(redis_config).await?;
        let removed = storage.cleanup().await?;
        storage.close().await?;

        println!("{}: removed {} stale index entries", storage.index_key(), removed);
        cleaned += 1;
    }

    if cleaned == 0 {
        warn!("No redis backends configured, nothing to clean up");
    }
    Ok(())
}

async fn run_health(config: &AuditConfig) -> Result<()> {
    let mut unhealthy = 0;

    for (i, storage_config) in config.effective_storage().iter().enumerate() {
        let healthy = match BackendFactory::create(storage_config).await {
            Ok(storage) => {
                let healthy = storage.health_check().await.unwrap_or(false);
                storage.close().await?;
                healthy
            }
            Err(e) => {
                warn!("storage[{}] ({}) failed to open: {}", i, storage_config.backend, e);
                false
            }
        };

        println!(
            "storage[{}] {}: {}",
            i,
            storage_config.backend,
            if healthy { "ok" } else { "unhealthy" }
        );
        if !healthy {
            unhealthy += 1;
        }
    }

    if unhealthy > 0 {
        bail!("{} storage backend(s) unhealthy", unhealthy);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file
    let mut config = load_config_with_env(&args.config)?;

    // Apply CLI overrides
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    init_tracing(&config.logging)?;

    info!("Loaded configuration from: {:?}", args.config);
    info!("Storage backends: {}", config.storage.len());

    match args.command {
        Command::Query(query) => run_query(&config, query).await,
        Command::Rotate => run_rotate(&config).await,
        Command::Cleanup => run_cleanup(&config).await,
        Command::Health => run_health(&config).await,
    }
}
