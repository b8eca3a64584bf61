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

// Relational database backend (PostgreSQL, MySQL, SQLite)

use super::backend::Storage;
use crate::config::DatabaseConfig;
use crate::error::{AuditError, Result};
use crate::filter::QueryFilter;
use crate::record::{EventResult, EventType, Record};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest accepted table name; keeps derived index names within identifier limits
pub const MAX_TABLE_NAME_LEN: usize = 40;

/// Record columns in insert/select order
const COLUMNS: [&str; 20] = [
    "event_type",
    "event_id",
    "user_id",
    "challenge_id",
    "session_id",
    "channel",
    "destination",
    "purpose",
    "resource",
    "result",
    "reason",
    "provider",
    "provider_message_id",
    "ip",
    "user_agent",
    "request_id",
    "trace_id",
    "timestamp",
    "duration_ms",
    "metadata",
];

const INDEXED_COLUMNS: [&str; 6] = [
    "user_id",
    "challenge_id",
    "session_id",
    "event_type",
    "timestamp",
    "created_at",
];

/// Reject anything but `[A-Za-z0-9_]{1,40}`
///
/// The table name is interpolated into SQL, so this runs before any statement
/// is built.
pub fn validate_table_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_TABLE_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(AuditError::InvalidTableName(name.to_string()))
    }
}

/// SQL dialect spoken by the connected database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    /// Detect the dialect from a connection URL scheme
    pub fn from_url(url: &str) -> Result<Self> {
        let lower = url.trim().to_ascii_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Ok(Dialect::Postgres)
        } else if lower.starts_with("mysql://") {
            Ok(Dialect::MySql)
        } else if lower.starts_with("sqlite:") {
            Ok(Dialect::Sqlite)
        } else {
            Err(AuditError::Config(
                "unsupported database URL, must start with postgres://, mysql:// or sqlite:"
                    .to_string(),
            ))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Bind placeholder for the 1-based parameter `n`
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", n),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }

    fn metadata_placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("CAST(${} AS JSONB)", n),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }

    /// Metadata is read back as text in every dialect
    fn metadata_select(&self) -> &'static str {
        match self {
            Dialect::Postgres => "metadata::text AS metadata",
            Dialect::MySql => "CAST(metadata AS CHAR) AS metadata",
            Dialect::Sqlite => "metadata",
        }
    }

    /// DDL for the audit table and its indexes, one statement per entry
    pub fn schema_statements(&self, table: &str) -> Vec<String> {
        let (id_column, metadata_type, created_at) = match self {
            Dialect::Postgres => (
                "id BIGSERIAL PRIMARY KEY",
                "JSONB",
                "created_at TIMESTAMP NOT NULL DEFAULT NOW()",
            ),
            Dialect::MySql => (
                "id BIGINT AUTO_INCREMENT PRIMARY KEY",
                "JSON",
                "created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP",
            ),
            Dialect::Sqlite => (
                "id INTEGER PRIMARY KEY AUTOINCREMENT",
                "TEXT",
                "created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP",
            ),
        };

        let mut columns = vec![
            id_column.to_string(),
            "event_type VARCHAR(50) NOT NULL".to_string(),
            "event_id VARCHAR(100)".to_string(),
            "user_id VARCHAR(100)".to_string(),
            "challenge_id VARCHAR(100)".to_string(),
            "session_id VARCHAR(100)".to_string(),
            "channel VARCHAR(20)".to_string(),
            "destination VARCHAR(255)".to_string(),
            "purpose VARCHAR(50)".to_string(),
            "resource VARCHAR(255)".to_string(),
            "result VARCHAR(20)".to_string(),
            "reason VARCHAR(255)".to_string(),
            "provider VARCHAR(50)".to_string(),
            "provider_message_id VARCHAR(255)".to_string(),
            "ip VARCHAR(45)".to_string(),
            "user_agent TEXT".to_string(),
            "request_id VARCHAR(100)".to_string(),
            "trace_id VARCHAR(100)".to_string(),
            "timestamp BIGINT NOT NULL".to_string(),
            "duration_ms BIGINT".to_string(),
            format!("metadata {}", metadata_type),
            created_at.to_string(),
        ];

        match self {
            // MySQL has no CREATE INDEX IF NOT EXISTS; declare them inline.
            Dialect::MySql => {
                columns.extend(
                    INDEXED_COLUMNS
                        .iter()
                        .map(|col| format!("INDEX idx_{}_{} ({})", table, col, col)),
                );
                vec![format!(
                    "CREATE TABLE IF NOT EXISTS {} ({}) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
                    table,
                    columns.join(", ")
                )]
            }
            Dialect::Postgres | Dialect::Sqlite => {
                let mut statements = vec![format!(
                    "CREATE TABLE IF NOT EXISTS {} ({})",
                    table,
                    columns.join(", ")
                )];
                statements.extend(INDEXED_COLUMNS.iter().map(|col| {
                    format!(
                        "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {}({})",
                        table, col, table, col
                    )
                }));
                statements
            }
        }
    }

    pub fn insert_sql(&self, table: &str) -> String {
        let placeholders: Vec<String> = (1..=COLUMNS.len())
            .map(|n| {
                if n == COLUMNS.len() {
                    self.metadata_placeholder(n)
                } else {
                    self.placeholder(n)
                }
            })
            .collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            COLUMNS.join(", "),
            placeholders.join(", ")
        )
    }

    /// SELECT for a normalized filter plus the values to bind, in order
    pub fn select_sql(&self, table: &str, filter: &QueryFilter) -> (String, Vec<SqlParam>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        let equality = [
            ("event_type", &filter.event_type),
            ("user_id", &filter.user_id),
            ("challenge_id", &filter.challenge_id),
            ("session_id", &filter.session_id),
            ("channel", &filter.channel),
            ("result", &filter.result),
            ("ip", &filter.ip),
        ];

        for (column, value) in equality {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                params.push(SqlParam::Text(value.to_string()));
                conditions.push(format!("{} = {}", column, self.placeholder(params.len())));
            }
        }

        if filter.start_time > 0 {
            params.push(SqlParam::Int(filter.start_time));
            conditions.push(format!("timestamp >= {}", self.placeholder(params.len())));
        }

        if filter.end_time > 0 {
            params.push(SqlParam::Int(filter.end_time));
            conditions.push(format!("timestamp <= {}", self.placeholder(params.len())));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        params.push(SqlParam::Int(filter.limit));
        let limit = self.placeholder(params.len());
        params.push(SqlParam::Int(filter.offset));
        let offset = self.placeholder(params.len());

        let columns: Vec<&str> = COLUMNS
            .iter()
            .map(|col| {
                if *col == "metadata" {
                    self.metadata_select()
                } else {
                    col
                }
            })
            .collect();

        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY timestamp DESC LIMIT {} OFFSET {}",
            columns.join(", "),
            table,
            where_clause,
            limit,
            offset
        );

        (sql, params)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value bound into a generated query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
}

/// Audit storage backed by a SQL table
pub struct DatabaseStorage {
    pool: AnyPool,
    dialect: Dialect,
    table_name: String,
}

impl DatabaseStorage {
    /// Connect using the URL in `config` and create the table if needed
    pub async fn connect(config: DatabaseConfig) -> Result<Self> {
        validate_table_name(&config.table_name)?;
        let dialect = Dialect::from_url(&config.url)?;

        sqlx::any::install_default_drivers();

        let mut options = AnyPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds.max(1)));

        // Every connection to an in-memory SQLite database is a separate database.
        if dialect == Dialect::Sqlite && config.url.contains(":memory:") {
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = options.connect(&config.url).await?;

        match Self::from_pool(pool.clone(), dialect, &config.table_name).await {
            Ok(storage) => {
                info!(
                    "Connected {} audit storage, table '{}'",
                    dialect, config.table_name
                );
                Ok(storage)
            }
            Err(e) => {
                pool.close().await;
                Err(e)
            }
        }
    }

    /// Use an existing pool; the table is created if it does not exist
    pub async fn from_pool(pool: AnyPool, dialect: Dialect, table_name: &str) -> Result<Self> {
        validate_table_name(table_name)?;

        let storage = Self {
            pool,
            dialect,
            table_name: table_name.to_string(),
        };
        storage.create_schema().await?;
        Ok(storage)
    }

    async fn create_schema(&self) -> Result<()> {
        // Some drivers reject multi-statement strings, so run them one by one.
        for statement in self.dialect.schema_statements(&self.table_name) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        debug!("Ensured audit table '{}'", self.table_name);
        Ok(())
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn decode_row(row: &AnyRow) -> std::result::Result<Record, sqlx::Error> {
    let event_type: String = row.try_get("event_type")?;
    let result: String = row.try_get("result")?;
    let result = EventResult::parse(&result)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown result '{}'", result).into()))?;

    let metadata: Option<String> = row.try_get("metadata")?;
    let metadata = match metadata.filter(|m| !m.is_empty()) {
        Some(json) => serde_json::from_str::<Map<String, Value>>(&json)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        None => Map::new(),
    };

    let duration_ms: Option<i64> = row.try_get("duration_ms")?;

    Ok(Record {
        event_type: EventType::from(event_type),
        event_id: non_empty(row.try_get("event_id")?),
        user_id: non_empty(row.try_get("user_id")?),
        challenge_id: non_empty(row.try_get("challenge_id")?),
        session_id: non_empty(row.try_get("session_id")?),
        channel: non_empty(row.try_get("channel")?),
        destination: non_empty(row.try_get("destination")?),
        purpose: non_empty(row.try_get("purpose")?),
        resource: non_empty(row.try_get("resource")?),
        result,
        reason: non_empty(row.try_get("reason")?),
        provider: non_empty(row.try_get("provider")?),
        provider_message_id: non_empty(row.try_get("provider_message_id")?),
        ip: non_empty(row.try_get("ip")?),
        user_agent: non_empty(row.try_get("user_agent")?),
        request_id: non_empty(row.try_get("request_id")?),
        trace_id: non_empty(row.try_get("trace_id")?),
        timestamp: row.try_get("timestamp")?,
        duration_ms: duration_ms.unwrap_or(0),
        metadata,
    })
}

#[async_trait]
impl Storage for DatabaseStorage {
    async fn write(&self, record: &Record) -> Result<()> {
        let metadata = if record.metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&record.metadata)?)
        };

        let sql = self.dialect.insert_sql(&self.table_name);

        sqlx::query(&sql)
            .bind(record.event_type.as_str().to_string())
            .bind(record.event_id.clone())
            .bind(record.user_id.clone())
            .bind(record.challenge_id.clone())
            .bind(record.session_id.clone())
            .bind(record.channel.clone())
            .bind(record.destination.clone())
            .bind(record.purpose.clone())
            .bind(record.resource.clone())
            .bind(record.result.as_str().to_string())
            .bind(record.reason.clone())
            .bind(record.provider.clone())
            .bind(record.provider_message_id.clone())
            .bind(record.ip.clone())
            .bind(record.user_agent.clone())
            .bind(record.request_id.clone())
            .bind(record.trace_id.clone())
            .bind(record.timestamp)
            .bind(record.duration_ms)
            .bind(metadata)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn query(&self, filter: &QueryFilter) -> Result<Vec<Record>> {
        let filter = filter.normalized();
        let (sql, params) = self.dialect.select_sql(&self.table_name, &filter);

        let mut query = sqlx::query(&sql);
        for param in params {
            query = match param {
                SqlParam::Text(value) => query.bind(value),
                SqlParam::Int(value) => query.bind(value),
            };
        }

        // A failure while streaming rows is fatal; a row that will not decode is not.
        let rows = query.fetch_all(&self.pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_row(row) {
                Ok(record) => records.push(record),
                Err(e) => debug!("Skipping undecodable audit row: {}", e),
            }
        }

        Ok(records)
    }

    async fn close(&self) -> Result<()> {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("Closed {} audit storage", self.dialect);
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Health check failed - database unreachable: {}", e);
                Ok(false)
            }
        }
    }

    fn backend_type(&self) -> &str {
        "database"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn create_test_storage() -> DatabaseStorage {
        DatabaseStorage::connect(DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("audit_logs").is_ok());
        assert!(validate_table_name("Audit2024").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("bad; drop table x").is_err());
        assert!(validate_table_name("audit-logs").is_err());
        assert!(validate_table_name("schema.table").is_err());
        assert!(validate_table_name(&"a".repeat(MAX_TABLE_NAME_LEN)).is_ok());
        assert!(validate_table_name(&"a".repeat(MAX_TABLE_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(Dialect::from_url("postgres://u@h/db").unwrap(), Dialect::Postgres);
        assert_eq!(Dialect::from_url("postgresql://u@h/db").unwrap(), Dialect::Postgres);
        assert_eq!(Dialect::from_url("mysql://u@h/db").unwrap(), Dialect::MySql);
        assert_eq!(Dialect::from_url("sqlite::memory:").unwrap(), Dialect::Sqlite);
        assert!(matches!(
            Dialect::from_url("oracle://h/db"),
            Err(AuditError::Config(_))
        ));
    }

    #[test]
    fn test_postgres_placeholder_numbering() {
        let filter = QueryFilter::new()
            .with_user_id("u1")
            .with_result("success")
            .with_time_range(100, 200)
            .normalized();

        let (sql, params) = Dialect::Postgres.select_sql("audit_logs", &filter);

        assert!(sql.contains("WHERE user_id = $1 AND result = $2 AND timestamp >= $3 AND timestamp <= $4"));
        assert!(sql.ends_with("ORDER BY timestamp DESC LIMIT $5 OFFSET $6"));
        assert!(sql.contains("metadata::text AS metadata"));
        assert_eq!(params.len(), 6);
        assert_eq!(params[0], SqlParam::Text("u1".to_string()));
        assert_eq!(params[4], SqlParam::Int(100));
    }

    #[test]
    fn test_question_mark_placeholders_and_absent_filters() {
        let filter = QueryFilter::new().normalized();
        let (sql, params) = Dialect::MySql.select_sql("audit_logs", &filter);

        assert!(!sql.contains("WHERE"));
        assert!(sql.ends_with("LIMIT ? OFFSET ?"));
        assert_eq!(params, vec![SqlParam::Int(100), SqlParam::Int(0)]);
    }

    #[test]
    fn test_insert_sql_per_dialect() {
        let pg = Dialect::Postgres.insert_sql("audit_logs");
        assert!(pg.contains("$19, CAST($20 AS JSONB)"));

        let sqlite = Dialect::Sqlite.insert_sql("audit_logs");
        assert_eq!(sqlite.matches('?').count(), 20);
    }

    #[test]
    fn test_schema_statements_are_separate() {
        let statements = Dialect::Sqlite.schema_statements("audit_logs");
        assert_eq!(statements.len(), 1 + INDEXED_COLUMNS.len());
        assert!(statements.iter().all(|s| !s.contains(';')));
        assert!(statements[0].contains("INTEGER PRIMARY KEY AUTOINCREMENT"));

        let mysql = Dialect::MySql.schema_statements("audit_logs");
        assert_eq!(mysql.len(), 1);
        assert!(mysql[0].contains("AUTO_INCREMENT"));
        assert!(mysql[0].contains("INDEX idx_audit_logs_created_at (created_at)"));

        let pg = Dialect::Postgres.schema_statements("audit_logs");
        assert!(pg[0].contains("BIGSERIAL"));
        assert!(pg[0].contains("metadata JSONB"));
    }

    #[tokio::test]
    async fn test_bad_table_name_rejected_before_connecting() {
        // The URL is unreachable; validation must fail first.
        let result = DatabaseStorage::connect(DatabaseConfig {
            url: "postgres://nobody@127.0.0.1:1/none".to_string(),
            table_name: "bad; drop table x".to_string(),
            ..Default::default()
        })
        .await;

        assert!(matches!(result, Err(AuditError::InvalidTableName(_))));
    }

    #[tokio::test]
    async fn test_write_and_query_round_trip() {
        let storage = create_test_storage().await;

        let record = Record::new(EventType::SendSuccess, EventResult::Success)
            .with_event_id("evt-1")
            .with_user_id("user-1")
            .with_challenge_id("ch-1")
            .with_channel("sms")
            .with_destination("138****8000")
            .with_provider("aliyun", "msg-9")
            .with_ip("10.1.1.1")
            .with_duration(42)
            .with_metadata("attempt", 3)
            .with_metadata("tags", json!(["a", "b"]))
            .with_timestamp(1_700_000_000);

        storage.write(&record).await.unwrap();

        let results = storage.query(&QueryFilter::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0], record);
    }

    #[tokio::test]
    async fn test_query_filters_and_order() {
        let storage = create_test_storage().await;

        for (ts, user, result) in [
            (100, "alice", EventResult::Success),
            (200, "bob", EventResult::Failure),
            (300, "alice", EventResult::Failure),
        ] {
            let record = Record::new(EventType::LoginFailed, result)
                .with_user_id(user)
                .with_timestamp(ts);
            storage.write(&record).await.unwrap();
        }

        let all = storage.query(&QueryFilter::default()).await.unwrap();
        let timestamps: Vec<i64> = all.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![300, 200, 100]);

        let alice = storage
            .query(&QueryFilter::new().with_user_id("alice"))
            .await
            .unwrap();
        assert_eq!(alice.len(), 2);

        let alice_failed = storage
            .query(&QueryFilter::new().with_user_id("alice").with_result("failure"))
            .await
            .unwrap();
        assert_eq!(alice_failed.len(), 1);
        assert_eq!(alice_failed[0].timestamp, 300);

        let ranged = storage
            .query(&QueryFilter::new().with_time_range(150, 300))
            .await
            .unwrap();
        assert_eq!(ranged.len(), 2);
    }

    #[tokio::test]
    async fn test_undecodable_row_skipped() {
        let storage = create_test_storage().await;

        storage
            .write(&Record::new(EventType::Logout, EventResult::Success).with_timestamp(10))
            .await
            .unwrap();

        sqlx::query("INSERT INTO audit_logs (event_type, result, timestamp) VALUES ('logout', 'bogus', 20)")
            .execute(storage.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO audit_logs (event_type, result, timestamp, metadata) VALUES ('logout', 'success', 30, '{not json')")
            .execute(storage.pool())
            .await
            .unwrap();

        let results = storage.query(&QueryFilter::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].timestamp, 10);
    }

    #[tokio::test]
    async fn test_custom_table_name() {
        let storage = DatabaseStorage::connect(DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            table_name: "otp_audit".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        assert_eq!(storage.table_name(), "otp_audit");
        assert_eq!(storage.dialect(), Dialect::Sqlite);
        storage
            .write(&Record::new(EventType::ChallengeCreated, EventResult::Pending))
            .await
            .unwrap();
        assert_eq!(storage.query(&QueryFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let storage = create_test_storage().await;
        assert!(storage.health_check().await.unwrap());

        storage.close().await.unwrap();
        storage.close().await.unwrap();
        assert!(!storage.health_check().await.unwrap());
    }
}
