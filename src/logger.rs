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

// Audit logger facade
//
// Fills in the timestamp, masks the destination and hands the record either
// straight to a storage backend or to an AsyncWriter.

use crate::config::{AuditConfig, LoggerConfig, WriterConfig};
use crate::error::{AuditError, Result};
use crate::filter::QueryFilter;
use crate::mask::mask_destination;
use crate::record::{EventResult, EventType, Record};
use crate::storage::{BackendFactory, Storage};
use crate::writer::{AsyncWriter, WriterStats};
use std::sync::Arc;
use tracing::error;

/// `(destination, channel) -> masked destination`
pub type MaskFn = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Current Unix time in seconds
pub type ClockFn = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Observes every record the logger accepts
pub type LogCallback = Arc<dyn Fn(&Record) + Send + Sync>;

pub struct AuditLogger {
    config: LoggerConfig,
    storage: Option<Arc<dyn Storage>>,
    writer: Option<AsyncWriter>,
    mask: MaskFn,
    clock: ClockFn,
    log_callback: Option<LogCallback>,
}

impl AuditLogger {
    /// Logger that writes synchronously to `storage`
    pub fn new(storage: Arc<dyn Storage>, config: LoggerConfig) -> Self {
        Self::assemble(config, Some(storage), None)
    }

    /// Logger that queues records on a freshly started `AsyncWriter`
    pub fn with_writer(
        storage: Arc<dyn Storage>,
        config: LoggerConfig,
        writer_config: &WriterConfig,
    ) -> Self {
        Self::from_writer(AsyncWriter::new(storage, writer_config), config)
    }

    /// Logger over a prepared writer, e.g. one built with callbacks; starts it
    pub fn from_writer(writer: AsyncWriter, config: LoggerConfig) -> Self {
        writer.start();
        let storage = Arc::clone(writer.storage());
        Self::assemble(config, Some(storage), Some(writer))
    }

    /// Logger that records nothing and has no storage to query
    pub fn disabled() -> Self {
        let config = LoggerConfig {
            enabled: false,
            ..Default::default()
        };
        Self::assemble(config, None, None)
    }

    /// Build storage and an async logger from a loaded configuration
    pub async fn from_config(config: &AuditConfig) -> Result<Self> {
        if !config.logger.enabled {
            return Ok(Self::disabled());
        }

        let storage = BackendFactory::create_all(&config.effective_storage()).await?;
        Ok(Self::with_writer(
            storage,
            config.logger.clone(),
            &config.writer,
        ))
    }

    fn assemble(
        config: LoggerConfig,
        storage: Option<Arc<dyn Storage>>,
        writer: Option<AsyncWriter>,
    ) -> Self {
        Self {
            config,
            storage,
            writer,
            mask: Arc::new(mask_destination),
            clock: Arc::new(|| chrono::Utc::now().timestamp()),
            log_callback: None,
        }
    }

    /// Replace the destination masking function
    pub fn with_mask_fn<F>(mut self, mask: F) -> Self
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        self.mask = Arc::new(mask);
        self
    }

    /// Replace the clock used for records without a timestamp
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn set_log_callback<F>(&mut self, callback: F)
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        self.log_callback = Some(Arc::new(callback));
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    pub fn is_async(&self) -> bool {
        self.writer.is_some()
    }

    /// Record an audit event
    ///
    /// Never fails: queue-full drops and synchronous write errors are
    /// reported through the writer callbacks or the tracing log.
    pub async fn log(&self, mut record: Record) {
        if !self.config.enabled {
            return;
        }

        if record.timestamp == 0 {
            record.timestamp = (self.clock)();
        }

        if self.config.mask_destination {
            if let Some(destination) = record.destination.as_deref().filter(|d| !d.is_empty()) {
                let channel = record.channel.as_deref().unwrap_or("");
                record.destination = Some((self.mask)(destination, channel));
            }
        }

        if let Some(callback) = &self.log_callback {
            callback(&record);
        }

        if let Some(writer) = &self.writer {
            writer.enqueue(record);
        } else if let Some(storage) = &self.storage {
            if let Err(e) = storage.write(&record).await {
                error!(
                    event_type = %record.event_type,
                    error = %e,
                    "Failed to write audit record"
                );
            }
        }
    }

    /// Log a challenge lifecycle event
    pub async fn log_challenge<F>(
        &self,
        event_type: EventType,
        challenge_id: &str,
        user_id: &str,
        result: EventResult,
        customize: F,
    ) where
        F: FnOnce(Record) -> Record,
    {
        let record = Record::new(event_type, result)
            .with_challenge_id(challenge_id)
            .with_user_id(user_id);
        self.log(customize(record)).await;
    }

    /// Log an authentication event
    pub async fn log_auth<F>(
        &self,
        event_type: EventType,
        user_id: &str,
        result: EventResult,
        customize: F,
    ) where
        F: FnOnce(Record) -> Record,
    {
        let record = Record::new(event_type, result).with_user_id(user_id);
        self.log(customize(record)).await;
    }

    /// Log an access control decision
    pub async fn log_access<F>(
        &self,
        event_type: EventType,
        user_id: &str,
        resource: &str,
        result: EventResult,
        customize: F,
    ) where
        F: FnOnce(Record) -> Record,
    {
        let record = Record::new(event_type, result)
            .with_user_id(user_id)
            .with_resource(resource);
        self.log(customize(record)).await;
    }

    pub async fn query(&self, filter: &QueryFilter) -> Result<Vec<Record>> {
        match &self.storage {
            Some(storage) => storage.query(filter).await,
            None => Err(AuditError::NoStorage),
        }
    }

    /// Writer statistics; `None` in synchronous mode
    pub fn stats(&self) -> Option<WriterStats> {
        self.writer.as_ref().map(AsyncWriter::stats)
    }

    /// Stop the writer (which closes storage) or close storage directly
    pub async fn stop(&self) -> Result<()> {
        if let Some(writer) = &self.writer {
            return writer.stop().await;
        }
        if let Some(storage) = &self.storage {
            return storage.close().await;
        }
        Ok(())
    }
}
