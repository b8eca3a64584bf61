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

// Fan-out storage: every write goes to every backend

use super::backend::Storage;
use crate::error::{AuditError, Result};
use crate::filter::QueryFilter;
use crate::record::Record;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Writes to all wrapped backends and reads from the first one
pub struct MultiStorage {
    backends: Vec<Arc<dyn Storage>>,
}

impl MultiStorage {
    pub fn new(backends: Vec<Arc<dyn Storage>>) -> Self {
        Self { backends }
    }

    pub fn backends(&self) -> &[Arc<dyn Storage>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[async_trait]
impl Storage for MultiStorage {
    /// A failing backend does not stop the others; the first error is returned
    async fn write(&self, record: &Record) -> Result<()> {
        let mut first_error = None;

        for backend in &self.backends {
            if let Err(e) = backend.write(record).await {
                warn!(backend = backend.backend_type(), error = %e, "fan-out write failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn query(&self, filter: &QueryFilter) -> Result<Vec<Record>> {
        match self.backends.first() {
            Some(primary) => primary.query(filter).await,
            None => Err(AuditError::NoStorage),
        }
    }

    async fn close(&self) -> Result<()> {
        let mut first_error = None;

        for backend in &self.backends {
            if let Err(e) = backend.close().await {
                warn!(backend = backend.backend_type(), error = %e, "fan-out close failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn health_check(&self) -> Result<bool> {
        for backend in &self.backends {
            if !backend.health_check().await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn backend_type(&self) -> &str {
        "multi"
    }
}
