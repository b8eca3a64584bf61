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

// Storage trait implemented by every audit backend

use crate::error::Result;
use crate::filter::QueryFilter;
use crate::record::Record;
use async_trait::async_trait;

/// Generic storage backend for audit records
///
/// Implementations must be safe to call concurrently through a shared
/// `Arc<dyn Storage>`; each backend does its own internal synchronization.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist a single record
    async fn write(&self, record: &Record) -> Result<()>;

    /// Return records matching `filter`, newest first by timestamp
    ///
    /// Backends normalize the filter themselves, callers may pass it raw.
    /// Records sharing a timestamp come back in no particular order.
    async fn query(&self, filter: &QueryFilter) -> Result<Vec<Record>>;

    /// Release resources. Calling it more than once is not an error.
    async fn close(&self) -> Result<()>;

    /// Health check
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Get backend type identifier
    fn backend_type(&self) -> &str;
}
