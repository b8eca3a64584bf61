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

// Storage that discards everything

use super::backend::Storage;
use crate::error::Result;
use crate::filter::QueryFilter;
use crate::record::Record;
use async_trait::async_trait;

/// Used when auditing is configured off (`backend: none`)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStorage;

impl NoopStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Storage for NoopStorage {
    async fn write(&self, _record: &Record) -> Result<()> {
        Ok(())
    }

    async fn query(&self, _filter: &QueryFilter) -> Result<Vec<Record>> {
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn backend_type(&self) -> &str {
        "none"
    }
}
