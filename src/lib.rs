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

// Audit event persistence
//
// This crate stores "who did what, when, with what result" records:
// - Records flow through a non-blocking bounded queue into a worker pool
// - Backends: JSON Lines files, PostgreSQL / MySQL / SQLite, Redis
// - Several backends can be written at once through a fan-out adapter
// - Every backend answers the same filtered, newest-first queries
// - A logger facade stamps timestamps and masks phone numbers / emails

pub mod config;
pub mod error;
pub mod filter;
pub mod logger;
pub mod mask;
pub mod record;
pub mod storage;
pub mod writer;

// Re-export main types
pub use config::{load_config, load_config_with_env, AuditConfig};
pub use error::{AuditError, Result};
pub use filter::QueryFilter;
pub use logger::AuditLogger;
pub use record::{EventResult, EventType, Record};
pub use storage::{
    BackendFactory, CacheStorage, DatabaseStorage, FileStorage, MultiStorage, NoopStorage,
    Storage, StorageType,
};
pub use writer::{AsyncWriter, WriterState, WriterStats};
