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

// Storage backend module
//
// Provides a trait-based abstraction over the places audit records can live:
// JSON Lines files, SQL databases, a Redis-style cache store, or several of
// them at once. Every backend supports writing and filtered queries.

pub mod backend;
pub mod cache;
pub mod database;
pub mod factory;
pub mod file;
pub mod multi;
pub mod noop;

pub use backend::Storage;
pub use cache::{CacheClient, CacheStorage, MemoryCacheClient, RedisCacheClient};
pub use database::{DatabaseStorage, Dialect};
pub use factory::{BackendFactory, StorageType};
pub use file::FileStorage;
pub use multi::MultiStorage;
pub use noop::NoopStorage;
