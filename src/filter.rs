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

// Query filter shared by every storage backend

use crate::record::Record;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: i64 = 100;
pub const MAX_LIMIT: i64 = 1000;

/// Filter criteria for querying audit records
///
/// Equality predicates are optional; `start_time` / `end_time` form an
/// inclusive range where 0 means unbounded on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,

    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            event_type: None,
            user_id: None,
            challenge_id: None,
            session_id: None,
            channel: None,
            result: None,
            ip: None,
            start_time: 0,
            end_time: 0,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_challenge_id(mut self, challenge_id: impl Into<String>) -> Self {
        self.challenge_id = Some(challenge_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_time_range(mut self, start_time: i64, end_time: i64) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Clamp pagination and drop empty predicates. Idempotent.
    pub fn normalize(&mut self) {
        if self.limit <= 0 {
            self.limit = DEFAULT_LIMIT;
        }
        if self.limit > MAX_LIMIT {
            self.limit = MAX_LIMIT;
        }
        if self.offset < 0 {
            self.offset = 0;
        }

        for field in [
            &mut self.event_type,
            &mut self.user_id,
            &mut self.challenge_id,
            &mut self.session_id,
            &mut self.channel,
            &mut self.result,
            &mut self.ip,
        ] {
            if field.as_deref() == Some("") {
                *field = None;
            }
        }
    }

    /// Normalized copy of this filter
    pub fn normalized(&self) -> Self {
        let mut filter = self.clone();
        filter.normalize();
        filter
    }

    /// Limit as a collection size; assumes a normalized filter
    pub fn limit_usize(&self) -> usize {
        self.limit.max(0) as usize
    }

    /// Offset as a collection index; assumes a normalized filter
    pub fn offset_usize(&self) -> usize {
        self.offset.max(0) as usize
    }

    /// Check whether a record satisfies every predicate that is set
    pub fn matches(&self, record: &Record) -> bool {
        fn eq(expected: &Option<String>, actual: Option<&str>) -> bool {
            match expected.as_deref() {
                None | Some("") => true,
                Some(expected) => actual == Some(expected),
            }
        }

        eq(&self.event_type, Some(record.event_type.as_str()))
            && eq(&self.user_id, record.user_id.as_deref())
            && eq(&self.challenge_id, record.challenge_id.as_deref())
            && eq(&self.session_id, record.session_id.as_deref())
            && eq(&self.channel, record.channel.as_deref())
            && eq(&self.result, Some(record.result.as_str()))
            && eq(&self.ip, record.ip.as_deref())
            && (self.start_time <= 0 || record.timestamp >= self.start_time)
            && (self.end_time <= 0 || record.timestamp <= self.end_time)
    }
}

/// Sort newest first and apply offset/limit of a normalized filter
pub(crate) fn paginate(mut records: Vec<Record>, filter: &QueryFilter) -> Vec<Record> {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    records
        .into_iter()
        .skip(filter.offset_usize())
        .take(filter.limit_usize())
        .collect()
}
