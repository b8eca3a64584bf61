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

// Audit record model
//
// A record describes one audit event: who did what, when, with what result.
// Records are built by the caller (or the logger helpers), optionally refined
// through the fluent `with_*` setters, and then handed to a storage backend
// or the async writer by value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Type of an audit event
///
/// The set is open: well-known kinds have their own variant, anything else is
/// carried verbatim in `Other`. An empty string maps to `Custom` so the event
/// type is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    ChallengeCreated,
    ChallengeVerified,
    ChallengeRevoked,
    ChallengeExpired,
    SendSuccess,
    SendFailed,
    VerificationSuccess,
    VerificationFailed,
    LoginSuccess,
    LoginFailed,
    Logout,
    SessionCreate,
    SessionExpire,
    AccessGranted,
    AccessDenied,
    UserCreated,
    UserUpdated,
    UserDeleted,
    UserLocked,
    UserUnlocked,
    RateLimited,
    Custom,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::ChallengeCreated => "challenge_created",
            EventType::ChallengeVerified => "challenge_verified",
            EventType::ChallengeRevoked => "challenge_revoked",
            EventType::ChallengeExpired => "challenge_expired",
            EventType::SendSuccess => "send_success",
            EventType::SendFailed => "send_failed",
            EventType::VerificationSuccess => "verification_success",
            EventType::VerificationFailed => "verification_failed",
            EventType::LoginSuccess => "login_success",
            EventType::LoginFailed => "login_failed",
            EventType::Logout => "logout",
            EventType::SessionCreate => "session_create",
            EventType::SessionExpire => "session_expire",
            EventType::AccessGranted => "access_granted",
            EventType::AccessDenied => "access_denied",
            EventType::UserCreated => "user_created",
            EventType::UserUpdated => "user_updated",
            EventType::UserDeleted => "user_deleted",
            EventType::UserLocked => "user_locked",
            EventType::UserUnlocked => "user_unlocked",
            EventType::RateLimited => "rate_limited",
            EventType::Custom => "custom",
            EventType::Other(s) => s.as_str(),
        }
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "challenge_created" => EventType::ChallengeCreated,
            "challenge_verified" => EventType::ChallengeVerified,
            "challenge_revoked" => EventType::ChallengeRevoked,
            "challenge_expired" => EventType::ChallengeExpired,
            "send_success" => EventType::SendSuccess,
            "send_failed" => EventType::SendFailed,
            "verification_success" => EventType::VerificationSuccess,
            "verification_failed" => EventType::VerificationFailed,
            "login_success" => EventType::LoginSuccess,
            "login_failed" => EventType::LoginFailed,
            "logout" => EventType::Logout,
            "session_create" => EventType::SessionCreate,
            "session_expire" => EventType::SessionExpire,
            "access_granted" => EventType::AccessGranted,
            "access_denied" => EventType::AccessDenied,
            "user_created" => EventType::UserCreated,
            "user_updated" => EventType::UserUpdated,
            "user_deleted" => EventType::UserDeleted,
            "user_locked" => EventType::UserLocked,
            "user_unlocked" => EventType::UserUnlocked,
            "rate_limited" => EventType::RateLimited,
            "custom" | "" => EventType::Custom,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        EventType::from(s.as_str())
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventResult {
    Success,
    Failure,
    Pending,
}

impl EventResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventResult::Success => "success",
            EventResult::Failure => "failure",
            EventResult::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(EventResult::Success),
            "failure" => Some(EventResult::Failure),
            "pending" => Some(EventResult::Pending),
            _ => None,
        }
    }
}

impl fmt::Display for EventResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// A single audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// sms, email, push, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Phone number or email address, usually masked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// login, reset, bind, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    pub result: EventResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Unix timestamp in seconds
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub duration_ms: i64,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Record {
    /// Create a record stamped with the current time
    pub fn new(event_type: impl Into<EventType>, result: EventResult) -> Self {
        Self {
            event_type: event_type.into(),
            event_id: None,
            user_id: None,
            challenge_id: None,
            session_id: None,
            channel: None,
            destination: None,
            purpose: None,
            resource: None,
            result,
            reason: None,
            provider: None,
            provider_message_id: None,
            ip: None,
            user_agent: None,
            request_id: None,
            trace_id: None,
            timestamp: chrono::Utc::now().timestamp(),
            duration_ms: 0,
            metadata: Map::new(),
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
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

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_provider(
        mut self,
        provider: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        self.provider = Some(provider.into());
        self.provider_message_id = Some(message_id.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Operation duration in milliseconds
    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}
