//! Wire-format entities. These are the Rust shapes of the JSON bodies and
//! hash rows stored in Redis; field names match the spec's data model
//! exactly since they are part of the on-the-wire contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One of an item's lifecycle states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    Waiting,
    Processing,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
    Retry,
    Corrupted,
}


/// Per-predecessor dependency state tracked on a waiting item.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DependencyState {
    pub satisfied: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed: bool,
}

/// A single job payload envelope stored inside a queue's item list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub data: serde_json::Value,
    pub added_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub status: ItemStatus,
    pub priority: i64,
    pub priority_weight: u64,
    pub retry_count: u32,
    pub timeout: Option<i64>,
    pub timeout_at: Option<i64>,
    pub dependencies: Vec<String>,
    pub dependency_status: HashMap<String, DependencyState>,
    pub metadata: serde_json::Value,
    pub delayed: bool,
    pub delay_until: Option<i64>,
    pub failure_reason: Option<String>,
}

impl Item {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            data,
            added_at: Utc::now(),
            updated_at: None,
            status: ItemStatus::Pending,
            priority: 0,
            priority_weight: 1,
            retry_count: 0,
            timeout: None,
            timeout_at: None,
            dependencies: Vec::new(),
            dependency_status: HashMap::new(),
            metadata: serde_json::Value::Null,
            delayed: false,
            delay_until: None,
            failure_reason: None,
        }
    }

    /// Priority score, pinned to `addedAt` (not insertion-time `now`) per
    /// the broker's resolution of the scheduler's tiebreak ambiguity.
    /// Higher score pops first; equal `priority*weight` breaks by earlier
    /// `added_at`.
    pub fn priority_score(&self) -> i64 {
        self.priority * 1_000_000
            + self.priority_weight as i64 * 1_000
            - (self.added_at.timestamp_millis() / 1_000_000)
    }
}

/// Queue metadata. `id` is stable and opaque; `item_count` is derived and
/// eventually consistent with the underlying item list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Queue {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub item_count: u64,
    pub version: u64,
    pub config: HashMap<String, String>,
    pub paused: bool,
}

impl Queue {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            created_at: now,
            updated_at: now,
            item_count: 0,
            version: 1,
            config: HashMap::new(),
            paused: false,
        }
    }
}

/// A deferred item awaiting promotion at `scheduled_for`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub queue_id: String,
    pub data: serde_json::Value,
    pub scheduled_for: i64,
    pub priority: i64,
    pub timeout: Option<i64>,
    pub dependencies: Vec<String>,
    pub metadata: serde_json::Value,
    pub rescheduled_count: u32,
    pub status: String,
}

/// Per-execution retry policy. Not persisted as a first-class entity; it
/// travels alongside a call to `execute_with_retry`.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub retry_on_types: Vec<String>,
    pub dead_letter_queue: Option<DeadLetterConfig>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            retry_on_types: vec!["error".to_string()],
            dead_letter_queue: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DeadLetterConfig {
    pub queue_id: Option<String>,
    pub max_size: Option<u64>,
    pub retention_days: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub success: bool,
    pub error_kind: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    Processing,
    Completed,
    Failed,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryRecord {
    pub job_id: String,
    pub queue_id: String,
    pub status: RetryStatus,
    pub attempts: Vec<RetryAttempt>,
    pub total_retries: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub final_error: Option<String>,
}

/// A dead-lettered item envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeadLetterItem {
    pub item: Item,
    pub original_queue_id: String,
    pub failure_reason: String,
    pub retry_history: Vec<RetryAttempt>,
    pub routed_at: DateTime<Utc>,
}

/// Multi-window rate limit configuration for a queue.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_per_second: Option<u64>,
    pub max_per_minute: Option<u64>,
    pub max_per_hour: Option<u64>,
    pub max_per_day: Option<u64>,
    pub max_concurrent: Option<u64>,
    pub enabled: bool,
}

/// A single per-field structural rule inside a [`SchemaConfig`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FieldRule {
    pub field_type: Option<String>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    #[default]
    Reject,
    Warn,
    Ignore,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub schema_type: Option<String>,
    pub required: Vec<String>,
    pub properties: HashMap<String, FieldRule>,
    pub additional_properties: bool,
    pub strict_mode: bool,
    pub error_handling: ErrorHandling,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub queue_id: String,
    pub event_type: String,
    pub level: AuditLevel,
    pub timestamp: DateTime<Utc>,
    pub data: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Clone, Debug)]
pub struct AuditConfig {
    pub enabled: bool,
    pub log_level: AuditLevel,
    pub retention_days: u32,
    pub log_events: Vec<String>,
    pub include_data: bool,
    pub include_metadata: bool,
    pub max_log_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_level: AuditLevel::Info,
            retention_days: 30,
            log_events: Vec::new(),
            include_data: true,
            include_metadata: true,
            max_log_size: 65536,
        }
    }
}
