//! Queue-hash encode/decode at the Redis boundary, and the patch shape used
//! by `QueueCore::update_item`.

use crate::error::{ErrorContext, QueueError, Result};
use crate::model::Queue;
use crate::storage::hash_codec::{decode_bool, decode_u64, encode_bool, encode_u64};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub fn encode_queue_hash(queue: &Queue) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    fields.insert("id".to_string(), queue.id.clone());
    fields.insert("name".to_string(), queue.name.clone());
    fields.insert("created_at".to_string(), queue.created_at.to_rfc3339());
    fields.insert("updated_at".to_string(), queue.updated_at.to_rfc3339());
    fields.insert("item_count".to_string(), encode_u64(queue.item_count));
    fields.insert("version".to_string(), encode_u64(queue.version));
    fields.insert("paused".to_string(), encode_bool(queue.paused));
    for (k, v) in &queue.config {
        fields.insert(format!("config:{k}"), v.clone());
    }
    fields
}

pub fn decode_queue_hash(queue_id: &str, fields: &HashMap<String, String>) -> Result<Queue> {
    if fields.is_empty() {
        return Err(QueueError::not_found(ErrorContext::new("decode_queue_hash").queue(queue_id)));
    }
    let created_at = fields
        .get("created_at")
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let updated_at = fields
        .get("updated_at")
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(created_at);
    let config = fields
        .iter()
        .filter_map(|(k, v)| k.strip_prefix("config:").map(|field| (field.to_string(), v.clone())))
        .collect();
    Ok(Queue {
        id: fields.get("id").cloned().unwrap_or_else(|| queue_id.to_string()),
        name: fields.get("name").cloned().unwrap_or_else(|| queue_id.to_string()),
        created_at,
        updated_at,
        item_count: fields.get("item_count").and_then(|s| decode_u64(s)).unwrap_or(0),
        version: fields.get("version").and_then(|s| decode_u64(s)).unwrap_or(1),
        config,
        paused: fields.get("paused").map(|s| decode_bool(s)).unwrap_or(false),
    })
}

/// A partial update to an item; `None` fields are left untouched.
#[derive(Clone, Debug, Default)]
pub struct ItemPatch {
    pub data: Option<serde_json::Value>,
    pub status: Option<crate::model::ItemStatus>,
    pub metadata: Option<serde_json::Value>,
    pub priority: Option<i64>,
    pub priority_weight: Option<u64>,
    pub failure_reason: Option<Option<String>>,
    pub timeout: Option<Option<i64>>,
    pub timeout_at: Option<Option<i64>>,
    pub retry_count: Option<u32>,
    pub dependency_status: Option<HashMap<String, crate::model::DependencyState>>,
}

impl ItemPatch {
    pub fn apply(self, item: &mut crate::model::Item) {
        if let Some(data) = self.data {
            item.data = data;
        }
        if let Some(status) = self.status {
            item.status = status;
        }
        if let Some(metadata) = self.metadata {
            item.metadata = metadata;
        }
        if let Some(priority) = self.priority {
            item.priority = priority;
        }
        if let Some(priority_weight) = self.priority_weight {
            item.priority_weight = priority_weight;
        }
        if let Some(failure_reason) = self.failure_reason {
            item.failure_reason = failure_reason;
        }
        if let Some(timeout) = self.timeout {
            item.timeout = timeout;
        }
        if let Some(timeout_at) = self.timeout_at {
            item.timeout_at = timeout_at;
        }
        if let Some(retry_count) = self.retry_count {
            item.retry_count = retry_count;
        }
        if let Some(dependency_status) = self.dependency_status {
            item.dependency_status = dependency_status;
        }
        item.updated_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_hash_round_trips() {
        let mut queue = Queue::new("q1", "My Queue");
        queue.config.insert("retries".to_string(), "3".to_string());
        queue.item_count = 7;
        let fields = encode_queue_hash(&queue);
        let decoded = decode_queue_hash("q1", &fields).unwrap();
        assert_eq!(decoded.name, "My Queue");
        assert_eq!(decoded.item_count, 7);
        assert_eq!(decoded.config.get("retries"), Some(&"3".to_string()));
    }
}
