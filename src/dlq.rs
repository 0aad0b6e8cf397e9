//! C6 (dead-letter slice) — routing exhausted-retry items to a per-queue
//! dead letter queue, created on first use.

use crate::error::Result;
use crate::events::hooks::HookSet;
use crate::events::types::EventType;
use crate::events::EventBus;
use crate::model::{DeadLetterConfig, DeadLetterItem, Item, RetryAttempt};
use crate::queue::QueueCore;
use serde_json::json;
use std::sync::Arc;

pub struct DeadLetterRouter {
    queues: Arc<QueueCore>,
    events: Arc<EventBus>,
}

impl DeadLetterRouter {
    pub fn new(queues: Arc<QueueCore>, events: Arc<EventBus>) -> Self {
        Self { queues, events }
    }

    fn dlq_queue_id(original_queue_id: &str, config: &DeadLetterConfig) -> String {
        config
            .queue_id
            .clone()
            .unwrap_or_else(|| format!("{original_queue_id}-dlq"))
    }

    pub async fn route_to_dead_letter_queue(
        &self,
        original_queue_id: &str,
        item: Item,
        failure_reason: &str,
        retry_history: Vec<RetryAttempt>,
        config: &DeadLetterConfig,
        hooks: &HookSet,
    ) -> Result<Item> {
        let dlq_id = Self::dlq_queue_id(original_queue_id, config);
        if self.queues.get_queue(&dlq_id).await?.is_none() {
            self.queues.create_queue(&dlq_id, &dlq_id).await?;
        }
        let envelope = DeadLetterItem {
            item,
            original_queue_id: original_queue_id.to_string(),
            failure_reason: failure_reason.to_string(),
            retry_history,
            routed_at: chrono::Utc::now(),
        };
        let envelope_json = serde_json::to_value(&envelope)
            .unwrap_or_else(|_| json!({ "error": "failed to serialize dead letter envelope" }));
        let dlq_item = self.queues.add_to_queue(&dlq_id, envelope_json, hooks).await?;
        if let Some(max_size) = config.max_size {
            self.trim_to_max_size(&dlq_id, max_size).await?;
        }
        self.events.emit(
            EventType::JobRoutedDlq,
            Some(original_queue_id),
            json!({ "item_id": dlq_item.id, "dlq_queue_id": dlq_id }),
        );
        Ok(dlq_item)
    }

    async fn trim_to_max_size(&self, dlq_id: &str, max_size: u64) -> Result<()> {
        loop {
            let queue = match self.queues.get_queue(dlq_id).await? {
                Some(q) => q,
                None => return Ok(()),
            };
            if queue.item_count <= max_size {
                return Ok(());
            }
            if self.queues.peek_queue(dlq_id).await?.is_none() {
                return Ok(());
            }
            let empty_hooks = HookSet::new();
            if self.queues.pop_from_queue(dlq_id, &empty_hooks).await?.is_none() {
                return Ok(());
            }
        }
    }
}
