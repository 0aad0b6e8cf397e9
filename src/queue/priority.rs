//! Priority-ordered queue operations. The items list has no native
//! ordering beyond insertion, so these re-sort the full in-memory list by
//! [`Item::priority_score`] and rewrite it — the same full-list-rewrite
//! shape `update_item`/`delete_item` use, just driven from Rust instead of
//! Lua since the sort itself isn't worth a script.

use super::QueueCore;
use crate::error::Result;
use crate::events::hooks::{run_hooks, HookSet, DEFAULT_HOOK_TIMEOUT};
use crate::events::types::EventType;
use crate::model::Item;
use crate::storage::keys;
use serde_json::json;

impl QueueCore {
    pub async fn add_to_queue_with_priority(
        &self,
        queue_id: &str,
        data: serde_json::Value,
        priority: i64,
        weight: u64,
        hooks: &HookSet,
    ) -> Result<Item> {
        let item = self.add_to_queue(queue_id, data, hooks).await?;
        let patch = crate::queue::ItemPatch {
            priority: Some(priority),
            priority_weight: Some(weight.max(1)),
            ..Default::default()
        };
        let item = self.update_item(queue_id, &item.id, patch, hooks).await?;
        self.emit_priority_added(queue_id, &item.id);
        Ok(item)
    }

    fn emit_priority_added(&self, queue_id: &str, item_id: &str) {
        self.emit(EventType::ItemAddedPriority, queue_id, json!({ "item_id": item_id }));
    }

    /// Pops the highest-`priority_score` item, breaking ties by earlier
    /// `added_at` (the score already encodes that tiebreak).
    pub async fn pop_from_queue_by_priority(&self, queue_id: &str, hooks: &HookSet) -> Result<Option<Item>> {
        let mut items = self.get_queue_items(queue_id, 0, usize::MAX).await?;
        if items.is_empty() {
            return Ok(None);
        }
        items.sort_by_key(|i| std::cmp::Reverse(i.priority_score()));
        let winner = items.remove(0);
        let popped = self.delete_item_from_queue(queue_id, &winner.id, hooks).await?;
        self.emit(EventType::ItemPoppedPriority, queue_id, json!({ "item_id": popped.id }));
        run_hooks(&hooks.after, "after", "pop_from_queue_by_priority", &popped, queue_id, DEFAULT_HOOK_TIMEOUT).await?;
        Ok(Some(popped))
    }

    pub async fn update_item_priority(
        &self,
        queue_id: &str,
        item_id: &str,
        priority: i64,
        hooks: &HookSet,
    ) -> Result<Item> {
        let patch = crate::queue::ItemPatch {
            priority: Some(priority),
            ..Default::default()
        };
        let item = self.update_item(queue_id, item_id, patch, hooks).await?;
        self.emit(EventType::ItemPriorityUpdated, queue_id, json!({ "item_id": item_id, "priority": priority }));
        Ok(item)
    }

    /// Rewrites the underlying list in descending priority-score order. This
    /// changes FIFO/priority pop behavior for subsequent plain `popFromQueue`
    /// calls on this queue until new items are added at the head again.
    pub async fn reorder_queue_by_priority(&self, queue_id: &str) -> Result<u64> {
        let mut items = self.get_queue_items(queue_id, 0, usize::MAX).await?;
        items.sort_by_key(|i| std::cmp::Reverse(i.priority_score()));
        // Items list is drained tail-first, so the lowest-scoring item must
        // be closest to the tail: store head-to-tail in ascending score.
        items.reverse();
        let bodies: Vec<String> = items
            .iter()
            .filter_map(|i| serde_json::to_string(i).ok())
            .collect();
        self.storage.replace_list(&keys::items(queue_id), &bodies).await?;
        self.cache.invalidate_items(queue_id);
        self.emit(EventType::QueueReorderedPriority, queue_id, json!({ "count": bodies.len() }));
        Ok(bodies.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use crate::model::Item;
    use serde_json::json;

    #[test]
    fn priority_score_breaks_ties_by_earlier_added_at() {
        let mut earlier = Item::new(json!({}));
        earlier.priority = 5;
        earlier.priority_weight = 1;
        let mut later = earlier.clone();
        later.added_at = earlier.added_at + chrono::Duration::seconds(10);
        assert!(earlier.priority_score() >= later.priority_score());
    }

    #[test]
    fn higher_priority_outranks_lower() {
        let mut low = Item::new(json!({}));
        low.priority = 1;
        let mut high = Item::new(json!({}));
        high.priority = 10;
        high.added_at = low.added_at;
        assert!(high.priority_score() > low.priority_score());
    }
}
