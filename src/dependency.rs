//! C8 — Job dependencies. A waiting item's predecessor set lives in a Redis
//! set (`qm:queue:dependencies:<queue>:<item>`); completion fans out by
//! scanning each predecessor's own dependents rather than maintaining a
//! reverse index, trading an extra `SCAN` for not having a second
//! consistency-sensitive index to keep in sync.

use crate::error::{ErrorContext, QueueError, Result};
use crate::events::hooks::HookSet;
use crate::events::types::EventType;
use crate::events::EventBus;
use crate::model::{DependencyState, Item, ItemStatus};
use crate::queue::{ItemPatch, QueueCore};
use crate::storage::{keys, StorageAdapter};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub struct DependencyEngine {
    storage: Arc<StorageAdapter>,
    queues: Arc<QueueCore>,
    events: Arc<EventBus>,
}

impl DependencyEngine {
    pub fn new(storage: Arc<StorageAdapter>, queues: Arc<QueueCore>, events: Arc<EventBus>) -> Self {
        Self { storage, queues, events }
    }

    pub async fn add_job_with_dependencies(
        &self,
        queue_id: &str,
        data: serde_json::Value,
        dependency_ids: Vec<String>,
        hooks: &HookSet,
    ) -> Result<Item> {
        if !dependency_ids.is_empty() {
            let mut missing = Vec::new();
            for dep_id in &dependency_ids {
                if self.queues.get_item(queue_id, dep_id).await?.is_none() {
                    missing.push(dep_id.clone());
                }
            }
            if !missing.is_empty() {
                return Err(QueueError::dependency(
                    ErrorContext::new("add_job_with_dependencies").queue(queue_id),
                    format!("Missing dependencies: {}", missing.join(", ")),
                ));
            }
        }
        let mut item = self.queues.add_to_queue(queue_id, data, hooks).await?;
        if dependency_ids.is_empty() {
            return Ok(item);
        }
        let mut status_map = HashMap::new();
        for dep_id in &dependency_ids {
            self.storage.sadd(&keys::dependencies(queue_id, &item.id), dep_id).await?;
            status_map.insert(dep_id.clone(), DependencyState::default());
        }
        item.dependencies = dependency_ids;
        item.dependency_status = status_map;
        item.status = ItemStatus::Waiting;
        let patch = ItemPatch {
            status: Some(ItemStatus::Waiting),
            ..Default::default()
        };
        let item = self.queues.update_item(queue_id, &item.id, patch, hooks).await?;
        self.events.emit(EventType::JobAddedDependencies, Some(queue_id), json!({ "item_id": item.id }));
        Ok(item)
    }

    /// Marks `job_id` completed, then scans every other waiting item in
    /// `queue_id` for one whose dependency set contains `job_id`; when all
    /// of a dependent's predecessors are satisfied it transitions to
    /// `Pending` and fires `job:ready`.
    pub async fn mark_job_completed(&self, queue_id: &str, job_id: &str, hooks: &HookSet) -> Result<Vec<String>> {
        let items = self.queues.get_queue_items(queue_id, 0, usize::MAX).await?;
        let mut ready = Vec::new();
        for dependent in items.into_iter().filter(|i| i.status == ItemStatus::Waiting) {
            if !dependent.dependencies.contains(&job_id.to_string()) {
                continue;
            }
            let mut status_map = dependent.dependency_status.clone();
            status_map
                .entry(job_id.to_string())
                .or_default()
                .satisfied = true;
            status_map.get_mut(job_id).unwrap().completed_at = Some(chrono::Utc::now());
            let all_satisfied = dependent.dependencies.iter().all(|d| status_map.get(d).map(|s| s.satisfied).unwrap_or(false));
            let new_status = if all_satisfied { ItemStatus::Pending } else { ItemStatus::Waiting };
            let patch = ItemPatch {
                status: Some(new_status),
                ..Default::default()
            };
            self.update_dependency_status(queue_id, &dependent.id, status_map, patch, hooks).await?;
            if all_satisfied {
                ready.push(dependent.id.clone());
                self.events.emit(EventType::JobReady, Some(queue_id), json!({ "item_id": dependent.id }));
            }
        }
        self.events.emit(EventType::JobCompleted, Some(queue_id), json!({ "item_id": job_id }));
        Ok(ready)
    }

    /// Marks `job_id` failed; dependents are cascaded to `Failed` too when
    /// `fail_dependents` is set, rather than left waiting forever on a
    /// predecessor that will never complete.
    pub async fn mark_job_failed(&self, queue_id: &str, job_id: &str, fail_dependents: bool, hooks: &HookSet) -> Result<Vec<String>> {
        let mut failed = Vec::new();
        self.events.emit(EventType::JobFailed, Some(queue_id), json!({ "item_id": job_id }));
        if !fail_dependents {
            return Ok(failed);
        }
        let items = self.queues.get_queue_items(queue_id, 0, usize::MAX).await?;
        for dependent in items.into_iter().filter(|i| i.status == ItemStatus::Waiting) {
            if !dependent.dependencies.contains(&job_id.to_string()) {
                continue;
            }
            let mut status_map = dependent.dependency_status.clone();
            status_map.entry(job_id.to_string()).or_default().failed = true;
            let patch = ItemPatch {
                status: Some(ItemStatus::Failed),
                failure_reason: Some(Some("dependency_failed".to_string())),
                ..Default::default()
            };
            self.update_dependency_status(queue_id, &dependent.id, status_map, patch, hooks).await?;
            failed.push(dependent.id.clone());
            self.events.emit(EventType::JobFailed, Some(queue_id), json!({ "item_id": dependent.id, "cause": job_id }));
        }
        Ok(failed)
    }

    async fn update_dependency_status(
        &self,
        queue_id: &str,
        item_id: &str,
        status_map: HashMap<String, DependencyState>,
        patch: ItemPatch,
        hooks: &HookSet,
    ) -> Result<()> {
        let mut patch = patch;
        patch.dependency_status = Some(status_map);
        self.queues.update_item(queue_id, item_id, patch, hooks).await?;
        Ok(())
    }
}
