//! C9 (audit slice) — per-queue audit trail. Persisted entries live in
//! Redis (one hash per record plus a sorted-set time index); an in-process
//! ring buffer capped at 10 000 entries (spec §5 bound) backs
//! `get_audit_stats` so that call doesn't scan Redis on every invocation.

use crate::error::{ErrorContext, QueueError, Result};
use crate::events::types::EventType;
use crate::events::EventBus;
use crate::model::{AuditConfig, AuditLevel, AuditRecord};
use crate::storage::{keys, StorageAdapter};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

const RING_BUFFER_CAP: usize = 10_000;

pub enum ExportFormat {
    Json,
    Csv,
}

#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct AuditStats {
    pub total: u64,
    pub by_level: HashMap<String, u64>,
}

pub struct AuditTrail {
    storage: Arc<StorageAdapter>,
    events: Arc<EventBus>,
    configs: DashMap<String, AuditConfig>,
    ring: Mutex<VecDeque<AuditRecord>>,
}

impl AuditTrail {
    pub fn new(storage: Arc<StorageAdapter>, events: Arc<EventBus>) -> Self {
        Self {
            storage,
            events,
            configs: DashMap::new(),
            ring: Mutex::new(VecDeque::with_capacity(RING_BUFFER_CAP)),
        }
    }

    pub fn configure_audit_trail(&self, queue_id: &str, config: AuditConfig) {
        self.configs.insert(queue_id.to_string(), config);
        self.events.emit(EventType::AuditConfigured, Some(queue_id), json!({}));
    }

    pub fn disable_audit_trail(&self, queue_id: &str) {
        self.configs.remove(queue_id);
        self.events.emit(EventType::AuditDisabled, Some(queue_id), json!({}));
    }

    fn should_log(config: &AuditConfig, level: AuditLevel, event_type: &str) -> bool {
        if !config.enabled || level < config.log_level {
            return false;
        }
        config.log_events.is_empty() || config.log_events.iter().any(|e| e == event_type)
    }

    pub async fn log_audit_event(
        &self,
        queue_id: &str,
        event_type: &str,
        level: AuditLevel,
        data: Option<serde_json::Value>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Option<AuditRecord>> {
        let Some(config) = self.configs.get(queue_id).map(|c| c.clone()) else { return Ok(None) };
        if !Self::should_log(&config, level, event_type) {
            return Ok(None);
        }
        let record = AuditRecord {
            id: uuid::Uuid::new_v4().to_string(),
            queue_id: queue_id.to_string(),
            event_type: event_type.to_string(),
            level,
            timestamp: chrono::Utc::now(),
            data: if config.include_data { data } else { None },
            metadata: if config.include_metadata { metadata } else { None },
        };
        let body = serde_json::to_string(&record)
            .map_err(|e| QueueError::validation(ErrorContext::new("log_audit_event").queue(queue_id), e.to_string()))?;
        if body.len() > config.max_log_size {
            log::warn!("audit record for {queue_id} exceeds max_log_size, truncating data");
        }
        self.storage.hset_field(&keys::audit_log(queue_id, &record.id), "body", &body).await?;
        self.storage
            .zadd(&keys::audit_index(queue_id), &record.id, record.timestamp.timestamp_millis() as f64)
            .await?;
        {
            let mut ring = self.ring.lock();
            if ring.len() >= RING_BUFFER_CAP {
                ring.pop_front();
            }
            ring.push_back(record.clone());
        }
        self.events.emit(EventType::AuditLogged, Some(queue_id), json!({ "id": record.id }));
        Ok(Some(record))
    }

    async fn load_record(&self, queue_id: &str, audit_id: &str) -> Result<Option<AuditRecord>> {
        let body = self.storage.hget(&keys::audit_log(queue_id, audit_id), "body").await?;
        Ok(body.and_then(|b| serde_json::from_str(&b).ok()))
    }

    pub async fn get_audit_logs(&self, queue_id: &str, limit: usize) -> Result<Vec<AuditRecord>> {
        let ids = self.storage.zrange_withscores(&keys::audit_index(queue_id), 0, -1).await?;
        let mut records = Vec::with_capacity(ids.len().min(limit));
        for (id, _) in ids.into_iter().rev().take(limit) {
            if let Some(record) = self.load_record(queue_id, &id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn search_audit_logs<F>(&self, queue_id: &str, predicate: F) -> Result<Vec<AuditRecord>>
    where
        F: Fn(&AuditRecord) -> bool,
    {
        let all = self.get_audit_logs(queue_id, usize::MAX).await?;
        Ok(all.into_iter().filter(|r| predicate(r)).collect())
    }

    /// Stats from the in-process ring buffer only (bounded, recent window),
    /// not a full historical aggregate — see module docs.
    pub fn get_audit_stats(&self, queue_id: &str) -> AuditStats {
        let ring = self.ring.lock();
        let mut stats = AuditStats::default();
        for record in ring.iter().filter(|r| r.queue_id == queue_id) {
            stats.total += 1;
            *stats.by_level.entry(format!("{:?}", record.level)).or_insert(0) += 1;
        }
        stats
    }

    pub async fn export_audit_logs(&self, queue_id: &str, format: ExportFormat) -> Result<String> {
        let records = self.get_audit_logs(queue_id, usize::MAX).await?;
        match format {
            ExportFormat::Json => serde_json::to_string_pretty(&records)
                .map_err(|e| QueueError::validation(ErrorContext::new("export_audit_logs").queue(queue_id), e.to_string())),
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_writer(Vec::new());
                for record in &records {
                    writer
                        .write_record([
                            &record.id,
                            &record.queue_id,
                            &record.event_type,
                            &format!("{:?}", record.level),
                            &record.timestamp.to_rfc3339(),
                            &record.data.as_ref().map(|d| d.to_string()).unwrap_or_default(),
                        ])
                        .map_err(|e| QueueError::validation(ErrorContext::new("export_audit_logs").queue(queue_id), e.to_string()))?;
                }
                let bytes = writer
                    .into_inner()
                    .map_err(|e| QueueError::validation(ErrorContext::new("export_audit_logs").queue(queue_id), e.to_string()))?;
                String::from_utf8(bytes)
                    .map_err(|e| QueueError::validation(ErrorContext::new("export_audit_logs").queue(queue_id), e.to_string()))
            }
        }
    }

    /// Drops Redis-persisted entries older than `retention_days` for the
    /// given queue's configured retention; the in-process ring buffer is
    /// left alone since it is already bounded by entry count, not age.
    pub async fn cleanup_audit_logs(&self, queue_id: &str) -> Result<u64> {
        let Some(config) = self.configs.get(queue_id).map(|c| c.clone()) else { return Ok(0) };
        let cutoff = chrono::Utc::now() - chrono::Duration::days(config.retention_days as i64);
        let cutoff_ms = cutoff.timestamp_millis() as f64;
        let stale = self.storage.zrangebyscore_limit(&keys::audit_index(queue_id), "-inf", &cutoff_ms.to_string(), 0, 100_000).await?;
        for id in &stale {
            self.storage.del(&keys::audit_log(queue_id, id)).await?;
            self.storage.zrem(&keys::audit_index(queue_id), id).await?;
        }
        self.events.emit(EventType::AuditCleaned, Some(queue_id), json!({ "removed": stale.len() }));
        Ok(stale.len() as u64)
    }
}
