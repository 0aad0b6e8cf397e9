//! C6 (retry slice) — `executeWithRetry` and its persisted history.

use crate::error::{ErrorContext, QueueError, Result};
use crate::events::types::EventType;
use crate::events::EventBus;
use crate::model::{RetryAttempt, RetryPolicy, RetryRecord, RetryStatus};
use crate::storage::{keys, StorageAdapter};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct RetryEngine {
    storage: Arc<StorageAdapter>,
    events: Arc<EventBus>,
}

impl RetryEngine {
    pub fn new(storage: Arc<StorageAdapter>, events: Arc<EventBus>) -> Self {
        Self { storage, events }
    }

    fn backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
        let scaled = policy.base_delay_ms as f64 * policy.backoff_multiplier.powi(attempt as i32 - 1);
        let capped = scaled.min(policy.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Runs `processor` up to `policy.max_retries + 1` times, backing off
    /// between attempts, and persists the full attempt history regardless
    /// of the final outcome.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        queue_id: &str,
        job_id: &str,
        policy: &RetryPolicy,
        mut processor: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut record = RetryRecord {
            job_id: job_id.to_string(),
            queue_id: queue_id.to_string(),
            status: RetryStatus::Processing,
            attempts: Vec::new(),
            total_retries: 0,
            start_time: chrono::Utc::now(),
            end_time: None,
            final_error: None,
        };
        let max_attempts = policy.max_retries + 1;
        let mut last_error: Option<QueueError> = None;
        for attempt in 1..=max_attempts {
            let started = Instant::now();
            match processor().await {
                Ok(value) => {
                    record.attempts.push(RetryAttempt {
                        attempt,
                        success: true,
                        error_kind: None,
                        duration_ms: started.elapsed().as_millis() as u64,
                        timestamp: chrono::Utc::now(),
                    });
                    record.status = RetryStatus::Completed;
                    record.end_time = Some(chrono::Utc::now());
                    self.store_retry_history(&record).await?;
                    self.events.emit(EventType::JobRetrySuccess, Some(queue_id), json!({ "job_id": job_id, "attempt": attempt }));
                    return Ok(value);
                }
                Err(e) => {
                    let kind = e.kind().to_string();
                    let retryable = policy.retry_on_types.iter().any(|t| t == &kind) || policy.retry_on_types.is_empty();
                    record.attempts.push(RetryAttempt {
                        attempt,
                        success: false,
                        error_kind: Some(kind.clone()),
                        duration_ms: started.elapsed().as_millis() as u64,
                        timestamp: chrono::Utc::now(),
                    });
                    record.total_retries += 1;
                    self.events.emit(
                        EventType::JobRetryAttempt,
                        Some(queue_id),
                        json!({ "job_id": job_id, "attempt": attempt, "error_kind": kind }),
                    );
                    last_error = Some(e);
                    if !retryable || attempt == max_attempts {
                        break;
                    }
                    tokio::time::sleep(Self::backoff(policy, attempt)).await;
                }
            }
        }
        record.status = RetryStatus::Failed;
        record.end_time = Some(chrono::Utc::now());
        record.final_error = last_error.as_ref().map(|e| e.to_string());
        self.store_retry_history(&record).await?;
        self.events.emit(EventType::JobRetryFailed, Some(queue_id), json!({ "job_id": job_id }));
        Err(last_error.unwrap_or_else(|| QueueError::unknown(ErrorContext::new("execute_with_retry").queue(queue_id).item(job_id), "no attempts ran")))
    }

    async fn store_retry_history(&self, record: &RetryRecord) -> Result<()> {
        let body = serde_json::to_string(record)
            .map_err(|e| QueueError::validation(ErrorContext::new("store_retry_history").queue(&record.queue_id), e.to_string()))?;
        self.storage.hset_field(&keys::retry_job(&record.job_id), "body", &body).await?;
        let score = record.start_time.timestamp_millis() as f64;
        self.storage.zadd(&keys::retry_history(&record.queue_id), &record.job_id, score).await?;
        Ok(())
    }

    pub async fn get_retry_record(&self, job_id: &str) -> Result<Option<RetryRecord>> {
        let body = self.storage.hget(&keys::retry_job(job_id), "body").await?;
        Ok(body.and_then(|b| serde_json::from_str(&b).ok()))
    }

    pub async fn get_retry_history(&self, queue_id: &str, limit: isize) -> Result<Vec<RetryRecord>> {
        let ids = self.storage.zrange_withscores(&keys::retry_history(queue_id), 0, limit.saturating_sub(1)).await?;
        let mut records = Vec::with_capacity(ids.len());
        for (job_id, _) in ids {
            if let Some(record) = self.get_retry_record(&job_id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}
