//! C5 — Scheduler: deferred jobs promoted into their queue once due.
//!
//! Promotion runs through [`QueueCore::add_to_queue`] rather than a single
//! Lua script so scheduled jobs pass through the same hook/event pipeline as
//! any other insertion (see `storage/lua/due_scheduled_jobs.lua`).

use crate::error::{ErrorContext, QueueError, Result};
use crate::events::hooks::HookSet;
use crate::events::types::EventType;
use crate::events::EventBus;
use crate::model::ScheduledJob;
use crate::queue::QueueCore;
use crate::storage::{keys, StorageAdapter};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const SCHEDULER_BATCH_SIZE: usize = 100;
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

pub struct Scheduler {
    storage: Arc<StorageAdapter>,
    queues: Arc<QueueCore>,
    events: Arc<EventBus>,
    tick_interval: Duration,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(storage: Arc<StorageAdapter>, queues: Arc<QueueCore>, events: Arc<EventBus>) -> Self {
        Self {
            storage,
            queues,
            events,
            tick_interval: DEFAULT_TICK_INTERVAL,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub async fn schedule_job(
        &self,
        queue_id: &str,
        data: serde_json::Value,
        scheduled_for_ms: i64,
        priority: i64,
    ) -> Result<ScheduledJob> {
        let job = ScheduledJob {
            id: uuid::Uuid::new_v4().to_string(),
            queue_id: queue_id.to_string(),
            data,
            scheduled_for: scheduled_for_ms,
            priority,
            timeout: None,
            dependencies: Vec::new(),
            metadata: serde_json::Value::Null,
            rescheduled_count: 0,
            status: "scheduled".to_string(),
        };
        self.persist(&job).await?;
        self.events.emit(
            EventType::JobScheduled,
            Some(queue_id),
            json!({ "job_id": job.id, "scheduled_for": scheduled_for_ms }),
        );
        Ok(job)
    }

    async fn persist(&self, job: &ScheduledJob) -> Result<()> {
        let body = serde_json::to_string(job)
            .map_err(|e| QueueError::validation(ErrorContext::new("schedule_job").queue(&job.queue_id), e.to_string()))?;
        self.storage.hset_field(&keys::job(&job.id), "body", &body).await?;
        self.storage
            .zadd(&keys::scheduled(&job.queue_id), &job.id, job.scheduled_for as f64)
            .await?;
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<ScheduledJob>> {
        let body = self.storage.hget(&keys::job(job_id), "body").await?;
        Ok(body.and_then(|b| serde_json::from_str(&b).ok()))
    }

    pub async fn reschedule_job(&self, job_id: &str, new_scheduled_for_ms: i64) -> Result<ScheduledJob> {
        let ctx = ErrorContext::new("reschedule_job");
        let mut job = self.load(job_id).await?.ok_or_else(|| QueueError::not_found(ctx.clone()))?;
        job.scheduled_for = new_scheduled_for_ms;
        job.rescheduled_count += 1;
        self.persist(&job).await?;
        self.events.emit(
            EventType::JobRescheduled,
            Some(&job.queue_id),
            json!({ "job_id": job_id, "scheduled_for": new_scheduled_for_ms }),
        );
        Ok(job)
    }

    pub async fn cancel_scheduled_job(&self, job_id: &str) -> Result<()> {
        let ctx = ErrorContext::new("cancel_scheduled_job");
        let job = self.load(job_id).await?.ok_or_else(|| QueueError::not_found(ctx))?;
        self.storage.zrem(&keys::scheduled(&job.queue_id), job_id).await?;
        self.storage.del(&keys::job(job_id)).await?;
        self.events.emit(EventType::JobCancelled, Some(&job.queue_id), json!({ "job_id": job_id }));
        Ok(())
    }

    pub async fn get_next_scheduled_time(&self, queue_id: &str) -> Result<Option<i64>> {
        let next = self.storage.zrange_withscores(&keys::scheduled(queue_id), 0, 0).await?;
        Ok(next.into_iter().next().map(|(_, score)| score as i64))
    }

    /// Promotes every due job in `queue_id`, returning how many were moved.
    /// Promotion failures (e.g. the destination queue was deleted) are left
    /// in the scheduled set with `status=failed` and are not retried
    /// automatically, per the scheduler's prescribed failed-promotion
    /// policy — an operator decides what to do with them.
    pub async fn promote_due(&self, queue_id: &str, now_ms: i64, hooks: &HookSet) -> Result<u64> {
        let due_ids = self
            .storage
            .due_scheduled_jobs(&keys::scheduled(queue_id), now_ms, SCHEDULER_BATCH_SIZE)
            .await?;
        let mut promoted = 0u64;
        for job_id in due_ids {
            let Some(job) = self.load(&job_id).await? else { continue };
            match self.queues.add_to_queue(&job.queue_id, job.data.clone(), hooks).await {
                Ok(_) => {
                    self.storage.zrem(&keys::scheduled(&job.queue_id), &job_id).await?;
                    self.storage.del(&keys::job(&job_id)).await?;
                    promoted += 1;
                }
                Err(e) => {
                    log::warn!("scheduled job {job_id} failed to promote: {e}");
                    self.storage.hset_field(&keys::job(&job_id), "status", "failed").await?;
                }
            }
        }
        self.events.emit(
            EventType::ScheduledJobsProcessed,
            Some(queue_id),
            json!({ "promoted": promoted }),
        );
        Ok(promoted)
    }

    /// Starts the background promotion tick. Returns the join handle and a
    /// cancellation token (`Stop()`-equivalent); the broker owns both.
    pub fn start(self: Arc<Self>, queue_ids: Vec<String>, hooks: Arc<HookSet>) -> (JoinHandle<()>, CancellationToken) {
        let token = CancellationToken::new();
        let child_token = token.clone();
        self.running.store(true, Ordering::SeqCst);
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.tick_interval);
            loop {
                tokio::select! {
                    _ = child_token.cancelled() => break,
                    _ = interval.tick() => {
                        let now_ms = chrono::Utc::now().timestamp_millis();
                        for queue_id in &queue_ids {
                            if let Err(e) = scheduler.promote_due(queue_id, now_ms, &hooks).await {
                                log::error!("scheduler tick failed for queue {queue_id}: {e}");
                            }
                        }
                    }
                }
            }
            scheduler.running.store(false, Ordering::SeqCst);
        });
        (handle, token)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
