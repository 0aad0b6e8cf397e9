//! The event-type vocabulary, kept verbatim for external observers. These
//! strings are part of the broker's wire contract — never rename one.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    QueueCreated,
    QueueUpdated,
    QueueDeleted,
    QueuePaused,
    QueueResumed,
    QueueCleared,
    QueueRenamedIn,
    QueueRenamedOut,
    ItemAdded,
    ItemUpdated,
    ItemDeleted,
    ItemPeeked,
    ItemPopped,
    ItemsBatchPopped,
    ItemRequeued,
    ItemMovedIn,
    ItemMovedOut,
    ItemFound,
    ItemsFiltered,
    ItemAddedPriority,
    ItemPoppedPriority,
    ItemPriorityUpdated,
    QueueReorderedPriority,
    JobScheduled,
    JobCancelled,
    JobRescheduled,
    ScheduledJobsProcessed,
    JobAddedDependencies,
    JobReady,
    JobCompleted,
    JobFailed,
    JobTimedOut,
    JobAddedTimeout,
    JobTimeoutExtended,
    JobRoutedDlq,
    JobRetrySuccess,
    JobRetryFailed,
    JobRetryAttempt,
    RateLimitConfigured,
    RateLimitDisabled,
    RateLimitCountersReset,
    SchemaConfigured,
    SchemaDisabled,
    AuditConfigured,
    AuditLogged,
    AuditDisabled,
    AuditCleaned,
    RedisConnected,
    RedisDisconnected,
    RedisReconnecting,
    RedisError,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueCreated => "queue:created",
            Self::QueueUpdated => "queue:updated",
            Self::QueueDeleted => "queue:deleted",
            Self::QueuePaused => "queue:paused",
            Self::QueueResumed => "queue:resumed",
            Self::QueueCleared => "queue:cleared",
            Self::QueueRenamedIn => "queue:renamed:in",
            Self::QueueRenamedOut => "queue:renamed:out",
            Self::ItemAdded => "item:added",
            Self::ItemUpdated => "item:updated",
            Self::ItemDeleted => "item:deleted",
            Self::ItemPeeked => "item:peeked",
            Self::ItemPopped => "item:popped",
            Self::ItemsBatchPopped => "items:batch:popped",
            Self::ItemRequeued => "item:requeued",
            Self::ItemMovedIn => "item:moved:in",
            Self::ItemMovedOut => "item:moved:out",
            Self::ItemFound => "item:found",
            Self::ItemsFiltered => "items:filtered",
            Self::ItemAddedPriority => "item:added:priority",
            Self::ItemPoppedPriority => "item:popped:priority",
            Self::ItemPriorityUpdated => "item:priority:updated",
            Self::QueueReorderedPriority => "queue:reordered:priority",
            Self::JobScheduled => "job:scheduled",
            Self::JobCancelled => "job:cancelled",
            Self::JobRescheduled => "job:rescheduled",
            Self::ScheduledJobsProcessed => "scheduled:jobs:processed",
            Self::JobAddedDependencies => "job:added:dependencies",
            Self::JobReady => "job:ready",
            Self::JobCompleted => "job:completed",
            Self::JobFailed => "job:failed",
            Self::JobTimedOut => "job:timed_out",
            Self::JobAddedTimeout => "job:added:timeout",
            Self::JobTimeoutExtended => "job:timeout:extended",
            Self::JobRoutedDlq => "job:routed:dlq",
            Self::JobRetrySuccess => "job:retry:success",
            Self::JobRetryFailed => "job:retry:failed",
            Self::JobRetryAttempt => "job:retry:attempt",
            Self::RateLimitConfigured => "rate_limit:configured",
            Self::RateLimitDisabled => "rate_limit:disabled",
            Self::RateLimitCountersReset => "rate_limit:counters:reset",
            Self::SchemaConfigured => "schema:configured",
            Self::SchemaDisabled => "schema:disabled",
            Self::AuditConfigured => "audit:configured",
            Self::AuditLogged => "audit:logged",
            Self::AuditDisabled => "audit:disabled",
            Self::AuditCleaned => "audit:cleaned",
            Self::RedisConnected => "redis:connected",
            Self::RedisDisconnected => "redis:disconnected",
            Self::RedisReconnecting => "redis:reconnecting",
            Self::RedisError => "redis:error",
            Self::Error => "error",
        }
    }

    pub fn hook_error(hook_type: &str) -> String {
        format!("hook:{hook_type}:error")
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
