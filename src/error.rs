//! Central error taxonomy.
//!
//! Every subsystem translates its underlying failures into a [`QueueError`]
//! here rather than leaking `redis::RedisError` or ad-hoc strings upward.
//! Classification of Redis errors is centralized in [`classify_redis_error`]
//! so there is exactly one place that decides what a connection failure,
//! a `WRONGTYPE`, or a script error means for a caller.

use std::fmt;

/// Context carried alongside every classified error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub operation: &'static str,
    pub queue_id: Option<String>,
    pub item_id: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            queue_id: None,
            item_id: None,
        }
    }

    pub fn queue(mut self, queue_id: impl Into<String>) -> Self {
        self.queue_id = Some(queue_id.into());
        self
    }

    pub fn item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation={}", self.operation)?;
        if let Some(q) = &self.queue_id {
            write!(f, " queue_id={q}")?;
        }
        if let Some(i) = &self.item_id {
            write!(f, " item_id={i}")?;
        }
        Ok(())
    }
}

/// The error kinds enumerated in the broker's error taxonomy.
#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    #[error("validation failed ({ctx}): {message}")]
    Validation { ctx: ErrorContext, message: String },

    #[error("not found ({ctx})")]
    NotFound { ctx: ErrorContext },

    #[error("already exists ({ctx})")]
    AlreadyExists { ctx: ErrorContext },

    #[error("timed out ({ctx}) after {elapsed_ms}ms")]
    Timeout { ctx: ErrorContext, elapsed_ms: u64 },

    #[error("storage error ({ctx}): {source}")]
    Storage {
        ctx: ErrorContext,
        #[source]
        source: redis::RedisError,
    },

    #[error("cache error ({ctx}): {message}")]
    Cache { ctx: ErrorContext, message: String },

    #[error("hook error ({ctx}) hook_type={hook_type} index={index}: {message}")]
    Hook {
        ctx: ErrorContext,
        hook_type: &'static str,
        index: usize,
        message: String,
    },

    #[error("rate limit exceeded ({ctx}): {reason} window={window}")]
    RateLimit {
        ctx: ErrorContext,
        reason: String,
        window: String,
    },

    #[error("dependency error ({ctx}): {message}")]
    Dependency { ctx: ErrorContext, message: String },

    #[error("circuit open ({ctx})")]
    CircuitOpen { ctx: ErrorContext },

    #[error("unknown error ({ctx}): {message}")]
    Unknown { ctx: ErrorContext, message: String },
}

impl QueueError {
    pub fn validation(ctx: ErrorContext, message: impl Into<String>) -> Self {
        Self::Validation {
            ctx,
            message: message.into(),
        }
    }

    pub fn not_found(ctx: ErrorContext) -> Self {
        Self::NotFound { ctx }
    }

    pub fn already_exists(ctx: ErrorContext) -> Self {
        Self::AlreadyExists { ctx }
    }

    pub fn timeout(ctx: ErrorContext, elapsed_ms: u64) -> Self {
        Self::Timeout { ctx, elapsed_ms }
    }

    pub fn cache(ctx: ErrorContext, message: impl Into<String>) -> Self {
        Self::Cache {
            ctx,
            message: message.into(),
        }
    }

    pub fn hook(ctx: ErrorContext, hook_type: &'static str, index: usize, message: impl Into<String>) -> Self {
        Self::Hook {
            ctx,
            hook_type,
            index,
            message: message.into(),
        }
    }

    pub fn rate_limit(ctx: ErrorContext, reason: impl Into<String>, window: impl Into<String>) -> Self {
        Self::RateLimit {
            ctx,
            reason: reason.into(),
            window: window.into(),
        }
    }

    pub fn dependency(ctx: ErrorContext, message: impl Into<String>) -> Self {
        Self::Dependency {
            ctx,
            message: message.into(),
        }
    }

    pub fn unknown(ctx: ErrorContext, message: impl Into<String>) -> Self {
        Self::Unknown {
            ctx,
            message: message.into(),
        }
    }

    /// The kind as a stable, event-bus-friendly string.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Timeout { .. } => "timeout",
            Self::Storage { .. } => "storage",
            Self::Cache { .. } => "cache",
            Self::Hook { .. } => "hook",
            Self::RateLimit { .. } => "rate_limit",
            Self::Dependency { .. } => "dependency",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Unknown { .. } => "unknown",
        }
    }
}

/// Turn a raw Redis error into a classified [`QueueError::Storage`].
/// The single place a `redis::RedisError` becomes a broker error.
pub fn classify_redis_error(ctx: ErrorContext, source: redis::RedisError) -> QueueError {
    QueueError::Storage { ctx, source }
}

pub type Result<T> = std::result::Result<T, QueueError>;
