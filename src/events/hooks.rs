//! Before/after hook pipeline surrounding every mutating operation.

use crate::error::{ErrorContext, QueueError, Result};
use crate::model::Item;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// The default cap on hooks per operation; excess hooks are dropped with a
/// warning rather than silently growing the pipeline.
pub const MAX_HOOKS_PER_OPERATION: usize = 10;
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct HookContext {
    pub operation: &'static str,
    pub hook_type: &'static str,
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
}

pub type Hook = Arc<dyn Fn(&Item, &str, &HookContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct HookSet {
    pub before: Vec<Hook>,
    pub after: Vec<Hook>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_before(mut self, hook: Hook) -> Self {
        self.before.push(hook);
        self
    }

    pub fn with_after(mut self, hook: Hook) -> Self {
        self.after.push(hook);
        self
    }
}

/// Runs a capped, sequential, timeout-bounded set of hooks.
pub async fn run_hooks(
    hooks: &[Hook],
    hook_type: &'static str,
    operation: &'static str,
    item: &Item,
    queue_id: &str,
    timeout: Duration,
) -> Result<()> {
    let effective_len = hooks.len().min(MAX_HOOKS_PER_OPERATION);
    if hooks.len() > MAX_HOOKS_PER_OPERATION {
        log::warn!(
            "operation {operation} declared {} {hook_type} hooks, capping at {MAX_HOOKS_PER_OPERATION}",
            hooks.len()
        );
    }
    for (index, hook) in hooks.iter().take(effective_len).enumerate() {
        let ctx = HookContext {
            operation,
            hook_type,
            index,
            timestamp: Utc::now(),
            version: 1,
        };
        let fut = hook(item, queue_id, &ctx);
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => {
                return Err(QueueError::hook(
                    ErrorContext::new(operation).queue(queue_id),
                    hook_type,
                    index,
                    e.to_string(),
                ))
            }
            Err(_) => {
                return Err(QueueError::hook(
                    ErrorContext::new(operation).queue(queue_id),
                    hook_type,
                    index,
                    "hook timed out",
                ))
            }
        }
    }
    Ok(())
}
