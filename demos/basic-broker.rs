//! Thin illustrative usage of `queue_manager::Broker`. Not part of the
//! library's tested, reviewed core — run against a local Redis with
//! `cargo run --example basic-broker`.

use queue_manager::config::RedisConfig;
use queue_manager::events::hooks::HookSet;
use queue_manager::{BrokerConfig};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = BrokerConfig::default().redis(RedisConfig::default().host("127.0.0.1").port(6379));
    let broker = queue_manager::Broker::connect(config).await?;

    broker.queues().create_queue("orders", "Orders").await?;
    let hooks = HookSet::new();
    broker
        .queues()
        .add_to_queue("orders", json!({ "order_id": 42, "total_cents": 1999 }), &hooks)
        .await?;

    if let Some(item) = broker.queues().pop_from_queue("orders", &hooks).await? {
        println!("popped order {}", item.id);
    }

    let health = broker.health_check().await;
    println!("status={} response_time_ms={}", health.status, health.response_time_ms);

    broker.close(queue_manager::CloseOptions::default()).await?;
    Ok(())
}
