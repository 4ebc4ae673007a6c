//! Two-replica demo: a grow-only counter converging over the in-memory
//! transport, with eager push and merkle anti-entropy doing the work.

use gossamer_core::{DigestSigner, DigestVerifier, Message, RecordId, Topic};
use gossamer_log::{Effect, ExecutionContext, GossipLog, LogRegistry, Runtime, RuntimeError};
use gossamer_sync::{MemoryTransport, PeerId, SyncConfigBuilder, SyncService, Transport};
use gossamer_view::merge_members;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// A grow-only counter: a map of replica name → contribution count,
/// merged by per-key maximum, valued as the sum.
struct CounterRuntime;

fn counter_merge(a: &Value, b: &Value) -> Value {
    let mut merged = a.as_object().cloned().unwrap_or_default();
    if let Some(other) = b.as_object() {
        for (k, v) in other {
            let existing = merged.get(k).and_then(Value::as_u64).unwrap_or(0);
            merged.insert(k.clone(), json!(existing.max(v.as_u64().unwrap_or(0))));
        }
    }
    Value::Object(merged)
}

impl Runtime for CounterRuntime {
    fn execute(
        &self,
        ctx: &ExecutionContext<'_>,
        message: &Message,
    ) -> Result<Vec<Effect>, RuntimeError> {
        let action: Value = serde_json::from_slice(&message.payload)
            .map_err(|e| RuntimeError::Rejected(e.to_string()))?;
        let key = action["key"].as_str().unwrap_or_default().to_string();
        match action["op"].as_str() {
            Some("create") => Ok(vec![Effect::Write {
                model: "counters".to_string(),
                key,
                value: json!({}),
            }]),
            Some("increment") => {
                let replica = action["replica"].as_str().unwrap_or_default();
                let current = match ctx.resolve("counters", &key) {
                    Some(resolved) => {
                        let members = ctx.visible_members("counters", &key, resolved.csx);
                        merge_members(&members, &counter_merge).unwrap_or(json!({}))
                    }
                    None => return Err(RuntimeError::Rejected("no such counter".to_string())),
                };
                let mine = current[replica].as_u64().unwrap_or(0);
                let mut next = current.as_object().cloned().unwrap_or_default();
                next.insert(replica.to_string(), json!(mine + 1));
                Ok(vec![Effect::Write {
                    model: "counters".to_string(),
                    key,
                    value: Value::Object(next),
                }])
            }
            other => Err(RuntimeError::Rejected(format!("unknown op: {:?}", other))),
        }
    }
}

async fn counter_total(log: &GossipLog, key: &str) -> u64 {
    let snapshot = log.snapshot().await;
    let record = RecordId::derive("counters", key);
    let Some(resolved) = snapshot.resolve_record(&record) else {
        return 0;
    };
    let members = snapshot.visible_members(&record, resolved.csx);
    let merged = merge_members(&members, &counter_merge).unwrap_or(json!({}));
    merged
        .as_object()
        .map(|map| map.values().filter_map(Value::as_u64).sum())
        .unwrap_or(0)
}

async fn wait_for_convergence(a: &GossipLog, b: &GossipLog) {
    loop {
        let (root_a, root_b) = (
            a.snapshot().await.merkle_root(),
            b.snapshot().await.merkle_root(),
        );
        if root_a == root_b {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let topic = Topic::new("demo/counters");
    let alice = DigestSigner::new("alice");
    let bob = DigestSigner::new("bob");

    let registry_a = LogRegistry::new();
    let registry_b = LogRegistry::new();
    let log_a = registry_a
        .open(
            topic.clone(),
            Arc::new(DigestVerifier),
            Arc::new(CounterRuntime),
        )
        .expect("topic is fresh");
    let log_b = registry_b
        .open(
            topic.clone(),
            Arc::new(DigestVerifier),
            Arc::new(CounterRuntime),
        )
        .expect("topic is fresh");

    let transport_a = Arc::new(MemoryTransport::new(PeerId::new("replica-a")));
    let transport_b = Arc::new(MemoryTransport::new(PeerId::new("replica-b")));
    transport_a.connect_to(&transport_b);

    // Staggered sweep intervals keep the two schedulers from habitually
    // dialing each other in the same instant; a short session timeout
    // recovers from any session that stalls anyway.
    let config_a = SyncConfigBuilder::new()
        .sweep_interval(Duration::from_millis(250))
        .cooldown(Duration::from_millis(100))
        .session_timeout(Duration::from_secs(2))
        .build();
    let config_b = SyncConfigBuilder::new()
        .sweep_interval(Duration::from_millis(330))
        .cooldown(Duration::from_millis(100))
        .session_timeout(Duration::from_secs(2))
        .build();
    let service_a = SyncService::start(
        Arc::clone(&log_a),
        Arc::clone(&transport_a) as Arc<dyn Transport>,
        config_a,
    )
    .await;
    let service_b = SyncService::start(
        Arc::clone(&log_b),
        Arc::clone(&transport_b) as Arc<dyn Transport>,
        config_b,
    )
    .await;

    println!("replica A creates counter 'c'");
    log_a
        .append(
            serde_json::to_vec(&json!({"op": "create", "key": "c"})).unwrap(),
            &alice,
        )
        .await
        .expect("append");
    wait_for_convergence(&log_a, &log_b).await;
    println!(
        "  A resolves {}, B resolves {}",
        counter_total(&log_a, "c").await,
        counter_total(&log_b, "c").await
    );

    println!("both replicas increment");
    log_a
        .append(
            serde_json::to_vec(&json!({"op": "increment", "key": "c", "replica": "A"})).unwrap(),
            &alice,
        )
        .await
        .expect("append");
    log_b
        .append(
            serde_json::to_vec(&json!({"op": "increment", "key": "c", "replica": "B"})).unwrap(),
            &bob,
        )
        .await
        .expect("append");
    wait_for_convergence(&log_a, &log_b).await;

    let (total_a, total_b) = (
        counter_total(&log_a, "c").await,
        counter_total(&log_b, "c").await,
    );
    println!("  A resolves {}, B resolves {}", total_a, total_b);
    assert_eq!(total_a, 2);
    assert_eq!(total_b, 2);
    println!(
        "converged: {} messages on each side, identical merkle roots",
        log_a.len().await
    );

    service_a.shutdown();
    service_b.shutdown();
}
