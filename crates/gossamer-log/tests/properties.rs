//! Property tests for the log's structural invariants.

use gossamer_core::{codec, DigestSigner, DigestVerifier, Message, MessageId, Signer, Topic};
use gossamer_log::{
    Effect, ExecutionContext, GossipLog, InsertError, NoopRuntime, Runtime, RuntimeError,
};
use proptest::prelude::*;
use std::sync::Arc;
use tokio::runtime::Builder;

/// Runtime interpreting payloads as `{"model", "key", "value"}` writes.
struct KvRuntime;

impl Runtime for KvRuntime {
    fn execute(
        &self,
        _ctx: &ExecutionContext<'_>,
        message: &Message,
    ) -> Result<Vec<Effect>, RuntimeError> {
        let action: serde_json::Value = serde_json::from_slice(&message.payload)
            .map_err(|e| RuntimeError::Rejected(e.to_string()))?;
        Ok(vec![Effect::Write {
            model: action["model"].as_str().unwrap_or("kv").to_string(),
            key: action["key"].as_str().unwrap_or_default().to_string(),
            value: action["value"].clone(),
        }])
    }
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
        .block_on(future)
}

fn next(seed: &mut u64) -> u64 {
    *seed = seed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    *seed >> 33
}

/// Build a DAG with concurrent branches: each message picks a pseudo-random
/// subset of the current tips as parents, so divergent branches and merge
/// points both occur. Returns the signed encodings in insertion order.
fn build_branchy_dag(writer_choices: &[usize], mut seed: u64) -> Vec<Vec<u8>> {
    let signers = [
        DigestSigner::new("a"),
        DigestSigner::new("b"),
        DigestSigner::new("c"),
    ];
    let topic = Topic::new("t");
    let mut tips: Vec<MessageId> = Vec::new();
    let mut encodings = Vec::new();

    for (i, &writer) in writer_choices.iter().enumerate() {
        let parents = if tips.is_empty() {
            Vec::new()
        } else {
            let count = 1 + (next(&mut seed) as usize % tips.len().min(2));
            let mut picked = Vec::new();
            for _ in 0..count {
                let idx = next(&mut seed) as usize % tips.len();
                if !picked.contains(&tips[idx]) {
                    picked.push(tips[idx]);
                }
            }
            picked
        };

        let action = serde_json::json!({
            "model": "kv",
            "key": "shared",
            "value": format!("v{}", i),
        });
        let message = Message::on_parents(
            topic.clone(),
            parents.clone(),
            serde_json::to_vec(&action).unwrap(),
        );
        let signature = signers[writer]
            .sign(&codec::encode_unsigned(&message))
            .unwrap();
        let encoded = codec::encode_signed(&signature, &message);
        let (id, _, _) = codec::decode(&encoded).unwrap();

        tips.retain(|tip| !parents.contains(tip));
        tips.push(id);
        encodings.push(encoded);
    }
    encodings
}

async fn insert_in_order(log: &GossipLog, encodings: &[Vec<u8>]) {
    for encoded in encodings {
        log.insert_encoded(encoded).await.unwrap();
    }
}

/// Insert in a different causally-valid order: repeatedly try messages
/// starting from a pseudo-random index until one is insertable.
async fn insert_shuffled(log: &GossipLog, encodings: &[Vec<u8>], mut seed: u64) {
    let mut remaining: Vec<&Vec<u8>> = encodings.iter().collect();
    while !remaining.is_empty() {
        let start = next(&mut seed) as usize % remaining.len();
        let mut inserted = false;
        for offset in 0..remaining.len() {
            let idx = (start + offset) % remaining.len();
            match log.insert_encoded(remaining[idx]).await {
                Ok(_) => {
                    remaining.remove(idx);
                    inserted = true;
                    break;
                }
                Err(InsertError::MissingParents(_)) => continue,
                Err(e) => panic!("unexpected insert error: {}", e),
            }
        }
        assert!(inserted, "no insertable message found");
    }
}

fn kv_log() -> GossipLog {
    GossipLog::new(
        Topic::new("t"),
        Arc::new(DigestVerifier),
        Arc::new(KvRuntime),
    )
}

proptest! {
    /// Every parent id is strictly less than its child's id, however the
    /// DAG grows.
    #[test]
    fn prop_parent_ids_precede_children(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 1..30)
    ) {
        block_on(async move {
            let log = GossipLog::new(
                Topic::new("t"),
                Arc::new(DigestVerifier),
                Arc::new(NoopRuntime),
            );
            let signer = DigestSigner::new("alice");
            for payload in payloads {
                log.append(payload, &signer).await.unwrap();
            }
            let snapshot = log.snapshot().await;
            for id in snapshot.ids() {
                for parent in &snapshot.get(&id).unwrap().message.parents {
                    prop_assert!(*parent < id, "parent {} !< child {}", parent, id);
                }
            }
            Ok(())
        })?;
    }

    /// For a fixed final message set, resolution is independent of the
    /// order the messages were inserted in.
    #[test]
    fn prop_resolution_is_order_independent(
        writer_choices in prop::collection::vec(0..3usize, 4..14),
        dag_seed in any::<u64>(),
        shuffle_seed in any::<u64>(),
    ) {
        block_on(async move {
            let encodings = build_branchy_dag(&writer_choices, dag_seed);

            let reference = kv_log();
            insert_in_order(&reference, &encodings).await;
            let expected = reference.resolve("kv", "shared").await;

            let replica = kv_log();
            insert_shuffled(&replica, &encodings, shuffle_seed).await;
            let resolved = replica.resolve("kv", "shared").await;

            prop_assert_eq!(replica.len().await, reference.len().await);
            prop_assert_eq!(replica.heads().await, reference.heads().await);
            prop_assert_eq!(
                resolved.as_ref().map(|r| (&r.value, r.version)),
                expected.as_ref().map(|r| (&r.value, r.version))
            );
            Ok(())
        })?;
    }
}
