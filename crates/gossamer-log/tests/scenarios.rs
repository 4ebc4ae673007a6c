//! Application scenarios driven through runtimes.

use gossamer_core::{DigestSigner, DigestVerifier, Message, RecordId, Topic};
use gossamer_log::{Effect, ExecutionContext, GossipLog, Runtime, RuntimeError};
use gossamer_view::LedgerStore;
use serde_json::{json, Value};
use std::sync::Arc;

fn payload(value: Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

/// A small social runtime: accounts and posts.
///
/// - `createUser {name}` registers an account record.
/// - `createPost {content, from}` writes one post record keyed by the
///   message id, so every post is its own record.
struct SocialRuntime;

impl Runtime for SocialRuntime {
    fn execute(
        &self,
        ctx: &ExecutionContext<'_>,
        message: &Message,
    ) -> Result<Vec<Effect>, RuntimeError> {
        let action: Value = serde_json::from_slice(&message.payload)
            .map_err(|e| RuntimeError::Rejected(e.to_string()))?;
        match action["op"].as_str() {
            Some("createUser") => {
                let name = action["name"].as_str().unwrap_or_default();
                Ok(vec![Effect::Write {
                    model: "users".to_string(),
                    key: name.to_string(),
                    value: json!({"name": name}),
                }])
            }
            Some("createPost") => {
                let from = action["from"].as_str().unwrap_or_default();
                if ctx.resolve("users", from).is_none() {
                    return Err(RuntimeError::Rejected(format!("unknown author: {}", from)));
                }
                Ok(vec![Effect::Write {
                    model: "posts".to_string(),
                    key: ctx.id().to_hex(),
                    value: json!({
                        "content": action["content"],
                        "from": from,
                    }),
                }])
            }
            other => Err(RuntimeError::Rejected(format!("unknown op: {:?}", other))),
        }
    }
}

#[tokio::test]
async fn test_concurrent_post_creation() {
    let log = GossipLog::new(
        Topic::new("app"),
        Arc::new(DigestVerifier),
        Arc::new(SocialRuntime),
    );
    let alice = DigestSigner::new("alice");

    log.append(payload(json!({"op": "createUser", "name": "alice"})), &alice)
        .await
        .unwrap();
    log.append(
        payload(json!({"op": "createPost", "content": "foo", "from": "alice"})),
        &alice,
    )
    .await
    .unwrap();
    log.append(
        payload(json!({"op": "createPost", "content": "bar", "from": "alice"})),
        &alice,
    )
    .await
    .unwrap();

    let snapshot = log.snapshot().await;
    let posts: Vec<Value> = snapshot
        .records_of_model("posts")
        .iter()
        .filter_map(|record| snapshot.resolve_record(record))
        .map(|resolved| resolved.value)
        .collect();

    assert_eq!(posts.len(), 2);
    let contents: Vec<&str> = posts
        .iter()
        .filter_map(|p| p["content"].as_str())
        .collect();
    assert!(contents.contains(&"foo"));
    assert!(contents.contains(&"bar"));
    for post in &posts {
        assert_eq!(post["from"], json!("alice"));
    }
}

#[tokio::test]
async fn test_post_requires_account() {
    let log = GossipLog::new(
        Topic::new("app"),
        Arc::new(DigestVerifier),
        Arc::new(SocialRuntime),
    );
    let mallory = DigestSigner::new("mallory");

    let err = log
        .append(
            payload(json!({"op": "createPost", "content": "spam", "from": "mallory"})),
            &mallory,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown author"));
    assert_eq!(log.len().await, 0);
}

/// A moderated document runtime exercising retroactive reverts.
///
/// - `createDoc {key, body, author}` / `editDoc {key, body, author}` write
///   document records.
/// - `suspend {user}` marks an account suspended and invalidates every
///   already-applied edit by that user that is ordered after the
///   suspension but was executed without knowing it.
/// - An edit executes as a no-op when an applied suspension ordered before
///   it is on file, so replicas that learn of the suspension first reach
///   the same resolved state as replicas that learn of it last.
struct ModerationRuntime;

impl Runtime for ModerationRuntime {
    fn execute(
        &self,
        ctx: &ExecutionContext<'_>,
        message: &Message,
    ) -> Result<Vec<Effect>, RuntimeError> {
        let action: Value = serde_json::from_slice(&message.payload)
            .map_err(|e| RuntimeError::Rejected(e.to_string()))?;
        match action["op"].as_str() {
            Some("createDoc") | Some("editDoc") => {
                let author = action["author"].as_str().unwrap_or_default();
                let suspended = ctx
                    .writes_of("users", author)
                    .iter()
                    .any(|w| w.value["suspended"] == json!(true) && w.message_id < ctx.id());
                if suspended {
                    return Ok(Vec::new());
                }
                Ok(vec![Effect::Write {
                    model: "docs".to_string(),
                    key: action["key"].as_str().unwrap_or_default().to_string(),
                    value: json!({
                        "body": action["body"],
                        "author": author,
                    }),
                }])
            }
            Some("suspend") => {
                let user = action["user"].as_str().unwrap_or_default();
                let mut effects = Vec::new();
                for record in ctx.records_of_model("docs") {
                    for write in ctx.writes_of_record(&record) {
                        let by_user = write.value["author"] == json!(user);
                        let ordered_after = write.message_id > ctx.id();
                        let unaware = !ctx.is_ancestor(&[write.message_id], &ctx.id());
                        if by_user && ordered_after && unaware {
                            effects.push(Effect::Revert {
                                effect_id: write.message_id,
                            });
                        }
                    }
                }
                effects.push(Effect::Write {
                    model: "users".to_string(),
                    key: user.to_string(),
                    value: json!({"suspended": true}),
                });
                Ok(effects)
            }
            other => Err(RuntimeError::Rejected(format!("unknown op: {:?}", other))),
        }
    }
}

fn moderated_log() -> GossipLog {
    GossipLog::new(
        Topic::new("wiki"),
        Arc::new(DigestVerifier),
        Arc::new(ModerationRuntime),
    )
}

/// The late-arriving suspension causally precedes bob's edit in id order
/// but reaches the replica after the edit was already resolved. Inserting
/// it must produce a revert row for exactly the invalidated edit and flip
/// resolution back to the pre-edit value.
#[tokio::test]
async fn test_late_suspension_reverts_resolved_edit() {
    let admin = DigestSigner::new("admin");
    let bob = DigestSigner::new("bob");

    // Replica B: create, then bob pads the clock and edits.
    let log_b = moderated_log();
    let (create_id, _) = log_b
        .append(
            payload(json!({"op": "createDoc", "key": "d", "body": "hello", "author": "admin"})),
            &admin,
        )
        .await
        .unwrap();
    let create_encoded = log_b.encoded(&create_id).await.unwrap();
    // Clock padding by an unsuspended author, so only the edit is ever
    // ordered after the suspension.
    log_b
        .append(
            payload(json!({"op": "createDoc", "key": "scratch", "body": "", "author": "admin"})),
            &admin,
        )
        .await
        .unwrap();
    let (edit_id, _) = log_b
        .append(
            payload(json!({"op": "editDoc", "key": "d", "body": "defaced", "author": "bob"})),
            &bob,
        )
        .await
        .unwrap();
    assert_eq!(
        log_b.resolve("docs", "d").await.unwrap().value["body"],
        json!("defaced")
    );

    // Replica A diverged after the create: it only knows the suspension.
    let log_a = moderated_log();
    log_a.insert_encoded(&create_encoded).await.unwrap();
    let (suspend_id, _) = log_a
        .append(payload(json!({"op": "suspend", "user": "bob"})), &admin)
        .await
        .unwrap();
    let suspend_encoded = log_a.encoded(&suspend_id).await.unwrap();
    assert!(suspend_id < edit_id);

    // The suspension arrives late at B, after the edit was resolved.
    log_b.insert_encoded(&suspend_encoded).await.unwrap();

    let snapshot = log_b.snapshot().await;
    assert_eq!(snapshot.ledger().revert_count(), 1);
    assert_eq!(snapshot.ledger().revert_causes(&edit_id), vec![suspend_id]);
    assert_eq!(
        snapshot.resolve("docs", "d").unwrap().value["body"],
        json!("hello")
    );
}

/// Whatever order the same messages arrive in, the fully synced replicas
/// resolve the document identically.
#[tokio::test]
async fn test_suspension_converges_across_arrival_orders() {
    let admin = DigestSigner::new("admin");
    let bob = DigestSigner::new("bob");

    let log_b = moderated_log();
    let (create_id, _) = log_b
        .append(
            payload(json!({"op": "createDoc", "key": "d", "body": "hello", "author": "admin"})),
            &admin,
        )
        .await
        .unwrap();
    let create_encoded = log_b.encoded(&create_id).await.unwrap();
    let (scratch_id, _) = log_b
        .append(
            payload(json!({"op": "createDoc", "key": "scratch", "body": "", "author": "admin"})),
            &admin,
        )
        .await
        .unwrap();
    let scratch_encoded = log_b.encoded(&scratch_id).await.unwrap();
    let (edit_id, _) = log_b
        .append(
            payload(json!({"op": "editDoc", "key": "d", "body": "defaced", "author": "bob"})),
            &bob,
        )
        .await
        .unwrap();
    let edit_encoded = log_b.encoded(&edit_id).await.unwrap();

    let log_a = moderated_log();
    log_a.insert_encoded(&create_encoded).await.unwrap();
    let (suspend_id, _) = log_a
        .append(payload(json!({"op": "suspend", "user": "bob"})), &admin)
        .await
        .unwrap();
    let suspend_encoded = log_a.encoded(&suspend_id).await.unwrap();

    // B learns of the suspension last; A learns of the edit last.
    log_b.insert_encoded(&suspend_encoded).await.unwrap();
    log_a.insert_encoded(&scratch_encoded).await.unwrap();
    log_a.insert_encoded(&edit_encoded).await.unwrap();

    assert_eq!(log_a.heads().await, log_b.heads().await);
    let resolved_a = log_a.resolve("docs", "d").await.unwrap();
    let resolved_b = log_b.resolve("docs", "d").await.unwrap();
    assert_eq!(resolved_a.value["body"], json!("hello"));
    assert_eq!(resolved_b.value["body"], json!("hello"));
}

#[tokio::test]
async fn test_record_ids_are_stable() {
    // The `(model, key)` → record id mapping is deterministic, so external
    // tooling can address records without consulting the ledger.
    assert_eq!(
        RecordId::derive("docs", "d"),
        RecordId::derive("docs", "d")
    );
}
