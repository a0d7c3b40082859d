use super::*;
use crate::test_support::MockSessionRepository;
use chrono::Duration as ChronoDuration;
use medroute_core::session::{ICD_CODE, Metadata, ModificationAction, SNOMED_CODE};
use medroute_infrastructure::AsyncDirSessionRepository;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

fn store_with_mock() -> (SessionStore, Arc<MockSessionRepository>) {
    let repository = Arc::new(MockSessionRepository::new());
    (SessionStore::new(repository.clone()), repository)
}

fn icd(key: &str, value: &str) -> DataItem {
    DataItem::new(ICD_CODE, key, value)
}

#[tokio::test]
async fn test_start_session_is_idempotent() {
    let (store, _) = store_with_mock();

    let first = store.start_session("s1").await;
    assert!(first.is_empty());
    assert!(store.add_item("s1", icd("I10", "Essential hypertension")).await);

    let second = store.start_session("s1").await;
    assert_eq!(second.session_id, "s1");
    assert_eq!(second.created_at, first.created_at);
    assert_eq!(second.len(), 1);
}

#[tokio::test]
async fn test_start_session_loads_durable_record() {
    let (store, repository) = store_with_mock();
    let mut saved = SessionContext::new("stored");
    saved.upsert(icd("E11", "Type 2 diabetes mellitus"));
    repository.insert(saved.clone());

    let loaded = store.start_session("stored").await;
    assert_eq!(loaded, saved);
}

#[tokio::test]
async fn test_upsert_replaces_value_and_logs_each_add() {
    let (store, _) = store_with_mock();
    store.start_session("s1").await;

    assert!(store.add_item("s1", icd("I10", "Hypertension")).await);
    assert!(store.add_item("s1", icd("I10", "Essential (primary) hypertension")).await);

    let ctx = store.snapshot("s1").await.unwrap();
    assert_eq!(ctx.len(), 1);
    assert_eq!(ctx.get("I10").unwrap().value, "Essential (primary) hypertension");
    let adds = ctx
        .modifications
        .iter()
        .filter(|m| m.action == ModificationAction::Add)
        .count();
    assert_eq!(adds, 2);
}

#[tokio::test]
async fn test_unknown_session_mutations_return_false() {
    let (store, repository) = store_with_mock();

    assert!(!store.add_item("ghost", icd("I10", "x")).await);
    assert!(!store.remove_item("ghost", "I10").await);
    assert!(!store.clear("ghost").await);
    assert!(!store.record_query("ghost", "hello").await);
    assert!(store.snapshot("ghost").await.is_none());
    assert!(repository.get("ghost").is_none());
    assert_eq!(store.summarize("ghost").await, "No data in current session.");
    assert!(store.to_table("ghost").await.contains("No data in session"));
}

#[tokio::test]
async fn test_remove_and_clear() {
    let (store, _) = store_with_mock();
    store.start_session("s1").await;
    store.add_item("s1", icd("I10", "Hypertension")).await;
    store.add_item("s1", DataItem::new(SNOMED_CODE, "38341003", "Hypertensive disorder")).await;

    assert!(store.remove_item("s1", "I10").await);
    assert!(!store.remove_item("s1", "I10").await);
    assert_eq!(store.items("s1").await.len(), 1);

    assert!(store.clear("s1").await);
    let ctx = store.snapshot("s1").await.unwrap();
    assert!(ctx.is_empty());
    assert_eq!(
        ctx.modifications.last().map(|m| m.action),
        Some(ModificationAction::ClearAll)
    );
}

#[tokio::test]
async fn test_mutations_auto_save() {
    let (store, repository) = store_with_mock();
    store.start_session("s1").await;

    store.add_item("s1", icd("I10", "Hypertension")).await;
    store.record_query("s1", "find hypertension codes").await;

    let saved = repository.get("s1").unwrap();
    assert!(saved.contains_key("I10"));
    assert_eq!(saved.query_history, vec!["find hypertension codes".to_string()]);
}

#[tokio::test]
async fn test_save_failure_keeps_in_memory_change() {
    let (store, repository) = store_with_mock();
    store.start_session("s1").await;
    repository.fail_saves.store(true, Ordering::SeqCst);

    assert!(store.add_item("s1", icd("I10", "Hypertension")).await);
    assert!(store.has_data("s1").await);
    assert!(repository.get("s1").is_none());
    assert!(!store.save("s1").await);
}

#[tokio::test]
async fn test_items_by_type_and_stats() {
    let (store, _) = store_with_mock();
    store.start_session("s1").await;
    store
        .add_items(
            "s1",
            vec![
                icd("I10", "Hypertension"),
                icd("E11", "Type 2 diabetes"),
                DataItem::new(SNOMED_CODE, "44054006", "Diabetes mellitus type 2"),
            ],
        )
        .await;

    let icd_items = store.items_by_type("s1", ICD_CODE).await;
    assert_eq!(
        icd_items.iter().map(|i| i.key.as_str()).collect::<Vec<_>>(),
        vec!["I10", "E11"]
    );

    let stats = store.stats("s1").await.unwrap();
    assert_eq!(stats.total_items, 3);
    assert_eq!(stats.item_types.get(ICD_CODE), Some(&2));
    assert_eq!(stats.modifications_made, 3);
}

#[tokio::test]
async fn test_to_json_keys_by_item_key() {
    let (store, _) = store_with_mock();
    store.start_session("s1").await;
    let mut metadata = Metadata::new();
    metadata.insert("score".to_string(), json!(0.92));
    store
        .add_item("s1", icd("I10", "Hypertension").with_metadata(metadata))
        .await;

    let json: serde_json::Value = serde_json::from_str(&store.to_json("s1").await.unwrap()).unwrap();
    assert_eq!(json["I10"]["type"], ICD_CODE);
    assert_eq!(json["I10"]["metadata"]["score"], 0.92);
}

#[tokio::test]
async fn test_concurrent_adds_to_one_session_are_not_lost() {
    let repository = Arc::new(MockSessionRepository::new());
    let store = Arc::new(SessionStore::new(repository));
    store.start_session("busy").await;

    let tasks: Vec<_> = (0..50)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .add_item("busy", DataItem::new(ICD_CODE, format!("C{:02}", i), "code"))
                    .await
            })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap());
    }

    let ctx = store.snapshot("busy").await.unwrap();
    assert_eq!(ctx.len(), 50);
    assert_eq!(ctx.modifications.len(), 50);
}

#[tokio::test]
async fn test_eviction_preserves_data() {
    let temp_dir = TempDir::new().unwrap();
    let repository = Arc::new(AsyncDirSessionRepository::new(temp_dir.path()).await.unwrap());
    let store = SessionStore::new(repository.clone());

    for id in ["oldest", "middle", "newest"] {
        store.start_session(id).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let mut metadata = Metadata::new();
    metadata.insert(
        "full_document".to_string(),
        json!({"CODE": "I10", "SAB": "ICD10CM", "OHDSI": "{\"vocab\": \"SNOMED\"}"}),
    );
    store
        .add_item("oldest", icd("I10", "Essential hypertension").with_metadata(metadata))
        .await;
    store.record_query("oldest", "hypertension codes").await;
    let before = store.snapshot("oldest").await.unwrap();

    let report = store.cleanup(7, 2).await;

    assert_eq!(report.sessions_before, 3);
    assert_eq!(report.evicted, vec!["oldest".to_string()]);
    assert_eq!(store.resident_ids().await, vec!["middle".to_string(), "newest".to_string()]);

    let durable = repository.find_by_id("oldest").await.unwrap().unwrap();
    assert_eq!(durable, before);

    // Touching the evicted session brings it back unchanged.
    assert_eq!(store.snapshot("oldest").await.unwrap(), before);
}

#[tokio::test]
async fn test_eviction_skipped_when_save_fails() {
    let (store, repository) = store_with_mock();
    store.start_session("a").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.start_session("b").await;
    repository.fail_saves.store(true, Ordering::SeqCst);

    let report = store.cleanup(7, 1).await;

    assert!(report.evicted.is_empty());
    assert_eq!(store.resident_ids().await.len(), 2);
}

#[tokio::test]
async fn test_cleanup_deletes_expired_durable_records_only() {
    let (store, repository) = store_with_mock();
    let old = Utc::now() - ChronoDuration::days(30);
    repository.insert(SessionContext::restore(
        "expired",
        vec![icd("I10", "Hypertension")],
        Vec::new(),
        Vec::new(),
        old,
        old,
    ));
    repository.insert(SessionContext::restore(
        "old-but-resident",
        Vec::new(),
        Vec::new(),
        Vec::new(),
        old,
        old,
    ));
    repository.insert(SessionContext::new("fresh"));
    store.load("old-but-resident").await;

    let report = store.cleanup(7, 10).await;

    assert_eq!(report.durable_total, 3);
    assert_eq!(report.durable_deleted, vec!["expired".to_string()]);
    assert!(repository.get("expired").is_none());
    assert!(repository.get("old-but-resident").is_some());
    assert!(repository.get("fresh").is_some());
}

#[tokio::test]
async fn test_has_session_list_saved_and_forget() {
    let (store, repository) = store_with_mock();
    repository.insert(SessionContext::new("on-disk"));
    store.start_session("in-memory").await;

    assert!(store.has_session("on-disk").await);
    assert!(store.has_session("in-memory").await);
    assert!(!store.has_session("nowhere").await);

    assert_eq!(store.save_all().await, 1);
    assert_eq!(
        store.list_saved().await,
        vec!["in-memory".to_string(), "on-disk".to_string()]
    );

    assert!(store.forget("in-memory", false).await);
    assert!(store.resident_ids().await.is_empty());
    assert!(repository.get("in-memory").is_some());

    assert!(store.forget("on-disk", true).await);
    assert!(!store.has_session("on-disk").await);
}

#[tokio::test]
async fn test_memory_usage() {
    let (store, _) = store_with_mock();
    store.start_session("a").await;
    store.start_session("b").await;
    store.add_item("a", icd("I10", "Hypertension")).await;
    store.add_item("a", icd("E11", "Diabetes")).await;

    let usage = store.memory_usage().await;
    assert_eq!(usage.sessions_in_memory, 2);
    assert_eq!(usage.total_items, 2);
    assert_eq!(usage.items_per_session.get("a"), Some(&2));
    assert_eq!(usage.items_per_session.get("b"), Some(&0));
}
