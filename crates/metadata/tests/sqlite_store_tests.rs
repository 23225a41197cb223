//! Integration tests for the SQLite metadata store.

mod common;

use common::{TestMetadata, sample_entry};
use docvault_metadata::models::*;
use docvault_metadata::repos::{AuditRepo, IndexRepo, RecordRepo, VersionRepo};
use docvault_metadata::{MetadataError, MetadataStore, SqliteStore};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

fn record(id: &str, key: Option<&str>) -> OwningRecordRow {
    OwningRecordRow {
        record_id: id.to_string(),
        storage_key: key.map(str::to_string),
        legacy_filename: None,
        legacy_path: None,
        updated_at: OffsetDateTime::now_utc(),
    }
}

fn draft(actor: &str, operation: &str, subject: &str) -> AuditDraft {
    AuditDraft {
        actor_id: actor.to_string(),
        operation: operation.to_string(),
        subject_key: subject.to_string(),
        result: "success".to_string(),
        detail: None,
        timestamp: OffsetDateTime::now_utc(),
    }
}

#[tokio::test]
async fn test_entry_put_get_roundtrip() {
    let metadata = TestMetadata::new().await;
    let store = metadata.store();

    let entry = sample_entry("aa01");
    store.put_entry(&entry).await.unwrap();

    let fetched = store.get_entry("aa01").await.unwrap().unwrap();
    assert_eq!(fetched.original_name, "report.pdf");
    assert_eq!(fetched.checksum, entry.checksum);
    assert_eq!(fetched.primary_path, entry.primary_path);
    assert_eq!(fetched.backup_paths, entry.backup_paths);
    assert_eq!(fetched.known_alternate_paths, entry.backup_paths);

    assert!(store.get_entry("missing").await.unwrap().is_none());
    assert!(store.require_entry("missing").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_record_alternate_path_is_idempotent() {
    let metadata = TestMetadata::new().await;
    let store = metadata.store();
    store.put_entry(&sample_entry("aa02")).await.unwrap();

    assert!(store.record_alternate_path("aa02", "/old/uploads/report.pdf").await.unwrap());
    assert!(!store.record_alternate_path("aa02", "/old/uploads/report.pdf").await.unwrap());

    // Backups already count as known locations.
    let backup = sample_entry("aa02").backup_paths[0].clone();
    assert!(!store.record_alternate_path("aa02", &backup).await.unwrap());

    let entry = store.get_entry("aa02").await.unwrap().unwrap();
    assert_eq!(entry.known_alternate_paths.len(), 2);
    assert_eq!(entry.known_alternate_paths[0], backup);
    assert_eq!(entry.known_alternate_paths[1], "/old/uploads/report.pdf");
    assert_eq!(entry.backup_paths, vec![backup]);
}

#[tokio::test]
async fn test_record_alternate_path_unknown_key() {
    let metadata = TestMetadata::new().await;
    let err = metadata
        .store()
        .record_alternate_path("nope", "/x")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_put_entry_preserves_discovered_alternates() {
    let metadata = TestMetadata::new().await;
    let store = metadata.store();
    store.put_entry(&sample_entry("aa03")).await.unwrap();
    store.record_alternate_path("aa03", "/legacy/a.pdf").await.unwrap();

    let mut entry = store.get_entry("aa03").await.unwrap().unwrap();
    entry.original_name = "renamed.pdf".to_string();
    store.put_entry(&entry).await.unwrap();

    let again = store.get_entry("aa03").await.unwrap().unwrap();
    assert_eq!(again.original_name, "renamed.pdf");
    assert!(again.known_alternate_paths.contains(&"/legacy/a.pdf".to_string()));
}

#[tokio::test]
async fn test_all_entries_limit_and_order() {
    let metadata = TestMetadata::new().await;
    let store = metadata.store();
    let base = OffsetDateTime::now_utc();
    for (i, key) in ["cc10", "aa10", "bb10"].iter().enumerate() {
        let mut entry = sample_entry(key);
        entry.created_at = base + time::Duration::seconds(i as i64);
        store.put_entry(&entry).await.unwrap();
    }

    let all = store.all_entries(None).await.unwrap();
    let keys: Vec<_> = all.iter().map(|e| e.storage_key.as_str()).collect();
    assert_eq!(keys, ["cc10", "aa10", "bb10"]);
    assert!(all.iter().all(|e| e.backup_paths.len() == 1));

    assert_eq!(store.all_entries(Some(2)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_delete_entry_removes_paths() {
    let metadata = TestMetadata::new().await;
    let store = metadata.store();
    store.put_entry(&sample_entry("aa04")).await.unwrap();
    store.record_alternate_path("aa04", "/legacy/x").await.unwrap();

    assert!(store.delete_entry("aa04").await.unwrap());
    assert!(!store.delete_entry("aa04").await.unwrap());
    assert!(store.get_entry("aa04").await.unwrap().is_none());
    assert!(store.all_indexed_paths().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_set_primary_path_records_restoration() {
    let metadata = TestMetadata::new().await;
    let store = metadata.store();
    store.put_entry(&sample_entry("aa05")).await.unwrap();
    store.set_unrecoverable("aa05", true).await.unwrap();

    let now = OffsetDateTime::now_utc();
    store
        .set_primary_path("aa05", "/vault/originals/aa/new.pdf", "/legacy/x", now)
        .await
        .unwrap();

    let entry = store.get_entry("aa05").await.unwrap().unwrap();
    assert_eq!(entry.primary_path, "/vault/originals/aa/new.pdf");
    assert_eq!(entry.restored_from.as_deref(), Some("/legacy/x"));
    assert!(entry.restored_at.is_some());
    assert!(!entry.unrecoverable);

    let err = store
        .set_primary_path("missing", "/p", "/q", now)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_index_stats() {
    let metadata = TestMetadata::new().await;
    let store = metadata.store();
    store.put_entry(&sample_entry("aa06")).await.unwrap();
    store.put_entry(&sample_entry("bb06")).await.unwrap();
    store.mark_migrated("aa06", "bb06").await.unwrap();
    store.set_unrecoverable("bb06", true).await.unwrap();
    store.record_alternate_path("bb06", "/legacy/y").await.unwrap();

    let stats = store.index_stats().await.unwrap();
    assert_eq!(
        stats,
        IndexStats {
            entries: 2,
            total_bytes: 6,
            unrecoverable: 1,
            migrated: 1,
            alternate_paths: 1,
        }
    );
}

#[tokio::test]
async fn test_index_survives_reopen() {
    let metadata = TestMetadata::new().await;
    metadata.store().put_entry(&sample_entry("aa07")).await.unwrap();
    metadata.store().close().await;

    let reopened = SqliteStore::new(metadata.path(), 1, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(reopened.entry_exists("aa07").await.unwrap());
}

#[tokio::test]
async fn test_corrupt_index_fails_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    std::fs::write(&path, vec![0xAB; 4096]).unwrap();

    match SqliteStore::new(&path, 1, Duration::from_secs(1)).await {
        Err(MetadataError::IndexCorrupt(_)) => {}
        Err(other) => panic!("expected IndexCorrupt, got {other:?}"),
        Ok(_) => panic!("corrupt index opened"),
    }
    // The damaged file is left in place for inspection.
    assert_eq!(std::fs::read(&path).unwrap(), vec![0xAB; 4096]);
}

#[tokio::test]
async fn test_integrity_check_on_healthy_store() {
    let metadata = TestMetadata::new().await;
    metadata.store().integrity_check().await.unwrap();
}

#[tokio::test]
async fn test_record_reference_moves_owner() {
    let metadata = TestMetadata::new().await;
    let store = metadata.store();
    store.put_entry(&sample_entry("aa08")).await.unwrap();
    store.put_entry(&sample_entry("bb08")).await.unwrap();
    store.upsert_record(&record("doc-1", Some("aa08"))).await.unwrap();
    store.set_owner("aa08", Some("doc-1")).await.unwrap();

    store.update_record_reference("doc-1", "bb08").await.unwrap();

    let rec = store.get_record("doc-1").await.unwrap().unwrap();
    assert_eq!(rec.storage_key.as_deref(), Some("bb08"));
    let old = store.get_entry("aa08").await.unwrap().unwrap();
    let new = store.get_entry("bb08").await.unwrap().unwrap();
    assert_eq!(old.owner_id, None);
    assert_eq!(new.owner_id.as_deref(), Some("doc-1"));
    assert_eq!(
        store.get_entry_by_owner("doc-1").await.unwrap().unwrap().storage_key,
        "bb08"
    );

    let err = store.update_record_reference("doc-404", "bb08").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_migration_cursor_roundtrip() {
    let metadata = TestMetadata::new().await;
    let store = metadata.store();
    assert_eq!(store.migration_cursor().await.unwrap(), None);

    store.set_migration_cursor(Some("doc-10")).await.unwrap();
    store.set_migration_cursor(Some("doc-20")).await.unwrap();
    assert_eq!(store.migration_cursor().await.unwrap().as_deref(), Some("doc-20"));

    store.set_migration_cursor(None).await.unwrap();
    assert_eq!(store.migration_cursor().await.unwrap(), None);
}

#[tokio::test]
async fn test_one_record_per_key() {
    let metadata = TestMetadata::new().await;
    let store = metadata.store();
    store.upsert_record(&record("doc-1", Some("k1"))).await.unwrap();
    let err = store.upsert_record(&record("doc-2", Some("k1"))).await.unwrap_err();
    assert!(matches!(err, MetadataError::Constraint(_)));
}

#[tokio::test]
async fn test_list_records_pages_by_id() {
    let metadata = TestMetadata::new().await;
    let store = metadata.store();
    for id in ["r3", "r1", "r2"] {
        store.upsert_record(&record(id, None)).await.unwrap();
    }
    let first = store.list_records(None, 2).await.unwrap();
    assert_eq!(
        first.iter().map(|r| r.record_id.as_str()).collect::<Vec<_>>(),
        ["r1", "r2"]
    );
    let rest = store.list_records(Some("r2"), 2).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].record_id, "r3");
}

#[tokio::test]
async fn test_clear_record_reference_drops_legacy_hint() {
    let metadata = TestMetadata::new().await;
    let store = metadata.store();
    let mut rec = record("doc-9", Some("k9"));
    rec.legacy_filename = Some("old.pdf".to_string());
    store.upsert_record(&rec).await.unwrap();

    assert_eq!(store.clear_record_reference("k9").await.unwrap(), 1);
    let rec = store.get_record("doc-9").await.unwrap().unwrap();
    assert!(rec.storage_key.is_none());
    assert!(rec.legacy_filename.is_none());
}

#[tokio::test]
async fn test_versions_lineage() {
    let metadata = TestMetadata::new().await;
    let store = metadata.store();
    let now = OffsetDateTime::now_utc();
    let version = |path: &str| NewFileVersion {
        storage_key: "k1".to_string(),
        previous_key: "k0".to_string(),
        path: path.to_string(),
        original_name: "a.txt".to_string(),
        checksum: None,
        size_bytes: 1,
        archived_at: now,
    };
    store.insert_version(&version("/v/1")).await.unwrap();
    store.insert_version(&version("/v/2")).await.unwrap();

    assert_eq!(store.reassign_versions("k1", "k2").await.unwrap(), 2);
    let versions = store.list_versions("k2").await.unwrap();
    assert_eq!(
        versions.iter().map(|v| v.path.as_str()).collect::<Vec<_>>(),
        ["/v/1", "/v/2"]
    );
    assert_eq!(store.all_version_paths().await.unwrap().len(), 2);

    let removed = store.delete_versions("k2").await.unwrap();
    assert_eq!(removed.len(), 2);
    assert!(store.list_versions("k2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_audit_append_chains_records() {
    let metadata = TestMetadata::new().await;
    let store = metadata.store();

    let first = store.append_audit_record(&draft("alice", "store", "k1")).await.unwrap();
    let second = store.append_audit_record(&draft("bob", "retrieve", "k1")).await.unwrap();

    assert_eq!(first.id, 1);
    assert_eq!(first.prev_hash, None);
    assert_eq!(second.id, 2);
    assert_eq!(second.prev_hash.as_deref(), Some(first.integrity_hash.as_str()));
    assert_eq!(first.recompute_hash(), first.integrity_hash);
    assert_eq!(store.count_audit_records().await.unwrap(), 2);

    let stored = store.get_audit_record(2).await.unwrap().unwrap();
    assert_eq!(stored.integrity_hash, second.integrity_hash);
    assert_eq!(stored.timestamp, second.timestamp);
    let before = store.get_audit_record_before(2).await.unwrap().unwrap();
    assert_eq!(before.id, 1);
    assert!(store.get_audit_record_before(1).await.unwrap().is_none());
}

/// Two independent pools over one database file, like two processes.
async fn open_pools(metadata: &TestMetadata) -> [Arc<SqliteStore>; 2] {
    let mut pools = Vec::new();
    for _ in 0..2 {
        let store = SqliteStore::new(metadata.path(), 4, Duration::from_secs(5))
            .await
            .unwrap();
        pools.push(Arc::new(store));
    }
    [pools.remove(0), pools.remove(0)]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_audit_appends_from_separate_pools_keep_one_chain() {
    let metadata = TestMetadata::new().await;
    let stores = open_pools(&metadata).await;

    let mut handles = Vec::new();
    for (n, store) in stores.iter().enumerate() {
        for i in 0..40 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let subject = format!("k{n}-{i}");
                store
                    .append_audit_record(&draft("writer", "store", &subject))
                    .await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let records = stores[0]
        .list_audit_records(&AuditFilter::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 80);
    let mut previous: Option<String> = None;
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.id, i as i64 + 1);
        assert_eq!(record.prev_hash, previous);
        assert_eq!(record.recompute_hash(), record.integrity_hash);
        previous = Some(record.integrity_hash.clone());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reference_updates_from_separate_pools() {
    let metadata = TestMetadata::new().await;
    let stores = open_pools(&metadata).await;
    for i in 0..20 {
        let id = format!("doc-{i}");
        let key = format!("cc{i:02}");
        stores[0].put_entry(&sample_entry(&key)).await.unwrap();
        stores[0].upsert_record(&record(&id, None)).await.unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = stores[i % 2].clone();
        handles.push(tokio::spawn(async move {
            store
                .update_record_reference(&format!("doc-{i}"), &format!("cc{i:02}"))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for i in 0..20 {
        let rec = stores[1].get_record(&format!("doc-{i}")).await.unwrap().unwrap();
        assert_eq!(rec.storage_key, Some(format!("cc{i:02}")));
    }
}

#[tokio::test]
async fn test_audit_filters() {
    let metadata = TestMetadata::new().await;
    let store = metadata.store();
    let base = OffsetDateTime::now_utc();

    for (i, (actor, op)) in [("alice", "store"), ("bob", "retrieve"), ("alice", "delete")]
        .iter()
        .enumerate()
    {
        let mut d = draft(actor, op, "k1");
        d.timestamp = base + time::Duration::minutes(i as i64);
        store.append_audit_record(&d).await.unwrap();
    }

    let by_actor = store
        .list_audit_records(&AuditFilter {
            actor_id: Some("alice".to_string()),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(by_actor.len(), 2);

    let by_op = store
        .list_audit_records(&AuditFilter {
            operation: Some("retrieve".to_string()),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(by_op.len(), 1);
    assert_eq!(by_op[0].actor_id, "bob");

    let window = store
        .list_audit_records(&AuditFilter {
            start: Some(base + time::Duration::seconds(30)),
            end: Some(base + time::Duration::minutes(2)),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].id, 2);

    let paged = store
        .list_audit_records(&AuditFilter {
            after_id: Some(1),
            limit: Some(1),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].id, 2);
}
