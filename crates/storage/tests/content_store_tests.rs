//! Store, update and delete behavior of the content store.

mod common;

use common::{ACTOR, TestVault, block_dir, seeded_bytes, sha256_hash, unblock_dir};
use docvault_metadata::repos::{IndexRepo, RecordRepo};
use docvault_storage::{ResolutionTier, StorageError};

#[tokio::test]
async fn test_store_then_resolve_round_trip() {
    let t = TestVault::new().await;
    let data = seeded_bytes(7, 64 * 1024);

    let stored = t
        .vault
        .store(ACTOR, &data, "scan.pdf", None)
        .await
        .unwrap();
    assert_eq!(stored.size_bytes, data.len() as u64);
    assert_eq!(stored.content_type, "application/pdf");
    assert_eq!(
        stored.checksum.map(|c| c.to_hex()),
        Some(sha256_hash(&data))
    );
    assert!(
        stored
            .storage_key
            .as_str()
            .ends_with(&sha256_hash(&data)[..16])
    );

    let resolution = t.vault.resolve(ACTOR, &stored.storage_key).await.unwrap();
    assert_eq!(resolution.tier, ResolutionTier::Primary);
    assert!(!resolution.repaired);
    assert_eq!(std::fs::read(&resolution.path).unwrap(), data.to_vec());
}

#[tokio::test]
async fn test_empty_content_round_trip() {
    let t = TestVault::new().await;

    let stored = t.vault.store(ACTOR, b"", "empty.txt", None).await.unwrap();
    assert_eq!(stored.size_bytes, 0);
    assert_eq!(stored.checksum.map(|c| c.to_hex()), Some(sha256_hash(b"")));
    assert_eq!(std::fs::read(&stored.primary_path).unwrap(), b"");

    let resolution = t.vault.resolve(ACTOR, &stored.storage_key).await.unwrap();
    assert_eq!(resolution.tier, ResolutionTier::Primary);
    assert!(resolution.content.is_empty());

    std::fs::remove_file(&stored.primary_path).unwrap();
    let repaired = t.vault.resolve(ACTOR, &stored.storage_key).await.unwrap();
    assert_eq!(repaired.tier, ResolutionTier::Backup);
    assert!(repaired.repaired);
    assert!(repaired.content.is_empty());
    assert_eq!(std::fs::read(&stored.primary_path).unwrap(), b"");
}

#[tokio::test]
async fn test_backups_hold_identical_copies() {
    let t = TestVault::with_config(|config, dir| {
        config.storage.backup_roots = vec![dir.join("mirror-a"), dir.join("mirror-b")];
        config.storage.backup_count = 2;
    })
    .await;

    let stored = t
        .vault
        .store(ACTOR, b"redundant", "notes.txt", None)
        .await
        .unwrap();
    assert_eq!(stored.backup_paths.len(), 2);
    assert!(stored.backup_paths[0].starts_with(t.path("mirror-a")));
    assert!(stored.backup_paths[1].starts_with(t.path("mirror-b")));
    for path in stored.copies() {
        assert_eq!(std::fs::read(path).unwrap(), b"redundant");
    }

    let entry = t
        .vault
        .metadata()
        .require_entry(stored.storage_key.as_str())
        .await
        .unwrap();
    assert_eq!(entry.backup_paths.len(), 2);
    assert_eq!(entry.content_type, "text/plain");
}

#[tokio::test]
async fn test_identical_content_gets_distinct_keys() {
    let t = TestVault::new().await;
    let a = t.vault.store(ACTOR, b"same", "a.txt", None).await.unwrap();
    let b = t.vault.store(ACTOR, b"same", "a.txt", None).await.unwrap();
    assert_ne!(a.storage_key, b.storage_key);
    assert_ne!(a.primary_path, b.primary_path);
}

#[tokio::test]
async fn test_failed_primary_with_backup_is_degraded_success() {
    let t = TestVault::new().await;
    let originals = t.vault.layout().originals_dir().to_path_buf();
    block_dir(&originals);

    let stored = t
        .vault
        .store(ACTOR, b"degraded", "memo.txt", None)
        .await
        .unwrap();
    assert!(!stored.primary_path.exists());
    assert_eq!(std::fs::read(&stored.backup_paths[0]).unwrap(), b"degraded");

    unblock_dir(&originals);
    let resolution = t.vault.resolve(ACTOR, &stored.storage_key).await.unwrap();
    assert_eq!(resolution.tier, ResolutionTier::Backup);
    assert!(resolution.repaired);
    assert_eq!(std::fs::read(&stored.primary_path).unwrap(), b"degraded");
}

#[tokio::test]
async fn test_all_writes_failing_is_unavailable() {
    let t = TestVault::new().await;
    block_dir(t.vault.layout().originals_dir());
    block_dir(&t.vault.layout().backup_roots()[0]);

    match t.vault.store(ACTOR, b"lost", "lost.txt", None).await {
        Err(StorageError::StorageUnavailable(_)) => {}
        other => panic!("expected StorageUnavailable, got {other:?}"),
    }
    let stats = t.vault.metadata().index_stats().await.unwrap();
    assert_eq!(stats.entries, 0);
}

#[tokio::test]
async fn test_store_with_owner_creates_record() {
    let t = TestVault::new().await;
    let stored = t
        .vault
        .store(ACTOR, b"owned", "owned.txt", Some("doc-1"))
        .await
        .unwrap();

    let record = t.vault.metadata().get_record("doc-1").await.unwrap().unwrap();
    assert_eq!(record.storage_key.as_deref(), Some(stored.storage_key.as_str()));
    let entry = t
        .vault
        .metadata()
        .require_entry(stored.storage_key.as_str())
        .await
        .unwrap();
    assert_eq!(entry.owner_id.as_deref(), Some("doc-1"));
}

#[tokio::test]
async fn test_update_archives_previous_revision() {
    let t = TestVault::new().await;
    let first = t
        .vault
        .store(ACTOR, b"v1", "draft.txt", Some("doc-9"))
        .await
        .unwrap();

    let second = t
        .vault
        .update(ACTOR, &first.storage_key, b"v2")
        .await
        .unwrap();
    assert_ne!(first.storage_key, second.storage_key);
    assert_eq!(second.original_name, "draft.txt");
    assert!(!first.primary_path.exists());
    assert!(!first.backup_paths[0].exists());
    assert!(
        !t.vault
            .metadata()
            .entry_exists(first.storage_key.as_str())
            .await
            .unwrap()
    );

    let third = t
        .vault
        .update(ACTOR, &second.storage_key, b"v3")
        .await
        .unwrap();
    let versions = t.vault.versions(&third.storage_key).await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(std::fs::read(&versions[0].path).unwrap(), b"v1");
    assert_eq!(std::fs::read(&versions[1].path).unwrap(), b"v2");
    assert_eq!(versions[0].previous_key, first.storage_key.as_str());
    assert_eq!(versions[1].previous_key, second.storage_key.as_str());

    let record = t.vault.metadata().get_record("doc-9").await.unwrap().unwrap();
    assert_eq!(record.storage_key.as_deref(), Some(third.storage_key.as_str()));
    assert_eq!(
        t.vault.read(ACTOR, &third.storage_key).await.unwrap().as_ref(),
        b"v3"
    );
}

#[tokio::test]
async fn test_delete_removes_copies_versions_and_entry() {
    let t = TestVault::new().await;
    let first = t
        .vault
        .store(ACTOR, b"one", "gone.txt", Some("doc-2"))
        .await
        .unwrap();
    let second = t
        .vault
        .update(ACTOR, &first.storage_key, b"two")
        .await
        .unwrap();
    let version_path = t.vault.versions(&second.storage_key).await.unwrap()[0]
        .path
        .clone();

    let report = t.vault.delete(ACTOR, &second.storage_key).await.unwrap();
    assert_eq!(report.files_removed, 3);
    assert_eq!(report.versions_removed, 1);
    assert_eq!(report.records_cleared, 1);
    assert!(report.errors.is_empty());

    assert!(!second.primary_path.exists());
    assert!(!second.backup_paths[0].exists());
    assert!(!std::path::Path::new(&version_path).exists());
    match t.vault.resolve(ACTOR, &second.storage_key).await {
        Err(StorageError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
    let record = t.vault.metadata().get_record("doc-2").await.unwrap().unwrap();
    assert!(record.storage_key.is_none());
}

#[tokio::test]
async fn test_delete_unknown_key_is_not_found() {
    let t = TestVault::new().await;
    let key = docvault_core::StorageKey::parse("missing-key").unwrap();
    match t.vault.delete(ACTOR, &key).await {
        Err(StorageError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stats_counts_each_area() {
    let t = TestVault::new().await;
    let stored = t.vault.store(ACTOR, b"12345", "a.bin", None).await.unwrap();
    t.vault.store(ACTOR, b"678", "b.bin", None).await.unwrap();
    t.vault
        .update(ACTOR, &stored.storage_key, b"1234567")
        .await
        .unwrap();

    let stats = t.vault.stats().await.unwrap();
    assert_eq!(stats.originals.files, 2);
    assert_eq!(stats.originals.bytes, 10);
    assert_eq!(stats.backups.files, 2);
    assert_eq!(stats.versions.files, 1);
    assert_eq!(stats.versions.bytes, 5);
    assert_eq!(stats.index.entries, 2);
    assert_eq!(stats.index.total_bytes, 10);
}

#[tokio::test]
async fn test_entries_survive_reopen() {
    let t = TestVault::new().await;
    let stored = t.vault.store(ACTOR, b"durable", "d.txt", None).await.unwrap();

    let t = t.reopen().await;
    assert_eq!(
        t.vault.read(ACTOR, &stored.storage_key).await.unwrap().as_ref(),
        b"durable"
    );
}

#[tokio::test]
async fn test_describe_reports_index_view() {
    let t = TestVault::new().await;
    let stored = t.vault.store(ACTOR, b"meta", "m.csv", None).await.unwrap();
    std::fs::remove_file(&stored.primary_path).unwrap();

    let described = t.vault.describe(&stored.storage_key).await.unwrap();
    assert_eq!(described.storage_key, stored.storage_key);
    assert_eq!(described.content_type, "text/csv");
    assert_eq!(described.primary_path, stored.primary_path);
    assert_eq!(described.backup_paths, stored.backup_paths);
    assert!(!stored.primary_path.exists());
}
