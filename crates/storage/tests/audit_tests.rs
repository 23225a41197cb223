//! Audit trail produced by vault operations and its tamper evidence.

mod common;

use common::{ACTOR, TestVault, block_dir};
use docvault_metadata::models::AuditFilter;
use docvault_core::audit::{AuditOperation, AuditResult};
use docvault_storage::{AuditLog, ExportFormat};
use std::sync::Arc;
use sqlx::SqlitePool;

async fn raw_pool(t: &TestVault) -> SqlitePool {
    SqlitePool::connect(&format!("sqlite://{}", t.db_path().display()))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_operations_leave_intact_chain() {
    let t = TestVault::new().await;
    let stored = t.vault.store(ACTOR, b"audited", "a.txt", None).await.unwrap();
    t.vault.resolve(ACTOR, &stored.storage_key).await.unwrap();
    t.vault.verify_all(ACTOR, None).await.unwrap();

    let records = t.vault.audit().list(&AuditFilter::default()).await.unwrap();
    let ops: Vec<_> = records.iter().map(|r| r.operation.as_str()).collect();
    assert_eq!(ops, ["store", "retrieve", "verify", "verify"]);
    assert!(records[0].prev_hash.is_none());
    assert_eq!(records[1].prev_hash.as_ref(), Some(&records[0].integrity_hash));
    assert_eq!(records[3].subject_key, "batch");

    let report = t.vault.audit().verify_chain(None).await.unwrap();
    assert!(report.is_intact());
    assert_eq!(report.verified_count, 4);
}

#[tokio::test]
async fn test_edited_field_flags_only_that_record() {
    let t = TestVault::new().await;
    let a = t.vault.store(ACTOR, b"a", "a.txt", None).await.unwrap();
    t.vault.store(ACTOR, b"b", "b.txt", None).await.unwrap();
    t.vault.resolve(ACTOR, &a.storage_key).await.unwrap();

    let pool = raw_pool(&t).await;
    sqlx::query("UPDATE audit_records SET actor_id = ? WHERE id = ?")
        .bind("mallory")
        .bind(2_i64)
        .execute(&pool)
        .await
        .unwrap();

    let report = t.vault.audit().verify_chain(None).await.unwrap();
    assert_eq!(report.tampered_records, vec![2]);
    assert_eq!(report.tampered_count, 1);
    assert_eq!(report.verified_count, 2);
    assert!(report.broken_links.is_empty());
}

#[tokio::test]
async fn test_rewritten_hash_breaks_next_link() {
    let t = TestVault::new().await;
    for name in ["a.txt", "b.txt", "c.txt"] {
        t.vault.store(ACTOR, b"x", name, None).await.unwrap();
    }

    let pool = raw_pool(&t).await;
    sqlx::query("UPDATE audit_records SET integrity_hash = ? WHERE id = ?")
        .bind("0".repeat(64))
        .bind(2_i64)
        .execute(&pool)
        .await
        .unwrap();

    let report = t.vault.audit().verify_chain(None).await.unwrap();
    assert_eq!(report.tampered_records, vec![2]);
    assert_eq!(report.broken_links, vec![3]);
    assert!(!report.is_intact());
}

#[tokio::test]
async fn test_subject_verification() {
    let t = TestVault::new().await;
    let a = t.vault.store(ACTOR, b"a", "a.txt", None).await.unwrap();
    let b = t.vault.store(ACTOR, b"b", "b.txt", None).await.unwrap();
    t.vault.resolve(ACTOR, &a.storage_key).await.unwrap();
    t.vault.resolve(ACTOR, &b.storage_key).await.unwrap();

    let report = t
        .vault
        .audit()
        .verify_chain(Some(a.storage_key.as_str()))
        .await
        .unwrap();
    assert_eq!(report.verified_count, 2);
    assert!(report.is_intact());
}

#[tokio::test]
async fn test_failed_store_is_audited() {
    let t = TestVault::new().await;
    block_dir(t.vault.layout().originals_dir());
    block_dir(&t.vault.layout().backup_roots()[0]);
    t.vault
        .store("ops", b"nope", "lost.txt", None)
        .await
        .unwrap_err();

    let records = t
        .vault
        .audit()
        .list(&AuditFilter {
            result: Some("failure".to_string()),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].operation, "store");
    assert_eq!(records[0].subject_key, "upload:lost.txt");
    assert_eq!(records[0].actor_id, "ops");
    assert!(records[0].detail.is_some());
}

#[tokio::test]
async fn test_export_applies_filter_and_flags_tampering() {
    let t = TestVault::new().await;
    let a = t.vault.store(ACTOR, b"a", "a.txt", None).await.unwrap();
    t.vault.store("other", b"b", "b.txt", None).await.unwrap();
    t.vault.resolve(ACTOR, &a.storage_key).await.unwrap();

    let pool = raw_pool(&t).await;
    sqlx::query("UPDATE audit_records SET detail = ? WHERE id = ?")
        .bind("edited")
        .bind(1_i64)
        .execute(&pool)
        .await
        .unwrap();

    let dest = t.path("exports/audit.jsonl");
    let summary = t
        .vault
        .audit()
        .export(
            &AuditFilter {
                actor_id: Some(ACTOR.to_string()),
                ..AuditFilter::default()
            },
            &dest,
            ExportFormat::JsonLines,
        )
        .await
        .unwrap();
    assert_eq!(summary.records, 2);
    assert_eq!(summary.tampered, 1);

    let text = std::fs::read_to_string(&dest).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["operation"], "store");
    assert_eq!(lines[0]["category"], "CRUD");
    assert_eq!(lines[0]["verified"], false);
    assert_eq!(lines[1]["operation"], "retrieve");
    assert_eq!(lines[1]["category"], "ACCESS");
    assert_eq!(lines[1]["security_level"], "standard");
    assert_eq!(lines[1]["verified"], true);
}

#[tokio::test]
async fn test_export_respects_limit() {
    let t = TestVault::new().await;
    for name in ["a", "b", "c", "d"] {
        t.vault.store(ACTOR, b"x", name, None).await.unwrap();
    }

    let summary = t
        .vault
        .audit()
        .export(
            &AuditFilter {
                limit: Some(3),
                ..AuditFilter::default()
            },
            &t.path("limited.jsonl"),
            ExportFormat::JsonLines,
        )
        .await
        .unwrap();
    assert_eq!(summary.records, 3);
}

#[tokio::test]
async fn test_csv_export_quotes_fields() {
    let t = TestVault::new().await;
    let a = t.vault.store(ACTOR, b"a", "a.txt", None).await.unwrap();
    t.vault.resolve(ACTOR, &a.storage_key).await.unwrap();

    let pool = raw_pool(&t).await;
    sqlx::query("UPDATE audit_records SET detail = ? WHERE id = ?")
        .bind("moved, then \"renamed\"")
        .bind(2_i64)
        .execute(&pool)
        .await
        .unwrap();

    let dest = t.path("exports/audit.csv");
    let summary = t
        .vault
        .audit()
        .export(&AuditFilter::default(), &dest, ExportFormat::Csv)
        .await
        .unwrap();
    assert_eq!(summary.records, 2);
    assert_eq!(summary.tampered, 1);

    let text = std::fs::read_to_string(&dest).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines[0],
        "ID,Timestamp,Actor,Operation,Category,Subject,Details,Result,Security Level,Integrity"
    );
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("1,"));
    assert!(lines[1].contains(",store,CRUD,"));
    assert!(lines[1].ends_with(",success,standard,true"));
    assert!(lines[2].contains(",retrieve,ACCESS,"));
    assert!(lines[2].contains(",\"moved, then \"\"renamed\"\"\","));
    assert!(lines[2].ends_with(",false"));
}

#[tokio::test]
async fn test_end_bound_is_inclusive() {
    let t = TestVault::new().await;
    t.vault.store(ACTOR, b"a", "a.txt", None).await.unwrap();
    t.vault.store(ACTOR, b"b", "b.txt", None).await.unwrap();

    let records = t.vault.audit().list(&AuditFilter::default()).await.unwrap();
    let first = docvault_core::audit::parse_timestamp(&records[0].timestamp).unwrap();

    let upto_first = t
        .vault
        .audit()
        .list(&AuditFilter {
            end: Some(first),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(upto_first.len(), 1);
    assert_eq!(upto_first[0].id, 1);

    let exactly_first = t
        .vault
        .audit()
        .list(&AuditFilter {
            start: Some(first),
            end: Some(first),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(exactly_first.len(), 1);

    let before_all = t
        .vault
        .audit()
        .list(&AuditFilter {
            end: Some(first - time::Duration::seconds(1)),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert!(before_all.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_logs_lose_no_records() {
    let t = TestVault::new().await;
    let second_pool = docvault_metadata::from_config(&t.config.metadata)
        .await
        .unwrap();
    let logs = [
        Arc::new(AuditLog::new(t.vault.metadata().clone())),
        Arc::new(AuditLog::new(second_pool)),
    ];

    let mut handles = Vec::new();
    for (n, log) in logs.iter().enumerate() {
        for i in 0..50 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.append(
                    AuditOperation::Retrieve,
                    &format!("k{n}-{i}"),
                    ACTOR,
                    AuditResult::Success,
                    None,
                )
                .await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let report = t.vault.audit().verify_chain(None).await.unwrap();
    assert_eq!(report.verified_count, 100);
    assert!(report.is_intact());
}
