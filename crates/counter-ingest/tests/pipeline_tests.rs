//! Deduplication, sequencing, fallback and coordinator tests
//!
//! Everything here runs against the in-memory doubles in `common`.

mod common;

use common::{date, init_tracing, load_fixture, sourced, MemoryObjectStore, MemoryUsageStore};
use counter_ingest::dedup::{DuplicateChecker, ProbeStrategy, DUPLICATE_REPORT_PREAMBLE};
use counter_ingest::error::DATA_NOT_SAVED_NOTICE;
use counter_ingest::fallback::{FallbackName, FallbackPayload, FallbackPersistence};
use counter_ingest::sequencer::{PrimaryKeySequencer, Relation};
use counter_ingest::sushi::{FieldLengthPolicy, UsageReportConverter};
use counter_ingest::{
    FallbackError, IngestError, IngestOutcome, IngestStage, IngestionCoordinator, ObjectStoreError,
    StoreError, SushiReportRequest,
};
use serde_json::json;
use std::sync::Arc;

// ============================================================================
// Deduplication
// ============================================================================

#[tokio::test]
async fn test_dedup_holds_back_stored_triples() {
    init_tracing();
    let store = Arc::new(
        MemoryUsageStore::new()
            .with_source(7, "Example Platform")
            .with_rows(vec![sourced(7, "TR", date(2023, 1, 1), "Total_Item_Requests")]),
    );
    let checker = DuplicateChecker::new(store.clone());

    let batch = vec![
        sourced(7, "TR", date(2023, 1, 1), "Total_Item_Requests"),
        sourced(7, "TR", date(2023, 1, 1), "Unique_Item_Requests"),
        sourced(7, "TR", date(2023, 2, 1), "Total_Item_Requests"),
    ];
    let outcome = checker.check(batch).await.unwrap();

    assert_eq!(outcome.records_already_present.len(), 2);
    assert_eq!(outcome.records_to_load.len(), 1);
    assert_eq!(outcome.records_to_load[0].record.usage_date, date(2023, 2, 1));

    let report = outcome.report.unwrap();
    assert!(report.starts_with(DUPLICATE_REPORT_PREAMBLE));
    assert!(report.ends_with("\nTR | 2023-01-01 | Example Platform (ID 7)"));
    assert_eq!(report.lines().count(), 2);
}

#[tokio::test]
async fn test_dedup_without_collisions_passes_batch_through() {
    let store = Arc::new(MemoryUsageStore::new());
    let batch = vec![
        sourced(1, "DR", date(2023, 1, 1), "Searches_Regular"),
        sourced(1, "DR", date(2023, 1, 1), "Searches_Federated"),
    ];

    let outcome = DuplicateChecker::new(store).check(batch.clone()).await.unwrap();
    assert_eq!(outcome.records_to_load, batch);
    assert!(outcome.records_already_present.is_empty());
    assert!(!outcome.has_duplicates());
}

#[tokio::test]
async fn test_cross_product_reports_unobserved_combinations() {
    let store = Arc::new(
        MemoryUsageStore::new()
            .with_source(2, "Second")
            .with_rows(vec![sourced(2, "TR", date(2023, 1, 1), "Total_Item_Requests")]),
    );
    let batch = vec![
        sourced(1, "TR", date(2023, 1, 1), "Total_Item_Requests"),
        sourced(2, "TR", date(2023, 2, 1), "Total_Item_Requests"),
    ];

    let observed = DuplicateChecker::new(store.clone())
        .check(batch.clone())
        .await
        .unwrap();
    assert!(observed.report.is_none());

    let legacy = DuplicateChecker::new(store.clone())
        .with_strategy(ProbeStrategy::CrossProduct)
        .check(batch)
        .await
        .unwrap();
    assert_eq!(legacy.records_to_load.len(), 2);
    assert!(legacy.report.unwrap().contains("TR | 2023-01-01 | Second (ID 2)"));
}

#[tokio::test]
async fn test_dedup_propagates_storage_failure() {
    let store = Arc::new(MemoryUsageStore::new().failing_reads());
    let result = DuplicateChecker::new(store)
        .check(vec![sourced(1, "TR", date(2023, 1, 1), "Total_Item_Requests")])
        .await;
    assert!(matches!(result, Err(StoreError::StorageUnavailable { .. })));
}

// ============================================================================
// Sequencing
// ============================================================================

#[tokio::test]
async fn test_next_key_follows_maximum() {
    let store = Arc::new(MemoryUsageStore::new().with_keys(Relation::FiscalYears, &[0, 1, 2]));
    let sequencer = PrimaryKeySequencer::new(store);

    assert_eq!(sequencer.next_key(Relation::FiscalYears).await.unwrap(), 3);
    assert_eq!(sequencer.next_key(Relation::Vendors).await.unwrap(), 0);

    let range = sequencer.reserve(Relation::FiscalYears, 4).await.unwrap();
    assert_eq!(range.keys().collect::<Vec<_>>(), vec![3, 4, 5, 6]);
}

// ============================================================================
// Fallback Persistence
// ============================================================================

#[tokio::test]
async fn test_nonstandard_usage_object_keys() {
    let objects = Arc::new(MemoryObjectStore::new("usage"));
    let fallback = FallbackPersistence::new(objects.clone());
    let stem = FallbackName::NonstandardUsage {
        statistics_source_id: 12,
        fiscal_year_id: 5,
    }
    .stem();

    let text = fallback
        .persist(&FallbackPayload::Text("Title,Count\nA,1\n".to_string()), &stem)
        .await
        .unwrap();
    assert_eq!(text.key, "raw-vendor-reports/12_5.txt");
    assert_eq!(text.to_string(), "s3://usage/raw-vendor-reports/12_5.txt");

    let structured = fallback
        .persist(&FallbackPayload::Structured(json!({"rows": [1, 2]})), &stem)
        .await
        .unwrap();
    assert_eq!(structured.key, "raw-vendor-reports/12_5.json");
    assert_eq!(
        objects.content_type("raw-vendor-reports/12_5.json").as_deref(),
        Some("application/json")
    );

    let saved: serde_json::Value =
        serde_json::from_slice(&objects.body("raw-vendor-reports/12_5.json").unwrap()).unwrap();
    assert_eq!(saved, json!({"rows": [1, 2]}));
}

#[tokio::test]
async fn test_stem_with_path_separators_is_uploaded() {
    let objects = Arc::new(MemoryObjectStore::new("usage"));
    let fallback = FallbackPersistence::new(objects.clone());

    let location = fallback
        .persist(&FallbackPayload::Text("raw".to_string()), "archive/2023/7_reports-tr")
        .await
        .unwrap();

    assert_eq!(location.key, "raw-vendor-reports/archive/2023/7_reports-tr.txt");
    assert_eq!(
        objects.body("raw-vendor-reports/archive/2023/7_reports-tr.txt").unwrap(),
        b"raw".to_vec()
    );
}

#[tokio::test]
async fn test_unreachable_bucket_skips_upload() {
    let objects = Arc::new(
        MemoryObjectStore::new("usage").with_head_error(ObjectStoreError::AccessDenied("usage".to_string())),
    );
    let fallback = FallbackPersistence::new(objects.clone());

    let err = fallback
        .persist(&FallbackPayload::Text("x".to_string()), "1_2")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FallbackError::ObjectStoreUnreachable {
            source: ObjectStoreError::AccessDenied(_),
            ..
        }
    ));
    assert!(err.to_string().ends_with(DATA_NOT_SAVED_NOTICE));
    assert!(objects.keys().is_empty());
}

#[tokio::test]
async fn test_missing_bucket_is_reported_distinctly() {
    let objects = Arc::new(
        MemoryObjectStore::new("gone").with_head_error(ObjectStoreError::BucketNotFound("gone".to_string())),
    );
    let err = FallbackPersistence::new(objects)
        .persist(&FallbackPayload::Text("x".to_string()), "1_2")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("bucket `gone` does not exist"));
}

#[tokio::test]
async fn test_write_failure_is_reported() {
    let objects = Arc::new(
        MemoryObjectStore::new("usage").with_put_error(ObjectStoreError::Request("connection reset".to_string())),
    );
    let err = FallbackPersistence::new(objects)
        .with_prefix("failed/")
        .persist(&FallbackPayload::Text("x".to_string()), "1_2")
        .await
        .unwrap_err();

    match err {
        FallbackError::ObjectStoreWriteFailed { key, .. } => assert_eq!(key, "failed/1_2.txt"),
        other => panic!("expected ObjectStoreWriteFailed, got {:?}", other),
    }
}

// ============================================================================
// Coordinator
// ============================================================================

fn request() -> SushiReportRequest {
    SushiReportRequest {
        statistics_source_id: 7,
        report_type: "TR".to_string(),
        range_start: date(2023, 1, 1),
        range_end: date(2023, 2, 28),
    }
}

fn coordinator(
    store: Arc<MemoryUsageStore>,
    objects: Arc<MemoryObjectStore>,
    policy: FieldLengthPolicy,
) -> IngestionCoordinator {
    IngestionCoordinator::new(
        UsageReportConverter::new(policy).unwrap(),
        store,
        FallbackPersistence::new(objects),
    )
}

#[tokio::test]
async fn test_ingest_loads_fixture() {
    init_tracing();
    let store = Arc::new(MemoryUsageStore::new());
    let objects = Arc::new(MemoryObjectStore::new("usage"));
    let coordinator = coordinator(store.clone(), objects.clone(), FieldLengthPolicy::default());

    let outcome = coordinator
        .ingest_sushi_report(&request(), &load_fixture("tr_sample.json"))
        .await
        .unwrap();

    match outcome {
        IngestOutcome::Loaded {
            records,
            first_key,
            duplicates,
            populated_fields,
        } => {
            assert_eq!(records, 5);
            assert_eq!(first_key, 0);
            assert_eq!(duplicates, None);
            for column in ["online_issn", "authors", "parent_title", "parent_isbn", "parent_data_type"] {
                assert!(populated_fields.contains(column), "{} should be populated", column);
            }
            assert!(!populated_fields.contains("parent_doi"));
            assert!(!populated_fields.contains("uri"));
        }
        other => panic!("expected Loaded, got {:?}", other),
    }
    assert_eq!(store.row_count(), 5);
    assert!(store
        .rows
        .lock()
        .unwrap()
        .values()
        .all(|r| r.statistics_source_id == 7 && r.report_type == "TR"));
    assert!(objects.keys().is_empty());
}

#[tokio::test]
async fn test_second_ingest_is_all_duplicates() {
    let store = Arc::new(MemoryUsageStore::new().with_source(7, "Example Platform"));
    let objects = Arc::new(MemoryObjectStore::new("usage"));
    let coordinator = coordinator(store.clone(), objects, FieldLengthPolicy::default());
    let document = load_fixture("tr_sample.json");

    coordinator.ingest_sushi_report(&request(), &document).await.unwrap();
    let second = coordinator.ingest_sushi_report(&request(), &document).await.unwrap();

    match second {
        IngestOutcome::AllDuplicates { report } => {
            assert!(report.contains("TR | 2023-01-01 | Example Platform (ID 7)"));
            assert!(report.contains("TR | 2023-02-01 | Example Platform (ID 7)"));
        }
        other => panic!("expected AllDuplicates, got {:?}", other),
    }
    assert_eq!(store.row_count(), 5);
}

#[tokio::test]
async fn test_conversion_failure_saves_raw_report() {
    let store = Arc::new(MemoryUsageStore::new());
    let objects = Arc::new(MemoryObjectStore::new("usage"));
    let policy = FieldLengthPolicy::default().with_max("resource_name", 10);
    let coordinator = coordinator(store.clone(), objects.clone(), policy);

    let outcome = coordinator
        .ingest_sushi_report(&request(), &load_fixture("tr_sample.json"))
        .await
        .unwrap();

    match outcome {
        IngestOutcome::SavedToFallback { stage, reason, location } => {
            assert_eq!(stage, IngestStage::Conversion);
            assert!(reason.contains("resource_name"));
            assert!(location.key.starts_with("raw-vendor-reports/7_reports-tr_2023-01_2023-02_"));
            assert!(location.key.ends_with(".json"));
        }
        other => panic!("expected SavedToFallback, got {:?}", other),
    }
    assert_eq!(store.row_count(), 0);
    assert_eq!(objects.keys().len(), 1);
}

#[tokio::test]
async fn test_load_failure_saves_raw_report() {
    let store = Arc::new(MemoryUsageStore::new().failing_inserts());
    let objects = Arc::new(MemoryObjectStore::new("usage"));
    let coordinator = coordinator(store, objects.clone(), FieldLengthPolicy::default());

    let outcome = coordinator
        .ingest_sushi_report(&request(), &load_fixture("tr_sample.json"))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        IngestOutcome::SavedToFallback {
            stage: IngestStage::Loading,
            ..
        }
    ));
    assert_eq!(objects.keys().len(), 1);
}

#[tokio::test]
async fn test_failed_fallback_returns_data_not_saved() {
    let store = Arc::new(MemoryUsageStore::new().failing_reads());
    let objects = Arc::new(
        MemoryObjectStore::new("usage").with_head_error(ObjectStoreError::BucketNotFound("usage".to_string())),
    );
    let coordinator = coordinator(store, objects, FieldLengthPolicy::default());

    let err = coordinator
        .ingest_sushi_report(&request(), &load_fixture("tr_sample.json"))
        .await
        .unwrap_err();

    match &err {
        IngestError::DataNotSaved { stage, statistics_source_id, .. } => {
            assert_eq!(*stage, IngestStage::Deduplication);
            assert_eq!(*statistics_source_id, 7);
        }
        other => panic!("expected DataNotSaved, got {:?}", other),
    }
    assert!(err.to_string().ends_with(DATA_NOT_SAVED_NOTICE));
}

#[tokio::test]
async fn test_unreadable_response_saved_as_text() {
    let store = Arc::new(MemoryUsageStore::new());
    let objects = Arc::new(MemoryObjectStore::new("usage"));
    let coordinator = coordinator(store, objects.clone(), FieldLengthPolicy::default());

    let outcome = coordinator
        .save_unreadable_report(&request(), "<html>Service Unavailable</html>", "not JSON")
        .await
        .unwrap();

    let IngestOutcome::SavedToFallback { location, .. } = outcome else {
        panic!("expected SavedToFallback");
    };
    assert!(location.key.ends_with(".txt"));
    assert_eq!(
        objects.content_type(&location.key).as_deref(),
        Some("text/plain")
    );
}

#[tokio::test]
async fn test_store_nonstandard_usage() {
    let store = Arc::new(MemoryUsageStore::new());
    let objects = Arc::new(MemoryObjectStore::new("usage"));
    let coordinator = coordinator(store, objects.clone(), FieldLengthPolicy::default());

    let location = coordinator
        .store_nonstandard_usage(12, 5, &FallbackPayload::Text("usage".to_string()))
        .await
        .unwrap();

    assert_eq!(location.key, "raw-vendor-reports/12_5.txt");
    assert_eq!(objects.keys(), vec!["raw-vendor-reports/12_5.txt".to_string()]);
}
