//! Shared helpers for integration tests
//!
//! In-memory [`UsageStore`] and [`ObjectStore`] doubles plus fixture loading.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use counter_ingest::db::UsageStore;
use counter_ingest::dedup::UsageTriple;
use counter_ingest::error::{ObjectStoreError, StoreError};
use counter_ingest::sequencer::Relation;
use counter_ingest::storage::ObjectStore;
use counter_ingest::sushi::{FlatUsageRecord, RawUsageDocument, ResourceMetadata, SourcedUsageRecord};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,counter_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn load_fixture(name: &str) -> RawUsageDocument {
    let bytes = std::fs::read(fixture_path(name)).expect("fixture should exist");
    RawUsageDocument::from_slice(&bytes).expect("fixture should be a valid report")
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

/// A bare record for one source, report type and usage date
pub fn sourced(source: i64, report_type: &str, usage_date: NaiveDate, metric: &str) -> SourcedUsageRecord {
    SourcedUsageRecord::new(
        source,
        report_type,
        FlatUsageRecord {
            report_creation_date: date(2023, 2, 1),
            item: ResourceMetadata {
                resource_name: Some("Journal of Examples".to_string()),
                ..ResourceMetadata::default()
            },
            parent: ResourceMetadata::default(),
            usage_date,
            metric_type: metric.to_string(),
            usage_count: 1,
        },
    )
}

fn unavailable(operation: &'static str) -> StoreError {
    StoreError::unavailable(operation, sqlx::Error::PoolTimedOut)
}

// ============================================================================
// Usage Store Double
// ============================================================================

#[derive(Default)]
pub struct MemoryUsageStore {
    pub rows: Mutex<BTreeMap<i64, SourcedUsageRecord>>,
    pub source_names: Mutex<HashMap<i64, String>>,
    pub keys: Mutex<HashMap<Relation, Vec<i64>>>,
    pub fail_reads: bool,
    pub fail_inserts: bool,
    pub probes: Mutex<Vec<UsageTriple>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(self, id: i64, name: &str) -> Self {
        self.source_names.lock().unwrap().insert(id, name.to_string());
        self
    }

    pub fn with_keys(self, relation: Relation, keys: &[i64]) -> Self {
        self.keys.lock().unwrap().insert(relation, keys.to_vec());
        self
    }

    /// Pretend `records` were loaded earlier, keyed from 0
    pub fn with_rows(self, records: Vec<SourcedUsageRecord>) -> Self {
        {
            let mut rows = self.rows.lock().unwrap();
            for record in records {
                let key = rows.len() as i64;
                rows.insert(key, record);
            }
        }
        self
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn failing_inserts(mut self) -> Self {
        self.fail_inserts = true;
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn count_existing_usage(&self, triple: &UsageTriple) -> Result<i64, StoreError> {
        if self.fail_reads {
            return Err(unavailable("count_existing_usage"));
        }
        self.probes.lock().unwrap().push(triple.clone());
        let rows = self.rows.lock().unwrap();
        Ok(rows.values().filter(|r| UsageTriple::of(r) == *triple).count() as i64)
    }

    async fn statistics_source_name(&self, statistics_source_id: i64) -> Result<Option<String>, StoreError> {
        if self.fail_reads {
            return Err(unavailable("statistics_source_name"));
        }
        Ok(self.source_names.lock().unwrap().get(&statistics_source_id).cloned())
    }

    async fn max_primary_key(&self, relation: Relation) -> Result<Option<i64>, StoreError> {
        if self.fail_reads {
            return Err(unavailable("max_primary_key"));
        }
        if relation == Relation::CounterData {
            return Ok(self.rows.lock().unwrap().keys().next_back().copied());
        }
        Ok(self
            .keys
            .lock()
            .unwrap()
            .get(&relation)
            .and_then(|keys| keys.iter().max().copied()))
    }

    async fn insert_usage(&self, first_key: i64, records: &[SourcedUsageRecord]) -> Result<u64, StoreError> {
        if self.fail_inserts {
            return Err(unavailable("insert_usage"));
        }
        let mut rows = self.rows.lock().unwrap();
        for (offset, record) in records.iter().enumerate() {
            rows.insert(first_key + offset as i64, record.clone());
        }
        Ok(records.len() as u64)
    }
}

// ============================================================================
// Object Store Double
// ============================================================================

pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

pub struct MemoryObjectStore {
    bucket: String,
    pub objects: Mutex<HashMap<String, StoredObject>>,
    pub head_error: Option<ObjectStoreError>,
    pub put_error: Option<ObjectStoreError>,
}

impl MemoryObjectStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Mutex::new(HashMap::new()),
            head_error: None,
            put_error: None,
        }
    }

    pub fn with_head_error(mut self, err: ObjectStoreError) -> Self {
        self.head_error = Some(err);
        self
    }

    pub fn with_put_error(mut self, err: ObjectStoreError) -> Self {
        self.put_error = Some(err);
        self
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|o| o.body.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.lock().unwrap().get(key).map(|o| o.content_type.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head_bucket(&self) -> Result<(), ObjectStoreError> {
        match &self.head_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), ObjectStoreError> {
        if let Some(err) = &self.put_error {
            return Err(err.clone());
        }
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}
