//! Last-resort persistence of raw payloads
//!
//! When a report cannot be converted or loaded, the raw payload is uploaded
//! to object storage under a deterministic name so it can be reloaded later.

use crate::error::FallbackError;
use crate::storage::{calculate_sha256, ObjectStore};
use counter_common::CounterError;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, instrument};

pub const DEFAULT_FALLBACK_PREFIX: &str = "raw-vendor-reports/";

/// What gets saved
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackPayload {
    /// Saved as pretty-printed JSON
    Structured(Value),
    /// Saved as plain text
    Text(String),
}

impl FallbackPayload {
    pub fn extension(&self) -> &'static str {
        match self {
            FallbackPayload::Structured(_) => ".json",
            FallbackPayload::Text(_) => ".txt",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            FallbackPayload::Structured(_) => "application/json",
            FallbackPayload::Text(_) => "text/plain",
        }
    }

    /// Read a usage file from disk. `.json` files must hold valid JSON and
    /// are kept structured; anything else is kept as text.
    pub async fn from_file(path: &Path) -> counter_common::Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            let value: Value = serde_json::from_str(&text).map_err(CounterError::from)?;
            Ok(FallbackPayload::Structured(value))
        } else {
            Ok(FallbackPayload::Text(text))
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>, FallbackError> {
        match self {
            FallbackPayload::Structured(value) => Ok(serde_json::to_vec_pretty(value)?),
            FallbackPayload::Text(text) => Ok(text.as_bytes().to_vec()),
        }
    }
}

/// Object name stems
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackName {
    /// A harvested report that could not be loaded
    FailedSushiPull {
        statistics_source_id: i64,
        report_path: String,
        range_start: NaiveDate,
        range_end: NaiveDate,
        timestamp: NaiveDateTime,
    },
    /// A usage file that is not in COUNTER format
    NonstandardUsage {
        statistics_source_id: i64,
        fiscal_year_id: i64,
    },
}

impl FallbackName {
    /// A failed pull stamped with the current time
    pub fn failed_sushi_pull(
        statistics_source_id: i64,
        report_path: impl Into<String>,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Self {
        FallbackName::FailedSushiPull {
            statistics_source_id,
            report_path: report_path.into(),
            range_start,
            range_end,
            timestamp: Utc::now().naive_utc(),
        }
    }

    pub fn stem(&self) -> String {
        match self {
            FallbackName::FailedSushiPull {
                statistics_source_id,
                report_path,
                range_start,
                range_end,
                timestamp,
            } => format!(
                "{}_{}_{}_{}_{}",
                statistics_source_id,
                report_path.replace('/', "-"),
                range_start.format("%Y-%m"),
                range_end.format("%Y-%m"),
                timestamp.format("%Y-%m-%dT%H:%M:%S"),
            ),
            FallbackName::NonstandardUsage {
                statistics_source_id,
                fiscal_year_id,
            } => format!("{}_{}", statistics_source_id, fiscal_year_id),
        }
    }
}

impl fmt::Display for FallbackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem())
    }
}

/// Where a payload ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedLocation {
    pub bucket: String,
    pub key: String,
    pub size: usize,
    pub checksum: String,
}

impl fmt::Display for PersistedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

#[derive(Clone)]
pub struct FallbackPersistence {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl FallbackPersistence {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            prefix: DEFAULT_FALLBACK_PREFIX.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn object_key(&self, payload: &FallbackPayload, name_stem: &str) -> String {
        format!("{}{}{}", self.prefix, name_stem, payload.extension())
    }

    /// Stage `payload` in a temporary file and upload it as
    /// `{prefix}{name_stem}{extension}`. The temporary file is removed
    /// whether or not the upload succeeds.
    #[instrument(skip(self, payload), fields(bucket = %self.store.bucket()))]
    pub async fn persist(
        &self,
        payload: &FallbackPayload,
        name_stem: &str,
    ) -> Result<PersistedLocation, FallbackError> {
        let key = self.object_key(payload, name_stem);

        let mut staged = tempfile::Builder::new()
            .prefix("fallback-")
            .suffix(payload.extension())
            .tempfile()?;
        staged.write_all(&payload.to_bytes()?)?;
        staged.flush()?;

        let body = tokio::fs::read(staged.path()).await?;
        let size = body.len();
        let checksum = calculate_sha256(&body);

        let uploaded = self.upload(&key, body, payload.content_type()).await;
        let cleanup = staged.close();

        if let Err(err) = uploaded {
            error!(key = %key, "{}", err);
            return Err(err);
        }
        cleanup?;

        let location = PersistedLocation {
            bucket: self.store.bucket().to_string(),
            key,
            size,
            checksum,
        };
        info!(location = %location, size, "Saved raw payload to object storage");
        Ok(location)
    }

    async fn upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), FallbackError> {
        self.store
            .head_bucket()
            .await
            .map_err(|source| FallbackError::ObjectStoreUnreachable {
                bucket: self.store.bucket().to_string(),
                source,
            })?;

        self.store
            .put_object(key, body, content_type)
            .await
            .map_err(|source| FallbackError::ObjectStoreWriteFailed {
                key: key.to_string(),
                source,
            })
    }
}
