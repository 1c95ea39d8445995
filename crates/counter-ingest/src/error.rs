//! Error types for the ingestion pipeline
//!
//! One enum per layer: the codec raises [`ConversionError`], relational
//! round trips raise [`StoreError`], object storage raises
//! [`ObjectStoreError`] which fallback persistence wraps in [`FallbackError`],
//! and the coordinator reports [`IngestError`].

use crate::sushi::field_length::FieldTooLong;
use std::fmt;
use thiserror::Error;

/// Appended to every message that means a payload was lost.
pub const DATA_NOT_SAVED_NOTICE: &str = "THE DATA HAS NOT BEEN SAVED IN ANY WAY!";

/// Errors raised while converting a report into flat usage records.
///
/// Any of these aborts the whole document; no records are returned.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error(
        "Item {item_index}: `{field}` is {length} characters long. \
         Increase the `{field}` max field length to {suggested_max}"
    )]
    FieldTooLong {
        field: String,
        item_index: usize,
        length: usize,
        suggested_max: usize,
    },

    #[error("Unable to parse `{field}` value `{value}`")]
    UnparsableValue { field: String, value: String },

    #[error("Item {item_index}: malformed `{key}`: {reason}")]
    Malformed {
        item_index: usize,
        key: String,
        reason: String,
    },

    #[error("Invalid identifier pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl ConversionError {
    pub(crate) fn field_too_long(err: FieldTooLong, item_index: usize) -> Self {
        ConversionError::FieldTooLong {
            field: err.field,
            item_index,
            length: err.length,
            suggested_max: err.suggested_max,
        }
    }

    pub(crate) fn unparsable(field: impl Into<String>, value: impl Into<String>) -> Self {
        ConversionError::UnparsableValue {
            field: field.into(),
            value: value.into(),
        }
    }

    pub(crate) fn malformed(
        item_index: usize,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConversionError::Malformed {
            item_index,
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from the relational store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage unavailable during {operation}: {source}")]
    StorageUnavailable {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    pub fn unavailable(operation: &'static str, source: sqlx::Error) -> Self {
        StoreError::StorageUnavailable { operation, source }
    }
}

/// Errors from the object store client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreError {
    #[error("access to bucket `{0}` was denied")]
    AccessDenied(String),

    #[error("bucket `{0}` does not exist")]
    BucketNotFound(String),

    #[error("{0}")]
    Request(String),
}

/// Errors from fallback persistence. Every message states that the data was
/// not saved.
#[derive(Error, Debug)]
pub enum FallbackError {
    #[error(
        "Unable to confirm bucket `{bucket}` is reachable ({source}), so no upload was attempted; \
         THE DATA HAS NOT BEEN SAVED IN ANY WAY!"
    )]
    ObjectStoreUnreachable {
        bucket: String,
        #[source]
        source: ObjectStoreError,
    },

    #[error("Uploading `{key}` failed ({source}); THE DATA HAS NOT BEEN SAVED IN ANY WAY!")]
    ObjectStoreWriteFailed {
        key: String,
        #[source]
        source: ObjectStoreError,
    },

    #[error("Unable to serialize the payload ({0}); THE DATA HAS NOT BEEN SAVED IN ANY WAY!")]
    Serialization(#[from] serde_json::Error),

    #[error(
        "Unable to stage the payload in a temporary file ({0}); \
         THE DATA HAS NOT BEEN SAVED IN ANY WAY!"
    )]
    TempFile(#[from] std::io::Error),
}

/// Pipeline stage at which an ingestion failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Conversion,
    Deduplication,
    Sequencing,
    Loading,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Conversion => "conversion",
            IngestStage::Deduplication => "deduplication",
            IngestStage::Sequencing => "primary key sequencing",
            IngestStage::Loading => "loading",
        };
        f.write_str(name)
    }
}

/// Errors returned by the ingestion coordinator
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Fallback(#[from] FallbackError),

    #[error(
        "The {report_type} report for statistics source {statistics_source_id} failed during \
         {stage} ({reason}) and saving the raw report failed as well: {fallback}"
    )]
    DataNotSaved {
        statistics_source_id: i64,
        report_type: String,
        stage: IngestStage,
        reason: String,
        #[source]
        fallback: FallbackError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_errors_state_data_not_saved() {
        let unreachable = FallbackError::ObjectStoreUnreachable {
            bucket: "usage".to_string(),
            source: ObjectStoreError::AccessDenied("usage".to_string()),
        };
        let message = unreachable.to_string();
        assert!(message.contains("access to bucket `usage` was denied"));
        assert!(message.ends_with(DATA_NOT_SAVED_NOTICE));

        let write = FallbackError::ObjectStoreWriteFailed {
            key: "raw-vendor-reports/1_2.txt".to_string(),
            source: ObjectStoreError::Request("timeout".to_string()),
        };
        assert!(write.to_string().ends_with(DATA_NOT_SAVED_NOTICE));
    }

    #[test]
    fn test_field_too_long_message_names_remediation() {
        let err = ConversionError::FieldTooLong {
            field: "publisher".to_string(),
            item_index: 3,
            length: 300,
            suggested_max: 330,
        };
        assert_eq!(
            err.to_string(),
            "Item 3: `publisher` is 300 characters long. \
             Increase the `publisher` max field length to 330"
        );
    }
}
