//! Maximum character lengths of destination columns
//!
//! Values longer than their column allows abort the whole report; nothing is
//! ever truncated.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::error;

// ============================================================================
// Default Column Maxima
// ============================================================================

pub const RESOURCE_NAME_MAX: usize = 2000;
pub const PUBLISHER_MAX: usize = 225;
pub const PUBLISHER_ID_MAX: usize = 50;
pub const PLATFORM_MAX: usize = 75;
pub const AUTHORS_MAX: usize = 1000;
pub const DOI_MAX: usize = 75;
pub const PROPRIETARY_ID_MAX: usize = 100;
pub const URI_MAX: usize = 250;

const DEFAULT_MAXIMA: [(&str, usize); 16] = [
    ("resource_name", RESOURCE_NAME_MAX),
    ("parent_title", RESOURCE_NAME_MAX),
    ("publisher", PUBLISHER_MAX),
    ("parent_publisher", PUBLISHER_MAX),
    ("publisher_id", PUBLISHER_ID_MAX),
    ("parent_publisher_id", PUBLISHER_ID_MAX),
    ("platform", PLATFORM_MAX),
    ("parent_platform", PLATFORM_MAX),
    ("authors", AUTHORS_MAX),
    ("parent_authors", AUTHORS_MAX),
    ("doi", DOI_MAX),
    ("parent_doi", DOI_MAX),
    ("proprietary_id", PROPRIETARY_ID_MAX),
    ("parent_proprietary_id", PROPRIETARY_ID_MAX),
    ("uri", URI_MAX),
    ("parent_uri", URI_MAX),
];

/// A value exceeded its column's maximum length
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Increase the `{field}` max field length to {suggested_max}")]
pub struct FieldTooLong {
    pub field: String,
    pub length: usize,
    pub suggested_max: usize,
}

/// Smallest maximum that fits `length` with ten percent headroom
pub fn suggested_max(length: usize) -> usize {
    (length * 11).div_ceil(10)
}

/// Column name to maximum length in characters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLengthPolicy {
    maxima: BTreeMap<String, usize>,
}

impl Default for FieldLengthPolicy {
    fn default() -> Self {
        Self {
            maxima: DEFAULT_MAXIMA
                .iter()
                .map(|(field, max)| (field.to_string(), *max))
                .collect(),
        }
    }
}

impl FieldLengthPolicy {
    /// Columns that carry a maximum by default
    pub fn default_fields() -> impl Iterator<Item = &'static str> {
        DEFAULT_MAXIMA.iter().map(|(field, _)| *field)
    }

    pub fn with_max(mut self, field: impl Into<String>, max: usize) -> Self {
        self.maxima.insert(field.into(), max);
        self
    }

    pub fn max_for(&self, field: &str) -> Option<usize> {
        self.maxima.get(field).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.maxima.iter().map(|(field, max)| (field.as_str(), *max))
    }

    /// Accept `value` for `field`, or report how long the column needs to be.
    /// Fields without a maximum always pass.
    pub fn check(&self, field: &str, value: &str) -> Result<String, FieldTooLong> {
        let Some(max) = self.max_for(field) else {
            return Ok(value.to_string());
        };

        let length = value.chars().count();
        if length <= max {
            return Ok(value.to_string());
        }

        let err = FieldTooLong {
            field: field.to_string(),
            length,
            suggested_max: suggested_max(length),
        };
        error!(field, length, max, "{}", err);
        Err(err)
    }
}
