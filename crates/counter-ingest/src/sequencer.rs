//! Primary keys for relations whose keys the application assigns
//!
//! None of these relations generate their own keys, so a bulk insert first
//! reads the current maximum and numbers the batch from there.

use crate::db::UsageStore;
use crate::error::StoreError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Application-keyed relations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relation {
    FiscalYears,
    Vendors,
    VendorNotes,
    StatisticsSources,
    StatisticsSourceNotes,
    ResourceSources,
    ResourceSourceNotes,
    CounterData,
}

impl Relation {
    pub const ALL: [Relation; 8] = [
        Relation::FiscalYears,
        Relation::Vendors,
        Relation::VendorNotes,
        Relation::StatisticsSources,
        Relation::StatisticsSourceNotes,
        Relation::ResourceSources,
        Relation::ResourceSourceNotes,
        Relation::CounterData,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Relation::FiscalYears => "fiscal_years",
            Relation::Vendors => "vendors",
            Relation::VendorNotes => "vendor_notes",
            Relation::StatisticsSources => "statistics_sources",
            Relation::StatisticsSourceNotes => "statistics_source_notes",
            Relation::ResourceSources => "resource_sources",
            Relation::ResourceSourceNotes => "resource_source_notes",
            Relation::CounterData => "counter_data",
        }
    }

    pub fn key_column(self) -> &'static str {
        match self {
            Relation::FiscalYears => "fiscal_year_id",
            Relation::Vendors => "vendor_id",
            Relation::VendorNotes => "vendor_notes_id",
            Relation::StatisticsSources => "statistics_source_id",
            Relation::StatisticsSourceNotes => "statistics_source_notes_id",
            Relation::ResourceSources => "resource_source_id",
            Relation::ResourceSourceNotes => "resource_source_notes_id",
            Relation::CounterData => "counter_data_id",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for Relation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Relation::ALL
            .into_iter()
            .find(|relation| relation.table() == normalized)
            .ok_or_else(|| {
                let known: Vec<&str> = Relation::ALL.iter().map(|r| r.table()).collect();
                format!("Unknown relation `{}`; expected one of {}", s, known.join(", "))
            })
    }
}

/// Contiguous keys reserved for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub start: i64,
    pub len: usize,
}

impl KeyRange {
    /// One past the last key
    pub fn end(&self) -> i64 {
        self.start + self.len as i64
    }

    pub fn keys(&self) -> std::ops::Range<i64> {
        self.start..self.end()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Clone)]
pub struct PrimaryKeySequencer {
    store: Arc<dyn UsageStore>,
}

impl PrimaryKeySequencer {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    /// Next free key: one past the current maximum, or 0 for an empty relation
    #[instrument(skip(self))]
    pub async fn next_key(&self, relation: Relation) -> Result<i64, StoreError> {
        let next = match self.store.max_primary_key(relation).await? {
            Some(max) => max + 1,
            None => 0,
        };
        debug!(next, "Computed next primary key");
        Ok(next)
    }

    /// Keys for a batch of `len` rows, to be used by the insert that follows
    pub async fn reserve(&self, relation: Relation, len: usize) -> Result<KeyRange, StoreError> {
        let start = self.next_key(relation).await?;
        Ok(KeyRange { start, len })
    }
}
