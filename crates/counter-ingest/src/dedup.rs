//! Detect usage that is already stored
//!
//! Before loading, every (statistics source, report type, usage date) triple
//! in the batch is probed against the store. Records for a triple that
//! already has rows are held back and listed in a report for the operator.

use crate::db::UsageStore;
use crate::error::StoreError;
use crate::sushi::SourcedUsageRecord;
use chrono::NaiveDate;
use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const DUPLICATE_REPORT_PREAMBLE: &str = "Usage statistics for the report type, usage date, \
    and statistics source combination(s) below, which were included in the upload, are already \
    in the database; as a result, it wasn't uploaded to the database. If the data needs to be \
    re-uploaded, please remove the existing data from the database first.";

/// Key under which stored usage is considered the same
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UsageTriple {
    pub statistics_source_id: i64,
    pub report_type: String,
    pub usage_date: NaiveDate,
}

impl UsageTriple {
    pub fn of(record: &SourcedUsageRecord) -> Self {
        Self {
            statistics_source_id: record.statistics_source_id,
            report_type: record.report_type.clone(),
            usage_date: record.record.usage_date,
        }
    }
}

/// Which triples get probed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeStrategy {
    /// Only the triples that occur in the batch
    #[default]
    ObservedTriples,
    /// Every combination of the distinct sources, report types and dates in
    /// the batch. May report collisions no record in the batch belongs to.
    CrossProduct,
}

impl ProbeStrategy {
    pub fn triples(self, batch: &[SourcedUsageRecord]) -> BTreeSet<UsageTriple> {
        match self {
            ProbeStrategy::ObservedTriples => batch.iter().map(UsageTriple::of).collect(),
            ProbeStrategy::CrossProduct => {
                let sources: BTreeSet<i64> = batch.iter().map(|r| r.statistics_source_id).collect();
                let report_types: BTreeSet<&str> = batch.iter().map(|r| r.report_type.as_str()).collect();
                let dates: BTreeSet<NaiveDate> = batch.iter().map(|r| r.record.usage_date).collect();

                let mut triples = BTreeSet::new();
                for source in &sources {
                    for report_type in &report_types {
                        for date in &dates {
                            triples.insert(UsageTriple {
                                statistics_source_id: *source,
                                report_type: report_type.to_string(),
                                usage_date: *date,
                            });
                        }
                    }
                }
                triples
            }
        }
    }
}

impl fmt::Display for ProbeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStrategy::ObservedTriples => f.write_str("observed"),
            ProbeStrategy::CrossProduct => f.write_str("cross-product"),
        }
    }
}

impl FromStr for ProbeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "observed" | "observed-triples" => Ok(ProbeStrategy::ObservedTriples),
            "cross-product" | "cross_product" | "legacy" => Ok(ProbeStrategy::CrossProduct),
            other => Err(format!("Invalid deduplication strategy: {}", other)),
        }
    }
}

/// The batch split into new and already-stored records
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeduplicationOutcome {
    pub records_to_load: Vec<SourcedUsageRecord>,
    pub records_already_present: Vec<SourcedUsageRecord>,
    /// Operator-facing collision list; `None` when nothing collided
    pub report: Option<String>,
}

impl DeduplicationOutcome {
    pub fn has_duplicates(&self) -> bool {
        self.report.is_some()
    }
}

#[derive(Clone)]
pub struct DuplicateChecker {
    store: Arc<dyn UsageStore>,
    strategy: ProbeStrategy,
}

impl DuplicateChecker {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self {
            store,
            strategy: ProbeStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: ProbeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> ProbeStrategy {
        self.strategy
    }

    #[instrument(skip_all, fields(records = batch.len(), strategy = %self.strategy))]
    pub async fn check(
        &self,
        batch: Vec<SourcedUsageRecord>,
    ) -> Result<DeduplicationOutcome, StoreError> {
        let probes = self.strategy.triples(&batch);
        debug!(probes = probes.len(), "Probing stored usage");

        let mut collisions = BTreeSet::new();
        for triple in probes {
            let existing = self.store.count_existing_usage(&triple).await?;
            if existing > 0 {
                debug!(?triple, existing, "Usage already stored");
                collisions.insert(triple);
            }
        }

        if collisions.is_empty() {
            return Ok(DeduplicationOutcome {
                records_to_load: batch,
                records_already_present: Vec::new(),
                report: None,
            });
        }

        let (records_already_present, records_to_load): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .partition(|record| collisions.contains(&UsageTriple::of(record)));

        let report = self.collision_report(&collisions).await?;
        warn!(
            collisions = collisions.len(),
            held_back = records_already_present.len(),
            "Batch contains usage that is already stored"
        );
        info!(to_load = records_to_load.len(), "Deduplication complete");

        Ok(DeduplicationOutcome {
            records_to_load,
            records_already_present,
            report: Some(report),
        })
    }

    async fn collision_report(&self, collisions: &BTreeSet<UsageTriple>) -> Result<String, StoreError> {
        let source_ids: BTreeSet<i64> = collisions.iter().map(|t| t.statistics_source_id).collect();
        let names = try_join_all(source_ids.iter().map(|id| async move {
            let name = self.store.statistics_source_name(*id).await?;
            Ok::<_, StoreError>((*id, name))
        }))
        .await?;
        let names: BTreeMap<i64, Option<String>> = names.into_iter().collect();

        let mut report = String::from(DUPLICATE_REPORT_PREAMBLE);
        for triple in collisions {
            let name = names
                .get(&triple.statistics_source_id)
                .and_then(|name| name.as_deref())
                .unwrap_or("Unknown statistics source");
            report.push('\n');
            report.push_str(&format_collision(triple, name));
        }
        Ok(report)
    }
}

/// `"{report_type} | {usage_date} | {source_name} (ID {source_id})"`
pub fn format_collision(triple: &UsageTriple, source_name: &str) -> String {
    format!(
        "{} | {} | {} (ID {})",
        triple.report_type,
        triple.usage_date.format("%Y-%m-%d"),
        source_name,
        triple.statistics_source_id
    )
}
