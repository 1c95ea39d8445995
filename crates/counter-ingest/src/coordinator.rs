//! End-to-end ingestion of one report
//!
//! Convert, stamp with the statistics source, drop already-stored usage,
//! reserve keys, load. When any stage fails the raw report is saved through
//! [`FallbackPersistence`]; only when that also fails does the caller get an
//! error.

use crate::db::UsageStore;
use crate::dedup::{DuplicateChecker, ProbeStrategy};
use crate::error::{FallbackError, IngestError, IngestStage};
use crate::fallback::{FallbackName, FallbackPayload, FallbackPersistence, PersistedLocation};
use crate::sequencer::{PrimaryKeySequencer, Relation};
use crate::sushi::{RawUsageDocument, SourcedUsageRecord, UsageReportConverter};
use chrono::NaiveDate;
use counter_common::CounterError;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Identity of a harvested report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SushiReportRequest {
    pub statistics_source_id: i64,
    /// Report type code such as `TR` or `DR`
    pub report_type: String,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
}

impl SushiReportRequest {
    /// Checked constructor for requests built from user input
    pub fn new(
        statistics_source_id: i64,
        report_type: impl Into<String>,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> counter_common::Result<Self> {
        let report_type = report_type.into().trim().to_uppercase();
        if report_type.is_empty() || !report_type.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CounterError::InvalidInput(format!(
                "report type `{}` is not a COUNTER report code",
                report_type
            )));
        }
        if range_end < range_start {
            return Err(CounterError::InvalidInput(format!(
                "range end {} is before range start {}",
                range_end, range_start
            )));
        }

        Ok(Self {
            statistics_source_id,
            report_type,
            range_start,
            range_end,
        })
    }

    /// SUSHI path the report was requested from, e.g. `reports/tr`
    pub fn report_path(&self) -> String {
        format!("reports/{}", self.report_type.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Loaded {
        records: u64,
        first_key: i64,
        /// Collision report for records that were held back
        duplicates: Option<String>,
        /// Destination columns the report filled
        populated_fields: BTreeSet<&'static str>,
    },
    /// Every record was already stored
    AllDuplicates { report: String },
    /// The report contained no usage
    NoUsage,
    /// A stage failed but the raw report was saved
    SavedToFallback {
        stage: IngestStage,
        reason: String,
        location: PersistedLocation,
    },
}

struct StageFailure {
    stage: IngestStage,
    reason: String,
}

impl StageFailure {
    fn at(stage: IngestStage) -> impl FnOnce(String) -> Self {
        move |reason| StageFailure { stage, reason }
    }
}

pub struct IngestionCoordinator {
    converter: UsageReportConverter,
    store: Arc<dyn UsageStore>,
    checker: DuplicateChecker,
    sequencer: PrimaryKeySequencer,
    fallback: FallbackPersistence,
}

impl IngestionCoordinator {
    pub fn new(
        converter: UsageReportConverter,
        store: Arc<dyn UsageStore>,
        fallback: FallbackPersistence,
    ) -> Self {
        Self {
            converter,
            checker: DuplicateChecker::new(store.clone()),
            sequencer: PrimaryKeySequencer::new(store.clone()),
            store,
            fallback,
        }
    }

    pub fn with_probe_strategy(mut self, strategy: ProbeStrategy) -> Self {
        self.checker = self.checker.with_strategy(strategy);
        self
    }

    #[instrument(
        skip(self, request, document),
        fields(source = request.statistics_source_id, report_type = %request.report_type)
    )]
    pub async fn ingest_sushi_report(
        &self,
        request: &SushiReportRequest,
        document: &RawUsageDocument,
    ) -> Result<IngestOutcome, IngestError> {
        match self.load(request, document).await {
            Ok(outcome) => Ok(outcome),
            Err(failure) => self.save_failed_report(request, document, failure).await,
        }
    }

    async fn load(
        &self,
        request: &SushiReportRequest,
        document: &RawUsageDocument,
    ) -> Result<IngestOutcome, StageFailure> {
        let converted = self
            .converter
            .convert(document)
            .map_err(|err| err.to_string())
            .map_err(StageFailure::at(IngestStage::Conversion))?;

        if converted.is_empty() {
            info!("Report contains no usage");
            return Ok(IngestOutcome::NoUsage);
        }

        let populated_fields = converted.populated_fields;
        debug!(populated = ?populated_fields, "Columns holding data");

        let batch: Vec<SourcedUsageRecord> = converted
            .records
            .into_iter()
            .map(|record| SourcedUsageRecord::new(request.statistics_source_id, &request.report_type, record))
            .collect();

        let outcome = self
            .checker
            .check(batch)
            .await
            .map_err(|err| err.to_string())
            .map_err(StageFailure::at(IngestStage::Deduplication))?;

        if outcome.records_to_load.is_empty() {
            let report = outcome.report.unwrap_or_default();
            warn!("All usage in the report is already stored");
            return Ok(IngestOutcome::AllDuplicates { report });
        }

        let keys = self
            .sequencer
            .reserve(Relation::CounterData, outcome.records_to_load.len())
            .await
            .map_err(|err| err.to_string())
            .map_err(StageFailure::at(IngestStage::Sequencing))?;

        let records = self
            .store
            .insert_usage(keys.start, &outcome.records_to_load)
            .await
            .map_err(|err| err.to_string())
            .map_err(StageFailure::at(IngestStage::Loading))?;

        info!(records, first_key = keys.start, "Report loaded");
        Ok(IngestOutcome::Loaded {
            records,
            first_key: keys.start,
            duplicates: outcome.report,
            populated_fields,
        })
    }

    async fn save_failed_report(
        &self,
        request: &SushiReportRequest,
        document: &RawUsageDocument,
        failure: StageFailure,
    ) -> Result<IngestOutcome, IngestError> {
        match serde_json::to_value(document) {
            Ok(value) => {
                self.save_to_fallback(request, FallbackPayload::Structured(value), failure)
                    .await
            }
            Err(err) => Err(IngestError::DataNotSaved {
                statistics_source_id: request.statistics_source_id,
                report_type: request.report_type.clone(),
                stage: failure.stage,
                reason: failure.reason,
                fallback: FallbackError::from(err),
            }),
        }
    }

    /// Save a harvested response that could not even be read as a report.
    /// Valid JSON is kept as JSON, anything else as text.
    #[instrument(skip(self, request, raw), fields(source = request.statistics_source_id))]
    pub async fn save_unreadable_report(
        &self,
        request: &SushiReportRequest,
        raw: &str,
        reason: &str,
    ) -> Result<IngestOutcome, IngestError> {
        let payload = match serde_json::from_str(raw) {
            Ok(value) => FallbackPayload::Structured(value),
            Err(_) => FallbackPayload::Text(raw.to_string()),
        };
        let failure = StageFailure {
            stage: IngestStage::Conversion,
            reason: reason.to_string(),
        };
        self.save_to_fallback(request, payload, failure).await
    }

    async fn save_to_fallback(
        &self,
        request: &SushiReportRequest,
        payload: FallbackPayload,
        failure: StageFailure,
    ) -> Result<IngestOutcome, IngestError> {
        error!(stage = %failure.stage, reason = %failure.reason, "Ingestion failed; saving raw report");

        let name = FallbackName::failed_sushi_pull(
            request.statistics_source_id,
            request.report_path(),
            request.range_start,
            request.range_end,
        );

        match self.fallback.persist(&payload, &name.stem()).await {
            Ok(location) => Ok(IngestOutcome::SavedToFallback {
                stage: failure.stage,
                reason: failure.reason,
                location,
            }),
            Err(fallback) => Err(IngestError::DataNotSaved {
                statistics_source_id: request.statistics_source_id,
                report_type: request.report_type.clone(),
                stage: failure.stage,
                reason: failure.reason,
                fallback,
            }),
        }
    }

    /// Save a usage file that is not a COUNTER report as
    /// `{source}_{fiscal_year}{extension}`
    #[instrument(skip(self, payload))]
    pub async fn store_nonstandard_usage(
        &self,
        statistics_source_id: i64,
        fiscal_year_id: i64,
        payload: &FallbackPayload,
    ) -> Result<PersistedLocation, IngestError> {
        let name = FallbackName::NonstandardUsage {
            statistics_source_id,
            fiscal_year_id,
        };
        Ok(self.fallback.persist(payload, &name.stem()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_path_from_type() {
        let request = SushiReportRequest {
            statistics_source_id: 1,
            report_type: "TR".to_string(),
            range_start: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            range_end: NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
        };
        assert_eq!(request.report_path(), "reports/tr");
    }

    #[test]
    fn test_request_rejects_bad_input() {
        let jan = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let dec = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();

        let request = SushiReportRequest::new(3, " dr ", jan, dec).unwrap();
        assert_eq!(request.report_type, "DR");

        assert!(matches!(
            SushiReportRequest::new(3, "TR", dec, jan),
            Err(CounterError::InvalidInput(_))
        ));
        assert!(matches!(
            SushiReportRequest::new(3, "reports/tr", jan, dec),
            Err(CounterError::InvalidInput(_))
        ));
    }
}
