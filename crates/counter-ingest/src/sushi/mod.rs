//! COUNTER R5 (SUSHI) report model and conversion
//!
//! ```no_run
//! use counter_ingest::sushi::{FieldLengthPolicy, RawUsageDocument, UsageReportConverter};
//!
//! # fn main() -> anyhow::Result<()> {
//! let json = std::fs::read_to_string("tr.json")?;
//! let document = RawUsageDocument::from_json_str(&json)?;
//! let converter = UsageReportConverter::new(FieldLengthPolicy::default())?;
//! let report = converter.convert(&document)?;
//! println!("{} records", report.records.len());
//! # Ok(())
//! # }
//! ```

pub mod field_length;
pub mod identifiers;
pub mod models;
pub mod parser;

pub use field_length::{FieldLengthPolicy, FieldTooLong};
pub use identifiers::{AuthorAccumulator, IdentifierKind, IdentifierNormalizer};
pub use models::{
    FlatUsageRecord, MetadataField, RawUsageDocument, ReportHeader, ResourceMetadata, Scope,
    SourcedUsageRecord,
};
pub use parser::{AttributeKey, ConvertedReport, UsageReportConverter};
