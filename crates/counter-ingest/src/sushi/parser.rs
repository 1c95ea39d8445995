//! COUNTER R5 JSON report to flat usage records
//!
//! Each report item is visited key by key to build its metadata (and its
//! parent's), after which the `Performance` section fans out into one
//! [`FlatUsageRecord`] per period and metric. Any guarded field that is too
//! long, or any performance entry that cannot be read, aborts the whole
//! report.

use super::field_length::FieldLengthPolicy;
use super::identifiers::{AuthorAccumulator, IdentifierNormalizer};
use super::models::{FlatUsageRecord, MetadataField, RawUsageDocument, ResourceMetadata, Scope};
use crate::error::ConversionError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

/// Placeholder publication dates some vendors send instead of null
pub const SENTINEL_DATES: [&str; 3] = ["1000-01-01", "1753-01-01", "1900-01-01"];

/// Recognized item keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKey {
    ResourceName,
    Publisher,
    PublisherId,
    Platform,
    Contributors,
    Dates,
    Attributes,
    Identifiers,
    DataType,
    SectionType,
    AccessType,
    AccessMethod,
    Yop,
    Parent,
    Performance,
    Unrecognized,
}

impl AttributeKey {
    pub fn classify(key: &str) -> Self {
        match key {
            "Database" | "Title" | "Item" | "Item_Name" => AttributeKey::ResourceName,
            "Publisher" => AttributeKey::Publisher,
            "Publisher_ID" => AttributeKey::PublisherId,
            "Platform" => AttributeKey::Platform,
            "Item_Contributors" => AttributeKey::Contributors,
            "Item_Dates" => AttributeKey::Dates,
            "Item_Attributes" => AttributeKey::Attributes,
            "Item_ID" => AttributeKey::Identifiers,
            "Data_Type" => AttributeKey::DataType,
            "Section_Type" => AttributeKey::SectionType,
            "Access_Type" => AttributeKey::AccessType,
            "Access_Method" => AttributeKey::AccessMethod,
            "YOP" => AttributeKey::Yop,
            "Item_Parent" => AttributeKey::Parent,
            "Performance" => AttributeKey::Performance,
            _ => AttributeKey::Unrecognized,
        }
    }
}

/// Records converted from one report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedReport {
    pub report_creation_date: NaiveDate,
    pub records: Vec<FlatUsageRecord>,
    /// Destination columns that hold a value in at least one record
    pub populated_fields: BTreeSet<&'static str>,
}

impl ConvertedReport {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Metadata gathered from one item, ready for fan-out
struct VisitedItem<'a> {
    metadata: ResourceMetadata,
    parent: ResourceMetadata,
    performance: Option<&'a Value>,
}

/// Converts [`RawUsageDocument`]s into [`FlatUsageRecord`]s
#[derive(Debug, Clone)]
pub struct UsageReportConverter {
    policy: FieldLengthPolicy,
    identifiers: IdentifierNormalizer,
}

impl UsageReportConverter {
    pub fn new(policy: FieldLengthPolicy) -> Result<Self, ConversionError> {
        Ok(Self {
            policy,
            identifiers: IdentifierNormalizer::new()?,
        })
    }

    pub fn policy(&self) -> &FieldLengthPolicy {
        &self.policy
    }

    #[instrument(skip_all, fields(items = document.report_items.len()))]
    pub fn convert(&self, document: &RawUsageDocument) -> Result<ConvertedReport, ConversionError> {
        let created = parse_created(document.report_header.created.as_deref())?;
        let mut records = Vec::new();

        for (item_index, item) in document.report_items.iter().enumerate() {
            let visited = self.visit_item(item_index, item)?;
            self.fan_out(item_index, created, visited, &mut records)?;
        }

        let populated_fields = populated_fields(&records);
        info!(
            records = records.len(),
            created = %created,
            "Converted usage report"
        );

        Ok(ConvertedReport {
            report_creation_date: created,
            records,
            populated_fields,
        })
    }

    fn visit_item<'a>(
        &self,
        item_index: usize,
        item: &'a Map<String, Value>,
    ) -> Result<VisitedItem<'a>, ConversionError> {
        let mut metadata = ResourceMetadata::default();
        let mut parent = ResourceMetadata::default();
        let mut performance = None;

        for (key, value) in item {
            match AttributeKey::classify(key) {
                AttributeKey::Performance => performance = Some(value),
                AttributeKey::Parent => {
                    if let Some(parent_item) = unwrap_parent(item_index, value)? {
                        parent = self.visit_parent(item_index, parent_item)?;
                    }
                }
                AttributeKey::Unrecognized => {
                    warn!(item_index, key = %key, "Skipping unrecognized report item key");
                }
                attribute => {
                    self.visit_attribute(item_index, Scope::Item, attribute, key, value, &mut metadata)?
                }
            }
        }

        Ok(VisitedItem {
            metadata,
            parent,
            performance,
        })
    }

    fn visit_parent(
        &self,
        item_index: usize,
        parent_item: &Map<String, Value>,
    ) -> Result<ResourceMetadata, ConversionError> {
        let mut parent = ResourceMetadata::default();

        for (key, value) in parent_item {
            match AttributeKey::classify(key) {
                AttributeKey::Parent => {
                    warn!(item_index, "Ignoring `Item_Parent` nested inside `Item_Parent`");
                }
                AttributeKey::Performance | AttributeKey::Unrecognized => {
                    warn!(item_index, key = %key, "Skipping unrecognized parent item key");
                }
                attribute => {
                    self.visit_attribute(item_index, Scope::Parent, attribute, key, value, &mut parent)?
                }
            }
        }

        Ok(parent)
    }

    fn visit_attribute(
        &self,
        item_index: usize,
        scope: Scope,
        attribute: AttributeKey,
        key: &str,
        value: &Value,
        metadata: &mut ResourceMetadata,
    ) -> Result<(), ConversionError> {
        match attribute {
            AttributeKey::ResourceName => {
                self.set_guarded(item_index, scope, MetadataField::ResourceName, key, value, metadata)
            }
            AttributeKey::Publisher => {
                self.set_guarded(item_index, scope, MetadataField::Publisher, key, value, metadata)
            }
            AttributeKey::Platform => {
                self.set_guarded(item_index, scope, MetadataField::Platform, key, value, metadata)
            }
            AttributeKey::DataType => {
                self.set_guarded(item_index, scope, MetadataField::DataType, key, value, metadata)
            }
            AttributeKey::SectionType => {
                self.set_guarded(item_index, scope, MetadataField::SectionType, key, value, metadata)
            }
            AttributeKey::AccessType => {
                self.set_guarded(item_index, scope, MetadataField::AccessType, key, value, metadata)
            }
            AttributeKey::AccessMethod => {
                self.set_guarded(item_index, scope, MetadataField::AccessMethod, key, value, metadata)
            }
            AttributeKey::PublisherId => {
                let entries = as_list(item_index, key, value)?;
                if let Some(selected) = self.identifiers.select_publisher_id(entries) {
                    self.set_guarded(item_index, scope, MetadataField::PublisherId, key, selected, metadata)?;
                }
                Ok(())
            }
            AttributeKey::Contributors => {
                let field = MetadataField::Authors.column(scope);
                let mut authors = AuthorAccumulator::new(field, &self.policy);
                for contributor in as_list(item_index, key, value)? {
                    let is_author = contributor
                        .get("Type")
                        .and_then(Value::as_str)
                        .is_some_and(|kind| self.identifiers.is_author(kind));
                    if is_author {
                        let name = contributor.get("Name").and_then(Value::as_str);
                        authors
                            .push(name)
                            .map_err(|err| ConversionError::field_too_long(err, item_index))?;
                    }
                }
                if let Some(authors) = authors.finish() {
                    metadata.authors = Some(authors);
                }
                Ok(())
            }
            AttributeKey::Dates => {
                for entry in as_list(item_index, key, value)? {
                    if entry.get("Type").and_then(Value::as_str) != Some("Publication_Date") {
                        continue;
                    }
                    if let Some(date) = entry.get("Value").and_then(Value::as_str).and_then(parse_publication_date) {
                        metadata.publication_date = Some(date);
                    }
                }
                Ok(())
            }
            AttributeKey::Attributes => {
                for entry in as_list(item_index, key, value)? {
                    if entry.get("Type").and_then(Value::as_str) != Some("Article_Version") {
                        continue;
                    }
                    if let Some(version) = entry.get("Value") {
                        self.set_guarded(item_index, scope, MetadataField::ArticleVersion, key, version, metadata)?;
                    }
                }
                Ok(())
            }
            AttributeKey::Identifiers => {
                for entry in as_list(item_index, key, value)? {
                    let Some(tag) = entry.get("Type").and_then(Value::as_str) else {
                        continue;
                    };
                    let Some(kind) = self.identifiers.classify_identifier(tag) else {
                        debug!(item_index, tag, "Ignoring unrecognized identifier type");
                        continue;
                    };
                    let Some(raw) = scalar_text(item_index, key, entry.get("Value"))? else {
                        continue;
                    };
                    let text = if kind.is_issn() {
                        self.identifiers.normalize_issn(&raw)
                    } else {
                        raw
                    };
                    self.set_checked(item_index, scope, kind.field(), text, metadata)?;
                }
                Ok(())
            }
            AttributeKey::Yop => {
                metadata.yop = parse_yop(value);
                if metadata.yop.is_none() {
                    debug!(item_index, value = %value, "Unparsable YOP stored as null");
                }
                Ok(())
            }
            AttributeKey::Parent | AttributeKey::Performance | AttributeKey::Unrecognized => Ok(()),
        }
    }

    fn set_guarded(
        &self,
        item_index: usize,
        scope: Scope,
        field: MetadataField,
        key: &str,
        value: &Value,
        metadata: &mut ResourceMetadata,
    ) -> Result<(), ConversionError> {
        match scalar_text(item_index, key, Some(value))? {
            Some(text) => self.set_checked(item_index, scope, field, text, metadata),
            None => Ok(()),
        }
    }

    fn set_checked(
        &self,
        item_index: usize,
        scope: Scope,
        field: MetadataField,
        text: String,
        metadata: &mut ResourceMetadata,
    ) -> Result<(), ConversionError> {
        let checked = self
            .policy
            .check(field.column(scope), &text)
            .map_err(|err| ConversionError::field_too_long(err, item_index))?;
        metadata.set_text(field, checked);
        Ok(())
    }

    fn fan_out(
        &self,
        item_index: usize,
        created: NaiveDate,
        item: VisitedItem<'_>,
        records: &mut Vec<FlatUsageRecord>,
    ) -> Result<(), ConversionError> {
        let Some(performance) = item.performance else {
            debug!(item_index, "Item has no performance section");
            return Ok(());
        };

        for period in as_list(item_index, "Performance", performance)? {
            let begin = period
                .get("Period")
                .and_then(|p| p.get("Begin_Date"))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ConversionError::malformed(item_index, "Performance", "missing `Period.Begin_Date`")
                })?;
            let usage_date = parse_begin_date(begin)?;

            let instances = period.get("Instance").ok_or_else(|| {
                ConversionError::malformed(item_index, "Performance", "missing `Instance`")
            })?;

            for instance in as_list(item_index, "Instance", instances)? {
                let metric_type = instance
                    .get("Metric_Type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ConversionError::malformed(item_index, "Instance", "missing `Metric_Type`")
                    })?;
                let usage_count = parse_count(instance.get("Count"))?;

                records.push(FlatUsageRecord {
                    report_creation_date: created,
                    item: item.metadata.clone(),
                    parent: item.parent.clone(),
                    usage_date,
                    metric_type: metric_type.to_string(),
                    usage_count,
                });
            }
        }

        Ok(())
    }
}

// ============================================================================
// Value Helpers
// ============================================================================

/// ISO 8601 datetime layouts accepted for `Created` beyond RFC 3339.
/// `%#z` takes `Z`, `+hh`, `+hhmm` and `+hh:mm`.
const CREATED_OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M%#z"];
const CREATED_NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%MZ",
];

/// Header `Created` as a date. Accepts RFC 3339, ISO 8601 datetimes with
/// or without seconds and offsets (basic or extended), and plain dates. The
/// date is taken in the timestamp's own offset.
pub fn parse_created(raw: Option<&str>) -> Result<NaiveDate, ConversionError> {
    let raw = raw.ok_or_else(|| ConversionError::unparsable("Created", "<missing>"))?;
    let trimmed = raw.trim();
    let normalized = match trimmed.as_bytes().get(10) {
        Some(b' ') => format!("{}T{}", &trimmed[..10], &trimmed[11..]),
        _ => trimmed.to_string(),
    };

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(timestamp.date_naive());
    }
    for format in CREATED_OFFSET_FORMATS {
        if let Ok(timestamp) = DateTime::parse_from_str(&normalized, format) {
            return Ok(timestamp.date_naive());
        }
    }
    for format in CREATED_NAIVE_FORMATS {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Ok(timestamp.date());
        }
    }
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .map_err(|_| ConversionError::unparsable("Created", raw))
}

fn parse_publication_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    if SENTINEL_DATES.contains(&date_part) {
        return None;
    }

    match NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            debug!(value = raw, "Dropping unparsable publication date");
            None
        }
    }
}

fn parse_begin_date(raw: &str) -> Result<NaiveDate, ConversionError> {
    let trimmed = raw.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| ConversionError::unparsable("Begin_Date", raw))
}

fn parse_count(value: Option<&Value>) -> Result<i64, ConversionError> {
    match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .ok_or_else(|| ConversionError::unparsable("Count", number.to_string())),
        Some(Value::String(text)) => text
            .trim()
            .parse()
            .map_err(|_| ConversionError::unparsable("Count", text.as_str())),
        Some(other) => Err(ConversionError::unparsable("Count", other.to_string())),
        None => Err(ConversionError::unparsable("Count", "<missing>")),
    }
}

fn parse_yop(value: &Value) -> Option<i32> {
    match value {
        Value::Number(number) => number.as_i64().and_then(|year| i32::try_from(year).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn as_list<'a>(item_index: usize, key: &str, value: &'a Value) -> Result<&'a [Value], ConversionError> {
    match value {
        Value::Array(entries) => Ok(entries),
        Value::Null => Ok(&[]),
        _ => Err(ConversionError::malformed(item_index, key, "expected a list")),
    }
}

/// Scalars as text; numbers and booleans are stringified, null is absent
fn scalar_text(item_index: usize, key: &str, value: Option<&Value>) -> Result<Option<String>, ConversionError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(Value::Bool(flag)) => Ok(Some(flag.to_string())),
        Some(_) => Err(ConversionError::malformed(item_index, key, "expected a scalar value")),
    }
}

fn unwrap_parent(item_index: usize, value: &Value) -> Result<Option<&Map<String, Value>>, ConversionError> {
    match value {
        Value::Object(parent) => Ok(Some(parent)),
        Value::Array(entries) => match entries.as_slice() {
            [Value::Object(parent)] => Ok(Some(parent)),
            [] => Ok(None),
            _ => Err(ConversionError::malformed(
                item_index,
                "Item_Parent",
                format!("expected one parent, found {} entries", entries.len()),
            )),
        },
        Value::Null => Ok(None),
        _ => Err(ConversionError::malformed(item_index, "Item_Parent", "expected an object")),
    }
}

fn populated_fields(records: &[FlatUsageRecord]) -> BTreeSet<&'static str> {
    let mut populated = BTreeSet::new();
    for record in records {
        for field in MetadataField::ALL {
            if record.item.is_populated(field) {
                populated.insert(field.column(Scope::Item));
            }
            if record.parent.is_populated(field) {
                populated.insert(field.column(Scope::Parent));
            }
        }
    }
    populated
}
