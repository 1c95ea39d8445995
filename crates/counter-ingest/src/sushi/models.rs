//! COUNTER R5 report structures and the flat record produced from them

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A COUNTER R5 JSON report as returned by a SUSHI endpoint.
///
/// Items stay as open JSON objects: their key set differs between report
/// types and vendors, so the converter classifies keys itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawUsageDocument {
    #[serde(rename = "Report_Header")]
    pub report_header: ReportHeader,

    #[serde(rename = "Report_Items", default)]
    pub report_items: Vec<Map<String, Value>>,
}

impl RawUsageDocument {
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReportHeader {
    /// Creation timestamp; parsed by the converter
    #[serde(rename = "Created", default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    #[serde(rename = "Report_ID", default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,

    #[serde(rename = "Report_Name", default, skip_serializing_if = "Option::is_none")]
    pub report_name: Option<String>,

    /// Every other header key, kept so the document round-trips to fallback
    /// storage unchanged
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Which family of destination columns a metadata block fills
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Item,
    Parent,
}

/// Metadata fields shared by an item and its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MetadataField {
    ResourceName,
    Publisher,
    PublisherId,
    Platform,
    Authors,
    PublicationDate,
    ArticleVersion,
    Doi,
    ProprietaryId,
    Isbn,
    PrintIssn,
    OnlineIssn,
    Uri,
    DataType,
    SectionType,
    Yop,
    AccessType,
    AccessMethod,
}

impl MetadataField {
    pub const ALL: [MetadataField; 18] = [
        MetadataField::ResourceName,
        MetadataField::Publisher,
        MetadataField::PublisherId,
        MetadataField::Platform,
        MetadataField::Authors,
        MetadataField::PublicationDate,
        MetadataField::ArticleVersion,
        MetadataField::Doi,
        MetadataField::ProprietaryId,
        MetadataField::Isbn,
        MetadataField::PrintIssn,
        MetadataField::OnlineIssn,
        MetadataField::Uri,
        MetadataField::DataType,
        MetadataField::SectionType,
        MetadataField::Yop,
        MetadataField::AccessType,
        MetadataField::AccessMethod,
    ];

    /// Destination column name for this field in the given scope
    pub fn column(self, scope: Scope) -> &'static str {
        match scope {
            Scope::Item => match self {
                MetadataField::ResourceName => "resource_name",
                MetadataField::Publisher => "publisher",
                MetadataField::PublisherId => "publisher_id",
                MetadataField::Platform => "platform",
                MetadataField::Authors => "authors",
                MetadataField::PublicationDate => "publication_date",
                MetadataField::ArticleVersion => "article_version",
                MetadataField::Doi => "doi",
                MetadataField::ProprietaryId => "proprietary_id",
                MetadataField::Isbn => "isbn",
                MetadataField::PrintIssn => "print_issn",
                MetadataField::OnlineIssn => "online_issn",
                MetadataField::Uri => "uri",
                MetadataField::DataType => "data_type",
                MetadataField::SectionType => "section_type",
                MetadataField::Yop => "yop",
                MetadataField::AccessType => "access_type",
                MetadataField::AccessMethod => "access_method",
            },
            Scope::Parent => match self {
                MetadataField::ResourceName => "parent_title",
                MetadataField::Publisher => "parent_publisher",
                MetadataField::PublisherId => "parent_publisher_id",
                MetadataField::Platform => "parent_platform",
                MetadataField::Authors => "parent_authors",
                MetadataField::PublicationDate => "parent_publication_date",
                MetadataField::ArticleVersion => "parent_article_version",
                MetadataField::Doi => "parent_doi",
                MetadataField::ProprietaryId => "parent_proprietary_id",
                MetadataField::Isbn => "parent_isbn",
                MetadataField::PrintIssn => "parent_print_issn",
                MetadataField::OnlineIssn => "parent_online_issn",
                MetadataField::Uri => "parent_uri",
                MetadataField::DataType => "parent_data_type",
                MetadataField::SectionType => "parent_section_type",
                MetadataField::Yop => "parent_yop",
                MetadataField::AccessType => "parent_access_type",
                MetadataField::AccessMethod => "parent_access_method",
            },
        }
    }
}

/// Descriptive metadata of one report item or of its parent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proprietary_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_issn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online_issn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yop: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_method: Option<String>,
}

impl ResourceMetadata {
    pub fn is_populated(&self, field: MetadataField) -> bool {
        match field {
            MetadataField::ResourceName => self.resource_name.is_some(),
            MetadataField::Publisher => self.publisher.is_some(),
            MetadataField::PublisherId => self.publisher_id.is_some(),
            MetadataField::Platform => self.platform.is_some(),
            MetadataField::Authors => self.authors.is_some(),
            MetadataField::PublicationDate => self.publication_date.is_some(),
            MetadataField::ArticleVersion => self.article_version.is_some(),
            MetadataField::Doi => self.doi.is_some(),
            MetadataField::ProprietaryId => self.proprietary_id.is_some(),
            MetadataField::Isbn => self.isbn.is_some(),
            MetadataField::PrintIssn => self.print_issn.is_some(),
            MetadataField::OnlineIssn => self.online_issn.is_some(),
            MetadataField::Uri => self.uri.is_some(),
            MetadataField::DataType => self.data_type.is_some(),
            MetadataField::SectionType => self.section_type.is_some(),
            MetadataField::Yop => self.yop.is_some(),
            MetadataField::AccessType => self.access_type.is_some(),
            MetadataField::AccessMethod => self.access_method.is_some(),
        }
    }

    /// Store a text value in the slot for `field`. Date and year slots are
    /// filled by the converter directly.
    pub(crate) fn set_text(&mut self, field: MetadataField, value: String) {
        let slot = match field {
            MetadataField::ResourceName => &mut self.resource_name,
            MetadataField::Publisher => &mut self.publisher,
            MetadataField::PublisherId => &mut self.publisher_id,
            MetadataField::Platform => &mut self.platform,
            MetadataField::Authors => &mut self.authors,
            MetadataField::ArticleVersion => &mut self.article_version,
            MetadataField::Doi => &mut self.doi,
            MetadataField::ProprietaryId => &mut self.proprietary_id,
            MetadataField::Isbn => &mut self.isbn,
            MetadataField::PrintIssn => &mut self.print_issn,
            MetadataField::OnlineIssn => &mut self.online_issn,
            MetadataField::Uri => &mut self.uri,
            MetadataField::DataType => &mut self.data_type,
            MetadataField::SectionType => &mut self.section_type,
            MetadataField::AccessType => &mut self.access_type,
            MetadataField::AccessMethod => &mut self.access_method,
            MetadataField::PublicationDate | MetadataField::Yop => return,
        };
        *slot = Some(value);
    }

    pub fn is_empty(&self) -> bool {
        MetadataField::ALL.iter().all(|field| !self.is_populated(*field))
    }
}

/// One destination row: item metadata, one reporting period, one metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatUsageRecord {
    pub report_creation_date: NaiveDate,

    #[serde(flatten)]
    pub item: ResourceMetadata,

    #[serde(default, skip_serializing_if = "ResourceMetadata::is_empty")]
    pub parent: ResourceMetadata,

    pub usage_date: NaiveDate,
    pub metric_type: String,
    pub usage_count: i64,
}

/// A converted record stamped with the statistics source and report type it
/// was harvested for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcedUsageRecord {
    pub statistics_source_id: i64,
    pub report_type: String,

    #[serde(flatten)]
    pub record: FlatUsageRecord,
}

impl SourcedUsageRecord {
    pub fn new(statistics_source_id: i64, report_type: impl Into<String>, record: FlatUsageRecord) -> Self {
        Self {
            statistics_source_id,
            report_type: report_type.into(),
            record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_defaults_missing_items() {
        let doc = RawUsageDocument::from_json_str(
            r#"{"Report_Header": {"Created": "2023-02-01T10:00:00Z", "Release": "5"}}"#,
        )
        .unwrap();

        assert!(doc.report_items.is_empty());
        assert_eq!(doc.report_header.created.as_deref(), Some("2023-02-01T10:00:00Z"));
        assert_eq!(doc.report_header.extra.get("Release"), Some(&Value::from("5")));
    }

    #[test]
    fn test_parent_columns() {
        assert_eq!(MetadataField::ResourceName.column(Scope::Parent), "parent_title");
        assert_eq!(MetadataField::Doi.column(Scope::Item), "doi");
        assert_eq!(MetadataField::Authors.column(Scope::Parent), "parent_authors");
    }

    #[test]
    fn test_set_text_ignores_typed_slots() {
        let mut metadata = ResourceMetadata::default();
        assert!(metadata.is_empty());

        metadata.set_text(MetadataField::Yop, "2020".to_string());
        assert!(metadata.is_empty());

        metadata.set_text(MetadataField::Doi, "10.1000/xyz".to_string());
        assert!(metadata.is_populated(MetadataField::Doi));
        assert_eq!(metadata.doi.as_deref(), Some("10.1000/xyz"));
    }
}
