//! Identifier normalization and contributor accumulation

use super::field_length::{FieldLengthPolicy, FieldTooLong};
use super::models::MetadataField;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Appended once when the author list no longer fits its column
pub const ET_AL: &str = " et al.";

const AUTHOR_SEPARATOR: &str = "; ";

/// Standard identifier kinds found in `Item_ID` lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Doi,
    Proprietary,
    Isbn,
    PrintIssn,
    OnlineIssn,
    Uri,
}

impl IdentifierKind {
    pub fn field(self) -> MetadataField {
        match self {
            IdentifierKind::Doi => MetadataField::Doi,
            IdentifierKind::Proprietary => MetadataField::ProprietaryId,
            IdentifierKind::Isbn => MetadataField::Isbn,
            IdentifierKind::PrintIssn => MetadataField::PrintIssn,
            IdentifierKind::OnlineIssn => MetadataField::OnlineIssn,
            IdentifierKind::Uri => MetadataField::Uri,
        }
    }

    pub fn is_issn(self) -> bool {
        matches!(self, IdentifierKind::PrintIssn | IdentifierKind::OnlineIssn)
    }
}

/// Compiled patterns used to classify and repair identifiers
#[derive(Debug, Clone)]
pub struct IdentifierNormalizer {
    issn: Regex,
    author: Regex,
    proprietary: Regex,
}

impl IdentifierNormalizer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            issn: Regex::new(r"^\d{4}-\d{3}[\dxX]\s*")?,
            author: Regex::new(r"^[Aa]uthor")?,
            proprietary: Regex::new(r"^[Pp]roprietary(_ID)?")?,
        })
    }

    /// Canonical ISSN: well-formed values are trimmed, anything else is
    /// rebuilt from the first five characters and the last four of the
    /// trimmed value.
    ///
    /// The repair is lossy for odd inputs (`12345678` becomes `12345-5678`)
    /// and has to stay that way to match rows already stored.
    pub fn normalize_issn(&self, raw: &str) -> String {
        if self.issn.is_match(raw) {
            return raw.trim().to_string();
        }

        let head: String = raw.chars().take(5).collect();
        let trimmed: Vec<char> = raw.trim().chars().collect();
        let tail: String = trimmed[trimmed.len().saturating_sub(4)..].iter().collect();
        let repaired = format!("{}-{}", head, tail);
        debug!(raw, repaired = %repaired, "Repaired malformed ISSN");
        repaired
    }

    pub fn classify_identifier(&self, tag: &str) -> Option<IdentifierKind> {
        match tag {
            "DOI" => Some(IdentifierKind::Doi),
            "ISBN" => Some(IdentifierKind::Isbn),
            "Print_ISSN" => Some(IdentifierKind::PrintIssn),
            "Online_ISSN" => Some(IdentifierKind::OnlineIssn),
            "URI" => Some(IdentifierKind::Uri),
            _ if self.is_proprietary(tag) => Some(IdentifierKind::Proprietary),
            _ => None,
        }
    }

    pub fn is_proprietary(&self, tag: &str) -> bool {
        self.proprietary.is_match(tag)
    }

    pub fn is_author(&self, contributor_type: &str) -> bool {
        self.author.is_match(contributor_type)
    }

    /// Pick the publisher identifier from a `Publisher_ID` list.
    ///
    /// A single entry is taken whatever its type; otherwise the first
    /// proprietary entry wins.
    pub fn select_publisher_id<'a>(&self, entries: &'a [Value]) -> Option<&'a Value> {
        if let [only] = entries {
            return only.get("Value");
        }

        entries
            .iter()
            .find(|entry| {
                entry
                    .get("Type")
                    .and_then(Value::as_str)
                    .is_some_and(|tag| self.is_proprietary(tag))
            })
            .and_then(|entry| entry.get("Value"))
    }
}

/// Builds the `"; "`-joined author list for one item or parent
#[derive(Debug)]
pub struct AuthorAccumulator<'p> {
    field: &'static str,
    policy: &'p FieldLengthPolicy,
    authors: Option<String>,
}

impl<'p> AuthorAccumulator<'p> {
    pub fn new(field: &'static str, policy: &'p FieldLengthPolicy) -> Self {
        Self {
            field,
            policy,
            authors: None,
        }
    }

    /// Append one name. Once the next name would overflow the column the list
    /// is closed with `" et al."` and ignores everything after.
    pub fn push(&mut self, name: Option<&str>) -> Result<(), FieldTooLong> {
        let Some(name) = name else {
            return Ok(());
        };

        match self.authors.as_mut() {
            None => {
                self.authors = Some(self.policy.check(self.field, name)?);
            }
            Some(authors) if authors.ends_with(ET_AL) => {}
            Some(authors) => {
                let projected =
                    authors.chars().count() + AUTHOR_SEPARATOR.len() + name.chars().count();
                let overflows = self
                    .policy
                    .max_for(self.field)
                    .is_some_and(|max| projected > max);

                if overflows {
                    authors.push_str(ET_AL);
                } else {
                    authors.push_str(AUTHOR_SEPARATOR);
                    authors.push_str(name);
                }
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Option<String> {
        self.authors
    }
}
