//! Catalog entities and the inputs used to create or edit them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    doc_id::DocumentId,
    error::{Error, Result},
};

/// Format used for every calendar date accepted or printed by the catalog.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` date, reporting malformed input as a validation
/// error.
///
/// ```
/// let date = duckstore::model::parse_date("2024-01-01").unwrap();
/// assert_eq!(date.to_string(), "2024-01-01");
/// assert!(duckstore::model::parse_date("01/01/2024").is_err());
/// ```
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).map_err(|e| {
        Error::Validation(format!("malformed date {s:?} (expected YYYY-MM-DD): {e}"))
    })
}

/// Trim tag/source names, drop blanks and collapse duplicates while keeping
/// the first-seen order. Comparison is case-sensitive.
pub fn normalize_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref().trim();
        if name.is_empty() || out.iter().any(|n| n == name) {
            continue;
        }
        out.push(name.to_string());
    }
    out
}

/// Caller-supplied descriptive fields of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub description: Option<String>,
    /// Where the physical copy is kept, if there is one.
    pub location: Option<String>,
    pub date_received: Option<NaiveDate>,
}

impl DocumentMetadata {
    pub fn new(title: impl Into<String>, date_received: NaiveDate) -> Self {
        Self {
            title: title.into(),
            description: None,
            location: None,
            date_received: Some(date_received),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Check required fields, returning the received date.
    pub fn validate(&self) -> Result<NaiveDate> {
        if self.title.trim().is_empty() {
            return Err(Error::Validation("document title is required".into()));
        }
        self.date_received.ok_or_else(|| {
            Error::Validation("document received date is required".into())
        })
    }
}

/// A File row to attach to a document: the reserved storage path and the
/// name the content was uploaded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub path: String,
    pub original_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: u64,
    pub name: String,
}

/// A stored content file. Owned by exactly one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: u64,
    pub document_id: DocumentId,
    /// Path relative to the content root.
    pub path: String,
    pub original_name: String,
}

impl FileEntry {
    pub fn full_path(&self, content_root: &Path) -> PathBuf {
        content_root.join(&self.path)
    }
}

/// A document together with its files, tags and sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub date_added: DateTime<Utc>,
    pub date_received: NaiveDate,
    /// Sorted by name.
    pub tags: Vec<Tag>,
    /// Sorted by name.
    pub sources: Vec<Source>,
    /// Sorted by file id.
    pub files: Vec<FileEntry>,
}

impl Document {
    pub fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata {
            title: self.title.clone(),
            description: self.description.clone(),
            location: self.location.clone(),
            date_received: Some(self.date_received),
        }
    }

    pub fn tag_names(&self) -> Vec<&str> {
        self.tags.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.name == name)
    }
}

/// Scalar columns of a document as persisted in the `documents` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DocumentRecord {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub date_added: DateTime<Utc>,
    pub date_received: NaiveDate,
}

impl DocumentRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A row of the `files` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FileRecord {
    pub document_id: u64,
    pub path: String,
    pub original_name: String,
}

impl FileRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn into_entry(self, id: u64) -> FileEntry {
        FileEntry {
            id,
            document_id: DocumentId::new(self.document_id),
            path: self.path,
            original_name: self.original_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn normalize_trims_dedupes_and_skips_blanks() {
        let names = normalize_names(&[" legal", "legal ", "", "   ", "Legal"]);
        assert_eq!(names, vec!["legal", "Legal"]);
    }

    #[test]
    fn normalize_keeps_first_seen_order() {
        let names = normalize_names(&["b", "a", "b", "c"]);
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn validate_requires_title() {
        let meta = DocumentMetadata::new("   ", date("2024-01-01"));
        assert!(matches!(meta.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn validate_requires_received_date() {
        let meta = DocumentMetadata {
            title: "Lease".into(),
            ..Default::default()
        };
        assert!(matches!(meta.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn validate_returns_received_date() {
        let meta = DocumentMetadata::new("Lease", date("2024-01-01"));
        assert_eq!(meta.validate().unwrap(), date("2024-01-01"));
    }

    #[test]
    fn parse_date_rejects_malformed() {
        assert!(matches!(parse_date("2024-13-01"), Err(Error::Validation(_))));
        assert!(parse_date("yesterday").is_err());
        assert_eq!(date(" 2024-02-29 ").to_string(), "2024-02-29");
    }

    #[test]
    fn document_record_roundtrips_dates() {
        let record = DocumentRecord {
            title: "Lease".into(),
            description: None,
            location: Some("Filing cabinet".into()),
            date_added: Utc::now(),
            date_received: date("2024-01-01"),
        };
        let decoded = DocumentRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded.date_added, record.date_added);
        assert_eq!(decoded.location.as_deref(), Some("Filing cabinet"));
    }

    #[test]
    fn decode_rejects_corrupt_bytes() {
        assert!(matches!(
            FileRecord::decode(b"not json"),
            Err(Error::Json(_))
        ));
    }
}
