//! Represents a stored file's metadata record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{collections::BTreeSet, fmt, str::FromStr};
use uuid::Uuid;

/// Which storage backend holds a file's bytes.
///
/// Recorded at upload and never changed afterwards; it decides how the
/// record's `storage_locator` is interpreted on download and delete.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    ObjectStore,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::ObjectStore => "object_store",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "fs" | "disk" => Ok(Self::Local),
            "object_store" | "object-store" | "s3" => Ok(Self::ObjectStore),
            other => Err(format!("unknown storage backend `{other}`")),
        }
    }
}

/// Metadata for one stored object.
///
/// The struct never carries the bytes themselves. `storage_locator` is kept
/// out of the serialized form so backend paths and keys never reach clients.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// System-generated identifier.
    pub id: Uuid,

    /// Client-supplied filename, display only.
    pub original_name: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Content type accepted at upload time.
    pub mime_type: String,

    /// Backend-specific address of the bytes.
    #[serde(skip_serializing, default)]
    pub storage_locator: String,

    /// Backend that holds the bytes.
    pub backend_kind: BackendKind,

    /// Readable by principals other than the owner.
    pub is_public: bool,

    /// Uploading principal. Immutable.
    pub owner_id: Uuid,

    #[sqlx(json)]
    pub tags: BTreeSet<String>,

    pub description: String,

    pub download_count: i64,

    pub created_at: DateTime<Utc>,
}

/// Owner-supplied changes to a record.
///
/// Only the mutable fields exist here; anything else in an update request
/// body is dropped during deserialization.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileChanges {
    pub description: Option<String>,
    pub tags: Option<TagsInput>,
    pub is_public: Option<bool>,
}

impl FileChanges {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.tags.is_none() && self.is_public.is_none()
    }
}

/// Tags as they arrive from clients: either a JSON list or a comma list.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum TagsInput {
    List(Vec<String>),
    Csv(String),
}

impl TagsInput {
    pub fn normalize(&self) -> BTreeSet<String> {
        match self {
            Self::List(items) => normalize_tags(items.iter().map(String::as_str)),
            Self::Csv(raw) => parse_tag_list(raw),
        }
    }
}

/// Split a comma separated tag string into a normalized tag set.
pub fn parse_tag_list(raw: &str) -> BTreeSet<String> {
    normalize_tags(raw.split(','))
}

/// Trim tags, drop empty entries and collapse duplicates.
pub fn normalize_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    tags.into_iter()
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Everything the registry needs from a caller to create a file.
#[derive(Clone, Debug)]
pub struct NewUpload {
    pub original_name: String,
    pub content_type: String,
    pub description: String,
    pub tags: BTreeSet<String>,
    pub is_public: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_comma_separated_tags() {
        let tags = parse_tag_list(" invoices, 2024 ,,invoices , ");
        assert_eq!(
            tags.into_iter().collect::<Vec<_>>(),
            vec!["2024".to_string(), "invoices".to_string()]
        );
    }

    #[test]
    fn changes_ignore_fields_outside_allow_list() {
        let body = r#"{
            "description": "new",
            "ownerId": "6ba7b810-9dad-11d1-80b4-00c04fd430c8",
            "size": 1,
            "downloadCount": 99,
            "isPublic": true
        }"#;
        let changes: FileChanges = serde_json::from_str(body).expect("valid body");
        assert_eq!(changes.description.as_deref(), Some("new"));
        assert_eq!(changes.is_public, Some(true));
        assert!(changes.tags.is_none());
    }

    #[test]
    fn changes_accept_tag_list_or_csv() {
        let list: FileChanges = serde_json::from_str(r#"{"tags":["a"," b","a"]}"#).unwrap();
        let csv: FileChanges = serde_json::from_str(r#"{"tags":"a, b"}"#).unwrap();
        assert_eq!(list.tags.unwrap().normalize(), csv.tags.unwrap().normalize());
    }

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("s3".parse::<BackendKind>(), Ok(BackendKind::ObjectStore));
        assert_eq!("Local".parse::<BackendKind>(), Ok(BackendKind::Local));
        assert!("ftp".parse::<BackendKind>().is_err());
    }

    #[test]
    fn serialized_record_hides_locator() {
        let record = FileRecord {
            id: Uuid::new_v4(),
            original_name: "a.pdf".into(),
            size_bytes: 3,
            mime_type: "application/pdf".into(),
            storage_locator: "/srv/uploads/secret.pdf".into(),
            backend_kind: BackendKind::Local,
            is_public: false,
            owner_id: Uuid::new_v4(),
            tags: BTreeSet::new(),
            description: String::new(),
            download_count: 0,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"originalName\":\"a.pdf\""));
        assert!(json.contains("\"backendKind\":\"local\""));
    }

    proptest! {
        #[test]
        fn normalized_tags_are_trimmed_and_non_empty(raw in ".{0,64}") {
            for tag in parse_tag_list(&raw) {
                prop_assert!(!tag.is_empty());
                prop_assert_eq!(tag.trim(), tag.as_str());
                prop_assert!(!tag.contains(','));
            }
        }
    }
}
