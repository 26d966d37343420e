//! Listing parameters and result pages.

use super::file::FileRecord;
use serde::Serialize;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Optional narrowing applied on top of the caller's visible set.
#[derive(Clone, Debug, Default)]
pub struct FileFilter {
    /// Free text matched against name, description and tags.
    pub search: Option<String>,
    /// Exact tag match.
    pub tag: Option<String>,
    /// Exact MIME type match.
    pub mime_type: Option<String>,
}

impl FileFilter {
    /// Whitespace separated search terms; empty when no search was given.
    pub fn search_terms(&self) -> Vec<&str> {
        self.search
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    CreatedAt,
    OriginalName,
    SizeBytes,
    DownloadCount,
    MimeType,
}

impl SortField {
    /// Column the field sorts on. Only ever a fixed identifier.
    pub fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::OriginalName => "original_name",
            Self::SizeBytes => "size_bytes",
            Self::DownloadCount => "download_count",
            Self::MimeType => "mime_type",
        }
    }

    /// Accepts the camelCase names clients send as well as column names.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "createdAt" | "created_at" | "uploadDate" => Some(Self::CreatedAt),
            "originalName" | "original_name" | "name" => Some(Self::OriginalName),
            "size" | "sizeBytes" | "size_bytes" => Some(Self::SizeBytes),
            "downloads" | "downloadCount" | "download_count" => Some(Self::DownloadCount),
            "mimetype" | "mimeType" | "mime_type" | "type" => Some(Self::MimeType),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileSort {
    pub field: SortField,
    pub direction: SortDirection,
}

/// 1-based page request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    /// ceil(total / page_size); zero when nothing matched.
    pub fn total_pages(&self, total: i64) -> i64 {
        if total <= 0 || self.page_size == 0 {
            return 0;
        }
        let size = i64::from(self.page_size);
        (total + size - 1) / size
    }
}

/// Everything `list` needs beyond the principal.
#[derive(Clone, Debug, Default)]
pub struct FileQuery {
    pub filter: FileFilter,
    pub sort: FileSort,
    pub page: PageRequest,
}

/// One page of visible files plus totals for the whole match set.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FilePage {
    pub files: Vec<FileRecord>,
    pub current_page: u32,
    pub total_pages: i64,
    pub total_files: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn twenty_five_records_fill_three_pages_of_ten() {
        let page = PageRequest {
            page: 3,
            page_size: 10,
        };
        assert_eq!(page.total_pages(25), 3);
        assert_eq!(page.offset(), 20);
        assert_eq!(page.limit(), 10);
    }

    #[test]
    fn empty_result_has_no_pages() {
        assert_eq!(PageRequest::default().total_pages(0), 0);
    }

    #[test]
    fn search_terms_split_on_whitespace() {
        let filter = FileFilter {
            search: Some("  annual   report ".into()),
            ..Default::default()
        };
        assert_eq!(filter.search_terms(), vec!["annual", "report"]);
        assert!(FileFilter::default().search_terms().is_empty());
    }

    #[test]
    fn sort_field_accepts_client_names() {
        assert_eq!(SortField::parse("uploadDate"), Some(SortField::CreatedAt));
        assert_eq!(SortField::parse("downloads"), Some(SortField::DownloadCount));
        assert_eq!(SortField::parse("password"), None);
    }

    proptest! {
        #[test]
        fn total_pages_is_ceiling_division(total in 0i64..100_000, size in 1u32..=MAX_PAGE_SIZE) {
            let req = PageRequest { page: 1, page_size: size };
            let pages = req.total_pages(total);
            let size = i64::from(size);
            prop_assert!(pages * size >= total);
            prop_assert!(pages == 0 || (pages - 1) * size < total);
        }
    }
}
