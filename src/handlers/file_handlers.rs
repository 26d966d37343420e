//! HTTP handlers for file operations.
//!
//! Handlers only translate between HTTP and the registry: parse the request,
//! call one registry operation, shape the response. Access decisions and
//! validation live in the registry.

use crate::{
    errors::AppError,
    models::{
        file::{FileChanges, FileRecord, NewUpload, parse_tag_list},
        principal::Principal,
        query::{FileFilter, FilePage, FileQuery, FileSort, PageRequest, SortDirection, SortField},
    },
    services::file_registry::{Registry, RegistryError},
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, Query, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::debug;
use uuid::Uuid;

/// Query params accepted by `GET /files`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    pub tag: Option<String>,
    #[serde(rename = "type")]
    pub mime_type: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl ListFilesQuery {
    fn into_file_query(self) -> Result<FileQuery, RegistryError> {
        let field = match non_empty(self.sort_by) {
            Some(raw) => SortField::parse(&raw).ok_or_else(|| {
                RegistryError::ValidationFailed(format!("cannot sort by `{raw}`"))
            })?,
            None => SortField::default(),
        };
        let direction = match non_empty(self.sort_order) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "asc" => SortDirection::Asc,
                "desc" => SortDirection::Desc,
                _ => {
                    return Err(RegistryError::ValidationFailed(format!(
                        "sort order must be `asc` or `desc`, got `{raw}`"
                    )));
                }
            },
            None => SortDirection::default(),
        };

        let defaults = PageRequest::default();
        Ok(FileQuery {
            filter: FileFilter {
                search: non_empty(self.search),
                tag: non_empty(self.tag),
                mime_type: non_empty(self.mime_type),
            },
            sort: FileSort { field, direction },
            page: PageRequest {
                page: self.page.unwrap_or(defaults.page),
                page_size: self.limit.unwrap_or(defaults.page_size),
            },
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `POST /files`: multipart upload.
///
/// Fields: `file` (required), `description`, `tags` (comma list) and
/// `isPublic` (`true`/`false`). Unknown fields are skipped.
pub async fn upload_file(
    State(registry): State<Registry>,
    principal: Principal,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let mut multipart =
        multipart.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let mut file: Option<(String, String, Bytes)> = None;
    let mut description = String::new();
    let mut tags = BTreeSet::new();
    let mut is_public = false;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let original_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                file = Some((original_name, content_type, data));
            }
            "description" => {
                description = field.text().await.map_err(multipart_error)?;
            }
            "tags" => {
                tags = parse_tag_list(&field.text().await.map_err(multipart_error)?);
            }
            "isPublic" => {
                is_public = parse_flag(&field.text().await.map_err(multipart_error)?);
            }
            other => debug!("ignoring multipart field `{}`", other),
        }
    }

    let Some((original_name, content_type, data)) = file else {
        return Err(AppError::bad_request("multipart field `file` is required"));
    };

    let upload = NewUpload {
        original_name,
        content_type,
        description: description.trim().to_string(),
        tags,
        is_public,
    };
    let record = registry.upload(&principal, data, upload).await?;

    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /files`: the caller's own files plus public ones, paged.
pub async fn list_files(
    State(registry): State<Registry>,
    principal: Principal,
    query: Result<Query<ListFilesQuery>, QueryRejection>,
) -> Result<Json<FilePage>, AppError> {
    let Query(q) = query?;
    let query = q.into_file_query()?;
    let page = registry.list(&principal, &query).await?;
    Ok(Json(page))
}

/// `PATCH /files/{id}`: update description, tags or visibility.
pub async fn update_file(
    State(registry): State<Registry>,
    principal: Principal,
    id: Result<Path<Uuid>, PathRejection>,
    changes: Result<Json<FileChanges>, JsonRejection>,
) -> Result<Json<FileRecord>, AppError> {
    let Path(id) = id?;
    let Json(changes) = changes?;
    let record = registry.update(&principal, id, changes).await?;
    Ok(Json(record))
}

/// `DELETE /files/{id}`
pub async fn delete_file(
    State(registry): State<Registry>,
    principal: Principal,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path(id) = id?;
    registry.delete(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /files/{id}/content`: the file bytes as an attachment.
///
/// Anonymous callers are allowed; they can only read public files.
pub async fn download_file(
    State(registry): State<Registry>,
    principal: Option<Principal>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(id) = id?;
    let download = registry.download(principal.as_ref(), id).await?;
    let record = download.record;

    let mut response = Response::new(Body::from(download.data));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&record.mime_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&record.original_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "on" | "yes"
    )
}

/// `attachment` with an ASCII fallback name and an RFC 5987 UTF-8 name.
fn content_disposition(original_name: &str) -> String {
    let fallback: String = original_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();

    let mut encoded = String::with_capacity(original_name.len());
    for byte in original_name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }

    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
