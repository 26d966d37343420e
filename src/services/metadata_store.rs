//! Metadata store: durable, indexed file records in SQLite.
//!
//! Records are the only place ownership, visibility and counters live; the
//! storage backends never see them. Tags are a JSON array column and are
//! queried through SQLite's `json_each`.

use crate::models::{
    file::FileRecord,
    query::{FileFilter, FileSort, PageRequest},
};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::{collections::BTreeSet, future::Future};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record `{0}` already exists")]
    Duplicate(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Field-level changes the store applies in one statement. `None` leaves
/// the column untouched.
#[derive(Clone, Debug, Default)]
pub struct RecordChanges {
    pub description: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub is_public: Option<bool>,
}

/// A page of records and the size of the whole match set.
#[derive(Debug)]
pub struct QueryOutcome {
    pub records: Vec<FileRecord>,
    pub total: i64,
}

pub trait MetadataStore: Send + Sync + 'static {
    fn insert(&self, record: &FileRecord) -> impl Future<Output = StoreResult<()>> + Send;

    fn get(&self, id: Uuid) -> impl Future<Output = StoreResult<Option<FileRecord>>> + Send;

    /// Apply `changes` and return the updated record, or `None` if the id is
    /// unknown.
    fn update(
        &self,
        id: Uuid,
        changes: &RecordChanges,
    ) -> impl Future<Output = StoreResult<Option<FileRecord>>> + Send;

    /// Returns whether a record was removed.
    fn delete(&self, id: Uuid) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Atomically bump the download counter; returns the new value, or
    /// `None` if the record is gone.
    fn increment_downloads(&self, id: Uuid)
    -> impl Future<Output = StoreResult<Option<i64>>> + Send;

    /// Records visible to `viewer` that match `filter`, sorted and paged.
    fn query(
        &self,
        viewer: Uuid,
        filter: &FileFilter,
        sort: FileSort,
        page: PageRequest,
    ) -> impl Future<Output = StoreResult<QueryOutcome>> + Send;

    fn ping(&self) -> impl Future<Output = StoreResult<()>> + Send {
        async { Ok(()) }
    }
}

const RECORD_COLUMNS: &str = "id, original_name, size_bytes, mime_type, storage_locator, \
     backend_kind, is_public, owner_id, tags, description, download_count, created_at";

#[derive(Clone, Debug)]
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, record: &FileRecord) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO files (
                id, original_name, size_bytes, mime_type, storage_locator, backend_kind,
                is_public, owner_id, tags, description, download_count, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(&record.original_name)
        .bind(record.size_bytes)
        .bind(&record.mime_type)
        .bind(&record.storage_locator)
        .bind(record.backend_kind)
        .bind(record.is_public)
        .bind(record.owner_id)
        .bind(Json(&record.tags))
        .bind(&record.description)
        .bind(record.download_count)
        .bind(record.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Duplicate(record.id)),
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM files WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn update(&self, id: Uuid, changes: &RecordChanges) -> StoreResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "UPDATE files SET
                description = COALESCE(?, description),
                tags = COALESCE(?, tags),
                is_public = COALESCE(?, is_public)
             WHERE id = ?
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(changes.description.as_deref())
        .bind(changes.tags.as_ref().map(Json))
        .bind(changes.is_public)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_downloads(&self, id: Uuid) -> StoreResult<Option<i64>> {
        let count = sqlx::query_scalar::<_, i64>(
            "UPDATE files SET download_count = download_count + 1
             WHERE id = ?
             RETURNING download_count",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(count)
    }

    async fn query(
        &self,
        viewer: Uuid,
        filter: &FileFilter,
        sort: FileSort,
        page: PageRequest,
    ) -> StoreResult<QueryOutcome> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM files WHERE ");
        push_predicate(&mut count, viewer, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {RECORD_COLUMNS} FROM files WHERE "
        ));
        push_predicate(&mut select, viewer, filter);
        select.push(format_args!(
            " ORDER BY {col} {dir}, id {dir} LIMIT ",
            col = sort.field.column(),
            dir = sort.direction.keyword()
        ));
        select.push_bind(page.limit());
        select.push(" OFFSET ");
        select.push_bind(page.offset());

        let records: Vec<FileRecord> = select.build_query_as().fetch_all(&self.pool).await?;
        Ok(QueryOutcome { records, total })
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

/// Visible set (own or public) narrowed by the optional filters.
fn push_predicate(builder: &mut QueryBuilder<'_, Sqlite>, viewer: Uuid, filter: &FileFilter) {
    builder.push("(owner_id = ");
    builder.push_bind(viewer);
    builder.push(" OR is_public = 1)");

    let terms = filter.search_terms();
    if !terms.is_empty() {
        builder.push(" AND (");
        for (i, term) in terms.iter().enumerate() {
            if i > 0 {
                builder.push(" OR ");
            }
            let pattern = format!("%{}%", escape_like(term));
            builder.push("original_name LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" ESCAPE '\\' OR description LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(
                " ESCAPE '\\' OR EXISTS (SELECT 1 FROM json_each(files.tags) WHERE json_each.value LIKE ",
            );
            builder.push_bind(pattern);
            builder.push(" ESCAPE '\\')");
        }
        builder.push(")");
    }

    if let Some(tag) = filter.tag.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        builder.push(" AND EXISTS (SELECT 1 FROM json_each(files.tags) WHERE json_each.value = ");
        builder.push_bind(tag.to_string());
        builder.push(")");
    }

    if let Some(mime) = filter.mime_type.as_deref().filter(|m| !m.is_empty()) {
        builder.push(" AND mime_type = ");
        builder.push_bind(mime.to_string());
    }
}

/// Make `%`, `_` and the escape char itself literal inside a LIKE pattern.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
