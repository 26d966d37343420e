//! FileRegistry: upload, download, delete, update and list files.
//!
//! The registry is the only component that sees both the storage backend
//! and the metadata store. It checks the access policy before touching
//! either, and orders writes so that a metadata record never points at bytes
//! that were not stored:
//!
//! - upload writes the object first and the record second; if the record
//!   is confirmed missing after a failed insert the object is deleted again,
//!   best-effort. The insert and its cleanup run on a spawned task, so a
//!   cancelled caller cannot stop them halfway;
//! - delete removes the object first and the record second; if the object
//!   cannot be removed the record stays.
//!
//! A failed compensating delete leaves an orphan (object without record).
//! Orphans are logged and never returned to clients.
//!
//! Reads and deletes go to the backend named by the record's
//! `backend_kind`; only new uploads use the active backend.

use crate::{
    config::UploadLimits,
    models::{
        file::{FileChanges, FileRecord, NewUpload},
        principal::Principal,
        query::{FilePage, FileQuery, MAX_PAGE_SIZE, PageRequest},
    },
    services::{
        access_policy::{can_mutate, can_read},
        backend::{Backend, BackendError, BackendSet, StorageBackend},
        metadata_store::{MetadataStore, RecordChanges, SqliteMetadataStore, StoreError},
    },
};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Longest accepted client filename, in bytes.
const MAX_ORIGINAL_NAME_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("access denied")]
    AccessDenied,
    #[error("file `{0}` not found")]
    NotFound(Uuid),
    #[error("content type `{0}` is not allowed")]
    UnsupportedMediaType(String),
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: u64, max: u64 },
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    /// Object present in the backend with no record. Logged, never returned
    /// to callers.
    #[error("backend object `{locator}` has no metadata record")]
    ConflictOrphan { locator: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Bytes plus the record they belong to.
#[derive(Debug)]
pub struct FileDownload {
    pub record: FileRecord,
    pub data: Bytes,
}

/// The registry as wired in production.
pub type Registry = FileRegistry<Backend, SqliteMetadataStore>;

pub struct FileRegistry<B, M> {
    backends: BackendSet<B>,
    store: Arc<M>,
    limits: Arc<UploadLimits>,
}

impl<B, M> Clone for FileRegistry<B, M> {
    fn clone(&self) -> Self {
        Self {
            backends: self.backends.clone(),
            store: Arc::clone(&self.store),
            limits: Arc::clone(&self.limits),
        }
    }
}

impl<B: StorageBackend, M: MetadataStore> FileRegistry<B, M> {
    pub fn new(backends: BackendSet<B>, store: Arc<M>, limits: UploadLimits) -> Self {
        Self {
            backends,
            store,
            limits: Arc::new(limits),
        }
    }

    /// Validate, store the bytes, then persist the record.
    pub async fn upload(
        &self,
        principal: &Principal,
        data: Bytes,
        upload: NewUpload,
    ) -> RegistryResult<FileRecord> {
        let mime_type = mime_essence(&upload.content_type);
        if !self.limits.is_mime_type_allowed(&mime_type) {
            return Err(RegistryError::UnsupportedMediaType(upload.content_type));
        }

        let size = data.len() as u64;
        if size > self.limits.max_upload_bytes {
            return Err(RegistryError::PayloadTooLarge {
                size,
                max: self.limits.max_upload_bytes,
            });
        }

        let original_name = upload.original_name.trim();
        if original_name.is_empty() {
            return Err(RegistryError::ValidationFailed(
                "file name must not be empty".into(),
            ));
        }
        if original_name.len() > MAX_ORIGINAL_NAME_LEN {
            return Err(RegistryError::ValidationFailed(format!(
                "file name is longer than {MAX_ORIGINAL_NAME_LEN} bytes"
            )));
        }

        let backend = self.backends.active();
        let locator = backend
            .put(data, &mime_type, original_name)
            .await
            .map_err(|err| {
                warn!(principal = %principal, "backend write failed: {}", err);
                RegistryError::BackendUnavailable(err.to_string())
            })?;

        let record = FileRecord {
            id: Uuid::new_v4(),
            original_name: original_name.to_string(),
            size_bytes: size as i64,
            mime_type,
            storage_locator: locator,
            backend_kind: backend.kind(),
            is_public: upload.is_public,
            owner_id: principal.id(),
            tags: upload.tags,
            description: upload.description,
            download_count: 0,
            created_at: Utc::now(),
        };

        let store = Arc::clone(&self.store);
        let backend = Arc::clone(backend);
        let file_id = record.id;
        let record = tokio::spawn(async move {
            persist_record(store.as_ref(), backend.as_ref(), record).await
        })
        .await
        .map_err(|err| {
            error!(file_id = %file_id, "metadata write task failed: {}", err);
            metadata_unsaved()
        })??;

        info!(file_id = %record.id, owner = %principal, size, "stored file");
        Ok(record)
    }

    /// Return the bytes of a readable file and count the download.
    ///
    /// Owners may always read their own files; everyone else (including
    /// anonymous callers) only public ones.
    pub async fn download(
        &self,
        principal: Option<&Principal>,
        id: Uuid,
    ) -> RegistryResult<FileDownload> {
        let mut record = self.fetch(id).await?;
        if !can_read(principal, &record) {
            return Err(RegistryError::AccessDenied);
        }

        let data = self
            .backend_for(&record)?
            .get(&record.storage_locator)
            .await
            .map_err(|err| match err {
                BackendError::NotFound(_) => {
                    error!(file_id = %id, "record exists but backend object is missing");
                    RegistryError::NotFound(id)
                }
                other => {
                    warn!(file_id = %id, "backend read failed: {}", other);
                    RegistryError::BackendUnavailable(other.to_string())
                }
            })?;

        // Counting is best-effort: the caller gets the bytes either way.
        match self.store.increment_downloads(id).await {
            Ok(Some(count)) => record.download_count = count,
            Ok(None) => warn!(file_id = %id, "record vanished before download was counted"),
            Err(err) => warn!(file_id = %id, "failed to count download: {}", err),
        }

        debug!(file_id = %id, bytes = data.len(), "served download");
        Ok(FileDownload { record, data })
    }

    /// Remove the object, then the record. Owner only.
    pub async fn delete(&self, principal: &Principal, id: Uuid) -> RegistryResult<()> {
        let record = self.fetch(id).await?;
        if !can_mutate(principal, &record) {
            return Err(RegistryError::AccessDenied);
        }

        match self.backend_for(&record)?.delete(&record.storage_locator).await {
            Ok(()) => {}
            Err(BackendError::NotFound(_)) => {
                warn!(file_id = %id, "backend object already gone; removing record");
            }
            Err(err) => {
                warn!(file_id = %id, "backend delete failed, keeping record: {}", err);
                return Err(RegistryError::BackendUnavailable(err.to_string()));
            }
        }

        if !self.store.delete(id).await? {
            debug!(file_id = %id, "record was already removed");
        }
        info!(file_id = %id, owner = %principal, "deleted file");
        Ok(())
    }

    /// Apply owner changes to description, tags and visibility.
    pub async fn update(
        &self,
        principal: &Principal,
        id: Uuid,
        changes: FileChanges,
    ) -> RegistryResult<FileRecord> {
        let record = self.fetch(id).await?;
        if !can_mutate(principal, &record) {
            return Err(RegistryError::AccessDenied);
        }
        if changes.is_empty() {
            return Ok(record);
        }

        let changes = RecordChanges {
            description: changes.description,
            tags: changes.tags.map(|tags| tags.normalize()),
            is_public: changes.is_public,
        };
        let updated = self
            .store
            .update(id, &changes)
            .await?
            .ok_or(RegistryError::NotFound(id))?;

        info!(file_id = %id, owner = %principal, "updated file metadata");
        Ok(updated)
    }

    /// One page of the files `principal` can see. Reads metadata only.
    pub async fn list(&self, principal: &Principal, query: &FileQuery) -> RegistryResult<FilePage> {
        if query.page.page < 1 {
            return Err(RegistryError::ValidationFailed("page must be at least 1".into()));
        }
        if query.page.page_size < 1 {
            return Err(RegistryError::ValidationFailed(
                "page size must be at least 1".into(),
            ));
        }
        let page = PageRequest {
            page: query.page.page,
            page_size: query.page.page_size.min(MAX_PAGE_SIZE),
        };

        let outcome = self
            .store
            .query(principal.id(), &query.filter, query.sort, page)
            .await?;

        Ok(FilePage {
            files: outcome.records,
            current_page: page.page,
            total_pages: page.total_pages(outcome.total),
            total_files: outcome.total,
        })
    }

    pub async fn probe_store(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    pub async fn probe_backend(&self) -> Result<(), BackendError> {
        self.backends.probe().await
    }

    async fn fetch(&self, id: Uuid) -> RegistryResult<FileRecord> {
        self.store.get(id).await?.ok_or(RegistryError::NotFound(id))
    }

    /// The backend that issued the record's locator.
    fn backend_for(&self, record: &FileRecord) -> RegistryResult<&Arc<B>> {
        self.backends.for_kind(record.backend_kind).ok_or_else(|| {
            warn!(
                file_id = %record.id,
                "file stored on {} backend, which is not mounted",
                record.backend_kind
            );
            RegistryError::BackendUnavailable(format!(
                "{} backend is not configured",
                record.backend_kind
            ))
        })
    }
}

/// `type/subtype` without parameters, lowercased.
fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn metadata_unsaved() -> RegistryError {
    RegistryError::BackendUnavailable("file metadata could not be saved".into())
}

/// Insert the record for an object that is already in `backend`.
///
/// A failed insert may still have committed, so the store is read back
/// before the object is removed. If that read fails too, the object is kept.
async fn persist_record<B: StorageBackend, M: MetadataStore>(
    store: &M,
    backend: &B,
    record: FileRecord,
) -> RegistryResult<FileRecord> {
    let err = match store.insert(&record).await {
        Ok(()) => return Ok(record),
        Err(err) => err,
    };
    error!(file_id = %record.id, "metadata write failed after backend write: {}", err);

    match store.get(record.id).await {
        Ok(Some(saved)) if saved.storage_locator == record.storage_locator => {
            warn!(file_id = %record.id, "record was saved despite the reported failure");
            return Ok(saved);
        }
        Ok(_) => remove_orphan(backend, &record.storage_locator).await,
        Err(check) => {
            let orphan = RegistryError::ConflictOrphan {
                locator: record.storage_locator.clone(),
            };
            error!(error = %orphan, "could not confirm record state, keeping object: {}", check);
        }
    }
    Err(metadata_unsaved())
}

async fn remove_orphan<B: StorageBackend>(backend: &B, locator: &str) {
    match backend.delete(locator).await {
        Ok(()) | Err(BackendError::NotFound(_)) => {
            info!(locator = %locator, "removed object left by failed upload");
        }
        Err(err) => {
            let orphan = RegistryError::ConflictOrphan {
                locator: locator.to_string(),
            };
            error!(error = %orphan, "compensating delete failed: {}", err);
        }
    }
}
