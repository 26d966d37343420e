//! Storage backends: where file bytes live.
//!
//! A backend knows nothing about metadata. It stores bytes and hands back an
//! opaque locator; the registry keeps that locator in the file record and
//! passes it back for reads and deletes.

mod local;
mod object_store;

pub use local::LocalBackend;
pub use object_store::ObjectStoreBackend;

use crate::{config::StorageSettings, models::file::BackendKind};
use bytes::Bytes;
use chrono::Utc;
use std::{future::Future, path::Path, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("locator `{0}` is not valid for this backend")]
    InvalidLocator(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Uniform capability every backend provides.
pub trait StorageBackend: Send + Sync + 'static {
    /// Kind recorded on files written through this backend.
    fn kind(&self) -> BackendKind;

    /// Store `data` and return the locator that addresses it.
    ///
    /// `suggested_name` only contributes a sanitized extension; it is never
    /// used as the stored name.
    fn put(
        &self,
        data: Bytes,
        content_type: &str,
        suggested_name: &str,
    ) -> impl Future<Output = BackendResult<String>> + Send;

    fn get(&self, locator: &str) -> impl Future<Output = BackendResult<Bytes>> + Send;

    fn delete(&self, locator: &str) -> impl Future<Output = BackendResult<()>> + Send;

    /// Cheap reachability check for readiness probes.
    fn probe(&self) -> impl Future<Output = BackendResult<()>> + Send {
        async { Ok(()) }
    }
}

/// The closed set of backends.
pub enum Backend {
    Local(LocalBackend),
    ObjectStore(ObjectStoreBackend),
}

/// Backends mounted for one registry. New uploads go to the active one;
/// reads and deletes go to whichever backend issued the record's locator,
/// so records survive a switch of the active backend.
pub struct BackendSet<B> {
    active: Arc<B>,
    readers: Vec<Arc<B>>,
}

impl<B> Clone for BackendSet<B> {
    fn clone(&self) -> Self {
        Self {
            active: Arc::clone(&self.active),
            readers: self.readers.clone(),
        }
    }
}

impl<B: StorageBackend> BackendSet<B> {
    pub fn new(active: Arc<B>) -> Self {
        Self {
            active,
            readers: Vec::new(),
        }
    }

    /// Mount a backend for reads and deletes only. Ignored when a backend of
    /// the same kind is already mounted.
    pub fn with_reader(mut self, reader: Arc<B>) -> Self {
        if self.for_kind(reader.kind()).is_none() {
            self.readers.push(reader);
        }
        self
    }

    pub fn active(&self) -> &Arc<B> {
        &self.active
    }

    pub fn for_kind(&self, kind: BackendKind) -> Option<&Arc<B>> {
        std::iter::once(&self.active)
            .chain(&self.readers)
            .find(|backend| backend.kind() == kind)
    }

    /// Probe every mounted backend, active first.
    pub async fn probe(&self) -> BackendResult<()> {
        for backend in std::iter::once(&self.active).chain(&self.readers) {
            backend.probe().await?;
        }
        Ok(())
    }
}

impl BackendSet<Backend> {
    /// Local is always mounted; the object store is mounted whenever S3
    /// settings are present.
    pub fn from_settings(settings: &StorageSettings) -> BackendResult<Self> {
        let local = LocalBackend::new(settings.local_root.clone());
        tracing::info!("local storage root: {}", local.root().display());
        let local = Arc::new(Backend::Local(local));

        let object_store = settings
            .s3
            .as_ref()
            .map(|s3| ObjectStoreBackend::from_s3(s3).map(|b| Arc::new(Backend::ObjectStore(b))))
            .transpose()?;

        match (settings.active, object_store) {
            (BackendKind::Local, None) => Ok(Self::new(local)),
            (BackendKind::Local, Some(object_store)) => {
                Ok(Self::new(local).with_reader(object_store))
            }
            (BackendKind::ObjectStore, Some(object_store)) => {
                Ok(Self::new(object_store).with_reader(local))
            }
            (BackendKind::ObjectStore, None) => Err(BackendError::Unavailable(
                "object store selected without S3 settings".into(),
            )),
        }
    }
}

impl StorageBackend for Backend {
    fn kind(&self) -> BackendKind {
        match self {
            Self::Local(b) => b.kind(),
            Self::ObjectStore(b) => b.kind(),
        }
    }

    async fn put(
        &self,
        data: Bytes,
        content_type: &str,
        suggested_name: &str,
    ) -> BackendResult<String> {
        match self {
            Self::Local(b) => b.put(data, content_type, suggested_name).await,
            Self::ObjectStore(b) => b.put(data, content_type, suggested_name).await,
        }
    }

    async fn get(&self, locator: &str) -> BackendResult<Bytes> {
        match self {
            Self::Local(b) => b.get(locator).await,
            Self::ObjectStore(b) => b.get(locator).await,
        }
    }

    async fn delete(&self, locator: &str) -> BackendResult<()> {
        match self {
            Self::Local(b) => b.delete(locator).await,
            Self::ObjectStore(b) => b.delete(locator).await,
        }
    }

    async fn probe(&self) -> BackendResult<()> {
        match self {
            Self::Local(b) => b.probe().await,
            Self::ObjectStore(b) => b.probe().await,
        }
    }
}

/// Longest extension carried over from a client filename.
const MAX_EXTENSION_LEN: usize = 16;

/// `.ext` from a client filename when it is short plain ASCII, else empty.
fn safe_extension(suggested_name: &str) -> String {
    Path::new(suggested_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Collision-resistant stored name: `{unix-millis}-{random}{.ext}`.
fn generated_name(suggested_name: &str) -> String {
    format!(
        "{}-{}{}",
        Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple(),
        safe_extension(suggested_name)
    )
}
