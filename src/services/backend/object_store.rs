//! S3-compatible object store backend built on Apache OpenDAL.

use super::{BackendError, BackendResult, StorageBackend, generated_name};
use crate::{config::S3Settings, models::file::BackendKind};
use bytes::Bytes;
use opendal::{ErrorKind, Operator, services};
use tracing::debug;

/// Key prefix for every object this service writes.
const KEY_PREFIX: &str = "uploads/";

/// Objects are stored under `uploads/{generated name}`; the key is the
/// locator.
#[derive(Clone, Debug)]
pub struct ObjectStoreBackend {
    operator: Operator,
    forwards_content_type: bool,
}

impl ObjectStoreBackend {
    pub fn new(operator: Operator) -> Self {
        let forwards_content_type = operator.info().full_capability().write_with_content_type;
        Self {
            operator,
            forwards_content_type,
        }
    }

    pub fn from_s3(settings: &S3Settings) -> BackendResult<Self> {
        let mut builder = services::S3::default()
            .bucket(&settings.bucket)
            .region(&settings.region);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint(endpoint);
        }
        if let Some(key_id) = &settings.access_key_id {
            builder = builder.access_key_id(key_id);
        }
        if let Some(secret) = &settings.secret_access_key {
            builder = builder.secret_access_key(secret);
        }

        let operator = Operator::new(builder)
            .map_err(|e| BackendError::Unavailable(format!("object store configuration: {e}")))?
            .finish();
        Ok(Self::new(operator))
    }

    /// In-process store with the same semantics, for tests.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        let operator = Operator::new(services::Memory::default())
            .expect("memory operator")
            .finish();
        Self::new(operator)
    }

    fn check_key<'a>(&self, locator: &'a str) -> BackendResult<&'a str> {
        let valid = locator
            .strip_prefix(KEY_PREFIX)
            .is_some_and(|name| !name.is_empty() && !name.contains('/') && !name.contains(".."));
        if valid {
            Ok(locator)
        } else {
            Err(BackendError::InvalidLocator(locator.to_string()))
        }
    }
}

impl StorageBackend for ObjectStoreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    async fn put(
        &self,
        data: Bytes,
        content_type: &str,
        suggested_name: &str,
    ) -> BackendResult<String> {
        let key = format!("{KEY_PREFIX}{}", generated_name(suggested_name));
        let size = data.len();

        let result = if self.forwards_content_type {
            self.operator
                .write_with(&key, data)
                .content_type(content_type)
                .await
        } else {
            self.operator.write(&key, data).await
        };
        result.map_err(|err| map_err(err, &key))?;

        debug!("uploaded {} bytes to object store key {}", size, key);
        Ok(key)
    }

    async fn get(&self, locator: &str) -> BackendResult<Bytes> {
        let key = self.check_key(locator)?;
        let buffer = self
            .operator
            .read(key)
            .await
            .map_err(|err| map_err(err, key))?;
        Ok(buffer.to_bytes())
    }

    async fn delete(&self, locator: &str) -> BackendResult<()> {
        let key = self.check_key(locator)?;
        self.operator
            .delete(key)
            .await
            .map_err(|err| map_err(err, key))
    }

    /// A stat on a key that never exists: `NotFound` proves the bucket
    /// answered.
    async fn probe(&self) -> BackendResult<()> {
        match self.operator.stat(".filevault-probe").await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BackendError::Unavailable(err.to_string())),
        }
    }
}

/// Keep "not found" distinct from everything else so callers can choose
/// between failing and retrying.
fn map_err(err: opendal::Error, key: &str) -> BackendError {
    match err.kind() {
        ErrorKind::NotFound => BackendError::NotFound(key.to_string()),
        _ => BackendError::Unavailable(err.to_string()),
    }
}
