//! Local-disk backend: objects are files directly beneath a managed root.

use super::{BackendError, BackendResult, StorageBackend, generated_name};
use crate::models::file::BackendKind;
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Stores payloads as `{root}/{generated name}`. The locator is the bare
/// generated name, so records stay readable when the root is moved and the
/// backend is pointed at the new location.
#[derive(Clone, Debug)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a locator to a path under the root, refusing anything that is
    /// not a plain file name.
    fn resolve(&self, locator: &str) -> BackendResult<PathBuf> {
        let mut components = Path::new(locator).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == locator => Ok(self.root.join(name)),
            _ => Err(BackendError::InvalidLocator(locator.to_string())),
        }
    }

    /// Write to a temp file, fsync, then rename into place so a crash never
    /// leaves a half-written object under a real name.
    async fn write_atomically(&self, final_path: &Path, data: &[u8]) -> io::Result<()> {
        let tmp_path = self.root.join(format!(".tmp-{}", Uuid::new_v4()));
        let result = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, final_path).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        result
    }
}

impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn put(
        &self,
        data: Bytes,
        _content_type: &str,
        suggested_name: &str,
    ) -> BackendResult<String> {
        fs::create_dir_all(&self.root).await.map_err(unavailable)?;

        let name = generated_name(suggested_name);
        let final_path = self.root.join(&name);
        self.write_atomically(&final_path, &data)
            .await
            .map_err(unavailable)?;

        debug!("wrote {} bytes to {}", data.len(), final_path.display());
        Ok(name)
    }

    async fn get(&self, locator: &str) -> BackendResult<Bytes> {
        let path = self.resolve(locator)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(BackendError::NotFound(locator.to_string()))
            }
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn delete(&self, locator: &str) -> BackendResult<()> {
        let path = self.resolve(locator)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("removed physical file {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(BackendError::NotFound(locator.to_string()))
            }
            Err(err) => Err(unavailable(err)),
        }
    }

    /// Write, read back and remove a scratch file under the root.
    async fn probe(&self) -> BackendResult<()> {
        fs::create_dir_all(&self.root).await.map_err(unavailable)?;
        let tmp_path = self.root.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await.map_err(unavailable)?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;

        match read_back {
            Ok(bytes) if bytes == b"readyz" => Ok(()),
            Ok(_) => Err(BackendError::Unavailable("file content mismatch".into())),
            Err(err) => Err(unavailable(err)),
        }
    }
}

fn unavailable(err: io::Error) -> BackendError {
    BackendError::Unavailable(err.to_string())
}
