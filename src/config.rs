use crate::models::file::BackendKind;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{collections::BTreeSet, env, fmt, path::PathBuf, str::FromStr};

/// Default upload ceiling: 5 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_ALLOWED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "application/pdf"];

/// Centralized application configuration.
/// Combines environment variables and CLI arguments, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub storage: StorageSettings,
    pub limits: UploadLimits,
    pub jwt_secret: Secret,
}

/// Which backend takes new uploads, plus what every mountable backend needs.
///
/// The local root is always known so records written to disk stay reachable
/// after the active backend changes; `s3` is set whenever a bucket is.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub active: BackendKind,
    pub local_root: PathBuf,
    pub s3: Option<S3Settings>,
}

impl StorageSettings {
    pub fn kind(&self) -> BackendKind {
        self.active
    }
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services; AWS when unset.
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<Secret>,
}

/// Upload admission rules enforced before any backend write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_upload_bytes: u64,
    pub allowed_mime_types: BTreeSet<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl UploadLimits {
    pub fn is_mime_type_allowed(&self, mime_type: &str) -> bool {
        self.allowed_mime_types.contains(mime_type)
    }
}

/// A string that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[hidden]")
    }
}

impl std::ops::Deref for Secret {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Metadata-governed file storage service")]
pub struct Args {
    /// Host to bind to (overrides FILEVAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILEVAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides FILEVAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// `local` or `object_store` (overrides FILEVAULT_STORAGE_BACKEND)
    #[arg(long)]
    pub storage_backend: Option<String>,

    /// Root directory for the local backend (overrides FILEVAULT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Upload size ceiling in bytes (overrides FILEVAULT_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Comma separated MIME allow-list (overrides FILEVAULT_ALLOWED_MIME_TYPES)
    #[arg(long)]
    pub allowed_mime_types: Option<String>,

    /// Bucket for the object store backend (overrides FILEVAULT_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Region for the object store backend (overrides FILEVAULT_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Endpoint for S3-compatible services (overrides FILEVAULT_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values from `lookup` over defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = args
            .host
            .or_else(|| lookup("FILEVAULT_HOST"))
            .unwrap_or_else(|| "0.0.0.0".into());

        let port = match args.port {
            Some(port) => port,
            None => parse_env(&lookup, "FILEVAULT_PORT")?.unwrap_or(3000),
        };

        let database_url = args
            .database_url
            .or_else(|| lookup("FILEVAULT_DATABASE_URL"))
            .unwrap_or_else(|| "sqlite://./data/meta/filevault.db".into());

        let backend_kind = match args
            .storage_backend
            .or_else(|| lookup("FILEVAULT_STORAGE_BACKEND"))
        {
            Some(raw) => raw
                .parse::<BackendKind>()
                .map_err(anyhow::Error::msg)
                .context("parsing storage backend")?,
            None => BackendKind::Local,
        };

        let s3 = args
            .s3_bucket
            .or_else(|| lookup("FILEVAULT_S3_BUCKET"))
            .map(|bucket| S3Settings {
                bucket,
                region: args
                    .s3_region
                    .or_else(|| lookup("FILEVAULT_S3_REGION"))
                    .unwrap_or_else(|| "us-east-1".into()),
                endpoint: args.s3_endpoint.or_else(|| lookup("FILEVAULT_S3_ENDPOINT")),
                access_key_id: lookup("FILEVAULT_S3_ACCESS_KEY_ID"),
                secret_access_key: lookup("FILEVAULT_S3_SECRET_ACCESS_KEY").map(Secret::new),
            });
        if backend_kind == BackendKind::ObjectStore && s3.is_none() {
            bail!("FILEVAULT_S3_BUCKET (or --s3-bucket) is required for the object store backend");
        }

        let storage = StorageSettings {
            active: backend_kind,
            local_root: args
                .storage_dir
                .or_else(|| lookup("FILEVAULT_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/uploads".into())
                .into(),
            s3,
        };

        let max_upload_bytes = match args.max_upload_bytes {
            Some(max) => max,
            None => parse_env(&lookup, "FILEVAULT_MAX_UPLOAD_BYTES")?
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        };
        if max_upload_bytes == 0 {
            bail!("max upload bytes must be greater than zero");
        }

        let allowed_mime_types = match args
            .allowed_mime_types
            .or_else(|| lookup("FILEVAULT_ALLOWED_MIME_TYPES"))
        {
            Some(raw) => {
                let types: BTreeSet<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_ascii_lowercase)
                    .collect();
                if types.is_empty() {
                    bail!("allowed MIME type list is empty");
                }
                types
            }
            None => UploadLimits::default().allowed_mime_types,
        };

        let Some(jwt_secret) = lookup("FILEVAULT_JWT_SECRET").filter(|s| !s.is_empty()) else {
            bail!("FILEVAULT_JWT_SECRET must be set");
        };

        Ok(Self {
            host,
            port,
            database_url,
            storage,
            limits: UploadLimits {
                max_upload_bytes,
                allowed_mime_types,
            },
            jwt_secret: Secret::new(jwt_secret),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", key, value))
        })
        .transpose()
}
