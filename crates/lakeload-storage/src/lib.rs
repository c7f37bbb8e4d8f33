//! Object storage containers and hierarchical filesystems for lakeload.
//!
//! Two backends sit behind the same traits: a local directory tree (one
//! directory per container) and an S3-compatible store (one bucket per
//! container). Handles are cheap and reopened for every step.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "lakeload-storage";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("malformed connection string segment `{0}`")]
    MalformedSegment(String),
    #[error("unknown storage backend `{0}`")]
    UnknownBackend(String),
    #[error("connection string is missing `{0}`")]
    MissingKey(&'static str),
    #[error("invalid value `{value}` for `{key}`")]
    InvalidValue { key: String, value: String },
    #[error("invalid object path `{0}`")]
    InvalidPath(String),
    #[error("{path} was not created before writing")]
    NotCreated { path: String },
    #[error("append to {path} at offset {offset} but {staged} bytes are staged")]
    OffsetMismatch { path: String, offset: u64, staged: u64 },
    #[error("flush of {requested} bytes on {path} but only {staged} bytes are staged")]
    FlushLength {
        path: String,
        requested: u64,
        staged: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Local { root: PathBuf },
    S3(S3Settings),
}

impl FromStr for StorageBackend {
    type Err = StorageError;

    /// Parses `Key=Value;Key=Value` connection strings. Keys are case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut pairs: HashMap<String, String> = HashMap::new();
        for segment in s.split(';').map(str::trim).filter(|seg| !seg.is_empty()) {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| StorageError::MalformedSegment(segment.to_string()))?;
            pairs.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        let backend = pairs
            .get("backend")
            .map(|b| b.to_ascii_lowercase())
            .unwrap_or_else(|| "local".to_string());

        match backend.as_str() {
            "local" => Ok(StorageBackend::Local {
                root: PathBuf::from(pairs.remove("root").unwrap_or_else(|| "./lake".to_string())),
            }),
            "s3" => {
                let path_style = match pairs.get("pathstyle") {
                    None => false,
                    Some(v) => v.parse::<bool>().map_err(|_| StorageError::InvalidValue {
                        key: "PathStyle".to_string(),
                        value: v.clone(),
                    })?,
                };
                Ok(StorageBackend::S3(S3Settings {
                    endpoint: pairs.remove("endpoint"),
                    region: pairs
                        .remove("region")
                        .unwrap_or_else(|| "us-east-1".to_string()),
                    access_key: pairs
                        .remove("accesskey")
                        .ok_or(StorageError::MissingKey("AccessKey"))?,
                    secret_key: pairs
                        .remove("secretkey")
                        .ok_or(StorageError::MissingKey("SecretKey"))?,
                    path_style,
                }))
            }
            other => Err(StorageError::UnknownBackend(other.to_string())),
        }
    }
}

/// A named bucket of objects.
#[async_trait]
pub trait ObjectContainer: Send + Sync {
    fn name(&self) -> &str;

    /// Copy a local file to `destination`, replacing whatever is there.
    async fn upload_file(&self, local_path: &Path, destination: &str) -> anyhow::Result<()>;
}

/// Directory/file view over a store, written by offset appends and a flush.
#[async_trait]
pub trait LakeFileSystem: Send + Sync {
    fn name(&self) -> &str;

    async fn create_file(&self, path: &str) -> anyhow::Result<()>;

    async fn append(&self, path: &str, data: &[u8], offset: u64) -> anyhow::Result<()>;

    /// Commit exactly `length` staged bytes as the file content.
    async fn flush(&self, path: &str, length: u64) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ContainerConnector: Send + Sync {
    async fn container(&self, name: &str) -> anyhow::Result<Box<dyn ObjectContainer>>;

    async fn filesystem(&self, name: &str) -> anyhow::Result<Box<dyn LakeFileSystem>>;
}

#[derive(Debug, Clone)]
pub struct StorageAccount {
    backend: StorageBackend,
}

impl StorageAccount {
    pub fn new(backend: StorageBackend) -> Self {
        Self { backend }
    }

    pub fn from_connection_string(connection_string: &str) -> Result<Self, StorageError> {
        Ok(Self::new(connection_string.parse()?))
    }

    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }
}

#[async_trait]
impl ContainerConnector for StorageAccount {
    async fn container(&self, name: &str) -> anyhow::Result<Box<dyn ObjectContainer>> {
        validate_bucket_name(name)?;
        match &self.backend {
            StorageBackend::Local { root } => {
                Ok(Box::new(LocalContainer::open(root.join(name), name).await?))
            }
            StorageBackend::S3(settings) => Ok(Box::new(S3Container::new(settings, name))),
        }
    }

    async fn filesystem(&self, name: &str) -> anyhow::Result<Box<dyn LakeFileSystem>> {
        validate_bucket_name(name)?;
        match &self.backend {
            StorageBackend::Local { root } => {
                Ok(Box::new(LocalLakeFileSystem::open(root.join(name), name).await?))
            }
            StorageBackend::S3(settings) => Ok(Box::new(S3LakeFileSystem::new(settings, name))),
        }
    }
}

/// Upload one file, logging instead of failing. Callers never learn the outcome.
pub async fn upload_file(container: &dyn ObjectContainer, local_path: &Path, destination: &str) {
    match container.upload_file(local_path, destination).await {
        Ok(()) => info!(container = container.name(), "uploaded {destination}"),
        Err(err) => error!(
            container = container.name(),
            "failed to upload {destination}: {err:#}"
        ),
    }
}

fn validate_bucket_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(StorageError::InvalidPath(name.to_string()));
    }
    Ok(())
}

/// Resolve an object path below `root`, refusing anything that could escape it.
fn resolve_object_path(root: &Path, object_path: &str) -> Result<PathBuf, StorageError> {
    let relative = Path::new(object_path);
    let clean = !object_path.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !clean {
        return Err(StorageError::InvalidPath(object_path.to_string()));
    }
    Ok(root.join(relative))
}

#[derive(Debug, Clone)]
pub struct LocalContainer {
    name: String,
    root: PathBuf,
}

impl LocalContainer {
    pub async fn open(root: impl Into<PathBuf>, name: &str) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("creating container directory {}", root.display()))?;
        Ok(Self {
            name: name.to_string(),
            root,
        })
    }
}

#[async_trait]
impl ObjectContainer for LocalContainer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload_file(&self, local_path: &Path, destination: &str) -> anyhow::Result<()> {
        let target = resolve_object_path(&self.root, destination)?;
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating object directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        if let Err(err) = fs::copy(local_path, &temp_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!("copying {} into {}", local_path.display(), self.name)
            });
        }

        match fs::rename(&temp_path, &target).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "renaming temp object {} -> {}",
                        temp_path.display(),
                        target.display()
                    )
                })
            }
        }
    }
}

/// Stages each file as a hidden sibling and renames it into place on flush.
#[derive(Debug, Clone)]
pub struct LocalLakeFileSystem {
    name: String,
    root: PathBuf,
}

impl LocalLakeFileSystem {
    pub async fn open(root: impl Into<PathBuf>, name: &str) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("creating filesystem directory {}", root.display()))?;
        Ok(Self {
            name: name.to_string(),
            root,
        })
    }

    fn paths(&self, path: &str) -> Result<(PathBuf, PathBuf), StorageError> {
        let target = resolve_object_path(&self.root, path)?;
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::InvalidPath(path.to_string()))?;
        let staged = target.with_file_name(format!(".{file_name}.pending"));
        Ok((target, staged))
    }

    async fn staged_len(&self, path: &str, staged: &Path) -> anyhow::Result<u64> {
        match fs::metadata(staged).await {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotCreated {
                    path: path.to_string(),
                }
                .into())
            }
            Err(err) => Err(err).with_context(|| format!("inspecting {}", staged.display())),
        }
    }
}

#[async_trait]
impl LakeFileSystem for LocalLakeFileSystem {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_file(&self, path: &str) -> anyhow::Result<()> {
        let (target, staged) = self.paths(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        fs::File::create(&staged)
            .await
            .with_context(|| format!("creating staged file {}", staged.display()))?;
        debug!(filesystem = %self.name, "created {path}");
        Ok(())
    }

    async fn append(&self, path: &str, data: &[u8], offset: u64) -> anyhow::Result<()> {
        let (_, staged) = self.paths(path)?;
        let staged_len = self.staged_len(path, &staged).await?;
        if staged_len != offset {
            return Err(StorageError::OffsetMismatch {
                path: path.to_string(),
                offset,
                staged: staged_len,
            }
            .into());
        }

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&staged)
            .await
            .with_context(|| format!("opening staged file {}", staged.display()))?;
        file.write_all(data)
            .await
            .with_context(|| format!("appending to staged file {}", staged.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing staged file {}", staged.display()))?;
        Ok(())
    }

    async fn flush(&self, path: &str, length: u64) -> anyhow::Result<()> {
        let (target, staged) = self.paths(path)?;
        let staged_len = self.staged_len(path, &staged).await?;
        if staged_len < length {
            return Err(StorageError::FlushLength {
                path: path.to_string(),
                requested: length,
                staged: staged_len,
            }
            .into());
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .open(&staged)
            .await
            .with_context(|| format!("opening staged file {}", staged.display()))?;
        file.set_len(length)
            .await
            .with_context(|| format!("truncating staged file {}", staged.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("syncing staged file {}", staged.display()))?;
        drop(file);

        fs::rename(&staged, &target).await.with_context(|| {
            format!(
                "committing staged file {} -> {}",
                staged.display(),
                target.display()
            )
        })?;
        Ok(())
    }
}

fn s3_client(settings: &S3Settings) -> Client {
    let credentials = Credentials::new(
        &settings.access_key,
        &settings.secret_key,
        None,
        None,
        "lakeload-storage",
    );

    let mut builder = aws_sdk_s3::Config::builder()
        .credentials_provider(credentials)
        .region(Region::new(settings.region.clone()))
        .force_path_style(settings.path_style);

    if let Some(endpoint) = &settings.endpoint {
        builder = builder.endpoint_url(endpoint);
    }

    Client::from_conf(builder.build())
}

#[derive(Debug, Clone)]
pub struct S3Container {
    client: Client,
    bucket: String,
}

impl S3Container {
    pub fn new(settings: &S3Settings, bucket: &str) -> Self {
        debug!("opening s3 container {bucket}");
        Self {
            client: s3_client(settings),
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl ObjectContainer for S3Container {
    fn name(&self) -> &str {
        &self.bucket
    }

    async fn upload_file(&self, local_path: &Path, destination: &str) -> anyhow::Result<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .with_context(|| format!("reading {}", local_path.display()))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(destination)
            .body(body)
            .send()
            .await
            .with_context(|| format!("uploading s3://{}/{}", self.bucket, destination))?;
        Ok(())
    }
}

/// Appends are buffered in memory; flush writes the committed bytes as one object.
#[derive(Debug)]
pub struct S3LakeFileSystem {
    client: Client,
    bucket: String,
    staged: Mutex<HashMap<String, Vec<u8>>>,
}

impl S3LakeFileSystem {
    pub fn new(settings: &S3Settings, bucket: &str) -> Self {
        Self {
            client: s3_client(settings),
            bucket: bucket.to_string(),
            staged: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LakeFileSystem for S3LakeFileSystem {
    fn name(&self) -> &str {
        &self.bucket
    }

    async fn create_file(&self, path: &str) -> anyhow::Result<()> {
        resolve_object_path(Path::new(""), path)?;
        self.staged.lock().await.insert(path.to_string(), Vec::new());
        Ok(())
    }

    async fn append(&self, path: &str, data: &[u8], offset: u64) -> anyhow::Result<()> {
        let mut staged = self.staged.lock().await;
        let buffer = staged.get_mut(path).ok_or_else(|| StorageError::NotCreated {
            path: path.to_string(),
        })?;
        if buffer.len() as u64 != offset {
            return Err(StorageError::OffsetMismatch {
                path: path.to_string(),
                offset,
                staged: buffer.len() as u64,
            }
            .into());
        }
        buffer.extend_from_slice(data);
        Ok(())
    }

    async fn flush(&self, path: &str, length: u64) -> anyhow::Result<()> {
        let mut bytes = {
            let mut staged = self.staged.lock().await;
            let buffer = staged.remove(path).ok_or_else(|| StorageError::NotCreated {
                path: path.to_string(),
            })?;
            if (buffer.len() as u64) < length {
                let staged_len = buffer.len() as u64;
                staged.insert(path.to_string(), buffer);
                return Err(StorageError::FlushLength {
                    path: path.to_string(),
                    requested: length,
                    staged: staged_len,
                }
                .into());
            }
            buffer
        };
        bytes.truncate(length as usize);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .with_context(|| format!("committing s3://{}/{}", self.bucket, path))?;
        Ok(())
    }
}
