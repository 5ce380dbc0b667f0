use async_trait::async_trait;
use chrono::{DateTime, Utc};
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::services::encryption::{EncryptionError, EncryptionService};

/// One image currently held in the transient store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub handle: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

/// Result of listing the store. Entries whose metadata could not be read are
/// left out and counted in `unreadable`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageListing {
    pub images: Vec<StoredImage>,
    pub unreadable: u64,
}

/// Transient holding area for captured images awaiting analysis.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn read(&self, handle: &str) -> Result<Vec<u8>, StorageError>;

    /// Delete-if-exists. Deleting a missing image succeeds.
    async fn delete(&self, handle: &str) -> Result<(), StorageError>;

    async fn list(&self) -> Result<ImageListing, StorageError>;
}

/// Images stored as plain files in a single directory.
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, handle: &str) -> Result<PathBuf, StorageError> {
        let is_plain_name = !handle.is_empty()
            && handle != "."
            && handle != ".."
            && !handle.contains(['/', '\\']);
        if !is_plain_name {
            return Err(StorageError::InvalidHandle(handle.to_string()));
        }
        Ok(self.root.join(handle))
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn read(&self, handle: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(handle)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(handle.to_string()),
            _ => StorageError::Io(e),
        })
    }

    async fn delete(&self, handle: &str) -> Result<(), StorageError> {
        let path = self.path_for(handle)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list(&self) -> Result<ImageListing, StorageError> {
        let mut listing = ImageListing::default();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(listing),
            Err(e) => return Err(StorageError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let Some(handle) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(path = ?entry.path(), "Skipping image with non UTF-8 name");
                listing.unreadable += 1;
                continue;
            };
            // in-progress writes from the capture side
            if handle.starts_with('.') {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    // Removed between read_dir and stat.
                    tracing::debug!(handle = %handle, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let modified = match metadata.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!(handle = %handle, error = %e, "Skipping image without a modification time");
                    listing.unreadable += 1;
                    continue;
                }
            };

            listing.images.push(StoredImage {
                handle,
                size_bytes: metadata.len(),
                last_modified: DateTime::<Utc>::from(modified),
            });
        }

        Ok(listing)
    }
}

/// Images stored in Cloudflare R2 (S3-compatible), optionally encrypted at rest.
pub struct R2ImageStore {
    bucket: Box<Bucket>,
    prefix: String,
    encryption: Option<EncryptionService>,
}

impl R2ImageStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        prefix: &str,
        encryption: Option<EncryptionService>,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            prefix: prefix.to_string(),
            encryption,
        })
    }
}

#[async_trait]
impl ImageStore for R2ImageStore {
    async fn read(&self, handle: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(handle).await?;
        match response.status_code() {
            200 => {}
            404 => return Err(StorageError::NotFound(handle.to_string())),
            status => {
                return Err(StorageError::UnexpectedStatus {
                    status,
                    key: handle.to_string(),
                })
            }
        }

        let data = response.to_vec();
        match &self.encryption {
            Some(encryption) => Ok(encryption.decrypt(&data)?),
            None => Ok(data),
        }
    }

    async fn delete(&self, handle: &str) -> Result<(), StorageError> {
        let response = self.bucket.delete_object(handle).await?;
        match response.status_code() {
            200 | 204 | 404 => Ok(()),
            status => Err(StorageError::UnexpectedStatus {
                status,
                key: handle.to_string(),
            }),
        }
    }

    async fn list(&self) -> Result<ImageListing, StorageError> {
        let pages = self.bucket.list(self.prefix.clone(), None).await?;
        let objects = pages
            .into_iter()
            .flat_map(|page| page.contents)
            .map(|object| (object.key, object.last_modified, object.size));
        Ok(listing_from_objects(objects))
    }
}

/// Build a listing from `(key, last_modified, size)` triples as returned by
/// S3 `ListObjectsV2`.
fn listing_from_objects(objects: impl IntoIterator<Item = (String, String, u64)>) -> ImageListing {
    let mut listing = ImageListing::default();
    for (key, last_modified, size) in objects {
        match parse_object_timestamp(&key, &last_modified) {
            Ok(last_modified) => listing.images.push(StoredImage {
                handle: key,
                size_bytes: size,
                last_modified,
            }),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Skipping object with unreadable timestamp");
                listing.unreadable += 1;
            }
        }
    }
    listing
}

fn parse_object_timestamp(key: &str, raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Timestamp(format!("{}: {}", key, e)))
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("Invalid image handle: {0:?}")]
    InvalidHandle(String),

    #[error("Image I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Unexpected HTTP {status} for object {key}")]
    UnexpectedStatus { status: u16, key: String },

    #[error("Invalid object timestamp: {0}")]
    Timestamp(String),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
