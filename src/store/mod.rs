//! Blob storage: the store abstraction, a directory-backed implementation,
//! the TTL object cache, and data-file discovery.

pub mod cache;
pub mod discover;
pub mod fs;

use std::collections::HashMap;

pub use cache::ObjectCache;
pub use discover::{DiscoverFilter, SourceFile, discover};
pub use fs::FsBlobStore;

/// Errors returned by blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("invalid key pattern: {0}")]
    InvalidPattern(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

/// A fetched object: decoded text content plus store-provided metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlobObject {
    pub content: String,
    pub metadata: HashMap<String, String>,
}

impl BlobObject {
    /// Placeholder returned when an object is absent even after fallback.
    /// The content parses as an empty JSON array, i.e. zero records.
    pub fn empty() -> Self {
        Self {
            content: "[]".to_string(),
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// One page of a listing. `next_token` is `None` on the last page.
#[derive(Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub next_token: Option<String>,
}

/// Abstraction over an object store holding trade-data files.
/// Implemented by `FsBlobStore` for production; mock implementations used in tests.
pub trait BlobStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<BlobObject, StoreError>;

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError>;
}

impl<T: BlobStore> BlobStore for &T {
    async fn get(&self, bucket: &str, key: &str) -> Result<BlobObject, StoreError> {
        (**self).get(bucket, key).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        (**self).list(bucket, prefix, continuation).await
    }
}
