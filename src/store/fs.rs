use std::collections::HashMap;
use std::path::{Path, PathBuf};

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use tracing::debug;

use super::{BlobObject, BlobStore, ListPage, ObjectSummary, StoreError};

/// Listing page size, matching the S3 `ListObjectsV2` default.
const MAX_KEYS_PER_PAGE: usize = 1000;

/// Blob store backed by a local directory.
///
/// Layout: `<root>/<bucket>/<key>`, where `key` is a `/`-separated relative path.
/// Keys are validated before touching the filesystem so that `..` segments or
/// absolute paths cannot escape the bucket directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    page_size: usize,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: MAX_KEYS_PER_PAGE,
        }
    }

    #[cfg(test)]
    fn with_page_size(root: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            root: root.into(),
            page_size: page_size.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        if bucket.is_empty() || bucket.contains(['/', '\\', '\0']) || bucket == "." || bucket == ".."
        {
            return Err(StoreError::InvalidKey(bucket.to_string()));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.bucket_dir(bucket)?.join(key))
    }
}

/// Validate an object key.
///
/// Rejects empty, absolute paths, control characters, and `..` path traversal.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains(['\0', '\n', '\r', '\\'])
        || key.split('/').any(|s| s == "..")
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

impl BlobStore for FsBlobStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<BlobObject, StoreError> {
        let path = self.object_path(bucket, key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::not_found(bucket, key));
            }
            Err(e) => return Err(e.into()),
        };

        let (content, encoding) = decode_text(&bytes);
        debug!(bucket, key, bytes = bytes.len(), encoding = encoding.name(), "object read");

        let mut metadata = HashMap::new();
        metadata.insert("content-length".to_string(), bytes.len().to_string());
        metadata.insert("content-type".to_string(), content_type(key).to_string());
        metadata.insert("content-encoding".to_string(), encoding.name().to_string());

        Ok(BlobObject { content, metadata })
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let bucket_dir = self.bucket_dir(bucket)?;
        if !tokio::fs::try_exists(&bucket_dir).await? {
            debug!(bucket, "bucket directory missing, listing is empty");
            return Ok(ListPage::default());
        }

        let mut all = walk(&bucket_dir).await?;
        all.retain(|o| o.key.starts_with(prefix));
        all.sort_by(|a, b| a.key.cmp(&b.key));

        let start = continuation
            .map(|token| all.partition_point(|o| o.key.as_str() <= token))
            .unwrap_or(0);
        let end = (start + self.page_size).min(all.len());
        let next_token = (end < all.len()).then(|| all[end - 1].key.clone());
        let objects = all.drain(start..end).collect();

        Ok(ListPage {
            objects,
            next_token,
        })
    }
}

async fn walk(bucket_dir: &Path) -> Result<Vec<ObjectSummary>, StoreError> {
    let mut objects = Vec::new();
    let mut pending = vec![bucket_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let Some(key) = relative_key(bucket_dir, &path) else {
                debug!(path = %path.display(), "skipping non-UTF-8 file name");
                continue;
            };
            let meta = entry.metadata().await?;
            objects.push(ObjectSummary {
                key,
                size: meta.len(),
            });
        }
    }

    Ok(objects)
}

fn relative_key(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

/// Decode raw bytes to text: BOM sniffing first, then strict UTF-8, then windows-1252.
fn decode_text(bytes: &[u8]) -> (String, &'static Encoding) {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return (text.into_owned(), encoding);
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), UTF_8),
        Err(_) => {
            let (text, _, _) = WINDOWS_1252.decode(bytes);
            (text.into_owned(), WINDOWS_1252)
        }
    }
}

fn content_type(key: &str) -> &'static str {
    let ext = key.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("json") => "application/json",
        Some("jsonl") | Some("ndjson") => "application/x-ndjson",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}
