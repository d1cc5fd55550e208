use std::collections::HashSet;

use globset::{Glob, GlobMatcher};
use serde::Serialize;
use tracing::debug;

use super::{BlobStore, StoreError};
use crate::search::country::country_code;

/// Extensions of files the record extractor understands.
const DATA_EXTENSIONS: &[&str] = &["json", "jsonl", "csv"];

/// Zero-based key segment holding the country code (`trade-data/<kind>/<CC>/file`).
const COUNTRY_SEGMENT: usize = 2;

/// A data file found under the search prefix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFile {
    pub bucket: String,
    pub key: String,
    pub country_code: Option<String>,
}

impl SourceFile {
    pub fn new(bucket: &str, key: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            country_code: key_country_code(key),
        }
    }
}

/// Optional narrowing applied during discovery.
#[derive(Debug, Default, Clone)]
pub struct DiscoverFilter {
    /// Country names or codes; files outside these countries are skipped.
    pub countries: Option<Vec<String>>,
    /// Glob matched against the file name (e.g. `Oct*.jsonl`).
    pub pattern: Option<String>,
}

/// Enumerate every data file under `prefix`, following listing pages.
pub async fn discover(
    store: &impl BlobStore,
    bucket: &str,
    prefix: &str,
    filter: &DiscoverFilter,
) -> Result<Vec<SourceFile>, StoreError> {
    let matcher = filter
        .pattern
        .as_deref()
        .map(|p| {
            Glob::new(p)
                .map_err(|e| StoreError::InvalidPattern(e.to_string()))
                .map(|g| g.compile_matcher())
        })
        .transpose()?;

    let allowed: Option<HashSet<String>> = filter
        .countries
        .as_ref()
        .filter(|c| !c.is_empty())
        .map(|names| names.iter().map(|n| country_code(n)).collect());

    let mut files = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0usize;
    let mut bytes = 0u64;
    loop {
        let page = store.list(bucket, prefix, token.as_deref()).await?;
        pages += 1;
        for object in &page.objects {
            if !is_data_file(&object.key) || !matches_pattern(matcher.as_ref(), &object.key) {
                continue;
            }
            let file = SourceFile::new(bucket, &object.key);
            let allowed_country = allowed.as_ref().is_none_or(|set| {
                file.country_code.as_ref().is_some_and(|code| set.contains(code))
            });
            if allowed_country {
                bytes += object.size;
                files.push(file);
            }
        }
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    debug!(bucket, prefix, pages, files = files.len(), bytes, "discovery complete");
    Ok(files)
}

fn is_data_file(key: &str) -> bool {
    if key.ends_with('/') {
        return false;
    }
    let filename = key.rsplit('/').next().unwrap_or(key);
    filename
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| {
            !stem.is_empty() && DATA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        })
}

fn matches_pattern(matcher: Option<&GlobMatcher>, key: &str) -> bool {
    matcher.is_none_or(|m| {
        let filename = key.rsplit('/').next().unwrap_or(key);
        m.is_match(filename)
    })
}

/// Country code from the key's directory layout, when the segment is a directory.
pub fn key_country_code(key: &str) -> Option<String> {
    let segments: Vec<&str> = key.split('/').collect();
    if segments.len() <= COUNTRY_SEGMENT + 1 {
        return None;
    }
    let code = segments[COUNTRY_SEGMENT];
    (!code.is_empty()).then(|| code.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with_object("b", "trade-data/normal/US/Oct15.2025.jsonl", "")
            .with_object("b", "trade-data/normal/FR/Oct15.2025.csv", "")
            .with_object("b", "trade-data/normal/CN/rates.JSON", "")
            .with_object("b", "trade-data/normal/CN/", "")
            .with_object("b", "trade-data/normal/CN/readme.txt", "")
            .with_object("b", "trade-data/index.json", "")
            .with_object("b", "other/US/x/y.json", "")
    }

    fn keys(files: &[SourceFile]) -> Vec<&str> {
        files.iter().map(|f| f.key.as_str()).collect()
    }

    #[tokio::test]
    async fn keeps_data_files_under_prefix() {
        let files = discover(&store(), "b", "trade-data/", &DiscoverFilter::default())
            .await
            .unwrap();
        assert_eq!(
            keys(&files),
            [
                "trade-data/index.json",
                "trade-data/normal/CN/rates.JSON",
                "trade-data/normal/FR/Oct15.2025.csv",
                "trade-data/normal/US/Oct15.2025.jsonl",
            ]
        );
        assert_eq!(files[0].country_code, None);
        assert_eq!(files[1].country_code.as_deref(), Some("CN"));
    }

    #[tokio::test]
    async fn follows_every_listing_page() {
        let store = store().with_page_size(2);
        let files = discover(&store, "b", "trade-data/", &DiscoverFilter::default())
            .await
            .unwrap();
        assert_eq!(files.len(), 4);
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn country_allow_list_maps_names_to_codes() {
        let filter = DiscoverFilter {
            countries: Some(vec!["United States".into(), "france".into()]),
            pattern: None,
        };
        let files = discover(&store(), "b", "trade-data/", &filter).await.unwrap();
        assert_eq!(
            keys(&files),
            [
                "trade-data/normal/FR/Oct15.2025.csv",
                "trade-data/normal/US/Oct15.2025.jsonl",
            ]
        );
    }

    #[tokio::test]
    async fn empty_allow_list_means_no_country_filter() {
        let filter = DiscoverFilter {
            countries: Some(vec![]),
            pattern: None,
        };
        let files = discover(&store(), "b", "trade-data/", &filter).await.unwrap();
        assert_eq!(files.len(), 4);
    }

    #[tokio::test]
    async fn glob_pattern_filters_file_names() {
        let filter = DiscoverFilter {
            countries: None,
            pattern: Some("Oct*".into()),
        };
        let files = discover(&store(), "b", "trade-data/", &filter).await.unwrap();
        assert_eq!(files.len(), 2);

        let bad = DiscoverFilter {
            countries: None,
            pattern: Some("[".into()),
        };
        let err = discover(&store(), "b", "trade-data/", &bad).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidPattern(_)));
    }

    #[test]
    fn country_code_from_third_segment() {
        assert_eq!(key_country_code("trade-data/normal/us/x.json").as_deref(), Some("US"));
        assert_eq!(key_country_code("trade-data/normal/x.json"), None);
        assert_eq!(key_country_code("a/b//x.json"), None);
    }

    #[test]
    fn data_file_detection() {
        assert!(is_data_file("a/b.jsonl"));
        assert!(is_data_file("a/b.CSV"));
        assert!(!is_data_file("a/b/"));
        assert!(!is_data_file("a/.json"));
        assert!(!is_data_file("a/b.parquet"));
    }
}
