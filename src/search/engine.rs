use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::country::filter_by_country;
use super::query::Query;
use super::scorer::{Candidate, score, sort_by_score};
use crate::oracle::rerank::rerank;
use crate::oracle::{OracleError, TextOracle, summary};
use crate::records::{Record, extract};
use crate::store::{BlobStore, DiscoverFilter, ObjectCache, SourceFile, StoreError, discover};

/// Per-file pipelines allowed in flight during `search_all`.
pub const MAX_CONCURRENT_FILES: usize = 10;
/// Upper bound on lexical candidates handed to the reranker.
const MAX_CANDIDATE_POOL: usize = 100;
/// Lexical over-fetch factor when an oracle will rerank.
const POOL_FACTOR: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Oracle(#[from] OracleError),
}

#[derive(Debug, Clone)]
pub struct LookupRequest {
    pub bucket: String,
    pub key: String,
    pub query: String,
    pub country: Option<String>,
    pub top_k: usize,
    pub fast: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SearchAllRequest {
    pub bucket: String,
    pub query: String,
    /// Country allow-list applied to discovered file keys.
    pub countries: Option<Vec<String>>,
    /// Country filter applied to record contents.
    pub country: Option<String>,
    pub pattern: Option<String>,
    pub top_k: usize,
    pub fast: bool,
}

#[derive(Debug, Serialize)]
pub struct LookupReport {
    pub query: String,
    pub source: SourceFile,
    pub format: &'static str,
    pub records_scanned: usize,
    pub reranked: bool,
    pub matches: Vec<Candidate>,
}

#[derive(Debug, Serialize)]
pub struct FailedSource {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct AggregateReport {
    pub query: String,
    pub sources_searched: usize,
    pub sources_by_country: BTreeMap<String, usize>,
    pub failed_sources: Vec<FailedSource>,
    pub reranked: bool,
    pub matches: Vec<Candidate>,
}

/// Lexical output for one or more sources.
///
/// `lexical` is what a fast search returns: each source scored down to
/// `top_k` before the country filter. `pool` is the wider set handed to the
/// reranker; it equals `lexical` when no rerank is possible.
#[derive(Debug, Default)]
struct Ranking {
    pool: Vec<Candidate>,
    lexical: Vec<Candidate>,
}

impl Ranking {
    fn merge(&mut self, other: Ranking) {
        self.pool.extend(other.pool);
        self.lexical.extend(other.lexical);
    }

    fn cut(&mut self, pool: usize, top_k: usize) {
        sort_by_score(&mut self.pool);
        self.pool.truncate(pool);
        sort_by_score(&mut self.lexical);
        self.lexical.truncate(top_k);
    }
}

/// Lookup and search over a cached blob store, with optional oracle reranking.
pub struct TradeSearch<S, O> {
    cache: ObjectCache<S>,
    oracle: Option<O>,
    prefix: String,
}

impl<S: BlobStore, O: TextOracle> TradeSearch<S, O> {
    pub fn new(cache: ObjectCache<S>, oracle: Option<O>, prefix: impl Into<String>) -> Self {
        Self {
            cache,
            oracle,
            prefix: prefix.into(),
        }
    }

    /// Rank the records of a single object against a query.
    ///
    /// A missing object (after the `US` fallback) yields no matches; any other
    /// store fault is returned.
    pub async fn lookup(&self, req: &LookupRequest) -> Result<LookupReport, EngineError> {
        let query = Query::parse(&req.query);
        let source = SourceFile::new(&req.bucket, &req.key);
        let mut report = LookupReport {
            query: query.raw.clone(),
            source,
            format: "empty",
            records_scanned: 0,
            reranked: false,
            matches: Vec::new(),
        };
        if query.is_empty() {
            debug!(key = %req.key, "empty query, skipping fetch");
            return Ok(report);
        }

        let object = self.cache.get(&req.bucket, &req.key).await?;
        debug!(
            key = %req.key,
            content_type = object.metadata.get("content-type").map(String::as_str),
            "object loaded"
        );
        let extracted = extract(&object.content);
        report.format = extracted.format();
        let records = extracted.into_records();
        report.records_scanned = records.len();

        let pool = self.pool_size(req.top_k, req.fast);
        let ranking = rank_records(
            records,
            &query,
            req.top_k,
            pool,
            req.country.as_deref(),
            &report.source,
        );
        info!(
            key = %req.key,
            format = report.format,
            records = report.records_scanned,
            candidates = ranking.pool.len(),
            "lookup scored"
        );

        let (matches, reranked) = self.finalize(ranking, &query, req.top_k, req.fast).await;
        report.matches = matches;
        report.reranked = reranked;
        Ok(report)
    }

    /// Discover every data file under the configured prefix and search them all.
    ///
    /// Per-file failures are logged and listed in `failed_sources`; they never
    /// abort the aggregate.
    pub async fn search_all(&self, req: &SearchAllRequest) -> Result<AggregateReport, EngineError> {
        let query = Query::parse(&req.query);
        if query.is_empty() {
            return Ok(AggregateReport {
                query: query.raw,
                ..Default::default()
            });
        }

        let filter = DiscoverFilter {
            countries: req.countries.clone(),
            pattern: req.pattern.clone(),
        };
        let files = discover(self.cache.store(), &req.bucket, &self.prefix, &filter).await?;
        info!(bucket = %req.bucket, prefix = %self.prefix, files = files.len(), "searching discovered sources");

        let pool = self.pool_size(req.top_k, req.fast);
        let (mut merged, failed_sources) = self
            .fan_out(&query, &files, req.top_k, pool, req.country.as_deref())
            .await;
        merged.cut(pool, req.top_k);

        let (matches, reranked) = self.finalize(merged, &query, req.top_k, req.fast).await;

        let mut sources_by_country = BTreeMap::new();
        for code in files.iter().filter_map(|f| f.country_code.clone()) {
            *sources_by_country.entry(code).or_insert(0) += 1;
        }

        Ok(AggregateReport {
            query: query.raw,
            sources_searched: files.len(),
            sources_by_country,
            failed_sources,
            reranked,
            matches,
        })
    }

    /// Export briefing over `matches`. Requires a configured oracle.
    pub async fn summarize(
        &self,
        matches: &[Candidate],
        product: &str,
        destination: Option<&str>,
    ) -> Result<String, EngineError> {
        let oracle = self.oracle.as_ref().ok_or_else(|| {
            EngineError::ServiceUnavailable("summaries need an oracle; set GEMINI_API_KEY".into())
        })?;
        Ok(summary::summarize(oracle, matches, product, destination).await?)
    }

    /// Run every file's pipeline with bounded concurrency.
    ///
    /// Results are put back in discovery order before merging so that equal
    /// scores always break the same way.
    async fn fan_out(
        &self,
        query: &Query,
        files: &[SourceFile],
        top_k: usize,
        pool: usize,
        country: Option<&str>,
    ) -> (Ranking, Vec<FailedSource>) {
        let mut outcomes: Vec<_> = stream::iter(files.iter().enumerate())
            .map(|(i, file)| async move {
                (i, self.search_file(file, query, top_k, pool, country).await)
            })
            .buffer_unordered(MAX_CONCURRENT_FILES)
            .collect()
            .await;
        outcomes.sort_by_key(|(i, _)| *i);

        let mut merged = Ranking::default();
        let mut failed = Vec::new();
        for (i, outcome) in outcomes {
            let file = &files[i];
            match outcome {
                Ok(ranking) => merged.merge(ranking),
                Err(e) => {
                    warn!(key = %file.key, error = %e, "source failed, continuing without it");
                    failed.push(FailedSource {
                        key: file.key.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        (merged, failed)
    }

    async fn search_file(
        &self,
        file: &SourceFile,
        query: &Query,
        top_k: usize,
        pool: usize,
        country: Option<&str>,
    ) -> Result<Ranking, StoreError> {
        let object = self.cache.get(&file.bucket, &file.key).await?;
        let extracted = extract(&object.content);
        debug!(key = %file.key, format = extracted.format(), "extracted records");
        Ok(rank_records(extracted.into_records(), query, top_k, pool, country, file))
    }

    /// Rerank the pool through the oracle when allowed, otherwise return the
    /// lexical ranking unchanged.
    async fn finalize(
        &self,
        ranking: Ranking,
        query: &Query,
        top_k: usize,
        fast: bool,
    ) -> (Vec<Candidate>, bool) {
        if let Some(oracle) = self.oracle.as_ref().filter(|_| !fast)
            && !ranking.pool.is_empty()
        {
            match rerank(oracle, &ranking.pool, &query.raw, top_k).await {
                Ok(ranked) if !ranked.is_empty() => return (ranked, true),
                Ok(_) => warn!("oracle ranking mapped to no candidates, using lexical order"),
                Err(e) => warn!(error = %e, "rerank failed, using lexical order"),
            }
        }
        let mut lexical = ranking.lexical;
        lexical.truncate(top_k);
        (lexical, false)
    }

    fn pool_size(&self, top_k: usize, fast: bool) -> usize {
        if fast || self.oracle.is_none() {
            return top_k;
        }
        (top_k * POOL_FACTOR).min(MAX_CANDIDATE_POOL).max(top_k)
    }
}

/// Score one source once at the wider cut; the `top_k` prefix of that
/// ordering is exactly what scoring at `top_k` would produce.
fn rank_records(
    records: Vec<Record>,
    query: &Query,
    top_k: usize,
    pool: usize,
    country: Option<&str>,
    source: &SourceFile,
) -> Ranking {
    let scored = score(records, query, pool.max(top_k));
    let keep = |candidates: Vec<Candidate>| -> Vec<Candidate> {
        let filtered = match country {
            Some(country) => filter_by_country(candidates, country),
            None => candidates,
        };
        filtered
            .into_iter()
            .map(|c| c.with_source(&source.bucket, &source.key, source.country_code.as_deref()))
            .collect()
    };

    let lexical = keep(scored.iter().take(top_k).cloned().collect());
    let pool = if pool > top_k { keep(scored) } else { lexical.clone() };
    Ranking { pool, lexical }
}
