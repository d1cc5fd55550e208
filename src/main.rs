mod config;
mod markdown;
mod oracle;
mod records;
mod report;
mod search;
mod store;
#[cfg(test)]
mod testing;

pub const USER_AGENT: &str = concat!("tradescout/", env!("CARGO_PKG_VERSION"));

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use reqwest::Client;
use tracing::{info, warn};

use config::Config;
use oracle::GeminiClient;
use search::{EngineError, LookupRequest, SearchAllRequest, TradeSearch};
use store::{FsBlobStore, ObjectCache};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Parser)]
#[command(
    name = "tradescout",
    version,
    about = "Ranked product and tariff lookup across per-country trade-data files"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    #[arg(long = "data-dir", value_name = "DIR", help = "Blob store root (overrides TRADESCOUT_DATA_DIR)")]
    data_dir: Option<PathBuf>,

    #[arg(long, help = "Bucket to read from (overrides TRADESCOUT_BUCKET)")]
    bucket: Option<String>,

    #[arg(long, help = "Emit JSON instead of Markdown")]
    json: bool,

    #[arg(long, help = "Append an export briefing generated by the oracle")]
    summary: bool,

    #[arg(long, help = "Skip oracle reranking and keep the lexical order")]
    fast: bool,

    #[arg(long = "top-k", default_value_t = DEFAULT_TOP_K, help = "Maximum number of matches")]
    top_k: usize,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Search a single object.
    Lookup {
        #[arg(value_name = "KEY")]
        key: String,

        #[arg(value_name = "QUERY")]
        query: String,

        #[arg(long, help = "Keep only records mentioning this country")]
        country: Option<String>,
    },

    /// Search every data file under the configured prefix.
    SearchAll {
        #[arg(value_name = "QUERY")]
        query: String,

        #[arg(
            long,
            value_delimiter = ',',
            value_name = "NAME,...",
            help = "Only search files for these countries (names or ISO codes)"
        )]
        countries: Option<Vec<String>>,

        #[arg(long, help = "Keep only records mentioning this country")]
        country: Option<String>,

        #[arg(long, value_name = "GLOB", help = "Only search files whose name matches")]
        pattern: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tradescout=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let GlobalArgs {
        data_dir,
        bucket,
        json,
        summary,
        fast,
        top_k,
    } = cli.global;

    let data_dir = data_dir.or(config.data_dir).ok_or_else(|| {
        EngineError::ServiceUnavailable(
            "no data directory configured; set TRADESCOUT_DATA_DIR or pass --data-dir".into(),
        )
    })?;
    if !data_dir.is_dir() {
        return Err(EngineError::ServiceUnavailable(format!(
            "data directory {} does not exist",
            data_dir.display()
        ))
        .into());
    }
    let bucket = bucket.unwrap_or(config.bucket);

    let http = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(HTTP_TIMEOUT)
        .build()?;
    let oracle = GeminiClient::from_env(http)
        .inspect_err(|e| warn!("oracle not available, reranking and summaries disabled: {e}"))
        .ok();

    let store = FsBlobStore::new(data_dir);
    info!(
        root = %store.root().display(),
        bucket = %bucket,
        model = oracle.as_ref().map(GeminiClient::model),
        "starting tradescout"
    );
    let engine = TradeSearch::new(
        ObjectCache::new(store, config.cache_ttl),
        oracle,
        config.prefix,
    );

    let output = match cli.command {
        Command::Lookup {
            key,
            query,
            country,
        } => {
            let req = LookupRequest {
                bucket,
                key,
                query,
                country,
                top_k,
                fast,
            };
            let result = engine.lookup(&req).await?;
            let briefing = if summary {
                Some(
                    engine
                        .summarize(&result.matches, &req.query, req.country.as_deref())
                        .await?,
                )
            } else {
                None
            };
            if json {
                report::render_json(&result, briefing.as_deref())?
            } else {
                report::format_lookup(&result, briefing.as_deref())
            }
        }
        Command::SearchAll {
            query,
            countries,
            country,
            pattern,
        } => {
            let req = SearchAllRequest {
                bucket,
                query,
                countries,
                country,
                pattern,
                top_k,
                fast,
            };
            let result = engine.search_all(&req).await?;
            let briefing = if summary {
                Some(
                    engine
                        .summarize(&result.matches, &req.query, req.country.as_deref())
                        .await?,
                )
            } else {
                None
            };
            if json {
                report::render_json(&result, briefing.as_deref())?
            } else {
                report::format_aggregate(&result, briefing.as_deref())
            }
        }
    };

    println!("{output}");
    Ok(())
}
