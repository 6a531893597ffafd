use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tower::Service;
use tracing::{error, info, warn};

use crate::browser::ChromeSession;
use crate::config::ScraperConfig;
use crate::detail::DetailScraper;
use crate::error::ScraperError;
use crate::listing::{ListingPaginator, ListingWalk};
use crate::record::ExtractedRecord;
use crate::sink::RecordSink;
use crate::traits::BrowserSession;

/// Where the detail-page URLs of a run come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlSource {
    /// JSON file holding an array of URLs.
    File(PathBuf),
    List(Vec<String>),
    /// Live walk of the configured listing.
    Listing,
}

/// Read a JSON array of URLs.
pub fn read_url_file(path: &Path) -> Result<Vec<String>, ScraperError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ScraperError::InvalidInput(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        ScraperError::InvalidInput(format!(
            "{} must contain a JSON array of URLs: {}",
            path.display(),
            e
        ))
    })
}

/// Scrape request
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub config: ScraperConfig,
    pub source: UrlSource,
}

impl ScrapeRequest {
    pub fn new(config: ScraperConfig, source: UrlSource) -> Self {
        Self { config, source }
    }

    /// Scrape the URLs listed in a JSON file.
    pub fn from_file(config: ScraperConfig, path: impl Into<PathBuf>) -> Self {
        Self::new(config, UrlSource::File(path.into()))
    }

    /// Walk the listing first, then scrape what it found.
    pub fn from_listing(config: ScraperConfig) -> Self {
        Self::new(config, UrlSource::Listing)
    }
}

/// A detail page that produced no record.
#[derive(Debug)]
pub struct RecordFailure {
    pub url: String,
    pub error: ScraperError,
}

/// Scrape result
#[derive(Debug)]
pub struct RunSummary {
    pub records: usize,
    pub failures: Vec<RecordFailure>,
    /// Set when the URL list came from a listing walk that stopped early.
    pub walk_interrupted: Option<ScraperError>,
    pub json_path: PathBuf,
    pub csv_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

async fn scrape_with_retry<S>(
    scraper: &DetailScraper,
    session: &S,
    url: &str,
    max_attempts: u32,
    backoff: Duration,
) -> Result<ExtractedRecord, ScraperError>
where
    S: BrowserSession,
{
    let mut attempt = 1;
    loop {
        match scraper.scrape(session, url).await {
            Ok(record) => return Ok(record),
            Err(e) if e.is_recoverable() && attempt < max_attempts => {
                let delay = backoff.saturating_mul(2u32.saturating_pow(attempt - 1));
                warn!(
                    "Attempt {}/{} for {} failed: {}; retrying in {:?}",
                    attempt, max_attempts, url, e, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Scrape `urls` in order, flushing after every record.
///
/// Pages that fail are logged and skipped; sink failures abort the run.
pub async fn run_scrape<S>(
    session: &S,
    config: &ScraperConfig,
    urls: &[String],
) -> Result<RunSummary, ScraperError>
where
    S: BrowserSession,
{
    let started_at = Utc::now();
    let scraper = DetailScraper::from_config(config);
    let mut sink = RecordSink::new(&config.output.json_path, &config.output.csv_path)
        .with_address_field(config.address_field.clone());
    let mut failures = Vec::new();

    for (i, url) in urls.iter().enumerate() {
        info!("Dealing with page {}/{}: {}", i + 1, urls.len(), url);
        match scrape_with_retry(
            &scraper,
            session,
            url,
            config.max_attempts,
            config.retry_backoff,
        )
        .await
        {
            Ok(record) => {
                sink.push(record)?;
            }
            Err(e) if e.is_recoverable() => {
                warn!("Skipping {}: {}", url, e);
                failures.push(RecordFailure {
                    url: url.clone(),
                    error: e,
                });
            }
            Err(e) => return Err(e),
        }
    }

    // Write the files even when nothing was scraped.
    let persisted = sink.flush()?;
    info!(
        "Run finished: {} records, {} skipped -> {}, {}",
        persisted.records,
        failures.len(),
        persisted.json_path.display(),
        persisted.csv_path.display()
    );

    Ok(RunSummary {
        records: persisted.records,
        failures,
        walk_interrupted: None,
        json_path: persisted.json_path,
        csv_path: persisted.csv_path,
        started_at,
        finished_at: Utc::now(),
    })
}

/// Walk the configured listing and persist the URL collection.
pub async fn collect_urls<S>(session: &S, config: &ScraperConfig) -> Result<ListingWalk, ScraperError>
where
    S: BrowserSession,
{
    ListingPaginator::new(config.listing.clone())
        .with_urls_path(config.output.urls_path.clone())
        .walk(session)
        .await
}

/// Launch Chrome, walk the listing, close Chrome.
pub async fn walk_listing(config: &ScraperConfig) -> Result<ListingWalk, ScraperError> {
    config.validate()?;
    let session = ChromeSession::launch(config).await?;
    let result = collect_urls(&session, config).await;

    if let Err(e) = session.close().await {
        error!("Failed to close browser: {}", e);
    }
    result
}

/// Resolve the URL source and scrape every URL with one session.
pub async fn run<S>(
    session: &S,
    config: &ScraperConfig,
    source: UrlSource,
) -> Result<RunSummary, ScraperError>
where
    S: BrowserSession,
{
    let (urls, interrupted) = match source {
        UrlSource::File(path) => (read_url_file(&path)?, None),
        UrlSource::List(urls) => (urls, None),
        UrlSource::Listing => {
            let walk = collect_urls(session, config).await?;
            (walk.urls, walk.interrupted)
        }
    };

    let mut summary = run_scrape(session, config, &urls).await?;
    summary.walk_interrupted = interrupted;
    Ok(summary)
}

/// tower::Service running a whole scrape against a fresh Chrome instance.
#[derive(Debug, Clone, Default)]
pub struct ScraperService {}

impl ScraperService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Service<ScrapeRequest> for ScraperService {
    type Response = RunSummary;
    type Error = ScraperError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ScrapeRequest) -> Self::Future {
        info!("Scrape request received: {:?}", req.source);

        Box::pin(async move {
            let ScrapeRequest { config, source } = req;
            config.validate()?;

            // Bad input files fail before a browser is launched.
            let source = match source {
                UrlSource::File(path) => UrlSource::List(read_url_file(&path)?),
                other => other,
            };

            let session = ChromeSession::launch(&config).await?;
            let result = run(&session, &config, source).await;

            if let Err(e) = session.close().await {
                error!("Failed to close browser: {}", e);
            }
            result
        })
    }
}
