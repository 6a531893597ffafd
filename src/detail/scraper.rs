use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::Engine;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::extract::{FieldExtractor, FieldMapping};
use crate::record::ExtractedRecord;
use crate::sink::write_json;
use crate::traits::{BrowserSession, PageQuery};
use crate::wait::{wait_until_ready, WaitPolicy};

/// Scrapes one detail page per call, each in its own page context.
pub struct DetailScraper {
    extractor: FieldExtractor,
    wait: WaitPolicy,
    debug_dir: Option<PathBuf>,
    dumped: AtomicUsize,
}

impl DetailScraper {
    /// Scraper without debug output.
    pub fn new(fields: FieldMapping, wait: WaitPolicy) -> Self {
        Self {
            extractor: FieldExtractor::new(fields),
            wait,
            debug_dir: None,
            dumped: AtomicUsize::new(0),
        }
    }

    /// Fields, wait policy and debug directory taken from `config`.
    pub fn from_config(config: &ScraperConfig) -> Self {
        let scraper = Self::new(config.fields.clone(), config.detail_wait.clone());
        if config.debug {
            scraper.with_debug_dir(config.debug_dir.clone())
        } else {
            scraper
        }
    }

    /// Dump every record to `dir` and log screenshots of failed pages.
    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }

    pub fn mapping(&self) -> &FieldMapping {
        self.extractor.mapping()
    }

    /// Load `url`, wait for it to settle and extract every configured field.
    ///
    /// The page context is closed whatever the outcome.
    pub async fn scrape<S>(&self, session: &S, url: &str) -> Result<ExtractedRecord, ScraperError>
    where
        S: BrowserSession,
    {
        info!("Scraping {}", url);
        let page = session.open(url).await?;

        let result = self.scrape_page(&page, url).await;

        if let Err(e) = page.close().await {
            debug!("Failed to close page for {}: {}", url, e);
        }
        result
    }

    async fn scrape_page<P>(&self, page: &P, url: &str) -> Result<ExtractedRecord, ScraperError>
    where
        P: PageQuery,
    {
        wait_until_ready(page, &self.wait).await?;

        match self.extractor.extract(page, url).await {
            Ok(record) => {
                self.dump_record(&record);
                Ok(record)
            }
            Err(e) => {
                self.log_screenshot(page, url).await;
                Err(e)
            }
        }
    }

    fn dump_record(&self, record: &ExtractedRecord) {
        let Some(dir) = &self.debug_dir else {
            return;
        };
        let n = self.dumped.fetch_add(1, Ordering::SeqCst) + 1;
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("record_{}_{}.json", timestamp, n));
        match write_json(&path, record) {
            Ok(()) => debug!("Dumped record to {}", path.display()),
            Err(e) => warn!("Failed to dump record: {}", e),
        }
    }

    async fn log_screenshot<P>(&self, page: &P, url: &str)
    where
        P: PageQuery,
    {
        if self.debug_dir.is_none() {
            return;
        }
        match page.screenshot().await {
            Ok(png) if !png.is_empty() => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
                debug!("Screenshot of {}: data:image/png;base64,{}", url, encoded);
            }
            Ok(_) => {}
            Err(e) => debug!("Screenshot of {} failed: {}", url, e),
        }
    }
}
