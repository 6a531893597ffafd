//! Startup directory scraper
//!
//! - Walks the paginated directory listing and collects detail-page URLs
//! - Extracts a configurable set of fields from each detail page via XPath
//! - Rewrites JSON and CSV result files after every record
//!
//! # Scraping a URL list
//!
//! ```rust,ignore
//! use directory_scraper::{ScrapeRequest, ScraperConfig, ScraperService};
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ScraperConfig::new()
//!         .with_headless(true)
//!         .with_csv_output("./data/startups.csv");
//!
//!     let mut service = ScraperService::new();
//!     let summary = service
//!         .call(ScrapeRequest::from_file(config, "./data/startup-urls.json"))
//!         .await
//!         .unwrap();
//!     println!("{} records, {} skipped", summary.records, summary.failures.len());
//! }
//! ```
//!
//! # Walking the listing only
//!
//! ```rust,ignore
//! use directory_scraper::{service::walk_listing, ScraperConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let walk = walk_listing(&ScraperConfig::new()).await.unwrap();
//!     println!("{} URLs over {} pages", walk.urls.len(), walk.pages_visited);
//! }
//! ```

pub mod browser;
pub mod config;
pub mod detail;
pub mod error;
pub mod extract;
pub mod listing;
pub mod record;
pub mod service;
pub mod sink;
pub mod traits;
pub mod wait;

#[cfg(test)]
mod testing;

pub use browser::{ChromePage, ChromeSession};
pub use config::{ListingConfig, OutputConfig, ScraperConfig, ViewportSize};
pub use detail::DetailScraper;
pub use error::ScraperError;
pub use extract::{clean_text, Cardinality, FieldExtractor, FieldMapping, FieldQuery};
pub use listing::{ListingPaginator, ListingWalk, PaginationCursor, WalkState};
pub use record::{ExtractedRecord, FieldValue};
pub use service::{RunSummary, ScrapeRequest, ScraperService, UrlSource};
pub use sink::{PersistResult, RecordSink};
pub use traits::{BrowserSession, PageQuery};
pub use wait::{ReadyCondition, WaitPolicy};
