//! Detail page scraping
//!
//! Loads one directory entry and turns it into an [`ExtractedRecord`](crate::record::ExtractedRecord).

mod scraper;

pub use scraper::DetailScraper;
