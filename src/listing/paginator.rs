use std::path::PathBuf;

use tracing::{debug, info, warn};
use url::Url;

use crate::config::ListingConfig;
use crate::error::ScraperError;
use crate::sink::write_url_list;
use crate::traits::{BrowserSession, PageQuery};
use crate::wait::{wait_for_replacement, wait_until_ready};

use super::types::{ListingWalk, PaginationCursor, WalkState};

/// Resolve a link attribute against the listing URL.
///
/// Returns `None` for empty values and non-HTTP targets (`javascript:`, `mailto:` ...).
pub fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let resolved = base.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved.into()),
        _ => None,
    }
}

/// Drives the listing state machine over one page context.
pub struct ListingPaginator {
    config: ListingConfig,
    urls_path: Option<PathBuf>,
}

impl ListingPaginator {
    /// Paginator without URL-list persistence.
    pub fn new(config: ListingConfig) -> Self {
        Self {
            config,
            urls_path: None,
        }
    }

    /// Rewrite the collected URLs to `path` after every listing page.
    pub fn with_urls_path(mut self, path: Option<PathBuf>) -> Self {
        self.urls_path = path;
        self
    }

    /// Walk the listing until no pagination control is left.
    ///
    /// Failing to load the listing root is an error. A failure further on
    /// ends the walk early and is reported in [`ListingWalk::interrupted`].
    pub async fn walk<S>(&self, session: &S) -> Result<ListingWalk, ScraperError>
    where
        S: BrowserSession,
    {
        let base = Url::parse(&self.config.url).map_err(|e| {
            ScraperError::Config(format!("invalid listing url {}: {}", self.config.url, e))
        })?;

        let mut slot: Option<S::Page> = None;
        let result = self.drive(session, &base, &mut slot).await;

        if let Some(page) = slot {
            if let Err(e) = page.close().await {
                debug!("Failed to close listing page: {}", e);
            }
        }

        if let Ok(walk) = &result {
            info!(
                "Listing walk finished: {} pages, {} URLs{}",
                walk.pages_visited,
                walk.urls.len(),
                if walk.is_complete() { "" } else { " (interrupted)" }
            );
        }
        result
    }

    async fn drive<S>(
        &self,
        session: &S,
        base: &Url,
        slot: &mut Option<S::Page>,
    ) -> Result<ListingWalk, ScraperError>
    where
        S: BrowserSession,
    {
        let mut walk = ListingWalk {
            urls: Vec::new(),
            pages_visited: 0,
            interrupted: None,
        };
        let mut page_index = 1;
        let mut state = WalkState::Loading;

        loop {
            debug!("Listing state: {:?} (page {})", state, page_index);
            state = match state {
                WalkState::Loading => {
                    info!("Loading listing {}", self.config.url);
                    let page = slot.insert(session.open(&self.config.url).await?);
                    wait_until_ready(&*page, &self.config.wait).await?;
                    WalkState::Extracting
                }
                WalkState::Extracting => {
                    let page = loaded(slot)?;
                    match self.extract_page(page, base, page_index, &mut walk).await {
                        Ok(cursor) if self.reached_max_pages(&walk) => {
                            info!("Stopping at page {} (max_pages)", cursor.page_index);
                            WalkState::Done
                        }
                        Ok(cursor) => cursor.next_state(),
                        Err(e) if e.is_recoverable() => {
                            warn!("Listing page {} failed: {}", page_index, e);
                            walk.interrupted = Some(e);
                            WalkState::Done
                        }
                        Err(e) => return Err(e),
                    }
                }
                WalkState::AdvancingNext | WalkState::AdvancingJump => {
                    let xpath = if state == WalkState::AdvancingNext {
                        &self.config.next_xpath
                    } else {
                        &self.config.jump_xpath
                    };
                    let page = loaded(slot)?;
                    match self.advance(page, xpath).await {
                        Ok(true) => {
                            page_index += 1;
                            WalkState::Extracting
                        }
                        Ok(false) => {
                            warn!("Pagination control {} vanished before click", xpath);
                            WalkState::Done
                        }
                        Err(e) if e.is_recoverable() => {
                            warn!("Advancing from page {} failed: {}", page_index, e);
                            walk.interrupted = Some(e);
                            WalkState::Done
                        }
                        Err(e) => return Err(e),
                    }
                }
                WalkState::Done => break,
            };
        }

        Ok(walk)
    }

    fn reached_max_pages(&self, walk: &ListingWalk) -> bool {
        self.config
            .max_pages
            .is_some_and(|max| walk.pages_visited >= max)
    }

    /// Collect the links of the current page and read its pagination controls.
    async fn extract_page<P>(
        &self,
        page: &P,
        base: &Url,
        page_index: usize,
        walk: &mut ListingWalk,
    ) -> Result<PaginationCursor, ScraperError>
    where
        P: PageQuery,
    {
        let hrefs = page
            .attribute_values(&self.config.link_xpath, &self.config.link_attribute)
            .await?;
        let before = walk.urls.len();
        walk.urls
            .extend(hrefs.iter().filter_map(|href| resolve_link(base, href)));
        walk.pages_visited += 1;
        info!(
            "Listing page {}: {} links ({} total)",
            page_index,
            walk.urls.len() - before,
            walk.urls.len()
        );

        if let Some(path) = &self.urls_path {
            write_url_list(path, &walk.urls)?;
        }

        let has_next = page.count(&self.config.next_xpath).await? > 0;
        let has_jump = page.count(&self.config.jump_xpath).await? > 0;
        Ok(PaginationCursor {
            page_index,
            has_next,
            has_jump,
        })
    }

    /// Click a pagination control and wait for the next page to replace the
    /// current one. Returns false when the control is gone.
    async fn advance<P>(&self, page: &P, xpath: &str) -> Result<bool, ScraperError>
    where
        P: PageQuery,
    {
        page.mark_document().await?;
        if !page.click(xpath).await? {
            return Ok(false);
        }
        // The ready condition would match the old page until it unloads.
        if !wait_for_replacement(page, &self.config.wait).await? {
            return Err(ScraperError::PageUnavailable(format!(
                "page did not change after clicking {}",
                xpath
            )));
        }
        wait_until_ready(page, &self.config.wait).await?;
        Ok(true)
    }
}

fn loaded<P>(slot: &Option<P>) -> Result<&P, ScraperError> {
    slot.as_ref()
        .ok_or_else(|| ScraperError::PageUnavailable("listing page not loaded".into()))
}
