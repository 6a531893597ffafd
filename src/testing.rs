//! In-memory browser used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::ScraperError;
use crate::traits::{BrowserSession, PageQuery};

#[derive(Debug, Clone, Default)]
pub struct FakeDocument {
    texts: HashMap<String, Vec<String>>,
    attributes: HashMap<(String, String), Vec<String>>,
    /// xpath -> (target url, replacement checks before the target shows up)
    clicks: HashMap<String, (String, usize)>,
    failing: HashSet<String>,
}

impl FakeDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_texts(mut self, xpath: &str, texts: &[&str]) -> Self {
        self.texts.insert(
            xpath.to_string(),
            texts.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn with_attributes(mut self, xpath: &str, attribute: &str, values: &[&str]) -> Self {
        self.attributes.insert(
            (xpath.to_string(), attribute.to_string()),
            values.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    /// Clicking `xpath` navigates the page to `target`.
    pub fn with_click(self, xpath: &str, target: &str) -> Self {
        self.with_delayed_click(xpath, target, 0)
    }

    /// Like [`FakeDocument::with_click`], but the current document stays
    /// displayed for `checks` calls to `document_replaced`.
    pub fn with_delayed_click(mut self, xpath: &str, target: &str, checks: usize) -> Self {
        self.clicks
            .insert(xpath.to_string(), (target.to_string(), checks));
        self
    }

    /// Any query for `xpath` fails as if the page had been torn down.
    pub fn with_failing(mut self, xpath: &str) -> Self {
        self.failing.insert(xpath.to_string());
        self
    }

    fn check(&self, xpath: &str) -> Result<(), ScraperError> {
        if self.failing.contains(xpath) {
            return Err(ScraperError::PageUnavailable(format!(
                "execution context destroyed while querying {}",
                xpath
            )));
        }
        Ok(())
    }

    fn count(&self, xpath: &str) -> usize {
        let texts = self.texts.get(xpath).map_or(0, Vec::len);
        let attributes = self
            .attributes
            .iter()
            .filter(|((x, _), _)| x == xpath)
            .map(|(_, values)| values.len())
            .max()
            .unwrap_or(0);
        let clickable = usize::from(self.clicks.contains_key(xpath));
        texts.max(attributes).max(clickable)
    }
}

#[derive(Debug, Default)]
pub struct Stats {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub visits: Mutex<Vec<String>>,
}

impl Stats {
    fn visit(&self, url: &str) {
        if let Ok(mut visits) = self.visits.lock() {
            visits.push(url.to_string());
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeSite {
    pages: HashMap<String, FakeDocument>,
    stats: Arc<Stats>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, doc: FakeDocument) -> Self {
        self.pages.insert(url.to_string(), doc);
        self
    }

    pub fn session(&self) -> FakeSession {
        FakeSession {
            pages: Arc::new(self.pages.clone()),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn opened(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    /// Every URL loaded so far, by navigation or click.
    pub fn visits(&self) -> Vec<String> {
        self.stats
            .visits
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

pub struct FakeSession {
    pages: Arc<HashMap<String, FakeDocument>>,
    stats: Arc<Stats>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    type Page = FakePage;

    async fn open(&self, url: &str) -> Result<FakePage, ScraperError> {
        if !self.pages.contains_key(url) {
            return Err(ScraperError::navigation(url, "net::ERR_NAME_NOT_RESOLVED"));
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        self.stats.visit(url);
        Ok(FakePage {
            pages: Arc::clone(&self.pages),
            stats: Arc::clone(&self.stats),
            current: Mutex::new(url.to_string()),
            pending: Mutex::new(None),
            marked: AtomicBool::new(false),
        })
    }

    async fn close(self) -> Result<(), ScraperError> {
        Ok(())
    }
}

pub struct FakePage {
    pages: Arc<HashMap<String, FakeDocument>>,
    stats: Arc<Stats>,
    current: Mutex<String>,
    /// Navigation started by a delayed click: (target, checks left).
    pending: Mutex<Option<(String, usize)>>,
    marked: AtomicBool,
}

impl FakePage {
    fn navigate(&self, target: String) -> Result<(), ScraperError> {
        if !self.pages.contains_key(&target) {
            return Err(ScraperError::navigation(&target, "net::ERR_CONNECTION_RESET"));
        }
        self.stats.visit(&target);
        if let Ok(mut current) = self.current.lock() {
            *current = target;
        }
        self.marked.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn document(&self) -> Result<&FakeDocument, ScraperError> {
        let current = self
            .current
            .lock()
            .map_err(|_| ScraperError::PageUnavailable("poisoned".into()))?
            .clone();
        self.pages
            .get(&current)
            .ok_or_else(|| ScraperError::PageUnavailable(format!("no document at {}", current)))
    }
}

#[async_trait]
impl PageQuery for FakePage {
    async fn node_texts(&self, xpath: &str) -> Result<Vec<String>, ScraperError> {
        let doc = self.document()?;
        doc.check(xpath)?;
        Ok(doc.texts.get(xpath).cloned().unwrap_or_default())
    }

    async fn attribute_values(
        &self,
        xpath: &str,
        attribute: &str,
    ) -> Result<Vec<String>, ScraperError> {
        let doc = self.document()?;
        doc.check(xpath)?;
        Ok(doc
            .attributes
            .get(&(xpath.to_string(), attribute.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn count(&self, xpath: &str) -> Result<usize, ScraperError> {
        let doc = self.document()?;
        doc.check(xpath)?;
        Ok(doc.count(xpath))
    }

    async fn click(&self, xpath: &str) -> Result<bool, ScraperError> {
        let doc = self.document()?;
        doc.check(xpath)?;
        let Some((target, checks)) = doc.clicks.get(xpath).cloned() else {
            return Ok(false);
        };
        if checks == 0 {
            self.navigate(target)?;
        } else if let Ok(mut pending) = self.pending.lock() {
            *pending = Some((target, checks));
        }
        Ok(true)
    }

    async fn mark_document(&self) -> Result<(), ScraperError> {
        self.marked.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn document_replaced(&self) -> Result<bool, ScraperError> {
        let arrived = {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| ScraperError::PageUnavailable("poisoned".into()))?;
            match pending.as_mut() {
                Some((_, checks)) if *checks > 1 => {
                    *checks -= 1;
                    None
                }
                Some(_) => pending.take().map(|(target, _)| target),
                None => None,
            }
        };
        if let Some(target) = arrived {
            self.navigate(target)?;
        }
        Ok(!self.marked.load(Ordering::SeqCst))
    }

    async fn document_length(&self) -> Result<usize, ScraperError> {
        let doc = self.document()?;
        Ok(doc.texts.values().map(Vec::len).sum())
    }

    async fn close(&self) -> Result<(), ScraperError> {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
