use async_trait::async_trait;

use crate::error::ScraperError;

/// Read and click access to one loaded page.
///
/// XPath expressions are evaluated with ordered-snapshot semantics, so every
/// returned list is in document order.
#[async_trait]
pub trait PageQuery: Send + Sync {
    /// Text of every node matched by `xpath`, with `<br>` rendered as `\n`.
    /// The text is raw: no whitespace cleanup is applied here.
    async fn node_texts(&self, xpath: &str) -> Result<Vec<String>, ScraperError>;

    /// Value of `attribute` on every matched node that carries it.
    async fn attribute_values(
        &self,
        xpath: &str,
        attribute: &str,
    ) -> Result<Vec<String>, ScraperError>;

    /// Number of nodes matched by `xpath`.
    async fn count(&self, xpath: &str) -> Result<usize, ScraperError>;

    /// Click the first node matched by `xpath`. Returns false when nothing matched.
    ///
    /// Returns as soon as the click is dispatched; a navigation it triggers
    /// may still be in flight. See [`PageQuery::mark_document`].
    async fn click(&self, xpath: &str) -> Result<bool, ScraperError>;

    /// Tag the document currently displayed.
    async fn mark_document(&self) -> Result<(), ScraperError>;

    /// Whether the tagged document has been replaced by a new one.
    ///
    /// A page that is between documents reports `false`.
    async fn document_replaced(&self) -> Result<bool, ScraperError>;

    /// Serialized size of the current document, used to detect a settled page.
    async fn document_length(&self) -> Result<usize, ScraperError>;

    /// PNG screenshot of the page, for debugging failed extractions.
    async fn screenshot(&self) -> Result<Vec<u8>, ScraperError> {
        Ok(Vec::new())
    }

    /// Release the page context.
    async fn close(&self) -> Result<(), ScraperError>;
}

/// A browser session able to open page contexts.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    type Page: PageQuery;

    /// Open a new page context and navigate it to `url`.
    async fn open(&self, url: &str) -> Result<Self::Page, ScraperError>;

    /// Shut the browser down.
    async fn close(self) -> Result<(), ScraperError>
    where
        Self: Sized;
}
