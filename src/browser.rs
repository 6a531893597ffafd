//! Chrome DevTools binding of the page-query traits

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::traits::{BrowserSession, PageQuery};

/// Evaluates an XPath and returns the node snapshot as an array.
/// `%XPATH%` is replaced with a JSON string literal.
const SNAPSHOT_JS: &str = r#"
    const snap = document.evaluate(%XPATH%, document, null,
        XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    const nodes = [];
    for (let i = 0; i < snap.snapshotLength; i++) {
        nodes.push(snap.snapshotItem(i));
    }
"#;

fn snapshot_script(xpath: &str, body: &str) -> String {
    let literal = serde_json::to_string(xpath).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "(() => {{ {} {} }})()",
        SNAPSHOT_JS.replace("%XPATH%", &literal),
        body
    )
}

fn node_texts_script(xpath: &str) -> String {
    // Work on a clone so the live DOM is left untouched.
    snapshot_script(
        xpath,
        r#"
        return nodes.map(node => {
            const clone = node.cloneNode(true);
            if (clone.querySelectorAll) {
                clone.querySelectorAll('br').forEach(br => br.replaceWith('\n'));
            }
            return clone.textContent || clone.innerText || '';
        });
        "#,
    )
}

fn attribute_values_script(xpath: &str, attribute: &str) -> String {
    let attribute = serde_json::to_string(attribute).unwrap_or_else(|_| "\"\"".to_string());
    snapshot_script(
        xpath,
        &format!(
            "return nodes
                .map(node => node.getAttribute ? node.getAttribute({attribute}) : null)
                .filter(value => value !== null);"
        ),
    )
}

fn count_script(xpath: &str) -> String {
    snapshot_script(xpath, "return nodes.length;")
}

fn click_script(xpath: &str) -> String {
    snapshot_script(
        xpath,
        r#"
        if (nodes.length === 0) { return false; }
        nodes[0].click();
        return true;
        "#,
    )
}

/// Window property set on a document before a click that may navigate away.
const DOCUMENT_MARK: &str = "__directoryScraperMark";

fn mark_script() -> String {
    format!("(() => {{ window.{} = true; return true; }})()", DOCUMENT_MARK)
}

fn replaced_script() -> String {
    format!("window.{} !== true", DOCUMENT_MARK)
}

/// Launched Chrome instance.
pub struct ChromeSession {
    browser: Browser,
    handler: JoinHandle<()>,
    navigation_timeout: Duration,
}

impl ChromeSession {
    /// Launch Chrome with the configured viewport and headless mode.
    ///
    /// The executable comes from the config, then `CHROME_PATH` /
    /// `CHROMIUM_PATH`, then chromiumoxide's own lookup.
    pub async fn launch(config: &ScraperConfig) -> Result<Self, ScraperError> {
        info!(
            "Launching browser (headless={}, viewport={}x{})",
            config.headless, config.viewport.width, config.viewport.height
        );

        let mut builder = BrowserConfig::builder()
            .window_size(config.viewport.width, config.viewport.height)
            .viewport(Viewport {
                width: config.viewport.width,
                height: config.viewport.height,
                ..Default::default()
            })
            .request_timeout(config.navigation_timeout);

        if !config.headless {
            builder = builder.with_head();
        }

        let chrome_path = config.chrome_executable.clone().or_else(|| {
            std::env::var("CHROME_PATH")
                .or_else(|_| std::env::var("CHROMIUM_PATH"))
                .ok()
                .map(Into::into)
        });
        if let Some(path) = chrome_path {
            builder = builder.chrome_executable(path);
        }

        builder = builder
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");

        if config.debug {
            builder = builder.arg("--enable-logging=stderr").arg("--v=1");
        }

        let browser_config = builder.build().map_err(ScraperError::BrowserInit)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
        });

        info!("Browser launched");
        Ok(Self {
            browser,
            handler,
            navigation_timeout: config.navigation_timeout,
        })
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    type Page = ChromePage;

    /// Open a blank tab, then navigate it. `goto` reports network errors
    /// that `new_page(url)` would hide behind Chrome's error page.
    async fn open(&self, url: &str) -> Result<ChromePage, ScraperError> {
        debug!("Opening {}", url);
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScraperError::navigation(url, e))?;

        let navigated = match tokio::time::timeout(self.navigation_timeout, page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ScraperError::navigation(url, e)),
            Err(_) => Err(ScraperError::navigation(
                url,
                format!("timed out after {:?}", self.navigation_timeout),
            )),
        };

        if let Err(e) = navigated {
            if let Err(close_err) = page.close().await {
                debug!("Failed to close tab for {}: {}", url, close_err);
            }
            return Err(e);
        }

        Ok(ChromePage { page })
    }

    async fn close(mut self) -> Result<(), ScraperError> {
        info!("Closing browser...");
        let result = self.browser.close().await;
        if let Err(e) = self.browser.wait().await {
            debug!("Browser process wait failed: {}", e);
        }
        self.handler.abort();
        result.map_err(|e| ScraperError::BrowserInit(format!("browser close failed: {}", e)))?;
        info!("Browser closed");
        Ok(())
    }
}

/// One Chrome tab.
pub struct ChromePage {
    page: Page,
}

impl ChromePage {
    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, ScraperError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| ScraperError::PageUnavailable(e.to_string()))?
            .into_value::<T>()
            .map_err(|e| ScraperError::PageUnavailable(format!("unexpected result: {}", e)))
    }
}

#[async_trait]
impl PageQuery for ChromePage {
    async fn node_texts(&self, xpath: &str) -> Result<Vec<String>, ScraperError> {
        self.eval(node_texts_script(xpath)).await
    }

    async fn attribute_values(
        &self,
        xpath: &str,
        attribute: &str,
    ) -> Result<Vec<String>, ScraperError> {
        self.eval(attribute_values_script(xpath, attribute)).await
    }

    async fn count(&self, xpath: &str) -> Result<usize, ScraperError> {
        self.eval(count_script(xpath)).await
    }

    async fn click(&self, xpath: &str) -> Result<bool, ScraperError> {
        let clicked: bool = self.eval(click_script(xpath)).await?;
        debug!("Click on {}: {}", xpath, clicked);
        Ok(clicked)
    }

    async fn mark_document(&self) -> Result<(), ScraperError> {
        self.eval::<bool>(mark_script()).await?;
        Ok(())
    }

    async fn document_replaced(&self) -> Result<bool, ScraperError> {
        // Evaluation fails while the old context is torn down.
        match self.eval::<bool>(replaced_script()).await {
            Ok(replaced) => Ok(replaced),
            Err(e) => {
                debug!("Document in transition: {}", e);
                Ok(false)
            }
        }
    }

    async fn document_length(&self) -> Result<usize, ScraperError> {
        self.eval("document.documentElement.outerHTML.length".to_string())
            .await
    }

    async fn screenshot(&self) -> Result<Vec<u8>, ScraperError> {
        self.page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(|e| ScraperError::PageUnavailable(e.to_string()))
    }

    async fn close(&self) -> Result<(), ScraperError> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| ScraperError::PageUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xpath_is_embedded_as_literal() {
        let script = count_script(r#"//h2[.="Marché :"]"#);
        assert!(script.contains(r#""//h2[.=\"Marché :\"]""#));
        assert!(!script.contains("%XPATH%"));
    }

    #[test]
    fn test_attribute_is_escaped() {
        let script = attribute_values_script("//section/a", "href");
        assert!(script.contains(r#"getAttribute("href")"#));
    }

    #[test]
    fn test_text_script_replaces_br_on_clone() {
        let script = node_texts_script("//p");
        assert!(script.contains("cloneNode(true)"));
        assert!(script.contains("replaceWith('\\n')"));
    }

    #[test]
    fn test_mark_scripts_share_property() {
        assert!(mark_script().contains(DOCUMENT_MARK));
        assert!(replaced_script().contains(DOCUMENT_MARK));
    }

    #[tokio::test]
    #[ignore] // needs a local Chrome: cargo test live_unresolvable_host -- --ignored
    async fn live_unresolvable_host() {
        let config = ScraperConfig::default();
        let session = ChromeSession::launch(&config).await.expect("launch");
        let err = session
            .open("https://directory-scraper.invalid/")
            .await
            .err()
            .expect("navigation should fail");
        assert!(matches!(err, ScraperError::NavigationFailed { .. }));
        session.close().await.expect("close");
    }

    #[tokio::test]
    #[ignore] // needs a local Chrome: cargo test live_extract -- --ignored --nocapture
    async fn live_extract() {
        let config = ScraperConfig::default();
        let session = ChromeSession::launch(&config).await.expect("launch");
        let page = session
            .open("https://www.usine-digitale.fr/annuaire-start-up/")
            .await
            .expect("open");
        let links = page
            .attribute_values(&config.listing.link_xpath, "href")
            .await
            .expect("links");
        println!("{} links", links.len());
        page.close().await.expect("close page");
        session.close().await.expect("close");
    }
}
