//! Page readiness waits
//!
//! Pages render their content after the load event, so every navigation and
//! click is followed by a [`WaitPolicy`]. A ready condition that does not
//! hold before the timeout is logged and the run proceeds anyway.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::ScraperError;
use crate::traits::PageQuery;

/// Consecutive identical document sizes needed to call a page stable.
const REQUIRED_STABLE_CHECKS: u32 = 3;

/// What "loaded" means for a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadyCondition {
    /// Sleep for the settle delay.
    #[default]
    FixedDelay,
    /// Poll until the XPath matches at least one node.
    ElementPresent { xpath: String },
    /// Poll until the document size stops changing.
    DomStable,
}

/// Ready condition plus the timing used to check it.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitPolicy {
    pub condition: ReadyCondition,
    /// Delay used by [`ReadyCondition::FixedDelay`].
    pub settle_delay: Duration,
    /// Upper bound for the polling conditions.
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            condition: ReadyCondition::FixedDelay,
            settle_delay: Duration::from_millis(3000),
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl WaitPolicy {
    /// Sleep for `settle_delay`, nothing else.
    pub fn fixed(settle_delay: Duration) -> Self {
        Self {
            settle_delay,
            ..Default::default()
        }
    }

    /// Poll for `xpath` for at most `timeout`.
    pub fn element_present(xpath: impl Into<String>, timeout: Duration) -> Self {
        Self {
            condition: ReadyCondition::ElementPresent {
                xpath: xpath.into(),
            },
            timeout,
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Block until the page satisfies the policy's ready condition.
///
/// Returns whether the condition was met; only query errors on the last
/// attempt are propagated.
pub async fn wait_until_ready<P>(page: &P, policy: &WaitPolicy) -> Result<bool, ScraperError>
where
    P: PageQuery + ?Sized,
{
    match &policy.condition {
        ReadyCondition::FixedDelay => {
            debug!("Settling for {:?}", policy.settle_delay);
            sleep(policy.settle_delay).await;
            Ok(true)
        }
        ReadyCondition::ElementPresent { xpath } => wait_for_element(page, xpath, policy).await,
        ReadyCondition::DomStable => wait_stable(page, policy).await,
    }
}

/// Poll until the document tagged by [`PageQuery::mark_document`] is gone.
///
/// Returns false when the page still shows the tagged document after the
/// policy timeout.
pub async fn wait_for_replacement<P>(page: &P, policy: &WaitPolicy) -> Result<bool, ScraperError>
where
    P: PageQuery + ?Sized,
{
    let start = Instant::now();
    loop {
        match page.document_replaced().await {
            Ok(true) => {
                debug!("Document replaced after {:?}", start.elapsed());
                return Ok(true);
            }
            Ok(false) => {}
            Err(e) => debug!("Replacement check error: {}", e),
        }

        if start.elapsed() >= policy.timeout {
            warn!("Document not replaced after {:?}", start.elapsed());
            return Ok(false);
        }
        sleep(policy.poll_interval).await;
    }
}

async fn wait_for_element<P>(
    page: &P,
    xpath: &str,
    policy: &WaitPolicy,
) -> Result<bool, ScraperError>
where
    P: PageQuery + ?Sized,
{
    let start = Instant::now();
    loop {
        match page.count(xpath).await {
            Ok(n) if n > 0 => {
                debug!("Ready: {} matched after {:?}", xpath, start.elapsed());
                return Ok(true);
            }
            Ok(_) => {}
            Err(e) if start.elapsed() >= policy.timeout => return Err(e),
            Err(e) => debug!("Ready check error: {}", e),
        }

        if start.elapsed() >= policy.timeout {
            warn!(
                "{} not present after {:?}, proceeding anyway",
                xpath,
                start.elapsed()
            );
            return Ok(false);
        }
        sleep(policy.poll_interval).await;
    }
}

async fn wait_stable<P>(page: &P, policy: &WaitPolicy) -> Result<bool, ScraperError>
where
    P: PageQuery + ?Sized,
{
    let start = Instant::now();
    let mut last_len: Option<usize> = None;
    let mut stable_count = 0;

    while start.elapsed() < policy.timeout {
        match page.document_length().await {
            Ok(current) => match last_len {
                Some(last) if last == current => {
                    stable_count += 1;
                    if stable_count >= REQUIRED_STABLE_CHECKS {
                        info!(
                            "Page stable after {:?} ({} consecutive checks)",
                            start.elapsed(),
                            stable_count
                        );
                        return Ok(true);
                    }
                }
                _ => {
                    stable_count = 0;
                    last_len = Some(current);
                }
            },
            Err(e) => {
                debug!("Stability check error: {}", e);
                stable_count = 0;
            }
        }
        sleep(policy.poll_interval).await;
    }

    warn!(
        "Page not stable after {:?}, proceeding anyway",
        start.elapsed()
    );
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDocument, FakeSite};
    use crate::traits::BrowserSession;

    fn fast(condition: ReadyCondition) -> WaitPolicy {
        WaitPolicy {
            condition,
            settle_delay: Duration::ZERO,
            timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_element_present_ready() {
        let doc = FakeDocument::new().with_texts("//section/a", &["x"]);
        let site = FakeSite::new().with_page("https://a.test/", doc);
        let page = site.session().open("https://a.test/").await.unwrap();

        let policy = fast(ReadyCondition::ElementPresent {
            xpath: "//section/a".into(),
        });
        assert!(wait_until_ready(&page, &policy).await.unwrap());
    }

    #[tokio::test]
    async fn test_element_missing_times_out_without_error() {
        let site = FakeSite::new().with_page("https://a.test/", FakeDocument::new());
        let page = site.session().open("https://a.test/").await.unwrap();

        let policy = fast(ReadyCondition::ElementPresent {
            xpath: "//h1".into(),
        });
        assert!(!wait_until_ready(&page, &policy).await.unwrap());
    }

    #[tokio::test]
    async fn test_replacement_waits_for_new_document() {
        let site = FakeSite::new()
            .with_page(
                "https://a.test/1",
                FakeDocument::new().with_delayed_click("//a[@rel='next']", "https://a.test/2", 4),
            )
            .with_page(
                "https://a.test/2",
                FakeDocument::new().with_texts("//h1", &["two"]),
            );
        let page = site.session().open("https://a.test/1").await.unwrap();
        let policy = fast(ReadyCondition::DomStable);

        page.mark_document().await.unwrap();
        assert!(page.click("//a[@rel='next']").await.unwrap());
        // the old document is still displayed right after the click
        assert!(page.node_texts("//h1").await.unwrap().is_empty());

        assert!(wait_for_replacement(&page, &policy).await.unwrap());
        assert_eq!(page.node_texts("//h1").await.unwrap(), vec!["two"]);
    }

    #[tokio::test]
    async fn test_unreplaced_document_times_out() {
        let site = FakeSite::new().with_page("https://a.test/", FakeDocument::new());
        let page = site.session().open("https://a.test/").await.unwrap();

        page.mark_document().await.unwrap();
        assert!(!wait_for_replacement(&page, &fast(ReadyCondition::DomStable))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_dom_stable() {
        let site = FakeSite::new().with_page("https://a.test/", FakeDocument::new());
        let page = site.session().open("https://a.test/").await.unwrap();

        let mut policy = fast(ReadyCondition::DomStable);
        policy.timeout = Duration::from_secs(1);
        assert!(wait_until_ready(&page, &policy).await.unwrap());
    }

    #[test]
    fn test_condition_from_toml() {
        #[derive(Deserialize)]
        struct Holder {
            ready: ReadyCondition,
        }
        let holder: Holder =
            toml::from_str(r#"ready = { kind = "element_present", xpath = "//h1" }"#).unwrap();
        assert_eq!(
            holder.ready,
            ReadyCondition::ElementPresent {
                xpath: "//h1".into()
            }
        );
    }
}
