use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ScraperError;
use crate::extract::FieldMapping;
use crate::sink::ADDRESS_COLUMNS;
use crate::wait::{ReadyCondition, WaitPolicy};

pub const DEFAULT_LISTING_URL: &str = "https://www.usine-digitale.fr/annuaire-start-up/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ViewportSize {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 1800,
        }
    }
}

/// Where and how the listing pages are walked.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingConfig {
    pub url: String,
    /// Nodes whose attribute holds a detail-page link.
    pub link_xpath: String,
    pub link_attribute: String,
    pub next_xpath: String,
    pub jump_xpath: String,
    /// Stop after this many pages even if a control is still present.
    pub max_pages: Option<usize>,
    pub wait: WaitPolicy,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_LISTING_URL.to_string(),
            link_xpath: "//section/a".to_string(),
            link_attribute: "href".to_string(),
            next_xpath: "//a[@rel='next']".to_string(),
            jump_xpath: "//div[contains(@class, 'isNoMobile')]/ul[@class='pagination']/li[1]/a"
                .to_string(),
            max_pages: None,
            wait: WaitPolicy::element_present("//section/a", Duration::from_secs(10)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub json_path: PathBuf,
    pub csv_path: PathBuf,
    /// URL collection written during a listing walk.
    pub urls_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json_path: PathBuf::from("./data/startups.json"),
            csv_path: PathBuf::from("./data/startups.csv"),
            urls_path: Some(PathBuf::from("./data/startup-urls.json")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub headless: bool,
    pub viewport: ViewportSize,
    pub chrome_executable: Option<PathBuf>,
    pub navigation_timeout: Duration,
    pub listing: ListingConfig,
    pub detail_wait: WaitPolicy,
    pub fields: FieldMapping,
    /// Multi-line field split into street / zipcode / city in the CSV view.
    pub address_field: Option<String>,
    pub output: OutputConfig,
    /// Attempts per detail page; 1 disables retries.
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub debug: bool,
    pub debug_dir: PathBuf,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: ViewportSize::default(),
            chrome_executable: None,
            navigation_timeout: Duration::from_secs(60),
            listing: ListingConfig::default(),
            detail_wait: WaitPolicy::fixed(Duration::from_millis(2500)),
            fields: FieldMapping::default(),
            address_field: Some("address".to_string()),
            output: OutputConfig::default(),
            max_attempts: 1,
            retry_backoff: Duration::from_millis(1000),
            debug: false,
            debug_dir: PathBuf::from("./data/debug"),
        }
    }
}

impl ScraperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with the keys present in a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScraperError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ScraperError> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| ScraperError::Config(e.to_string()))?;
        let mut config = Self::default();
        file.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScraperError> {
        if self.max_attempts == 0 {
            return Err(ScraperError::Config("max_attempts must be at least 1".into()));
        }
        if self.fields.is_empty() {
            return Err(ScraperError::Config("no fields configured".into()));
        }
        if let Some(address) = &self.address_field {
            if ADDRESS_COLUMNS.contains(&address.as_str()) {
                return Err(ScraperError::Config(format!(
                    "address field '{}' clashes with a derived address column",
                    address
                )));
            }
            if let Some(clash) = ADDRESS_COLUMNS
                .iter()
                .find(|column| self.fields.get(column).is_some())
            {
                return Err(ScraperError::Config(format!(
                    "field '{}' clashes with the column derived from '{}'",
                    clash, address
                )));
            }
        }
        url::Url::parse(&self.listing.url).map_err(|e| {
            ScraperError::Config(format!("invalid listing url {}: {}", self.listing.url, e))
        })?;
        Ok(())
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = ViewportSize { width, height };
        self
    }

    pub fn with_listing_url(mut self, url: impl Into<String>) -> Self {
        self.listing.url = url.into();
        self
    }

    pub fn with_fields(mut self, fields: FieldMapping) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_output(self, json: impl Into<PathBuf>, csv: impl Into<PathBuf>) -> Self {
        self.with_json_output(json).with_csv_output(csv)
    }

    pub fn with_json_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output.json_path = path.into();
        self
    }

    pub fn with_csv_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output.csv_path = path.into();
        self
    }

    pub fn with_urls_output(mut self, path: Option<PathBuf>) -> Self {
        self.output.urls_path = path;
        self
    }

    pub fn with_detail_wait(mut self, wait: WaitPolicy) -> Self {
        self.detail_wait = wait;
        self
    }

    pub fn with_listing_wait(mut self, wait: WaitPolicy) -> Self {
        self.listing.wait = wait;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    browser: Option<BrowserSection>,
    listing: Option<ListingSection>,
    detail: Option<DetailSection>,
    output: Option<OutputSection>,
    retry: Option<RetrySection>,
    fields: Option<FieldMapping>,
    debug: Option<bool>,
    debug_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BrowserSection {
    headless: Option<bool>,
    viewport: Option<ViewportSize>,
    chrome_executable: Option<PathBuf>,
    navigation_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListingSection {
    url: Option<String>,
    link_xpath: Option<String>,
    link_attribute: Option<String>,
    next_xpath: Option<String>,
    jump_xpath: Option<String>,
    max_pages: Option<usize>,
    wait: Option<WaitSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DetailSection {
    address_field: Option<String>,
    wait: Option<WaitSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct WaitSection {
    ready: Option<ReadyCondition>,
    settle_delay_ms: Option<u64>,
    timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OutputSection {
    json: Option<PathBuf>,
    csv: Option<PathBuf>,
    urls: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetrySection {
    max_attempts: Option<u32>,
    backoff_ms: Option<u64>,
}

impl WaitSection {
    fn apply(self, wait: &mut WaitPolicy) {
        if let Some(ready) = self.ready {
            wait.condition = ready;
        }
        if let Some(ms) = self.settle_delay_ms {
            wait.settle_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.timeout_ms {
            wait.timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.poll_interval_ms {
            wait.poll_interval = Duration::from_millis(ms);
        }
    }
}

impl ConfigFile {
    fn apply(self, config: &mut ScraperConfig) {
        if let Some(browser) = self.browser {
            if let Some(headless) = browser.headless {
                config.headless = headless;
            }
            if let Some(viewport) = browser.viewport {
                config.viewport = viewport;
            }
            if browser.chrome_executable.is_some() {
                config.chrome_executable = browser.chrome_executable;
            }
            if let Some(ms) = browser.navigation_timeout_ms {
                config.navigation_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(listing) = self.listing {
            let target = &mut config.listing;
            if let Some(url) = listing.url {
                target.url = url;
            }
            if let Some(xpath) = listing.link_xpath {
                target.link_xpath = xpath;
            }
            if let Some(attribute) = listing.link_attribute {
                target.link_attribute = attribute;
            }
            if let Some(xpath) = listing.next_xpath {
                target.next_xpath = xpath;
            }
            if let Some(xpath) = listing.jump_xpath {
                target.jump_xpath = xpath;
            }
            if listing.max_pages.is_some() {
                target.max_pages = listing.max_pages;
            }
            if let Some(wait) = listing.wait {
                wait.apply(&mut target.wait);
            }
        }

        if let Some(detail) = self.detail {
            if let Some(field) = detail.address_field {
                config.address_field = if field.is_empty() { None } else { Some(field) };
            }
            if let Some(wait) = detail.wait {
                wait.apply(&mut config.detail_wait);
            }
        }

        if let Some(output) = self.output {
            if let Some(path) = output.json {
                config.output.json_path = path;
            }
            if let Some(path) = output.csv {
                config.output.csv_path = path;
            }
            if output.urls.is_some() {
                config.output.urls_path = output.urls;
            }
        }

        if let Some(retry) = self.retry {
            if let Some(attempts) = retry.max_attempts {
                config.max_attempts = attempts;
            }
            if let Some(ms) = retry.backoff_ms {
                config.retry_backoff = Duration::from_millis(ms);
            }
        }

        if let Some(fields) = self.fields {
            config.fields = fields;
        }
        if let Some(debug) = self.debug {
            config.debug = debug;
        }
        if let Some(dir) = self.debug_dir {
            config.debug_dir = dir;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Cardinality;

    #[test]
    fn test_config_builder() {
        let config = ScraperConfig::new()
            .with_headless(false)
            .with_viewport(1280, 800)
            .with_json_output("/tmp/out.json")
            .with_csv_output("/tmp/out.csv")
            .with_max_attempts(3);

        assert!(!config.headless);
        assert_eq!(config.viewport, ViewportSize { width: 1280, height: 800 });
        assert_eq!(config.output.json_path, PathBuf::from("/tmp/out.json"));
        assert_eq!(config.output.csv_path, PathBuf::from("/tmp/out.csv"));
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ScraperConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.headless);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.address_field.as_deref(), Some("address"));
    }

    #[test]
    fn test_toml_overlay() {
        let config = ScraperConfig::from_toml_str(
            r#"
            debug = true

            [browser]
            headless = false
            viewport = { width = 1024, height = 768 }

            [listing]
            max_pages = 5
            wait = { ready = { kind = "dom_stable" }, timeout_ms = 2000 }

            [detail]
            wait = { ready = { kind = "fixed_delay" }, settle_delay_ms = 100 }

            [retry]
            max_attempts = 2

            [[fields]]
            name = "title"
            xpath = "//h1"

            [[fields]]
            name = "tags"
            xpath = "//ul[@class='tags']/li"
            cardinality = "multiple"
            "#,
        )
        .unwrap();

        assert!(config.debug);
        assert!(!config.headless);
        assert_eq!(config.viewport.width, 1024);
        assert_eq!(config.listing.max_pages, Some(5));
        assert_eq!(config.listing.wait.condition, ReadyCondition::DomStable);
        assert_eq!(config.listing.wait.timeout, Duration::from_millis(2000));
        assert_eq!(config.detail_wait.settle_delay, Duration::from_millis(100));
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.fields.len(), 2);
        assert_eq!(
            config.fields.get("tags").map(|q| q.cardinality),
            Some(Cardinality::Multiple)
        );
        // untouched keys keep their defaults
        assert_eq!(config.listing.url, DEFAULT_LISTING_URL);
    }

    #[test]
    fn test_toml_duplicate_fields_rejected() {
        let err = ScraperConfig::from_toml_str(
            r#"
            [[fields]]
            name = "email"
            xpath = "//a"

            [[fields]]
            name = "email"
            xpath = "//b"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ScraperError::Config(_)));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = ScraperConfig::from_toml_str("[retry]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ScraperError::Config(_)));
    }

    #[test]
    fn test_bundled_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/usine-digitale.toml");
        let config = ScraperConfig::load(path).unwrap();
        let defaults = ScraperConfig::default();

        assert_eq!(config.fields, defaults.fields);
        assert_eq!(config.listing, defaults.listing);
        assert_eq!(config.output, defaults.output);
        assert_eq!(config.detail_wait, defaults.detail_wait);
    }

    #[test]
    fn test_derived_address_columns_are_reserved() {
        let err = ScraperConfig::from_toml_str(
            r#"
            [[fields]]
            name = "city"
            xpath = "//span[@class='city']"

            [[fields]]
            name = "address"
            xpath = "//p[@itemprop='address']/text()"
            cardinality = "multiple"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ScraperError::Config(_)));

        // without an address field the name is free
        let config = ScraperConfig::from_toml_str(
            r#"
            [detail]
            address_field = ""

            [[fields]]
            name = "city"
            xpath = "//span[@class='city']"
            "#,
        )
        .unwrap();
        assert!(config.address_field.is_none());
        assert!(config.fields.get("city").is_some());
    }

    #[test]
    fn test_missing_file() {
        let err = ScraperConfig::load("/nonexistent/scraper.toml").unwrap_err();
        assert!(matches!(err, ScraperError::Config(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(ScraperConfig::from_toml_str("[browser]\nheadles = true\n").is_err());
    }
}
