use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("browser initialization failed: {0}")]
    BrowserInit(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("navigation to {url} failed: {cause}")]
    NavigationFailed { url: String, cause: String },

    #[error("page unavailable: {0}")]
    PageUnavailable(String),

    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    #[error("failed to write {}: {source}", path.display())]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScraperError {
    pub fn navigation(url: impl Into<String>, cause: impl ToString) -> Self {
        Self::NavigationFailed {
            url: url.into(),
            cause: cause.to_string(),
        }
    }

    /// Errors that only affect the current page; the run can move on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NavigationFailed { .. } | Self::PageUnavailable(_)
        )
    }
}
