use std::env;
use std::time::Duration;

use crate::error::{ReportError, Result};

pub const DEFAULT_SERVICE_URL: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Where the remote report services live.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Read `REPORT_SERVICE_URL`, falling back to [`DEFAULT_SERVICE_URL`].
    pub fn from_env() -> Result<Self> {
        let base_url =
            env::var("REPORT_SERVICE_URL").unwrap_or_else(|_| DEFAULT_SERVICE_URL.to_string());
        let config = Self::new(base_url);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(ReportError::Config("service base URL is empty".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ReportError::Config(format!(
                "service base URL must be http(s): {}",
                url
            )));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_URL)
    }
}

/// Behaviour of a single report session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Start the analysis as soon as a file is selected.
    pub auto_analyze_on_select: bool,
    /// MIME types accepted at selection time.
    pub accepted_mime_types: Vec<String>,
}

impl SessionConfig {
    pub fn accepts(&self, mime_type: &str) -> bool {
        self.accepted_mime_types
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(mime_type))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_analyze_on_select: false,
            accepted_mime_types: vec!["application/pdf".to_string()],
        }
    }
}
