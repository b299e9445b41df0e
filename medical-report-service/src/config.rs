use report_flow::{ClientConfig, Result, SessionConfig};
use std::time::Duration;

const DEFAULT_SESSION_IDLE_SECS: u64 = 60 * 60;

/// Service configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub client: ClientConfig,
    pub session: SessionConfig,
    /// Sessions untouched for this long are dropped from memory.
    pub session_idle_timeout: Duration,
}

impl AppConfig {
    /// `PORT` (default 3000), `AUTO_ANALYZE_ON_SELECT` (default true) and
    /// `REPORT_SERVICE_URL` for the remote analysis service.
    /// `SESSION_IDLE_TIMEOUT_SECS` (default one hour) bounds how long an
    /// abandoned session is kept.
    pub fn from_env() -> Result<Self> {
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .unwrap_or(3000);

        let auto_analyze_on_select = std::env::var("AUTO_ANALYZE_ON_SELECT")
            .map(|value| parse_flag(&value))
            .unwrap_or(true);

        let session_idle_timeout = std::env::var("SESSION_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_SESSION_IDLE_SECS));

        Ok(Self {
            port,
            client: ClientConfig::from_env()?,
            session: SessionConfig {
                auto_analyze_on_select,
                ..SessionConfig::default()
            },
            session_idle_timeout,
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
