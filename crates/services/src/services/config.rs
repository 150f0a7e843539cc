use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Runtime settings for the data layer. Every field has a usable default, so
/// `Config::default()` talks to a local dev server out of the box.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the API server, without the `/api` prefix or a trailing
    /// slash.
    pub api_base_url: String,
    /// Directory for the durable cache; `None` selects the platform data
    /// directory.
    pub data_dir: Option<PathBuf>,
    pub request_timeout: Duration,
    /// How often the background service looks for queued writes to replay.
    pub sync_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3001".to_string(),
            data_dir: None,
            request_timeout: Duration::from_secs(10),
            sync_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Applies `LEDGERLINE_API_URL`, `LEDGERLINE_DATA_DIR` and
    /// `LEDGERLINE_SYNC_INTERVAL_SECS` over the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("LEDGERLINE_API_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(dir) = std::env::var("LEDGERLINE_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(raw) = std::env::var("LEDGERLINE_SYNC_INTERVAL_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => config.sync_interval = Duration::from_secs(secs),
                _ => warn!(value = %raw, "ignoring invalid LEDGERLINE_SYNC_INTERVAL_SECS"),
            }
        }
        config
    }
}
