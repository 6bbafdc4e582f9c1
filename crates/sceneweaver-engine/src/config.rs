use std::env;
use std::time::Duration;

use sceneweaver_contracts::pagination::DEFAULT_PAGE_SIZE;

pub const DEFAULT_API_BASE: &str = "http://localhost:8000";
const DEFAULT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_MAX_POLL_FAILURES: u32 = 10;
const DEFAULT_SENTENCE_LIMIT: usize = 77;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base: String,
    pub token: Option<String>,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    /// Consecutive failed polls tolerated before the session fails; `None` polls forever.
    pub max_poll_failures: Option<u32>,
    pub page_size: usize,
    /// Stories estimating more frames than this are refused before dispatch.
    pub sentence_limit: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token: None,
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_poll_failures: Some(DEFAULT_MAX_POLL_FAILURES),
            page_size: DEFAULT_PAGE_SIZE,
            sentence_limit: Some(DEFAULT_SENTENCE_LIMIT),
        }
    }
}

impl ClientConfig {
    /// Reads `SCENEWEAVER_*` variables; unset or malformed values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };
        let number = |key: &str| value(key).and_then(|raw| raw.parse::<u64>().ok());

        let mut config = Self::default();
        if let Some(api_base) = value("SCENEWEAVER_API_BASE") {
            config.api_base = api_base.trim_end_matches('/').to_string();
        }
        config.token = value("SCENEWEAVER_TOKEN");
        if let Some(ms) = number("SCENEWEAVER_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(ms.clamp(500, 120_000));
        }
        if let Some(ms) = number("SCENEWEAVER_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms.clamp(100, 60_000));
        }
        if let Some(limit) = number("SCENEWEAVER_MAX_POLL_FAILURES") {
            config.max_poll_failures = u32::try_from(limit).ok().filter(|value| *value > 0);
        }
        if let Some(size) = number("SCENEWEAVER_PAGE_SIZE") {
            config.page_size = usize::try_from(size).unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        }
        if let Some(limit) = number("SCENEWEAVER_MAX_SENTENCES") {
            config.sentence_limit = usize::try_from(limit).ok().filter(|value| *value > 0);
        }
        config
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_poll_failures(mut self, limit: Option<u32>) -> Self {
        self.max_poll_failures = limit.filter(|value| *value > 0);
        self
    }
}
