//! Client and cache configuration.

use std::time::Duration;

use tracing::warn;

/// Placeholder backend host used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(15_000);

pub const BASE_URL_ENV: &str = "VALTRO_BACKEND_URL";
pub const TIMEOUT_ENV: &str = "VALTRO_REQUEST_TIMEOUT_MS";

/// How the caller's identity is forwarded besides the bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserIdHeader {
    /// Send the raw token as `X-User-ID`, which the backend currently reads.
    // TODO: replace with the real user id once the backend derives identity from the bearer token.
    #[default]
    ForwardToken,
    /// Send no identity header beyond `Authorization`.
    Omit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_id_header: UserIdHeader,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_id_header: UserIdHeader::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Load from `VALTRO_BACKEND_URL` and `VALTRO_REQUEST_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup. Missing keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = match lookup(BASE_URL_ENV).filter(|url| !url.trim().is_empty()) {
            Some(url) => Self::new(url.trim()),
            None => Self::default(),
        };
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.timeout = Duration::from_millis(ms),
                _ => warn!(key = TIMEOUT_ENV, value = %raw, "ignoring invalid request timeout"),
            }
        }
        config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_id_header(mut self, header: UserIdHeader) -> Self {
        self.user_id_header = header;
        self
    }
}

/// Freshness, refetch and backoff policy for `QueryClient`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    /// Cached data younger than this is served without a network call.
    pub stale_time: Duration,
    /// Entries unused for this long are evicted.
    pub gc_time: Duration,
    pub refetch_on_window_focus: bool,
    pub refetch_on_reconnect: bool,
    pub retry_base_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(5 * 60),
            gc_time: Duration::from_secs(10 * 60),
            refetch_on_window_focus: false,
            refetch_on_reconnect: true,
            retry_base_delay: Duration::from_millis(1_000),
            max_retry_delay: Duration::from_millis(30_000),
        }
    }
}
