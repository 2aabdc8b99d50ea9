//! Recorder configuration.
//!
//! Every section has a `Default` that works against a locally running browser
//! started with `--remote-debugging-port=9222`. The endpoint honours the
//! `CDP_HOST` and `CDP_PORT` environment variables.

use crate::error::{HarError, Result};
use std::time::Duration;

/// Request timeout for the remote-debugging HTTP endpoint.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the browser's remote-debugging HTTP endpoint listens.
#[derive(Debug, Clone, PartialEq)]
pub struct DevToolsEndpoint {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub timeout: Option<Duration>,
}

impl Default for DevToolsEndpoint {
    fn default() -> Self {
        let port = std::env::var("CDP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(9222);

        Self {
            host: std::env::var("CDP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port,
            secure: false,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

impl DevToolsEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Base URL of the HTTP endpoint, e.g. `http://localhost:9222`.
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Which responses are not worth recording.
///
/// Patterns are regular expressions matched anywhere in the MIME type or URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterConfig {
    pub ignore_mime: Vec<String>,
    pub ignore_url: Vec<String>,
    pub ignore_base64_bodies: bool,
}

impl FilterConfig {
    pub fn with_ignored_mime(mut self, pattern: impl Into<String>) -> Self {
        self.ignore_mime.push(pattern.into());
        self
    }

    pub fn with_ignored_url(mut self, pattern: impl Into<String>) -> Self {
        self.ignore_url.push(pattern.into());
        self
    }

    pub fn with_ignore_base64_bodies(mut self, ignore: bool) -> Self {
        self.ignore_base64_bodies = ignore;
        self
    }
}

/// Bounds on how long the correlation store holds on to unfinished work.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationConfig {
    /// How long a response or failure waits for its request to register.
    pub race_timeout: Duration,
    /// Age after which a never-completed transaction is evicted.
    pub max_age: Duration,
    /// Maximum number of transactions held at once; the oldest is evicted first.
    pub max_pending: usize,
    /// How often the recorder sweeps expired transactions.
    pub sweep_interval: Duration,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            race_timeout: Duration::from_secs(5),
            max_age: Duration::from_secs(120),
            max_pending: 10_000,
            sweep_interval: Duration::from_secs(10),
        }
    }
}

/// Flow control for the output side.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    /// Records the consumer may have queued before the sink starts buffering.
    pub high_water_mark: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self { high_water_mark: 16 }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecorderConfig {
    pub endpoint: DevToolsEndpoint,
    pub filter: FilterConfig,
    pub correlation: CorrelationConfig,
    pub sink: SinkConfig,
}

impl RecorderConfig {
    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_correlation(mut self, correlation: CorrelationConfig) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn with_sink(mut self, sink: SinkConfig) -> Self {
        self.sink = sink;
        self
    }

    /// Reject settings the recorder cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sink.high_water_mark == 0 {
            return Err(HarError::ConfigError("high_water_mark must be at least 1".to_string()));
        }
        if self.correlation.max_pending == 0 {
            return Err(HarError::ConfigError("max_pending must be at least 1".to_string()));
        }
        if self.correlation.sweep_interval.is_zero() {
            return Err(HarError::ConfigError("sweep_interval must be non-zero".to_string()));
        }
        Ok(())
    }
}
