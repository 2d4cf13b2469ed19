use std::time::Duration;

use chanlayer_transport::EndpointAddr;
use serde_json::Value;

use crate::error::LayerError;

/// Endpoint used when neither the caller nor the environment names one.
pub const DEFAULT_ENDPOINT: &str = "inproc://channels";

/// Environment variable that overrides [`DEFAULT_ENDPOINT`].
pub const ENDPOINT_ENV: &str = "CHANLAYER_ENDPOINT";

/// Configuration for a [`GroupLayer`](crate::GroupLayer).
///
/// All fields have defaults. Use the builder methods:
///
/// ```rust
/// use std::time::Duration;
/// use chanlayer::LayerConfig;
///
/// let config = LayerConfig::new()
///     .capacity(100)
///     .channel_capacity(50)
///     .expiry(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct LayerConfig {
    /// In-process endpoint the publisher binds and channels connect to.
    pub(crate) endpoint: String,
    /// Bound of every queue: channel queues, the submission queue, and the
    /// socket high-water marks.
    pub(crate) capacity: usize,
    /// Maximum number of live channels.
    pub(crate) channel_capacity: usize,
    /// Time a publish worker may spend writing one frame.
    pub(crate) expiry: Duration,
    /// Accepted for compatibility; group memberships do not expire.
    pub(crate) group_expiry: Duration,
    /// Size of the publish worker pool.
    pub(crate) workers: usize,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerConfig {
    /// Create a config with defaults.
    ///
    /// If `CHANLAYER_ENDPOINT` is set it becomes the endpoint; this can be
    /// overridden with [`.endpoint()`](Self::endpoint).
    pub fn new() -> Self {
        let endpoint =
            std::env::var(ENDPOINT_ENV).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        Self {
            endpoint,
            capacity: 1000,
            channel_capacity: 1000,
            expiry: Duration::from_secs(60),
            group_expiry: Duration::from_secs(86400),
            workers: 4,
        }
    }

    /// Build from a loosely typed option map.
    ///
    /// Recognized keys: `host`, `capacity`, `channel_capacity`, `expiry`,
    /// `group_expiry` (seconds) and `workers`. Anything else is logged and
    /// ignored. A `null` value keeps the default.
    pub fn from_options(options: &serde_json::Map<String, Value>) -> Result<Self, LayerError> {
        let mut config = Self::new();

        for (key, value) in options {
            if value.is_null() {
                continue;
            }
            match key.as_str() {
                "host" => {
                    let host = value
                        .as_str()
                        .ok_or_else(|| LayerError::Config(format!("{key} must be a string")))?;
                    config.endpoint = host.to_string();
                }
                "capacity" => config.capacity = count_option(key, value)?,
                "channel_capacity" => config.channel_capacity = count_option(key, value)?,
                "workers" => config.workers = count_option(key, value)?,
                "expiry" => config.expiry = seconds_option(key, value)?,
                "group_expiry" => config.group_expiry = seconds_option(key, value)?,
                _ => tracing::warn!("unparsed config entry: {key}: {value}"),
            }
        }

        Ok(config)
    }

    /// Set the endpoint address (`inproc://...`).
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the per-queue bound (default: 1000).
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the maximum number of channels (default: 1000).
    pub fn channel_capacity(mut self, channels: usize) -> Self {
        self.channel_capacity = channels;
        self
    }

    /// Set the per-publish write timeout (default: 60 s).
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// Set the group expiry (default: 1 day). Stored, not enforced.
    pub fn group_expiry(mut self, expiry: Duration) -> Self {
        self.group_expiry = expiry;
        self
    }

    /// Set the number of publish workers (default: 4).
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Check the values and parse the endpoint.
    pub(crate) fn validate(&self) -> Result<EndpointAddr, LayerError> {
        if self.capacity == 0 {
            return Err(LayerError::Config("capacity must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(LayerError::Config("workers must be at least 1".into()));
        }
        Ok(self.endpoint.parse::<EndpointAddr>()?)
    }
}

fn count_option(key: &str, value: &Value) -> Result<usize, LayerError> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| LayerError::Config(format!("{key} must be a non-negative integer")))
}

fn seconds_option(key: &str, value: &Value) -> Result<Duration, LayerError> {
    value
        .as_f64()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| LayerError::Config(format!("{key} must be a non-negative number of seconds")))
}
