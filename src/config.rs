//! Router configuration.
//!
//! Every setting has a default, so [`RouterConfig::default`] is a working
//! configuration. [`RouterConfig::from_env`] follows 12-factor style and
//! reads overrides from environment variables (or a `.env` file via
//! `dotenvy`).

use std::time::Duration;

/// Namespace under which topics are published when none is configured.
pub const DEFAULT_CHANNEL_PREFIX: &str = "pubsub";

/// Delivery timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-subscription queue capacity used when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = i16::MAX as usize;

/// Top-level router configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Transport namespace; topics live under `"<channel_prefix>/"`.
    pub channel_prefix: String,

    /// Upper bound on how long a delivery waits for queue space.
    pub timeout: Duration,

    /// Capacity of each subscription's bounded queue.
    pub queue_capacity: usize,

    /// Whether the built-in logger emits anything.
    pub logging_enabled: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            timeout: DEFAULT_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            logging_enabled: false,
        }
    }
}

impl RouterConfig {
    /// Loads configuration from environment variables.
    ///
    /// | Variable                | Default  |
    /// |-------------------------|----------|
    /// | `ROUTER_CHANNEL_PREFIX` | `pubsub` |
    /// | `ROUTER_TIMEOUT_MS`     | `5000`   |
    /// | `ROUTER_QUEUE_CAPACITY` | `32767`  |
    /// | `ROUTER_LOG_ENABLED`    | `false`  |
    ///
    /// Missing or unparsable values fall back to the default.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let channel_prefix = lookup("ROUTER_CHANNEL_PREFIX")
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.channel_prefix);
        let timeout = parse_var(&lookup, "ROUTER_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.timeout);
        let queue_capacity = parse_var(&lookup, "ROUTER_QUEUE_CAPACITY")
            .filter(|cap| *cap > 0)
            .unwrap_or(defaults.queue_capacity);
        let logging_enabled =
            parse_bool(lookup("ROUTER_LOG_ENABLED").as_deref()).unwrap_or(defaults.logging_enabled);

        Self {
            channel_prefix,
            timeout,
            queue_capacity,
            logging_enabled,
        }
    }

    /// Transport wildcard covering every topic under the prefix.
    #[must_use]
    pub fn wildcard(&self) -> String {
        format!("{}/*", self.channel_prefix)
    }

    /// Full transport channel name for `topic`.
    #[must_use]
    pub fn channel_for(&self, topic: &str) -> String {
        format!("{}/{topic}", self.channel_prefix)
    }

    /// Recovers the topic from a transport channel name by removing the
    /// first occurrence of `"<channel_prefix>/"`.
    #[must_use]
    pub fn topic_of(&self, channel: &str) -> String {
        channel.replacen(&format!("{}/", self.channel_prefix), "", 1)
    }
}

/// Parses a variable as `T`, returning `None` on missing or invalid values.
fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

/// Accepts `"true"`, `"1"`, `"false"`, `"0"` (case-insensitive).
fn parse_bool(value: Option<&str>) -> Option<bool> {
    match value.map(str::to_ascii_lowercase).as_deref() {
        Some("true") | Some("1") => Some(true),
        Some("false") | Some("0") => Some(false),
        _ => None,
    }
}
