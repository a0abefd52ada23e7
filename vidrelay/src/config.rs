use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::port::{DEFAULT_PORT, DEFAULT_PORT_COUNT};

/// How long the page may take to report ready
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);
/// How long the proxy-necessity probe may take
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
/// How long dispose waits for in-flight requests before aborting them
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/**
    Whether the synthesized page fetches media directly or through `/proxy`.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Probe the upstream and proxy only if it does not allow cross-origin reads
    #[default]
    Auto,
    /// Always route media through the proxy
    Always,
    /// Never route media through the proxy
    Never,
}

/**
    Relay configuration, supplied by the host when a player control is built.

    Durations deserialize from milliseconds.
*/
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// License key handed to the player script
    pub license_key: Option<String>,
    /// First loopback port to try
    pub port_start: u16,
    /// Number of consecutive ports to try
    pub port_count: u16,
    #[serde(deserialize_with = "millis")]
    pub init_timeout: Duration,
    #[serde(deserialize_with = "millis")]
    pub probe_timeout: Duration,
    #[serde(deserialize_with = "millis")]
    pub shutdown_grace: Duration,
    pub proxy_mode: ProxyMode,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            license_key: None,
            port_start: DEFAULT_PORT,
            port_count: DEFAULT_PORT_COUNT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            proxy_mode: ProxyMode::Auto,
        }
    }
}

impl RelayConfig {
    pub fn with_license_key(mut self, key: impl Into<String>) -> Self {
        self.license_key = Some(key.into());
        self
    }

    pub fn with_ports(mut self, start: u16, count: u16) -> Self {
        self.port_start = start;
        self.port_count = count;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_proxy_mode(mut self, mode: ProxyMode) -> Self {
        self.proxy_mode = mode;
        self
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}
