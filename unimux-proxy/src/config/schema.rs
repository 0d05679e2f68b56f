//! Configuration schema structs

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Well-known loopback port shared by every proxy instance
pub const DEFAULT_HUB_PORT: u16 = 19542;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub hub: HubConfig,
    pub resolver: ResolverConfig,
    pub downstream: DownstreamConfig,
}

impl AppConfig {
    /// Address of the shared hub listener
    pub fn hub_addr(&self) -> SocketAddr {
        SocketAddr::new(self.hub.host, self.hub.port)
    }

    /// Bounded timeout for the role resolver's connect attempt
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.resolver.connect_timeout_ms)
    }

    /// Randomized delay after losing the race to become hub
    pub fn race_backoff(&self) -> Duration {
        let min = self.resolver.race_backoff_min_ms;
        let max = self.resolver.race_backoff_max_ms.max(min);
        Duration::from_millis(fastrand::u64(min..=max))
    }

    /// Delay before re-resolving after the hub link drops
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.resolver.reconnect_delay_ms)
    }
}

/// Hub listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    /// Listener host, must be a loopback address
    pub host: IpAddr,
    /// Listener port shared by all instances
    pub port: u16,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_HUB_PORT,
        }
    }
}

/// Role resolution timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolverConfig {
    /// Connect attempt timeout in milliseconds (default: 2000)
    pub connect_timeout_ms: u64,
    /// Lower bound of the backoff after a lost bind race (default: 500)
    pub race_backoff_min_ms: u64,
    /// Upper bound of the backoff after a lost bind race (default: 1000)
    pub race_backoff_max_ms: u64,
    /// Wait before re-resolving once the hub link drops (default: 1000)
    pub reconnect_delay_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2000,
            race_backoff_min_ms: 500,
            race_backoff_max_ms: 1000,
            reconnect_delay_ms: 1000,
        }
    }
}

/// The wrapped downstream tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Program to launch
    pub command: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Launch through the platform shell (`sh -c` / `cmd /C`)
    pub shell: bool,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            command: "npx".into(),
            args: vec!["-y".into(), "@satelliteoflove/godot-mcp".into()],
            shell: true,
        }
    }
}

impl DownstreamConfig {
    /// Full command line, quoted for a POSIX shell
    ///
    /// Used for logging and for `sh -c` launches.
    pub fn command_line(&self) -> String {
        shell_words::join(std::iter::once(&self.command).chain(&self.args))
    }
}
