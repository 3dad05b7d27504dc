//! Bridge configuration.
//!
//! Network credentials are baked in at build time through environment
//! variables read with `option_env!`; everything else has a default that
//! matches the reference deployment.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ble::advertising::MagicTemplate;
use crate::ble::uuids::FLAGS_LE_GENERAL_DISCOVERABLE;
use crate::error::{Error, Result};

/// Default WebSocket listening port.
pub const DEFAULT_PORT: u16 = 80;

/// Maximum number of simultaneous WebSocket clients.
pub const MAX_CLIENTS: usize = 4;

/// Outbound batches a client may have queued before it counts as stalled.
pub const CLIENT_QUEUE_CAPACITY: usize = 32;

/// Period between link-health checks, in milliseconds.
pub const WIFI_STATUS_POLL_MS: u64 = 1000;

/// Time allowed for one blocking link connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between blocking link connection attempts at startup.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Network interface used when none is configured.
pub const DEFAULT_INTERFACE: &str = "wlan0";

/// Station authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AuthMode {
    /// No authentication.
    Open,
    /// WPA2 personal (AES/CCMP pre-shared key).
    #[default]
    Wpa2Psk,
    /// WPA3 personal (SAE).
    Wpa3Sae,
}

impl AuthMode {
    /// Check if this mode needs a passphrase.
    pub fn requires_passphrase(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl FromStr for AuthMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "open" | "none" => Ok(Self::Open),
            "wpa2" | "wpa2-psk" | "wpa2_aes_psk" => Ok(Self::Wpa2Psk),
            "wpa3" | "wpa3-sae" | "sae" => Ok(Self::Wpa3Sae),
            _ => Err(Error::InvalidParameter {
                name: "auth_mode".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Wpa2Psk => write!(f, "wpa2-psk"),
            Self::Wpa3Sae => write!(f, "wpa3-sae"),
        }
    }
}

/// Station credentials for the network link.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinkCredentials {
    /// Network SSID. Empty means the link is managed outside the bridge.
    pub ssid: String,
    /// Passphrase (ignored for open networks).
    pub passphrase: String,
    /// Authentication mode.
    pub auth_mode: AuthMode,
    /// Network interface carrying the link.
    pub interface: String,
}

impl LinkCredentials {
    /// Credentials compiled into the binary.
    pub fn from_build_env() -> Self {
        Self {
            ssid: option_env!("BRIDGE_WIFI_SSID").unwrap_or_default().to_string(),
            passphrase: option_env!("BRIDGE_WIFI_PASSWORD")
                .unwrap_or_default()
                .to_string(),
            auth_mode: option_env!("BRIDGE_WIFI_AUTH")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            interface: option_env!("BRIDGE_WIFI_IFACE")
                .unwrap_or(DEFAULT_INTERFACE)
                .to_string(),
        }
    }

    /// Check if an SSID was configured.
    pub fn is_configured(&self) -> bool {
        !self.ssid.is_empty()
    }
}

impl Default for LinkCredentials {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            passphrase: String::new(),
            auth_mode: AuthMode::default(),
            interface: DEFAULT_INTERFACE.to_string(),
        }
    }
}

impl fmt::Debug for LinkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkCredentials")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .field("auth_mode", &self.auth_mode)
            .field("interface", &self.interface)
            .finish()
    }
}

/// Configuration for the bridge.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BridgeConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: SocketAddr,
    /// Maximum simultaneous clients.
    pub max_clients: usize,
    /// Advertisement template identifying sensor broadcasts.
    pub template: MagicTemplate,
    /// Flags value assumed when rebuilding advertisements from host reports.
    pub assumed_flags: u8,
    /// Period between link-health checks.
    pub link_poll_interval: Duration,
    /// Station credentials.
    pub link: LinkCredentials,
    /// Timeout for one blocking link connection attempt.
    pub connect_timeout: Duration,
    /// Pause between startup connection attempts.
    pub connect_retry_delay: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_clients: MAX_CLIENTS,
            template: MagicTemplate::bthome(),
            assumed_flags: FLAGS_LE_GENERAL_DISCOVERABLE,
            link_poll_interval: Duration::from_millis(WIFI_STATUS_POLL_MS),
            link: LinkCredentials::default(),
            connect_timeout: CONNECT_TIMEOUT,
            connect_retry_delay: CONNECT_RETRY_DELAY,
        }
    }
}

impl BridgeConfig {
    /// Build the configuration from compiled-in credentials and the runtime
    /// `BRIDGE_PORT` override.
    ///
    /// # Errors
    ///
    /// Returns an error if `BRIDGE_PORT` is set but is not a valid port.
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            link: LinkCredentials::from_build_env(),
            ..Default::default()
        };

        if let Ok(port) = std::env::var("BRIDGE_PORT") {
            config.set_port(&port)?;
        }

        Ok(config)
    }

    /// Override the listening port from a string.
    pub fn set_port(&mut self, port: &str) -> Result<()> {
        let port: u16 = port.trim().parse().map_err(|_| Error::InvalidParameter {
            name: "BRIDGE_PORT".to_string(),
            value: port.to_string(),
        })?;
        self.bind_addr.set_port(port);
        Ok(())
    }
}
