//! Network link management.
//!
//! Brings the station link up at startup and keeps asking for it back when
//! it drops. Reconnect requests are throttled to the link poll interval.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::LinkCredentials;
use crate::error::{Error, Result};

/// State of the network link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    /// No usable link.
    #[default]
    Down,
    /// A reconnect request is in flight.
    Connecting,
    /// Link is up.
    Up,
}

impl LinkState {
    /// Check if the link is up.
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Up)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Down => write!(f, "Down"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Up => write!(f, "Up"),
        }
    }
}

/// A network link the bridge serves clients over.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkLink: Send {
    /// Current link state.
    fn state(&mut self) -> LinkState;

    /// Start reconnecting without waiting for the result.
    fn request_reconnect(&mut self) -> Result<()>;

    /// Connect and wait until the link is up or the attempt fails.
    async fn connect(&mut self) -> Result<()>;
}

/// Retry policy for the startup connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between attempts.
    pub delay: Duration,
    /// Give up after this many attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Retry forever.
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Retry at most `max_attempts` times.
    pub fn bounded(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts),
        }
    }
}

/// Connect `link`, retrying per `policy`.
///
/// Returns the number of attempts it took.
///
/// # Errors
///
/// Returns [`Error::RetriesExhausted`] if a bounded policy runs out.
pub async fn connect_with_retry<L>(link: &mut L, policy: &RetryPolicy) -> Result<u32>
where
    L: NetworkLink + ?Sized,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        debug!("Link connection attempt {}", attempts);

        match link.connect().await {
            Ok(()) => {
                info!("Network link up after {} attempt(s)", attempts);
                return Ok(attempts);
            }
            Err(e) => {
                warn!("Link connection attempt {} failed: {}", attempts, e);

                if policy.max_attempts.is_some_and(|max| attempts >= max) {
                    return Err(Error::RetriesExhausted { attempts });
                }

                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

/// Limits reconnect requests to one per interval.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectThrottle {
    interval: Duration,
    last_attempt: Option<Instant>,
}

impl ReconnectThrottle {
    /// Create a throttle allowing one attempt per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_attempt: None,
        }
    }

    /// Check if a new attempt is allowed at `now`.
    pub fn should_attempt(&self, now: Instant) -> bool {
        match self.last_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Record an attempt made at `now`.
    pub fn record_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }

    /// Time of the last recorded attempt.
    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }
}

/// Wi-Fi station link driven through NetworkManager.
///
/// Link state comes from the kernel's `operstate` for the interface;
/// connecting runs `nmcli device wifi connect`.
pub struct StationLink {
    credentials: LinkCredentials,
    connect_timeout: Duration,
    sysfs_root: PathBuf,
    program: PathBuf,
    pending: Option<Child>,
}

impl StationLink {
    /// Create a link for the given credentials.
    pub fn new(credentials: LinkCredentials, connect_timeout: Duration) -> Self {
        Self {
            credentials,
            connect_timeout,
            sysfs_root: PathBuf::from("/sys/class/net"),
            program: PathBuf::from("nmcli"),
            pending: None,
        }
    }

    /// Read interface state from a different sysfs root.
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    /// Run a different NetworkManager client in place of `nmcli`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments passed to `nmcli` to join the network.
    pub fn nmcli_args(&self) -> Vec<String> {
        let creds = &self.credentials;
        let mut args = vec![
            "device".to_string(),
            "wifi".to_string(),
            "connect".to_string(),
            creds.ssid.clone(),
        ];
        if creds.auth_mode.requires_passphrase() {
            args.push("password".to_string());
            args.push(creds.passphrase.clone());
        }
        args.push("ifname".to_string());
        args.push(creds.interface.clone());
        args
    }

    fn interface_up(&self) -> bool {
        let path = self
            .sysfs_root
            .join(&self.credentials.interface)
            .join("operstate");
        std::fs::read_to_string(path)
            .map(|s| s.trim() == "up")
            .unwrap_or(false)
    }

    fn nmcli(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.nmcli_args())
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    fn reconnect_in_flight(&mut self) -> bool {
        match self.pending.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            _ => {
                self.pending = None;
                false
            }
        }
    }
}

#[async_trait]
impl NetworkLink for StationLink {
    fn state(&mut self) -> LinkState {
        if self.interface_up() {
            LinkState::Up
        } else if self.reconnect_in_flight() {
            LinkState::Connecting
        } else {
            LinkState::Down
        }
    }

    fn request_reconnect(&mut self) -> Result<()> {
        if !self.credentials.is_configured() {
            debug!("No SSID configured, leaving link to the system");
            return Ok(());
        }
        if self.reconnect_in_flight() {
            debug!("Reconnect already in flight");
            return Ok(());
        }

        info!(
            "Requesting reconnect to '{}' ({}) on {}",
            self.credentials.ssid, self.credentials.auth_mode, self.credentials.interface
        );
        self.pending = Some(self.nmcli().spawn()?);
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        if !self.credentials.is_configured() {
            if !self.interface_up() {
                info!(
                    "No SSID configured, not waiting for {} to come up",
                    self.credentials.interface
                );
            }
            return Ok(());
        }

        info!("Connecting to Wi-Fi '{}'...", self.credentials.ssid);

        let status = tokio::time::timeout(self.connect_timeout, self.nmcli().status())
            .await
            .map_err(|_| Error::LinkFailed {
                reason: format!("timed out after {:?}", self.connect_timeout),
            })??;

        if !status.success() {
            return Err(Error::LinkFailed {
                reason: format!("nmcli exited with {}", status),
            });
        }

        if self.interface_up() {
            Ok(())
        } else {
            Err(Error::LinkFailed {
                reason: format!("interface {} is not up", self.credentials.interface),
            })
        }
    }
}
