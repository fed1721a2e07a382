// ABOUTME: Client configuration for one remote test host.
// ABOUTME: Carries host identity, credentials, global env, and dial/reconnect tuning.

use crate::ssh::HostTrust;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one remote host, immutable for the client's lifetime.
///
/// Provisioning collaborators construct this via the builder methods or
/// deserialize it from their own config files.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Public address used for dialing (IP or resolvable name).
    pub host: String,
    /// Secure-shell port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Optional public DNS name. When present it is the host's identity for
    /// logging, retry keys, and the transfer tool's remote argument.
    #[serde(default)]
    pub dns_name: Option<String>,
    /// Username for authentication.
    /// "ec2-user" for Amazon Linux 2, "ubuntu" for Ubuntu images.
    pub user: String,
    /// Path to the private key file.
    pub key_path: PathBuf,
    /// Server key trust policy. Required; there is no implicit bypass.
    pub trust: HostTrust,
    /// Environment variables applied to every command.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Number of dial attempts before `connect` gives up.
    #[serde(default = "default_dial_attempts")]
    pub dial_attempts: u32,
    /// Cap on a single dial attempt.
    #[serde(default = "default_dial_timeout", with = "humantime_serde")]
    pub dial_timeout: Duration,
    /// Pause between dial attempts.
    #[serde(default = "default_dial_retry_delay", with = "humantime_serde")]
    pub dial_retry_delay: Duration,
    /// Full connect cycles a retrying operation may spend reconnecting
    /// before it surfaces `ReconnectExhausted`.
    #[serde(default = "default_reconnect_cycles")]
    pub reconnect_cycles: u32,
}

fn default_port() -> u16 {
    22
}

fn default_dial_attempts() -> u32 {
    15
}

fn default_dial_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_dial_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_reconnect_cycles() -> u32 {
    5
}

impl ClientConfig {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        key_path: impl Into<PathBuf>,
        trust: HostTrust,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            dns_name: None,
            user: user.into(),
            key_path: key_path.into(),
            trust,
            env: HashMap::new(),
            dial_attempts: default_dial_attempts(),
            dial_timeout: default_dial_timeout(),
            dial_retry_delay: default_dial_retry_delay(),
            reconnect_cycles: default_reconnect_cycles(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn dns_name(mut self, name: impl Into<String>) -> Self {
        self.dns_name = Some(name.into());
        self
    }

    /// Set an environment variable applied to every command.
    pub fn env_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn dial_attempts(mut self, attempts: u32) -> Self {
        self.dial_attempts = attempts;
        self
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn dial_retry_delay(mut self, delay: Duration) -> Self {
        self.dial_retry_delay = delay;
        self
    }

    pub fn reconnect_cycles(mut self, cycles: u32) -> Self {
        self.reconnect_cycles = cycles;
        self
    }

    /// The host's identity: the DNS name when known, the dial address otherwise.
    pub fn target(&self) -> &str {
        self.dns_name.as_deref().unwrap_or(&self.host)
    }
}
