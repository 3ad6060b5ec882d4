//! Node and relay parameter models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;

use crate::core::request::ValidationError;

/// Address used for bare static host entries
pub const LOOPBACK: &str = "127.0.0.1";

/// A remote host participating in the relay chain
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Node {
    /// Host address, also the node's identity within a request
    #[serde(alias = "ip")]
    pub address: String,

    /// Password used to authenticate the login user; empty when the
    /// configured key or agent is used instead
    #[serde(default, alias = "password")]
    pub credential: String,

    /// Login user (falls back to the configured SSH user)
    #[serde(default)]
    pub user: Option<String>,
}

impl Node {
    pub fn new(address: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            credential: credential.into(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Login user for this node, given the configured default
    pub fn login_user<'a>(&'a self, default_user: &'a str) -> &'a str {
        self.user.as_deref().unwrap_or(default_user)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("credential", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

/// Position of a node in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Forwards relay traffic to the next node
    Intermediate,
    /// Runs the egress service where traffic leaves the chain
    Terminal,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Intermediate => write!(f, "intermediate"),
            Role::Terminal => write!(f, "terminal"),
        }
    }
}

/// AEAD cipher shared by every hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cipher {
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "aes-128-gcm")]
    Aes128Gcm,
    Chacha20IetfPoly1305,
}

impl Cipher {
    /// Method name understood by the egress service
    pub fn egress_name(&self) -> &'static str {
        match self {
            Cipher::Aes256Gcm => "aes-256-gcm",
            Cipher::Aes128Gcm => "aes-128-gcm",
            Cipher::Chacha20IetfPoly1305 => "chacha20-ietf-poly1305",
        }
    }

    /// Method name understood by the forwarding relay container
    pub fn relay_name(&self) -> &'static str {
        match self {
            Cipher::Aes256Gcm => "AEAD_AES_256_GCM",
            Cipher::Aes128Gcm => "AEAD_AES_128_GCM",
            Cipher::Chacha20IetfPoly1305 => "AEAD_CHACHA20_POLY1305",
        }
    }
}

/// Relay parameters shared across all nodes in one request
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct RelayConfig {
    /// Shared secret for every hop
    #[serde(alias = "password")]
    pub secret: String,

    /// Relay and egress service port
    pub port: u16,

    #[serde(default)]
    pub cipher: Cipher,
}

impl RelayConfig {
    pub fn new(secret: impl Into<String>, port: u16) -> Self {
        Self {
            secret: secret.into(),
            port,
            cipher: Cipher::default(),
        }
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("secret", &"<redacted>")
            .field("port", &self.port)
            .field("cipher", &self.cipher)
            .finish()
    }
}

/// A hosts-file line pinning a hostname to an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaticHostEntry {
    pub hostname: String,
    pub address: String,
}

fn hostname_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9\-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9\-]{0,61}[A-Za-z0-9])?)*$")
            .expect("hostname pattern is valid")
    })
}

fn user_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").expect("user pattern is valid"))
}

/// An IP address or a DNS hostname
pub(crate) fn is_valid_address(address: &str) -> bool {
    address.parse::<IpAddr>().is_ok() || hostname_pattern().is_match(address)
}

/// A POSIX login name
pub(crate) fn is_valid_user(user: &str) -> bool {
    user_pattern().is_match(user)
}

impl StaticHostEntry {
    pub fn new(hostname: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            address: address.into(),
        }
    }

    /// Parse `hostname:address` or a bare `hostname` (pinned to loopback)
    pub fn parse(entry: &str) -> Result<Self, ValidationError> {
        let entry = entry.trim();
        let (hostname, address) = match entry.split_once(':') {
            Some((hostname, address)) => (hostname.trim(), address.trim()),
            None => (entry, LOOPBACK),
        };

        if !hostname_pattern().is_match(hostname) {
            return Err(ValidationError::InvalidHostEntry {
                entry: entry.to_string(),
                reason: format!("'{}' is not a valid hostname", hostname),
            });
        }
        if address.parse::<IpAddr>().is_err() {
            return Err(ValidationError::InvalidHostEntry {
                entry: entry.to_string(),
                reason: format!("'{}' is not an IP address", address),
            });
        }

        Ok(Self::new(hostname, address))
    }
}

/// Fixed allow-list of addresses pinned for a named upstream domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamAllowList {
    pub domain: String,
    pub addresses: Vec<String>,
}

impl UpstreamAllowList {
    /// Hosts-file entries for every pinned address
    pub fn entries(&self) -> Vec<StaticHostEntry> {
        self.addresses
            .iter()
            .map(|address| StaticHostEntry::new(self.domain.clone(), address.clone()))
            .collect()
    }
}
