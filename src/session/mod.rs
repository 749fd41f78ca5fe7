//! Pooled interactive shell sessions.
//!
//! This module turns an SSH shell, which is just an unframed byte stream, into
//! something batch jobs can call repeatedly: connections are cached per
//! credentials and address, validated with a liveness probe before reuse, and
//! evicted after a period of inactivity.
//!
//! # Main Components
//!
//! - [`SessionPool`] - Session cache with per-key serialization and idle sweep
//! - [`ShellSession`] - One interactive shell with quiet-period and expect reads
//! - [`Connector`] - Seam for opening shells; [`SshConnector`] is the SSH implementation
//! - [`Target`] / [`SessionKey`] - Who to talk to, and which cached session serves it

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use log::{debug, trace, warn};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::config::SshConfig;
use crate::device::DeviceFamily;
use crate::error::ConnectError;
use crate::framer::frame_output;

pub use transport::{Connector, ShellTransport, SshConnector, TransportHandle};

/// A device to run commands on.
#[derive(Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Declared vendor family; [`DeviceFamily::Unknown`] asks the session to detect it.
    pub family: DeviceFamily,
}

/// Identity of a cached session.
///
/// Derived from username, password and address only, so calls that declare
/// different families for the same device share one connection. Displays as
/// `user@host:port`; the password only contributes to the digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    addr: String,
    digest: [u8; 32],
}

/// Lifecycle of a [`ShellSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Shell allocated, login banner not drained yet.
    Connecting,
    Ready,
    /// Terminal. A closed session is never handed out again.
    Closed,
}

/// One interactive shell on a device.
///
/// A reader task pushes every chunk received from the shell onto the inbound
/// queue and a writer task sends every queued command followed by a newline.
/// Reads never fail: they poll the inbound queue and return what they captured
/// once the device has gone quiet or printed an expected pattern.
pub struct ShellSession {
    label: String,
    config: Arc<SshConfig>,
    handle: Box<dyn TransportHandle>,
    outbound: Mutex<Option<Sender<String>>>,
    inbound: Mutex<Receiver<String>>,
    state: AtomicU8,
    family: OnceLock<DeviceFamily>,
    opened_at: Instant,
    /// Milliseconds after `opened_at` of the last use.
    last_used_ms: AtomicU64,
}

/// Cache of interactive sessions keyed by [`SessionKey`].
///
/// Every get-or-create-and-use sequence for one key runs under that key's
/// mutex, so concurrent callers for the same device are serialized onto a
/// single connection while different devices proceed in parallel.
pub struct SessionPool {
    connector: Arc<dyn Connector>,
    config: Arc<SshConfig>,
    sessions: RwLock<HashMap<SessionKey, Arc<ShellSession>>>,
    key_locks: RwLock<HashMap<SessionKey, Arc<Mutex<()>>>>,
}

impl Target {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            family: DeviceFamily::Unknown,
        }
    }

    /// Builds a target from a `host:port` string; a missing port means 22.
    ///
    /// IPv6 addresses must be bracketed when a port is given (`[fe80::1]:22`).
    pub fn from_host_port(
        username: impl Into<String>,
        password: impl Into<String>,
        host_port: &str,
    ) -> Result<Self, ConnectError> {
        let host_port = host_port.trim();
        let (host, port) = if let Some(rest) = host_port.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| ConnectError::InvalidTarget(host_port.to_string()))?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(ConnectError::InvalidTarget(host_port.to_string())),
            }
        } else if host_port.matches(':').count() == 1 {
            let (host, port) = host_port
                .split_once(':')
                .ok_or_else(|| ConnectError::InvalidTarget(host_port.to_string()))?;
            (host, Some(port))
        } else {
            (host_port, None)
        };

        if host.is_empty() {
            return Err(ConnectError::InvalidTarget(host_port.to_string()));
        }
        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| ConnectError::InvalidTarget(host_port.to_string()))?,
            None => 22,
        };
        Ok(Self::new(username, password, host, port))
    }

    pub fn with_family(mut self, family: DeviceFamily) -> Self {
        self.family = family;
        self
    }

    /// `user@host:port`, used in logs.
    pub fn device_addr(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.username, &self.password, &self.host, self.port)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("family", &self.family)
            .finish()
    }
}

impl SessionKey {
    pub fn new(username: &str, password: &str, host: &str, port: u16) -> Self {
        let addr = format!("{username}@{host}:{port}");
        let mut hasher = Sha256::new();
        hasher.update(username.as_bytes());
        hasher.update([0u8]);
        hasher.update(password.as_bytes());
        hasher.update([0u8]);
        hasher.update(format!("{host}:{port}").as_bytes());
        Self {
            addr,
            digest: hasher.finalize().into(),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Ready,
            _ => SessionState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionState::Connecting => 0,
            SessionState::Ready => 1,
            SessionState::Closed => 2,
        }
    }
}

mod client;
mod manager;
mod security;
mod transport;
