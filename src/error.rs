//! Error types for SSH connection and session pool management.
//!
//! This module defines all errors that can surface from dialing a device,
//! allocating its shell, loading configuration, or handing work to the pool.
//! Read timeouts are deliberately absent: quiet-period and expect reads return
//! whatever was captured instead of failing.

use thiserror::Error;

/// Errors that can occur while connecting to a device or running commands on it.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Dialing or authenticating failed.
    ///
    /// [`SshConnector`](crate::session::SshConnector) reports every dial error this
    /// way; custom connectors should too.
    #[error("connection error: {0}")]
    Connection(String),

    /// The dial did not complete within the configured timeout.
    #[error("connect timeout: {0}")]
    ConnectTimeout(String),

    /// The pseudo-terminal or shell could not be allocated.
    ///
    /// The half-built session is discarded and never cached.
    #[error("session setup failed: {0}")]
    SessionSetup(String),

    /// The session has been closed.
    ///
    /// Produced when a write races a close or the writer task has stopped.
    /// Sessions log it instead of returning it.
    #[error("connect closed")]
    ConnectClosedError,

    /// A batch must contain at least one command, the first one frames the output.
    #[error("command batch is empty")]
    EmptyCommandBatch,

    /// The target address could not be parsed.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// The configuration is malformed or inconsistent.
    #[error("invalid config: {0}")]
    Config(String),

    /// An error occurred in the async-ssh2-tokio library.
    ///
    /// Lets custom connectors built on async-ssh2-tokio propagate with `?`.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json config error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml config error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("yaml config error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
