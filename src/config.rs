//! SSH configuration for the session pool.
//!
//! [`SshConfig`] is loaded once by the caller and captured immutably by the
//! pool. Field names follow the PascalCase keys used by existing deployment
//! files (`Ciphers`, `KeyExchanges`, `Timeout`, ...), which may be JSON, TOML
//! or YAML.
//!
//! The algorithm tables below list everything the transport can negotiate.
//! Configured cipher and key-exchange names are resolved against them; an empty
//! list in the configuration means "offer everything", which keeps legacy
//! switches reachable.

use std::path::Path;
use std::time::Duration;

use log::warn;
use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConnectError;

/// All supported key exchange algorithms in order of preference.
pub const ALL_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::DH_GEX_SHA256,
    kex::DH_GEX_SHA1,
    kex::DH_G14_SHA256,
    kex::DH_G14_SHA1,
    kex::DH_G16_SHA512,
    kex::DH_G1_SHA1,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
];

/// All supported cipher algorithms, including the CBC modes older switches require.
pub const ALL_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_192_CBC,
    cipher::AES_128_CBC,
];

pub const ALL_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
    mac::HMAC_SHA1,
];

pub const ALL_COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];

/// All supported host key algorithms, legacy RSA/DSA included.
pub const ALL_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
    Algorithm::Dsa,
];

/// PTY terminal modes sent with the pseudo-terminal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TerminalModes {
    /// Remote echo, `1` on and `0` off. Echo must stay on for output framing to find the command.
    #[serde(rename = "ECHO")]
    pub echo: u32,
    #[serde(rename = "TTY_OP_ISPEED")]
    pub tty_op_ispeed: u32,
    #[serde(rename = "TTY_OP_OSPEED")]
    pub tty_op_ospeed: u32,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            echo: 1,
            tty_op_ispeed: 14400,
            tty_op_ospeed: 14400,
        }
    }
}

/// Immutable configuration consumed by the pool and every session it opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase", default)]
pub struct SshConfig {
    /// Symmetric ciphers offered during negotiation. Empty means all supported.
    pub ciphers: Vec<String>,
    /// Key exchange algorithms offered during negotiation. Empty means all supported.
    pub key_exchanges: Vec<String>,
    /// Dial timeout in seconds.
    pub timeout: u64,
    pub terminal_modes: TerminalModes,
    /// Prompt terminators; every expect read and liveness probe stops on any of them.
    pub expects: Vec<String>,
    /// Log destinations for the hosting program. The library itself only emits `log` records.
    pub log_output_paths: Vec<String>,
    pub terminal_type: String,
    pub terminal_width: u32,
    pub terminal_height: u32,
    /// Quiet gap used when draining the login banner and after pagination commands.
    pub banner_wait_ms: u64,
    /// Quiet gap that ends the read of a command batch.
    pub command_quiet_ms: u64,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// Verify host keys against the default known_hosts file instead of accepting any key.
    pub strict_host_key_checking: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            ciphers: Vec::new(),
            key_exchanges: Vec::new(),
            timeout: 10,
            terminal_modes: TerminalModes::default(),
            expects: vec![">".to_string(), "]".to_string(), "#".to_string()],
            log_output_paths: Vec::new(),
            terminal_type: "vt100".to_string(),
            terminal_width: 80,
            terminal_height: 40,
            banner_wait_ms: 1000,
            command_quiet_ms: 2000,
            idle_timeout_secs: 10 * 60,
            sweep_interval_secs: 30,
            strict_host_key_checking: false,
        }
    }
}

impl SshConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConnectError> {
        let config: SshConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a TOML configuration document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConnectError> {
        let config: SshConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a YAML configuration document.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConnectError> {
        let config: SshConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file, choosing the format by extension
    /// (`.json`, `.toml`, `.yaml` or `.yml`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConnectError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_str(&raw),
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::from_toml_str(&raw),
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                Self::from_yaml_str(&raw)
            }
            _ => Err(ConnectError::Config(format!(
                "unsupported config format: {}",
                path.display()
            ))),
        }
    }

    /// Rejects configurations the pool cannot work with.
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.timeout == 0 {
            return Err(ConnectError::Config("Timeout must be positive".to_string()));
        }
        if self.expects.iter().all(|e| e.is_empty()) {
            return Err(ConnectError::Config(
                "Expects must contain at least one non-empty pattern".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConnectError::Config(
                "SweepIntervalSecs must be positive".to_string(),
            ));
        }
        if !self.ciphers.is_empty() && self.resolved_ciphers().is_empty() {
            return Err(ConnectError::Config(format!(
                "none of the configured ciphers are supported: {:?}",
                self.ciphers
            )));
        }
        if !self.key_exchanges.is_empty() && self.resolved_key_exchanges().is_empty() {
            return Err(ConnectError::Config(format!(
                "none of the configured key exchanges are supported: {:?}",
                self.key_exchanges
            )));
        }
        Ok(())
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn banner_wait(&self) -> Duration {
        Duration::from_millis(self.banner_wait_ms)
    }

    pub fn command_quiet_period(&self) -> Duration {
        Duration::from_millis(self.command_quiet_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Non-empty expect patterns.
    pub fn prompt_terminators(&self) -> Vec<String> {
        self.expects
            .iter()
            .filter(|e| !e.is_empty())
            .cloned()
            .collect()
    }

    /// Configured ciphers mapped onto the supported table, in configured order.
    pub fn resolved_ciphers(&self) -> Vec<cipher::Name> {
        resolve_names("cipher", &self.ciphers, ALL_CIPHERS)
    }

    /// Configured key exchanges mapped onto the supported table, in configured order.
    pub fn resolved_key_exchanges(&self) -> Vec<kex::Name> {
        resolve_names("key exchange", &self.key_exchanges, ALL_KEX_ORDER)
    }
}

fn resolve_names<N>(kind: &str, wanted: &[String], supported: &[N]) -> Vec<N>
where
    N: Copy + AsRef<str>,
{
    if wanted.is_empty() {
        return supported.to_vec();
    }
    let mut resolved = Vec::with_capacity(wanted.len());
    for name in wanted {
        match supported
            .iter()
            .find(|candidate| candidate.as_ref().eq_ignore_ascii_case(name.trim()))
        {
            Some(found) => resolved.push(*found),
            None => warn!("Unsupported {kind} '{name}' ignored"),
        }
    }
    resolved
}
