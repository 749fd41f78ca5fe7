use super::*;

use std::borrow::Cow;

use async_ssh2_tokio::ServerCheckMethod;
use russh::{Preferred, kex};

use crate::config;

/// Algorithm preferences for a connection: the configured cipher and key
/// exchange restrictions, every supported host key, MAC and compression.
pub(super) fn preferred(config: &SshConfig) -> Preferred {
    let mut kex_order = config.resolved_key_exchanges();
    kex_order.push(kex::EXTENSION_SUPPORT_AS_CLIENT);
    kex_order.push(kex::EXTENSION_OPENSSH_STRICT_KEX_AS_CLIENT);

    Preferred {
        kex: Cow::Owned(kex_order),
        key: Cow::Borrowed(config::ALL_KEY_TYPES),
        cipher: Cow::Owned(config.resolved_ciphers()),
        mac: Cow::Borrowed(config::ALL_MAC_ALGORITHMS),
        compression: Cow::Borrowed(config::ALL_COMPRESSION_ALGORITHMS),
    }
}

/// Network gear is routinely re-imaged, so host keys are accepted unless strict checking is on.
pub(super) fn server_check(config: &SshConfig) -> ServerCheckMethod {
    if config.strict_host_key_checking {
        ServerCheckMethod::DefaultKnownHostsFile
    } else {
        ServerCheckMethod::NoCheck
    }
}
