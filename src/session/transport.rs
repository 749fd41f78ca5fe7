use super::*;

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_trait::async_trait;
use russh::Pty;
use tokio::io::{AsyncRead, AsyncWrite};

/// Raw byte halves of an allocated interactive shell plus the handle that closes it.
pub struct ShellTransport {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub handle: Box<dyn TransportHandle>,
}

/// Closes the connection underneath a shell.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    async fn close(&self);
}

/// Opens an authenticated shell with a pseudo-terminal on a target.
///
/// Dial and authentication failures map to connection errors; PTY or shell
/// allocation failures map to [`ConnectError::SessionSetup`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        target: &Target,
        config: &SshConfig,
    ) -> Result<ShellTransport, ConnectError>;
}

/// [`Connector`] over SSH, using password authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

struct SshHandle {
    client: Client,
    device_addr: String,
}

#[async_trait]
impl TransportHandle for SshHandle {
    async fn close(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("{} Error disconnecting: {:?}", self.device_addr, e);
        }
        debug!("{} SSH connection closed", self.device_addr);
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        target: &Target,
        config: &SshConfig,
    ) -> Result<ShellTransport, ConnectError> {
        let device_addr = target.device_addr();
        debug!("{} Begin connect", device_addr);

        let ssh_config = async_ssh2_tokio::Config {
            preferred: security::preferred(config),
            // Pooled sessions sit idle between batches; keepalives detect dead peers instead.
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let dial = Client::connect_with_config(
            (target.host.clone(), target.port),
            &target.username,
            AuthMethod::with_password(&target.password),
            security::server_check(config),
            ssh_config,
        );
        let client = tokio::time::timeout(config.dial_timeout(), dial)
            .await
            .map_err(|_| ConnectError::ConnectTimeout(device_addr.clone()))?
            .map_err(|e| ConnectError::Connection(format!("{device_addr} {e}")))?;
        debug!("{} TCP connection successful", device_addr);

        let channel = client
            .get_channel()
            .await
            .map_err(|e| ConnectError::SessionSetup(format!("{device_addr} open channel: {e}")))?;

        let modes = [
            (Pty::ECHO, config.terminal_modes.echo),
            (Pty::TTY_OP_ISPEED, config.terminal_modes.tty_op_ispeed),
            (Pty::TTY_OP_OSPEED, config.terminal_modes.tty_op_ospeed),
        ];
        channel
            .request_pty(
                false,
                &config.terminal_type,
                config.terminal_width,
                config.terminal_height,
                0,
                0,
                &modes,
            )
            .await
            .map_err(|e| ConnectError::SessionSetup(format!("{device_addr} request pty: {e}")))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| ConnectError::SessionSetup(format!("{device_addr} request shell: {e}")))?;
        debug!("{} Shell request successful", device_addr);

        let (reader, writer) = tokio::io::split(channel.into_stream());
        Ok(ShellTransport {
            reader: Box::new(reader),
            writer: Box::new(writer),
            handle: Box::new(SshHandle {
                client,
                device_addr,
            }),
        })
    }
}
