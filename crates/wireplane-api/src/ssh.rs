// SSH transport over russh.
//
// One `SshLink` owns one authenticated session and one opened channel:
// the `netconf` subsystem for NETCONF, a shell with PTY for CLI
// drivers. Host keys are checked against the target's pinning policy
// inside the russh handler, before authentication.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key;
use secrecy::ExposeSecret;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::link::Link;
use crate::target::{Credentials, HostKeyPolicy, Target};

/// What to request on the opened channel.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ChannelMode {
    /// `subsystem` request, e.g. `netconf`.
    Subsystem(&'static str),
    /// PTY plus interactive shell, for prompt-driven CLIs.
    Shell,
}

struct HostKeyCheck {
    policy: HostKeyPolicy,
    endpoint: String,
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        match &self.policy {
            HostKeyPolicy::AcceptAny => {
                warn!(
                    endpoint = %self.endpoint,
                    %fingerprint,
                    "accepting SSH host key without verification"
                );
                Ok(true)
            }
            HostKeyPolicy::Fingerprints(_) if self.policy.allows(&fingerprint) => {
                trace!(endpoint = %self.endpoint, %fingerprint, "host key pin matched");
                Ok(true)
            }
            HostKeyPolicy::Fingerprints(_) => {
                warn!(
                    endpoint = %self.endpoint,
                    %fingerprint,
                    "rejecting unpinned SSH host key"
                );
                Ok(false)
            }
        }
    }
}

/// [`Link`] over one SSH channel.
pub(crate) struct SshLink {
    handle: Handle<HostKeyCheck>,
    channel: Channel<Msg>,
    closed: bool,
}

impl SshLink {
    /// Connect, verify the host key, authenticate, and open the
    /// requested channel. The whole sequence runs under the target's
    /// connect timeout.
    pub(crate) async fn connect(target: &Target, mode: ChannelMode) -> Result<Self, Error> {
        let endpoint = target.endpoint();
        tokio::time::timeout(target.connect_timeout, Self::establish(target, mode, &endpoint))
            .await
            .map_err(|_| Error::Timeout { after: target.connect_timeout })?
    }

    async fn establish(
        target: &Target,
        mode: ChannelMode,
        endpoint: &str,
    ) -> Result<Self, Error> {
        let config = Arc::new(client::Config::default());
        let handler = HostKeyCheck {
            policy: target.host_key.clone(),
            endpoint: endpoint.to_owned(),
        };

        let mut handle =
            client::connect(config, (target.host.as_str(), target.port), handler)
                .await
                .map_err(|e| match e {
                    russh::Error::UnknownKey => {
                        Error::security(endpoint, "SSH host key rejected by pinning policy")
                    }
                    other => Error::connect(endpoint, other.to_string()),
                })?;

        authenticate(&mut handle, target, endpoint).await?;

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| Error::connect(endpoint, format!("channel open failed: {e}")))?;

        match mode {
            ChannelMode::Subsystem(name) => {
                channel.request_subsystem(false, name).await?;
                debug!(endpoint, subsystem = name, "SSH subsystem channel open");
            }
            ChannelMode::Shell => {
                channel.request_pty(false, "vt100", 256, 64, 0, 0, &[]).await?;
                channel.request_shell(false).await?;
                debug!(endpoint, "SSH shell channel open");
            }
        }

        Ok(Self { handle, channel, closed: false })
    }
}

async fn authenticate(
    handle: &mut Handle<HostKeyCheck>,
    target: &Target,
    endpoint: &str,
) -> Result<(), Error> {
    let authenticated = match &target.credentials {
        Credentials::Password { username, password } => {
            handle.authenticate_password(username, password.expose_secret()).await?
        }
        Credentials::PrivateKey { username, key_pem, passphrase } => {
            let pair = russh_keys::decode_secret_key(
                key_pem.expose_secret(),
                passphrase.as_ref().map(ExposeSecret::expose_secret),
            )?;
            handle.authenticate_publickey(username, Arc::new(pair)).await?
        }
        Credentials::Anonymous => {
            return Err(Error::connect(endpoint, "SSH requires credentials"));
        }
    };
    if !authenticated {
        return Err(Error::connect(endpoint, "authentication rejected by server"));
    }
    Ok(())
}

#[async_trait]
impl Link for SshLink {
    async fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.channel.data(data).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, Error> {
        if self.closed {
            return Ok(None);
        }
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    return Ok(Some(Bytes::copy_from_slice(&data)));
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    // stderr noise never carries protocol frames.
                    trace!(ext, len = data.len(), "ignoring extended data");
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    trace!(exit_status, "remote reported exit status");
                }
                Some(ChannelMsg::Eof | ChannelMsg::Close) | None => return Ok(None),
                Some(_) => {}
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = self.channel.eof().await;
        let _ = self.handle.disconnect(Disconnect::ByApplication, "", "en").await;
        Ok(())
    }
}
