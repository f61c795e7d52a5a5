//! The downward boundary to the secure transport (spec §6).
//!
//! The engine never touches key exchange, ciphers, MAC, or compression —
//! it is handed an already-authenticated, already-encrypted duplex byte
//! channel and speaks SFTP frames over it. This module names that
//! boundary as a trait so the core engine crate carries no dependency on
//! any particular SSH implementation.

use tokio::io::{AsyncRead, AsyncWrite};

/// The bidirectional byte channel a secure transport hands the engine —
/// typically an SSH channel with the `sftp` subsystem requested.
///
/// Any `AsyncRead + AsyncWrite` type already satisfies this; it exists
/// only to name the capability spec §6 describes, the way the source
/// names `SubsystemStream` as its downward interface.
pub trait SubsystemStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SubsystemStream for T {}

/// The remote character set a session negotiated, used by the text-string
/// codec primitives (spec §4.1). Only UTF-8 is implemented; see
/// DESIGN.md's Open Question resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteCharset {
    #[default]
    Utf8,
}

/// Feature-gated adapter showing how a real secure-transport crate plugs
/// into [`SubsystemStream`] without the core engine depending on it.
#[cfg(feature = "russh-transport")]
pub mod russh_adapter {
    use std::path::Path;
    use std::sync::Arc;

    use russh::client::{self, Msg};
    use russh::keys::PrivateKeyWithHashAlg;
    use russh::keys::PublicKey;
    use russh::{Channel, ChannelMsg};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tracing::{debug, warn};

    const BRIDGE_BUFFER: usize = 64 * 1024;
    const READ_CHUNK: usize = 32 * 1024;

    /// Connects, authenticates with a private key, opens a channel, and
    /// requests the given subsystem (typically `"sftp"`).
    ///
    /// Returns one end of an in-process duplex pipe; a background task
    /// pumps bytes between the other end and the `russh` channel, so the
    /// returned stream is a plain [`super::SubsystemStream`] with no
    /// `russh` types in its signature.
    ///
    /// Grounded on `snow-owl-sftp::client::Client::connect`'s
    /// `channel_open_session` / `request_subsystem` sequence, generalized
    /// into a reusable adapter instead of a single-shot client method.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        key_path: &Path,
        subsystem: &str,
    ) -> Result<DuplexStream, russh::Error> {
        let key_pair = russh::keys::load_secret_key(key_path, None)
            .map_err(|e| russh::Error::IO(std::io::Error::other(e.to_string())))?;

        let config = Arc::new(client::Config::default());
        let mut session = client::connect(config, (host, port), InsecureHostKeyHandler).await?;

        let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key_pair), None);
        let auth = session.authenticate_publickey(username, key_with_alg).await?;
        if !auth.success() {
            return Err(russh::Error::NotAuthenticated);
        }

        let channel = session.channel_open_session().await?;
        channel.request_subsystem(true, subsystem).await?;

        let (local, remote) = tokio::io::duplex(BRIDGE_BUFFER);
        tokio::spawn(pump(channel, remote));

        Ok(local)
    }

    /// Accepts any server host key. Real callers must verify against
    /// `known_hosts`; that belongs to the authentication layer spec §1
    /// places out of scope for this crate.
    struct InsecureHostKeyHandler;

    impl client::Handler for InsecureHostKeyHandler {
        type Error = russh::Error;

        async fn check_server_key(
            &mut self,
            _server_public_key: &PublicKey,
        ) -> Result<bool, Self::Error> {
            warn!("accepting SSH server host key without verification");
            Ok(true)
        }
    }

    /// Shuttles bytes between the `russh` channel and the engine-facing
    /// half of the duplex pipe until either side closes.
    async fn pump(mut channel: Channel<Msg>, bridge: DuplexStream) {
        let (mut bridge_rx, mut bridge_tx) = tokio::io::split(bridge);
        let mut read_buf = vec![0u8; READ_CHUNK];

        loop {
            tokio::select! {
                msg = channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { data }) => {
                            if bridge_tx.write_all(&data).await.is_err() {
                                break;
                            }
                        }
                        Some(ChannelMsg::Eof | ChannelMsg::Close) | None => break,
                        Some(_) => {}
                    }
                }
                n = bridge_rx.read(&mut read_buf) => {
                    match n {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if channel.data(&read_buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        debug!("russh subsystem bridge task exiting");
    }
}
