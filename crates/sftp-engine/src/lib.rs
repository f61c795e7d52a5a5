//! # sftp-engine
//!
//! A client-side SFTP (SSH File Transfer Protocol) engine implementing
//! protocol version 3, as defined in `draft-ietf-secsh-filexfer-02`.
//!
//! The engine runs atop an already-established secure shell session: it
//! consumes an opaque, already-authenticated, already-encrypted duplex
//! byte stream (a [`transport::SubsystemStream`]) and speaks the SFTP wire
//! protocol over it. Key exchange, ciphers, authentication, and the
//! `known_hosts` trust model all live outside this crate; see
//! [`transport`] for the boundary and its optional `russh` adapter.
//!
//! ## Layout
//!
//! - [`codec`] / [`framer`] — wire-level field and frame primitives.
//! - [`protocol`] — typed packet, status, and attribute definitions.
//! - [`request_table`] / [`reader`] / [`writer`] — the concurrent
//!   request/response multiplexer over the single duplex stream.
//! - [`engine`] — the orchestrator exposing the operation surface.
//! - [`handle`] — `RemoteFile`/`RemoteDirectory` handle objects.
//! - [`path`] — pure path-string algebra for the remote namespace.
//! - [`options`] — engine configuration.
//! - [`error`] — the crate's error taxonomy.
//!
//! ## Example
//!
//! ```no_run
//! use sftp_engine::{Engine, EngineOptions, OpenMode, FileAttributes};
//!
//! # async fn run(stream: impl sftp_engine::SubsystemStream + 'static) -> sftp_engine::Result<()> {
//! tracing_subscriber::fmt::init();
//!
//! let engine = Engine::connect(stream, EngineOptions::default()).await?;
//! let attrs = engine.stat("/etc/hostname").await?;
//! println!("size = {:?}", attrs.size);
//!
//! let file = engine.open("/etc/hostname", OpenMode(OpenMode::READ), &FileAttributes::default()).await?;
//! let data = file.read(0, 4096).await?;
//! file.close().await?;
//! println!("read {} bytes", data.len());
//!
//! engine.close().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod engine;
pub mod error;
pub mod framer;
pub mod handle;
pub mod options;
pub mod path;
pub mod protocol;
pub mod reader;
pub mod request_table;
pub mod transport;
pub mod writer;

pub use engine::{Engine, ExtendedRequestBuilder};
pub use error::{Error, Result};
pub use handle::{DirEntry, RemoteDirectory, RemoteFile};
pub use options::EngineOptions;
pub use path::PathHelper;
pub use protocol::{FileAttributes, OpenMode, PacketType, RenameFlags, StatusCode, MAX_SUPPORTED_VERSION};
pub use transport::{RemoteCharset, SubsystemStream};
