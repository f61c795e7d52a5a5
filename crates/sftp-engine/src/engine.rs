//! The orchestrator: owns the Writer, the RequestTable, and the Reader
//! task, and exposes the operation surface callers see (spec §4.6).
//!
//! `Engine` is a thin `Arc` handle so it can be cloned into every
//! `RemoteFile`/`RemoteDirectory` it hands out, the same "cheap handle over
//! shared state" shape the teacher crate gives its connection and worker
//! pool types.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{Error, Result};
use crate::handle::{DirEntry, RemoteDirectory, RemoteFile};
use crate::options::EngineOptions;
use crate::path::PathHelper;
use crate::protocol::{FileAttributes, OpenMode, PacketType, RenameFlags, StatusCode, MAX_SUPPORTED_VERSION};
use crate::reader::{self, ReaderHandle};
use crate::request_table::{RawResponse, RequestTable};
use crate::transport::SubsystemStream;
use crate::writer::Writer;

type BoxedStream = Box<dyn SubsystemStream>;

struct Inner {
    writer: Writer<WriteHalf<BoxedStream>>,
    table: Arc<RequestTable>,
    reader: AsyncMutex<Option<ReaderHandle>>,
    version_rx: AsyncMutex<Option<oneshot::Receiver<Result<Bytes>>>>,
    options: EngineOptions,
    path_helper: PathHelper,
    timeout: AsyncMutex<Duration>,
    operative_version: OnceLock<u32>,
    server_extensions: OnceLock<HashMap<String, String>>,
    closed: AtomicBool,
}

/// A client-side SFTP engine bound to one subsystem stream.
///
/// Cheap to clone: clones share the same connection, writer, and request
/// table.
#[derive(Clone)]
pub struct Engine(Arc<Inner>);

impl Engine {
    /// Wraps `stream`, wires up the Writer, RequestTable, and Reader task,
    /// but does not yet negotiate a protocol version. Every operation other
    /// than [`Engine::init`] fails with [`Error::Protocol`] until `init` has
    /// completed (spec §4.6: "Idempotent rejection: calling operations
    /// before init is an error").
    ///
    /// The Reader is spawned here rather than inside `init`, as a child of
    /// the engine's own scope, so [`Engine::close`] can stop and join it
    /// deterministically regardless of whether negotiation ever finished
    /// (spec §9 design note on structured concurrency).
    pub fn new<S>(stream: S, options: EngineOptions) -> Self
    where
        S: SubsystemStream + 'static,
    {
        let boxed: BoxedStream = Box::new(stream);
        let (read_half, write_half): (ReadHalf<BoxedStream>, WriteHalf<BoxedStream>) =
            tokio::io::split(boxed);

        let codec = crate::framer::build(options.max_packet_size);
        let writer = Writer::new(write_half, codec.clone());
        let framed_read = tokio_util::codec::FramedRead::new(read_half, codec);

        let table = Arc::new(RequestTable::new());
        let (version_tx, version_rx) = oneshot::channel();
        let reader_handle = reader::spawn(framed_read, table.clone(), version_tx, options.task_name.clone());

        let inner = Inner {
            writer,
            table,
            reader: AsyncMutex::new(Some(reader_handle)),
            version_rx: AsyncMutex::new(Some(version_rx)),
            timeout: AsyncMutex::new(options.timeout),
            path_helper: PathHelper::new(options.path_separator),
            operative_version: OnceLock::new(),
            server_extensions: OnceLock::new(),
            closed: AtomicBool::new(false),
            options,
        };
        Engine(Arc::new(inner))
    }

    /// Convenience combining [`Engine::new`] with an immediate [`Engine::init`].
    pub async fn connect<S>(stream: S, options: EngineOptions) -> Result<Self>
    where
        S: SubsystemStream + 'static,
    {
        let engine = Self::new(stream, options);
        engine.init().await?;
        Ok(engine)
    }

    /// Opens an SSH session via `russh`, requests `options.subsystem_name`
    /// (spec §6's default subsystem name, `"sftp"`), and negotiates the
    /// protocol version over the resulting channel.
    ///
    /// The one call site that actually reads
    /// [`EngineOptions::subsystem_name`]: [`crate::transport::russh_adapter::connect`]
    /// takes the subsystem name as a plain argument since it runs before an
    /// `Engine` (and therefore its options) exists, so this wrapper is what
    /// wires the option through rather than leaving it unread.
    #[cfg(feature = "russh-transport")]
    pub async fn connect_via_russh(
        host: &str,
        port: u16,
        username: &str,
        key_path: &std::path::Path,
        options: EngineOptions,
    ) -> Result<Self> {
        let stream = crate::transport::russh_adapter::connect(host, port, username, key_path, &options.subsystem_name)
            .await
            .map_err(|err| Error::transport(std::io::Error::other(err.to_string())))?;
        Self::connect(stream, options).await
    }

    /// Sends `INIT` with the configured client version and awaits `VERSION`
    /// (spec §4.6). Must be called exactly once before any other operation.
    pub async fn init(&self) -> Result<()> {
        let mut version_rx = self.0.version_rx.lock().await;
        let version_rx = version_rx.take().ok_or(Error::Protocol("init() called more than once".to_string()))?;

        let mut body = BytesMut::new();
        codec::put_u32(&mut body, self.0.options.client_version);
        self.0.writer.transmit(frame(PacketType::Init, &body)).await?;

        let payload = version_rx.await.map_err(|_| Error::Closed)??;
        let mut cursor = &payload[..];
        let server_version = codec::get_u32(&mut cursor)?;

        if server_version > MAX_SUPPORTED_VERSION {
            return Err(Error::Protocol(format!(
                "server reported unsupported protocol version {server_version}"
            )));
        }
        // The client never accepts a server offering a higher version than
        // it requested. This is the source's own strictness, preserved
        // verbatim; see DESIGN.md's resolution of this Open Question.
        if server_version > self.0.options.client_version {
            return Err(Error::Protocol(format!(
                "server reported incompatible protocol version {server_version} (requested {})",
                self.0.options.client_version
            )));
        }
        if server_version < self.0.options.client_version {
            info!(server_version, client_version = self.0.options.client_version, "server downgraded protocol version");
        }

        let mut extensions = HashMap::new();
        while !cursor.is_empty() {
            let name = codec::get_string(&mut cursor)?;
            let data = codec::get_string(&mut cursor)?;
            extensions.insert(name, data);
        }

        let _ = self.0.operative_version.set(server_version);
        let _ = self.0.server_extensions.set(extensions);
        debug!(server_version, "SFTP engine negotiated");
        Ok(())
    }

    fn require_initialized(&self) -> Result<u32> {
        self.0.operative_version.get().copied().ok_or(Error::Protocol(
            "operation attempted before init() completed".to_string(),
        ))
    }

    fn require_open(&self) -> Result<()> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    async fn timeout(&self) -> Duration {
        *self.0.timeout.lock().await
    }

    /// Overrides the per-request timeout for operations issued from now on.
    pub async fn set_timeout(&self, timeout: Duration) {
        *self.0.timeout.lock().await = timeout;
    }

    pub fn operative_protocol_version(&self) -> Option<u32> {
        self.0.operative_version.get().copied()
    }

    pub fn supports_server_extension(&self, name: &str, domain: &str) -> bool {
        self.server_extension_data(name, domain).is_some()
    }

    pub fn server_extension_data(&self, name: &str, domain: &str) -> Option<String> {
        let key = format!("{name}@{domain}");
        self.0.server_extensions.get().and_then(|map| map.get(&key).cloned())
    }

    pub fn path_helper(&self) -> PathHelper {
        self.0.path_helper
    }

    /// Allocates an id, transmits `body` under that id, and awaits the
    /// matching response within the current timeout.
    ///
    /// `require_open` is only a fast-path rejection; the authoritative check
    /// is `table.register()` itself refusing once `fail_all` has run, so a
    /// `close()` racing this call can never leave a slot registered after
    /// the table has already been drained (spec §8's close invariant).
    async fn request(&self, packet_type: PacketType, mut body: BytesMut) -> Result<RawResponse> {
        self.require_open()?;
        self.require_initialized()?;

        let (id, rx) = self.0.table.register()?;
        let mut framed_body = BytesMut::new();
        codec::put_u32(&mut framed_body, id);
        framed_body.unsplit(body.split());
        body = framed_body;

        if let Err(err) = self.0.writer.transmit(frame(packet_type, &body)).await {
            self.0.table.abandon(id);
            return Err(err);
        }

        match tokio::time::timeout(self.timeout().await, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                self.0.table.abandon(id);
                Err(Error::Timeout)
            }
        }
    }

    pub async fn open(&self, path: &str, modes: OpenMode, attrs: &FileAttributes) -> Result<RemoteFile> {
        let mut body = BytesMut::new();
        codec::put_string(&mut body, path);
        codec::put_u32(&mut body, modes.wire_mask());
        attrs.encode(&mut body);

        let response = self.request(PacketType::Open, body).await?;
        let handle = ensure_handle(&response)?;
        Ok(RemoteFile::new(self.clone(), path.to_string(), handle))
    }

    pub async fn open_dir(&self, path: &str) -> Result<RemoteDirectory> {
        let mut body = BytesMut::new();
        codec::put_string(&mut body, path);

        let response = self.request(PacketType::Opendir, body).await?;
        let handle = ensure_handle(&response)?;
        Ok(RemoteDirectory::new(self.clone(), path.to_string(), handle))
    }

    pub async fn stat(&self, path: &str) -> Result<FileAttributes> {
        self.stat_like(PacketType::Stat, path).await
    }

    pub async fn lstat(&self, path: &str) -> Result<FileAttributes> {
        self.stat_like(PacketType::Lstat, path).await
    }

    async fn stat_like(&self, packet_type: PacketType, path: &str) -> Result<FileAttributes> {
        let mut body = BytesMut::new();
        codec::put_string(&mut body, path);
        let response = self.request(packet_type, body).await?;
        let payload = ensure_packet_type(&response, PacketType::Attrs)?;
        FileAttributes::decode(&mut &payload[..])
    }

    pub async fn set_attributes(&self, path: &str, attrs: &FileAttributes) -> Result<()> {
        let mut body = BytesMut::new();
        codec::put_string(&mut body, path);
        attrs.encode(&mut body);
        let response = self.request(PacketType::Setstat, body).await?;
        ensure_status_ok(&response)
    }

    pub async fn make_dir(&self, path: &str, attrs: &FileAttributes) -> Result<()> {
        let mut body = BytesMut::new();
        codec::put_string(&mut body, path);
        attrs.encode(&mut body);
        let response = self.request(PacketType::Mkdir, body).await?;
        ensure_status_ok(&response)
    }

    pub async fn remove_dir(&self, path: &str) -> Result<()> {
        let mut body = BytesMut::new();
        codec::put_string(&mut body, path);
        let response = self.request(PacketType::Rmdir, body).await?;
        ensure_status_ok(&response)
    }

    pub async fn remove(&self, path: &str) -> Result<()> {
        let mut body = BytesMut::new();
        codec::put_string(&mut body, path);
        let response = self.request(PacketType::Remove, body).await?;
        ensure_status_ok(&response)
    }

    /// `(link, target)` ordering, matching the wire protocol literally; the
    /// engine does not compensate for OpenSSH's historical argument swap
    /// (spec §4.6, §9).
    pub async fn symlink(&self, link: &str, target: &str) -> Result<()> {
        self.require_v3_feature("SYMLINK")?;
        let mut body = BytesMut::new();
        codec::put_string(&mut body, link);
        codec::put_string(&mut body, target);
        let response = self.request(PacketType::Symlink, body).await?;
        ensure_status_ok(&response)
    }

    pub async fn read_link(&self, path: &str) -> Result<String> {
        self.require_v3_feature("READLINK")?;
        let mut body = BytesMut::new();
        codec::put_string(&mut body, path);
        let response = self.request(PacketType::Readlink, body).await?;
        let name = self.single_name_entry(&response)?;
        Ok(name)
    }

    pub async fn canonicalize(&self, path: &str) -> Result<String> {
        let mut body = BytesMut::new();
        codec::put_string(&mut body, path);
        let response = self.request(PacketType::Realpath, body).await?;
        self.single_name_entry(&response)
    }

    fn single_name_entry(&self, response: &RawResponse) -> Result<String> {
        let payload = ensure_packet_type(response, PacketType::Name)?;
        let mut cursor = &payload[..];
        let count = codec::get_u32(&mut cursor)?;
        if count != 1 {
            return Err(Error::Protocol(format!("expected exactly one NAME entry, got {count}")));
        }
        let filename = codec::get_string(&mut cursor)?;
        let _longname = codec::get_string(&mut cursor)?;
        let _attrs = FileAttributes::decode(&mut cursor)?;
        Ok(filename)
    }

    fn require_v3_feature(&self, name: &str) -> Result<()> {
        let version = self.require_initialized()?;
        if version < 3 {
            return Err(Error::Unsupported(format!("{name} requires protocol version >= 3, negotiated {version}")));
        }
        Ok(())
    }

    /// Rename decision table (spec §4.6), evaluated top-down.
    pub async fn rename(&self, old_path: &str, new_path: &str, flags: RenameFlags) -> Result<()> {
        let version = self.require_initialized()?;

        if flags.is_empty() {
            return self.plain_rename(old_path, new_path).await;
        }

        if version >= 5 {
            return self.versioned_rename(old_path, new_path, flags).await;
        }

        let has_posix_rename = self.supports_server_extension("posix-rename", "openssh.com");

        if flags.has(RenameFlags::OVERWRITE) && has_posix_rename {
            return self.posix_rename_extension(old_path, new_path).await;
        }

        if flags.has(RenameFlags::ATOMIC) && !flags.has(RenameFlags::OVERWRITE) && !flags.has(RenameFlags::NATIVE) {
            if has_posix_rename {
                return Err(Error::Unsupported(
                    "ATOMIC rename on protocol < 5 requires OVERWRITE to use posix-rename@openssh.com; add RenameFlags::OVERWRITE".to_string(),
                ));
            }
            return Err(Error::Unsupported("ATOMIC rename is not supported without the posix-rename@openssh.com extension".to_string()));
        }

        if flags.has(RenameFlags::NATIVE) {
            warn!("rename flags other than NATIVE are ignored on protocol < 5 without posix-rename extension");
            return self.plain_rename(old_path, new_path).await;
        }

        Err(Error::Unsupported(format!(
            "rename flags {:#x} are not supported on protocol version {version}",
            flags.0
        )))
    }

    async fn plain_rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let mut body = BytesMut::new();
        codec::put_string(&mut body, old_path);
        codec::put_string(&mut body, new_path);
        let response = self.request(PacketType::Rename, body).await?;
        ensure_status_ok(&response)
    }

    async fn versioned_rename(&self, old_path: &str, new_path: &str, flags: RenameFlags) -> Result<()> {
        let mut body = BytesMut::new();
        codec::put_string(&mut body, old_path);
        codec::put_string(&mut body, new_path);
        codec::put_u32(&mut body, flags.0);
        let response = self.request(PacketType::Rename, body).await?;
        ensure_status_ok(&response)
    }

    async fn posix_rename_extension(&self, old_path: &str, new_path: &str) -> Result<()> {
        let mut body = BytesMut::new();
        codec::put_string(&mut body, "posix-rename@openssh.com");
        codec::put_string(&mut body, old_path);
        codec::put_string(&mut body, new_path);
        let response = self.request(PacketType::Extended, body).await?;
        ensure_status_ok(&response)
    }

    /// Builds an `EXTENDED` request whose first field is `name`; the caller
    /// appends further fields before transmission via the returned builder.
    pub fn new_extended_request(&self, name: &str) -> ExtendedRequestBuilder<'_> {
        let mut body = BytesMut::new();
        codec::put_string(&mut body, name);
        ExtendedRequestBuilder { engine: self, body }
    }

    pub(crate) async fn read_handle(&self, handle: &Bytes, offset: u64, len: u32) -> Result<Bytes> {
        let mut body = BytesMut::new();
        codec::put_bytes(&mut body, handle);
        codec::put_u64(&mut body, offset);
        codec::put_u32(&mut body, len);

        let response = self.request(PacketType::Read, body).await?;
        if response.packet_type == PacketType::Status {
            let (code, message, language_tag) = decode_status(&response.body)?;
            if code == StatusCode::Eof {
                return Ok(Bytes::new());
            }
            return Err(Error::Status { code, message, language_tag });
        }
        let payload = ensure_packet_type(&response, PacketType::Data)?;
        let mut cursor = &payload[..];
        Ok(Bytes::from(codec::get_bytes(&mut cursor)?))
    }

    pub(crate) async fn write_handle(&self, handle: &Bytes, offset: u64, data: &[u8]) -> Result<()> {
        let mut body = BytesMut::new();
        codec::put_bytes(&mut body, handle);
        codec::put_u64(&mut body, offset);
        codec::put_bytes(&mut body, data);
        let response = self.request(PacketType::Write, body).await?;
        ensure_status_ok(&response)
    }

    pub(crate) async fn fstat_handle(&self, handle: &Bytes) -> Result<FileAttributes> {
        let mut body = BytesMut::new();
        codec::put_bytes(&mut body, handle);
        let response = self.request(PacketType::Fstat, body).await?;
        let payload = ensure_packet_type(&response, PacketType::Attrs)?;
        FileAttributes::decode(&mut &payload[..])
    }

    pub(crate) async fn fsetstat_handle(&self, handle: &Bytes, attrs: &FileAttributes) -> Result<()> {
        let mut body = BytesMut::new();
        codec::put_bytes(&mut body, handle);
        attrs.encode(&mut body);
        let response = self.request(PacketType::Fsetstat, body).await?;
        ensure_status_ok(&response)
    }

    pub(crate) async fn readdir_handle(&self, handle: &Bytes) -> Result<Option<Vec<DirEntry>>> {
        let mut body = BytesMut::new();
        codec::put_bytes(&mut body, handle);
        let response = self.request(PacketType::Readdir, body).await?;

        if response.packet_type == PacketType::Status {
            let (code, message, language_tag) = decode_status(&response.body)?;
            if code == StatusCode::Eof {
                return Ok(None);
            }
            return Err(Error::Status { code, message, language_tag });
        }

        let payload = ensure_packet_type(&response, PacketType::Name)?;
        let mut cursor = &payload[..];
        let count = codec::get_u32(&mut cursor)?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = codec::get_string(&mut cursor)?;
            let longname = codec::get_string(&mut cursor)?;
            let attrs = FileAttributes::decode(&mut cursor)?;
            entries.push(DirEntry { name, longname, attrs });
        }
        Ok(Some(entries))
    }

    pub(crate) async fn close_handle(&self, handle: &Bytes) -> Result<()> {
        let mut body = BytesMut::new();
        codec::put_bytes(&mut body, handle);
        let response = self.request(PacketType::Close, body).await?;
        ensure_status_ok(&response)
    }

    /// Best-effort shutdown (spec §4.6 `close()`): stops the Reader, fails
    /// every outstanding slot, and shuts down the subsystem stream. Safe to
    /// call more than once.
    pub async fn close(&self) {
        if self.0.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.0.table.fail_all(Error::Closed);
        if let Some(reader) = self.0.reader.lock().await.take() {
            reader.abort();
        }
        if let Err(err) = self.0.writer.close().await {
            warn!(%err, "error shutting down subsystem stream during close()");
        }
    }
}

/// Accumulates fields for an `EXTENDED` request before transmission.
pub struct ExtendedRequestBuilder<'a> {
    engine: &'a Engine,
    body: BytesMut,
}

impl<'a> ExtendedRequestBuilder<'a> {
    pub fn string_field(mut self, value: &str) -> Self {
        codec::put_string(&mut self.body, value);
        self
    }

    pub fn bytes_field(mut self, value: &[u8]) -> Self {
        codec::put_bytes(&mut self.body, value);
        self
    }

    pub fn u32_field(mut self, value: u32) -> Self {
        codec::put_u32(&mut self.body, value);
        self
    }

    pub fn u64_field(mut self, value: u64) -> Self {
        codec::put_u64(&mut self.body, value);
        self
    }

    /// Transmits the request and returns the raw response for the caller
    /// to interpret, since `EXTENDED_REPLY` payloads are extension-defined.
    pub async fn send(self) -> Result<RawResponse> {
        self.engine.request(PacketType::Extended, self.body).await
    }
}

fn frame(packet_type: PacketType, body: &BytesMut) -> BytesMut {
    let mut frame = BytesMut::with_capacity(1 + body.len());
    codec::put_u8(&mut frame, packet_type as u8);
    frame.extend_from_slice(body);
    frame
}

fn decode_status(body: &[u8]) -> Result<(StatusCode, String, String)> {
    let mut cursor = body;
    let code = StatusCode::try_from(codec::get_u32(&mut cursor)?)?;
    let message = codec::get_string(&mut cursor)?;
    let language_tag = codec::get_string(&mut cursor).unwrap_or_default();
    Ok((code, message, language_tag))
}

/// `ensurePacketTypeIs` (spec §7): raises `Protocol` when the actual type
/// is not `expected`, except a `STATUS` reply is decoded and raised as
/// `Status` instead.
fn ensure_packet_type(response: &RawResponse, expected: PacketType) -> Result<Bytes> {
    if response.packet_type == expected {
        return Ok(response.body.clone());
    }
    if response.packet_type == PacketType::Status {
        let (code, message, language_tag) = decode_status(&response.body)?;
        return Err(Error::Status { code, message, language_tag });
    }
    Err(Error::Protocol(format!(
        "expected {expected:?}, got {:?}",
        response.packet_type
    )))
}

/// `ensureStatusPacketIsOK` (spec §7).
fn ensure_status_ok(response: &RawResponse) -> Result<()> {
    let payload = ensure_packet_type(response, PacketType::Status)?;
    let (code, message, language_tag) = decode_status(&payload)?;
    if code == StatusCode::Ok {
        return Ok(());
    }
    Err(Error::Status { code, message, language_tag })
}

fn ensure_handle(response: &RawResponse) -> Result<Bytes> {
    let payload = ensure_packet_type(response, PacketType::Handle)?;
    let mut cursor = &payload[..];
    Ok(Bytes::from(codec::get_bytes(&mut cursor)?))
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::codec::Decoder;

    use super::*;

    fn encode_frame(packet_type: u8, body: &[u8]) -> BytesMut {
        let mut frame = BytesMut::new();
        frame.extend_from_slice(&[packet_type]);
        frame.extend_from_slice(body);
        let mut out = BytesMut::new();
        codec::put_u32(&mut out, frame.len() as u32);
        out.extend_from_slice(&frame);
        out
    }

    /// A minimal in-process server used only to drive the handshake, fed
    /// from a [`tokio::io::duplex`] pair.
    struct FakeServer {
        codec: tokio_util::codec::LengthDelimitedCodec,
        read_buf: BytesMut,
    }

    impl FakeServer {
        fn new() -> Self {
            Self {
                codec: crate::framer::build(crate::framer::DEFAULT_MAX_PACKET_SIZE),
                read_buf: BytesMut::new(),
            }
        }

        async fn recv_frame(&mut self, stream: &mut (impl AsyncReadExt + Unpin)) -> BytesMut {
            loop {
                if let Some(frame) = self.codec.decode(&mut self.read_buf).unwrap() {
                    return frame;
                }
                let mut chunk = [0u8; 4096];
                let n = stream.read(&mut chunk).await.unwrap();
                self.read_buf.extend_from_slice(&chunk[..n]);
            }
        }
    }

    async fn handshake(server_version: u32, extensions: &[(&str, &str)]) -> Engine {
        let (client_stream, mut server_stream) = tokio::io::duplex(1 << 16);

        let mut version_body = BytesMut::new();
        codec::put_u32(&mut version_body, server_version);
        for (name, data) in extensions {
            codec::put_string(&mut version_body, name);
            codec::put_string(&mut version_body, data);
        }
        let version_frame = encode_frame(2, &version_body);

        let server_task = tokio::spawn(async move {
            let mut fake = FakeServer::new();
            let _init = fake.recv_frame(&mut server_stream).await;
            server_stream.write_all(&version_frame).await.unwrap();
            server_stream
        });

        let engine = Engine::connect(client_stream, EngineOptions::default()).await.unwrap();
        server_task.await.unwrap();
        engine
    }

    #[tokio::test]
    async fn init_negotiates_version_and_extensions() {
        let engine = handshake(3, &[("posix-rename@openssh.com", "")]).await;
        assert_eq!(engine.operative_protocol_version(), Some(3));
        assert!(engine.supports_server_extension("posix-rename", "openssh.com"));
        assert!(!engine.supports_server_extension("nope", "example.com"));
    }

    #[tokio::test]
    async fn init_fails_when_server_version_exceeds_max_supported() {
        let (client_stream, mut server_stream) = tokio::io::duplex(1 << 16);
        let mut version_body = BytesMut::new();
        codec::put_u32(&mut version_body, 99);
        let version_frame = encode_frame(2, &version_body);

        tokio::spawn(async move {
            let mut fake = FakeServer::new();
            let _init = fake.recv_frame(&mut server_stream).await;
            server_stream.write_all(&version_frame).await.unwrap();
        });

        let result = Engine::connect(client_stream, EngineOptions::default()).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn init_fails_when_server_version_exceeds_requested() {
        let (client_stream, mut server_stream) = tokio::io::duplex(1 << 16);
        let mut options = EngineOptions::default();
        options.client_version = 2;

        let mut version_body = BytesMut::new();
        codec::put_u32(&mut version_body, 3);
        let version_frame = encode_frame(2, &version_body);

        tokio::spawn(async move {
            let mut fake = FakeServer::new();
            let _init = fake.recv_frame(&mut server_stream).await;
            server_stream.write_all(&version_frame).await.unwrap();
        });

        let result = Engine::connect(client_stream, options).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn rename_with_empty_flags_emits_plain_rename() {
        let (client_stream, mut server_stream) = tokio::io::duplex(1 << 16);
        let server_task = tokio::spawn(async move {
            let mut fake = FakeServer::new();
            let _init = fake.recv_frame(&mut server_stream).await;
            let mut version_body = BytesMut::new();
            codec::put_u32(&mut version_body, 3);
            server_stream.write_all(&encode_frame(2, &version_body)).await.unwrap();

            let rename_frame = fake.recv_frame(&mut server_stream).await;
            assert_eq!(rename_frame[0], PacketType::Rename as u8);

            let mut cursor = &rename_frame[5..];
            assert_eq!(codec::get_string(&mut cursor).unwrap(), "/a");
            assert_eq!(codec::get_string(&mut cursor).unwrap(), "/b");
            assert!(cursor.is_empty(), "plain rename must not carry a flags word");

            let mut status_body = BytesMut::new();
            status_body.extend_from_slice(&rename_frame[1..5]);
            codec::put_u32(&mut status_body, StatusCode::Ok as u32);
            codec::put_string(&mut status_body, "");
            codec::put_string(&mut status_body, "");
            server_stream.write_all(&encode_frame(101, &status_body)).await.unwrap();
        });

        let engine = Engine::connect(client_stream, EngineOptions::default()).await.unwrap();
        engine.rename("/a", "/b", RenameFlags::empty()).await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn rename_atomic_alone_without_posix_rename_fails_unsupported_without_a_wire_round_trip() {
        let engine = handshake(3, &[]).await;
        let result = engine.rename("/a", "/b", RenameFlags(RenameFlags::ATOMIC)).await;
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn rename_atomic_alone_with_posix_rename_asks_for_overwrite() {
        let engine = handshake(3, &[("posix-rename@openssh.com", "")]).await;
        let result = engine.rename("/a", "/b", RenameFlags(RenameFlags::ATOMIC)).await;
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn rename_overwrite_with_posix_rename_extension_emits_extended_request() {
        let (client_stream, mut server_stream) = tokio::io::duplex(1 << 16);
        let server_task = tokio::spawn(async move {
            let mut fake = FakeServer::new();
            let _init = fake.recv_frame(&mut server_stream).await;
            let mut version_body = BytesMut::new();
            codec::put_u32(&mut version_body, 3);
            codec::put_string(&mut version_body, "posix-rename@openssh.com");
            codec::put_string(&mut version_body, "");
            server_stream.write_all(&encode_frame(2, &version_body)).await.unwrap();

            let extended_frame = fake.recv_frame(&mut server_stream).await;
            assert_eq!(extended_frame[0], PacketType::Extended as u8);
            let mut cursor = &extended_frame[5..];
            assert_eq!(codec::get_string(&mut cursor).unwrap(), "posix-rename@openssh.com");
            assert_eq!(codec::get_string(&mut cursor).unwrap(), "/x");
            assert_eq!(codec::get_string(&mut cursor).unwrap(), "/y");

            let mut status_body = BytesMut::new();
            status_body.extend_from_slice(&extended_frame[1..5]);
            codec::put_u32(&mut status_body, StatusCode::Ok as u32);
            codec::put_string(&mut status_body, "");
            codec::put_string(&mut status_body, "");
            server_stream.write_all(&encode_frame(101, &status_body)).await.unwrap();
        });

        let engine = Engine::connect(client_stream, EngineOptions::default()).await.unwrap();
        engine.rename("/x", "/y", RenameFlags(RenameFlags::OVERWRITE)).await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn init_called_twice_is_rejected() {
        let engine = handshake(3, &[]).await;
        let result = engine.init().await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn operations_before_init_are_rejected() {
        let (client_stream, _server_stream) = tokio::io::duplex(1 << 16);
        let engine = Engine::new(client_stream, EngineOptions::default());
        let result = engine.stat("/anything").await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn close_fails_outstanding_requests_and_rejects_new_ones() {
        let engine = handshake(3, &[]).await;
        let pending = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.stat("/never-answered").await })
        };
        // Give the request a chance to register before closing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.close().await;

        assert!(matches!(pending.await.unwrap(), Err(Error::Closed)));
        assert!(matches!(engine.stat("/anything").await, Err(Error::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out_and_a_late_response_is_dropped() {
        let (client_stream, mut server_stream) = tokio::io::duplex(1 << 16);
        let server_task = tokio::spawn(async move {
            let mut fake = FakeServer::new();
            let _init = fake.recv_frame(&mut server_stream).await;
            let mut version_body = BytesMut::new();
            codec::put_u32(&mut version_body, 3);
            server_stream.write_all(&encode_frame(2, &version_body)).await.unwrap();

            let stat_frame = fake.recv_frame(&mut server_stream).await;

            // The server takes far longer to answer than the client's timeout.
            tokio::time::sleep(Duration::from_millis(200)).await;
            let mut status_body = BytesMut::new();
            status_body.extend_from_slice(&stat_frame[1..5]);
            codec::put_u32(&mut status_body, StatusCode::Ok as u32);
            codec::put_string(&mut status_body, "");
            codec::put_string(&mut status_body, "");
            server_stream.write_all(&encode_frame(101, &status_body)).await.unwrap();
            server_stream
        });

        let mut options = EngineOptions::default();
        options.timeout = Duration::from_millis(50);
        let engine = Engine::connect(client_stream, options).await.unwrap();

        let result = engine.stat("/never-in-time").await;
        assert!(matches!(result, Err(Error::Timeout)));

        // Let the late response actually arrive; it must be silently dropped
        // rather than resurrecting the abandoned slot, and the engine must
        // remain usable for requests issued afterward.
        tokio::time::sleep(Duration::from_millis(200)).await;
        server_task.await.unwrap();
    }
}
