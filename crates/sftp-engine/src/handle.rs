//! Thin wrappers over server-assigned opaque handles (spec §4.7).
//!
//! `RemoteFile`/`RemoteDirectory` hold just enough state to reissue
//! requests against their handle — they do no buffering or request
//! tracking of their own, that all lives in [`crate::engine::Engine`]. The
//! `Drop` impls only warn when a handle was dropped without an explicit
//! `close()`, the same defensive-logging-not-cleanup shape the teacher
//! crate's `connection_tracker.rs` uses for abandoned entries: `Drop`
//! cannot await the `CLOSE` round trip, so it cannot do real cleanup.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::warn;

use crate::engine::Engine;
use crate::error::Result;
use crate::protocol::FileAttributes;

/// One directory entry as returned by `READDIR` (spec §4.4).
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub longname: String,
    pub attrs: FileAttributes,
}

/// An open remote file (spec §4.7).
pub struct RemoteFile {
    engine: Engine,
    path: String,
    handle: Bytes,
    cursor: Mutex<u64>,
    closed: AtomicBool,
}

impl RemoteFile {
    pub(crate) fn new(engine: Engine, path: String, handle: Bytes) -> Self {
        Self {
            engine,
            path,
            handle,
            cursor: Mutex::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Reads up to `len` bytes starting at `offset`. An `Eof` status is not
    /// an error: it surfaces as `Ok(Bytes::new())`, matching the source's
    /// treatment of a short final read.
    pub async fn read(&self, offset: u64, len: u32) -> Result<Bytes> {
        self.engine.read_handle(&self.handle, offset, len).await
    }

    /// Reads the next `len` bytes from the file's internal cursor, which is
    /// advanced by the number of bytes actually returned.
    pub async fn read_next(&self, len: u32) -> Result<Bytes> {
        let offset = *self.cursor.lock().await;
        let data = self.read(offset, len).await?;
        *self.cursor.lock().await = offset + data.len() as u64;
        Ok(data)
    }

    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.engine.write_handle(&self.handle, offset, data).await
    }

    /// Writes `data` at the file's internal cursor and advances it.
    pub async fn write_next(&self, data: &[u8]) -> Result<()> {
        let offset = *self.cursor.lock().await;
        self.write(offset, data).await?;
        *self.cursor.lock().await = offset + data.len() as u64;
        Ok(())
    }

    pub async fn fetch_attributes(&self) -> Result<FileAttributes> {
        self.engine.fstat_handle(&self.handle).await
    }

    pub async fn set_attributes(&self, attrs: &FileAttributes) -> Result<()> {
        self.engine.fsetstat_handle(&self.handle, attrs).await
    }

    /// Issues `CLOSE` and expects `STATUS(OK)`. Safe to call more than
    /// once; subsequent calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.engine.close_handle(&self.handle).await
    }
}

impl Drop for RemoteFile {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            warn!(path = %self.path, "RemoteFile dropped without close()");
        }
    }
}

/// An open remote directory (spec §4.7).
pub struct RemoteDirectory {
    engine: Engine,
    path: String,
    handle: Bytes,
    exhausted: AtomicBool,
    closed: AtomicBool,
}

impl RemoteDirectory {
    pub(crate) fn new(engine: Engine, path: String, handle: Bytes) -> Self {
        Self {
            engine,
            path,
            handle,
            exhausted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the next batch of entries, or `None` once the server has
    /// replied `STATUS(EOF)`. Subsequent calls after `None` also return
    /// `None` rather than reissuing `READDIR`.
    pub async fn scan(&self) -> Result<Option<Vec<DirEntry>>> {
        if self.exhausted.load(Ordering::SeqCst) {
            return Ok(None);
        }
        match self.engine.readdir_handle(&self.handle).await? {
            Some(entries) => Ok(Some(entries)),
            None => {
                self.exhausted.store(true, Ordering::SeqCst);
                Ok(None)
            }
        }
    }

    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.engine.close_handle(&self.handle).await
    }
}

impl Drop for RemoteDirectory {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            warn!(path = %self.path, "RemoteDirectory dropped without close()");
        }
    }
}
