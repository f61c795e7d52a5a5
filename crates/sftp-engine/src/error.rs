//! Error taxonomy for the SFTP engine.
//!
//! A single flat enum, in the shape of `snow-owl-sftp`'s own `Error` and
//! `snow-owl-core::SnowOwlError`, rather than one type per failure class.
//! `Clone` is required here (unlike the teacher's `Error`) because a fatal
//! failure is broadcast to every outstanding caller through
//! [`crate::request_table::RequestTable::fail_all`]; `std::io::Error` is
//! wrapped in an `Arc` to make that cheap.

use std::sync::Arc;

use thiserror::Error;

use crate::protocol::StatusCode;

/// Result type alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The engine's error taxonomy (spec §7).
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Unexpected packet type, malformed fields, or a frame outside the
    /// configured length bound. Fatal: the engine tears itself down.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server replied `STATUS` with a non-`OK` code. Affects only the
    /// caller that issued the request.
    #[error("{message} (status: {code:?})")]
    Status {
        /// The status code the server returned.
        code: StatusCode,
        /// The human-readable message accompanying the code.
        message: String,
        /// RFC 3066 language tag accompanying the message, if any.
        language_tag: String,
    },

    /// The requested feature is absent on the negotiated protocol version
    /// and no extension-based fallback applies.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The request's slot was not fulfilled within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// The underlying subsystem stream closed or an I/O error occurred.
    /// Fatal: every outstanding request fails with this cause.
    #[error("transport error: {0}")]
    Transport(Arc<std::io::Error>),

    /// The engine has already been closed.
    #[error("engine is closed")]
    Closed,
}

impl Error {
    /// Wraps a raw I/O error as a fatal [`Error::Transport`].
    pub fn transport(err: std::io::Error) -> Self {
        Error::Transport(Arc::new(err))
    }

    /// True for errors that are fatal to the whole engine, as opposed to
    /// errors that affect only the caller that triggered them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::Transport(_) | Error::Closed)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::transport(err)
    }
}
