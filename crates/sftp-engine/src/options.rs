//! Engine configuration.
//!
//! A plain struct with a `Default` impl, in the shape of the teacher
//! crate's `ConnectionTrackerConfig`/`RateLimitConfig` — not a file-backed
//! config loader. The engine is a library; a CLI or config-file surface on
//! top of it is an external collaborator (spec §1), same as a real secure
//! transport is.

use std::time::Duration;

use crate::framer::DEFAULT_MAX_PACKET_SIZE;
use crate::protocol::MAX_SUPPORTED_VERSION;

/// Tunables for an [`crate::engine::Engine`] instance.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Client-requested protocol version sent in `INIT` (spec §4.6).
    pub client_version: u32,
    /// Default per-request timeout (spec §5, default 30000 ms).
    pub timeout: Duration,
    /// Maximum accepted frame length (spec §4.2).
    pub max_packet_size: usize,
    /// Path separator used by [`crate::path::PathHelper`] (spec §4.8).
    pub path_separator: char,
    /// Subsystem name requested when opening the channel (spec §6).
    pub subsystem_name: String,
    /// Optional name threaded into the reader task's tracing span, the
    /// async equivalent of the thread-naming hook in spec §6's downward
    /// interface (see SPEC_FULL.md §6).
    pub task_name: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            client_version: MAX_SUPPORTED_VERSION,
            timeout: Duration::from_millis(30_000),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            path_separator: '/',
            subsystem_name: "sftp".to_string(),
            task_name: None,
        }
    }
}
