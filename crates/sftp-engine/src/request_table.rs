//! Tracks outstanding requests by id and hands each a one-shot slot for its
//! eventual response (spec §4.3/§5).
//!
//! Shaped after the teacher crate's `connection_tracker.rs`: a
//! `Mutex`-guarded map keyed by an integer id, with a defensive-logging
//! removal path. The value here is a `oneshot::Sender` rather than a
//! connection record, and a fatal transport failure broadcasts itself to
//! every slot at once instead of evicting one entry at a time.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::warn;

use crate::error::Error;

/// Raw, not-yet-decoded response body paired with the packet type byte that
/// introduced it.
#[derive(Debug)]
pub struct RawResponse {
    pub packet_type: crate::protocol::PacketType,
    pub body: bytes::Bytes,
}

type Slot = oneshot::Sender<Result<RawResponse, Error>>;

/// Once `fail_all` has run, the table refuses every further `register` call
/// instead of silently accepting a slot nothing will ever complete (spec §8:
/// "After `close()`, no new slot is ever created").
enum State {
    Open(HashMap<u32, Slot>),
    Closed,
}

/// Allocates monotonically wrapping request ids and routes responses back
/// to the caller that issued them.
pub struct RequestTable {
    next_id: Mutex<u32>,
    state: Mutex<State>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(0),
            state: Mutex::new(State::Open(HashMap::new())),
        }
    }

    /// Allocates the next request id and registers a slot for its response.
    /// Wraps on overflow (spec §4.3: "request ids wrap"); a wrapped id that
    /// collides with one still outstanding is vanishingly unlikely at any
    /// realistic in-flight depth and is not guarded against, matching the
    /// source behavior this is grounded on.
    ///
    /// Fails with [`Error::Closed`] if `fail_all` has already run: the check
    /// and the insertion happen under the same lock, so a caller can never
    /// observe the table as open, then have `fail_all` run and empty it,
    /// before its slot is inserted (spec §8's close invariant).
    pub fn register(&self) -> Result<(u32, oneshot::Receiver<Result<RawResponse, Error>>), Error> {
        let id = {
            let mut next_id = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
            let id = *next_id;
            *next_id = next_id.wrapping_add(1);
            id
        };

        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &mut *state {
            State::Open(slots) => {
                slots.insert(id, tx);
                Ok((id, rx))
            }
            State::Closed => Err(Error::Closed),
        }
    }

    /// Delivers a decoded response to the caller waiting on `id`. A missing
    /// or already-fulfilled slot is logged and dropped rather than treated
    /// as fatal — the reader task must keep draining the stream regardless.
    /// Silently dropped, without logging, once the table is closed: this is
    /// the ordinary case of a late response arriving for a request that
    /// already timed out or was failed by `fail_all`.
    pub fn complete(&self, id: u32, response: Result<RawResponse, Error>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(slots) = (match &mut *state {
            State::Open(slots) => Some(slots),
            State::Closed => None,
        }) else {
            return;
        };

        match slots.remove(&id) {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => {
                warn!(request_id = id, "response for unknown or already-completed request");
            }
        }
    }

    /// Fails every outstanding request with the same fatal cause (spec §5:
    /// "a transport failure is broadcast to all outstanding requests") and
    /// closes the table: every `register` call from this point on fails
    /// with [`Error::Closed`] instead of creating a slot nothing will ever
    /// complete.
    pub fn fail_all(&self, cause: Error) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let previous = std::mem::replace(&mut *state, State::Closed);
        drop(state);

        if let State::Open(slots) = previous {
            for (_, tx) in slots {
                let _ = tx.send(Err(cause.clone()));
            }
        }
    }

    /// Removes a slot without completing it, used when a caller's own wait
    /// times out and the reader should no longer bother routing to it.
    pub fn abandon(&self, id: u32) {
        if let State::Open(slots) = &mut *self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            slots.remove(&id);
        }
    }
}

impl Default for RequestTable {
    fn default() -> Self {
        Self::new()
    }
}
