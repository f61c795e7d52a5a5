//! The single task that drains the subsystem stream and routes decoded
//! responses to their waiting caller (spec §4.3/§5).
//!
//! Grounded on the teacher crate's `worker_pool.rs`: one `tokio::spawn`ed
//! task, a `JoinHandle` the owner can await at shutdown, and an error that
//! propagates by tearing the task down rather than by unwinding across an
//! await point.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use tokio_util::codec::FramedRead;
use tracing::{debug, error};

use crate::error::Error;
use crate::protocol::PacketType;
use crate::request_table::{RawResponse, RequestTable};

/// Handed back by [`spawn`] so the owner can request a clean shutdown and
/// wait for the task to actually exit.
pub struct ReaderHandle {
    join: tokio::task::JoinHandle<()>,
}

impl ReaderHandle {
    /// Aborts the reader task immediately; outstanding requests are left to
    /// whatever already-queued `fail_all` call is in flight, or time out on
    /// their own.
    pub fn abort(&self) {
        self.join.abort();
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Spawns the reader loop over `framed`, routing every frame whose request
/// id matches an outstanding slot in `table`, and calling `on_version` once
/// for the lone `VERSION` packet the negotiation phase in
/// [`crate::engine::Engine::init`] is waiting on.
///
/// Any decode failure or stream closure is fatal: the loop calls
/// `table.fail_all` with the cause and exits.
pub fn spawn<R>(
    framed: FramedRead<R, tokio_util::codec::LengthDelimitedCodec>,
    table: Arc<RequestTable>,
    on_version: oneshot::Sender<Result<bytes::Bytes, Error>>,
    task_name: Option<String>,
) -> ReaderHandle
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let join = tokio::spawn(run(framed, table, on_version, task_name));
    ReaderHandle { join }
}

async fn run<R>(
    mut framed: FramedRead<R, tokio_util::codec::LengthDelimitedCodec>,
    table: Arc<RequestTable>,
    on_version: oneshot::Sender<Result<bytes::Bytes, Error>>,
    task_name: Option<String>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let span = tracing::debug_span!("sftp_reader", task = task_name.as_deref().unwrap_or("reader"));
    let _enter = span.enter();

    let mut on_version = Some(on_version);

    loop {
        let frame = match framed.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                let cause = Error::Protocol(format!("frame decode error: {err}"));
                error!(%cause, "reader task exiting on fatal error");
                fail_negotiation(&mut on_version, cause.clone());
                table.fail_all(cause);
                return;
            }
            None => {
                let cause = Error::Closed;
                debug!("subsystem stream closed, reader task exiting");
                fail_negotiation(&mut on_version, cause.clone());
                table.fail_all(cause);
                return;
            }
        };

        if frame.is_empty() {
            let cause = Error::Protocol("empty frame".to_string());
            fail_negotiation(&mut on_version, cause.clone());
            table.fail_all(cause);
            return;
        }

        let packet_type = match PacketType::try_from(frame[0]) {
            Ok(packet_type) => packet_type,
            Err(err) => {
                fail_negotiation(&mut on_version, err.clone());
                table.fail_all(err);
                return;
            }
        };

        let body = frame.freeze().slice(1..);

        if packet_type == PacketType::Version {
            match on_version.take() {
                Some(sender) => {
                    let _ = sender.send(Ok(body));
                    continue;
                }
                None => {
                    let cause = Error::Protocol("received a second VERSION packet after negotiation completed".to_string());
                    error!(%cause, "reader task exiting on fatal error");
                    table.fail_all(cause);
                    return;
                }
            }
        }

        if !packet_type.is_response() {
            let cause = Error::Protocol(format!("server sent a request-shaped packet: {packet_type:?}"));
            fail_negotiation(&mut on_version, cause.clone());
            table.fail_all(cause);
            return;
        }

        let id = match crate::protocol::peek_request_id(&body) {
            Ok(id) => id,
            Err(err) => {
                fail_negotiation(&mut on_version, err.clone());
                table.fail_all(err);
                return;
            }
        };

        let payload = body.slice(4..);
        table.complete(id, Ok(RawResponse { packet_type, body: payload }));
    }
}

fn fail_negotiation(on_version: &mut Option<oneshot::Sender<Result<bytes::Bytes, Error>>>, cause: Error) {
    if let Some(sender) = on_version.take() {
        let _ = sender.send(Err(cause));
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};
    use tokio_util::codec::FramedRead;

    use super::*;

    fn encode_frame(packet_type: u8, body: &[u8]) -> BytesMut {
        let mut frame = BytesMut::new();
        frame.put_u8(packet_type);
        frame.extend_from_slice(body);
        let mut out = BytesMut::new();
        out.put_u32(frame.len() as u32);
        out.extend_from_slice(&frame);
        out
    }

    #[tokio::test]
    async fn routes_a_status_response_to_its_request_id() {
        let (mut client, server) = tokio::io::duplex(4096);
        let table = Arc::new(RequestTable::new());
        let (_id, rx) = table.register().unwrap();

        let mut body = BytesMut::new();
        body.put_u32(0);
        body.put_u32(0);

        use tokio::io::AsyncWriteExt;
        client.write_all(&encode_frame(101, &body)).await.unwrap();

        let framed = FramedRead::new(server, crate::framer::build(crate::framer::DEFAULT_MAX_PACKET_SIZE));
        let (version_tx, _version_rx) = oneshot::channel();
        let handle = spawn(framed, table, version_tx, None);

        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.packet_type, PacketType::Status);
        handle.abort();
    }

    #[tokio::test]
    async fn version_packet_is_routed_to_the_negotiation_waiter_not_the_table() {
        let (mut client, server) = tokio::io::duplex(4096);
        let table = Arc::new(RequestTable::new());

        let mut body = BytesMut::new();
        body.put_u32(3);

        use tokio::io::AsyncWriteExt;
        client.write_all(&encode_frame(2, &body)).await.unwrap();

        let framed = FramedRead::new(server, crate::framer::build(crate::framer::DEFAULT_MAX_PACKET_SIZE));
        let (version_tx, version_rx) = oneshot::channel();
        let handle = spawn(framed, table, version_tx, None);

        let version_body = version_rx.await.unwrap().unwrap();
        assert_eq!(version_body.as_ref(), &3u32.to_be_bytes());
        handle.abort();
    }

    #[tokio::test]
    async fn stream_closure_fails_all_outstanding_requests() {
        let (client, server) = tokio::io::duplex(4096);
        let table = Arc::new(RequestTable::new());
        let (_id, rx) = table.register().unwrap();

        drop(client);

        let framed = FramedRead::new(server, crate::framer::build(crate::framer::DEFAULT_MAX_PACKET_SIZE));
        let (version_tx, _version_rx) = oneshot::channel();
        let handle = spawn(framed, table, version_tx, None);

        assert!(matches!(rx.await.unwrap(), Err(Error::Closed)));
        handle.join().await;
    }

    #[tokio::test]
    async fn a_second_version_packet_is_fatal_and_fails_outstanding_requests() {
        let (mut client, server) = tokio::io::duplex(4096);
        let table = Arc::new(RequestTable::new());
        let (_id, rx) = table.register().unwrap();

        let mut first_version = BytesMut::new();
        first_version.put_u32(3);

        use tokio::io::AsyncWriteExt;
        client.write_all(&encode_frame(2, &first_version)).await.unwrap();

        let framed = FramedRead::new(server, crate::framer::build(crate::framer::DEFAULT_MAX_PACKET_SIZE));
        let (version_tx, version_rx) = oneshot::channel();
        let handle = spawn(framed, table, version_tx, None);

        // Consume the first (legitimate) VERSION packet.
        version_rx.await.unwrap().unwrap();

        // A second VERSION packet is a protocol violation and must be fatal.
        client.write_all(&encode_frame(2, &first_version)).await.unwrap();

        assert!(matches!(rx.await.unwrap(), Err(Error::Protocol(_))));
        handle.join().await;
    }
}
