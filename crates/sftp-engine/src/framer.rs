//! Length-prefixed packet framing (spec §4.2).
//!
//! Each packet on the wire is a big-endian `u32` length followed by that
//! many bytes, whose first byte is the packet type. `tokio_util` already
//! ships exactly this framing as `LengthDelimitedCodec`, so the framer is
//! a thin, documented configuration of it rather than a hand-rolled
//! reader/writer — the teacher's `client.rs` hand-rolled
//! `send_packet`/`receive_packet` because it had no `tokio-util` codec
//! wired up for SFTP; this crate has `tokio-util` in its dependency table
//! already, so there is no reason not to use it.

use tokio_util::codec::LengthDelimitedCodec;

/// Default maximum frame length: 256 KiB of payload plus slack for
/// attribute/extension padding (spec §4.2's default bound).
pub const DEFAULT_MAX_PACKET_SIZE: usize = 256 * 1024 + 4096;

/// Builds the length-delimited codec both the reader and the writer halves
/// of the subsystem stream are framed with.
///
/// A frame longer than `max_packet_size` is rejected by the codec itself
/// (`LengthDelimitedCodec` surfaces this as an `io::Error` of kind
/// `InvalidData`, which `reader` maps to a fatal [`crate::Error::Protocol`]).
pub fn build(max_packet_size: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(max_packet_size)
        .big_endian()
        .new_codec()
}

#[cfg(test)]
mod tests {
    use bytes::{Buf, Bytes};
    use tokio_util::codec::Decoder;

    use super::*;

    #[test]
    fn frame_length_exactly_at_bound_is_accepted() {
        let mut codec = build(8);
        let mut buf = bytes::BytesMut::new();
        buf.extend_from_slice(&8u32.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        let frame = codec.decode(&mut buf).unwrap();
        assert!(frame.is_some());
        assert_eq!(frame.unwrap().len(), 8);
    }

    #[test]
    fn frame_length_over_bound_is_rejected() {
        let mut codec = build(8);
        let mut buf = bytes::BytesMut::new();
        buf.extend_from_slice(&9u32.to_be_bytes());
        buf.extend_from_slice(&[0u8; 9]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn partial_frame_asks_for_more_data() {
        let mut codec = build(DEFAULT_MAX_PACKET_SIZE);
        let mut buf = bytes::BytesMut::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(&[1u8; 4]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        // The codec must not have consumed the partial frame.
        assert_eq!(buf.remaining(), 4 + 4);
    }

    #[test]
    fn sanity_big_endian_length_prefix() {
        let bytes: Bytes = Bytes::from_static(&[0, 0, 0, 3, 1, 2, 3]);
        assert_eq!(u32::from_be_bytes(bytes[..4].try_into().unwrap()), 3);
    }
}
