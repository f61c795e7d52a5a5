//! Field primitives: big-endian integers and length-prefixed strings/bytes
//! (spec §4.1). Grounded on `snow-owl-sftp::protocol::codec`, generalized
//! to bounds-checked `Result`-returning reads instead of panicking on a
//! short buffer.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};

fn need(buf: &[u8], n: usize, what: &str) -> Result<()> {
    if buf.len() < n {
        return Err(Error::Protocol(format!(
            "insufficient data for {what}: need {n} bytes, have {}",
            buf.len()
        )));
    }
    Ok(())
}

pub fn put_u8(buf: &mut BytesMut, value: u8) {
    buf.put_u8(value);
}

pub fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    need(buf, 1, "u8")?;
    Ok(buf.get_u8())
}

pub fn put_u32(buf: &mut BytesMut, value: u32) {
    buf.put_u32(value);
}

pub fn get_u32(buf: &mut &[u8]) -> Result<u32> {
    need(buf, 4, "u32")?;
    Ok(buf.get_u32())
}

pub fn put_u64(buf: &mut BytesMut, value: u64) {
    buf.put_u64(value);
}

pub fn get_u64(buf: &mut &[u8]) -> Result<u64> {
    need(buf, 8, "u64")?;
    Ok(buf.get_u64())
}

/// Length-prefixed byte string: `u32` length followed by raw bytes.
pub fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

pub fn get_bytes(buf: &mut &[u8]) -> Result<Vec<u8>> {
    let len = get_u32(buf)? as usize;
    need(buf, len, "byte string body")?;
    let data = buf[..len].to_vec();
    buf.advance(len);
    Ok(data)
}

/// Length-prefixed text string, UTF-8 by default (spec §4.1 allows a
/// per-session remote charset; only UTF-8 is implemented here, see
/// DESIGN.md).
pub fn put_string(buf: &mut BytesMut, value: &str) {
    put_bytes(buf, value.as_bytes());
}

pub fn get_string(buf: &mut &[u8]) -> Result<String> {
    let bytes = get_bytes(buf)?;
    String::from_utf8(bytes).map_err(|e| Error::Protocol(format!("invalid UTF-8 string: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut buf = BytesMut::new();
        put_u8(&mut buf, 7);
        put_u32(&mut buf, 0xdead_beef);
        put_u64(&mut buf, u64::MAX);
        put_string(&mut buf, "hello/sftp");
        put_bytes(&mut buf, &[1, 2, 3, 4]);

        let mut cursor = &buf[..];
        assert_eq!(get_u8(&mut cursor).unwrap(), 7);
        assert_eq!(get_u32(&mut cursor).unwrap(), 0xdead_beef);
        assert_eq!(get_u64(&mut cursor).unwrap(), u64::MAX);
        assert_eq!(get_string(&mut cursor).unwrap(), "hello/sftp");
        assert_eq!(get_bytes(&mut cursor).unwrap(), vec![1, 2, 3, 4]);
        assert!(cursor.is_empty());
    }

    #[test]
    fn truncated_buffer_is_a_protocol_error_not_a_panic() {
        let buf = BytesMut::from(&b"\x00\x00\x00"[..]);
        assert!(get_u32(&mut &buf[..]).is_err());

        let mut buf = BytesMut::new();
        put_u32(&mut buf, 100);
        buf.put_slice(b"short");
        assert!(get_bytes(&mut &buf[..]).is_err());
    }

    #[test]
    fn string_decode_rejects_invalid_utf8() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, &[0xff, 0xfe]);
        assert!(get_string(&mut &buf[..]).is_err());
    }
}
