//! Unit tests for the primitive payload encoding helpers.

use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};

use forgelink::protocol::wire::{self, Reader};
use forgelink::AppError;

#[test]
fn string_roundtrip() {
    let mut buf = BytesMut::new();
    wire::put_str(&mut buf, "hello wörld");

    let mut reader = Reader::new(buf.freeze());
    assert_eq!(reader.str().unwrap(), "hello wörld");
    reader.finish().unwrap();
}

#[test]
fn optional_string_roundtrip() {
    let mut buf = BytesMut::new();
    wire::put_opt_str(&mut buf, Some("1.2.3"));
    wire::put_opt_str(&mut buf, None);

    let mut reader = Reader::new(buf.freeze());
    assert_eq!(reader.opt_str().unwrap(), Some("1.2.3".to_owned()));
    assert_eq!(reader.opt_str().unwrap(), None);
    reader.finish().unwrap();
}

#[test]
fn map_roundtrip_preserves_entries() {
    let mut map = BTreeMap::new();
    map.insert("PATH".to_owned(), "/usr/bin".to_owned());
    map.insert("LANG".to_owned(), "en-US".to_owned());

    let mut buf = BytesMut::new();
    wire::put_map(&mut buf, &map);

    let mut reader = Reader::new(buf.freeze());
    assert_eq!(reader.map().unwrap(), map);
    reader.finish().unwrap();
}

/// A declared string length running past the buffer is a protocol error,
/// not a panic.
#[test]
fn truncated_string_is_a_protocol_error() {
    let mut buf = BytesMut::new();
    buf.put_u32_le(100);
    buf.put_slice(b"short");

    let mut reader = Reader::new(buf.freeze());
    assert!(matches!(reader.str(), Err(AppError::Protocol(_))));
}

#[test]
fn invalid_presence_byte_is_rejected() {
    let mut buf = BytesMut::new();
    buf.put_u8(7);

    let mut reader = Reader::new(buf.freeze());
    assert!(matches!(reader.bool(), Err(AppError::Protocol(_))));
}

#[test]
fn invalid_utf8_is_rejected() {
    let mut buf = BytesMut::new();
    buf.put_u32_le(2);
    buf.put_slice(&[0xff, 0xfe]);

    let mut reader = Reader::new(buf.freeze());
    assert!(matches!(reader.str(), Err(AppError::Protocol(_))));
}

/// Unconsumed payload bytes mean the declared length and the actual
/// content disagree.
#[test]
fn trailing_bytes_fail_finish() {
    let mut buf = BytesMut::new();
    wire::put_str(&mut buf, "done");
    buf.put_u8(0);

    let mut reader = Reader::new(buf.freeze());
    reader.str().unwrap();
    assert!(matches!(reader.finish(), Err(AppError::Protocol(_))));
}
