//! Unit tests for the line codec shared by both channel directions.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use host_harness::channel::{LineCodec, MAX_LINE_BYTES};
use host_harness::AppError;

#[test]
fn single_line_decodes_without_trailing_newline() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"Command\":\"RunTests\"}\n");

    let decoded = codec
        .decode(&mut buf)
        .expect("decode must succeed for a valid line");

    assert_eq!(decoded, Some("{\"Command\":\"RunTests\"}".to_owned()));
}

#[test]
fn batched_lines_decode_one_at_a_time() {
    let mut codec = LineCodec::new();
    let raw = concat!(
        "{\"Name\":\"a\",\"Outcome\":\"Passed\",\"Duration\":0.1}\n",
        "END\n",
    );
    let mut buf = BytesMut::from(raw);

    let first = codec.decode(&mut buf).expect("first decode must succeed");
    assert!(first.is_some(), "first line must be decoded");

    let second = codec.decode(&mut buf).expect("second decode must succeed");
    assert_eq!(second, Some("END".to_owned()));

    let third = codec.decode(&mut buf).expect("empty buffer must not error");
    assert!(third.is_none(), "no further lines must be present");
}

/// A record that arrives split across reads is buffered until its
/// newline shows up.
#[test]
fn partial_line_is_buffered_until_newline() {
    let mut codec = LineCodec::new();

    let mut buf = BytesMut::from("{\"Name\":\"a\"");
    let result = codec.decode(&mut buf).expect("partial decode must not error");
    assert!(result.is_none(), "no line before the newline arrives");

    buf.extend_from_slice(b",\"Outcome\":\"Passed\",\"Duration\":0.1}\n");
    let result = codec.decode(&mut buf).expect("decode must succeed after newline");
    assert!(result.is_some(), "complete line must be emitted");
}

#[test]
fn oversized_line_is_rejected() {
    let mut codec = LineCodec::new();
    let big = "a".repeat(MAX_LINE_BYTES + 1) + "\n";
    let mut buf = BytesMut::from(big.as_str());

    match codec.decode(&mut buf) {
        Err(AppError::Protocol(msg)) => {
            assert!(msg.contains("line too long"), "got: {msg}");
        }
        other => panic!("expected Err(AppError::Protocol), got: {other:?}"),
    }
}

#[test]
fn encoder_appends_the_newline() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::new();

    codec
        .encode("END".to_owned(), &mut buf)
        .expect("encode must succeed");

    assert_eq!(&buf[..], b"END\n");
}
