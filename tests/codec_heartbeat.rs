//! Heart-beat EOLs in the wire codec.
//!
//! A WebSocket message may carry nothing but an EOL, an EOL in front of a
//! frame, or several frames and EOLs back to back; the codec reports each
//! EOL as a separate heart-beat.

use bytes::BytesMut;
use stomp_ws::codec::{StompCodec, StompItem};
use stomp_ws::{Command, Frame};
use tokio_util::codec::{Decoder, Encoder};

fn next(codec: &mut StompCodec, buf: &mut BytesMut) -> StompItem {
    codec
        .decode(buf)
        .expect("decode failed")
        .expect("no item")
}

fn expect_frame(item: StompItem, command: Command) -> Frame {
    match item {
        StompItem::Frame(f) => {
            assert_eq!(f.command, command);
            f
        }
        other => panic!("expected {command} frame, got {:?}", other),
    }
}

#[test]
fn decode_single_lf_as_heartbeat() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"\n"[..]);
    assert_eq!(next(&mut codec, &mut buf), StompItem::Heartbeat);
    assert!(buf.is_empty(), "buffer should be empty after consuming heartbeat");
}

#[test]
fn decode_crlf_as_one_heartbeat() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"\r\n\n"[..]);
    assert_eq!(next(&mut codec, &mut buf), StompItem::Heartbeat);
    assert_eq!(buf.len(), 1);
    assert_eq!(next(&mut codec, &mut buf), StompItem::Heartbeat);
    assert!(buf.is_empty());
}

#[test]
fn lone_cr_waits_for_more_bytes() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"\r"[..]);
    assert_eq!(codec.decode(&mut buf).expect("decode failed"), None);
    assert_eq!(buf.len(), 1);

    buf.extend_from_slice(b"\n");
    assert_eq!(next(&mut codec, &mut buf), StompItem::Heartbeat);
}

#[test]
fn decode_heartbeat_before_frame() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"\nMESSAGE\ndestination:/topic/greetings\n\nhello\0"[..]);

    assert_eq!(next(&mut codec, &mut buf), StompItem::Heartbeat);
    let f = expect_frame(next(&mut codec, &mut buf), Command::Message);
    assert_eq!(f.body, b"hello");
}

#[test]
fn decode_heartbeat_after_frame() {
    let mut codec = StompCodec::new();
    // The first LF after NUL is the frame's optional trailing EOL; the
    // second is a heart-beat.
    let mut buf = BytesMut::from(&b"RECEIPT\nreceipt-id:1\n\n\0\n\n"[..]);

    expect_frame(next(&mut codec, &mut buf), Command::Receipt);
    assert_eq!(next(&mut codec, &mut buf), StompItem::Heartbeat);
    assert!(buf.is_empty());
}

#[test]
fn interleaved_heartbeats_and_frames() {
    let mut codec = StompCodec::new();
    let data = b"\nRECEIPT\nreceipt-id:7\n\n\0\n\nMESSAGE\nmessage-id:1\n\nbody\0\n\n";
    let mut buf = BytesMut::from(&data[..]);

    assert_eq!(next(&mut codec, &mut buf), StompItem::Heartbeat);
    expect_frame(next(&mut codec, &mut buf), Command::Receipt);
    assert_eq!(next(&mut codec, &mut buf), StompItem::Heartbeat);
    let f = expect_frame(next(&mut codec, &mut buf), Command::Message);
    assert_eq!(f.body, b"body");
    assert_eq!(next(&mut codec, &mut buf), StompItem::Heartbeat);
    assert!(buf.is_empty());
}

#[test]
fn heartbeat_does_not_corrupt_subsequent_frame_data() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"\nCONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0"[..]);

    assert_eq!(next(&mut codec, &mut buf), StompItem::Heartbeat);
    let f = expect_frame(next(&mut codec, &mut buf), Command::Connected);
    assert_eq!(f.headers.len(), 2);
    assert_eq!(f.get_header("version"), Some("1.2"));
    assert_eq!(f.get_header("heart-beat"), Some("0,0"));
}

#[test]
fn frame_split_across_messages_is_reassembled() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"MESSAGE\ndestination:/topic/gree"[..]);
    assert_eq!(codec.decode(&mut buf).expect("decode failed"), None);

    buf.extend_from_slice(b"tings\n\n{\"content\":\"hi\"}\0");
    let f = expect_frame(next(&mut codec, &mut buf), Command::Message);
    assert_eq!(f.destination(), Some("/topic/greetings"));
    assert_eq!(f.body_str(), Some("{\"content\":\"hi\"}"));
}

#[test]
fn encode_heartbeat() {
    let mut codec = StompCodec::new();
    let mut dst = BytesMut::new();
    codec
        .encode(StompItem::Heartbeat, &mut dst)
        .expect("encode failed");
    assert_eq!(&dst[..], b"\n");
}

#[test]
fn encode_frame_then_heartbeat() {
    let mut codec = StompCodec::new();
    let mut dst = BytesMut::new();

    let frame = Frame::new(Command::Send)
        .header("destination", "/app/hello")
        .set_body(b"{\"name\":\"X\"}".to_vec());

    codec
        .encode(StompItem::Frame(frame), &mut dst)
        .expect("encode failed");
    codec
        .encode(StompItem::Heartbeat, &mut dst)
        .expect("encode failed");

    let len = dst.len();
    assert_eq!(dst[len - 2], 0x00);
    assert_eq!(dst[len - 1], 0x0A);
}
