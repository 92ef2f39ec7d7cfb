use bytes::BytesMut;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stomp_ws::codec::{StompCodec, StompItem};
use stomp_ws::{Command, DecodeError, Frame, Greeting, payload};
use tokio_util::codec::{Decoder, Encoder};

/// Split `bytes` into randomly sized chunks, as WebSocket messages might.
fn random_chunks(rng: &mut StdRng, bytes: &[u8], max: usize) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut off = 0usize;
    while off < bytes.len() {
        let sz = rng.gen_range(1..max).min(bytes.len() - off);
        chunks.push(bytes[off..off + sz].to_vec());
        off += sz;
    }
    chunks
}

/// Encode a stream of greetings (some with binary bodies) and heart-beats,
/// feed it back in random chunks, and expect every frame in order. The RNG
/// is seeded so the test is deterministic.
#[test]
fn randomized_splits_preserve_frames() {
    let mut codec = StompCodec::new();
    let mut encoded = BytesMut::new();
    let mut expected = Vec::new();
    for i in 0..200 {
        let body = if i % 7 == 0 {
            vec![0u8, 1, 2, i as u8]
        } else {
            format!("{{\"content\":\"Hello, {}!\"}}", i).into_bytes()
        };
        let f = Frame::new(Command::Message)
            .header("destination", "/topic/greetings")
            .header("message-id", i.to_string())
            .set_body(body);
        expected.push(f.clone());
        codec.encode(StompItem::Frame(f), &mut encoded).expect("encode");
        if i % 5 == 0 {
            codec.encode(StompItem::Heartbeat, &mut encoded).expect("encode");
            codec.encode(StompItem::Heartbeat, &mut encoded).expect("encode");
        }
    }

    let mut rng = StdRng::from_seed([0x42; 32]);
    let mut dec = StompCodec::new();
    let mut feed = BytesMut::new();
    let mut decoded = Vec::new();
    for c in random_chunks(&mut rng, &encoded, 64) {
        feed.extend_from_slice(&c);
        loop {
            match dec.decode(&mut feed) {
                Ok(Some(StompItem::Frame(f))) => decoded.push(f),
                Ok(Some(StompItem::Heartbeat)) => {}
                Ok(None) => break,
                Err(e) => panic!("decoder error: {}", e),
            }
        }
    }

    assert_eq!(decoded.len(), expected.len());
    for (got, want) in decoded.iter().zip(&expected) {
        assert_eq!(got.get_header("message-id"), want.get_header("message-id"));
        assert_eq!(got.body, want.body);
    }
}

/// Arbitrary bytes must never panic the decoder or make it loop: every call
/// either consumes input, asks for more, or reports an error.
#[test]
fn garbage_input_is_total() {
    let mut rng = StdRng::from_seed([0x17; 32]);
    let alphabet: &[u8] = b"MESSAGE\nSEND:\\nrc\r\0content-length:12 destination";
    for _ in 0..500 {
        let len = rng.gen_range(0..128);
        let bytes: Vec<u8> = (0..len)
            .map(|_| {
                if rng.gen_bool(0.8) {
                    alphabet[rng.gen_range(0..alphabet.len())]
                } else {
                    rng.r#gen::<u8>()
                }
            })
            .collect();

        let mut codec = StompCodec::new();
        let mut buf = BytesMut::from(&bytes[..]);
        for _ in 0..=bytes.len() {
            let before = buf.len();
            match codec.decode(&mut buf) {
                Ok(Some(_)) => assert!(buf.len() < before, "item without consuming input"),
                Ok(None) | Err(_) => break,
            }
        }
    }
}

/// Random bodies either decode as a Greeting or yield a DecodeError.
#[test]
fn payload_decode_is_total() {
    let mut rng = StdRng::from_seed([0x33; 32]);
    let fragments = ["{", "}", "\"content\"", ":", "\"hi\"", ",", "null", "1", "[", "]", " "];
    for _ in 0..500 {
        let parts = rng.gen_range(0..8);
        let body: String = (0..parts)
            .map(|_| fragments[rng.gen_range(0..fragments.len())])
            .collect();
        let frame = Frame::new(Command::Message)
            .header("destination", "/topic/greetings")
            .set_body(body.clone().into_bytes());

        match payload::decode::<Greeting>(&frame) {
            Ok(g) => assert_eq!(g.content, "hi", "{body:?}"),
            Err(DecodeError::EmptyBody) => assert!(body.is_empty()),
            Err(DecodeError::Json(_)) => {}
            Err(other) => panic!("unexpected {other} for {body:?}"),
        }
    }
}
