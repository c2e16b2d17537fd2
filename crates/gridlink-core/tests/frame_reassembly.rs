//! Reassembly of encoded envelopes split at arbitrary byte boundaries.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use serde_json::json;

use gridlink_core::protocol::{decode_envelope, encode_envelope, Envelope, Event, FrameCodec, Request, Response};

fn sample_stream() -> (Vec<Envelope>, Vec<u8>) {
    let envs = vec![
        Envelope::request(Request::new("a", "ping", None)),
        Envelope::response(Response::success("a", json!({"ok": true}))),
        Envelope::event(Event::new("windowMoved", Some(json!({"windowId": 1, "note": "multi\nline"})))),
        Envelope::response(Response::success("b", json!(["x", "y", "z"]))),
        Envelope::event(Event::new("windowFocused", Some(json!({"windowId": 2})))),
    ];
    let mut wire = Vec::new();
    for e in &envs {
        wire.extend_from_slice(&encode_envelope(e).unwrap());
    }
    (envs, wire)
}

/// Deterministic pseudo-random chunk sizes (xorshift) so failures are reproducible.
fn chunk_sizes(seed: u64, total: usize) -> Vec<usize> {
    let mut state = seed.max(1);
    let mut out = Vec::new();
    let mut used = 0;
    while used < total {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let n = ((state % 23) as usize + 1).min(total - used);
        out.push(n);
        used += n;
    }
    out
}

fn reassemble(wire: &[u8], sizes: &[usize]) -> Vec<Envelope> {
    let mut codec = FrameCodec::default();
    let mut got = Vec::new();
    let mut offset = 0;
    for n in sizes {
        for frame in codec.feed(&wire[offset..offset + n]) {
            got.push(decode_envelope(&frame.unwrap()).unwrap());
        }
        offset += n;
    }
    assert_eq!(codec.buffered(), 0);
    got
}

#[test]
fn byte_at_a_time() {
    let (envs, wire) = sample_stream();
    let sizes = vec![1; wire.len()];
    assert_eq!(reassemble(&wire, &sizes), envs);
}

#[test]
fn single_chunk() {
    let (envs, wire) = sample_stream();
    assert_eq!(reassemble(&wire, &[wire.len()]), envs);
}

#[test]
fn arbitrary_boundaries() {
    let (envs, wire) = sample_stream();
    for seed in 1..64 {
        let sizes = chunk_sizes(seed, wire.len());
        assert_eq!(reassemble(&wire, &sizes), envs, "seed={seed}");
    }
}

#[test]
fn malformed_line_does_not_swallow_the_next_frame() {
    let mut codec = FrameCodec::default();
    let good = encode_envelope(&Envelope::response(Response::success("r1", json!({"ok": true})))).unwrap();

    let mut wire = b"{\"type\":\"response\",\"respo\n".to_vec();
    wire.extend_from_slice(&good);

    let results: Vec<_> = codec
        .feed(&wire)
        .map(|f| f.and_then(|s| decode_envelope(&s)))
        .collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().unwrap_err().kind().as_str(), "MALFORMED_MESSAGE");
    assert!(results[1].is_ok());
}
