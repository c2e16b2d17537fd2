//! Envelope vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use serde_json::json;

use gridlink_core::protocol::{
    decode_envelope, encode_envelope, Envelope, ErrorCode, ErrorObject, Event, Message, Request,
    Response,
};

mod vector_loader;
use vector_loader::load;

#[test]
fn envelope_vectors() {
    let files = [
        "ping_response.json",
        "window_moved_event.json",
        "error_response.json",
        "slot_mismatch.json",
        "unknown_type.json",
        "truncated.json",
    ];

    for f in files {
        let v = load(f);
        let res = decode_envelope(&v.frame);

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.kind().as_str(), err.code, "vector={}", v.description);
            continue;
        }

        let env = res.expect("expected ok envelope");
        let ex = v.expect.expect("missing expect block");
        assert_eq!(env.kind.as_str(), ex["kind"].as_str().unwrap(), "vector={}", v.description);

        match env.into_message().unwrap() {
            Message::Response(resp) => {
                assert_eq!(resp.id, ex["id"].as_str().unwrap(), "vector={}", v.description);
                if let Some(code) = ex.get("error_code") {
                    let e = resp.error.expect("expected error object");
                    assert_eq!(e.code.to_string(), code.as_str().unwrap());
                } else {
                    assert_eq!(resp.result.as_ref(), Some(&ex["result"]), "vector={}", v.description);
                }
            }
            Message::Event(ev) => {
                assert_eq!(ev.event_type, ex["event_type"].as_str().unwrap());
                let wire = serde_json::to_value(&ev).unwrap();
                assert_eq!(wire["timestamp"], ex["timestamp"], "vector={}", v.description);
            }
            Message::Request(_) => panic!("no request vectors: {}", v.description),
        }
    }
}

#[test]
fn ping_example_result() {
    let v = load("ping_response.json");
    let resp = match decode_envelope(&v.frame).unwrap().into_message().unwrap() {
        Message::Response(r) => r,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(resp.into_result().unwrap(), json!({"ok": true}));
}

#[test]
fn valid_envelopes_round_trip() {
    let samples = vec![
        Envelope::request(Request::new("r1", "ping", None)),
        Envelope::request(Request::new(
            "r2",
            "updateWindow",
            Some(json!({"windowId": 12, "frame": [0, 0, 800.5, 600], "title": "ünïcode ✓"})),
        )),
        Envelope::response(Response::success("r1", json!({"ok": true}))),
        Envelope::response(Response::success("r3", json!(null))),
        Envelope::response(Response::failure(
            "r4",
            ErrorObject::new(ErrorCode::Text("bad_params".into()), "windowId required")
                .with_data(json!({"field": "windowId"})),
        )),
        Envelope::event(Event::new("spaceChanged", Some(json!({"spaceId": 3})))),
        Envelope::event(Event::new("heartbeat", None)),
    ];

    for env in samples {
        let bytes = encode_envelope(&env).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        let line = text.strip_suffix('\n').expect("delimiter");
        assert_eq!(decode_envelope(line).unwrap(), env, "line={line}");
    }
}
