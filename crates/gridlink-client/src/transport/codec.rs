//! Decode-once codec for the session's receive path.
//!
//! - One frame => validated Envelope => routed variant
//! - Responses go to correlation, events to dispatch, peer requests are refused

use gridlink_core::{
    error::Result,
    protocol::{decode_envelope, Event, Message, Request, Response},
};

#[derive(Debug)]
pub enum Inbound {
    Response(Response),
    Event(Event),
    /// Peer-initiated call; not served by this client.
    PeerRequest(Request),
}

impl Inbound {
    /// Label used for per-kind frame counters.
    pub fn label(&self) -> &'static str {
        match self {
            Inbound::Response(_) => "response",
            Inbound::Event(_) => "event",
            Inbound::PeerRequest(_) => "request",
        }
    }
}

pub fn decode(frame: &str) -> Result<Inbound> {
    let msg = decode_envelope(frame)?.into_message()?;
    Ok(match msg {
        Message::Response(r) => Inbound::Response(r),
        Message::Event(e) => Inbound::Event(e),
        Message::Request(r) => Inbound::PeerRequest(r),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_kind() {
        let frame = r#"{"type":"response","response":{"id":"r1","result":{"ok":true},"error":null}}"#;
        assert!(matches!(decode(frame).unwrap(), Inbound::Response(r) if r.id == "r1"));

        let frame = r#"{"type":"request","request":{"id":"p1","method":"getWindows","params":null}}"#;
        let inbound = decode(frame).unwrap();
        assert_eq!(inbound.label(), "request");
    }

    #[test]
    fn invalid_frame_is_malformed() {
        let err = decode("not json").unwrap_err();
        assert_eq!(err.kind().as_str(), "MALFORMED_MESSAGE");
    }
}
