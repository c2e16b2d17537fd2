//! Protocol modules (envelope model + line framing).
//!
//! - `envelope`: the request/response/event document and its invariants.
//! - `frame`: newline-delimited reassembly and envelope encode/decode.
//!
//! All parsers are panic-free: malformed input is reported as
//! `LinkError::MalformedMessage` for that single frame instead of aborting the
//! stream, so one bad line never takes the receive path down.

pub mod envelope;
pub mod frame;

pub use envelope::{Envelope, ErrorCode, ErrorObject, Event, Message, MessageKind, Request, Response};
pub use frame::{decode_envelope, encode_envelope, FrameCodec, Frames};
