//! Envelope model (JSON, one document per line).
//!
//! Every wire document carries a `type` tag and exactly one populated payload
//! slot. Payloads (`params`, `result`, `data`) are kept as opaque
//! `serde_json::Value`s; callers deserialize them into their own schema.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LinkError, Result};

/// Which payload slot of an [`Envelope`] is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Response,
    Event,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::Event => "event",
        }
    }
}

/// The only unit ever placed on the wire.
///
/// Absent slots serialize as explicit `null`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind (field name is `type` in JSON).
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub request: Option<Request>,
    #[serde(default)]
    pub response: Option<Response>,
    #[serde(default)]
    pub event: Option<Event>,
}

/// Outbound method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Caller-generated id, echoed back by the peer's response.
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Peer answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ErrorObject>,
}

/// Error information in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Error category: the peer may use integers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Int(i64),
    Text(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Int(n) => write!(f, "{n}"),
            ErrorCode::Text(s) => f.write_str(s),
        }
    }
}

/// Out-of-band notification, from the peer or emitted by this side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub data: Option<Value>,
    /// Creation instant, ISO-8601 UTC with trailing `Z` on the wire.
    pub timestamp: DateTime<Utc>,
}

/// Typed view of a validated [`Envelope`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Event(Event),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Request(_) => MessageKind::Request,
            Message::Response(_) => MessageKind::Response,
            Message::Event(_) => MessageKind::Event,
        }
    }
}

/// `null` payloads are stored as `None` so values survive a wire round-trip.
fn normalize(v: Option<Value>) -> Option<Value> {
    v.filter(|v| !v.is_null())
}

/// Convert any serializable payload to an opaque value.
pub fn to_payload(value: impl Serialize) -> Result<Option<Value>> {
    let v = serde_json::to_value(value)
        .map_err(|e| LinkError::Serialization(format!("payload: {e}")))?;
    Ok(normalize(Some(v)))
}

impl Request {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: normalize(params),
        }
    }
}

impl Response {
    /// Create a success response.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: normalize(Some(result)),
            error: None,
        }
    }

    /// Create an error response.
    pub fn failure(id: impl Into<String>, error: ErrorObject) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Get the result, turning a peer error object into [`LinkError::Remote`].
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(LinkError::Remote(err)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

impl ErrorObject {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = normalize(Some(data));
        self
    }
}

impl Event {
    /// New event stamped with the current time.
    pub fn new(event_type: impl Into<String>, data: Option<Value>) -> Self {
        Self::at(event_type, data, Utc::now())
    }

    pub fn at(event_type: impl Into<String>, data: Option<Value>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type: event_type.into(),
            data: normalize(data),
            timestamp,
        }
    }
}

impl Envelope {
    pub fn request(req: Request) -> Self {
        Self {
            kind: MessageKind::Request,
            request: Some(req),
            response: None,
            event: None,
        }
    }

    pub fn response(resp: Response) -> Self {
        Self {
            kind: MessageKind::Response,
            request: None,
            response: Some(resp),
            event: None,
        }
    }

    pub fn event(event: Event) -> Self {
        Self {
            kind: MessageKind::Event,
            request: None,
            response: None,
            event: Some(event),
        }
    }

    /// Check the payload-slot invariant and per-kind field constraints.
    pub fn validate(&self) -> Result<()> {
        let populated = [
            self.request.is_some(),
            self.response.is_some(),
            self.event.is_some(),
        ]
        .into_iter()
        .filter(|p| *p)
        .count();
        if populated != 1 {
            return Err(LinkError::MalformedMessage(format!(
                "{} envelope must carry exactly one payload, found {populated}",
                self.kind.as_str()
            )));
        }

        match self.kind {
            MessageKind::Request => {
                let req = self.request.as_ref().ok_or_else(|| slot_mismatch(self.kind))?;
                if req.method.is_empty() {
                    return Err(LinkError::MalformedMessage(format!(
                        "request {} has an empty method",
                        req.id
                    )));
                }
            }
            MessageKind::Response => {
                let resp = self.response.as_ref().ok_or_else(|| slot_mismatch(self.kind))?;
                if resp.error.is_some() && resp.result.is_some() {
                    return Err(LinkError::MalformedMessage(format!(
                        "response {} carries both result and error",
                        resp.id
                    )));
                }
            }
            MessageKind::Event => {
                let ev = self.event.as_ref().ok_or_else(|| slot_mismatch(self.kind))?;
                if ev.event_type.is_empty() {
                    return Err(LinkError::MalformedMessage("event has an empty eventType".into()));
                }
            }
        }

        // `Some(null)` reads back as `None`; only the canonical form is accepted
        if let Some(field) = self.null_payload() {
            return Err(LinkError::MalformedMessage(format!(
                "{field} is Some(null); use None for an absent payload"
            )));
        }
        Ok(())
    }

    fn null_payload(&self) -> Option<&'static str> {
        let is_null = |v: &Option<Value>| matches!(v, Some(Value::Null));
        if let Some(r) = &self.request {
            if is_null(&r.params) {
                return Some("request.params");
            }
        }
        if let Some(r) = &self.response {
            if is_null(&r.result) {
                return Some("response.result");
            }
            if r.error.as_ref().is_some_and(|e| is_null(&e.data)) {
                return Some("response.error.data");
            }
        }
        if let Some(e) = &self.event {
            if is_null(&e.data) {
                return Some("event.data");
            }
        }
        None
    }

    /// Validate and unwrap into the typed view.
    pub fn into_message(self) -> Result<Message> {
        self.validate()?;
        let kind = self.kind;
        match kind {
            MessageKind::Request => self.request.map(Message::Request),
            MessageKind::Response => self.response.map(Message::Response),
            MessageKind::Event => self.event.map(Message::Event),
        }
        .ok_or_else(|| slot_mismatch(kind))
    }
}

impl From<Message> for Envelope {
    fn from(m: Message) -> Self {
        match m {
            Message::Request(r) => Envelope::request(r),
            Message::Response(r) => Envelope::response(r),
            Message::Event(e) => Envelope::event(e),
        }
    }
}

fn slot_mismatch(kind: MessageKind) -> LinkError {
    LinkError::MalformedMessage(format!(
        "type is {} but the {} slot is empty",
        kind.as_str(),
        kind.as_str()
    ))
}
