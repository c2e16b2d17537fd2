//! Connection session over a Unix domain socket.
//!
//! Responsibilities:
//! - Connect with a bounded handshake time
//! - Receive path: read -> FrameCodec -> decode -> correlation / event queue
//! - Serialized writes through a single writer task (no interleaved frames)
//! - Teardown: fail every pending request, notify observers, stop the writer
//!
//! Lifecycle: `Disconnected -> Connecting -> Connected -> Closing -> Disconnected`.
//! A session is single-use; reconnecting means creating a new `Session`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use gridlink_core::error::{LinkError, Result};
use gridlink_core::protocol::{encode_envelope, Envelope, Event, FrameCodec, Request};

use crate::config::ClientSection;
use crate::correlation::{CorrelationTable, PendingRequest, Resolution};
use crate::dispatch::EventDispatcher;
use crate::obs::SessionMetrics;
use crate::transport::codec::{decode, Inbound};

const OUTBOUND_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Closing => "closing",
        }
    }
}

/// One frame waiting for the writer task.
struct Outbound {
    bytes: Bytes,
    ack: oneshot::Sender<std::io::Result<()>>,
}

/// Work for the dispatch task, in arrival order.
enum Queued {
    Event(Event),
    Disconnected(LinkError),
}

/// Cheap-to-clone handle to one connection.
///
/// Dropping the last clone closes the connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
    _guard: Arc<CloseOnDrop>,
}

/// Shared by every `Session` clone; the background tasks never hold it.
struct CloseOnDrop(Arc<SessionInner>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if self.0.begin_closing() {
            debug!("last session handle dropped; closing");
            self.0.shutdown.notify_one();
        }
    }
}

struct SessionInner {
    cfg: ClientSection,
    state: watch::Sender<SessionState>,
    used: AtomicBool,
    shutdown: Notify,
    out_tx: Mutex<Option<mpsc::Sender<Outbound>>>,
    table: Arc<CorrelationTable>,
    dispatcher: Arc<EventDispatcher>,
    metrics: Arc<SessionMetrics>,
}

impl Session {
    /// New session in `Disconnected`; nothing touches the socket until [`Session::connect`].
    pub fn new(cfg: ClientSection, dispatcher: Arc<EventDispatcher>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let inner = Arc::new(SessionInner {
            cfg,
            state,
            used: AtomicBool::new(false),
            shutdown: Notify::new(),
            out_tx: Mutex::new(None),
            table: CorrelationTable::new(),
            dispatcher,
            metrics: Arc::new(SessionMetrics::default()),
        });
        Self {
            _guard: Arc::new(CloseOnDrop(Arc::clone(&inner))),
            inner,
        }
    }

    /// `new` followed by `connect`.
    pub async fn open(cfg: ClientSection, dispatcher: Arc<EventDispatcher>) -> Result<Self> {
        let session = Self::new(cfg, dispatcher);
        session.connect().await?;
        Ok(session)
    }

    pub fn socket_path(&self) -> &Path {
        &self.inner.cfg.socket_path
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn dispatcher(&self) -> Arc<EventDispatcher> {
        Arc::clone(&self.inner.dispatcher)
    }

    /// Number of requests still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.table.len()
    }

    /// Connect to the configured socket and start the receive path.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let path = inner.cfg.socket_path.clone();

        if inner.used.swap(true, Ordering::SeqCst) {
            return Err(LinkError::connection(
                path.display().to_string(),
                std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "session already used; create a new session to reconnect",
                ),
            ));
        }

        inner.state.send_replace(SessionState::Connecting);
        let stream = match connect_stream(&path, inner.cfg.connect_timeout()).await {
            Ok(s) => s,
            Err(e) => {
                inner.state.send_replace(SessionState::Disconnected);
                warn!(path = %path.display(), error = %e, "connect failed");
                return Err(e);
            }
        };

        let (reader, writer) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (ev_tx, ev_rx) = mpsc::channel(inner.cfg.event_queue_capacity);

        *inner.out_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(out_tx);
        inner.state.send_replace(SessionState::Connected);

        let span = info_span!("session", path = %path.display());
        tokio::spawn(write_loop(Arc::clone(inner), writer, out_rx).instrument(span.clone()));
        tokio::spawn(
            dispatch_loop(
                Arc::clone(&inner.dispatcher),
                Arc::clone(&inner.metrics),
                ev_rx,
            )
            .instrument(span.clone()),
        );
        tokio::spawn(read_loop(Arc::clone(inner), reader, ev_tx).instrument(span));

        info!(path = %path.display(), "session connected");
        Ok(())
    }

    /// Send a request using the configured default deadline.
    pub async fn send_request(
        &self,
        id: impl Into<String>,
        method: &str,
        params: Option<Value>,
    ) -> Result<PendingRequest> {
        let deadline = self.inner.cfg.request_timeout();
        self.send_request_with_timeout(id, method, params, deadline)
            .await
    }

    /// Send a request with an explicit deadline (`None` waits until response or disconnect).
    ///
    /// The returned handle resolves exactly once. Encoding failures and duplicate
    /// ids are reported here and nothing is written.
    pub async fn send_request_with_timeout(
        &self,
        id: impl Into<String>,
        method: &str,
        params: Option<Value>,
        deadline: Option<Duration>,
    ) -> Result<PendingRequest> {
        self.ensure_connected()?;

        let id = id.into();
        let bytes = encode_envelope(&Envelope::request(Request::new(id.clone(), method, params)))?;
        let pending = self.inner.table.register(&id, method)?.with_deadline(deadline);

        // a failed write drops `pending`, which withdraws it from the table
        self.inner.write(bytes).await?;

        self.inner.metrics.outbound.inc(&[("kind", "request")]);
        debug!(%id, %method, "request sent");
        Ok(pending)
    }

    /// Fire-and-forget event to the peer.
    pub async fn send_event(&self, event_type: &str, data: Option<Value>) -> Result<()> {
        self.ensure_connected()?;

        let bytes = encode_envelope(&Envelope::event(Event::new(event_type, data)))?;
        self.inner.write(bytes).await?;

        self.inner.metrics.outbound.inc(&[("kind", "event")]);
        debug!(%event_type, "event sent");
        Ok(())
    }

    /// Close the connection. Safe to call in any state; returns once `Disconnected`.
    pub async fn close(&self) {
        if self.inner.begin_closing() {
            debug!("closing session");
            self.inner.shutdown.notify_one();
        }
        if self.state() == SessionState::Closing {
            self.closed().await;
        }
    }

    /// Resolves once the session is `Disconnected`.
    pub async fn closed(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|s| *s == SessionState::Disconnected).await;
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state() {
            SessionState::Connected => Ok(()),
            other => Err(LinkError::NotConnected {
                state: other.as_str(),
            }),
        }
    }
}

async fn connect_stream(path: &Path, limit: Duration) -> Result<UnixStream> {
    match tokio::time::timeout(limit, UnixStream::connect(path)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(LinkError::connection(path.display().to_string(), e)),
        Err(_) => Err(LinkError::connection(
            path.display().to_string(),
            std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        )),
    }
}

impl SessionInner {
    /// `Connected -> Closing`; true only for the caller that made the transition.
    fn begin_closing(&self) -> bool {
        self.state.send_if_modified(|s| {
            if *s == SessionState::Connected {
                *s = SessionState::Closing;
                true
            } else {
                false
            }
        })
    }

    async fn write(&self, bytes: Bytes) -> Result<()> {
        let tx = self
            .out_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| LinkError::NotConnected {
                state: self.state.borrow().as_str(),
            })?;

        let (ack, done) = oneshot::channel();
        tx.send(Outbound { bytes, ack })
            .await
            .map_err(|_| LinkError::ConnectionClosed("writer stopped".into()))?;
        done.await
            .map_err(|_| LinkError::ConnectionClosed("writer stopped".into()))?
            .map_err(LinkError::io)
    }

    /// Route one decoded frame. Never fails: anomalies are logged and counted.
    fn route(&self, frame: Result<String>, events: &mpsc::Sender<Queued>) {
        let inbound = match frame.and_then(|f| decode(&f)) {
            Ok(inbound) => inbound,
            Err(e) => {
                self.metrics.frames_in.inc(&[("kind", "malformed")]);
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };
        self.metrics.frames_in.inc(&[("kind", inbound.label())]);

        match inbound {
            Inbound::Response(resp) => {
                let id = resp.id.clone();
                match self.table.resolve(resp) {
                    Resolution::Resolved { method, elapsed } => {
                        self.metrics.responses.inc(&[("outcome", "resolved")]);
                        self.metrics
                            .response_latency
                            .observe(&[("method", method.as_str())], elapsed);
                        trace!(%id, %method, ?elapsed, "response resolved");
                    }
                    Resolution::NotFound => {
                        self.metrics.responses.inc(&[("outcome", "unmatched")]);
                        warn!(%id, "dropping response with no pending request");
                    }
                }
            }
            Inbound::Event(ev) => {
                let event_type = ev.event_type.clone();
                match events.try_send(Queued::Event(ev)) {
                    Ok(()) => self.metrics.events.inc(&[("outcome", "queued")]),
                    Err(_) => {
                        self.metrics.events.inc(&[("outcome", "dropped")]);
                        warn!(%event_type, "event queue full; dropping event");
                    }
                }
            }
            Inbound::PeerRequest(req) => {
                let err = LinkError::UnsupportedMessage(format!(
                    "peer-initiated request {} ({})",
                    req.id, req.method
                ));
                warn!(id = %req.id, method = %req.method, error = %err, "ignoring peer request");
            }
        }
    }

    /// Runs once, from the receive path, after the read side has stopped.
    async fn teardown(&self, reason: LinkError, events: mpsc::Sender<Queued>) {
        self.out_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let failed = self.table.close(reason.clone());
        info!(failed, reason = %reason, "session closed");

        let _ = events.send(Queued::Disconnected(reason)).await;
        self.state.send_replace(SessionState::Disconnected);
    }
}

async fn read_loop(inner: Arc<SessionInner>, mut reader: OwnedReadHalf, events: mpsc::Sender<Queued>) {
    let mut codec = FrameCodec::new(inner.cfg.max_frame_bytes);
    let mut chunk = vec![0u8; inner.cfg.read_buffer_bytes];

    let reason = loop {
        tokio::select! {
            _ = inner.shutdown.notified() => {
                break LinkError::ConnectionClosed("closed locally".into());
            }
            read = reader.read(&mut chunk) => match read {
                Ok(0) => {
                    inner.begin_closing();
                    break LinkError::ConnectionClosed("peer closed the connection".into());
                }
                Ok(n) => {
                    for frame in codec.feed(&chunk[..n]) {
                        inner.route(frame, &events);
                    }
                }
                Err(e) => {
                    inner.begin_closing();
                    warn!(error = %e, "read failed");
                    break LinkError::ConnectionClosed(format!("read failed: {e}"));
                }
            }
        }
    };

    if codec.buffered() > 0 {
        debug!(bytes = codec.buffered(), "discarding partial frame at close");
    }
    inner.teardown(reason, events).await;
}

async fn write_loop(inner: Arc<SessionInner>, mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(out) = rx.recv().await {
        let res = match writer.write_all(&out.bytes).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        let failed = res.as_ref().err().map(ToString::to_string);
        let _ = out.ack.send(res);

        if let Some(error) = failed {
            warn!(%error, "write failed; closing session");
            if inner.begin_closing() {
                inner.shutdown.notify_one();
            }
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn dispatch_loop(
    dispatcher: Arc<EventDispatcher>,
    metrics: Arc<SessionMetrics>,
    mut rx: mpsc::Receiver<Queued>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Queued::Event(ev) => {
                let report = dispatcher.dispatch(&ev).await;
                metrics.events.inc(&[("outcome", "delivered")]);
                if report.failed > 0 {
                    metrics
                        .events
                        .add(&[("outcome", "observer_failed")], report.failed as u64);
                }
            }
            Queued::Disconnected(reason) => dispatcher.notify_disconnect(&reason).await,
        }
    }
}
