//! Typed grid client on top of [`Session`].
//!
//! Owns request id generation and (re)connection: a dead session is replaced
//! by a fresh one on the next call, while the event dispatcher and its
//! subscriptions carry over.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use gridlink_core::error::Result;

use crate::config::ClientSection;
use crate::dispatch::EventDispatcher;
use crate::transport::Session;

pub struct GridClient {
    cfg: ClientSection,
    dispatcher: Arc<EventDispatcher>,
    session: Mutex<Option<Session>>,
}

impl GridClient {
    pub fn new(cfg: ClientSection) -> Self {
        Self::with_dispatcher(cfg, EventDispatcher::new())
    }

    pub fn with_dispatcher(cfg: ClientSection, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            cfg,
            dispatcher,
            session: Mutex::new(None),
        }
    }

    pub fn dispatcher(&self) -> Arc<EventDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Current session, connecting a new one if there is none or it has ended.
    pub async fn session(&self) -> Result<Session> {
        let mut slot = self.session.lock().await;
        if let Some(s) = slot.as_ref().filter(|s| s.is_connected()) {
            return Ok(s.clone());
        }
        if slot.is_some() {
            debug!(path = %self.cfg.socket_path.display(), "previous session ended; reconnecting");
        }
        let fresh = Session::open(self.cfg.clone(), Arc::clone(&self.dispatcher)).await?;
        *slot = Some(fresh.clone());
        Ok(fresh)
    }

    pub async fn close(&self) {
        if let Some(s) = self.session.lock().await.take() {
            s.close().await;
        }
    }

    /// Generic call; a peer error object becomes `LinkError::Remote`.
    pub async fn call_method(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let session = self.session().await?;
        let id = Uuid::new_v4().to_string();
        session.send_request(id, method, params).await?.result().await
    }

    pub async fn ping(&self) -> Result<Value> {
        self.call_method("ping", None).await
    }

    pub async fn get_server_info(&self) -> Result<Value> {
        self.call_method("getServerInfo", None).await
    }

    /// Complete window manager state.
    pub async fn dump(&self) -> Result<Value> {
        self.call_method("dump", Some(json!({}))).await
    }

    pub async fn get_spaces(&self) -> Result<Value> {
        self.call_method("getSpaces", None).await
    }

    pub async fn get_windows(&self) -> Result<Value> {
        self.call_method("getWindows", None).await
    }

    /// `updates` are merged next to `windowId` in the params object.
    pub async fn update_window(&self, window_id: i64, updates: Map<String, Value>) -> Result<Value> {
        let mut params = updates;
        params.insert("windowId".into(), json!(window_id));
        self.call_method("updateWindow", Some(Value::Object(params)))
            .await
    }

    /// Ask the peer to push events of `event_type` (`"all"` for everything).
    pub async fn subscribe(&self, event_type: &str) -> Result<Value> {
        self.call_method("subscribe", Some(json!({ "eventType": event_type })))
            .await
    }

    pub async fn emit(&self, event_type: &str, data: Option<Value>) -> Result<()> {
        self.session().await?.send_event(event_type, data).await
    }
}
