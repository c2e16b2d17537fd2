//! Correlation table: request id -> awaiting caller.
//!
//! Entries are single-assignment. Whoever removes an entry from the map
//! (resolve, deadline expiry, disconnect, or the handle being dropped) is the
//! only party that completes it, so no id is ever resolved twice.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use gridlink_core::error::{LinkError, Result};
use gridlink_core::protocol::Response;

type Completion = oneshot::Sender<Result<Response>>;

struct PendingEntry {
    /// Distinguishes this registration from a later one reusing the same id.
    token: u64,
    method: String,
    submitted_at: Instant,
    tx: Completion,
}

/// Outcome of [`CorrelationTable::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A waiting caller received the response.
    Resolved { method: String, elapsed: Duration },
    /// No pending request with that id (never sent, timed out, or already answered).
    NotFound,
}

/// In-flight requests of one session.
#[derive(Default)]
pub struct CorrelationTable {
    pending: DashMap<String, PendingEntry>,
    next_token: AtomicU64,
    closed: OnceLock<LinkError>,
}

impl CorrelationTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `id` as pending. Fails if `id` is already in flight or the table is closed.
    pub fn register(self: &Arc<Self>, id: &str, method: &str) -> Result<PendingRequest> {
        if let Some(err) = self.closed.get() {
            return Err(err.clone());
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        match self.pending.entry(id.to_owned()) {
            Entry::Occupied(_) => return Err(LinkError::DuplicateRequestId(id.to_owned())),
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry {
                    token,
                    method: method.to_owned(),
                    submitted_at: Instant::now(),
                    tx,
                });
            }
        }

        // close() may have drained the map between the check above and the insert
        if let Some(err) = self.closed.get() {
            self.discard(id, token);
            return Err(err.clone());
        }

        trace!(%id, %method, "request registered");
        Ok(PendingRequest {
            id: id.to_owned(),
            token,
            registered_at: tokio::time::Instant::now(),
            deadline: None,
            rx,
            table: Arc::clone(self),
        })
    }

    /// Complete the pending request matching `response.id`, if any.
    pub fn resolve(&self, response: Response) -> Resolution {
        let Some((id, entry)) = self.pending.remove(&response.id) else {
            return Resolution::NotFound;
        };

        let elapsed = entry.submitted_at.elapsed();
        if entry.tx.send(Ok(response)).is_err() {
            // handle dropped while the response was in flight
            debug!(%id, "response arrived for an abandoned request");
            return Resolution::NotFound;
        }
        Resolution::Resolved {
            method: entry.method,
            elapsed,
        }
    }

    /// Complete every pending request with `err` and clear the table.
    ///
    /// Returns the number of requests failed.
    pub fn fail_all(&self, err: &LinkError) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, entry)) = self.pending.remove(&id) {
                let _ = entry.tx.send(Err(err.clone()));
                failed += 1;
            }
        }
        if failed > 0 {
            debug!(failed, error = %err, "failed all pending requests");
        }
        failed
    }

    /// Seal the table: fail everything pending and reject future registrations with `err`.
    pub fn close(&self, err: LinkError) -> usize {
        let _ = self.closed.set(err.clone());
        self.fail_all(&err)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get().is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Deadline hit: remove the entry if it is still this registration and fail it.
    fn expire(&self, id: &str, token: u64, after: Duration) -> bool {
        match self.pending.remove_if(id, |_, e| e.token == token) {
            Some((_, entry)) => {
                debug!(%id, ?after, "request timed out");
                let _ = entry.tx.send(Err(LinkError::Timeout {
                    id: id.to_owned(),
                    after,
                }));
                true
            }
            None => false,
        }
    }

    /// Remove `id` only if it still belongs to the registration `token`.
    fn discard(&self, id: &str, token: u64) -> bool {
        self.pending.remove_if(id, |_, e| e.token == token).is_some()
    }
}

/// Caller-side handle for one in-flight request.
///
/// Dropping it before resolution withdraws the request from the table; a
/// response arriving later is treated as unmatched.
pub struct PendingRequest {
    id: String,
    token: u64,
    registered_at: tokio::time::Instant,
    deadline: Option<Duration>,
    rx: oneshot::Receiver<Result<Response>>,
    table: Arc<CorrelationTable>,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl PendingRequest {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Resolve locally with [`LinkError::Timeout`] if nothing arrives within
    /// `after` of registration.
    ///
    /// The entry is expired by a timer task, so it leaves the table on time
    /// even when nobody is waiting on this handle.
    pub fn with_deadline(mut self, after: Option<Duration>) -> Self {
        self.deadline = after;
        if let (Some(after), Ok(rt)) = (after, tokio::runtime::Handle::try_current()) {
            let table: Weak<CorrelationTable> = Arc::downgrade(&self.table);
            let id = self.id.clone();
            let token = self.token;
            let at = self.registered_at + after;
            rt.spawn(async move {
                tokio::time::sleep_until(at).await;
                if let Some(table) = table.upgrade() {
                    table.expire(&id, token, after);
                }
            });
        }
        self
    }

    /// Wait for the single resolution of this request.
    pub async fn wait(mut self) -> Result<Response> {
        let outcome = match self.deadline {
            None => (&mut self.rx).await,
            Some(after) => {
                let at = self.registered_at + after;
                match tokio::time::timeout_at(at, &mut self.rx).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        // whoever removed the entry has already sent its single value
                        self.table.expire(&self.id, self.token, after);
                        (&mut self.rx).await
                    }
                }
            }
        };

        outcome.unwrap_or_else(|_| {
            Err(LinkError::ConnectionClosed(format!(
                "request {} was dropped without a response",
                self.id
            )))
        })
    }

    /// Wait and turn a peer error object into [`LinkError::Remote`].
    pub async fn result(self) -> Result<serde_json::Value> {
        self.wait().await?.into_result()
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if self.table.discard(&self.id, self.token) {
            trace!(id = %self.id, "pending request abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(id: &str) -> Response {
        Response::success(id, json!({"ok": true}))
    }

    #[tokio::test]
    async fn resolves_matching_request() {
        let table = CorrelationTable::new();
        let p = table.register("r1", "ping").unwrap();
        assert!(table.contains("r1"));

        assert!(matches!(table.resolve(ok("r1")), Resolution::Resolved { .. }));
        assert!(table.is_empty());
        assert_eq!(p.result().await.unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn out_of_order_responses_reach_their_own_callers() {
        let table = CorrelationTable::new();
        let a = table.register("a", "ping").unwrap();
        let b = table.register("b", "dump").unwrap();
        let c = table.register("c", "getSpaces").unwrap();

        table.resolve(Response::success("c", json!("C")));
        table.resolve(Response::success("a", json!("A")));
        table.resolve(Response::success("b", json!("B")));

        assert_eq!(a.result().await.unwrap(), json!("A"));
        assert_eq!(b.result().await.unwrap(), json!("B"));
        assert_eq!(c.result().await.unwrap(), json!("C"));
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_and_first_stays_pending() {
        let table = CorrelationTable::new();
        let first = table.register("dup", "ping").unwrap();
        let err = table.register("dup", "ping").unwrap_err();
        assert_eq!(err.kind().as_str(), "DUPLICATE_REQUEST_ID");

        assert_eq!(table.len(), 1);
        table.resolve(ok("dup"));
        assert!(first.wait().await.is_ok());
    }

    #[test]
    fn unknown_and_second_resolution_are_not_found() {
        let table = CorrelationTable::new();
        assert_eq!(table.resolve(ok("ghost")), Resolution::NotFound);

        let _p = table.register("r1", "ping").unwrap();
        assert!(matches!(table.resolve(ok("r1")), Resolution::Resolved { .. }));
        assert_eq!(table.resolve(ok("r1")), Resolution::NotFound);
    }

    #[tokio::test]
    async fn fail_all_resolves_everything_once() {
        let table = CorrelationTable::new();
        let handles: Vec<_> = ["x", "y", "z"]
            .iter()
            .map(|id| table.register(id, "ping").unwrap())
            .collect();

        let n = table.fail_all(&LinkError::ConnectionClosed("peer closed".into()));
        assert_eq!(n, 3);
        assert!(table.is_empty());

        for h in handles {
            let err = h.wait().await.unwrap_err();
            assert_eq!(err.kind().as_str(), "CONNECTION_CLOSED");
        }
    }

    #[test]
    fn closed_table_rejects_registration() {
        let table = CorrelationTable::new();
        table.close(LinkError::ConnectionClosed("bye".into()));
        assert!(table.is_closed());
        let err = table.register("late", "ping").unwrap_err();
        assert_eq!(err.kind().as_str(), "CONNECTION_CLOSED");
        assert!(table.is_empty());
    }

    #[test]
    fn dropping_handle_withdraws_request() {
        let table = CorrelationTable::new();
        let p = table.register("r1", "ping").unwrap();
        drop(p);
        assert!(table.is_empty());
        assert_eq!(table.resolve(ok("r1")), Resolution::NotFound);
    }

    #[tokio::test]
    async fn stale_handle_does_not_remove_reused_id() {
        let table = CorrelationTable::new();
        let old = table.register("r1", "ping").unwrap();
        table.resolve(ok("r1"));
        let fresh = table.register("r1", "ping").unwrap();

        assert!(old.wait().await.is_ok());
        assert!(table.contains("r1"));

        table.resolve(ok("r1"));
        assert!(fresh.wait().await.is_ok());
    }

    #[tokio::test]
    async fn deadline_expires_and_late_response_is_dropped() {
        let table = CorrelationTable::new();
        let p = table
            .register("slow", "dump")
            .unwrap()
            .with_deadline(Some(Duration::from_millis(20)));

        let err = p.wait().await.unwrap_err();
        assert_eq!(err.kind().as_str(), "TIMEOUT");
        assert!(table.is_empty());
        assert_eq!(table.resolve(ok("slow")), Resolution::NotFound);
    }

    #[tokio::test]
    async fn deadline_runs_from_registration_without_a_waiter() {
        let table = CorrelationTable::new();
        let p = table
            .register("slow", "dump")
            .unwrap()
            .with_deadline(Some(Duration::from_millis(30)));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(table.is_empty());
        assert_eq!(table.resolve(ok("slow")), Resolution::NotFound);

        let err = p.wait().await.unwrap_err();
        assert_eq!(err.kind().as_str(), "TIMEOUT");
    }
}
