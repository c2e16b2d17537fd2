use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use gridlink_core::error::{LinkError, Result};
use gridlink_core::protocol::Event;

/// Receives decoded events. Implementations should return quickly.
#[async_trait]
pub trait EventObserver: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str {
        "observer"
    }

    async fn on_event(&self, event: &Event) -> Result<()>;

    /// The session feeding this dispatcher has ended.
    async fn on_disconnect(&self, _reason: &LinkError) {}
}

/// Handle returned by [`EventDispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Delivery summary of one [`EventDispatcher::dispatch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

type Registration = (SubscriptionId, Arc<dyn EventObserver>);

/// Fan-out of events to registered observers, in subscription order.
///
/// Outlives any single session: a reconnect can reuse the same dispatcher.
#[derive(Default)]
pub struct EventDispatcher {
    observers: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self, observer: Arc<dyn EventObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(observer = observer.name(), ?id, "observer subscribed");
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Subscribe a plain closure.
    pub fn subscribe_fn<F>(&self, name: impl Into<String>, f: F) -> SubscriptionId
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnObserver {
            name: name.into(),
            f,
        }))
    }

    /// Subscribe a bounded channel; events that do not fit are reported as observer failures.
    pub fn subscribe_channel(&self, capacity: usize) -> (SubscriptionId, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (self.subscribe(Arc::new(ChannelObserver { tx })), rx)
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        before != observers.len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Consistent view taken once per dispatch; the lock is not held across awaits.
    fn snapshot(&self) -> Vec<Registration> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver `event` to every observer subscribed at call time.
    ///
    /// Observer errors and panics are logged per observer and never stop delivery.
    pub async fn dispatch(&self, event: &Event) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (id, observer) in self.snapshot() {
            let outcome = AssertUnwindSafe(observer.on_event(event)).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        observer = observer.name(),
                        ?id,
                        event_type = %event.event_type,
                        error = %e,
                        "observer failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(
                        observer = observer.name(),
                        ?id,
                        event_type = %event.event_type,
                        "observer panicked"
                    );
                }
            }
        }
        report
    }

    /// Tell every observer the stream ended. Observers stay subscribed.
    pub async fn notify_disconnect(&self, reason: &LinkError) {
        for (id, observer) in self.snapshot() {
            let outcome = AssertUnwindSafe(observer.on_disconnect(reason))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                warn!(observer = observer.name(), ?id, "observer panicked on disconnect");
            }
        }
    }
}

struct FnObserver<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> EventObserver for FnObserver<F>
where
    F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: &Event) -> Result<()> {
        (self.f)(event)
    }
}

struct ChannelObserver {
    tx: mpsc::Sender<Event>,
}

#[async_trait]
impl EventObserver for ChannelObserver {
    fn name(&self) -> &str {
        "channel"
    }

    async fn on_event(&self, event: &Event) -> Result<()> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => LinkError::io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "event channel full",
            )),
            mpsc::error::TrySendError::Closed(_) => {
                LinkError::ConnectionClosed("event channel receiver dropped".into())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventObserver for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        async fn on_event(&self, event: &Event) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.label, event.event_type));
            Ok(())
        }

        async fn on_disconnect(&self, _reason: &LinkError) {
            self.log.lock().unwrap().push(format!("{}:disconnect", self.label));
        }
    }

    struct Failing;

    #[async_trait]
    impl EventObserver for Failing {
        async fn on_event(&self, _event: &Event) -> Result<()> {
            Err(LinkError::MalformedMessage("observer rejected event".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl EventObserver for Panicking {
        async fn on_event(&self, _event: &Event) -> Result<()> {
            panic!("observer bug");
        }
    }

    fn recorder(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Recorder> {
        Arc::new(Recorder {
            label,
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn delivers_in_subscription_order() {
        let d = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        d.subscribe(recorder("first", &log));
        d.subscribe(recorder("second", &log));

        let report = d.dispatch(&Event::new("windowMoved", None)).await;
        assert_eq!(report, DispatchReport { delivered: 2, failed: 0 });
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:windowMoved", "second:windowMoved"]
        );
    }

    #[tokio::test]
    async fn failing_and_panicking_observers_do_not_block_others() {
        let d = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        d.subscribe(Arc::new(Failing));
        d.subscribe(Arc::new(Panicking));
        d.subscribe(recorder("last", &log));

        let report = d.dispatch(&Event::new("spaceChanged", None)).await;
        assert_eq!(report, DispatchReport { delivered: 1, failed: 2 });
        assert_eq!(*log.lock().unwrap(), vec!["last:spaceChanged"]);
    }

    #[tokio::test]
    async fn unsubscribed_observer_stops_receiving() {
        let d = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = d.subscribe(recorder("a", &log));
        d.subscribe(recorder("b", &log));

        assert!(d.unsubscribe(a));
        assert!(!d.unsubscribe(a));
        assert_eq!(d.observer_count(), 1);

        d.dispatch(&Event::new("x", None)).await;
        assert_eq!(*log.lock().unwrap(), vec!["b:x"]);
    }

    #[tokio::test]
    async fn disconnect_keeps_subscriptions() {
        let d = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        d.subscribe(recorder("a", &log));

        d.notify_disconnect(&LinkError::ConnectionClosed("peer closed".into()))
            .await;
        d.dispatch(&Event::new("again", None)).await;
        assert_eq!(*log.lock().unwrap(), vec!["a:disconnect", "a:again"]);
    }

    #[tokio::test]
    async fn channel_and_closure_observers() {
        let d = EventDispatcher::new();
        let (_, mut rx) = d.subscribe_channel(1);
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        d.subscribe_fn("counter", move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

        let first = d.dispatch(&Event::new("one", None)).await;
        assert_eq!(first.delivered, 2);
        // channel capacity is 1 and nobody drained it yet
        let second = d.dispatch(&Event::new("two", None)).await;
        assert_eq!(second, DispatchReport { delivered: 1, failed: 1 });

        assert_eq!(rx.recv().await.unwrap().event_type, "one");
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }
}
