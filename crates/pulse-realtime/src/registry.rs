use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::Mutex;
use pulse_core::events::{EventEnvelope, EventType};
use pulse_core::ids::{ListenerId, SessionId};
use pulse_core::RealtimeError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::reporter::{ErrorContext, ErrorReporter, Operation};

type Callback = Arc<dyn Fn(&EventEnvelope) -> Result<(), RealtimeError> + Send + Sync>;

/// Where a listener's events go.
#[derive(Clone)]
enum Sink {
    Callback(Callback),
    Channel(mpsc::UnboundedSender<EventEnvelope>),
}

/// Registered listener. Only its id ever leaves the registry.
struct Listener {
    id: ListenerId,
    sink: Sink,
}

/// Table of (event type → listeners). Listeners of one type are invoked in
/// registration order; nothing is promised across types.
pub struct SubscriptionRegistry {
    listeners: Mutex<HashMap<EventType, Vec<Listener>>>,
    reporter: Arc<dyn ErrorReporter>,
    session_id: Option<SessionId>,
}

impl SubscriptionRegistry {
    pub fn new(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            reporter,
            session_id: None,
        }
    }

    /// Tag reports from this registry with the owning session.
    pub fn for_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Register an infallible callback.
    pub fn subscribe<F>(&self, event_type: EventType, callback: F) -> ListenerId
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        self.try_subscribe(event_type, move |event| {
            callback(event);
            Ok(())
        })
    }

    /// Register a callback whose `Err` is reported instead of propagated.
    pub fn try_subscribe<F>(&self, event_type: EventType, callback: F) -> ListenerId
    where
        F: Fn(&EventEnvelope) -> Result<(), RealtimeError> + Send + Sync + 'static,
    {
        self.register(event_type, Sink::Callback(Arc::new(callback)))
    }

    /// Register a channel consumer. The listener prunes itself once the
    /// receiver is dropped.
    pub fn subscribe_channel(
        &self,
        event_type: EventType,
    ) -> (ListenerId, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.register(event_type, Sink::Channel(tx)), rx)
    }

    fn register(&self, event_type: EventType, sink: Sink) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.lock().entry(event_type).or_default().push(Listener {
            id: id.clone(),
            sink,
        });
        debug!(listener_id = %id, event_type = %event_type, "listener registered");
        id
    }

    /// Remove a listener. Unknown or already-removed ids are a no-op.
    /// Returns whether anything was removed.
    pub fn unsubscribe(&self, id: &ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        for list in listeners.values_mut() {
            if let Some(pos) = list.iter().position(|l| &l.id == id) {
                list.remove(pos);
                debug!(listener_id = %id, "listener removed");
                return true;
            }
        }
        false
    }

    /// Invoke every listener bound to the event's type, in registration
    /// order. A failing or panicking listener is reported and skipped; the
    /// rest still run. Returns the number of listeners invoked.
    pub fn dispatch(&self, event: &EventEnvelope) -> usize {
        // Snapshot so callbacks can subscribe/unsubscribe without deadlocking.
        let snapshot: Vec<(ListenerId, Sink)> = match self.listeners.lock().get(&event.event_type) {
            Some(list) => list.iter().map(|l| (l.id.clone(), l.sink.clone())).collect(),
            None => return 0,
        };

        let mut dead = Vec::new();
        for (id, sink) in &snapshot {
            let callback = match sink {
                Sink::Callback(callback) => callback,
                Sink::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        dead.push(id.clone());
                    }
                    continue;
                }
            };
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| callback(event)));
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(panic) => RealtimeError::Listener(panic_message(&panic)),
            };
            warn!(listener_id = %id, event_type = %event.event_type, error = %error, "listener failed");
            let mut ctx = ErrorContext::new(Operation::Dispatch).listener(event.event_type, id);
            if let Some(sid) = &self.session_id {
                ctx = ctx.session(sid);
            }
            self.reporter.report(&error, &ctx);
        }

        for id in &dead {
            self.unsubscribe(id);
        }
        snapshot.len()
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.listeners.lock().get(&event_type).map_or(0, Vec::len)
    }

    pub fn total_listeners(&self) -> usize {
        self.listeners.lock().values().map(Vec::len).sum()
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("listener panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("listener panicked: {s}")
    } else {
        "listener panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::RecordingReporter;
    use serde_json::json;

    fn registry() -> (SubscriptionRegistry, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::new());
        (SubscriptionRegistry::new(reporter.clone()), reporter)
    }

    fn event(t: EventType) -> EventEnvelope {
        EventEnvelope::new(t, json!({"n": 1}))
    }

    #[test]
    fn dispatch_invokes_each_listener_once_in_order() {
        let (reg, _) = registry();
        let calls = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let calls = calls.clone();
            reg.subscribe(EventType::Notification, move |_| calls.lock().push(i));
        }
        let invoked = reg.dispatch(&event(EventType::Notification));
        assert_eq!(invoked, 4);
        assert_eq!(*calls.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn dispatch_only_reaches_matching_type() {
        let (reg, _) = registry();
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        reg.subscribe(EventType::TypingStart, move |_| *h.lock() += 1);

        assert_eq!(reg.dispatch(&event(EventType::TypingStop)), 0);
        assert_eq!(*hits.lock(), 0);
        assert_eq!(reg.dispatch(&event(EventType::TypingStart)), 1);
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn dispatch_with_no_listeners_is_zero() {
        let (reg, _) = registry();
        for t in EventType::ALL {
            assert_eq!(reg.dispatch(&event(t)), 0);
        }
    }

    #[test]
    fn unsubscribe_stops_delivery_and_is_idempotent() {
        let (reg, _) = registry();
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        let id = reg.subscribe(EventType::WorkoutUpdate, move |_| *h.lock() += 1);

        assert!(reg.unsubscribe(&id));
        assert!(!reg.unsubscribe(&id));
        assert!(!reg.unsubscribe(&ListenerId::new()));

        reg.dispatch(&event(EventType::WorkoutUpdate));
        assert_eq!(*hits.lock(), 0);
        assert_eq!(reg.listener_count(EventType::WorkoutUpdate), 0);
    }

    #[test]
    fn panicking_listener_is_isolated_and_reported() {
        let (reg, reporter) = registry();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let c1 = calls.clone();
        reg.subscribe(EventType::MessageReceived, move |_| c1.lock().push("first"));
        let bad = reg.subscribe(EventType::MessageReceived, |_| panic!("bad listener"));
        let c3 = calls.clone();
        reg.subscribe(EventType::MessageReceived, move |_| c3.lock().push("third"));

        assert_eq!(reg.dispatch(&event(EventType::MessageReceived)), 3);
        assert_eq!(*calls.lock(), vec!["first", "third"]);

        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].0.to_string().contains("bad listener"));
        assert_eq!(reports[0].1.listener_id, Some(bad));
        assert_eq!(reports[0].1.event_type, Some(EventType::MessageReceived));
    }

    #[test]
    fn failing_listener_error_is_reported() {
        let (reg, reporter) = registry();
        reg.try_subscribe(EventType::StatusChange, |_| {
            Err(RealtimeError::Listener("cannot render".into()))
        });
        reg.dispatch(&event(EventType::StatusChange));
        assert_eq!(reporter.count_for(Operation::Dispatch), 1);
    }

    #[test]
    fn listener_may_unsubscribe_itself_during_dispatch() {
        let (reg, _) = registry();
        let reg = Arc::new(reg);
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let (r, s) = (Arc::downgrade(&reg), slot.clone());
        let id = reg.subscribe(EventType::Notification, move |_| {
            if let (Some(reg), Some(id)) = (r.upgrade(), s.lock().clone()) {
                reg.unsubscribe(&id);
            }
        });
        *slot.lock() = Some(id);

        assert_eq!(reg.dispatch(&event(EventType::Notification)), 1);
        assert_eq!(reg.listener_count(EventType::Notification), 0);
    }

    #[tokio::test]
    async fn channel_consumer_receives_and_prunes() {
        let (reg, reporter) = registry();
        let (_id, mut rx) = reg.subscribe_channel(EventType::WorkoutUpdate);

        reg.dispatch(&event(EventType::WorkoutUpdate));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.event_type, EventType::WorkoutUpdate);

        drop(rx);
        reg.dispatch(&event(EventType::WorkoutUpdate));
        assert_eq!(reg.listener_count(EventType::WorkoutUpdate), 0);
        assert_eq!(reporter.count(), 0);
    }

    #[test]
    fn counts_and_clear() {
        let (reg, _) = registry();
        reg.subscribe(EventType::TypingStart, |_| {});
        reg.subscribe(EventType::TypingStop, |_| {});
        reg.subscribe(EventType::TypingStop, |_| {});
        assert_eq!(reg.listener_count(EventType::TypingStop), 2);
        assert_eq!(reg.total_listeners(), 3);
        reg.clear();
        assert_eq!(reg.total_listeners(), 0);
    }
}
