use std::sync::Arc;

use parking_lot::Mutex;
use pulse_core::events::EventType;
use pulse_core::payloads::Notification;

use super::ViewSubscriptions;
use crate::manager::ConnectionManager;

/// Inbox of notifications, newest first. Removal is local only; nothing is
/// acknowledged to the server.
pub struct NotificationView {
    items: Arc<Mutex<Vec<Notification>>>,
    _subscriptions: ViewSubscriptions,
}

impl NotificationView {
    pub fn attach(manager: &ConnectionManager) -> Self {
        let items = Arc::new(Mutex::new(Vec::new()));
        let mut subscriptions = ViewSubscriptions::new(manager);
        let sink = items.clone();
        subscriptions.add(EventType::Notification, move |event| {
            let notification: Notification = event.payload_as()?;
            sink.lock().insert(0, notification);
            Ok(())
        });
        Self {
            items,
            _subscriptions: subscriptions,
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.items.lock().clone()
    }

    /// Remove one entry by id. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|n| n.id != id);
        items.len() != before
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::views::testing::Fixture;
    use pulse_core::payloads::NotificationKind;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn newest_first_with_remove_and_clear() {
        let fx = Fixture::connected(Session::new()).await;
        let view = NotificationView::attach(&fx.manager);

        for id in ["n1", "n2", "n3"] {
            fx.deliver(EventType::Notification, json!({"id": id, "title": id})).await;
        }
        let ids: Vec<_> = view.notifications().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["n3", "n2", "n1"]);
        assert_eq!(view.notifications()[0].kind, NotificationKind::Info);

        assert!(view.remove("n2"));
        assert!(!view.remove("n2"));
        assert_eq!(view.len(), 2);

        view.clear();
        assert!(view.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ignores_other_event_types() {
        let fx = Fixture::connected(Session::new()).await;
        let view = NotificationView::attach(&fx.manager);
        fx.deliver(EventType::WorkoutUpdate, json!({"id": "w1", "workoutType": "run"})).await;
        assert!(view.is_empty());
    }
}
