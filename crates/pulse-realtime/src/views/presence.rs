use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use pulse_core::events::EventType;
use pulse_core::ids::UserId;
use pulse_core::payloads::{PresenceStatus, StatusChange};

use super::ViewSubscriptions;
use crate::manager::ConnectionManager;

/// Latest presence status per user, from `status_change` events.
pub struct PresenceView {
    statuses: Arc<Mutex<HashMap<UserId, PresenceStatus>>>,
    _subscriptions: ViewSubscriptions,
}

impl PresenceView {
    pub fn attach(manager: &ConnectionManager) -> Self {
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let mut subscriptions = ViewSubscriptions::new(manager);
        let sink = statuses.clone();
        subscriptions.add(EventType::StatusChange, move |event| {
            let change: StatusChange = event.payload_as()?;
            // Changes without a user cannot be attributed.
            if let Some(user) = change.user_id {
                sink.lock().insert(user, change.status);
            }
            Ok(())
        });
        Self {
            statuses,
            _subscriptions: subscriptions,
        }
    }

    pub fn status_of(&self, user: &UserId) -> Option<PresenceStatus> {
        self.statuses.lock().get(user).copied()
    }

    /// Users whose last known status is online, sorted.
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .statuses
            .lock()
            .iter()
            .filter(|(_, status)| **status == PresenceStatus::Online)
            .map(|(user, _)| user.clone())
            .collect();
        users.sort();
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::views::testing::Fixture;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn latest_status_wins() {
        let fx = Fixture::connected(Session::new()).await;
        let view = PresenceView::attach(&fx.manager);

        fx.deliver(EventType::StatusChange, json!({"userId": "coach", "status": "online"})).await;
        fx.deliver(EventType::StatusChange, json!({"userId": "ana", "status": "online"})).await;
        fx.deliver(EventType::StatusChange, json!({"userId": "coach", "status": "away"})).await;
        fx.deliver(EventType::StatusChange, json!({"status": "busy"})).await;

        assert_eq!(view.status_of(&UserId::new("coach")), Some(PresenceStatus::Away));
        assert_eq!(view.online_users(), vec![UserId::new("ana")]);
        assert_eq!(view.status_of(&UserId::new("nobody")), None);
    }
}
