//! Feature-scoped reductions of the event stream.
//!
//! A view subscribes to the few event types it cares about when attached,
//! folds them into local state and unsubscribes everything when dropped.
//! Payloads that fail to decode are reported through the manager's error
//! reporter and leave the view unchanged.

mod notifications;
mod presence;
mod status;
mod thread;
mod workouts;

pub use notifications::NotificationView;
pub use presence::PresenceView;
pub use status::ConnectionStatusView;
pub use thread::MessageThreadView;
pub use workouts::{WorkoutFeedView, DEFAULT_WORKOUT_CAPACITY};

use pulse_core::events::{EventEnvelope, EventType};
use pulse_core::ids::ListenerId;
use pulse_core::RealtimeError;

use crate::manager::ConnectionManager;

/// Listeners owned by one view.
struct ViewSubscriptions {
    manager: ConnectionManager,
    ids: Vec<ListenerId>,
}

impl ViewSubscriptions {
    fn new(manager: &ConnectionManager) -> Self {
        Self {
            manager: manager.clone(),
            ids: Vec::new(),
        }
    }

    fn add<F>(&mut self, event_type: EventType, callback: F)
    where
        F: Fn(&EventEnvelope) -> Result<(), RealtimeError> + Send + Sync + 'static,
    {
        self.ids.push(self.manager.try_subscribe(event_type, callback));
    }

    fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}

impl Drop for ViewSubscriptions {
    fn drop(&mut self) {
        for id in &self.ids {
            self.manager.unsubscribe(id);
        }
    }
}
