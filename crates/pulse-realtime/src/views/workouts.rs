use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use pulse_core::events::EventType;
use pulse_core::payloads::WorkoutUpdate;

use super::ViewSubscriptions;
use crate::manager::ConnectionManager;

pub const DEFAULT_WORKOUT_CAPACITY: usize = 50;

/// Most recent workout updates, newest first. Once `capacity` entries are
/// held the oldest is evicted.
pub struct WorkoutFeedView {
    updates: Arc<Mutex<VecDeque<WorkoutUpdate>>>,
    capacity: usize,
    _subscriptions: ViewSubscriptions,
}

impl WorkoutFeedView {
    pub fn attach(manager: &ConnectionManager) -> Self {
        Self::with_capacity(manager, DEFAULT_WORKOUT_CAPACITY)
    }

    pub fn with_capacity(manager: &ConnectionManager, capacity: usize) -> Self {
        let updates = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
        let mut subscriptions = ViewSubscriptions::new(manager);
        let sink = updates.clone();
        subscriptions.add(EventType::WorkoutUpdate, move |event| {
            let update: WorkoutUpdate = event.payload_as()?;
            let mut updates = sink.lock();
            updates.push_front(update);
            updates.truncate(capacity);
            Ok(())
        });
        Self {
            updates,
            capacity,
            _subscriptions: subscriptions,
        }
    }

    pub fn updates(&self) -> Vec<WorkoutUpdate> {
        self.updates.lock().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<WorkoutUpdate> {
        self.updates.lock().front().cloned()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.updates.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.lock().is_empty()
    }
}
