use std::sync::Arc;

use parking_lot::Mutex;
use pulse_core::events::{ConnectionState, EventType};
use pulse_core::payloads::ConnectionStateChange;

use super::ViewSubscriptions;
use crate::manager::ConnectionManager;

/// Last connection state change, for status badges and retry banners.
pub struct ConnectionStatusView {
    last: Arc<Mutex<ConnectionStateChange>>,
    _subscriptions: ViewSubscriptions,
}

impl ConnectionStatusView {
    pub fn attach(manager: &ConnectionManager) -> Self {
        let last = Arc::new(Mutex::new(ConnectionStateChange {
            state: manager.state(),
            error: None,
            attempts: manager.reconnect_attempts(),
            exhausted: false,
        }));
        let mut subscriptions = ViewSubscriptions::new(manager);
        let sink = last.clone();
        subscriptions.add(EventType::ConnectionStateChange, move |event| {
            *sink.lock() = event.payload_as()?;
            Ok(())
        });
        Self {
            last,
            _subscriptions: subscriptions,
        }
    }

    pub fn snapshot(&self) -> ConnectionStateChange {
        self.last.lock().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.last.lock().state
    }

    pub fn error(&self) -> Option<String> {
        self.last.lock().error.clone()
    }

    pub fn attempts(&self) -> u32 {
        self.last.lock().attempts
    }

    /// Automatic reconnection has given up.
    pub fn exhausted(&self) -> bool {
        self.last.lock().exhausted
    }
}
