//! Typed outbound commands.
//!
//! Each call builds the command body, stamps it with the session id and the
//! current time and hands it to [`ConnectionManager::send`]. A `false`
//! return means the command was dropped because the connection was not up.

use pulse_core::events::commands;
use pulse_core::ids::ThreadId;
use pulse_core::payloads::{PresenceStatus, SendMessage, StatusChange, TypingIndicator};
use serde::Serialize;
use tracing::warn;

use crate::manager::ConnectionManager;

impl ConnectionManager {
    pub fn send_message(&self, thread_id: impl Into<ThreadId>, content: impl Into<String>) -> bool {
        let body = SendMessage {
            thread_id: thread_id.into(),
            content: content.into(),
        };
        self.send_command(commands::MESSAGE, &body)
    }

    pub fn start_typing(&self, thread_id: impl Into<ThreadId>) -> bool {
        self.send_command(commands::TYPING_START, &self.typing(thread_id.into()))
    }

    pub fn stop_typing(&self, thread_id: impl Into<ThreadId>) -> bool {
        self.send_command(commands::TYPING_STOP, &self.typing(thread_id.into()))
    }

    pub fn update_status(&self, status: PresenceStatus) -> bool {
        let body = StatusChange {
            user_id: self.session().user_id().cloned(),
            status,
        };
        self.send_command(commands::STATUS_CHANGE, &body)
    }

    fn typing(&self, thread_id: ThreadId) -> TypingIndicator {
        TypingIndicator {
            thread_id,
            user_id: self.session().user_id().cloned(),
        }
    }

    fn send_command<T: Serialize>(&self, kind: &str, body: &T) -> bool {
        match serde_json::to_value(body) {
            Ok(data) => self.send(kind, data),
            Err(e) => {
                warn!(kind, error = %e, "could not encode command");
                false
            }
        }
    }
}
