use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use pulse_core::events::EventType;
use pulse_core::ids::{ThreadId, UserId};
use pulse_core::payloads::{ChatMessage, TypingIndicator};

use super::ViewSubscriptions;
use crate::manager::ConnectionManager;

#[derive(Default)]
struct ThreadState {
    messages: Vec<ChatMessage>,
    typing: BTreeSet<UserId>,
}

/// One chat thread: its messages in arrival order and who is typing.
pub struct MessageThreadView {
    thread_id: ThreadId,
    state: Arc<Mutex<ThreadState>>,
    subscriptions: ViewSubscriptions,
}

impl MessageThreadView {
    pub fn attach(manager: &ConnectionManager, thread_id: impl Into<ThreadId>) -> Self {
        let thread_id = thread_id.into();
        let state = Arc::new(Mutex::new(ThreadState::default()));
        let mut subscriptions = ViewSubscriptions::new(manager);

        let (s, thread) = (state.clone(), thread_id.clone());
        subscriptions.add(EventType::MessageReceived, move |event| {
            let message: ChatMessage = event.payload_as()?;
            if message.thread_id == thread {
                s.lock().messages.push(message);
            }
            Ok(())
        });

        let (s, thread) = (state.clone(), thread_id.clone());
        subscriptions.add(EventType::TypingStart, move |event| {
            let typing: TypingIndicator = event.payload_as()?;
            if let (true, Some(user)) = (typing.thread_id == thread, typing.user_id) {
                s.lock().typing.insert(user);
            }
            Ok(())
        });

        let (s, thread) = (state.clone(), thread_id.clone());
        subscriptions.add(EventType::TypingStop, move |event| {
            let typing: TypingIndicator = event.payload_as()?;
            if let (true, Some(user)) = (typing.thread_id == thread, typing.user_id) {
                s.lock().typing.remove(&user);
            }
            Ok(())
        });

        Self {
            thread_id,
            state,
            subscriptions,
        }
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().messages.is_empty()
    }

    /// Users currently typing in this thread, sorted.
    pub fn typing_users(&self) -> Vec<UserId> {
        self.state.lock().typing.iter().cloned().collect()
    }

    pub fn send(&self, content: impl Into<String>) -> bool {
        self.subscriptions
            .manager()
            .send_message(self.thread_id.clone(), content)
    }

    pub fn start_typing(&self) -> bool {
        self.subscriptions.manager().start_typing(self.thread_id.clone())
    }

    pub fn stop_typing(&self) -> bool {
        self.subscriptions.manager().stop_typing(self.thread_id.clone())
    }
}
