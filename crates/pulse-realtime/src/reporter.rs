//! Error-tracking collaborator.
//!
//! The realtime core never formats or routes failures itself. Listener
//! failures, transport errors and reconnection exhaustion are handed to an
//! injected [`ErrorReporter`] together with an [`ErrorContext`].

use parking_lot::Mutex;
use pulse_core::events::EventType;
use pulse_core::ids::{ListenerId, SessionId};
use pulse_core::RealtimeError;

/// Where in the subsystem a failure was observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Dispatch,
    Open,
    Send,
    Transport,
    Reconnect,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Open => "open",
            Self::Send => "send",
            Self::Transport => "transport",
            Self::Reconnect => "reconnect",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ErrorContext {
    pub operation: Operation,
    pub session_id: Option<SessionId>,
    pub event_type: Option<EventType>,
    pub listener_id: Option<ListenerId>,
    pub attempts: Option<u32>,
}

impl ErrorContext {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            session_id: None,
            event_type: None,
            listener_id: None,
            attempts: None,
        }
    }

    pub fn session(mut self, session_id: &SessionId) -> Self {
        self.session_id = Some(session_id.clone());
        self
    }

    pub fn listener(mut self, event_type: EventType, listener_id: &ListenerId) -> Self {
        self.event_type = Some(event_type);
        self.listener_id = Some(listener_id.clone());
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }
}

pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &RealtimeError, context: &ErrorContext);
}

/// Default reporter: an `error!` line with the context as fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &RealtimeError, context: &ErrorContext) {
        tracing::error!(
            operation = context.operation.as_str(),
            session_id = context.session_id.as_ref().map(|s| s.as_str()),
            event_type = context.event_type.map(|t| t.as_str()),
            listener_id = context.listener_id.as_ref().map(|l| l.as_str()),
            attempts = context.attempts,
            error = %error,
            "realtime error"
        );
    }
}

/// Keeps every report in memory. Used by tests and by callers that want to
/// surface realtime failures in their own UI.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<(RealtimeError, ErrorContext)>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(RealtimeError, ErrorContext)> {
        self.reports.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.reports.lock().len()
    }

    /// Number of reports raised by `operation`.
    pub fn count_for(&self, operation: Operation) -> usize {
        self.reports
            .lock()
            .iter()
            .filter(|(_, ctx)| ctx.operation == operation)
            .count()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, error: &RealtimeError, context: &ErrorContext) {
        self.reports.lock().push((error.clone(), context.clone()));
    }
}
