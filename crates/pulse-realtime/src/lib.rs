//! # pulse-realtime
//!
//! Realtime connection and event dispatch for coaching sessions: a
//! pluggable [`Transport`], a [`ConnectionManager`] that owns the connection
//! state machine, a [`SubscriptionRegistry`] fanning inbound events out to
//! listeners, typed outbound commands and feature-scoped views.

pub mod backoff;
mod commands;
pub mod config;
pub mod hub;
pub mod manager;
pub mod registry;
pub mod reporter;
pub mod session;
pub mod transport;
pub mod views;

pub use backoff::{backoff_delay, ReconnectState};
pub use config::{endpoint_from_origin, RealtimeConfig, SimulatedConfig};
pub use hub::{RealtimeHub, TransportFactory};
pub use manager::ConnectionManager;
pub use registry::SubscriptionRegistry;
pub use reporter::{ErrorContext, ErrorReporter, Operation, RecordingReporter, TracingReporter};
pub use session::Session;
pub use transport::{
    build_transport, LiveTransport, SimulatedTransport, Transport, TransportEvent, TransportEvents,
};
#[cfg(any(test, feature = "test-util"))]
pub use transport::{MockOpen, MockTransport};
pub use views::{
    ConnectionStatusView, MessageThreadView, NotificationView, PresenceView, WorkoutFeedView,
};
