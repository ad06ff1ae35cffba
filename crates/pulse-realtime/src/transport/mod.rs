//! Pluggable channel between this process and the realtime backend.
//!
//! Every implementation honours the same contract: [`Transport::open`]
//! hands back a receiver on which the transport reports `Opened` or
//! `Failed`, then inbound `Message`s, and finally `Closed` or `Failed`.
//! The connection manager only ever holds an `Arc<dyn Transport>` and never
//! asks which implementation it is talking to.

mod live;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
mod simulated;

use std::sync::Arc;

use pulse_core::events::{EventEnvelope, WireEnvelope};
use pulse_core::RealtimeError;
use pulse_settings::TransportKind;
use tokio::sync::mpsc;

use crate::config::RealtimeConfig;
use crate::session::Session;

pub use live::LiveTransport;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockOpen, MockTransport};
pub use simulated::{coaching_script, ScriptedEvent, SimulatedTransport, DEMO_THREAD_ID};

/// Lifecycle and traffic reported by a transport.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(EventEnvelope),
    Closed { reason: String },
    Failed(String),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

pub trait Transport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Start opening a fresh channel, tearing down any previous one. Must be
    /// called from within a tokio runtime.
    fn open(&self) -> TransportEvents;

    /// Hand one outbound frame to the open channel.
    fn send(&self, frame: &WireEnvelope) -> Result<(), RealtimeError>;

    /// Close the channel and cancel everything the transport scheduled.
    /// Emits nothing further on the event receiver.
    fn close(&self);
}

/// Pick the transport named by the config.
pub fn build_transport(
    config: &RealtimeConfig,
    session: &Session,
) -> Result<Arc<dyn Transport>, RealtimeError> {
    match config.transport {
        TransportKind::Live => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| RealtimeError::Config("live transport needs an endpoint".into()))?;
            Ok(Arc::new(LiveTransport::new(endpoint)))
        }
        TransportKind::Simulated => Ok(Arc::new(SimulatedTransport::new(
            config.simulated.clone(),
            session.clone(),
        ))),
    }
}
