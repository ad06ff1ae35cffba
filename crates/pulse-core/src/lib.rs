pub mod errors;
pub mod events;
pub mod ids;
pub mod payloads;

pub use errors::RealtimeError;
pub use events::{commands, ConnectionState, EventEnvelope, EventType, WireEnvelope};
pub use ids::{ListenerId, MessageId, SessionId, ThreadId, UserId};
