/// Error hierarchy for the realtime subsystem.
///
/// None of these cross the subscribe/send boundary as a panic or a thrown
/// failure: the connection manager turns them into state changes, synthetic
/// events and reporter calls. Only `connect()` hands one back to its caller.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("transport failed to open: {0}")]
    TransportOpen(String),

    #[error("transport send failed: {0}")]
    TransportSend(String),

    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error("not connected")]
    NotConnected,

    #[error("connect cancelled by disconnect")]
    Cancelled,

    #[error("reconnection gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("listener failed: {0}")]
    Listener(String),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),
}

impl RealtimeError {
    /// Failures that the reconnection policy reacts to.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::TransportOpen(_) | Self::TransportSend(_) | Self::TransportClosed(_)
        )
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(e: serde_json::Error) -> Self {
        RealtimeError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_classified() {
        assert!(RealtimeError::TransportOpen("refused".into()).is_connection_failure());
        assert!(RealtimeError::TransportSend("broken pipe".into()).is_connection_failure());
        assert!(RealtimeError::TransportClosed("1006".into()).is_connection_failure());
        assert!(!RealtimeError::NotConnected.is_connection_failure());
        assert!(!RealtimeError::Listener("boom".into()).is_connection_failure());
    }

    #[test]
    fn display_messages() {
        let err = RealtimeError::ReconnectExhausted { attempts: 5 };
        assert_eq!(err.to_string(), "reconnection gave up after 5 attempts");
        let err = RealtimeError::UnknownEventType("pong".into());
        assert_eq!(err.to_string(), "unknown event type: pong");
    }

    #[test]
    fn serde_error_converts() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: RealtimeError = json_err.into();
        assert!(matches!(err, RealtimeError::Serialization(_)));
    }
}
