use pulse_core::ids::{SessionId, UserId};

/// Identity of one logical realtime session. Fixed for the lifetime of the
/// connection manager that owns it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    session_id: SessionId,
    user_id: Option<UserId>,
}

impl Session {
    /// Anonymous session with a freshly minted id.
    pub fn new() -> Self {
        Self {
            session_id: SessionId::new(),
            user_id: None,
        }
    }

    /// Session that authenticates as `user_id` once connected.
    pub fn for_user(user_id: impl Into<UserId>) -> Self {
        Self {
            session_id: SessionId::new(),
            user_id: Some(user_id.into()),
        }
    }

    pub fn with_id(session_id: SessionId, user_id: Option<UserId>) -> Self {
        Self { session_id, user_id }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
