use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pulse_core::ids::SessionId;
use pulse_core::RealtimeError;
use tracing::{debug, info, warn};

use crate::config::RealtimeConfig;
use crate::manager::ConnectionManager;
use crate::reporter::ErrorReporter;
use crate::session::Session;
use crate::transport::{build_transport, Transport};

pub type TransportFactory = Arc<
    dyn Fn(&RealtimeConfig, &Session) -> Result<Arc<dyn Transport>, RealtimeError> + Send + Sync,
>;

/// Process-wide owner of connection managers, keyed by session id.
///
/// Built once at startup and passed to every feature that needs realtime
/// traffic. Features asking for the same session share one manager, and
/// with it one transport and one subscription registry.
pub struct RealtimeHub {
    config: RealtimeConfig,
    reporter: Arc<dyn ErrorReporter>,
    factory: TransportFactory,
    connections: DashMap<SessionId, ConnectionManager>,
}

impl RealtimeHub {
    pub fn new(config: RealtimeConfig, reporter: Arc<dyn ErrorReporter>) -> Result<Self, RealtimeError> {
        config.validate()?;
        Ok(Self {
            config,
            reporter,
            factory: Arc::new(build_transport),
            connections: DashMap::new(),
        })
    }

    /// Replace how transports are built for new sessions.
    #[must_use]
    pub fn with_transport_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&RealtimeConfig, &Session) -> Result<Arc<dyn Transport>, RealtimeError>
            + Send
            + Sync
            + 'static,
    {
        self.factory = Arc::new(factory);
        self
    }

    /// Manager for `session`, created on first request. With `auto_connect`
    /// set, a new manager starts connecting in the background; that needs a
    /// running tokio runtime.
    ///
    /// The transport factory runs without any map lock held, so it may call
    /// back into the hub.
    pub fn connection(&self, session: Session) -> Result<ConnectionManager, RealtimeError> {
        if let Some(existing) = self.get(session.session_id()) {
            return Ok(existing);
        }

        let transport = (self.factory)(&self.config, &session)?;
        let manager = match self.connections.entry(session.session_id().clone()) {
            // Another caller won the race; the unopened transport is dropped.
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(entry) => entry
                .insert(ConnectionManager::new(
                    session,
                    self.config.clone(),
                    transport,
                    self.reporter.clone(),
                ))
                .clone(),
        };
        info!(
            session_id = %manager.session().session_id(),
            transport = manager.transport_name(),
            "connection manager created"
        );

        if self.config.auto_connect {
            self.spawn_connect(&manager);
        }
        Ok(manager)
    }

    fn spawn_connect(&self, manager: &ConnectionManager) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                session_id = %manager.session().session_id(),
                "auto-connect skipped outside a tokio runtime"
            );
            return;
        };
        let manager = manager.clone();
        runtime.spawn(async move {
            if let Err(e) = manager.connect().await {
                debug!(session_id = %manager.session().session_id(), error = %e, "auto-connect failed");
            }
        });
    }

    pub fn get(&self, session_id: &SessionId) -> Option<ConnectionManager> {
        self.connections.get(session_id).map(|m| m.clone())
    }

    /// Disconnect and forget a session's manager.
    pub fn remove(&self, session_id: &SessionId) -> bool {
        match self.connections.remove(session_id) {
            Some((_, manager)) => {
                manager.disconnect();
                true
            }
            None => false,
        }
    }

    /// Disconnect every manager.
    pub fn shutdown(&self) {
        let ids: Vec<SessionId> = self.connections.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            self.remove(id);
        }
        info!(sessions = ids.len(), "realtime hub shut down");
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }
}
