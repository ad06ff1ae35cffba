//! Connection lifecycle for one realtime session.
//!
//! The manager owns exactly one transport, one subscription registry and
//! the reconnection/heartbeat timers. State only changes through the
//! transitions below:
//!
//! ```text
//! disconnected ──connect()──▶ connecting ──opened──▶ connected
//!       ▲                        │  ▲                    │
//!       │                   failed  │ retry timer    closed / error
//!       │                        ▼  │                    │
//!       └──── exhausted ──────  error ◀──────────────────┘
//! ```
//!
//! `disconnect()` moves any state to `disconnected` and suppresses further
//! automatic reconnection until the next `connect()`.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use pulse_core::events::{commands, ConnectionState, EventEnvelope, EventType, WireEnvelope};
use pulse_core::ids::ListenerId;
use pulse_core::payloads::{AuthHandshake, ConnectionStateChange};
use pulse_core::RealtimeError;
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::backoff::ReconnectState;
use crate::config::RealtimeConfig;
use crate::registry::SubscriptionRegistry;
use crate::reporter::{ErrorContext, ErrorReporter, Operation};
use crate::session::Session;
use crate::transport::{build_transport, Transport, TransportEvent, TransportEvents};

type Waiter = oneshot::Sender<Result<(), RealtimeError>>;

/// Cheap, cloneable handle to one session's connection. Clones share the
/// same transport, registry and state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    session: Session,
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    registry: SubscriptionRegistry,
    reporter: Arc<dyn ErrorReporter>,
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<ConnectionState>,
}

struct Lifecycle {
    state: ConnectionState,
    reconnect: ReconnectState,
    /// Bumped whenever the current transport channel is abandoned; events
    /// and timers tagged with an older value are ignored.
    generation: u64,
    closed_by_caller: bool,
    /// Exhaustion has been reported since the last successful open.
    exhausted: bool,
    waiters: Vec<Waiter>,
    /// Runtime the connection was opened on. Timers started from a thread
    /// outside any runtime (a failed `send`, for one) are spawned here.
    runtime: Option<Handle>,
    pump: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

impl Lifecycle {
    fn spawn<F>(&self, task: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match Handle::try_current() {
            Ok(handle) => Some(handle.spawn(task)),
            Err(_) => self.runtime.as_ref().map(|handle| handle.spawn(task)),
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(task) = self.retry.take() {
            task.abort();
        }
    }

    fn stop_pump(&mut self) {
        if let Some(task) = self.pump.take() {
            task.abort();
        }
    }

    fn resolve_waiters(&mut self, outcome: &Result<(), RealtimeError>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Side effects collected under the lifecycle lock and run after it is
/// released, so reporters and listeners may call back into the manager.
#[derive(Default)]
struct Effects {
    reports: Vec<(RealtimeError, ErrorContext)>,
    changes: Vec<ConnectionStateChange>,
    inbound: Option<EventEnvelope>,
}

impl ConnectionManager {
    pub fn new(
        session: Session,
        config: RealtimeConfig,
        transport: Arc<dyn Transport>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let registry =
            SubscriptionRegistry::new(reporter.clone()).for_session(session.session_id().clone());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let reconnect = ReconnectState::new(config.base_delay, config.max_attempts);
        Self {
            inner: Arc::new(Inner {
                session,
                config,
                transport,
                registry,
                reporter,
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectionState::Disconnected,
                    reconnect,
                    generation: 0,
                    closed_by_caller: false,
                    exhausted: false,
                    waiters: Vec::new(),
                    runtime: Handle::try_current().ok(),
                    pump: None,
                    heartbeat: None,
                    retry: None,
                }),
                state_tx,
            }),
        }
    }

    /// Validate the config and build the transport it names.
    pub fn from_config(
        session: Session,
        config: RealtimeConfig,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self, RealtimeError> {
        config.validate()?;
        let transport = build_transport(&config, &session)?;
        Ok(Self::new(session, config, transport, reporter))
    }

    /// Open the transport and wait for the outcome. Resolves immediately
    /// when already connected; callers arriving while an open is in flight
    /// share its outcome. A failure is returned to this caller only, while
    /// reconnection continues in the background.
    pub async fn connect(&self) -> Result<(), RealtimeError> {
        let (tx, rx) = oneshot::channel();
        let mut effects = Effects::default();
        {
            let mut lc = self.inner.lifecycle.lock();
            if let Ok(handle) = Handle::try_current() {
                lc.runtime = Some(handle);
            }
            match lc.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => lc.waiters.push(tx),
                ConnectionState::Disconnected | ConnectionState::Error => {
                    lc.closed_by_caller = false;
                    lc.cancel_retry();
                    lc.waiters.push(tx);
                    effects.changes.push(self.inner.begin_open(&mut lc));
                }
            }
        }
        self.inner.apply(effects);
        rx.await.unwrap_or(Err(RealtimeError::Cancelled))
    }

    /// Close the transport, cancel every timer and stay disconnected until
    /// the next `connect()`. Pending `connect()` calls fail with
    /// `Cancelled`.
    pub fn disconnect(&self) {
        let mut effects = Effects::default();
        {
            let mut lc = self.inner.lifecycle.lock();
            lc.closed_by_caller = true;
            lc.stop_pump();
            lc.stop_heartbeat();
            lc.cancel_retry();
            lc.generation += 1;
            lc.resolve_waiters(&Err(RealtimeError::Cancelled));
            self.inner.transport.close();
            if lc.state != ConnectionState::Disconnected {
                effects
                    .changes
                    .push(self.inner.transition(&mut lc, ConnectionState::Disconnected, None));
            }
        }
        info!(session_id = %self.inner.session.session_id(), "disconnected by caller");
        self.inner.apply(effects);
    }

    /// Forward an outbound command to the transport. Returns `false` and
    /// drops the command when not connected; there is no outbound queue.
    pub fn send(&self, kind: &str, data: Value) -> bool {
        let mut effects = Effects::default();
        let delivered = {
            let mut lc = self.inner.lifecycle.lock();
            if lc.state != ConnectionState::Connected {
                warn!(
                    session_id = %self.inner.session.session_id(),
                    kind,
                    state = %lc.state,
                    "dropping send while not connected"
                );
                false
            } else {
                self.inner.transmit(&mut lc, kind, data, &mut effects).is_ok()
            }
        };
        self.inner.apply(effects);
        delivered
    }

    pub fn subscribe<F>(&self, event_type: EventType, callback: F) -> ListenerId
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(event_type, callback)
    }

    pub fn try_subscribe<F>(&self, event_type: EventType, callback: F) -> ListenerId
    where
        F: Fn(&EventEnvelope) -> Result<(), RealtimeError> + Send + Sync + 'static,
    {
        self.inner.registry.try_subscribe(event_type, callback)
    }

    pub fn subscribe_channel(
        &self,
        event_type: EventType,
    ) -> (ListenerId, mpsc::UnboundedReceiver<EventEnvelope>) {
        self.inner.registry.subscribe_channel(event_type)
    }

    pub fn unsubscribe(&self, id: &ListenerId) -> bool {
        self.inner.registry.unsubscribe(id)
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.lock().state
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lifecycle.lock().reconnect.attempts
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    pub fn transport_name(&self) -> &'static str {
        self.inner.transport.name()
    }
}

impl Inner {
    fn transition(
        &self,
        lc: &mut Lifecycle,
        to: ConnectionState,
        error: Option<String>,
    ) -> ConnectionStateChange {
        let from = lc.state;
        lc.state = to;
        self.state_tx.send_replace(to);
        info!(
            session_id = %self.session.session_id(),
            from = %from,
            to = %to,
            attempts = lc.reconnect.attempts,
            "connection state changed"
        );
        ConnectionStateChange {
            state: to,
            error,
            attempts: lc.reconnect.attempts,
            exhausted: false,
        }
    }

    fn begin_open(self: &Arc<Self>, lc: &mut Lifecycle) -> ConnectionStateChange {
        lc.stop_pump();
        lc.generation += 1;
        let events = self.transport.open();
        lc.pump = lc.spawn(pump(Arc::downgrade(self), lc.generation, events));
        if lc.pump.is_none() {
            warn!(session_id = %self.session.session_id(), "no runtime to receive transport events on");
        }
        debug!(
            session_id = %self.session.session_id(),
            transport = self.transport.name(),
            generation = lc.generation,
            "opening transport"
        );
        self.transition(lc, ConnectionState::Connecting, None)
    }

    fn on_transport_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        let mut effects = Effects::default();
        {
            let mut lc = self.lifecycle.lock();
            if lc.generation != generation || lc.closed_by_caller {
                trace!(generation, "ignoring event from superseded transport");
                return;
            }
            match (event, lc.state) {
                (TransportEvent::Opened, ConnectionState::Connecting) => {
                    self.on_opened(&mut lc, &mut effects);
                }
                (TransportEvent::Message(event), ConnectionState::Connected) => {
                    effects.inbound = Some(event);
                }
                (TransportEvent::Message(event), state) => {
                    debug!(event_type = %event.event_type, state = %state, "dropping inbound event while not connected");
                }
                (TransportEvent::Failed(message), ConnectionState::Connecting) => {
                    self.on_open_failed(&mut lc, RealtimeError::TransportOpen(message), &mut effects);
                }
                (TransportEvent::Closed { reason }, ConnectionState::Connecting) => {
                    self.on_open_failed(&mut lc, RealtimeError::TransportClosed(reason), &mut effects);
                }
                (TransportEvent::Failed(message), ConnectionState::Connected) => {
                    let err = RealtimeError::TransportClosed(message);
                    effects.reports.push((err.clone(), self.context(Operation::Transport, &lc)));
                    self.on_lost(&mut lc, ConnectionState::Error, Some(err.to_string()), &mut effects);
                }
                (TransportEvent::Closed { reason }, ConnectionState::Connected) => {
                    warn!(session_id = %self.session.session_id(), reason = %reason, "connection closed by peer");
                    let reason = (!reason.is_empty()).then_some(reason);
                    self.on_lost(&mut lc, ConnectionState::Disconnected, reason, &mut effects);
                }
                (event, state) => {
                    trace!(?event, state = %state, "ignoring transport event");
                }
            }
        }
        self.apply(effects);
    }

    fn on_opened(self: &Arc<Self>, lc: &mut Lifecycle, effects: &mut Effects) {
        lc.reconnect.reset();
        lc.exhausted = false;
        lc.cancel_retry();
        effects
            .changes
            .push(self.transition(lc, ConnectionState::Connected, None));

        let every = self.config.heartbeat_interval;
        lc.heartbeat = lc.spawn(heartbeat(Arc::downgrade(self), lc.generation, every));

        // The handshake goes out before anything else can use the channel.
        if let Some(user_id) = self.session.user_id() {
            let auth = AuthHandshake {
                user_id: user_id.clone(),
                session_id: self.session.session_id().clone(),
            };
            let data = serde_json::to_value(&auth).unwrap_or_else(|_| json!({}));
            if let Err(e) = self.transmit(lc, commands::AUTH, data, effects) {
                lc.resolve_waiters(&Err(e));
                return;
            }
        }
        lc.resolve_waiters(&Ok(()));
    }

    fn on_open_failed(self: &Arc<Self>, lc: &mut Lifecycle, err: RealtimeError, effects: &mut Effects) {
        warn!(
            session_id = %self.session.session_id(),
            attempts = lc.reconnect.attempts,
            error = %err,
            "transport failed to open"
        );
        self.abandon_channel(lc);
        effects.reports.push((err.clone(), self.context(Operation::Open, lc)));
        lc.resolve_waiters(&Err(err.clone()));
        effects
            .changes
            .push(self.transition(lc, ConnectionState::Error, Some(err.to_string())));
        self.schedule_reconnect(lc, effects);
    }

    /// An established connection went away.
    fn on_lost(
        self: &Arc<Self>,
        lc: &mut Lifecycle,
        to: ConnectionState,
        error: Option<String>,
        effects: &mut Effects,
    ) {
        lc.stop_heartbeat();
        self.abandon_channel(lc);
        effects.changes.push(self.transition(lc, to, error));
        self.schedule_reconnect(lc, effects);
    }

    /// Stop listening to the current channel and make sure the transport
    /// lets go of it.
    fn abandon_channel(&self, lc: &mut Lifecycle) {
        lc.generation += 1;
        lc.stop_pump();
        self.transport.close();
    }

    fn schedule_reconnect(self: &Arc<Self>, lc: &mut Lifecycle, effects: &mut Effects) {
        if lc.closed_by_caller {
            return;
        }
        lc.cancel_retry();
        match lc.reconnect.next_delay() {
            Some(delay) => {
                warn!(
                    session_id = %self.session.session_id(),
                    attempt = lc.reconnect.attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "scheduling reconnect"
                );
                let weak = Arc::downgrade(self);
                let generation = lc.generation;
                lc.retry = lc.spawn(async move {
                    sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.retry(generation);
                    }
                });
                if lc.retry.is_none() {
                    let err = RealtimeError::Config("no tokio runtime to schedule reconnection on".into());
                    error!(session_id = %self.session.session_id(), error = %err, "reconnect not scheduled");
                    effects
                        .reports
                        .push((err, self.context(Operation::Reconnect, lc)));
                }
            }
            None => {
                let attempts = lc.reconnect.attempts;
                let err = RealtimeError::ReconnectExhausted { attempts };
                if !lc.exhausted {
                    lc.exhausted = true;
                    error!(session_id = %self.session.session_id(), attempts, "giving up on reconnection");
                    effects
                        .reports
                        .push((err.clone(), self.context(Operation::Reconnect, lc)));
                }
                let mut change =
                    self.transition(lc, ConnectionState::Disconnected, Some(err.to_string()));
                change.exhausted = true;
                effects.changes.push(change);
            }
        }
    }

    fn retry(self: &Arc<Self>, generation: u64) {
        let mut effects = Effects::default();
        {
            let mut lc = self.lifecycle.lock();
            if lc.generation != generation || lc.closed_by_caller {
                return;
            }
            // This task is the one running; dropping the handle detaches it.
            lc.retry = None;
            if !matches!(lc.state, ConnectionState::Error | ConnectionState::Disconnected) {
                return;
            }
            info!(
                session_id = %self.session.session_id(),
                attempt = lc.reconnect.attempts,
                "reconnecting"
            );
            effects.changes.push(self.begin_open(&mut lc));
        }
        self.apply(effects);
    }

    /// Returns false once the heartbeat should stop.
    fn heartbeat_tick(self: &Arc<Self>, generation: u64) -> bool {
        let mut effects = Effects::default();
        let alive = {
            let mut lc = self.lifecycle.lock();
            if lc.generation != generation || lc.state != ConnectionState::Connected {
                return false;
            }
            trace!(session_id = %self.session.session_id(), "heartbeat");
            self.transmit(&mut lc, commands::PING, json!({}), &mut effects)
                .is_ok()
        };
        self.apply(effects);
        alive
    }

    /// Hand a frame to the transport. A send failure takes the connection
    /// down the same way a transport error does.
    fn transmit(
        self: &Arc<Self>,
        lc: &mut Lifecycle,
        kind: &str,
        data: Value,
        effects: &mut Effects,
    ) -> Result<(), RealtimeError> {
        let frame = WireEnvelope::new(kind, data, Some(self.session.session_id().clone()));
        match self.transport.send(&frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(session_id = %self.session.session_id(), kind, error = %e, "send failed");
                effects.reports.push((e.clone(), self.context(Operation::Send, lc)));
                self.on_lost(lc, ConnectionState::Error, Some(e.to_string()), effects);
                Err(e)
            }
        }
    }

    fn context(&self, operation: Operation, lc: &Lifecycle) -> ErrorContext {
        ErrorContext::new(operation)
            .session(self.session.session_id())
            .attempts(lc.reconnect.attempts)
    }

    fn apply(&self, effects: Effects) {
        for (err, ctx) in &effects.reports {
            self.reporter.report(err, ctx);
        }
        for change in effects.changes {
            match serde_json::to_value(&change) {
                Ok(payload) => {
                    let event = EventEnvelope::new(EventType::ConnectionStateChange, payload)
                        .with_sender(self.session.session_id().clone());
                    self.registry.dispatch(&event);
                }
                Err(e) => warn!(error = %e, "could not encode state change"),
            }
        }
        if let Some(event) = effects.inbound {
            let listeners = self.registry.dispatch(&event);
            debug!(event_type = %event.event_type, listeners, "dispatched inbound event");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let lc = self.lifecycle.get_mut();
        lc.stop_pump();
        lc.stop_heartbeat();
        lc.cancel_retry();
        self.transport.close();
    }
}

async fn pump(inner: Weak<Inner>, generation: u64, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else { return };
        inner.on_transport_event(generation, event);
    }
    // The channel ended without a close or failure being reported.
    if let Some(inner) = inner.upgrade() {
        inner.on_transport_event(
            generation,
            TransportEvent::Closed {
                reason: "transport channel ended".into(),
            },
        );
    }
}

async fn heartbeat(inner: Weak<Inner>, generation: u64, every: Duration) {
    let mut ticker = interval_at(Instant::now() + every, every);
    // A stalled runtime resumes with one ping, not a burst of them.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else { return };
        if !inner.heartbeat_tick(generation) {
            return;
        }
    }
}
