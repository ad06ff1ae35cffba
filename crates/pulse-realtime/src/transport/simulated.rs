//! In-process stand-in for the realtime backend.
//!
//! Used when no live endpoint is configured and as a timer-driven fixture in
//! tests. After `open_delay` it reports `Opened`, then plays a script of
//! inbound frames and, if enabled, rolls for a random event every
//! `random_interval`. Outbound chat and typing commands can be echoed back
//! as the matching inbound events.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use pulse_core::events::{commands, EventEnvelope, EventType, WireEnvelope};
use pulse_core::ids::{MessageId, ThreadId, UserId};
use pulse_core::payloads::{
    ChatMessage, Notification, NotificationKind, PresenceStatus, SendMessage, StatusChange,
    TypingIndicator, WorkoutUpdate,
};
use pulse_core::RealtimeError;
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info};

use super::{Transport, TransportEvent, TransportEvents};
use crate::config::SimulatedConfig;
use crate::session::Session;

/// Thread the demo coach talks in.
pub const DEMO_THREAD_ID: &str = "coaching";
const COACH_ID: &str = "coach";

/// One inbound frame played `after` the channel opens.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptedEvent {
    pub after: Duration,
    pub frame: WireEnvelope,
}

impl ScriptedEvent {
    pub fn new(after: Duration, event_type: EventType, data: serde_json::Value) -> Self {
        Self {
            after,
            frame: WireEnvelope::new(event_type.as_str(), data, None),
        }
    }
}

#[derive(Default)]
struct SimState {
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    open: bool,
    opens: u32,
    generation: u64,
    tasks: Vec<JoinHandle<()>>,
    sent: Vec<WireEnvelope>,
}

impl SimState {
    fn teardown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.events = None;
        self.open = false;
        self.generation += 1;
    }
}

struct Shared {
    config: SimulatedConfig,
    session: Session,
    script: Vec<ScriptedEvent>,
    state: Mutex<SimState>,
}

pub struct SimulatedTransport {
    shared: Arc<Shared>,
}

impl SimulatedTransport {
    /// Transport playing the built-in coaching script when
    /// `config.scripted` is set.
    pub fn new(config: SimulatedConfig, session: Session) -> Self {
        let script = if config.scripted {
            coaching_script(&ThreadId::new(DEMO_THREAD_ID))
        } else {
            Vec::new()
        };
        Self::with_script(config, session, script)
    }

    pub fn with_script(config: SimulatedConfig, session: Session, script: Vec<ScriptedEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                session,
                script,
                state: Mutex::new(SimState::default()),
            }),
        }
    }

    /// Simulate the peer closing an open channel.
    pub fn drop_connection(&self) {
        let mut state = self.shared.state.lock();
        if !state.open {
            return;
        }
        if let Some(tx) = &state.events {
            let _ = tx.send(TransportEvent::Closed {
                reason: "connection dropped".into(),
            });
        }
        state.teardown();
    }

    /// Every frame handed to `send`, including ones rejected while closed.
    pub fn sent_frames(&self) -> Vec<WireEnvelope> {
        self.shared.state.lock().sent.clone()
    }

    pub fn open_count(&self) -> u32 {
        self.shared.state.lock().opens
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }
}

impl Shared {
    /// Runs after `open_delay`: report the outcome and, on success, start
    /// the script and random rolls for this generation.
    fn finish_open(self: &Arc<Self>, generation: u64, fail: bool) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        let Some(tx) = state.events.clone() else { return };

        if fail {
            let _ = tx.send(TransportEvent::Failed("simulated open failure".into()));
            state.events = None;
            return;
        }

        state.open = true;
        let _ = tx.send(TransportEvent::Opened);
        info!(session_id = %self.session.session_id(), "simulated channel open");

        if !self.script.is_empty() {
            state.tasks.push(tokio::spawn(play_script(self.script.clone(), tx.clone())));
        }
        if let Some(interval) = self.config.random_interval {
            let probability = self.config.random_probability;
            state.tasks.push(tokio::spawn(roll_random(interval, probability, tx)));
        }
    }

    /// Inbound event mirroring an outbound command, if it has one.
    fn echo_of(&self, frame: &WireEnvelope) -> Option<EventEnvelope> {
        let user_id = self.session.user_id().cloned();
        let (event_type, data) = match frame.kind.as_str() {
            commands::MESSAGE => {
                let body: SendMessage = serde_json::from_value(frame.data.clone()).ok()?;
                let message = ChatMessage {
                    id: MessageId::new(),
                    thread_id: body.thread_id,
                    sender_id: user_id,
                    content: body.content,
                    timestamp: Utc::now(),
                };
                (EventType::MessageReceived, serde_json::to_value(message).ok()?)
            }
            commands::TYPING_START | commands::TYPING_STOP => {
                let mut body: TypingIndicator = serde_json::from_value(frame.data.clone()).ok()?;
                body.user_id = body.user_id.or(user_id);
                let event_type = if frame.kind == commands::TYPING_START {
                    EventType::TypingStart
                } else {
                    EventType::TypingStop
                };
                (event_type, serde_json::to_value(body).ok()?)
            }
            commands::STATUS_CHANGE => {
                let mut body: StatusChange = serde_json::from_value(frame.data.clone()).ok()?;
                body.user_id = body.user_id.or(user_id);
                (EventType::StatusChange, serde_json::to_value(body).ok()?)
            }
            _ => return None,
        };
        Some(EventEnvelope::new(event_type, data).with_sender(self.session.session_id().clone()))
    }
}

impl Transport for SimulatedTransport {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn open(&self) -> TransportEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.shared.state.lock();
        state.teardown();
        state.opens += 1;
        state.events = Some(tx);

        let generation = state.generation;
        let fail = state.opens <= self.shared.config.fail_first_opens;
        let delay = self.shared.config.open_delay;
        let shared = Arc::clone(&self.shared);
        debug!(attempt = state.opens, fail, "simulated open scheduled");
        state.tasks.push(tokio::spawn(async move {
            sleep(delay).await;
            shared.finish_open(generation, fail);
        }));
        rx
    }

    fn send(&self, frame: &WireEnvelope) -> Result<(), RealtimeError> {
        let mut state = self.shared.state.lock();
        state.sent.push(frame.clone());
        if !state.open {
            return Err(RealtimeError::NotConnected);
        }
        if !self.shared.config.echo {
            return Ok(());
        }
        if let (Some(event), Some(tx)) = (self.shared.echo_of(frame), &state.events) {
            let _ = tx.send(TransportEvent::Message(event));
        }
        Ok(())
    }

    fn close(&self) {
        self.shared.state.lock().teardown();
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        self.shared.state.lock().teardown();
    }
}

async fn play_script(script: Vec<ScriptedEvent>, tx: mpsc::UnboundedSender<TransportEvent>) {
    let start = Instant::now();
    for item in script {
        sleep_until(start + item.after).await;
        let mut frame = item.frame;
        frame.timestamp = Utc::now();
        if let Some(event) = frame.into_event() {
            if tx.send(TransportEvent::Message(event)).is_err() {
                return;
            }
        }
    }
}

async fn roll_random(
    interval: Duration,
    probability: f64,
    tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let probability = if probability.is_finite() {
        probability.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        let event = {
            let mut rng = rand::thread_rng();
            if rng.gen_bool(probability) {
                random_event(&mut rng)
            } else {
                None
            }
        };
        if let Some(event) = event {
            if tx.send(TransportEvent::Message(event)).is_err() {
                return;
            }
        }
    }
}

fn random_event(rng: &mut impl Rng) -> Option<EventEnvelope> {
    let coach = Some(UserId::new(COACH_ID));
    let (event_type, data) = match rng.gen_range(0..3) {
        0 => {
            let status = if rng.gen_bool(0.5) {
                PresenceStatus::Online
            } else {
                PresenceStatus::Away
            };
            (EventType::StatusChange, to_data(&StatusChange { user_id: coach, status })?)
        }
        1 => {
            let minutes = rng.gen_range(20..=60);
            let workout = WorkoutUpdate {
                id: format!("sim-{}", rng.r#gen::<u32>()),
                user_id: coach,
                workout_type: "strength".into(),
                summary: format!("{minutes} min strength block logged"),
                duration_minutes: Some(minutes),
                calories: Some(minutes * 8),
                timestamp: Utc::now(),
            };
            (EventType::WorkoutUpdate, to_data(&workout)?)
        }
        _ => {
            let notification = Notification {
                id: format!("sim-{}", rng.r#gen::<u32>()),
                title: "Check-in reminder".into(),
                body: "Log how today's session felt.".into(),
                kind: NotificationKind::Info,
                timestamp: Utc::now(),
            };
            (EventType::Notification, to_data(&notification)?)
        }
    };
    Some(EventEnvelope::new(event_type, data))
}

fn to_data<T: Serialize>(body: &T) -> Option<serde_json::Value> {
    serde_json::to_value(body).ok()
}

/// Demo conversation: the coach comes online, types, replies, posts a
/// workout and finishes with an achievement notification.
pub fn coaching_script(thread_id: &ThreadId) -> Vec<ScriptedEvent> {
    let coach = Some(UserId::new(COACH_ID));
    let typing = TypingIndicator {
        thread_id: thread_id.clone(),
        user_id: coach.clone(),
    };
    let reply = ChatMessage {
        id: MessageId::new(),
        thread_id: thread_id.clone(),
        sender_id: coach.clone(),
        content: "Great work yesterday. Ready for today's intervals?".into(),
        timestamp: Utc::now(),
    };
    let workout = WorkoutUpdate {
        id: "sim-workout-1".into(),
        user_id: None,
        workout_type: "run".into(),
        summary: "5 km tempo run".into(),
        duration_minutes: Some(28),
        calories: Some(320),
        timestamp: Utc::now(),
    };
    let notification = Notification {
        id: "sim-notification-1".into(),
        title: "New personal best".into(),
        body: "Fastest 5 km this month.".into(),
        kind: NotificationKind::Achievement,
        timestamp: Utc::now(),
    };
    let presence = StatusChange {
        user_id: coach,
        status: PresenceStatus::Online,
    };

    let steps: [(u64, EventType, Option<serde_json::Value>); 6] = [
        (1_000, EventType::StatusChange, to_data(&presence)),
        (2_000, EventType::TypingStart, to_data(&typing)),
        (4_000, EventType::TypingStop, to_data(&typing)),
        (4_000, EventType::MessageReceived, to_data(&reply)),
        (6_000, EventType::WorkoutUpdate, to_data(&workout)),
        (8_000, EventType::Notification, to_data(&notification)),
    ];
    steps
        .into_iter()
        .filter_map(|(ms, event_type, data)| {
            Some(ScriptedEvent::new(Duration::from_millis(ms), event_type, data?))
        })
        .collect()
}
