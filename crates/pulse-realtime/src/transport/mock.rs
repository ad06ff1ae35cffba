//! Deterministic transport for tests.
//!
//! Open outcomes are scripted up front, every open is timestamped on the
//! tokio clock and every frame handed to `send` is recorded, so tests can
//! assert on backoff timing and on what reached the wire.

use std::collections::VecDeque;

use parking_lot::Mutex;
use pulse_core::events::{EventEnvelope, WireEnvelope};
use pulse_core::RealtimeError;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{Transport, TransportEvent, TransportEvents};

/// What the next `open()` reports.
#[derive(Clone, Debug, PartialEq)]
pub enum MockOpen {
    /// `Opened` immediately.
    Succeed,
    /// `Failed` immediately.
    Fail(String),
    /// Nothing until [`MockTransport::complete_open`] or
    /// [`MockTransport::fail`] is called.
    Pending,
}

struct MockState {
    outcomes: VecDeque<MockOpen>,
    fallback: MockOpen,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    open: bool,
    opens: Vec<Instant>,
    sent: Vec<WireEnvelope>,
    closes: u32,
    send_error: Option<String>,
}

pub struct MockTransport {
    state: Mutex<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Every open succeeds.
    pub fn new() -> Self {
        Self::with_fallback(MockOpen::Succeed)
    }

    /// Every open fails with the same message.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_fallback(MockOpen::Fail(message.into()))
    }

    fn with_fallback(fallback: MockOpen) -> Self {
        Self {
            state: Mutex::new(MockState {
                outcomes: VecDeque::new(),
                fallback,
                events: None,
                open: false,
                opens: Vec::new(),
                sent: Vec::new(),
                closes: 0,
                send_error: None,
            }),
        }
    }

    /// Queue outcomes consumed by the next opens, before the fallback.
    #[must_use]
    pub fn with_outcomes(self, outcomes: impl IntoIterator<Item = MockOpen>) -> Self {
        self.state.lock().outcomes.extend(outcomes);
        self
    }

    pub fn push_outcome(&self, outcome: MockOpen) {
        self.state.lock().outcomes.push_back(outcome);
    }

    /// Outcome used once the queue is empty.
    pub fn set_fallback(&self, outcome: MockOpen) {
        self.state.lock().fallback = outcome;
    }

    /// Make subsequent sends fail with `TransportSend`.
    pub fn fail_sends(&self, message: impl Into<String>) {
        self.state.lock().send_error = Some(message.into());
    }

    /// Report `Opened` for a pending open.
    pub fn complete_open(&self) -> bool {
        let mut state = self.state.lock();
        let Some(tx) = &state.events else { return false };
        if tx.send(TransportEvent::Opened).is_err() {
            return false;
        }
        state.open = true;
        true
    }

    /// Deliver an inbound event on the current channel.
    pub fn inject(&self, event: EventEnvelope) -> bool {
        let state = self.state.lock();
        state
            .events
            .as_ref()
            .is_some_and(|tx| tx.send(TransportEvent::Message(event)).is_ok())
    }

    /// Report a peer-initiated close.
    pub fn drop_connection(&self, reason: impl Into<String>) -> bool {
        self.terminate(TransportEvent::Closed {
            reason: reason.into(),
        })
    }

    /// Report a transport error, pending or open.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.terminate(TransportEvent::Failed(message.into()))
    }

    fn terminate(&self, event: TransportEvent) -> bool {
        let mut state = self.state.lock();
        state.open = false;
        state
            .events
            .take()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Tokio instants at which `open()` was called.
    pub fn open_instants(&self) -> Vec<Instant> {
        self.state.lock().opens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens.len()
    }

    /// Frames that reached the transport, including rejected ones.
    pub fn sent(&self) -> Vec<WireEnvelope> {
        self.state.lock().sent.clone()
    }

    pub fn sent_kinds(&self) -> Vec<String> {
        self.state.lock().sent.iter().map(|f| f.kind.clone()).collect()
    }

    pub fn close_count(&self) -> u32 {
        self.state.lock().closes
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn open(&self) -> TransportEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.opens.push(Instant::now());
        state.open = false;
        let outcome = match state.outcomes.pop_front() {
            Some(outcome) => outcome,
            None => state.fallback.clone(),
        };
        match outcome {
            MockOpen::Succeed => {
                let _ = tx.send(TransportEvent::Opened);
                state.open = true;
                state.events = Some(tx);
            }
            MockOpen::Fail(message) => {
                let _ = tx.send(TransportEvent::Failed(message));
                state.events = None;
            }
            MockOpen::Pending => state.events = Some(tx),
        }
        rx
    }

    fn send(&self, frame: &WireEnvelope) -> Result<(), RealtimeError> {
        let mut state = self.state.lock();
        state.sent.push(frame.clone());
        if !state.open {
            return Err(RealtimeError::NotConnected);
        }
        match &state.send_error {
            Some(message) => Err(RealtimeError::TransportSend(message.clone())),
            None => Ok(()),
        }
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closes += 1;
        state.open = false;
        state.events = None;
    }
}
