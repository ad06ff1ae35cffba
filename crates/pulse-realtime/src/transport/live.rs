//! WebSocket transport over `tokio-tungstenite`.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pulse_core::events::WireEnvelope;
use pulse_core::RealtimeError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{Transport, TransportEvent, TransportEvents};

/// Frames queued for the socket task.
enum Outbound {
    Text(String),
    Close,
}

#[derive(Default)]
struct Channel {
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    task: Option<JoinHandle<()>>,
}

pub struct LiveTransport {
    endpoint: String,
    channel: Mutex<Channel>,
}

impl LiveTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            channel: Mutex::new(Channel::default()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for LiveTransport {
    fn name(&self) -> &'static str {
        "live"
    }

    fn open(&self) -> TransportEvents {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let mut channel = self.channel.lock();
        if let Some(task) = channel.task.take() {
            task.abort();
        }
        channel.outbound = Some(out_tx);
        channel.task = Some(tokio::spawn(socket_loop(
            self.endpoint.clone(),
            out_rx,
            events_tx,
        )));
        events_rx
    }

    fn send(&self, frame: &WireEnvelope) -> Result<(), RealtimeError> {
        let text = frame.to_json()?;
        let channel = self.channel.lock();
        let tx = channel.outbound.as_ref().ok_or(RealtimeError::NotConnected)?;
        tx.send(Outbound::Text(text))
            .map_err(|_| RealtimeError::TransportSend("socket task has exited".into()))
    }

    fn close(&self) {
        let mut channel = self.channel.lock();
        // The task finishes on its own after writing the close frame; a task
        // that is still connecting drops out without emitting anything.
        if let Some(tx) = channel.outbound.take() {
            let _ = tx.send(Outbound::Close);
        }
        channel.task = None;
    }
}

impl Drop for LiveTransport {
    fn drop(&mut self) {
        if let Some(task) = self.channel.get_mut().task.take() {
            task.abort();
        }
    }
}

/// Connect, report `Opened`, then pump frames in both directions until
/// either side closes.
async fn socket_loop(
    endpoint: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let connect = connect_async(endpoint.as_str());
    tokio::pin!(connect);
    let mut queued = Vec::new();

    let ws = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((ws, _response)) => break ws,
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "websocket connect failed");
                    let _ = events.send(TransportEvent::Failed(e.to_string()));
                    return;
                }
            },
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Text(text)) => queued.push(text),
                Some(Outbound::Close) | None => {
                    debug!(endpoint = %endpoint, "closed before connect completed");
                    return;
                }
            },
        }
    };

    info!(endpoint = %endpoint, "websocket open");
    let _ = events.send(TransportEvent::Opened);
    let (mut ws_tx, mut ws_rx) = ws.split();

    for text in queued {
        if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
            let _ = events.send(TransportEvent::Failed(e.to_string()));
            return;
        }
    }

    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                        let _ = events.send(TransportEvent::Failed(e.to_string()));
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return;
                }
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => match WireEnvelope::parse(text.as_str()) {
                    Ok(wire) => {
                        let kind = wire.kind.clone();
                        match wire.into_event() {
                            Some(event) => {
                                let _ = events.send(TransportEvent::Message(event));
                            }
                            None => debug!(kind = %kind, "ignoring frame of unknown type"),
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping malformed frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .unwrap_or_default();
                    let _ = events.send(TransportEvent::Closed { reason });
                    return;
                }
                // Protocol pings are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Failed(e.to_string()));
                    return;
                }
                None => {
                    let _ = events.send(TransportEvent::Closed {
                        reason: "stream ended".into(),
                    });
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_before_open_is_not_connected() {
        let transport = LiveTransport::new("ws://127.0.0.1:9/ws");
        let frame = WireEnvelope::new("ping", serde_json::Value::Null, None);
        assert!(matches!(transport.send(&frame), Err(RealtimeError::NotConnected)));
    }

    #[tokio::test]
    async fn refused_connection_reports_failed() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = LiveTransport::new(format!("ws://127.0.0.1:{port}/ws"));
        let mut events = transport.open();
        match events.recv().await {
            Some(TransportEvent::Failed(_)) => {}
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
