//! End-to-end tests: simulated transport on virtual time, and the live
//! transport against a real WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::timeout;

use pulse_core::events::{ConnectionState, EventType};
use pulse_core::ids::UserId;
use pulse_core::payloads::{ChatMessage, ConnectionStateChange, PresenceStatus};
use pulse_realtime::transport::DEMO_THREAD_ID;
use pulse_realtime::{
    ConnectionManager, ConnectionStatusView, LiveTransport, MessageThreadView, NotificationView, PresenceView,
    RealtimeConfig, RealtimeHub, RecordingReporter, Session, SimulatedConfig, SimulatedTransport,
    WorkoutFeedView,
};
use pulse_settings::TransportKind;

const TIMEOUT: Duration = Duration::from_secs(5);

fn simulated(session: Session, sim: SimulatedConfig) -> ConnectionManager {
    let config = RealtimeConfig::default().simulated(sim.clone());
    let transport = Arc::new(SimulatedTransport::new(sim, session.clone()));
    ConnectionManager::new(session, config, transport, Arc::new(RecordingReporter::new()))
}

#[tokio::test(start_paused = true)]
async fn simulated_echo_round_trip() {
    let manager = simulated(Session::for_user("athlete-1"), SimulatedConfig::quiet());
    let (_id, mut inbox) = manager.subscribe_channel(EventType::MessageReceived);

    manager.connect().await.unwrap();
    assert!(manager.send_message("thread-42", "hello"));

    let event = inbox.recv().await.unwrap();
    let message: ChatMessage = event.payload_as().unwrap();
    assert_eq!(message.content, "hello");
    assert_eq!(message.thread_id.as_str(), "thread-42");

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(inbox.try_recv().is_err(), "echo must produce exactly one event");
}

#[tokio::test(start_paused = true)]
async fn disconnect_silences_simulated_session() {
    let sim = SimulatedConfig {
        random_interval: Some(Duration::from_secs(1)),
        random_probability: 1.0,
        ..SimulatedConfig::default()
    };
    let manager = simulated(Session::new(), sim);
    let seen = Arc::new(Mutex::new(0usize));
    for event_type in EventType::ALL {
        let seen = seen.clone();
        manager.subscribe(event_type, move |_| *seen.lock() += 1);
    }

    manager.connect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    manager.disconnect();

    let before = *seen.lock();
    tokio::time::sleep(Duration::from_secs(3_600)).await;
    assert_eq!(*seen.lock(), before);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn coaching_script_populates_views() {
    let sim = SimulatedConfig {
        random_interval: None,
        ..SimulatedConfig::default()
    };
    let manager = simulated(Session::for_user("athlete-1"), sim);
    let thread = MessageThreadView::attach(&manager, DEMO_THREAD_ID);
    let notifications = NotificationView::attach(&manager);
    let workouts = WorkoutFeedView::attach(&manager);
    let presence = PresenceView::attach(&manager);

    manager.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(thread.typing_users(), vec![UserId::new("coach")]);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(thread.len(), 1);
    assert!(thread.typing_users().is_empty());
    assert_eq!(notifications.len(), 1);
    assert_eq!(workouts.len(), 1);
    assert_eq!(
        presence.status_of(&UserId::new("coach")),
        Some(PresenceStatus::Online)
    );
}

#[tokio::test(start_paused = true)]
async fn simulated_open_failures_recover() {
    let sim = SimulatedConfig {
        fail_first_opens: 2,
        ..SimulatedConfig::quiet()
    };
    let manager = simulated(Session::new(), sim);

    assert!(manager.connect().await.is_err());
    let mut states = manager.watch_state();
    timeout(Duration::from_secs(60), states.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(manager.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn hub_shares_simulated_connection() {
    let config = RealtimeConfig::default().simulated(SimulatedConfig::quiet());
    let hub = RealtimeHub::new(config, Arc::new(RecordingReporter::new())).unwrap();
    let session = Session::for_user("athlete-9");

    let chat = hub.connection(session.clone()).unwrap();
    let dashboard = hub.connection(session).unwrap();
    let view = MessageThreadView::attach(&dashboard, "t-1");

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(chat.is_connected());
    assert!(chat.send_message("t-1", "from chat"));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(view.len(), 1);

    hub.shutdown();
    assert_eq!(dashboard.state(), ConnectionState::Disconnected);
}

// ── live transport ──────────────────────────────────────────────────────

type Seen = Arc<Mutex<Vec<Value>>>;

async fn echo_socket(mut socket: WebSocket, seen: Seen) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        seen.lock().push(frame.clone());
        if frame["type"] == "message" {
            let reply = json!({
                "type": "message_received",
                "data": {
                    "id": "msg_server",
                    "threadId": frame["data"]["threadId"],
                    "content": frame["data"]["content"],
                    "senderId": "server",
                },
                "sessionId": "sess_server",
            });
            if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
                return;
            }
        }
    }
}

async fn echo_handler(ws: WebSocketUpgrade, State(seen): State<Seen>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| echo_socket(socket, seen))
}

async fn drop_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket.send(Message::Close(None)).await;
    })
}

/// Boot a WebSocket server on an ephemeral port and return its base URL.
async fn boot_server(seen: Seen) -> String {
    let router = Router::new()
        .route("/ws", get(echo_handler))
        .route("/drop", get(drop_handler))
        .with_state(seen);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("ws://{addr}")
}

fn live(session: Session, endpoint: String) -> ConnectionManager {
    let config = RealtimeConfig::new(TransportKind::Live)
        .endpoint(endpoint.clone())
        .base_delay(Duration::from_millis(50))
        .max_attempts(2);
    ConnectionManager::new(
        session,
        config,
        Arc::new(LiveTransport::new(endpoint)),
        Arc::new(RecordingReporter::new()),
    )
}

#[tokio::test]
async fn live_round_trip_with_auth_first() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let base = boot_server(seen.clone()).await;
    let session = Session::for_user("athlete-5");
    let manager = live(session.clone(), format!("{base}/ws"));
    let (_id, mut inbox) = manager.subscribe_channel(EventType::MessageReceived);

    timeout(TIMEOUT, manager.connect()).await.unwrap().unwrap();
    assert!(manager.send_message("t-live", "hello over the wire"));

    let event = timeout(TIMEOUT, inbox.recv()).await.unwrap().unwrap();
    let message: ChatMessage = event.payload_as().unwrap();
    assert_eq!(message.content, "hello over the wire");
    assert_eq!(message.thread_id.as_str(), "t-live");
    assert_eq!(event.sender_session_id.map(|s| s.to_string()), Some("sess_server".into()));

    let frames = seen.lock().clone();
    assert_eq!(frames[0]["type"], "auth");
    assert_eq!(frames[0]["data"]["userId"], "athlete-5");
    assert_eq!(frames[0]["sessionId"], session.session_id().as_str());
    assert_eq!(frames[1]["type"], "message");

    manager.disconnect();
}

#[tokio::test]
async fn live_peer_close_disconnects_and_schedules_reconnect() {
    let base = boot_server(Arc::new(Mutex::new(Vec::new()))).await;
    let manager = live(Session::new(), format!("{base}/drop"));
    let (_id, mut changes) = manager.subscribe_channel(EventType::ConnectionStateChange);
    let status = ConnectionStatusView::attach(&manager);

    // The server accepts and then immediately closes.
    timeout(TIMEOUT, manager.connect()).await.unwrap().unwrap();

    let mut seen = Vec::new();
    while seen.len() < 4 {
        let event = timeout(TIMEOUT, changes.recv()).await.unwrap().unwrap();
        seen.push(event.payload_as::<ConnectionStateChange>().unwrap());
    }
    let states: Vec<_> = seen.iter().map(|c| c.state).collect();
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
        ]
    );
    // The retry open carries the scheduled attempt.
    assert_eq!(seen[3].attempts, 1);
    assert!(seen.iter().all(|c| !c.exhausted));
    assert!(!status.exhausted());

    manager.disconnect();
    assert_eq!(status.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn live_unreachable_endpoint_fails_connect() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let manager = live(Session::new(), format!("ws://127.0.0.1:{port}/ws"));
    let result = timeout(TIMEOUT, manager.connect()).await.unwrap();
    assert!(result.is_err());
    manager.disconnect();
}
