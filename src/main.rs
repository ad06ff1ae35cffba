//! # pulse
//!
//! Command-line client for coaching sessions: loads settings, installs
//! telemetry, opens a realtime connection and either watches the event
//! stream or sends a chat message.

#![deny(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pulse_core::events::{EventEnvelope, EventType};
use pulse_core::RealtimeError;
use pulse_realtime::transport::DEMO_THREAD_ID;
use pulse_realtime::{
    ConnectionManager, ConnectionStatusView, MessageThreadView, NotificationView, PresenceView,
    RealtimeConfig, RealtimeHub, Session, TracingReporter, WorkoutFeedView,
};
use pulse_settings::{load_settings, load_settings_from_path, PulseSettings, TransportKind};
use pulse_telemetry::{init_telemetry, TelemetryConfig};
use serde_json::json;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "pulse", about = "Realtime coaching session client")]
struct Cli {
    /// Settings file (defaults to ~/.pulse/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Transport to use: live or simulated.
    #[arg(long, global = true, value_parser = parse_transport_arg)]
    transport: Option<TransportKind>,

    /// WebSocket endpoint. Implies the live transport unless --transport is given.
    #[arg(long, global = true)]
    url: Option<String>,

    /// Authenticate as this user once connected.
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and print every inbound event as a JSON line.
    Watch {
        /// Seconds to stay connected.
        #[arg(long, default_value_t = 30)]
        duration: u64,
    },
    /// Send a chat message and print the thread.
    Chat {
        #[arg(long, default_value = DEMO_THREAD_ID)]
        thread: String,

        #[arg(long)]
        message: String,

        /// Seconds to wait for replies before printing.
        #[arg(long, default_value_t = 5)]
        wait: u64,
    },
}

fn parse_transport_arg(value: &str) -> std::result::Result<TransportKind, String> {
    pulse_settings::loader::parse_transport(value)
        .ok_or_else(|| format!("unknown transport '{value}' (expected live or simulated)"))
}

impl Cli {
    fn settings(&self) -> Result<PulseSettings> {
        let mut settings = match &self.settings {
            Some(path) => load_settings_from_path(path),
            None => load_settings(),
        }
        .context("failed to load settings")?;

        if let Some(url) = &self.url {
            settings.realtime.url = Some(url.clone());
            settings.realtime.transport = TransportKind::Live;
        }
        if let Some(kind) = self.transport {
            settings.realtime.transport = kind;
        }
        Ok(settings)
    }

    fn session(&self) -> Session {
        match &self.user {
            Some(user) => Session::for_user(user.as_str()),
            None => Session::new(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;
    let _telemetry = init_telemetry(TelemetryConfig::from_settings(&settings.logging));

    // The CLI connects explicitly so it can report the first outcome.
    let config = RealtimeConfig::from_settings(&settings.realtime)
        .context("invalid realtime settings")?
        .auto_connect(false);
    let hub = RealtimeHub::new(config, Arc::new(TracingReporter))?;
    let manager = hub.connection(cli.session())?;
    info!(
        session_id = %manager.session().session_id(),
        transport = manager.transport_name(),
        "pulse starting"
    );

    let outcome = match cli.command {
        Command::Watch { duration } => watch(&manager, Duration::from_secs(duration)).await,
        Command::Chat {
            thread,
            message,
            wait,
        } => chat(&manager, &thread, &message, Duration::from_secs(wait)).await,
    };

    hub.shutdown();
    outcome
}

async fn watch(manager: &ConnectionManager, duration: Duration) -> Result<()> {
    let thread = MessageThreadView::attach(manager, DEMO_THREAD_ID);
    let notifications = NotificationView::attach(manager);
    let workouts = WorkoutFeedView::attach(manager);
    let presence = PresenceView::attach(manager);
    let status = ConnectionStatusView::attach(manager);

    let printers: Vec<_> = EventType::ALL
        .into_iter()
        .map(|event_type| {
            manager.try_subscribe(event_type, |event| {
                print_event(&mut std::io::stdout().lock(), event)
            })
        })
        .collect();

    if let Err(e) = manager.connect().await {
        warn!(error = %e, "initial connect failed, retrying in background");
    }

    tokio::select! {
        () = tokio::time::sleep(duration) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl+c")?;
            info!("interrupted");
        }
    }

    for id in &printers {
        manager.unsubscribe(id);
    }

    let last = status.snapshot();
    let summary = json!({
        "state": last.state,
        "reconnectAttempts": last.attempts,
        "messages": thread.len(),
        "notifications": notifications.len(),
        "workouts": workouts.len(),
        "online": presence.online_users(),
    });
    eprintln!("{summary}");
    Ok(())
}

async fn chat(manager: &ConnectionManager, thread: &str, message: &str, wait: Duration) -> Result<()> {
    let view = MessageThreadView::attach(manager, thread);
    manager.connect().await.context("could not connect")?;

    if !view.send(message) {
        bail!("message dropped: connection is {}", manager.state());
    }
    tokio::time::sleep(wait).await;

    let mut out = std::io::stdout().lock();
    for entry in view.messages() {
        writeln!(out, "{}", serde_json::to_string(&entry)?)?;
    }
    Ok(())
}

/// Write one event as a JSON line. A closed stdout surfaces as a listener
/// error instead of a panic.
fn print_event(out: &mut impl Write, event: &EventEnvelope) -> Result<(), RealtimeError> {
    let line = event.to_wire().to_json()?;
    writeln!(out, "{line}").map_err(|e| RealtimeError::Listener(format!("stdout: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::io;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn sample() -> EventEnvelope {
        EventEnvelope::new(EventType::StatusChange, json!({"userId": "coach", "status": "online"}))
    }

    #[test]
    fn print_event_writes_wire_json_line() {
        let mut out = Vec::new();
        print_event(&mut out, &sample()).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        let frame: Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(frame["type"], "status_change");
        assert_eq!(frame["data"]["userId"], "coach");
    }

    #[test]
    fn print_event_on_closed_stdout_is_an_error() {
        let err = print_event(&mut ClosedPipe, &sample()).unwrap_err();
        assert!(matches!(err, RealtimeError::Listener(ref msg) if msg.starts_with("stdout:")));
    }

    #[test]
    fn package_metadata_is_inherited_from_workspace() {
        assert_eq!(env!("CARGO_PKG_LICENSE"), "MIT");
        assert_eq!(env!("CARGO_PKG_RUST_VERSION"), "1.85");
    }

    #[test]
    fn cli_parses_watch_with_url() {
        let cli = Cli::parse_from(["pulse", "--url", "ws://localhost:9/ws", "watch", "--duration", "3"]);
        assert_eq!(cli.url.as_deref(), Some("ws://localhost:9/ws"));
        assert!(matches!(cli.command, Command::Watch { duration: 3 }));
    }
}
