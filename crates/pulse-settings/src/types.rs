//! Settings types. Every struct is fully defaulted so a partial JSON file
//! only needs to mention the keys it changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    /// Realtime connection settings.
    pub realtime: RealtimeSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Which transport implementation backs the connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Real WebSocket connection to the configured endpoint.
    Live,
    /// Timer-driven fake backend, used offline and in demos.
    #[default]
    Simulated,
}

/// Realtime channel settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Explicit WebSocket URL. Wins over `origin`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Page origin the endpoint is derived from (`https://host` → `wss://host/ws`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Path appended to the origin when deriving the endpoint.
    pub path: String,
    /// Transport implementation.
    pub transport: TransportKind,
    /// Maximum automatic reconnection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Base reconnection delay in milliseconds (doubles per attempt).
    pub reconnect_base_delay_ms: u64,
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Connect as soon as a connection is requested for a session.
    pub auto_connect: bool,
    /// Simulated transport tuning.
    pub simulated: SimulatedSettings,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            url: None,
            origin: None,
            path: "/ws".to_string(),
            transport: TransportKind::Simulated,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            heartbeat_interval_ms: 30_000,
            auto_connect: true,
            simulated: SimulatedSettings::default(),
        }
    }
}

/// Simulated transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulatedSettings {
    /// Delay before the fake channel reports open, in milliseconds.
    pub open_delay_ms: u64,
    /// Play the built-in coaching script after open.
    pub scripted: bool,
    /// Interval between random event rolls, in milliseconds. 0 disables.
    pub random_interval_ms: u64,
    /// Probability (0.0-1.0) that a roll produces an event.
    pub random_probability: f64,
    /// Reflect outbound chat and typing commands back as inbound events.
    pub echo: bool,
}

impl Default for SimulatedSettings {
    fn default() -> Self {
        Self {
            open_delay_ms: 1_000,
            scripted: true,
            random_interval_ms: 15_000,
            random_probability: 0.3,
            echo: true,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` overrides it.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module levels, e.g. `{"tokio_tungstenite": "warn"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_defaults() {
        let s = RealtimeSettings::default();
        assert_eq!(s.max_reconnect_attempts, 5);
        assert_eq!(s.reconnect_base_delay_ms, 1_000);
        assert_eq!(s.heartbeat_interval_ms, 30_000);
        assert_eq!(s.transport, TransportKind::Simulated);
        assert!(s.auto_connect);
    }

    #[test]
    fn transport_kind_lowercase() {
        let kind: TransportKind = serde_json::from_str("\"live\"").unwrap();
        assert_eq!(kind, TransportKind::Live);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: PulseSettings =
            serde_json::from_str(r#"{"realtime": {"maxReconnectAttempts": 9}}"#).unwrap();
        assert_eq!(s.realtime.max_reconnect_attempts, 9);
        assert_eq!(s.realtime.path, "/ws");
        assert_eq!(s.logging.level, "info");
        assert!(s.logging.modules.is_empty());
    }

    #[test]
    fn logging_modules_from_json() {
        let s: PulseSettings = serde_json::from_str(
            r#"{"logging": {"modules": {"pulse_realtime": "debug"}}}"#,
        )
        .unwrap();
        assert_eq!(s.logging.modules["pulse_realtime"], "debug");
        assert_eq!(s.logging.level, "info");
    }
}
