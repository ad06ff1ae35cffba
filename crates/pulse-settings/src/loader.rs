//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PulseSettings::default()`]
//! 2. If `~/.pulse/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `PULSE_*` environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{PulseSettings, TransportKind};

/// Resolve the path to the settings file (`~/.pulse/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pulse").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PulseSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PulseSettings> {
    let defaults = serde_json::to_value(PulseSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: PulseSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `PULSE_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value
/// stays in place.
pub fn apply_overrides(settings: &mut PulseSettings, lookup: impl Fn(&str) -> Option<String>) {
    let rt = &mut settings.realtime;

    if let Some(v) = read_string(&lookup, "PULSE_WS_URL") {
        rt.url = Some(v);
    }
    if let Some(v) = read_string(&lookup, "PULSE_ORIGIN") {
        rt.origin = Some(v);
    }
    if let Some(v) = read_string(&lookup, "PULSE_TRANSPORT") {
        match parse_transport(&v) {
            Some(kind) => rt.transport = kind,
            None => tracing::warn!(key = "PULSE_TRANSPORT", value = %v, "unknown transport, ignoring"),
        }
    }
    if let Some(v) = read_u64(&lookup, "PULSE_MAX_RECONNECT_ATTEMPTS", 1, 100) {
        rt.max_reconnect_attempts = v as u32;
    }
    if let Some(v) = read_u64(&lookup, "PULSE_RECONNECT_BASE_DELAY_MS", 10, 600_000) {
        rt.reconnect_base_delay_ms = v;
    }
    if let Some(v) = read_u64(&lookup, "PULSE_HEARTBEAT_INTERVAL_MS", 100, 3_600_000) {
        rt.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_bool(&lookup, "PULSE_AUTO_CONNECT") {
        rt.auto_connect = v;
    }

    if let Some(v) = read_string(&lookup, "PULSE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_bool(&lookup, "PULSE_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Reject values that deserialize fine but cannot drive a connection.
pub fn validate(settings: &PulseSettings) -> Result<()> {
    let rt = &settings.realtime;
    if rt.max_reconnect_attempts == 0 {
        return Err(SettingsError::InvalidValue(
            "realtime.maxReconnectAttempts must be > 0".into(),
        ));
    }
    if rt.reconnect_base_delay_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "realtime.reconnectBaseDelayMs must be > 0".into(),
        ));
    }
    if rt.heartbeat_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "realtime.heartbeatIntervalMs must be > 0".into(),
        ));
    }
    if !(0.0..=1.0).contains(&rt.simulated.random_probability) {
        return Err(SettingsError::InvalidValue(
            "realtime.simulated.randomProbability must be between 0 and 1".into(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_transport(val: &str) -> Option<TransportKind> {
    match val.to_lowercase().as_str() {
        "live" | "ws" | "websocket" => Some(TransportKind::Live),
        "simulated" | "sim" | "mock" => Some(TransportKind::Simulated),
        _ => None,
    }
}

// ── Env readers ─────────────────────────────────────────────────────────────

fn read_string(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.is_empty())
}

fn read_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<bool> {
    let val = lookup(name)?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    min: u64,
    max: u64,
) -> Option<u64> {
    let val = lookup(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}
