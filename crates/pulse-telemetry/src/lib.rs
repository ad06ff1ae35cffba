use std::str::FromStr;

use pulse_settings::LoggingSettings;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "pulse_realtime" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of the human-readable format. Logs go to stderr.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from the logging section of the settings file. An unparseable
    /// default level falls back to INFO; unparseable module levels are
    /// skipped.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        let module_levels = settings
            .modules
            .iter()
            .filter_map(|(module, level)| {
                Level::from_str(level).ok().map(|level| (module.clone(), level))
            })
            .collect();
        Self {
            log_level: Level::from_str(&settings.level).unwrap_or(Level::INFO),
            module_levels,
            json: settings.json,
        }
    }

    #[must_use]
    pub fn with_module_level(mut self, module: impl Into<String>, level: Level) -> Self {
        self.module_levels.push((module.into(), level));
        self
    }

    /// The filter directive string used when RUST_LOG is unset.
    pub fn filter_directives(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Returned by [`init_telemetry`]; reports whether this call installed the
/// global subscriber.
#[must_use]
pub struct TelemetryGuard {
    installed: bool,
}

impl TelemetryGuard {
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Initialize the tracing subscriber. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let result = tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init();
    if let Err(e) = &result {
        eprintln!("pulse-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard {
        installed: result.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_directives_include_modules() {
        let config = TelemetryConfig::default()
            .with_module_level("pulse_realtime", Level::DEBUG)
            .with_module_level("tokio_tungstenite", Level::WARN);
        assert_eq!(
            config.filter_directives(),
            "info,pulse_realtime=debug,tokio_tungstenite=warn"
        );
    }

    #[test]
    fn from_settings_parses_level() {
        let settings = LoggingSettings {
            level: "debug".into(),
            json: true,
            ..LoggingSettings::default()
        };
        let config = TelemetryConfig::from_settings(&settings);
        assert_eq!(config.log_level, Level::DEBUG);
        assert!(config.json);
        assert!(config.module_levels.is_empty());
    }

    #[test]
    fn from_settings_carries_module_levels() {
        let mut settings = LoggingSettings::default();
        settings.modules.insert("tokio_tungstenite".into(), "warn".into());
        settings.modules.insert("pulse_realtime".into(), "trace".into());
        settings.modules.insert("noisy".into(), "loud".into());

        let config = TelemetryConfig::from_settings(&settings);
        assert_eq!(
            config.filter_directives(),
            "info,pulse_realtime=trace,tokio_tungstenite=warn"
        );
    }

    #[test]
    fn from_settings_falls_back_to_info() {
        let settings = LoggingSettings {
            level: "chatty".into(),
            ..LoggingSettings::default()
        };
        assert_eq!(TelemetryConfig::from_settings(&settings).log_level, Level::INFO);
    }

    #[test]
    fn init_twice_does_not_panic() {
        let _first = init_telemetry(TelemetryConfig::default());
        let second = init_telemetry(TelemetryConfig::default());
        assert!(!second.installed());
    }
}
