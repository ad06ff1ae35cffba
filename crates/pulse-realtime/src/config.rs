use std::time::Duration;

use pulse_core::RealtimeError;
use pulse_settings::{RealtimeSettings, TransportKind};
use url::Url;

const DEFAULT_PATH: &str = "/ws";

/// Construction-time configuration for a connection manager. Immutable once
/// the manager is built.
#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    /// WebSocket endpoint used by the live transport.
    pub endpoint: Option<String>,
    /// Automatic reconnection attempts before giving up.
    pub max_attempts: u32,
    /// First reconnection delay; attempt `n` waits `base_delay * 2^(n-1)`.
    pub base_delay: Duration,
    /// Interval between keep-alive pings while connected.
    pub heartbeat_interval: Duration,
    pub transport: TransportKind,
    /// Connect as soon as the hub creates a manager.
    pub auto_connect: bool,
    pub simulated: SimulatedConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_attempts: 5,
            base_delay: Duration::from_millis(1_000),
            heartbeat_interval: Duration::from_secs(30),
            transport: TransportKind::Simulated,
            auto_connect: true,
            simulated: SimulatedConfig::default(),
        }
    }
}

/// Tuning for the simulated transport.
#[derive(Clone, Debug)]
pub struct SimulatedConfig {
    pub open_delay: Duration,
    /// Play the built-in coaching script after open.
    pub scripted: bool,
    /// Interval between random event rolls. `None` disables random events.
    pub random_interval: Option<Duration>,
    pub random_probability: f64,
    pub echo: bool,
    /// Number of initial opens that report failure.
    pub fail_first_opens: u32,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            open_delay: Duration::from_millis(1_000),
            scripted: true,
            random_interval: Some(Duration::from_secs(15)),
            random_probability: 0.3,
            echo: true,
            fail_first_opens: 0,
        }
    }
}

impl SimulatedConfig {
    /// No script, no random traffic: only what the test drives.
    pub fn quiet() -> Self {
        Self {
            scripted: false,
            random_interval: None,
            ..Self::default()
        }
    }
}

impl RealtimeConfig {
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            ..Self::default()
        }
    }

    /// Derive the runtime config from loaded settings. An explicit URL wins
    /// over one derived from the page origin.
    pub fn from_settings(settings: &RealtimeSettings) -> Result<Self, RealtimeError> {
        let endpoint = match (&settings.url, &settings.origin) {
            (Some(url), _) => Some(url.clone()),
            (None, Some(origin)) => Some(endpoint_from_origin(origin, &settings.path)?),
            (None, None) => None,
        };
        let sim = &settings.simulated;
        let config = Self {
            endpoint,
            max_attempts: settings.max_reconnect_attempts,
            base_delay: Duration::from_millis(settings.reconnect_base_delay_ms),
            heartbeat_interval: Duration::from_millis(settings.heartbeat_interval_ms),
            transport: settings.transport,
            auto_connect: settings.auto_connect,
            simulated: SimulatedConfig {
                open_delay: Duration::from_millis(sim.open_delay_ms),
                scripted: sim.scripted,
                random_interval: (sim.random_interval_ms > 0)
                    .then(|| Duration::from_millis(sim.random_interval_ms)),
                random_probability: sim.random_probability,
                echo: sim.echo,
                fail_first_opens: 0,
            },
        };
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn auto_connect(mut self, auto: bool) -> Self {
        self.auto_connect = auto;
        self
    }

    #[must_use]
    pub fn simulated(mut self, simulated: SimulatedConfig) -> Self {
        self.simulated = simulated;
        self
    }

    pub fn validate(&self) -> Result<(), RealtimeError> {
        if self.max_attempts == 0 {
            return Err(RealtimeError::Config("max_attempts must be > 0".into()));
        }
        if self.base_delay.is_zero() {
            return Err(RealtimeError::Config("base_delay must be > 0".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(RealtimeError::Config("heartbeat_interval must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.simulated.random_probability) {
            return Err(RealtimeError::Config(
                "random_probability must be between 0.0 and 1.0".into(),
            ));
        }
        if self.transport == TransportKind::Live {
            let Some(endpoint) = &self.endpoint else {
                return Err(RealtimeError::Config("live transport needs an endpoint".into()));
            };
            let url = Url::parse(endpoint)
                .map_err(|e| RealtimeError::Config(format!("endpoint {endpoint}: {e}")))?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(RealtimeError::Config(format!(
                    "endpoint scheme must be ws or wss, got {}",
                    url.scheme()
                )));
            }
        }
        Ok(())
    }
}

/// Map a page origin onto the realtime endpoint: `http` becomes `ws`,
/// `https` becomes `wss`, host and port are kept and `path` replaces the
/// origin's path.
pub fn endpoint_from_origin(origin: &str, path: &str) -> Result<String, RealtimeError> {
    let mut url =
        Url::parse(origin).map_err(|e| RealtimeError::Config(format!("origin {origin}: {e}")))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(RealtimeError::Config(format!("unsupported origin scheme: {other}")));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| RealtimeError::Config(format!("cannot rewrite scheme of {origin}")))?;
    url.set_path(if path.is_empty() { DEFAULT_PATH } else { path });
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}
