//! # pulse-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PulseSettings::default()`]
//! 2. **User file**: `~/.pulse/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PULSE_*` overrides (highest priority)
//!
//! The result is read once at startup and handed to the components that
//! need it; nothing here is a process-global.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
