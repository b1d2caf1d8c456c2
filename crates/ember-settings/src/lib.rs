//! # ember-settings
//!
//! Configuration management with layered sources for the Ember client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`EmberSettings::default()`]
//! 2. **User file**: `~/.ember/settings.json` or `$EMBER_SETTINGS` (deep-merged over defaults)
//! 3. **Environment variables**: `EMBER_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = EmberSettings::default();
        let _path = settings_path();
    }
}
