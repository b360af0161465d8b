//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
///
/// The `core` section maps one-to-one onto the library's
/// [`cliparino_core::Config`]; the remaining fields are daemon-only wiring.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Core control-plane configuration (OBS, player, Twitch, shoutouts,
    /// clip search).
    pub core: cliparino_core::Config,

    /// Twitch OAuth access token.
    /// Override: `CLIPARINO_TWITCH_TOKEN` (preferred over the file - keep
    /// tokens out of config files where possible).
    pub twitch_token: String,
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CLIPARINO_TWITCH_TOKEN") {
            self.twitch_token = val;
        }

        if let Ok(val) = std::env::var("CLIPARINO_BROADCASTER") {
            self.core.twitch.broadcaster_login = val;
        }

        if let Ok(val) = std::env::var("CLIPARINO_CLIENT_ID") {
            self.core.twitch.client_id = val;
        }

        if let Ok(val) = std::env::var("CLIPARINO_OBS_HOST") {
            self.core.obs.host = val;
        }

        if let Ok(val) = std::env::var("CLIPARINO_OBS_PORT") {
            if let Ok(port) = val.parse() {
                self.core.obs.port = port;
            }
        }

        if let Ok(val) = std::env::var("CLIPARINO_OBS_PASSWORD") {
            self.core.obs.password = val;
        }

        if let Ok(val) = std::env::var("CLIPARINO_PLAYER_URL") {
            self.core.player.url = val;
        }
    }
}
