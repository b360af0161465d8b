//! Application configuration types.
//!
//! Configuration is read once at startup and handed to services by value;
//! the only runtime mutation point is the explicit retry/reload signal on
//! the OBS supervisor. All sections have sensible defaults.

use serde::{Deserialize, Serialize};

use crate::obs::{ObsDesiredState, BLANK_URL};

/// Connection targets for the local OBS instance.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ObsConfig {
    /// obs-websocket host.
    pub host: String,
    /// obs-websocket port.
    pub port: u16,
    /// obs-websocket password (empty when auth is disabled).
    pub password: String,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4455,
            password: String::new(),
        }
    }
}

/// Desired OBS state for the player scene/source.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PlayerConfig {
    /// Scene that hosts the player.
    pub scene_name: String,
    /// Browser source name.
    pub source_name: String,
    /// Source width in pixels.
    pub width: u32,
    /// Source height in pixels.
    pub height: u32,
    /// Base URL of the player page; the clip id is appended as the `clip`
    /// query parameter.
    pub url: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            scene_name: "Cliparino".to_string(),
            source_name: "CliparinoPlayer".to_string(),
            width: 1920,
            height: 1080,
            url: "http://localhost:8080/player".to_string(),
        }
    }
}

impl PlayerConfig {
    /// Builds the player URL for a clip id.
    #[must_use]
    pub fn clip_url(&self, clip_id: &str) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}clip={}", self.url, separator, clip_id)
    }

    /// Converts to the OBS desired state (idle URL is `about:blank`).
    #[must_use]
    pub fn to_desired_state(&self) -> ObsDesiredState {
        ObsDesiredState {
            scene_name: self.scene_name.clone(),
            source_name: self.source_name.clone(),
            width: self.width,
            height: self.height,
            url: BLANK_URL.to_string(),
        }
    }
}

/// Twitch identity and credentials wiring.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TwitchConfig {
    /// Broadcaster channel login the process serves.
    pub broadcaster_login: String,
    /// Application client id for Helix calls.
    pub client_id: String,
}

/// Behavior of the `!so` pipeline.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ShoutoutConfig {
    /// Whether to post the shoutout chat message.
    pub enable_message: bool,
    /// Template with `{broadcaster}` and `{game}` placeholders.
    pub message_template: String,
    /// Prefer featured clips within each search window.
    pub use_featured_clips: bool,
    /// Maximum clip duration in seconds.
    pub max_clip_length: f64,
    /// Maximum clip age in days.
    pub max_clip_age: i64,
    /// Whether to also fire a native Twitch shoutout.
    pub send_twitch_shoutout: bool,
    /// Whether an incoming raid triggers the shoutout pipeline.
    pub shoutout_on_raid: bool,
}

impl Default for ShoutoutConfig {
    fn default() -> Self {
        Self {
            enable_message: true,
            message_template: "Check out {broadcaster}! They were last playing {game}."
                .to_string(),
            use_featured_clips: true,
            max_clip_length: 60.0,
            max_clip_age: 365,
            send_twitch_shoutout: false,
            shoutout_on_raid: true,
        }
    }
}

/// Behavior of `!watch @broadcaster <terms>` clip search.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ClipSearchConfig {
    /// Candidate window in days.
    pub search_window_days: i64,
    /// Levenshtein-tier similarity cutoff (0..1).
    pub fuzzy_match_threshold: f64,
    /// Whether searched clips need mod approval before playing.
    pub require_approval: bool,
    /// Approval TTL in seconds.
    pub approval_timeout_seconds: u64,
    /// Badge names whose holders bypass the approval gate.
    pub exempt_roles: Vec<String>,
}

impl Default for ClipSearchConfig {
    fn default() -> Self {
        Self {
            search_window_days: 90,
            fuzzy_match_threshold: 0.4,
            require_approval: true,
            approval_timeout_seconds: 30,
            exempt_roles: vec!["broadcaster".to_string(), "moderator".to_string()],
        }
    }
}

/// Full core configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// OBS connection targets.
    pub obs: ObsConfig,
    /// Player scene/source desired state.
    pub player: PlayerConfig,
    /// Twitch identity.
    pub twitch: TwitchConfig,
    /// Shoutout pipeline settings.
    pub shoutout: ShoutoutConfig,
    /// Clip search settings.
    pub clip_search: ClipSearchConfig,
}

impl Config {
    /// Validates cross-field consistency.
    pub fn validate(&self) -> Result<(), String> {
        if self.twitch.broadcaster_login.is_empty() {
            return Err("twitch.broadcaster_login must be set".to_string());
        }
        if self.twitch.client_id.is_empty() {
            return Err("twitch.client_id must be set".to_string());
        }
        if self.player.width == 0 || self.player.height == 0 {
            return Err("player dimensions must be >= 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.clip_search.fuzzy_match_threshold) {
            return Err("clip_search.fuzzy_match_threshold must be within 0..1".to_string());
        }
        if self.shoutout.max_clip_length <= 0.0 {
            return Err("shoutout.max_clip_length must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            twitch: TwitchConfig {
                broadcaster_login: "streamer".to_string(),
                client_id: "client".to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.clip_search.search_window_days, 90);
        assert_eq!(config.clip_search.fuzzy_match_threshold, 0.4);
        assert!(config.clip_search.require_approval);
        assert_eq!(config.clip_search.approval_timeout_seconds, 30);
        assert_eq!(
            config.clip_search.exempt_roles,
            vec!["broadcaster", "moderator"]
        );
        assert_eq!(config.obs.port, 4455);
    }

    #[test]
    fn validation_requires_twitch_identity() {
        let config = Config::default();
        assert!(config.validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validation_rejects_out_of_range_threshold() {
        let mut config = valid_config();
        config.clip_search.fuzzy_match_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn clip_url_appends_query_parameter() {
        let player = PlayerConfig::default();
        assert_eq!(
            player.clip_url("HappyClipSlug"),
            "http://localhost:8080/player?clip=HappyClipSlug"
        );

        let with_query = PlayerConfig {
            url: "http://localhost:8080/player?theme=dark".to_string(),
            ..Default::default()
        };
        assert_eq!(
            with_query.clip_url("abc"),
            "http://localhost:8080/player?theme=dark&clip=abc"
        );
    }

    #[test]
    fn desired_state_starts_blank() {
        let desired = PlayerConfig::default().to_desired_state();
        assert_eq!(desired.url, BLANK_URL);
        assert_eq!(desired.width, 1920);
        assert_eq!(desired.height, 1080);
    }
}
