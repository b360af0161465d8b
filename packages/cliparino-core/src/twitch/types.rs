//! Domain types for Twitch entities used by the control plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum view count for the featured heuristic when the Helix payload
/// does not carry the `is_featured` flag.
pub const FEATURED_VIEW_FALLBACK: u64 = 100;

/// A Twitch clip: the atomic playback unit.
///
/// Created by resolving a URL/id via Helix or by enumerating a broadcaster's
/// clips, and immutable thereafter. Referenced by the queue and the
/// last-played slot until replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    /// Stable clip identifier (slug). Never empty.
    pub id: String,
    /// Embed URL for the player page.
    pub embed_url: String,
    /// Clip title.
    pub title: String,
    /// Display name of the broadcaster the clip was taken from.
    pub broadcaster_name: String,
    /// Broadcaster user id.
    pub broadcaster_id: String,
    /// Display name of the clip's creator.
    pub creator_name: String,
    /// Game/category id at clip time (resolve a name via `GetChannelInfo`).
    pub game_id: String,
    /// Duration in seconds (>= 0).
    pub duration: f64,
    /// View count (>= 0).
    pub view_count: u64,
    /// The Helix `is_featured` flag, absent on older API payloads.
    pub is_featured: Option<bool>,
    /// Clip creation time.
    pub created_at: DateTime<Utc>,
}

impl Clip {
    /// Whether the clip counts as featured.
    ///
    /// Uses the Helix flag when present, else falls back to the
    /// >= 100 views heuristic.
    #[must_use]
    pub fn featured(&self) -> bool {
        self.is_featured
            .unwrap_or(self.view_count >= FEATURED_VIEW_FALLBACK)
    }

    /// Clip age relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Channel metadata from Helix `GetChannelInformation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    /// Broadcaster user id.
    pub broadcaster_id: String,
    /// Broadcaster display name.
    pub display_name: String,
    /// Current game/category name (empty when offline with no category).
    pub game_name: String,
}

/// Chat badge names carried on a message (e.g. `broadcaster`, `moderator`).
///
/// Badge versions are irrelevant to authorization, so only set names are kept.
pub type BadgeSet = Vec<String>;

/// Returns whether a badge set carries broadcaster or moderator privileges.
#[must_use]
pub fn has_mod_privileges(badges: &[String]) -> bool {
    badges
        .iter()
        .any(|b| b == "broadcaster" || b == "moderator")
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    /// Builds a clip with sensible defaults for tests.
    pub fn clip(id: &str, title: &str, duration: f64) -> Clip {
        Clip {
            id: id.to_string(),
            embed_url: format!("https://clips.twitch.tv/embed?clip={id}"),
            title: title.to_string(),
            broadcaster_name: "streamer".to_string(),
            broadcaster_id: "1234".to_string(),
            creator_name: "clipper".to_string(),
            game_id: "509658".to_string(),
            duration,
            view_count: 0,
            is_featured: None,
            created_at: Utc::now(),
        }
    }
}
