//! Trait abstractions for Twitch Helix operations.
//!
//! Services depend on these traits rather than the concrete [`HelixClient`],
//! enabling dependency injection for testability.
//!
//! [`HelixClient`]: crate::twitch::helix::HelixClient

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::twitch::helix::HelixResult;
use crate::twitch::types::{ChannelInfo, Clip};

/// Trait for clip lookup operations.
///
/// Used by the command router, clip search, and the shoutout pipeline.
#[async_trait]
pub trait ClipLookup: Send + Sync {
    /// Resolves clip metadata by slug.
    async fn clip_by_id(&self, id: &str) -> HelixResult<Clip>;

    /// Extracts the slug from a clip URL, then resolves it.
    async fn clip_by_url(&self, url: &str) -> HelixResult<Clip>;

    /// Lists a broadcaster's clips, newest window first.
    ///
    /// # Arguments
    /// * `broadcaster_id` - Broadcaster user id
    /// * `started_after` - Only clips created at or after this instant
    /// * `max_count` - Upper bound on returned clips (Helix caps a page at 100)
    async fn clips_for_broadcaster(
        &self,
        broadcaster_id: &str,
        started_after: Option<DateTime<Utc>>,
        max_count: usize,
    ) -> HelixResult<Vec<Clip>>;
}

/// Trait for user/channel lookup operations.
#[async_trait]
pub trait ChannelLookup: Send + Sync {
    /// Resolves a login name to a broadcaster user id.
    async fn broadcaster_id_by_login(&self, login: &str) -> HelixResult<String>;

    /// Fetches display name and current game for a broadcaster.
    async fn channel_info(&self, broadcaster_id: &str) -> HelixResult<ChannelInfo>;
}

/// Trait for outbound chat and shoutout operations.
#[async_trait]
pub trait ChatOutbound: Send + Sync {
    /// Sends a chat message to a broadcaster's channel.
    async fn send_chat_message(
        &self,
        broadcaster_id: &str,
        sender_id: &str,
        text: &str,
    ) -> HelixResult<()>;

    /// Sends a native Twitch shoutout.
    async fn send_shoutout(
        &self,
        from_broadcaster_id: &str,
        to_broadcaster_id: &str,
        moderator_id: &str,
    ) -> HelixResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Combined Trait (for trait objects)
// ─────────────────────────────────────────────────────────────────────────────

/// Combined trait for all Twitch API operations the core consumes.
#[async_trait]
pub trait TwitchApi: ClipLookup + ChannelLookup + ChatOutbound {}

/// Blanket implementation for any type implementing all traits.
impl<T: ClipLookup + ChannelLookup + ChatOutbound> TwitchApi for T {}
