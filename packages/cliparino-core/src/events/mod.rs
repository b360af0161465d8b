//! Event and chat-output abstractions shared across subsystems.
//!
//! This module provides:
//! - [`TwitchEvent`]: the uniform event stream emitted by both transports
//!   (EventSub WebSocket and IRC), consumed by the command router
//! - [`ChatSink`]: the outbound chat seam used by anything that wants to say
//!   a short line in chat without depending on the full Helix client

use async_trait::async_trait;
use serde::Serialize;

use crate::twitch::types::BadgeSet;

/// A chat message received from either transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Sender display name.
    pub user: String,
    /// Sender user id.
    pub user_id: String,
    /// Channel (broadcaster) id the message was sent in.
    pub channel_id: String,
    /// Message text.
    pub text: String,
    /// Badge set names carried by the sender.
    pub badges: BadgeSet,
}

/// An incoming raid.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Raid {
    /// Login of the raiding broadcaster (both transports carry it, and the
    /// shoutout pipeline needs a login rather than a display name).
    pub from_user: String,
    /// Display name of the raided broadcaster.
    pub to_user: String,
    /// Raid party size.
    pub viewer_count: u64,
}

/// Uniform event emitted by both event sources.
///
/// The router is oblivious to which transport produced an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TwitchEvent {
    /// A chat message in the broadcaster's channel.
    Chat(ChatMessage),
    /// An incoming raid.
    Raid(Raid),
}

/// Outbound chat seam.
///
/// Implementations must be best-effort: chat is an auxiliary surface and a
/// failed send never propagates into the caller's control flow (failures are
/// logged by the implementation).
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Sends a single chat line to the broadcaster's channel.
    async fn send_line(&self, text: &str);
}

/// No-op sink for tests and for running without a chat write scope.
pub struct NoopChatSink;

#[async_trait]
impl ChatSink for NoopChatSink {
    async fn send_line(&self, _text: &str) {
        // No-op: no chat write path configured
    }
}

/// Logging sink for debugging and development.
///
/// Lines land in the trace output instead of chat; useful when running
/// against a channel you don't want the bot talking in.
pub struct LoggingChatSink;

#[async_trait]
impl ChatSink for LoggingChatSink {
    async fn send_line(&self, text: &str) {
        tracing::debug!(%text, "chat_line");
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingChatSink;
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn recording_sink_captures_lines() {
        let sink = Arc::new(RecordingChatSink::default());
        sink.send_line("hello").await;
        sink.send_line("world").await;
        assert_eq!(*sink.lines.lock(), vec!["hello", "world"]);
    }

    #[test]
    fn chat_event_serializes_with_type_tag() {
        let event = TwitchEvent::Chat(ChatMessage {
            user: "viewer".to_string(),
            user_id: "42".to_string(),
            channel_id: "1234".to_string(),
            text: "!watch abc".to_string(),
            badges: vec![],
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "chat");
        assert_eq!(json["user"], "viewer");
    }
}
