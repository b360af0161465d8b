//! Twitch EventSub WebSocket transport (primary event source).
//!
//! Opens the EventSub socket, captures the session id from the welcome
//! frame, subscribes to `channel.chat.message` and `channel.raid` via Helix,
//! and normalizes notification frames into [`TwitchEvent`]s. Keepalive
//! frames refresh a liveness window; a silent socket past that window is a
//! transport error and hands control back to the coordinator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_tungstenite::connect_async;

use super::helix::HelixClient;
use super::{EventSource, SourceError, SourceResult};
use crate::events::{ChatMessage, Raid, TwitchEvent};

/// Production EventSub WebSocket endpoint.
pub const EVENTSUB_WS_URL: &str = "wss://eventsub.wss.twitch.tv/ws";

/// Keepalive window when the welcome frame doesn't specify one.
const DEFAULT_KEEPALIVE_SECS: u64 = 10;

/// Slack added to the advertised keepalive window.
const KEEPALIVE_GRACE: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Frame Shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WsEnvelope {
    metadata: WsMetadata,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct WsMetadata {
    message_type: String,
    #[serde(default)]
    subscription_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WelcomeSession {
    id: String,
    #[serde(default)]
    keepalive_timeout_seconds: Option<u64>,
}

/// Maps a notification payload's `event` object to a [`TwitchEvent`].
#[must_use]
pub fn notification_to_event(subscription_type: &str, event: &Value) -> Option<TwitchEvent> {
    match subscription_type {
        "channel.chat.message" => {
            let badges = event["badges"]
                .as_array()
                .map(|badges| {
                    badges
                        .iter()
                        .filter_map(|b| b["set_id"].as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            Some(TwitchEvent::Chat(ChatMessage {
                user: event["chatter_user_name"].as_str()?.to_string(),
                user_id: event["chatter_user_id"].as_str()?.to_string(),
                channel_id: event["broadcaster_user_id"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                text: event["message"]["text"].as_str()?.to_string(),
                badges,
            }))
        }
        "channel.raid" => Some(TwitchEvent::Raid(Raid {
            from_user: event["from_broadcaster_user_login"].as_str()?.to_string(),
            to_user: event["to_broadcaster_user_login"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            viewer_count: event["viewers"].as_u64().unwrap_or(0),
        })),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Source
// ─────────────────────────────────────────────────────────────────────────────

/// The primary EventSub WebSocket source.
pub struct EventSubSource {
    helix: Arc<HelixClient>,
    /// Channel whose events are subscribed.
    broadcaster_id: String,
    /// User the chat subscription reads as (the broadcaster's own account).
    user_id: String,
    ws_url: String,
}

impl EventSubSource {
    /// Creates a source for the broadcaster's channel.
    #[must_use]
    pub fn new(
        helix: Arc<HelixClient>,
        broadcaster_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            helix,
            broadcaster_id: broadcaster_id.into(),
            user_id: user_id.into(),
            ws_url: EVENTSUB_WS_URL.to_string(),
        }
    }

    /// Overrides the WebSocket endpoint (tests).
    #[must_use]
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    /// Creates the two Helix subscriptions bound to this session.
    async fn subscribe(&self, session_id: &str) -> SourceResult<()> {
        self.helix
            .create_eventsub_subscription(
                "channel.chat.message",
                "1",
                json!({
                    "broadcaster_user_id": self.broadcaster_id,
                    "user_id": self.user_id,
                }),
                session_id,
            )
            .await
            .map_err(|e| SourceError::Start(format!("subscribe chat: {e}")))?;
        self.helix
            .create_eventsub_subscription(
                "channel.raid",
                "1",
                json!({ "to_broadcaster_user_id": self.broadcaster_id }),
                session_id,
            )
            .await
            .map_err(|e| SourceError::Start(format!("subscribe raid: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl EventSource for EventSubSource {
    fn name(&self) -> &'static str {
        "eventsub"
    }

    async fn run(
        &self,
        events: mpsc::UnboundedSender<TwitchEvent>,
        ready: oneshot::Sender<()>,
        cancel: CancellationToken,
    ) -> SourceResult<()> {
        log::info!("[EventSub] Connecting to {}", self.ws_url);
        let (mut ws, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| SourceError::Start(format!("connect: {e}")))?;

        // The first frame must be the session welcome.
        let mut keepalive_window =
            Duration::from_secs(DEFAULT_KEEPALIVE_SECS) + KEEPALIVE_GRACE;
        let session_id = loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                frame = tokio::time::timeout(keepalive_window, ws.next()) => frame,
            };
            let message = match frame {
                Err(_) => return Err(SourceError::Start("no welcome frame".into())),
                Ok(None) => return Err(SourceError::Start("closed before welcome".into())),
                Ok(Some(Err(e))) => return Err(SourceError::Start(e.to_string())),
                Ok(Some(Ok(message))) => message,
            };
            let Ok(text) = message.to_text() else { continue };
            let envelope: WsEnvelope = serde_json::from_str(text)
                .map_err(|e| SourceError::Protocol(format!("bad frame: {e}")))?;
            if envelope.metadata.message_type == "session_welcome" {
                let session: WelcomeSession =
                    serde_json::from_value(envelope.payload["session"].clone())
                        .map_err(|e| SourceError::Protocol(format!("bad welcome: {e}")))?;
                if let Some(secs) = session.keepalive_timeout_seconds {
                    keepalive_window = Duration::from_secs(secs) + KEEPALIVE_GRACE;
                }
                break session.id;
            }
        };

        log::info!("[EventSub] Session {} established", session_id);
        self.subscribe(&session_id).await?;
        let _ = ready.send(());

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                frame = tokio::time::timeout(keepalive_window, ws.next()) => frame,
            };
            let message = match frame {
                Err(_) => {
                    return Err(SourceError::Transport("keepalive window elapsed".into()))
                }
                Ok(None) => return Err(SourceError::Closed("server closed".into())),
                Ok(Some(Err(e))) => return Err(SourceError::Transport(e.to_string())),
                Ok(Some(Ok(message))) => message,
            };
            if message.is_close() {
                return Err(SourceError::Closed("close frame".into()));
            }
            let Ok(text) = message.to_text() else { continue };
            if text.is_empty() {
                continue;
            }

            let envelope: WsEnvelope = match serde_json::from_str(text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    log::warn!("[EventSub] Ignoring unparseable frame: {}", e);
                    continue;
                }
            };

            match envelope.metadata.message_type.as_str() {
                // Liveness only; reading it already refreshed the window.
                "session_keepalive" => {}
                "notification" => {
                    let Some(sub_type) = envelope.metadata.subscription_type.as_deref() else {
                        continue;
                    };
                    if let Some(event) =
                        notification_to_event(sub_type, &envelope.payload["event"])
                    {
                        if events.send(event).is_err() {
                            return Err(SourceError::Closed("event consumer gone".into()));
                        }
                    }
                }
                "session_reconnect" => {
                    // Hand back to the coordinator rather than chasing the
                    // reconnect URL; a fresh session re-subscribes cleanly.
                    return Err(SourceError::Protocol("session reconnect requested".into()));
                }
                "revocation" => {
                    return Err(SourceError::Protocol("subscription revoked".into()));
                }
                other => {
                    log::debug!("[EventSub] Ignoring message type {}", other);
                }
            }
        }
    }
}
