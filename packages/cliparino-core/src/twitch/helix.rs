//! Typed HTTP client for the Twitch Helix REST API.
//!
//! This module handles the raw transport concerns - auth headers, the
//! single-refresh-on-401 contract, Retry-After handling, and transient
//! retries - and exposes the typed operations the core consumes. For the
//! trait seams services depend on, see `traits.rs`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::backoff::{Backoff, Policy};
use crate::events::ChatSink;
use crate::twitch::token::{TokenError, TokenProvider};
use crate::twitch::traits::{ChannelLookup, ChatOutbound, ClipLookup};
use crate::twitch::types::{ChannelInfo, Clip};

/// Production Helix endpoint.
pub const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Total attempts for transient (5xx / transport) failures.
const MAX_TRANSIENT_ATTEMPTS: u32 = 3;

/// Cap on consecutive 429 waits before giving up on a call.
const MAX_RATE_LIMIT_WAITS: u32 = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during Helix operations.
#[derive(Debug, Error)]
pub enum HelixError {
    /// Transport-level failure (DNS, TCP, timeout).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status after retries were exhausted.
    #[error("HTTP error {0}: {1}")]
    Status(u16, String),

    /// Credentials rejected twice; the user must re-authenticate.
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// Input was malformed (bad clip URL or slug); no network call was made.
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// The API answered successfully but without the requested entity.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Response body did not match the expected shape.
    #[error("Failed to decode Helix response: {0}")]
    Decode(String),
}

/// Convenient Result alias for Helix operations.
pub type HelixResult<T> = Result<T, HelixError>;

impl HelixError {
    /// Returns true if the operation may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            HelixError::Http(e) => e.is_timeout() || e.is_connect(),
            HelixError::Status(code, _) => *code >= 500,
            _ => false,
        }
    }
}

impl From<TokenError> for HelixError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::AuthRequired(msg) => HelixError::AuthRequired(msg),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Standard Helix response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HelixClip {
    id: String,
    embed_url: String,
    broadcaster_id: String,
    broadcaster_name: String,
    creator_name: String,
    game_id: String,
    title: String,
    view_count: u64,
    created_at: DateTime<Utc>,
    duration: f64,
    #[serde(default)]
    is_featured: Option<bool>,
}

impl From<HelixClip> for Clip {
    fn from(c: HelixClip) -> Self {
        Clip {
            id: c.id,
            embed_url: c.embed_url,
            title: c.title,
            broadcaster_name: c.broadcaster_name,
            broadcaster_id: c.broadcaster_id,
            creator_name: c.creator_name,
            game_id: c.game_id,
            duration: c.duration,
            view_count: c.view_count,
            is_featured: c.is_featured,
            created_at: c.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct HelixChannel {
    broadcaster_id: String,
    broadcaster_name: String,
    #[serde(default)]
    game_name: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// URL → Slug Extraction
// ─────────────────────────────────────────────────────────────────────────────

/// Extracts a clip slug from one of the documented clip URL shapes:
///
/// - `https://clips.twitch.tv/<slug>`
/// - `https://www.twitch.tv/<channel>/clip/<slug>`
/// - `https://m.twitch.tv/clip/<slug>`
///
/// Malformed input is rejected without any network call.
pub fn extract_clip_slug(input: &str) -> HelixResult<String> {
    let url = Url::parse(input.trim())
        .map_err(|_| HelixError::Malformed(format!("not a URL: {input}")))?;

    let host = url
        .host_str()
        .ok_or_else(|| HelixError::Malformed("URL has no host".into()))?
        .to_ascii_lowercase();

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    let slug = match host.as_str() {
        "clips.twitch.tv" => segments.first().copied(),
        "www.twitch.tv" | "twitch.tv" => match segments.as_slice() {
            [_, "clip", slug, ..] => Some(*slug),
            _ => None,
        },
        "m.twitch.tv" => match segments.as_slice() {
            ["clip", slug, ..] => Some(*slug),
            [_, "clip", slug, ..] => Some(*slug),
            _ => None,
        },
        _ => None,
    };

    match slug {
        Some(slug) if is_valid_slug(slug) => Ok(slug.to_string()),
        _ => Err(HelixError::Malformed(format!("not a clip URL: {input}"))),
    }
}

/// Whether a string is a plausible clip slug (alphanumeric plus `-` and `_`).
#[must_use]
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Parses a `Retry-After` header value in seconds.
fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Typed client over Twitch's Helix REST endpoints.
///
/// Every call carries the current access token. On a 401 the token provider
/// is asked to refresh exactly once and the call is retried; a second 401
/// surfaces as [`HelixError::AuthRequired`]. 5xx and transport errors retry
/// up to 3 attempts with fast backoff; 429 honors `Retry-After`.
pub struct HelixClient {
    http: Client,
    base_url: String,
    client_id: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HelixClient {
    /// Creates a client against the production Helix endpoint.
    #[must_use]
    pub fn new(http: Client, client_id: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_base_url(http, HELIX_BASE_URL, client_id, tokens)
    }

    /// Creates a client against an alternate base URL (tests).
    #[must_use]
    pub fn with_base_url(
        http: Client,
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            tokens,
        }
    }

    /// Sends one Helix request, applying the auth/retry contract.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> HelixResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut token = self.tokens.access_token().await?;
        let mut refreshed = false;
        let mut transient_attempts: u32 = 0;
        let mut rate_limit_waits: u32 = 0;
        let mut backoff = Backoff::new(Policy::fast());

        loop {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .timeout(REQUEST_TIMEOUT)
                .header("Authorization", format!("Bearer {token}"))
                .header("Client-Id", &self.client_id)
                .query(query);
            if let Some(ref body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    transient_attempts += 1;
                    if transient_attempts >= MAX_TRANSIENT_ATTEMPTS {
                        return Err(HelixError::Http(e));
                    }
                    let delay = backoff.next_delay();
                    log::warn!(
                        "[Helix] {} {} transport error ({}), retrying in {:?}",
                        method,
                        path,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                if refreshed {
                    return Err(HelixError::AuthRequired(
                        "token rejected after refresh".into(),
                    ));
                }
                log::info!("[Helix] 401 on {} {}, refreshing token", method, path);
                token = self.tokens.refresh().await?;
                refreshed = true;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                rate_limit_waits += 1;
                if rate_limit_waits > MAX_RATE_LIMIT_WAITS {
                    return Err(HelixError::Status(429, "rate limited".into()));
                }
                let wait = parse_retry_after(response.headers().get(RETRY_AFTER))
                    .unwrap_or(Duration::from_secs(1));
                log::warn!(
                    "[Helix] 429 on {} {}, honoring Retry-After {:?}",
                    method,
                    path,
                    wait
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if status.is_server_error() {
                transient_attempts += 1;
                if transient_attempts >= MAX_TRANSIENT_ATTEMPTS {
                    let text = response.text().await.unwrap_or_default();
                    return Err(HelixError::Status(status.as_u16(), text));
                }
                let delay = backoff.next_delay();
                log::warn!(
                    "[Helix] {} on {} {}, retrying in {:?}",
                    status,
                    method,
                    path,
                    delay
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(HelixError::Status(status.as_u16(), text));
            }

            if status == StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            return response
                .json::<Value>()
                .await
                .map_err(|e| HelixError::Decode(e.to_string()));
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> HelixResult<T> {
        serde_json::from_value(value).map_err(|e| HelixError::Decode(e.to_string()))
    }

    /// Creates an EventSub subscription bound to a WebSocket session.
    ///
    /// Used by the EventSub source after receiving its welcome frame.
    pub async fn create_eventsub_subscription(
        &self,
        sub_type: &str,
        version: &str,
        condition: Value,
        session_id: &str,
    ) -> HelixResult<()> {
        let body = json!({
            "type": sub_type,
            "version": version,
            "condition": condition,
            "transport": { "method": "websocket", "session_id": session_id },
        });
        self.send(Method::POST, "/eventsub/subscriptions", &[], Some(body))
            .await?;
        log::info!("[Helix] Subscribed to {}", sub_type);
        Ok(())
    }
}

#[async_trait]
impl ClipLookup for HelixClient {
    async fn clip_by_id(&self, id: &str) -> HelixResult<Clip> {
        if !is_valid_slug(id) {
            return Err(HelixError::Malformed(format!("invalid clip id: {id}")));
        }
        let value = self
            .send(Method::GET, "/clips", &[("id", id.to_string())], None)
            .await?;
        let envelope: Envelope<HelixClip> = Self::decode(value)?;
        envelope
            .data
            .into_iter()
            .next()
            .map(Clip::from)
            .ok_or_else(|| HelixError::NotFound(format!("clip {id}")))
    }

    async fn clip_by_url(&self, url: &str) -> HelixResult<Clip> {
        let slug = extract_clip_slug(url)?;
        self.clip_by_id(&slug).await
    }

    async fn clips_for_broadcaster(
        &self,
        broadcaster_id: &str,
        started_after: Option<DateTime<Utc>>,
        max_count: usize,
    ) -> HelixResult<Vec<Clip>> {
        let mut query = vec![
            ("broadcaster_id", broadcaster_id.to_string()),
            ("first", max_count.min(100).to_string()),
        ];
        if let Some(started) = started_after {
            query.push((
                "started_at",
                started.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        let value = self.send(Method::GET, "/clips", &query, None).await?;
        let envelope: Envelope<HelixClip> = Self::decode(value)?;
        Ok(envelope.data.into_iter().map(Clip::from).collect())
    }
}

#[async_trait]
impl ChannelLookup for HelixClient {
    async fn broadcaster_id_by_login(&self, login: &str) -> HelixResult<String> {
        let value = self
            .send(
                Method::GET,
                "/users",
                &[("login", login.to_ascii_lowercase())],
                None,
            )
            .await?;
        let envelope: Envelope<HelixUser> = Self::decode(value)?;
        envelope
            .data
            .into_iter()
            .next()
            .map(|u| u.id)
            .ok_or_else(|| HelixError::NotFound(format!("user {login}")))
    }

    async fn channel_info(&self, broadcaster_id: &str) -> HelixResult<ChannelInfo> {
        let value = self
            .send(
                Method::GET,
                "/channels",
                &[("broadcaster_id", broadcaster_id.to_string())],
                None,
            )
            .await?;
        let envelope: Envelope<HelixChannel> = Self::decode(value)?;
        envelope
            .data
            .into_iter()
            .next()
            .map(|c| ChannelInfo {
                broadcaster_id: c.broadcaster_id,
                display_name: c.broadcaster_name,
                game_name: c.game_name,
            })
            .ok_or_else(|| HelixError::NotFound(format!("channel {broadcaster_id}")))
    }
}

#[async_trait]
impl ChatOutbound for HelixClient {
    async fn send_chat_message(
        &self,
        broadcaster_id: &str,
        sender_id: &str,
        text: &str,
    ) -> HelixResult<()> {
        let body = json!({
            "broadcaster_id": broadcaster_id,
            "sender_id": sender_id,
            "message": text,
        });
        self.send(Method::POST, "/chat/messages", &[], Some(body))
            .await?;
        Ok(())
    }

    async fn send_shoutout(
        &self,
        from_broadcaster_id: &str,
        to_broadcaster_id: &str,
        moderator_id: &str,
    ) -> HelixResult<()> {
        let query = vec![
            ("from_broadcaster_id", from_broadcaster_id.to_string()),
            ("to_broadcaster_id", to_broadcaster_id.to_string()),
            ("moderator_id", moderator_id.to_string()),
        ];
        self.send(Method::POST, "/chat/shoutouts", &query, None)
            .await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat Sink
// ─────────────────────────────────────────────────────────────────────────────

/// Chat sink backed by Helix `SendChatMessage`.
///
/// Failures are logged and swallowed; chat output is best-effort.
pub struct HelixChatSink {
    helix: Arc<HelixClient>,
    broadcaster_id: String,
    sender_id: String,
}

impl HelixChatSink {
    /// Creates a sink that speaks in the broadcaster's channel.
    #[must_use]
    pub fn new(
        helix: Arc<HelixClient>,
        broadcaster_id: impl Into<String>,
        sender_id: impl Into<String>,
    ) -> Self {
        Self {
            helix,
            broadcaster_id: broadcaster_id.into(),
            sender_id: sender_id.into(),
        }
    }
}

#[async_trait]
impl ChatSink for HelixChatSink {
    async fn send_line(&self, text: &str) {
        if let Err(e) = self
            .helix
            .send_chat_message(&self.broadcaster_id, &self.sender_id, text)
            .await
        {
            log::warn!("[Helix] Failed to send chat line: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_slug_from_clips_subdomain() {
        assert_eq!(
            extract_clip_slug("https://clips.twitch.tv/HappyClipSlug").unwrap(),
            "HappyClipSlug"
        );
    }

    #[test]
    fn extracts_slug_from_channel_clip_path() {
        assert_eq!(
            extract_clip_slug("https://www.twitch.tv/somechannel/clip/FunnyMoment-abc123").unwrap(),
            "FunnyMoment-abc123"
        );
        assert_eq!(
            extract_clip_slug("https://twitch.tv/somechannel/clip/FunnyMoment-abc123").unwrap(),
            "FunnyMoment-abc123"
        );
    }

    #[test]
    fn extracts_slug_from_mobile_url() {
        assert_eq!(
            extract_clip_slug("https://m.twitch.tv/clip/MobileSlug_1").unwrap(),
            "MobileSlug_1"
        );
        assert_eq!(
            extract_clip_slug("https://m.twitch.tv/somechannel/clip/MobileSlug_1").unwrap(),
            "MobileSlug_1"
        );
    }

    #[test]
    fn extraction_ignores_query_parameters() {
        assert_eq!(
            extract_clip_slug("https://clips.twitch.tv/HappyClipSlug?featured=false").unwrap(),
            "HappyClipSlug"
        );
    }

    #[test]
    fn extraction_rejects_malformed_input() {
        assert!(matches!(
            extract_clip_slug("not a url"),
            Err(HelixError::Malformed(_))
        ));
        assert!(matches!(
            extract_clip_slug("https://youtube.com/watch?v=abc"),
            Err(HelixError::Malformed(_))
        ));
        assert!(matches!(
            extract_clip_slug("https://www.twitch.tv/somechannel"),
            Err(HelixError::Malformed(_))
        ));
        assert!(matches!(
            extract_clip_slug("https://clips.twitch.tv/"),
            Err(HelixError::Malformed(_))
        ));
    }

    #[test]
    fn slug_validation_rejects_path_tricks() {
        assert!(is_valid_slug("AbC-123_x"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("a/b"));
        assert!(!is_valid_slug("a b"));
    }

    #[test]
    fn retry_after_parses_seconds() {
        use reqwest::header::HeaderValue;
        let value = HeaderValue::from_static("17");
        assert_eq!(
            parse_retry_after(Some(&value)),
            Some(Duration::from_secs(17))
        );
        let junk = HeaderValue::from_static("soon");
        assert_eq!(parse_retry_after(Some(&junk)), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn clip_envelope_decodes_helix_payload() {
        let payload = serde_json::json!({
            "data": [{
                "id": "HappyClipSlug",
                "url": "https://clips.twitch.tv/HappyClipSlug",
                "embed_url": "https://clips.twitch.tv/embed?clip=HappyClipSlug",
                "broadcaster_id": "1234",
                "broadcaster_name": "streamer",
                "creator_id": "5678",
                "creator_name": "clipper",
                "video_id": "",
                "game_id": "509658",
                "language": "en",
                "title": "GG",
                "view_count": 250,
                "created_at": "2024-05-01T12:00:00Z",
                "thumbnail_url": "https://example.com/thumb.jpg",
                "duration": 20.0,
                "vod_offset": null,
                "is_featured": true
            }]
        });
        let envelope: Envelope<HelixClip> = serde_json::from_value(payload).unwrap();
        let clip: Clip = envelope.data.into_iter().next().unwrap().into();
        assert_eq!(clip.id, "HappyClipSlug");
        assert_eq!(clip.duration, 20.0);
        assert_eq!(clip.view_count, 250);
        assert_eq!(clip.is_featured, Some(true));
        assert!(clip.featured());
    }

    #[test]
    fn clip_without_featured_flag_decodes() {
        let payload = serde_json::json!({
            "data": [{
                "id": "OldClip",
                "embed_url": "https://clips.twitch.tv/embed?clip=OldClip",
                "broadcaster_id": "1234",
                "broadcaster_name": "streamer",
                "creator_name": "clipper",
                "game_id": "1",
                "title": "old",
                "view_count": 150,
                "created_at": "2020-01-01T00:00:00Z",
                "duration": 12.5
            }]
        });
        let envelope: Envelope<HelixClip> = serde_json::from_value(payload).unwrap();
        let clip: Clip = envelope.data.into_iter().next().unwrap().into();
        assert_eq!(clip.is_featured, None);
        // 150 views >= fallback threshold
        assert!(clip.featured());
    }

    #[test]
    fn transient_classification_matches_retry_policy() {
        assert!(HelixError::Status(500, "oops".into()).is_transient());
        assert!(HelixError::Status(503, "oops".into()).is_transient());
        assert!(!HelixError::Status(404, "gone".into()).is_transient());
        assert!(!HelixError::AuthRequired("nope".into()).is_transient());
        assert!(!HelixError::Malformed("bad".into()).is_transient());
    }
}
