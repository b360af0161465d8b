//! Chat command parsing and dispatch.
//!
//! The router drains the uniform event stream from the event coordinator,
//! parses `!`-prefixed commands, and orchestrates the playback engine, the
//! approval gate, clip search, and the shoutout pipeline. Helix-bound work
//! runs in short-lived spawned tasks so a slow lookup never head-of-line
//! blocks chat intake. Malformed input yields one concise chat reply;
//! unknown messages are ignored silently; nothing here ever panics the
//! intake loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::{ChatMessage, ChatSink, TwitchEvent};
use crate::queue::EnqueueSource;
use crate::services::approval_gate::{ApprovalError, ApprovalGate, Verdict};
use crate::services::clip_search::ClipSearch;
use crate::services::playback_engine::PlaybackHandle;
use crate::services::shoutout::ShoutoutService;
use crate::state::ClipSearchConfig;
use crate::twitch::traits::{ChannelLookup, ClipLookup, TwitchApi};
use crate::twitch::types::Clip;

// ─────────────────────────────────────────────────────────────────────────────
// Command Grammar
// ─────────────────────────────────────────────────────────────────────────────

/// Target of a `!watch` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    /// A clip URL or bare slug.
    Direct(String),
    /// `@broadcaster` plus free-text search terms.
    Search {
        /// Target broadcaster login (without the `@`).
        broadcaster: String,
        /// Search terms, joined by single spaces.
        terms: String,
    },
}

/// A recognized chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Watch(WatchTarget),
    Stop,
    Replay,
    Shoutout(String),
    Approve(String),
    Deny(String),
}

/// Outcome of parsing one chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedMessage {
    /// A well-formed command.
    Command(ChatCommand),
    /// A recognized command with a bad payload; reply with usage.
    Malformed(&'static str),
    /// Not a command, or not one of ours. Ignored silently.
    Ignored,
}

/// Parses a chat line against the command grammar.
///
/// Commands are case-insensitive, require the leading `!`, and tokenize on
/// whitespace.
#[must_use]
pub fn parse_command(text: &str) -> ParsedMessage {
    let text = text.trim();
    if !text.starts_with('!') {
        return ParsedMessage::Ignored;
    }
    let mut tokens = text.split_whitespace();
    let command = tokens
        .next()
        .map(|t| t.trim_start_matches('!').to_lowercase())
        .unwrap_or_default();
    let rest: Vec<&str> = tokens.collect();

    match command.as_str() {
        "watch" => match rest.as_slice() {
            [] => ParsedMessage::Malformed("Usage: !watch <clip url> or !watch @channel <terms>"),
            [single] if !single.starts_with('@') => {
                ParsedMessage::Command(ChatCommand::Watch(WatchTarget::Direct(single.to_string())))
            }
            [at, terms @ ..] if at.starts_with('@') && !terms.is_empty() => {
                ParsedMessage::Command(ChatCommand::Watch(WatchTarget::Search {
                    broadcaster: at.trim_start_matches('@').to_lowercase(),
                    terms: terms.join(" "),
                }))
            }
            _ => ParsedMessage::Malformed("Usage: !watch <clip url> or !watch @channel <terms>"),
        },
        "stop" => ParsedMessage::Command(ChatCommand::Stop),
        "replay" => ParsedMessage::Command(ChatCommand::Replay),
        "so" | "shoutout" => match rest.as_slice() {
            [login, ..] => ParsedMessage::Command(ChatCommand::Shoutout(
                login.trim_start_matches('@').to_lowercase(),
            )),
            [] => ParsedMessage::Malformed("Usage: !so <channel>"),
        },
        "approve" => match rest.as_slice() {
            [id, ..] => ParsedMessage::Command(ChatCommand::Approve(id.to_lowercase())),
            [] => ParsedMessage::Malformed("Usage: !approve <id>"),
        },
        "deny" => match rest.as_slice() {
            [id, ..] => ParsedMessage::Command(ChatCommand::Deny(id.to_lowercase())),
            [] => ParsedMessage::Malformed("Usage: !deny <id>"),
        },
        _ => ParsedMessage::Ignored,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Routes parsed commands to their owning services.
pub struct CommandRouter {
    engine: PlaybackHandle,
    twitch: Arc<dyn TwitchApi>,
    search: Arc<ClipSearch>,
    shoutout: Arc<ShoutoutService>,
    approvals: Arc<ApprovalGate>,
    chat: Arc<dyn ChatSink>,
    config: ClipSearchConfig,
    /// Upper bound on playable clip duration (seconds); longer clips are
    /// rejected before enqueue.
    max_clip_length: f64,
}

impl CommandRouter {
    /// Creates a router.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: PlaybackHandle,
        twitch: Arc<dyn TwitchApi>,
        search: Arc<ClipSearch>,
        shoutout: Arc<ShoutoutService>,
        approvals: Arc<ApprovalGate>,
        chat: Arc<dyn ChatSink>,
        config: ClipSearchConfig,
        max_clip_length: f64,
    ) -> Self {
        Self {
            engine,
            twitch,
            search,
            shoutout,
            approvals,
            chat,
            config,
            max_clip_length,
        }
    }

    /// Drains the event stream until cancellation.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TwitchEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => return,
                },
            }
        }
    }

    /// Handles one event from either transport.
    pub async fn handle_event(self: &Arc<Self>, event: TwitchEvent) {
        match event {
            TwitchEvent::Chat(message) => self.handle_chat(message).await,
            TwitchEvent::Raid(raid) => {
                if self.shoutout.runs_on_raid() {
                    log::info!(
                        "[Router] Raid from {} ({} viewers), running shoutout",
                        raid.from_user,
                        raid.viewer_count
                    );
                    let router = Arc::clone(self);
                    let login = raid.from_user.to_lowercase();
                    tokio::spawn(async move {
                        if let Err(e) = router.shoutout.run(&login).await {
                            log::warn!("[Router] Raid shoutout for {} failed: {}", login, e);
                        }
                    });
                }
            }
        }
    }

    async fn handle_chat(self: &Arc<Self>, message: ChatMessage) {
        let command = match parse_command(&message.text) {
            ParsedMessage::Command(command) => command,
            ParsedMessage::Malformed(usage) => {
                self.chat.send_line(usage).await;
                return;
            }
            ParsedMessage::Ignored => return,
        };

        log::debug!("[Router] {:?} from {}", command, message.user);
        match command {
            ChatCommand::Stop => self.engine.stop(),
            ChatCommand::Replay => self.engine.replay(),
            ChatCommand::Watch(WatchTarget::Direct(target)) => {
                let router = Arc::clone(self);
                tokio::spawn(async move { router.watch_direct(&target).await });
            }
            ChatCommand::Watch(WatchTarget::Search { broadcaster, terms }) => {
                let router = Arc::clone(self);
                tokio::spawn(async move {
                    router.watch_search(&broadcaster, &terms, &message).await;
                });
            }
            ChatCommand::Shoutout(login) => {
                let router = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = router.shoutout.run(&login).await {
                        log::warn!("[Router] Shoutout for {} failed: {}", login, e);
                        router
                            .chat
                            .send_line(&format!("Couldn't shout out {login} right now."))
                            .await;
                    }
                });
            }
            ChatCommand::Approve(id) => {
                self.resolve_approval(&id, Verdict::Approved, &message).await;
            }
            ChatCommand::Deny(id) => {
                self.resolve_approval(&id, Verdict::Denied, &message).await;
            }
        }
    }

    /// `!watch <url-or-id>`: resolve and enqueue.
    async fn watch_direct(&self, target: &str) {
        let resolved = if target.contains("://") {
            self.twitch.clip_by_url(target).await
        } else {
            self.twitch.clip_by_id(target).await
        };

        match resolved {
            Ok(clip) => self.enqueue_checked(clip, EnqueueSource::Watch).await,
            Err(e) => {
                log::info!("[Router] Could not resolve '{}': {}", target, e);
                self.chat
                    .send_line("Couldn't find that clip - check the link?")
                    .await;
            }
        }
    }

    /// `!watch @broadcaster <terms>`: search, then approval-gate or enqueue.
    async fn watch_search(&self, broadcaster: &str, terms: &str, message: &ChatMessage) {
        let broadcaster_id = match self.twitch.broadcaster_id_by_login(broadcaster).await {
            Ok(id) => id,
            Err(e) => {
                log::info!("[Router] Unknown broadcaster '{}': {}", broadcaster, e);
                self.chat
                    .send_line(&format!("Couldn't find channel {broadcaster}."))
                    .await;
                return;
            }
        };

        let best = match self.search.find_best(&broadcaster_id, terms).await {
            Ok(best) => best,
            Err(e) => {
                log::warn!("[Router] Search failed for '{}': {}", terms, e);
                self.chat.send_line("Clip search failed, try again.").await;
                return;
            }
        };
        let Some(clip) = best else {
            self.chat
                .send_line(&format!("No clip matching '{terms}' found."))
                .await;
            return;
        };

        if self.needs_approval(&message.badges) {
            let (id, _deadline) = self.approvals.open(clip.clone(), &message.user);
            self.chat
                .send_line(&format!(
                    "@{} wants to play: '{}' ({}s). Type !approve {} or !deny {}",
                    message.user, clip.title, clip.duration as u64, id, id
                ))
                .await;
        } else {
            self.enqueue_checked(clip, EnqueueSource::Search).await;
        }
    }

    /// Whether this sender's search picks go through the approval gate.
    fn needs_approval(&self, badges: &[String]) -> bool {
        if !self.config.require_approval {
            return false;
        }
        !badges
            .iter()
            .any(|badge| self.config.exempt_roles.iter().any(|role| role == badge))
    }

    async fn resolve_approval(&self, id: &str, verdict: Verdict, message: &ChatMessage) {
        match self.approvals.resolve(id, verdict, &message.badges) {
            Ok(Some(clip)) => self.enqueue_checked(clip, EnqueueSource::Search).await,
            Ok(None) => {}
            Err(ApprovalError::NotAuthorized) => {
                log::debug!(
                    "[Router] {} tried to resolve approval {} without privileges",
                    message.user,
                    id
                );
            }
            Err(ApprovalError::NotFound(_)) | Err(ApprovalError::Expired(_)) => {
                self.chat
                    .send_line(&format!("Approval {id} is no longer pending."))
                    .await;
            }
        }
    }

    /// Applies the duration bound, then enqueues.
    async fn enqueue_checked(&self, clip: Clip, source: EnqueueSource) {
        if clip.duration > self.max_clip_length {
            log::info!(
                "[Router] Rejecting clip {} ({}s > {}s max)",
                clip.id,
                clip.duration,
                self.max_clip_length
            );
            self.chat
                .send_line("That clip is too long to play here.")
                .await;
            return;
        }
        let length = self.engine.enqueue(clip, source);
        log::info!("[Router] Enqueued clip (queue length {})", length);
    }
}
