//! Twitch IRC fallback transport.
//!
//! Plain TCP to `irc.chat.twitch.tv:6667`, authenticated with the OAuth
//! token, with the `twitch.tv/tags` and `twitch.tv/commands` capabilities so
//! badges and raids arrive as message tags. Used when EventSub is down;
//! emits the same [`TwitchEvent`] stream.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::token::TokenProvider;
use super::{EventSource, SourceError, SourceResult};
use crate::events::{ChatMessage, Raid, TwitchEvent};
use std::sync::Arc;

/// Twitch IRC endpoint.
pub const IRC_SERVER: &str = "irc.chat.twitch.tv:6667";

// ─────────────────────────────────────────────────────────────────────────────
// Message Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// A parsed IRC line: tags, prefix, command, and params (trailing last).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

/// Unescapes an IRCv3 tag value (`\:` `\s` `\\` `\r` `\n`).
fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Parses one raw IRC line. Returns `None` for empty/garbage lines.
#[must_use]
pub fn parse_irc_message(line: &str) -> Option<IrcMessage> {
    let mut rest = line.trim_end_matches(['\r', '\n']);
    if rest.is_empty() {
        return None;
    }

    let mut tags = HashMap::new();
    if let Some(tagged) = rest.strip_prefix('@') {
        let (tag_part, remainder) = tagged.split_once(' ')?;
        for pair in tag_part.split(';') {
            match pair.split_once('=') {
                Some((key, value)) => {
                    tags.insert(key.to_string(), unescape_tag_value(value));
                }
                None => {
                    tags.insert(pair.to_string(), String::new());
                }
            }
        }
        rest = remainder;
    }

    let mut prefix = None;
    if let Some(prefixed) = rest.strip_prefix(':') {
        let (prefix_part, remainder) = prefixed.split_once(' ')?;
        prefix = Some(prefix_part.to_string());
        rest = remainder;
    }

    let (middle, trailing) = match rest.split_once(" :") {
        Some((middle, trailing)) => (middle, Some(trailing)),
        None => (rest, None),
    };

    let mut parts = middle.split_whitespace();
    let command = parts.next()?.to_string();
    let mut params: Vec<String> = parts.map(str::to_string).collect();
    if let Some(trailing) = trailing {
        params.push(trailing.to_string());
    }

    Some(IrcMessage {
        tags,
        prefix,
        command,
        params,
    })
}

impl IrcMessage {
    /// Nick portion of the prefix (`nick!user@host`).
    #[must_use]
    pub fn nick(&self) -> Option<&str> {
        self.prefix.as_deref().map(|p| match p.split_once('!') {
            Some((nick, _)) => nick,
            None => p,
        })
    }

    /// Badge set names from the `badges` tag (`broadcaster/1,sub/6` ->
    /// `[broadcaster, sub]`).
    #[must_use]
    pub fn badges(&self) -> Vec<String> {
        self.tags
            .get("badges")
            .map(|badges| {
                badges
                    .split(',')
                    .filter(|b| !b.is_empty())
                    .map(|b| match b.split_once('/') {
                        Some((name, _)) => name.to_string(),
                        None => b.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Converts a PRIVMSG or raid USERNOTICE into a [`TwitchEvent`].
    #[must_use]
    pub fn to_event(&self) -> Option<TwitchEvent> {
        match self.command.as_str() {
            "PRIVMSG" => {
                let text = self.params.last()?.clone();
                let user = self
                    .tags
                    .get("display-name")
                    .filter(|n| !n.is_empty())
                    .cloned()
                    .or_else(|| self.nick().map(str::to_string))?;
                Some(TwitchEvent::Chat(ChatMessage {
                    user,
                    user_id: self.tags.get("user-id").cloned().unwrap_or_default(),
                    channel_id: self.tags.get("room-id").cloned().unwrap_or_default(),
                    text,
                    badges: self.badges(),
                }))
            }
            "USERNOTICE" if self.tags.get("msg-id").map(String::as_str) == Some("raid") => {
                let from_user = self
                    .tags
                    .get("msg-param-login")
                    .or_else(|| self.tags.get("login"))
                    .cloned()?;
                let to_user = self
                    .params
                    .first()
                    .map(|c| c.trim_start_matches('#').to_string())
                    .unwrap_or_default();
                let viewer_count = self
                    .tags
                    .get("msg-param-viewerCount")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                Some(TwitchEvent::Raid(Raid {
                    from_user,
                    to_user,
                    viewer_count,
                }))
            }
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Source
// ─────────────────────────────────────────────────────────────────────────────

/// The IRC fallback event source.
pub struct IrcSource {
    tokens: Arc<dyn TokenProvider>,
    /// Login used for NICK and the joined channel.
    login: String,
    server: String,
}

impl IrcSource {
    /// Creates a source for the broadcaster's channel.
    #[must_use]
    pub fn new(tokens: Arc<dyn TokenProvider>, login: impl Into<String>) -> Self {
        Self {
            tokens,
            login: login.into().to_lowercase(),
            server: IRC_SERVER.to_string(),
        }
    }

    /// Overrides the server address (tests).
    #[must_use]
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }
}

#[async_trait]
impl EventSource for IrcSource {
    fn name(&self) -> &'static str {
        "irc"
    }

    async fn run(
        &self,
        events: mpsc::UnboundedSender<TwitchEvent>,
        ready: oneshot::Sender<()>,
        cancel: CancellationToken,
    ) -> SourceResult<()> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| SourceError::Start(e.to_string()))?;

        let stream = TcpStream::connect(&self.server)
            .await
            .map_err(|e| SourceError::Start(format!("connect {}: {e}", self.server)))?;
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let handshake = format!(
            "PASS oauth:{token}\r\nNICK {nick}\r\nCAP REQ :twitch.tv/tags twitch.tv/commands\r\nJOIN #{nick}\r\n",
            nick = self.login
        );
        write_half
            .write_all(handshake.as_bytes())
            .await
            .map_err(|e| SourceError::Start(format!("handshake: {e}")))?;

        log::info!("[IRC] Connected, joining #{}", self.login);
        let mut ready = Some(ready);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("[IRC] Cancelled");
                    return Ok(());
                }
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => return Err(SourceError::Closed("server closed the stream".into())),
                        Err(e) => return Err(SourceError::Transport(e.to_string())),
                    };
                    let Some(message) = parse_irc_message(&line) else { continue };

                    match message.command.as_str() {
                        // Welcome numeric: authenticated and accepted.
                        "001" => {
                            log::info!("[IRC] Authenticated as {}", self.login);
                            if let Some(ready) = ready.take() {
                                let _ = ready.send(());
                            }
                        }
                        "PING" => {
                            let pong = format!(
                                "PONG :{}\r\n",
                                message.params.last().map(String::as_str).unwrap_or("tmi.twitch.tv")
                            );
                            write_half
                                .write_all(pong.as_bytes())
                                .await
                                .map_err(|e| SourceError::Transport(e.to_string()))?;
                        }
                        "NOTICE" => {
                            // Auth failures arrive as NOTICE before the server
                            // drops the connection.
                            let text = message.params.last().map(String::as_str).unwrap_or("");
                            if text.contains("authentication failed") {
                                return Err(SourceError::Start(format!("IRC auth: {text}")));
                            }
                            log::debug!("[IRC] NOTICE: {}", text);
                        }
                        _ => {
                            if let Some(event) = message.to_event() {
                                if events.send(event).is_err() {
                                    return Err(SourceError::Closed("event consumer gone".into()));
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_privmsg() {
        let line = "@badge-info=;badges=moderator/1,subscriber/6;display-name=ModUser;room-id=1234;user-id=999 :moduser!moduser@moduser.tmi.twitch.tv PRIVMSG #streamer :!watch https://clips.twitch.tv/Slug";
        let message = parse_irc_message(line).unwrap();
        assert_eq!(message.command, "PRIVMSG");
        assert_eq!(message.params[0], "#streamer");
        assert_eq!(
            message.params[1],
            "!watch https://clips.twitch.tv/Slug"
        );
        assert_eq!(message.badges(), vec!["moderator", "subscriber"]);

        let event = message.to_event().unwrap();
        let TwitchEvent::Chat(chat) = event else {
            panic!("expected chat event");
        };
        assert_eq!(chat.user, "ModUser");
        assert_eq!(chat.user_id, "999");
        assert_eq!(chat.channel_id, "1234");
        assert_eq!(chat.text, "!watch https://clips.twitch.tv/Slug");
        assert_eq!(chat.badges, vec!["moderator", "subscriber"]);
    }

    #[test]
    fn parses_raid_usernotice() {
        let line = "@msg-id=raid;msg-param-displayName=Raider;msg-param-login=raider;msg-param-viewerCount=42 :tmi.twitch.tv USERNOTICE #streamer";
        let message = parse_irc_message(line).unwrap();
        let event = message.to_event().unwrap();
        let TwitchEvent::Raid(raid) = event else {
            panic!("expected raid event");
        };
        assert_eq!(raid.from_user, "raider");
        assert_eq!(raid.to_user, "streamer");
        assert_eq!(raid.viewer_count, 42);
    }

    #[test]
    fn non_raid_usernotice_is_not_an_event() {
        let line = "@msg-id=sub;msg-param-months=3 :tmi.twitch.tv USERNOTICE #streamer :resubbed!";
        let message = parse_irc_message(line).unwrap();
        assert!(message.to_event().is_none());
    }

    #[test]
    fn parses_ping_without_prefix() {
        let message = parse_irc_message("PING :tmi.twitch.tv").unwrap();
        assert_eq!(message.command, "PING");
        assert_eq!(message.params, vec!["tmi.twitch.tv"]);
    }

    #[test]
    fn parses_welcome_numeric() {
        let message =
            parse_irc_message(":tmi.twitch.tv 001 somebot :Welcome, GLHF!").unwrap();
        assert_eq!(message.command, "001");
        assert_eq!(message.prefix.as_deref(), Some("tmi.twitch.tv"));
    }

    #[test]
    fn tag_values_are_unescaped() {
        let line = r"@display-name=A\sB;note=semi\:colon :a!a@a PRIVMSG #c :hi";
        let message = parse_irc_message(line).unwrap();
        assert_eq!(message.tags["display-name"], "A B");
        assert_eq!(message.tags["note"], "semi;colon");
    }

    #[test]
    fn privmsg_without_display_name_falls_back_to_nick() {
        let line = "@badges=;user-id=7;room-id=1 :plainuser!plainuser@x PRIVMSG #c :hello";
        let message = parse_irc_message(line).unwrap();
        let TwitchEvent::Chat(chat) = message.to_event().unwrap() else {
            panic!("expected chat");
        };
        assert_eq!(chat.user, "plainuser");
        assert!(chat.badges.is_empty());
    }

    #[test]
    fn empty_and_garbage_lines_are_rejected() {
        assert!(parse_irc_message("").is_none());
        assert!(parse_irc_message("\r\n").is_none());
        assert!(parse_irc_message("@tags-only").is_none());
    }
}
