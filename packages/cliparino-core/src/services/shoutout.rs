//! Shoutout pipeline: pick a clip of the target broadcaster, announce, play.
//!
//! Candidate selection walks expanding time windows so recently active
//! broadcasters get a fresh clip while long-dormant ones still get their
//! best historical one. Featured clips win within a window when configured.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::seq::SliceRandom;

use crate::events::ChatSink;
use crate::queue::EnqueueSource;
use crate::services::playback_engine::PlaybackHandle;
use crate::state::ShoutoutConfig;
use crate::twitch::helix::HelixResult;
use crate::twitch::traits::{ChannelLookup, ChatOutbound, ClipLookup, TwitchApi};
use crate::twitch::types::Clip;

/// Expanding candidate windows, in days since now.
const SEARCH_WINDOWS_DAYS: [i64; 5] = [1, 7, 30, 90, 365];

/// Candidates pulled per window.
const CANDIDATES_PER_WINDOW: usize = 100;

/// Applies the duration/age filters from configuration.
fn passes_filters(clip: &Clip, config: &ShoutoutConfig, now: DateTime<Utc>) -> bool {
    clip.duration <= config.max_clip_length
        && clip.age(now) <= ChronoDuration::days(config.max_clip_age)
}

/// Picks a clip from one window's candidates.
///
/// With featured-first enabled, featured clips (flag, or the >= 100 views
/// fallback) are preferred; non-featured clips in the same window are the
/// fallback. The final pick is uniform random within the chosen set.
fn pick_from_window(candidates: &[Clip], config: &ShoutoutConfig) -> Option<Clip> {
    let mut rng = rand::thread_rng();
    if config.use_featured_clips {
        let featured: Vec<&Clip> = candidates.iter().filter(|c| c.featured()).collect();
        if let Some(clip) = featured.choose(&mut rng) {
            return Some((*clip).clone());
        }
    }
    candidates.choose(&mut rng).cloned()
}

/// Renders the shoutout message template.
fn render_template(template: &str, broadcaster: &str, game: &str) -> String {
    template
        .replace("{broadcaster}", broadcaster)
        .replace("{game}", game)
}

/// The `!so` pipeline.
pub struct ShoutoutService {
    twitch: Arc<dyn TwitchApi>,
    chat: Arc<dyn ChatSink>,
    engine: PlaybackHandle,
    config: ShoutoutConfig,
    /// The hosting broadcaster's id (shoutouts originate from them).
    broadcaster_id: String,
}

impl ShoutoutService {
    /// Creates the pipeline.
    ///
    /// # Arguments
    /// * `twitch` - Helix surface for lookups and the native shoutout
    /// * `chat` - Best-effort chat output
    /// * `engine` - Playback handle for enqueueing the chosen clip
    /// * `config` - Shoutout behavior
    /// * `broadcaster_id` - The hosting channel's user id
    pub fn new(
        twitch: Arc<dyn TwitchApi>,
        chat: Arc<dyn ChatSink>,
        engine: PlaybackHandle,
        config: ShoutoutConfig,
        broadcaster_id: impl Into<String>,
    ) -> Self {
        Self {
            twitch,
            chat,
            engine,
            config,
            broadcaster_id: broadcaster_id.into(),
        }
    }

    /// Whether raids trigger this pipeline.
    #[must_use]
    pub fn runs_on_raid(&self) -> bool {
        self.config.shoutout_on_raid
    }

    /// Runs the full pipeline for a target login.
    ///
    /// Resolve login, pick a clip across expanding windows, optionally post
    /// the templated message and the native shoutout, then enqueue the clip.
    pub async fn run(&self, login: &str) -> HelixResult<()> {
        let target_id = self.twitch.broadcaster_id_by_login(login).await?;
        let clip = self.pick_clip(&target_id).await?;

        let Some(clip) = clip else {
            log::info!("[Shoutout] No eligible clip found for {}", login);
            self.chat
                .send_line(&format!("No clips found for {login} - go follow them anyway!"))
                .await;
            return Ok(());
        };

        if self.config.enable_message && !self.config.message_template.is_empty() {
            match self.twitch.channel_info(&target_id).await {
                Ok(info) => {
                    let line = render_template(
                        &self.config.message_template,
                        &info.display_name,
                        &info.game_name,
                    );
                    self.chat.send_line(&line).await;
                }
                Err(e) => {
                    log::warn!("[Shoutout] Channel info lookup failed for {}: {}", login, e)
                }
            }
        }

        if self.config.send_twitch_shoutout {
            if let Err(e) = self
                .twitch
                .send_shoutout(&self.broadcaster_id, &target_id, &self.broadcaster_id)
                .await
            {
                // Native shoutouts rate-limit aggressively; the clip still plays.
                log::warn!("[Shoutout] Native shoutout failed for {}: {}", login, e);
            }
        }

        let queued = self.engine.enqueue(clip, EnqueueSource::Shoutout);
        log::info!("[Shoutout] Enqueued clip for {} (queue length {})", login, queued);
        Ok(())
    }

    /// Walks the expanding windows and returns the first window's pick.
    async fn pick_clip(&self, broadcaster_id: &str) -> HelixResult<Option<Clip>> {
        let now = Utc::now();
        for days in SEARCH_WINDOWS_DAYS {
            let started_after = now - ChronoDuration::days(days);
            let candidates = match self
                .twitch
                .clips_for_broadcaster(broadcaster_id, Some(started_after), CANDIDATES_PER_WINDOW)
                .await
            {
                Ok(candidates) => candidates,
                Err(e) if e.is_transient() => {
                    log::warn!("[Shoutout] Window {}d lookup failed: {}", days, e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let eligible: Vec<Clip> = candidates
                .into_iter()
                .filter(|c| passes_filters(c, &self.config, now))
                .collect();
            if let Some(clip) = pick_from_window(&eligible, &self.config) {
                log::debug!(
                    "[Shoutout] Picked clip {} from the {}d window",
                    clip.id,
                    days
                );
                return Ok(Some(clip));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twitch::types::test_fixtures::clip;

    fn config() -> ShoutoutConfig {
        ShoutoutConfig {
            max_clip_length: 60.0,
            max_clip_age: 365,
            use_featured_clips: true,
            ..Default::default()
        }
    }

    #[test]
    fn filters_reject_long_and_old_clips() {
        let now = Utc::now();
        let config = config();

        let ok = clip("ok", "OK", 30.0);
        assert!(passes_filters(&ok, &config, now));

        let long = clip("long", "Long", 61.0);
        assert!(!passes_filters(&long, &config, now));

        let mut old = clip("old", "Old", 30.0);
        old.created_at = now - ChronoDuration::days(400);
        assert!(!passes_filters(&old, &config, now));
    }

    #[test]
    fn featured_clips_win_their_window() {
        let mut featured = clip("featured", "F", 20.0);
        featured.is_featured = Some(true);
        let mut plain = clip("plain", "P", 20.0);
        plain.is_featured = Some(false);

        let candidates = vec![plain.clone(), featured.clone()];
        for _ in 0..20 {
            let pick = pick_from_window(&candidates, &config()).unwrap();
            assert_eq!(pick.id, "featured");
        }
    }

    #[test]
    fn view_count_fallback_counts_as_featured() {
        let mut popular = clip("popular", "P", 20.0);
        popular.view_count = 150;
        let unpopular = clip("unpopular", "U", 20.0);

        let candidates = vec![unpopular, popular];
        for _ in 0..20 {
            let pick = pick_from_window(&candidates, &config()).unwrap();
            assert_eq!(pick.id, "popular");
        }
    }

    #[test]
    fn non_featured_window_still_yields_a_pick() {
        let plain = clip("plain", "P", 20.0);
        let pick = pick_from_window(&[plain], &config()).unwrap();
        assert_eq!(pick.id, "plain");
    }

    #[test]
    fn empty_window_yields_none() {
        assert!(pick_from_window(&[], &config()).is_none());
    }

    #[test]
    fn featured_first_can_be_disabled() {
        let mut featured = clip("featured", "F", 20.0);
        featured.is_featured = Some(true);
        let mut plain = clip("plain", "P", 20.0);
        plain.is_featured = Some(false);

        let relaxed = ShoutoutConfig {
            use_featured_clips: false,
            ..config()
        };
        // With the preference off, both clips must eventually be picked.
        let candidates = vec![plain, featured];
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(pick_from_window(&candidates, &relaxed).unwrap().id);
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn template_substitutes_placeholders() {
        assert_eq!(
            render_template(
                "Check out {broadcaster}! They were last playing {game}.",
                "Shroud",
                "VALORANT"
            ),
            "Check out Shroud! They were last playing VALORANT."
        );
        // Placeholders may be absent.
        assert_eq!(render_template("go follow!", "a", "b"), "go follow!");
    }
}
