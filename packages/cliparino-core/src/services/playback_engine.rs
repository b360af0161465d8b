//! Playback state machine: consumes the clip queue and drives OBS.
//!
//! Responsibilities:
//! - Own the single-player state machine (at most one clip in
//!   Loading/Playing at any instant)
//! - Drive the OBS player source (URL, visibility) for exactly one queued
//!   clip at a time
//! - Handle per-clip playback-start failures with a 3-strike quarantine
//!
//! All mutation happens inside one task consuming a bounded command channel;
//! external callers interact through [`PlaybackHandle`] and never touch
//! state directly. Chat being lossy by nature, commands that would overflow
//! the channel are dropped with a logged warning.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::events::ChatSink;
use crate::health::{component, HealthReporter, HealthStatus};
use crate::obs::{ObsPlayer, BLANK_URL};
use crate::queue::{ClipQueue, EnqueueSource, QueueEntry};
use crate::state::PlayerConfig;

/// Capacity of the engine command channel.
pub const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Fallback duration for clips reporting zero/missing duration.
const DEFAULT_CLIP_SECS: f64 = 30.0;

/// Extra play time past the clip duration so the player can finish cleanly.
const PLAYBACK_BUFFER: Duration = Duration::from_secs(2);

/// Bounds on the playback timer.
const MIN_PLAYBACK: Duration = Duration::from_secs(5);
const MAX_PLAYBACK: Duration = Duration::from_secs(300);

/// Dwell between a finished clip and picking up the next one.
const COOLDOWN_DWELL: Duration = Duration::from_millis(500);

/// Playback-start failures before an entry is quarantined.
const MAX_ENTRY_FAILURES: u32 = 3;

/// Playback engine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    /// Nothing playing, queue may be empty.
    Idle,
    /// A clip is being pushed into OBS.
    Loading,
    /// A clip is on screen, the playback timer is running.
    Playing,
    /// Short dwell after a clip before the next dequeue.
    Cooldown,
    /// Explicitly stopped; resumes on the next play/enqueue.
    Stopped,
}

/// Commands accepted by the engine's single-consumer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// Check the queue and start playback if idle/stopped.
    Play,
    /// Stop the current clip; the queue is left untouched.
    Stop,
    /// Re-enqueue the last played clip at the head of the queue.
    Replay,
}

/// Cloneable handle for submitting work to the engine.
#[derive(Clone)]
pub struct PlaybackHandle {
    tx: mpsc::Sender<EngineCommand>,
    queue: Arc<ClipQueue>,
    state_rx: watch::Receiver<PlaybackState>,
}

impl PlaybackHandle {
    /// Appends a clip to the queue and nudges the engine. Returns the
    /// resulting queue length.
    pub fn enqueue(&self, clip: crate::twitch::types::Clip, source: EnqueueSource) -> usize {
        let len = self.queue.enqueue(clip, source);
        self.send(EngineCommand::Play);
        len
    }

    /// Requests a stop.
    pub fn stop(&self) {
        self.send(EngineCommand::Stop);
    }

    /// Requests a replay of the last played clip.
    pub fn replay(&self) {
        self.send(EngineCommand::Replay);
    }

    /// Nudges the engine to check the queue.
    pub fn play(&self) {
        self.send(EngineCommand::Play);
    }

    /// Current engine state.
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        *self.state_rx.borrow()
    }

    /// The shared clip queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<ClipQueue> {
        &self.queue
    }

    fn send(&self, command: EngineCommand) {
        match self.tx.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                log::warn!(
                    "[Playback] Command channel full, dropping {:?}",
                    command
                );
            }
            Err(mpsc::error::TrySendError::Closed(command)) => {
                log::warn!(
                    "[Playback] Engine not running, dropping {:?}",
                    command
                );
            }
        }
    }
}

/// The playback engine task.
///
/// Construct with [`PlaybackEngine::new`], keep the returned handle, and run
/// the engine to completion with [`PlaybackEngine::run`].
pub struct PlaybackEngine {
    queue: Arc<ClipQueue>,
    obs: Arc<dyn ObsPlayer>,
    chat: Arc<dyn ChatSink>,
    health: Arc<HealthReporter>,
    player: PlayerConfig,
    rx: mpsc::Receiver<EngineCommand>,
    obs_link: watch::Receiver<bool>,
    state_tx: watch::Sender<PlaybackState>,
    state: PlaybackState,
    current: Option<QueueEntry>,
    play_deadline: Option<Instant>,
    dwell_deadline: Option<Instant>,
}

impl PlaybackEngine {
    /// Creates an engine plus its submission handle.
    ///
    /// # Arguments
    /// * `queue` - Shared clip queue
    /// * `obs` - Playback-facing OBS surface
    /// * `chat` - Best-effort chat output
    /// * `health` - Health reporter
    /// * `player` - Player URL configuration
    /// * `obs_link` - Connection-state notifier from the OBS controller
    pub fn new(
        queue: Arc<ClipQueue>,
        obs: Arc<dyn ObsPlayer>,
        chat: Arc<dyn ChatSink>,
        health: Arc<HealthReporter>,
        player: PlayerConfig,
        obs_link: watch::Receiver<bool>,
    ) -> (Self, PlaybackHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(PlaybackState::Idle);
        let handle = PlaybackHandle {
            tx,
            queue: Arc::clone(&queue),
            state_rx,
        };
        let engine = Self {
            queue,
            obs,
            chat,
            health,
            player,
            rx,
            obs_link,
            state_tx,
            state: PlaybackState::Idle,
            current: None,
            play_deadline: None,
            dwell_deadline: None,
        };
        (engine, handle)
    }

    /// Computes the playback timer for a clip duration in seconds.
    ///
    /// Zero/missing duration plays for 30s; the result is the duration plus
    /// a 2s buffer, clamped to [5s, 300s].
    #[must_use]
    pub fn playback_duration(duration_secs: f64) -> Duration {
        let secs = if duration_secs > 0.0 {
            duration_secs
        } else {
            DEFAULT_CLIP_SECS
        };
        let timer = Duration::from_millis((secs * 1000.0) as u64) + PLAYBACK_BUFFER;
        timer.clamp(MIN_PLAYBACK, MAX_PLAYBACK)
    }

    /// Runs the engine until cancellation.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.health
            .report(component::PLAYBACK, HealthStatus::Healthy, None);

        let mut link_alive = true;
        loop {
            // Copied out so the timer futures don't borrow `self` inside
            // the select.
            let play_deadline = self.play_deadline;
            let dwell_deadline = self.dwell_deadline;

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.hide_player_best_effort().await;
                    log::info!("[Playback] Engine stopped");
                    return;
                }
                command = self.rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => return,
                },
                _ = async move { tokio::time::sleep_until(play_deadline.unwrap()).await },
                    if play_deadline.is_some() =>
                {
                    self.finish_playback().await;
                }
                _ = async move { tokio::time::sleep_until(dwell_deadline.unwrap()).await },
                    if dwell_deadline.is_some() =>
                {
                    self.exit_cooldown().await;
                }
                changed = self.obs_link.changed(), if link_alive => {
                    if changed.is_err() {
                        // Controller gone; stop watching the link.
                        link_alive = false;
                        continue;
                    }
                    let up = *self.obs_link.borrow();
                    self.handle_obs_link(up).await;
                }
            }
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            log::debug!("[Playback] {:?} -> {:?}", self.state, state);
            self.state = state;
            let _ = self.state_tx.send(state);
        }
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Play => match self.state {
                PlaybackState::Idle | PlaybackState::Stopped => self.try_start_next().await,
                // A running or cooling engine picks the queue up by itself.
                _ => {}
            },
            EngineCommand::Stop => self.handle_stop().await,
            EngineCommand::Replay => self.handle_replay().await,
        }
    }

    async fn handle_stop(&mut self) {
        match self.state {
            PlaybackState::Playing | PlaybackState::Loading => {
                self.hide_player_best_effort().await;
                // The interrupted clip is dropped: LastPlayed keeps its
                // previous value and the queue stays untouched.
                self.current = None;
                self.play_deadline = None;
                self.dwell_deadline = None;
                self.set_state(PlaybackState::Stopped);
                log::info!("[Playback] Stopped by request");
            }
            PlaybackState::Stopped => {
                // Stop is idempotent.
            }
            other => {
                log::debug!("[Playback] Ignoring Stop in state {:?}", other);
            }
        }
    }

    async fn handle_replay(&mut self) {
        let Some(last) = self.queue.last_played() else {
            log::info!("[Playback] Replay requested with empty history");
            self.chat.send_line("Nothing to replay yet.").await;
            return;
        };
        log::info!("[Playback] Replaying clip {}", last.id);
        self.queue
            .requeue_front(QueueEntry::new(last, EnqueueSource::Replay));
        if matches!(self.state, PlaybackState::Idle | PlaybackState::Stopped) {
            self.try_start_next().await;
        }
    }

    /// Idle/Stopped -> Loading -> Playing, or failure handling.
    async fn try_start_next(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        if !*self.obs_link.borrow() {
            log::debug!("[Playback] OBS offline, deferring playback");
            return;
        }
        let Some(entry) = self.queue.dequeue() else {
            return;
        };

        self.set_state(PlaybackState::Loading);
        log::info!(
            "[Playback] Loading clip {} ('{}', {}s, queued via {:?})",
            entry.clip.id,
            entry.clip.title,
            entry.clip.duration,
            entry.source
        );

        let clip_url = self.player.clip_url(&entry.clip.id);
        let started = async {
            self.obs.prepare().await?;
            self.obs.set_player_url(&clip_url).await?;
            self.obs.set_player_visible(true).await
        }
        .await;

        match started {
            Ok(()) => {
                let timer = Self::playback_duration(entry.clip.duration);
                self.play_deadline = Some(Instant::now() + timer);
                self.current = Some(entry);
                self.set_state(PlaybackState::Playing);
            }
            Err(e) => {
                self.handle_start_failure(entry, &e.to_string()).await;
            }
        }
    }

    /// Loading failed: retry from the head of the queue or quarantine.
    async fn handle_start_failure(&mut self, mut entry: QueueEntry, error: &str) {
        entry.failure_count += 1;
        log::warn!(
            "[Playback] Failed to start clip {} (failure {}/{}): {}",
            entry.clip.id,
            entry.failure_count,
            MAX_ENTRY_FAILURES,
            error
        );

        if entry.failure_count < MAX_ENTRY_FAILURES {
            self.queue.requeue_front(entry);
        } else {
            log::error!(
                "[Playback] Quarantining clip {} after {} failures, last error: {}",
                entry.clip.id,
                entry.failure_count,
                error
            );
            self.health.record_repair(
                component::PLAYBACK,
                &format!("quarantined clip {}", entry.clip.id),
            );
            self.chat
                .send_line("Skipping clip, try again later.")
                .await;
        }

        self.current = None;
        self.play_deadline = None;
        self.enter_cooldown();
    }

    /// Playing -> Cooldown on timer expiry.
    async fn finish_playback(&mut self) {
        self.play_deadline = None;
        self.hide_player_best_effort().await;
        if let Some(entry) = self.current.take() {
            log::info!("[Playback] Finished clip {}", entry.clip.id);
            self.queue.set_last_played(entry.clip);
        }
        self.enter_cooldown();
    }

    fn enter_cooldown(&mut self) {
        self.dwell_deadline = Some(Instant::now() + COOLDOWN_DWELL);
        self.set_state(PlaybackState::Cooldown);
    }

    /// Cooldown -> Idle, then pick up the queue.
    async fn exit_cooldown(&mut self) {
        self.dwell_deadline = None;
        self.set_state(PlaybackState::Idle);
        self.try_start_next().await;
    }

    /// Reacts to the OBS connection-state notifier.
    async fn handle_obs_link(&mut self, up: bool) {
        if up {
            log::info!("[Playback] OBS link restored");
            if self.state == PlaybackState::Idle {
                self.try_start_next().await;
            }
            return;
        }

        log::warn!("[Playback] OBS link lost");
        if self.state == PlaybackState::Playing {
            // The socket is gone, so hiding is pointless; count the failure
            // and let the entry retry once OBS is back.
            self.play_deadline = None;
            if let Some(mut entry) = self.current.take() {
                entry.failure_count += 1;
                if entry.failure_count < MAX_ENTRY_FAILURES {
                    self.queue.requeue_front(entry);
                } else {
                    log::error!(
                        "[Playback] Quarantining clip {} after {} failures (OBS disconnected)",
                        entry.clip.id,
                        entry.failure_count
                    );
                    self.chat
                        .send_line("Skipping clip, try again later.")
                        .await;
                }
            }
            self.enter_cooldown();
        }
    }

    /// Hides and blanks the player, swallowing errors (used on stop,
    /// finish, and shutdown).
    async fn hide_player_best_effort(&mut self) {
        if let Err(e) = self.obs.set_player_visible(false).await {
            log::debug!("[Playback] Could not hide player: {}", e);
        }
        if let Err(e) = self.obs.set_player_url(BLANK_URL).await {
            log::debug!("[Playback] Could not blank player: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_support::RecordingChatSink;
    use crate::obs::{ObsError, ObsResult};
    use crate::twitch::types::test_fixtures::clip;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// OBS player stub that records calls and can be made to fail.
    #[derive(Default)]
    struct MockPlayer {
        calls: Mutex<Vec<String>>,
        fail: AtomicBool,
    }

    impl MockPlayer {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn record(&self, call: String) -> ObsResult<()> {
            self.calls.lock().push(call);
            if self.fail.load(Ordering::SeqCst) {
                Err(ObsError::NotConnected)
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ObsPlayer for MockPlayer {
        async fn prepare(&self) -> ObsResult<()> {
            self.record("prepare".to_string())
        }

        async fn set_player_url(&self, url: &str) -> ObsResult<()> {
            self.record(format!("url:{url}"))
        }

        async fn set_player_visible(&self, visible: bool) -> ObsResult<()> {
            self.record(format!("visible:{visible}"))
        }

        async fn refresh_player(&self) -> ObsResult<()> {
            self.record("refresh".to_string())
        }
    }

    struct Harness {
        handle: PlaybackHandle,
        player: Arc<MockPlayer>,
        chat: Arc<RecordingChatSink>,
        queue: Arc<ClipQueue>,
        link_tx: watch::Sender<bool>,
        cancel: CancellationToken,
    }

    fn start_engine() -> Harness {
        let queue = Arc::new(ClipQueue::new());
        let player = Arc::new(MockPlayer::default());
        let chat = Arc::new(RecordingChatSink::default());
        let health = Arc::new(HealthReporter::new());
        let (link_tx, link_rx) = watch::channel(true);
        let (engine, handle) = PlaybackEngine::new(
            Arc::clone(&queue),
            Arc::clone(&player) as Arc<dyn ObsPlayer>,
            Arc::clone(&chat) as Arc<dyn ChatSink>,
            health,
            PlayerConfig::default(),
            link_rx,
        );
        let cancel = CancellationToken::new();
        tokio::spawn(engine.run(cancel.clone()));
        Harness {
            handle,
            player,
            chat,
            queue,
            link_tx,
            cancel,
        }
    }

    /// Lets the engine task make progress under paused time.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn playback_duration_applies_buffer_and_clamps() {
        assert_eq!(
            PlaybackEngine::playback_duration(20.0),
            Duration::from_secs(22)
        );
        // Zero duration falls back to 30s + buffer.
        assert_eq!(
            PlaybackEngine::playback_duration(0.0),
            Duration::from_secs(32)
        );
        // Short clips are floored at 5s.
        assert_eq!(
            PlaybackEngine::playback_duration(1.0),
            Duration::from_secs(5)
        );
        // Long clips are capped at 300s.
        assert_eq!(
            PlaybackEngine::playback_duration(3600.0),
            Duration::from_secs(300)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn happy_watch_plays_then_finishes() {
        let h = start_engine();

        h.handle.enqueue(clip("HappyClipSlug", "GG", 20.0), EnqueueSource::Watch);
        settle().await;

        assert_eq!(h.handle.state(), PlaybackState::Playing);
        let calls = h.player.calls();
        assert!(calls.contains(&"prepare".to_string()));
        assert!(calls
            .iter()
            .any(|c| c.starts_with("url:") && c.contains("clip=HappyClipSlug")));
        assert!(calls.contains(&"visible:true".to_string()));
        assert_eq!(h.queue.len(), 0);

        // duration 20s + 2s buffer
        tokio::time::sleep(Duration::from_secs(23)).await;

        let calls = h.player.calls();
        assert!(calls.contains(&"visible:false".to_string()));
        assert!(calls.contains(&format!("url:{BLANK_URL}")));
        assert_eq!(h.queue.last_played().unwrap().id, "HappyClipSlug");
        // Cooldown dwell has elapsed by now.
        assert_eq!(h.handle.state(), PlaybackState::Idle);

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_drops_current_clip_but_keeps_queue_and_history() {
        let h = start_engine();

        h.queue.set_last_played(clip("previous", "Old", 10.0));
        h.handle.enqueue(clip("x", "Current", 30.0), EnqueueSource::Watch);
        h.handle.enqueue(clip("next", "Next", 10.0), EnqueueSource::Watch);
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Playing);

        tokio::time::sleep(Duration::from_secs(5)).await;
        h.handle.stop();
        settle().await;

        assert_eq!(h.handle.state(), PlaybackState::Stopped);
        // LastPlayed unchanged: not the interrupted clip.
        assert_eq!(h.queue.last_played().unwrap().id, "previous");
        // Queue untouched by stop.
        assert_eq!(h.queue.len(), 1);
        let calls = h.player.calls();
        assert!(calls.contains(&"visible:false".to_string()));
        assert!(calls.contains(&format!("url:{BLANK_URL}")));

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_twice_is_observably_one_stop() {
        let h = start_engine();
        h.handle.enqueue(clip("x", "X", 30.0), EnqueueSource::Watch);
        settle().await;

        h.handle.stop();
        settle().await;
        let calls_after_first = h.player.calls().len();

        h.handle.stop();
        settle().await;

        assert_eq!(h.handle.state(), PlaybackState::Stopped);
        assert_eq!(h.player.calls().len(), calls_after_first);

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn replay_with_empty_history_only_talks_to_chat() {
        let h = start_engine();

        h.handle.replay();
        settle().await;

        assert_eq!(h.handle.state(), PlaybackState::Idle);
        assert!(h.player.calls().is_empty());
        assert_eq!(h.chat.lines.lock().as_slice(), ["Nothing to replay yet."]);

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn replay_requeues_last_played_at_head() {
        let h = start_engine();
        h.queue.set_last_played(clip("encore", "Encore", 10.0));
        h.queue.enqueue(clip("waiting", "Waiting", 10.0), EnqueueSource::Watch);

        h.handle.replay();
        settle().await;

        // The replayed clip jumped the queue.
        assert_eq!(h.handle.state(), PlaybackState::Playing);
        assert!(h
            .player
            .calls()
            .iter()
            .any(|c| c.contains("clip=encore")));
        assert_eq!(h.queue.peek().unwrap().clip.id, "waiting");

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn three_start_failures_quarantine_the_entry() {
        let h = start_engine();
        h.player.fail.store(true, Ordering::SeqCst);

        h.handle.enqueue(clip("cursed", "Cursed", 10.0), EnqueueSource::Watch);
        // Three attempts with a cooldown dwell between each.
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(h.queue.len(), 0);
        assert_eq!(h.handle.state(), PlaybackState::Idle);
        let prepares = h
            .player
            .calls()
            .iter()
            .filter(|c| *c == "prepare")
            .count();
        assert_eq!(prepares, 3);
        assert!(h
            .chat
            .lines
            .lock()
            .iter()
            .any(|l| l.contains("Skipping clip")));

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn obs_disconnect_interrupts_playback_and_retries_after_repair() {
        let h = start_engine();
        h.handle.enqueue(clip("frag", "Fragile", 30.0), EnqueueSource::Watch);
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Playing);

        // Link drops mid-play: the entry goes back to the head with one
        // failure counted, and the engine waits out OBS.
        h.link_tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.handle.state(), PlaybackState::Idle);
        let head = h.queue.peek().unwrap();
        assert_eq!(head.clip.id, "frag");
        assert_eq!(head.failure_count, 1);

        // Repair: playback resumes.
        h.link_tx.send(true).unwrap();
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Playing);
        assert_eq!(h.queue.len(), 0);

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_engine_resumes_on_new_enqueue() {
        let h = start_engine();
        h.handle.enqueue(clip("a", "A", 10.0), EnqueueSource::Watch);
        settle().await;
        h.handle.stop();
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Stopped);

        h.handle.enqueue(clip("b", "B", 10.0), EnqueueSource::Watch);
        settle().await;

        assert_eq!(h.handle.state(), PlaybackState::Playing);
        assert!(h.player.calls().iter().any(|c| c.contains("clip=b")));

        h.cancel.cancel();
    }
}
