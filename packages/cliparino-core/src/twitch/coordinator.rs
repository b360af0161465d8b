//! Event intake orchestration: EventSub first, IRC as fallback.
//!
//! The coordinator owns both transports and a single downstream event
//! channel. EventSub is always preferred; when it cannot start (or dies),
//! IRC takes over and EventSub is re-probed on the default backoff
//! schedule. IRC is only cancelled once a probe has a fully established
//! EventSub session, so the switch itself has no intake gap. Component
//! health mirrors the active transport.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{EventSource, SourceError, SourceResult};
use crate::backoff::Backoff;
use crate::events::TwitchEvent;
use crate::health::{component, HealthReporter, HealthStatus};

/// How long a source gets from start to its ready signal.
const START_WINDOW: Duration = Duration::from_secs(10);

/// Health reason while running on the fallback transport.
const IRC_FALLBACK_REASON: &str = "EventSub unavailable, using IRC";

type SourceRun = Pin<Box<dyn Future<Output = SourceResult<()>> + Send>>;

/// Result of trying to bring a source up.
enum StartOutcome {
    /// The source signalled ready; the returned future drives it to
    /// completion.
    Ready(SourceRun),
    /// The source never became ready.
    Failed(SourceError),
}

/// Starts a source and waits for its ready signal within the start window.
async fn start_source(
    source: Arc<dyn EventSource>,
    events: mpsc::UnboundedSender<TwitchEvent>,
    cancel: CancellationToken,
    window: Duration,
) -> StartOutcome {
    let (ready_tx, ready_rx) = oneshot::channel();
    let mut run: SourceRun = Box::pin(async move { source.run(events, ready_tx, cancel).await });

    tokio::select! {
        result = &mut run => {
            StartOutcome::Failed(match result {
                Ok(()) => SourceError::Closed("ended during startup".into()),
                Err(e) => e,
            })
        }
        ready = ready_rx => match ready {
            Ok(()) => StartOutcome::Ready(run),
            // Ready sender dropped without firing: the source is on its way
            // to an error; collect it.
            Err(_) => StartOutcome::Failed(match run.await {
                Ok(()) => SourceError::Closed("ended during startup".into()),
                Err(e) => e,
            }),
        },
        _ = tokio::time::sleep(window) => {
            StartOutcome::Failed(SourceError::Start("start window elapsed".into()))
        }
    }
}

/// Orchestrator for event intake across both transports.
pub struct EventCoordinator {
    eventsub: Arc<dyn EventSource>,
    irc: Arc<dyn EventSource>,
    health: Arc<HealthReporter>,
}

impl EventCoordinator {
    /// Creates a coordinator over the two transports.
    #[must_use]
    pub fn new(
        eventsub: Arc<dyn EventSource>,
        irc: Arc<dyn EventSource>,
        health: Arc<HealthReporter>,
    ) -> Self {
        Self {
            eventsub,
            irc,
            health,
        }
    }

    /// Runs transport selection until cancellation.
    ///
    /// Every spawned source runs under a child of `cancel`, so cancelling
    /// the root winds down whichever transport is active.
    pub async fn run(&self, events: mpsc::UnboundedSender<TwitchEvent>, cancel: CancellationToken) {
        let mut backoff = Backoff::default();

        'cycle: loop {
            if cancel.is_cancelled() {
                return;
            }

            // ── Primary: EventSub ────────────────────────────────────────
            let es_cancel = cancel.child_token();
            match start_source(
                Arc::clone(&self.eventsub),
                events.clone(),
                es_cancel,
                START_WINDOW,
            )
            .await
            {
                StartOutcome::Ready(run) => {
                    backoff.reset();
                    self.health
                        .report(component::TWITCH_EVENTS, HealthStatus::Healthy, None);
                    log::info!("[Events] EventSub active");

                    let result = run.await;
                    if cancel.is_cancelled() {
                        return;
                    }
                    log::warn!("[Events] EventSub terminated: {:?}", result.err());
                    self.health
                        .record_repair(component::TWITCH_EVENTS, "eventsub stream ended");
                }
                StartOutcome::Failed(e) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    log::warn!("[Events] EventSub failed to start: {}", e);
                }
            }

            // ── Fallback: IRC with periodic EventSub re-probes ──────────
            self.health.report(
                component::TWITCH_EVENTS,
                HealthStatus::Degraded,
                Some(IRC_FALLBACK_REASON),
            );

            let irc_cancel = cancel.child_token();
            let mut irc_run = match start_source(
                Arc::clone(&self.irc),
                events.clone(),
                irc_cancel.clone(),
                START_WINDOW,
            )
            .await
            {
                StartOutcome::Ready(run) => run,
                StartOutcome::Failed(e) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    log::error!("[Events] IRC failed to start: {}", e);
                    self.health.report(
                        component::TWITCH_EVENTS,
                        HealthStatus::Unhealthy,
                        Some(&format!("both transports failed: {e}")),
                    );
                    let delay = backoff.next_delay();
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue 'cycle;
                }
            };
            log::info!("[Events] IRC fallback active");
            self.health
                .record_repair(component::TWITCH_EVENTS, "fell back to IRC");

            loop {
                let probe_delay = backoff.next_delay();
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = &mut irc_run => {
                        if cancel.is_cancelled() {
                            return;
                        }
                        log::warn!("[Events] IRC terminated: {:?}", result.err());
                        self.health.report(
                            component::TWITCH_EVENTS,
                            HealthStatus::Unhealthy,
                            Some("both transports failed in this cycle"),
                        );
                        let delay = backoff.next_delay();
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue 'cycle;
                    }
                    _ = tokio::time::sleep(probe_delay) => {
                        log::info!("[Events] Re-probing EventSub while on IRC");
                        let probe_cancel = cancel.child_token();
                        match start_source(
                            Arc::clone(&self.eventsub),
                            events.clone(),
                            probe_cancel,
                            START_WINDOW,
                        )
                        .await
                        {
                            StartOutcome::Ready(es_run) => {
                                // Only now is IRC taken down: the EventSub
                                // session is established and subscribed.
                                irc_cancel.cancel();
                                let _ = irc_run.as_mut().await;
                                backoff.reset();
                                self.health.report(
                                    component::TWITCH_EVENTS,
                                    HealthStatus::Healthy,
                                    None,
                                );
                                self.health.record_repair(
                                    component::TWITCH_EVENTS,
                                    "eventsub restored",
                                );
                                log::info!("[Events] EventSub restored, IRC stopped");

                                let result = es_run.await;
                                if cancel.is_cancelled() {
                                    return;
                                }
                                log::warn!(
                                    "[Events] EventSub terminated: {:?}",
                                    result.err()
                                );
                                continue 'cycle;
                            }
                            StartOutcome::Failed(e) => {
                                log::debug!("[Events] EventSub still down: {}", e);
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
    use crate::events::{ChatMessage, TwitchEvent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn chat(text: &str) -> TwitchEvent {
        TwitchEvent::Chat(ChatMessage {
            user: "viewer".to_string(),
            user_id: "1".to_string(),
            channel_id: "2".to_string(),
            text: text.to_string(),
            badges: vec![],
        })
    }

    /// Source that fails its first `fail_starts` runs, then becomes ready,
    /// emits one marker event, and idles until cancelled.
    struct ScriptedSource {
        name: &'static str,
        fail_starts: u32,
        attempts: AtomicU32,
    }

    impl ScriptedSource {
        fn new(name: &'static str, fail_starts: u32) -> Self {
            Self {
                name,
                fail_starts,
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(
            &self,
            events: mpsc::UnboundedSender<TwitchEvent>,
            ready: oneshot::Sender<()>,
            cancel: CancellationToken,
        ) -> SourceResult<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_starts {
                return Err(SourceError::Start("scripted failure".into()));
            }
            let _ = ready.send(());
            let _ = events.send(chat(&format!("from-{}", self.name)));
            cancel.cancelled().await;
            Ok(())
        }
    }

    struct Harness {
        health: Arc<HealthReporter>,
        events: mpsc::UnboundedReceiver<TwitchEvent>,
        cancel: CancellationToken,
    }

    fn start(eventsub: ScriptedSource, irc: ScriptedSource) -> Harness {
        let health = Arc::new(HealthReporter::new());
        let coordinator = EventCoordinator::new(
            Arc::new(eventsub),
            Arc::new(irc),
            Arc::clone(&health),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        tokio::spawn(async move { coordinator.run(tx, run_cancel).await });
        Harness {
            health,
            events: rx,
            cancel,
        }
    }

    fn twitch_status(health: &HealthReporter) -> HealthStatus {
        health
            .component(component::TWITCH_EVENTS)
            .map(|h| h.status)
            .unwrap_or(HealthStatus::Unknown)
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_eventsub_is_preferred() {
        let mut h = start(
            ScriptedSource::new("eventsub", 0),
            ScriptedSource::new("irc", 0),
        );

        let event = h.events.recv().await.unwrap();
        let TwitchEvent::Chat(chat) = event else { panic!() };
        assert_eq!(chat.text, "from-eventsub");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(twitch_status(&h.health), HealthStatus::Healthy);

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn irc_takes_over_when_eventsub_cannot_start() {
        let mut h = start(
            ScriptedSource::new("eventsub", u32::MAX),
            ScriptedSource::new("irc", 0),
        );

        let event = h.events.recv().await.unwrap();
        let TwitchEvent::Chat(chat) = event else { panic!() };
        assert_eq!(chat.text, "from-irc");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(twitch_status(&h.health), HealthStatus::Degraded);
        let record = h.health.component(component::TWITCH_EVENTS).unwrap();
        assert_eq!(record.last_error.as_deref(), Some(IRC_FALLBACK_REASON));

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn eventsub_recovery_switches_back_from_irc() {
        // EventSub fails its first two runs (initial attempt + first probe),
        // then comes up.
        let mut h = start(
            ScriptedSource::new("eventsub", 2),
            ScriptedSource::new("irc", 0),
        );

        // First delivered event comes from IRC.
        let TwitchEvent::Chat(first) = h.events.recv().await.unwrap() else {
            panic!()
        };
        assert_eq!(first.text, "from-irc");

        // Eventually a probe succeeds and EventSub delivers.
        let mut texts = Vec::new();
        while let Some(TwitchEvent::Chat(chat)) = h.events.recv().await {
            texts.push(chat.text.clone());
            if chat.text == "from-eventsub" {
                break;
            }
        }
        assert!(texts.contains(&"from-eventsub".to_string()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(twitch_status(&h.health), HealthStatus::Healthy);
        let repairs: Vec<_> = h
            .health
            .component(component::TWITCH_EVENTS)
            .unwrap()
            .repairs
            .iter()
            .map(|r| r.action.clone())
            .collect();
        assert!(repairs.contains(&"eventsub restored".to_string()));

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn both_transports_failing_reports_unhealthy() {
        let h = start(
            ScriptedSource::new("eventsub", u32::MAX),
            ScriptedSource::new("irc", u32::MAX),
        );

        // The cycle re-reports Degraded before each IRC attempt, so sample
        // until the terminal Unhealthy report shows up.
        let mut saw_unhealthy = false;
        for _ in 0..60 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if twitch_status(&h.health) == HealthStatus::Unhealthy {
                saw_unhealthy = true;
                break;
            }
        }
        assert!(saw_unhealthy);

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_coordinator_quickly() {
        let h = start(
            ScriptedSource::new("eventsub", 0),
            ScriptedSource::new("irc", 0),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        h.cancel.cancel();
        // The sources react to the child token; nothing left to observe but
        // the absence of a hang.
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}
