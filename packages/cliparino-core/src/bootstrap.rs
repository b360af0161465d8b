//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. No service reaches for
//! process-wide state; every dependency is passed in here.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{CliparinoError, CliparinoResult};
use crate::events::{ChatSink, TwitchEvent};
use crate::health::HealthReporter;
use crate::obs::{ObsController, ObsPlayer};
use crate::queue::ClipQueue;
use crate::services::{
    ApprovalGate, ClipSearch, CommandRouter, ObsHealthSupervisor, PlaybackEngine, PlaybackHandle,
    ShoutoutService,
};
use crate::state::Config;
use crate::twitch::coordinator::EventCoordinator;
use crate::twitch::eventsub::EventSubSource;
use crate::twitch::helix::{HelixChatSink, HelixClient};
use crate::twitch::irc::IrcSource;
use crate::twitch::token::TokenProvider;
use crate::twitch::traits::{ChannelLookup, ClipLookup, TwitchApi};
use crate::twitch::EventSource;

/// Default timeout for the shared HTTP client.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period for background tasks to wind down on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Container for all bootstrapped services.
pub struct BootstrappedServices {
    /// Component health registry.
    pub health: Arc<HealthReporter>,
    /// Shared clip queue.
    pub queue: Arc<ClipQueue>,
    /// OBS controller (connection owned by the supervisor task).
    pub obs: Arc<ObsController>,
    /// OBS supervisor, exposed for the external retry signal.
    pub obs_supervisor: Arc<ObsHealthSupervisor>,
    /// Handle for submitting playback work.
    pub engine_handle: PlaybackHandle,
    /// Pending-approval registry.
    pub approvals: Arc<ApprovalGate>,
    /// Helix client.
    pub helix: Arc<HelixClient>,
    /// Resolved broadcaster user id.
    pub broadcaster_id: String,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,

    router: Arc<CommandRouter>,
    coordinator: Arc<EventCoordinator>,
    // Consumed by start_background_tasks.
    engine: Mutex<Option<PlaybackEngine>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TwitchEvent>>>,
    events_tx: mpsc::UnboundedSender<TwitchEvent>,
}

/// Creates the shared HTTP client for all Helix communication.
///
/// A single client enables connection pooling; it is created once here and
/// injected into services that need it.
fn create_http_client() -> Client {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .expect("Failed to create HTTP client")
}

/// Bootstraps all application services with their dependencies.
///
/// Wiring order follows the dependency graph:
///
/// 1. Shared infrastructure (HTTP client, health, cancellation token)
/// 2. Helix client + broadcaster identity resolution
/// 3. OBS controller and queue
/// 4. Playback engine (queue consumer)
/// 5. Command services (search, shoutout, approvals, router)
/// 6. Event transports and coordinator
///
/// # Errors
///
/// Returns an error when the configuration is invalid or the broadcaster
/// login cannot be resolved (bad credentials included).
pub async fn bootstrap_services(
    config: &Config,
    tokens: Arc<dyn TokenProvider>,
) -> CliparinoResult<BootstrappedServices> {
    config
        .validate()
        .map_err(CliparinoError::Configuration)?;

    let http = create_http_client();
    let health = Arc::new(HealthReporter::new());
    let cancel_token = CancellationToken::new();

    let helix = Arc::new(HelixClient::new(
        http,
        config.twitch.client_id.clone(),
        Arc::clone(&tokens),
    ));
    let broadcaster_id = helix
        .broadcaster_id_by_login(&config.twitch.broadcaster_login)
        .await?;
    log::info!(
        "[Bootstrap] Broadcaster {} resolved to id {}",
        config.twitch.broadcaster_login,
        broadcaster_id
    );

    let queue = Arc::new(ClipQueue::new());
    let obs = Arc::new(ObsController::new(config.player.to_desired_state()));
    let chat: Arc<dyn ChatSink> = Arc::new(HelixChatSink::new(
        Arc::clone(&helix),
        broadcaster_id.clone(),
        broadcaster_id.clone(),
    ));

    let (engine, engine_handle) = PlaybackEngine::new(
        Arc::clone(&queue),
        Arc::clone(&obs) as Arc<dyn ObsPlayer>,
        Arc::clone(&chat),
        Arc::clone(&health),
        config.player.clone(),
        obs.watch_connection(),
    );

    let obs_supervisor = Arc::new(ObsHealthSupervisor::new(
        Arc::clone(&obs),
        config.obs.clone(),
        Arc::clone(&health),
    ));

    let approvals = Arc::new(ApprovalGate::new(Duration::from_secs(
        config.clip_search.approval_timeout_seconds,
    )));
    let search = Arc::new(ClipSearch::new(
        Arc::clone(&helix) as Arc<dyn ClipLookup>,
        config.clip_search.clone(),
    ));
    let shoutout = Arc::new(ShoutoutService::new(
        Arc::clone(&helix) as Arc<dyn TwitchApi>,
        Arc::clone(&chat),
        engine_handle.clone(),
        config.shoutout.clone(),
        broadcaster_id.clone(),
    ));
    let router = Arc::new(CommandRouter::new(
        engine_handle.clone(),
        Arc::clone(&helix) as Arc<dyn TwitchApi>,
        search,
        shoutout,
        Arc::clone(&approvals),
        Arc::clone(&chat),
        config.clip_search.clone(),
        config.shoutout.max_clip_length,
    ));

    let eventsub: Arc<dyn EventSource> = Arc::new(EventSubSource::new(
        Arc::clone(&helix),
        broadcaster_id.clone(),
        broadcaster_id.clone(),
    ));
    let irc: Arc<dyn EventSource> = Arc::new(IrcSource::new(
        tokens,
        config.twitch.broadcaster_login.clone(),
    ));
    let coordinator = Arc::new(EventCoordinator::new(eventsub, irc, Arc::clone(&health)));

    let (events_tx, events_rx) = mpsc::unbounded_channel();

    Ok(BootstrappedServices {
        health,
        queue,
        obs,
        obs_supervisor,
        engine_handle,
        approvals,
        helix,
        broadcaster_id,
        cancel_token,
        router,
        coordinator,
        engine: Mutex::new(Some(engine)),
        events_rx: Mutex::new(Some(events_rx)),
        events_tx,
    })
}

impl BootstrappedServices {
    /// Spawns the long-lived supervisor tasks.
    ///
    /// Call once; later calls are no-ops (the engine and router have already
    /// been consumed).
    pub fn start_background_tasks(&self) {
        let Some(engine) = self.engine.lock().take() else {
            log::warn!("[Bootstrap] Background tasks already started");
            return;
        };
        let Some(events_rx) = self.events_rx.lock().take() else {
            return;
        };

        tokio::spawn(engine.run(self.cancel_token.child_token()));

        let supervisor = Arc::clone(&self.obs_supervisor);
        let supervisor_cancel = self.cancel_token.child_token();
        tokio::spawn(async move { supervisor.run(supervisor_cancel).await });

        let router = Arc::clone(&self.router);
        tokio::spawn(router.run(events_rx, self.cancel_token.child_token()));

        let coordinator = Arc::clone(&self.coordinator);
        let events_tx = self.events_tx.clone();
        let coordinator_cancel = self.cancel_token.child_token();
        tokio::spawn(async move { coordinator.run(events_tx, coordinator_cancel).await });

        tokio::spawn(
            Arc::clone(&self.approvals).run_sweeper(self.cancel_token.child_token()),
        );

        log::info!("[Bootstrap] Background tasks started");
    }

    /// Initiates graceful shutdown of all services.
    ///
    /// Signals cancellation, gives tasks a short grace period (the playback
    /// engine hides and blanks the player on its way out), then drops the
    /// OBS connection. Hung I/O is abandoned.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel_token.cancel();
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        self.obs.disconnect();
        log::info!("[Bootstrap] Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twitch::token::StaticTokenProvider;

    #[test]
    fn http_client_is_constructible() {
        let client = create_http_client();
        assert!(client.get("http://example.com").build().is_ok());
    }

    #[tokio::test]
    async fn bootstrap_rejects_invalid_configuration() {
        // Default config lacks the twitch identity.
        let config = Config::default();
        let tokens = Arc::new(StaticTokenProvider::new("token"));
        let result = bootstrap_services(&config, tokens).await;
        assert!(matches!(result, Err(CliparinoError::Configuration(_))));
    }
}
