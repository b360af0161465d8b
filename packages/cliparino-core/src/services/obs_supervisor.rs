//! OBS connection supervisor: initial connect, reconnect loop, drift repair.
//!
//! Three concerns share this one task (so they never race each other):
//!
//! - **Initial connect** with desired-state convergence
//! - **Reconnect loop** on observed disconnects, bounded attempts with
//!   default backoff, then parked until the external retry signal
//! - **Periodic drift check** comparing observed state against desired and
//!   repairing divergence

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::health::{component, HealthReporter, HealthStatus};
use crate::obs::{drift_fields, ObsController};
use crate::state::ObsConfig;

/// Cadence of the drift check while connected.
const DRIFT_INTERVAL: Duration = Duration::from_secs(60);

/// Reconnect attempts per disconnect event before parking.
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Supervisor owning the OBS connection lifecycle.
pub struct ObsHealthSupervisor {
    obs: Arc<ObsController>,
    config: ObsConfig,
    health: Arc<HealthReporter>,
    retry: Notify,
}

impl ObsHealthSupervisor {
    /// Creates a supervisor for the given connection targets.
    #[must_use]
    pub fn new(obs: Arc<ObsController>, config: ObsConfig, health: Arc<HealthReporter>) -> Self {
        Self {
            obs,
            config,
            health,
            retry: Notify::new(),
        }
    }

    /// External trigger: re-attempt the connection after the reconnect loop
    /// exhausted its attempts (settings change or manual retry).
    pub fn retry_now(&self) {
        self.retry.notify_one();
    }

    /// Runs the supervisor until cancellation.
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.try_connect("initial connect").await {
            self.reconnect_loop(&cancel).await;
        }

        let mut conn_rx = self.obs.watch_connection();
        // Clear any flips the connect phase produced.
        let _ = conn_rx.borrow_and_update();
        let mut drift_timer = tokio::time::interval(DRIFT_INTERVAL);
        drift_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.obs.disconnect();
                    log::info!("[ObsSupervisor] Stopped");
                    return;
                }
                _ = drift_timer.tick() => {
                    if self.obs.is_connected() {
                        self.check_drift().await;
                    }
                }
                changed = conn_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let connected = *conn_rx.borrow_and_update();
                    if !connected {
                        log::warn!("[ObsSupervisor] Disconnect observed");
                        self.health.report(
                            component::OBS,
                            HealthStatus::Unhealthy,
                            Some("obs-websocket disconnected"),
                        );
                        self.reconnect_loop(&cancel).await;
                        let _ = conn_rx.borrow_and_update();
                    }
                }
                _ = self.retry.notified() => {
                    if !self.obs.is_connected() {
                        log::info!("[ObsSupervisor] External retry requested");
                        self.reconnect_loop(&cancel).await;
                        let _ = conn_rx.borrow_and_update();
                    }
                }
            }
        }
    }

    /// One connect + converge attempt. Returns whether a connection stands.
    async fn try_connect(&self, label: &str) -> bool {
        match self
            .obs
            .connect(&self.config.host, self.config.port, &self.config.password)
            .await
        {
            Ok(()) => {
                match self.obs.ensure_scene_and_source().await {
                    Ok(()) => {
                        self.health.report(component::OBS, HealthStatus::Healthy, None);
                    }
                    Err(e) => {
                        // Connected, but the scene could not converge yet;
                        // the drift check keeps trying.
                        log::warn!("[ObsSupervisor] ensure after {} failed: {}", label, e);
                        self.health.report(
                            component::OBS,
                            HealthStatus::Degraded,
                            Some(&e.to_string()),
                        );
                    }
                }
                true
            }
            Err(e) => {
                log::warn!("[ObsSupervisor] {} failed: {}", label, e);
                self.health
                    .report(component::OBS, HealthStatus::Unhealthy, Some(&e.to_string()));
                false
            }
        }
    }

    /// Bounded reconnect loop with default backoff.
    ///
    /// On success records "reconnected" and returns. After exhausting the
    /// attempts, reports Unhealthy and returns; the supervisor then waits
    /// for the external retry signal.
    async fn reconnect_loop(&self, cancel: &CancellationToken) {
        let mut backoff = Backoff::default();
        for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
            let delay = backoff.next_delay();
            log::info!(
                "[ObsSupervisor] Reconnect attempt {}/{} in {:?}",
                attempt,
                MAX_RECONNECT_ATTEMPTS,
                delay
            );
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if self.try_connect(&format!("reconnect attempt {attempt}")).await {
                self.health.record_repair(component::OBS, "reconnected");
                return;
            }
            self.health.record_repair(
                component::OBS,
                &format!("reconnect attempt {attempt} failed"),
            );
        }
        log::error!(
            "[ObsSupervisor] Gave up after {} reconnect attempts; waiting for retry signal",
            MAX_RECONNECT_ATTEMPTS
        );
        self.health.report(
            component::OBS,
            HealthStatus::Unhealthy,
            Some("reconnect attempts exhausted"),
        );
    }

    /// Compares observed state against desired and repairs divergence.
    async fn check_drift(&self) {
        let observed = match self.obs.observe_state().await {
            Ok(observed) => observed,
            Err(e) => {
                log::warn!("[ObsSupervisor] Drift poll failed: {}", e);
                self.health
                    .report(component::OBS, HealthStatus::Degraded, Some(&e.to_string()));
                return;
            }
        };

        let desired = self.obs.desired();
        let fields = drift_fields(&desired, &observed);
        if fields.is_empty() {
            self.health.report(component::OBS, HealthStatus::Healthy, None);
            return;
        }

        let field_list = fields.join(", ");
        log::warn!("[ObsSupervisor] Drift detected: {}", field_list);
        self.health
            .record_repair(component::OBS, &format!("drift detected: {field_list}"));
        self.health.report(
            component::OBS,
            HealthStatus::Degraded,
            Some(&format!("drift: {field_list}")),
        );

        let repaired = async {
            self.obs.ensure_scene_and_source().await?;
            self.obs.refresh_browser_source().await
        }
        .await;
        if let Err(e) = repaired {
            log::warn!("[ObsSupervisor] Drift repair failed: {}", e);
            return;
        }

        // Re-check: only a clean observation flips us back to Healthy.
        match self.obs.observe_state().await {
            Ok(observed) if drift_fields(&self.obs.desired(), &observed).is_empty() => {
                self.health.report(component::OBS, HealthStatus::Healthy, None);
            }
            Ok(_) | Err(_) => {
                log::warn!("[ObsSupervisor] Drift persists after repair");
            }
        }
    }
}
