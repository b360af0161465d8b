//! Pending-approval registry for searched clips.
//!
//! Non-exempt viewers' search picks wait here until a broadcaster or
//! moderator resolves them, or until the timeout expires. Every request
//! reaches exactly one terminal state (Approved, Denied, or Expired).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::twitch::types::{has_mod_privileges, Clip};
use crate::utils::short_id;

/// Length of generated approval ids (chat-typable).
const APPROVAL_ID_LEN: usize = 6;

/// Cadence of the expiry sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Resolution verdict for a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    /// Play the clip.
    Approved,
    /// Drop the request.
    Denied,
}

/// Errors returned by [`ApprovalGate::resolve`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    /// The actor lacks broadcaster/moderator privileges.
    #[error("not authorized to resolve approvals")]
    NotAuthorized,
    /// No pending request with that id (unknown, already resolved, or
    /// already swept).
    #[error("no pending approval with id {0}")]
    NotFound(String),
    /// The request exists but its deadline has passed.
    #[error("approval {0} has expired")]
    Expired(String),
}

/// A pending approval request.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    /// Short chat-typable id.
    pub id: String,
    /// The candidate clip.
    pub clip: Clip,
    /// Display name of the requesting viewer.
    pub requested_by: String,
    /// Deadline after which the request expires.
    pub expires_at: Instant,
}

/// Registry of pending approval requests.
///
/// All operations take the internal lock once; a request has exactly one
/// terminal resolution because it is removed from the map on its first.
pub struct ApprovalGate {
    pending: Mutex<HashMap<String, ApprovalRequest>>,
    timeout: Duration,
}

impl ApprovalGate {
    /// Creates a gate with the given request TTL.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Registers a request and returns its id and deadline.
    ///
    /// The caller (the command router) is responsible for announcing the id
    /// in chat.
    pub fn open(&self, clip: Clip, requested_by: &str) -> (String, Instant) {
        let mut pending = self.pending.lock();
        // Regenerate on the (unlikely) id collision with a live request.
        let id = loop {
            let candidate = short_id(APPROVAL_ID_LEN);
            if !pending.contains_key(&candidate) {
                break candidate;
            }
        };
        let expires_at = Instant::now() + self.timeout;
        log::info!(
            "[Approval] Opened request {} for clip {} (by {})",
            id,
            clip.id,
            requested_by
        );
        pending.insert(
            id.clone(),
            ApprovalRequest {
                id: id.clone(),
                clip,
                requested_by: requested_by.to_string(),
                expires_at,
            },
        );
        (id, expires_at)
    }

    /// Resolves a pending request.
    ///
    /// Succeeds only when the actor carries broadcaster/moderator badges and
    /// the request is still pending and unexpired. Returns the clip on
    /// approval, `None` on denial.
    pub fn resolve(
        &self,
        id: &str,
        verdict: Verdict,
        actor_badges: &[String],
    ) -> Result<Option<Clip>, ApprovalError> {
        if !has_mod_privileges(actor_badges) {
            return Err(ApprovalError::NotAuthorized);
        }

        let mut pending = self.pending.lock();
        let Some(request) = pending.remove(id) else {
            return Err(ApprovalError::NotFound(id.to_string()));
        };
        if Instant::now() >= request.expires_at {
            // Expired but not yet swept: Expired is its terminal state.
            return Err(ApprovalError::Expired(id.to_string()));
        }
        log::info!(
            "[Approval] Request {} resolved as {:?} (clip {})",
            id,
            verdict,
            request.clip.id
        );
        match verdict {
            Verdict::Approved => Ok(Some(request.clip)),
            Verdict::Denied => Ok(None),
        }
    }

    /// Removes expired requests and returns them.
    pub fn sweep(&self) -> Vec<ApprovalRequest> {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        let expired_ids: Vec<String> = pending
            .values()
            .filter(|r| now >= r.expires_at)
            .map(|r| r.id.clone())
            .collect();
        expired_ids
            .into_iter()
            .filter_map(|id| {
                let request = pending.remove(&id);
                if let Some(ref request) = request {
                    log::info!(
                        "[Approval] Request {} expired (clip {})",
                        request.id,
                        request.clip.id
                    );
                }
                request
            })
            .collect()
    }

    /// Number of currently pending requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Runs the periodic expiry sweep until cancellation.
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.sweep();
                }
            }
        }
    }
}
