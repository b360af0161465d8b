//! OBS control: desired state, the obs-websocket client, and trait seams.
//!
//! This module is organized like the other device-facing stacks:
//!
//! - [`protocol`]: raw obs-websocket v5 frames and auth
//! - [`controller`]: the connection-owning desired-state facade
//!
//! The playback engine depends on the narrow [`ObsPlayer`] trait rather than
//! the concrete controller.

pub mod controller;
pub mod protocol;

use async_trait::async_trait;
use serde::Serialize;

pub use controller::ObsController;
pub use protocol::{ObsError, ObsResult};

/// URL loaded into the browser source when nothing is playing.
pub const BLANK_URL: &str = "about:blank";

/// The declared OBS state this process owns.
///
/// The desired state is the single source of truth; any divergence observed
/// in OBS is drift and must be repaired.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObsDesiredState {
    /// Scene that hosts the player source.
    pub scene_name: String,
    /// Browser source name.
    pub source_name: String,
    /// Source width in pixels.
    pub width: u32,
    /// Source height in pixels.
    pub height: u32,
    /// Idle URL for the browser source.
    pub url: String,
}

/// Snapshot of the managed source captured on a health poll.
///
/// Not persisted; used only for drift comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObsObservedState {
    /// Current browser source URL.
    pub url: String,
    /// Current source width.
    pub width: u32,
    /// Current source height.
    pub height: u32,
    /// Whether the managed scene is nested in the current program scene.
    pub in_current_scene: bool,
}

/// Names the desired-vs-observed fields that diverge.
///
/// The desired URL tracks the last URL the engine pushed (the controller
/// updates it on every `set_player_url`), so a URL mismatch here means an
/// external actor rewrote the source.
#[must_use]
pub fn drift_fields(desired: &ObsDesiredState, observed: &ObsObservedState) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if observed.url != desired.url {
        fields.push("Url");
    }
    if observed.width != desired.width {
        fields.push("Width");
    }
    if observed.height != desired.height {
        fields.push("Height");
    }
    if !observed.in_current_scene {
        fields.push("SceneNesting");
    }
    fields
}

/// Playback-facing OBS surface.
///
/// Used by the playback engine to drive the player source without knowing
/// about scenes, scene items, or the socket.
#[async_trait]
pub trait ObsPlayer: Send + Sync {
    /// Ensures the scene and browser source exist and match the desired state.
    async fn prepare(&self) -> ObsResult<()>;

    /// Points the browser source at a URL. Does not change visibility.
    async fn set_player_url(&self, url: &str) -> ObsResult<()>;

    /// Shows or hides the player source.
    async fn set_player_visible(&self, visible: bool) -> ObsResult<()>;

    /// Forces the embedded browser to reload.
    async fn refresh_player(&self) -> ObsResult<()>;
}
