//! Application services layer.
//!
//! This module contains the orchestration services that sit between event
//! intake (twitch/) and the device layer (obs/).

pub mod approval_gate;
pub mod clip_search;
pub mod command_router;
pub mod obs_supervisor;
pub mod playback_engine;
pub mod shoutout;

pub use approval_gate::{ApprovalError, ApprovalGate, ApprovalRequest, Verdict};
pub use clip_search::ClipSearch;
pub use command_router::{parse_command, ChatCommand, CommandRouter, ParsedMessage, WatchTarget};
pub use obs_supervisor::ObsHealthSupervisor;
pub use playback_engine::{EngineCommand, PlaybackEngine, PlaybackHandle, PlaybackState};
pub use shoutout::ShoutoutService;
