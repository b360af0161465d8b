//! Cliparino Core - control plane for Twitch clip playback in OBS.
//!
//! This crate is the long-lived heart of Cliparino: it watches Twitch chat
//! for clip commands, keeps a FIFO of pending clips, drives an OBS browser
//! source to play exactly one clip at a time, and heals its connections to
//! both Twitch and OBS without operator attention.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backoff`]: Exponential delay policies shared by every retry loop
//! - [`health`]: Component status registry and repair-action history
//! - [`queue`]: Thread-safe clip FIFO plus the last-played slot
//! - [`events`]: The uniform Twitch event stream and the outbound chat seam
//! - [`twitch`]: Helix client, EventSub/IRC transports, transport failover
//! - [`obs`]: obs-websocket v5 client and the desired-state facade
//! - [`services`]: Playback engine, command router, approvals, search,
//!   shoutouts, and the OBS supervisor
//! - [`state`]: Configuration types
//! - [`bootstrap`]: The composition root
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! Services depend on traits rather than concrete clients so each can be
//! exercised in isolation:
//!
//! - [`ObsPlayer`](obs::ObsPlayer): the playback-facing OBS surface
//! - [`ChatSink`](events::ChatSink): best-effort outbound chat lines
//! - [`TwitchApi`](twitch::traits::TwitchApi): the Helix operation set
//! - [`TokenProvider`](twitch::token::TokenProvider): access-token supply
//! - [`EventSource`](twitch::EventSource): one event transport

#![warn(clippy::all)]

pub mod backoff;
pub mod bootstrap;
pub mod error;
pub mod events;
pub mod health;
pub mod obs;
pub mod queue;
pub mod services;
pub mod state;
pub mod twitch;
pub mod utils;

// Re-export commonly used types at the crate root
pub use backoff::{Backoff, Policy};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use error::{CliparinoError, CliparinoResult, ErrorCode};
pub use events::{ChatMessage, ChatSink, LoggingChatSink, NoopChatSink, Raid, TwitchEvent};
pub use health::{ComponentHealth, HealthReporter, HealthStatus};
pub use obs::{ObsController, ObsDesiredState, ObsObservedState, ObsPlayer};
pub use queue::{ClipQueue, EnqueueSource, QueueEntry};
pub use services::{PlaybackHandle, PlaybackState};
pub use state::Config;
pub use twitch::helix::HelixClient;
pub use twitch::token::{StaticTokenProvider, TokenProvider};
pub use twitch::types::{ChannelInfo, Clip};
pub use utils::now_millis;
