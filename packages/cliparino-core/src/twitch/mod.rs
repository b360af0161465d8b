//! Twitch integration: Helix REST client, event transports, and auth seam.
//!
//! Two event transports feed one uniform stream:
//!
//! - [`eventsub`]: EventSub over WebSocket (primary)
//! - [`irc`]: legacy IRC over TCP (fallback)
//!
//! The [`coordinator`] owns transport selection and failover; the rest of
//! the system only ever sees [`crate::events::TwitchEvent`] values.

pub mod coordinator;
pub mod eventsub;
pub mod helix;
pub mod irc;
pub mod token;
pub mod traits;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::events::TwitchEvent;

/// Errors terminating an event source's run.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source never became ready (connect/auth/subscribe failed).
    #[error("failed to start: {0}")]
    Start(String),

    /// The underlying transport failed after startup.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame violated the transport's protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server closed the stream.
    #[error("stream closed: {0}")]
    Closed(String),
}

/// Convenient Result alias for event-source runs.
pub type SourceResult<T> = Result<T, SourceError>;

/// A transport producing the uniform Twitch event stream.
///
/// `run` drives the transport until error or cancellation, emitting events
/// into `events`. The `ready` signal fires once the transport is
/// authenticated and subscribed; the coordinator uses it to distinguish
/// "failed to start" from "died later". Cancellation must wind the source
/// down within two seconds.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Transport name for logs and health reports.
    fn name(&self) -> &'static str;

    /// Runs the transport to completion.
    async fn run(
        &self,
        events: mpsc::UnboundedSender<TwitchEvent>,
        ready: oneshot::Sender<()>,
        cancel: CancellationToken,
    ) -> SourceResult<()>;
}
