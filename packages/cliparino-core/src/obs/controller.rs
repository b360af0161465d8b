//! Desired-state facade over the obs-websocket protocol.
//!
//! The controller owns the socket through a dedicated connection task.
//! Callers submit requests over a channel and receive responses through
//! oneshot replies, which serializes all traffic through the connection:
//! callers observe responses in call order.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::protocol::{
    auth_response, identify_frame, opcode, request_frame, CurrentProgramScene, Hello,
    InputSettings, ObsError, ObsResult, RequestResponse, SceneItemId, SceneList, ServerFrame,
};
use super::{ObsDesiredState, ObsObservedState, ObsPlayer};

/// Per-request deadline for OBS calls.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for the connect + identify handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the request channel into the connection task.
const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// obs-websocket RequestStatus code for "resource not found".
const STATUS_NOT_FOUND: u16 = 600;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct PendingRequest {
    request_type: String,
    data: Option<Value>,
    reply: oneshot::Sender<ObsResult<Value>>,
}

struct ConnectionHandle {
    req_tx: mpsc::Sender<PendingRequest>,
}

/// obs-websocket client and desired-state facade.
///
/// One controller instance manages one browser source in one scene. The
/// supervisor establishes the connection; the playback engine drives the
/// source through the [`ObsPlayer`] trait.
pub struct ObsController {
    desired: RwLock<ObsDesiredState>,
    conn: Mutex<Option<ConnectionHandle>>,
    connected_tx: watch::Sender<bool>,
}

impl ObsController {
    /// Creates a disconnected controller owning the given desired state.
    #[must_use]
    pub fn new(desired: ObsDesiredState) -> Self {
        let (connected_tx, _) = watch::channel(false);
        Self {
            desired: RwLock::new(desired),
            conn: Mutex::new(None),
            connected_tx,
        }
    }

    /// Returns a copy of the current desired state (URL tracks the last
    /// `set_player_url`).
    #[must_use]
    pub fn desired(&self) -> ObsDesiredState {
        self.desired.read().clone()
    }

    /// Subscribes to connection-state changes (`true` = connected).
    ///
    /// This is the single-slot notifier consumed by the playback engine and
    /// the health supervisor; intermediate flips may be collapsed.
    #[must_use]
    pub fn watch_connection(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    /// Whether a connection is currently established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected_tx.borrow()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Connection Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Connects and identifies against an obs-websocket server.
    ///
    /// On success the connection task is spawned and the connection-state
    /// notifier flips to `true`.
    pub async fn connect(&self, host: &str, port: u16, password: &str) -> ObsResult<()> {
        let url = format!("ws://{host}:{port}");
        log::info!("[Obs] Connecting to {}", url);

        let (ws, _) = timeout(HANDSHAKE_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| ObsError::Timeout)?
            .map_err(|e| ObsError::Socket(e.to_string()))?;

        let ws = timeout(HANDSHAKE_TIMEOUT, Self::identify(ws, password))
            .await
            .map_err(|_| ObsError::Timeout)??;

        let (req_tx, req_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        *self.conn.lock() = Some(ConnectionHandle { req_tx });

        let connected_tx = self.connected_tx.clone();
        let _ = connected_tx.send(true);
        tokio::spawn(run_connection(ws, req_rx, connected_tx));

        log::info!("[Obs] Connected and identified");
        Ok(())
    }

    /// Performs the Hello/Identify/Identified handshake.
    async fn identify(mut ws: WsStream, password: &str) -> ObsResult<WsStream> {
        let hello: Hello = loop {
            let frame = Self::next_frame(&mut ws).await?;
            if frame.op == opcode::HELLO {
                break frame.data()?;
            }
        };

        let authentication = hello
            .authentication
            .map(|a| auth_response(password, &a.salt, &a.challenge));

        ws.send(Message::text(identify_frame(authentication).to_string()))
            .await
            .map_err(|e| ObsError::Socket(e.to_string()))?;

        loop {
            let frame = Self::next_frame(&mut ws).await.map_err(|e| match e {
                // obs-websocket closes the socket on a bad password.
                ObsError::Socket(msg) => ObsError::Auth(msg),
                other => other,
            })?;
            if frame.op == opcode::IDENTIFIED {
                return Ok(ws);
            }
        }
    }

    async fn next_frame(ws: &mut WsStream) -> ObsResult<ServerFrame> {
        loop {
            match ws.next().await {
                Some(Ok(message)) => {
                    if let Ok(text) = message.to_text() {
                        if !text.is_empty() {
                            return ServerFrame::parse(text);
                        }
                    }
                }
                Some(Err(e)) => return Err(ObsError::Socket(e.to_string())),
                None => return Err(ObsError::Socket("connection closed".into())),
            }
        }
    }

    /// Gracefully drops the connection and flips the notifier to `false`.
    pub fn disconnect(&self) {
        if self.conn.lock().take().is_some() {
            log::info!("[Obs] Disconnected");
        }
        // Dropping the request sender ends the connection task, which closes
        // the socket.
        let _ = self.connected_tx.send(false);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Request Plumbing
    // ─────────────────────────────────────────────────────────────────────

    /// Sends one request and awaits its response, enforcing the call timeout.
    async fn request(&self, request_type: &str, data: Option<Value>) -> ObsResult<Value> {
        let req_tx = self
            .conn
            .lock()
            .as_ref()
            .map(|c| c.req_tx.clone())
            .ok_or(ObsError::NotConnected)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        req_tx
            .send(PendingRequest {
                request_type: request_type.to_string(),
                data,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ObsError::NotConnected)?;

        match timeout(CALL_TIMEOUT, reply_rx).await {
            Err(_) => Err(ObsError::Timeout),
            Ok(Err(_)) => Err(ObsError::NotConnected),
            Ok(Ok(result)) => result,
        }
    }

    async fn request_typed<T: serde::de::DeserializeOwned>(
        &self,
        request_type: &str,
        data: Option<Value>,
    ) -> ObsResult<T> {
        let value = self.request(request_type, data).await?;
        serde_json::from_value(value)
            .map_err(|e| ObsError::Protocol(format!("bad {request_type} response: {e}")))
    }

    /// Whether an error is the protocol's "resource not found" status.
    fn is_not_found(result: &ObsResult<Value>) -> bool {
        matches!(
            result,
            Err(ObsError::Request { code, .. }) if *code == STATUS_NOT_FOUND
        )
    }

    // ─────────────────────────────────────────────────────────────────────
    // Desired-State Operations
    // ─────────────────────────────────────────────────────────────────────

    /// Initial settings for a freshly created player browser source.
    fn browser_source_settings(desired: &ObsDesiredState) -> Value {
        json!({
            "url": desired.url,
            "width": desired.width,
            "height": desired.height,
            "fps": 60,
            "fps_custom": true,
            "reroute_audio": true,
            "restart_when_active": true,
            "shutdown": true,
            "webpage_control_level": 2,
        })
    }

    /// Idempotently converges OBS onto the desired scene/source state.
    ///
    /// Creates the scene and browser source if absent, patches geometry and
    /// URL if they diverged, and ensures the managed scene is nested in the
    /// current program scene. Safe to call repeatedly: with no external
    /// change, a second call issues only read requests.
    pub async fn ensure_scene_and_source(&self) -> ObsResult<()> {
        let desired = self.desired();

        let scene_list: SceneList = self.request_typed("GetSceneList", None).await?;
        let scene_exists = scene_list
            .scenes
            .iter()
            .any(|s| s.scene_name == desired.scene_name);
        if !scene_exists {
            log::info!("[Obs] Creating scene '{}'", desired.scene_name);
            self.request(
                "CreateScene",
                Some(json!({ "sceneName": desired.scene_name })),
            )
            .await?;
        }

        let item_lookup = self
            .request(
                "GetSceneItemId",
                Some(json!({
                    "sceneName": desired.scene_name,
                    "sourceName": desired.source_name,
                })),
            )
            .await;

        if Self::is_not_found(&item_lookup) {
            log::info!(
                "[Obs] Creating browser source '{}' in '{}'",
                desired.source_name,
                desired.scene_name
            );
            self.request(
                "CreateInput",
                Some(json!({
                    "sceneName": desired.scene_name,
                    "inputName": desired.source_name,
                    "inputKind": "browser_source",
                    "inputSettings": Self::browser_source_settings(&desired),
                    "sceneItemEnabled": false,
                })),
            )
            .await?;
            self.request(
                "SetInputAudioMonitorType",
                Some(json!({
                    "inputName": desired.source_name,
                    "monitorType": "OBS_MONITORING_TYPE_MONITOR_AND_OUTPUT",
                })),
            )
            .await?;
        } else {
            item_lookup?;
            let settings: InputSettings = self
                .request_typed(
                    "GetInputSettings",
                    Some(json!({ "inputName": desired.source_name })),
                )
                .await?;
            let current = &settings.input_settings;
            let url_ok = current["url"].as_str() == Some(desired.url.as_str());
            let width_ok = current["width"].as_u64() == Some(u64::from(desired.width));
            let height_ok = current["height"].as_u64() == Some(u64::from(desired.height));
            if !(url_ok && width_ok && height_ok) {
                log::info!(
                    "[Obs] Patching browser source '{}' settings",
                    desired.source_name
                );
                self.request(
                    "SetInputSettings",
                    Some(json!({
                        "inputName": desired.source_name,
                        "inputSettings": {
                            "url": desired.url,
                            "width": desired.width,
                            "height": desired.height,
                        },
                        "overlay": true,
                    })),
                )
                .await?;
                self.refresh_browser_source().await?;
            }
        }

        // Nest the managed scene in the active program scene so the player
        // shows regardless of which scene the streamer has live.
        if scene_list.current_program_scene_name != desired.scene_name {
            let nested = self
                .request(
                    "GetSceneItemId",
                    Some(json!({
                        "sceneName": scene_list.current_program_scene_name,
                        "sourceName": desired.scene_name,
                    })),
                )
                .await;
            if Self::is_not_found(&nested) {
                log::info!(
                    "[Obs] Nesting scene '{}' into '{}'",
                    desired.scene_name,
                    scene_list.current_program_scene_name
                );
                self.request(
                    "CreateSceneItem",
                    Some(json!({
                        "sceneName": scene_list.current_program_scene_name,
                        "sourceName": desired.scene_name,
                        "sceneItemEnabled": true,
                    })),
                )
                .await?;
            } else {
                nested?;
            }
        }

        Ok(())
    }

    /// Updates the browser source URL (and the tracked desired URL).
    /// Does not change visibility.
    pub async fn set_browser_source_url(&self, url: &str) -> ObsResult<()> {
        let source_name = self.desired.read().source_name.clone();
        self.request(
            "SetInputSettings",
            Some(json!({
                "inputName": source_name,
                "inputSettings": { "url": url },
                "overlay": true,
            })),
        )
        .await?;
        self.desired.write().url = url.to_string();
        Ok(())
    }

    /// Forces the embedded browser to reload its page.
    pub async fn refresh_browser_source(&self) -> ObsResult<()> {
        let source_name = self.desired.read().source_name.clone();
        self.request(
            "PressInputPropertiesButton",
            Some(json!({
                "inputName": source_name,
                "propertyName": "refreshnocache",
            })),
        )
        .await?;
        Ok(())
    }

    /// Idempotent visibility toggle for a source within a scene.
    pub async fn set_source_visibility(
        &self,
        scene_name: &str,
        source_name: &str,
        visible: bool,
    ) -> ObsResult<()> {
        let item: SceneItemId = self
            .request_typed(
                "GetSceneItemId",
                Some(json!({
                    "sceneName": scene_name,
                    "sourceName": source_name,
                })),
            )
            .await?;
        self.request(
            "SetSceneItemEnabled",
            Some(json!({
                "sceneName": scene_name,
                "sceneItemId": item.scene_item_id,
                "sceneItemEnabled": visible,
            })),
        )
        .await?;
        Ok(())
    }

    /// Captures the current URL, geometry, and scene membership of the
    /// managed source for drift comparison.
    pub async fn observe_state(&self) -> ObsResult<ObsObservedState> {
        let desired = self.desired();

        let settings: InputSettings = self
            .request_typed(
                "GetInputSettings",
                Some(json!({ "inputName": desired.source_name })),
            )
            .await?;
        let current = &settings.input_settings;

        let program: CurrentProgramScene =
            self.request_typed("GetCurrentProgramScene", None).await?;
        let in_current_scene = if program.current_program_scene_name == desired.scene_name {
            true
        } else {
            let nested = self
                .request(
                    "GetSceneItemId",
                    Some(json!({
                        "sceneName": program.current_program_scene_name,
                        "sourceName": desired.scene_name,
                    })),
                )
                .await;
            match nested {
                Ok(_) => true,
                ref err if Self::is_not_found(err) => false,
                Err(e) => return Err(e),
            }
        };

        Ok(ObsObservedState {
            url: current["url"].as_str().unwrap_or_default().to_string(),
            width: current["width"].as_u64().unwrap_or_default() as u32,
            height: current["height"].as_u64().unwrap_or_default() as u32,
            in_current_scene,
        })
    }
}

#[async_trait]
impl ObsPlayer for ObsController {
    async fn prepare(&self) -> ObsResult<()> {
        self.ensure_scene_and_source().await
    }

    async fn set_player_url(&self, url: &str) -> ObsResult<()> {
        self.set_browser_source_url(url).await
    }

    async fn set_player_visible(&self, visible: bool) -> ObsResult<()> {
        let desired = self.desired();
        self.set_source_visibility(&desired.scene_name, &desired.source_name, visible)
            .await
    }

    async fn refresh_player(&self) -> ObsResult<()> {
        self.refresh_browser_source().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Task
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the socket: writes queued requests, routes responses to their
/// oneshot replies, and flips the connection notifier on termination.
async fn run_connection(
    ws: WsStream,
    mut req_rx: mpsc::Receiver<PendingRequest>,
    connected_tx: watch::Sender<bool>,
) {
    let (mut sink, mut stream) = ws.split();
    let mut pending: HashMap<String, oneshot::Sender<ObsResult<Value>>> = HashMap::new();
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            request = req_rx.recv() => match request {
                Some(request) => {
                    next_id += 1;
                    let id = format!("req-{next_id}");
                    let frame =
                        request_frame(&request.request_type, &id, request.data);
                    match sink.send(Message::text(frame.to_string())).await {
                        Ok(()) => {
                            pending.insert(id, request.reply);
                        }
                        Err(e) => {
                            let _ = request
                                .reply
                                .send(Err(ObsError::Socket(e.to_string())));
                            break;
                        }
                    }
                }
                // Controller disconnected; close the socket by dropping it.
                None => break,
            },
            message = stream.next() => match message {
                Some(Ok(message)) => {
                    if message.is_close() {
                        log::warn!("[Obs] Server closed the connection");
                        break;
                    }
                    let Ok(text) = message.to_text() else { continue };
                    if text.is_empty() {
                        continue;
                    }
                    match ServerFrame::parse(text) {
                        Ok(frame) if frame.op == opcode::REQUEST_RESPONSE => {
                            dispatch_response(frame, &mut pending);
                        }
                        // Events are not subscribed; other ops are ignored.
                        Ok(_) => {}
                        Err(e) => log::warn!("[Obs] Ignoring unparseable frame: {}", e),
                    }
                }
                Some(Err(e)) => {
                    log::warn!("[Obs] Socket error: {}", e);
                    break;
                }
                None => {
                    log::warn!("[Obs] Connection closed");
                    break;
                }
            },
        }
    }

    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(ObsError::NotConnected));
    }
    let _ = connected_tx.send(false);
}

fn dispatch_response(
    frame: ServerFrame,
    pending: &mut HashMap<String, oneshot::Sender<ObsResult<Value>>>,
) {
    let response: RequestResponse = match frame.data() {
        Ok(response) => response,
        Err(e) => {
            log::warn!("[Obs] Bad RequestResponse frame: {}", e);
            return;
        }
    };
    let Some(reply) = pending.remove(&response.request_id) else {
        log::debug!(
            "[Obs] Response for unknown request id {}",
            response.request_id
        );
        return;
    };
    let result = if response.request_status.result {
        Ok(response.response_data.unwrap_or(Value::Null))
    } else {
        Err(ObsError::Request {
            request_type: response.request_type,
            code: response.request_status.code,
            comment: response.request_status.comment.unwrap_or_default(),
        })
    };
    let _ = reply.send(result);
}
