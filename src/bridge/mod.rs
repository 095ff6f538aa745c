//! WebSocket bridge to the Godot editor plugin.
//!
//! The bridge listens for the editor, admits a single peer at a time, and
//! correlates `tool_result` frames with the calls that produced them. All
//! mutable state lives behind one lock so that result delivery and
//! disconnect draining can never both resolve the same call.

mod error;
mod pending;

use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::protocol::{parse_inbound, InboundMessage, OutboundMessage, ToolResultFrame};

pub use error::InvokeError;
use pending::PendingCalls;

/// Close code sent to a second editor while another one is attached.
pub const DUPLICATE_PEER_CLOSE_CODE: u16 = 4000;
const DUPLICATE_PEER_REASON: &str = "Another Godot instance is already connected";
const GOING_AWAY_CLOSE_CODE: u16 = 1001;
const OUTBOUND_QUEUE_CAPACITY: usize = 64;
const REJECT_LINGER: Duration = Duration::from_millis(500);
const WRITER_DRAIN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    pub project_path: Option<String>,
    pub connected_at: u64,
}

/// Point-in-time view of the bridge, computed under the state lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<u64>,
    pub pending_requests: usize,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub connected: bool,
    pub info: Option<PeerInfo>,
}

type ConnectionObserver = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

struct PeerConnection {
    conn_id: u64,
    info: PeerInfo,
    outbound: mpsc::Sender<Message>,
    cancel: watch::Sender<bool>,
}

struct ListenerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct BridgeState {
    peer: Option<PeerConnection>,
    pending: PendingCalls,
    observers: Vec<ConnectionObserver>,
    listener: Option<ListenerHandle>,
    stopped: bool,
}

struct BridgeInner {
    config: BridgeConfig,
    state: Mutex<BridgeState>,
    next_conn_id: AtomicU64,
}

#[derive(Clone)]
pub struct EditorBridge {
    inner: Arc<BridgeInner>,
}

impl EditorBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                config,
                state: Mutex::new(BridgeState::default()),
                next_conn_id: AtomicU64::new(1),
            }),
        }
    }

    /// Binds the listener and returns once it is accepting; editors may attach
    /// at any later point.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut state = self.inner.state.lock().await;
        if let Some(listener) = state.listener.as_ref() {
            return Ok(listener.addr);
        }
        let bind = self.inner.config.listen_addr();
        let listener = TcpListener::bind(&bind)
            .await
            .with_context(|| format!("failed binding editor bridge listener on {bind}"))?;
        let addr = listener
            .local_addr()
            .context("failed reading bound address")?;
        info!("editor bridge listening on ws://{addr}");

        let bridge = self.clone();
        let task = tokio::spawn(async move { bridge.accept_loop(listener).await });
        state.listener = Some(ListenerHandle { addr, task });
        state.stopped = false;
        Ok(addr)
    }

    /// Fails every pending call, closes the editor socket and the listener.
    /// Handshakes still in flight are refused until the next `start`.
    pub async fn stop(&self) {
        let (peer, listener) = {
            let mut state = self.inner.state.lock().await;
            state.stopped = true;
            let drained = state.pending.drain(InvokeError::ShuttingDown);
            if drained > 0 {
                warn!("cancelled {drained} pending editor calls on shutdown");
            }
            let peer = state.peer.take();
            if let Some(peer) = peer.as_ref() {
                let _ = peer.outbound.try_send(Message::Close(Some(close_frame(
                    GOING_AWAY_CLOSE_CODE,
                    "server shutting down",
                ))));
                let _ = peer.cancel.send(true);
            }
            (peer, state.listener.take())
        };

        if let Some(listener) = listener {
            listener.task.abort();
            let _ = listener.task.await;
            info!("editor bridge stopped listening on {}", listener.addr);
        }
        if let Some(peer) = peer {
            self.notify(ConnectionEvent {
                connected: false,
                info: Some(peer.info),
            })
            .await;
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.peer.is_some()
    }

    pub async fn status(&self) -> BridgeStatus {
        let state = self.inner.state.lock().await;
        let info = state.peer.as_ref().map(|peer| &peer.info);
        BridgeStatus {
            connected: info.is_some(),
            project_path: info.and_then(|info| info.project_path.clone()),
            connected_at: info.map(|info| info.connected_at),
            pending_requests: state.pending.len(),
            port: state
                .listener
                .as_ref()
                .map(|listener| listener.addr.port())
                .unwrap_or(self.inner.config.port),
        }
    }

    pub async fn on_connection_change<F>(&self, observer: F)
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner
            .state
            .lock()
            .await
            .observers
            .push(Arc::new(observer));
    }

    pub async fn invoke(&self, tool: &str, args: Value) -> Result<Value, InvokeError> {
        self.invoke_with_timeout(tool, args, self.inner.config.request_timeout())
            .await
    }

    /// Sends `tool` to the editor and waits for its result, the deadline, or
    /// teardown, whichever comes first.
    pub async fn invoke_with_timeout(
        &self,
        tool: &str,
        args: Value,
        limit: Duration,
    ) -> Result<Value, InvokeError> {
        let deadline = Instant::now() + limit;
        let (id, mut waiter, outbound) = {
            let mut state = self.inner.state.lock().await;
            let Some(outbound) = state.peer.as_ref().map(|peer| peer.outbound.clone()) else {
                return Err(InvokeError::NotConnected);
            };
            let (id, waiter) = state.pending.register(tool);
            (id, waiter, outbound)
        };
        let timed_out = || InvokeError::Timeout {
            tool: tool.to_owned(),
            timeout: limit,
        };

        let frame = OutboundMessage::ToolInvoke {
            id: &id,
            tool,
            args: &args,
        }
        .to_text();
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                return self
                    .abandon(&id, waiter, InvokeError::Encode(format!("{err:#}")))
                    .await;
            }
        };

        info!("invoking tool {tool} ({id})");
        match timeout_at(deadline, outbound.send(Message::Text(frame))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return self.abandon(&id, waiter, InvokeError::Disconnected).await,
            Err(_) => return self.abandon(&id, waiter, timed_out()).await,
        }
        drop(outbound);

        match timeout_at(deadline, &mut waiter).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(InvokeError::Disconnected),
            Err(_) => self.abandon(&id, waiter, timed_out()).await,
        }
    }

    /// Removes `id` on the caller's behalf. When another path already resolved
    /// it, that outcome wins so the caller still sees exactly one result.
    async fn abandon(
        &self,
        id: &str,
        mut waiter: tokio::sync::oneshot::Receiver<pending::CallOutcome>,
        reason: InvokeError,
    ) -> Result<Value, InvokeError> {
        let removed = self.inner.state.lock().await.pending.forget(id);
        if removed {
            return Err(reason);
        }
        waiter.try_recv().unwrap_or(Err(reason))
    }

    /// Connection tasks live in a `JoinSet` owned by this loop, so aborting
    /// the loop aborts every connection it accepted.
    async fn accept_loop(self, listener: TcpListener) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let bridge = self.clone();
                        connections.spawn(async move {
                            if let Err(err) = bridge.handle_connection(stream, remote_addr).await {
                                warn!("editor connection {remote_addr} failed: {err:#}");
                            }
                        });
                    }
                    Err(err) => {
                        warn!("editor bridge accept failed: {err}");
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, remote_addr: SocketAddr) -> Result<()> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.inner.config.max_frame_bytes);
        ws_config.max_frame_size = Some(self.inner.config.max_frame_bytes);
        let ws = accept_async_with_config(stream, Some(ws_config))
            .await
            .with_context(|| format!("websocket upgrade failed for {remote_addr}"))?;
        let (mut write, mut read) = ws.split();

        let conn_id = self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_CAPACITY);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let info = {
            let mut state = self.inner.state.lock().await;
            if state.stopped {
                drop(state);
                debug!("refusing editor connection from {remote_addr}: bridge stopped");
                let _ = write
                    .send(Message::Close(Some(close_frame(
                        GOING_AWAY_CLOSE_CODE,
                        "server shutting down",
                    ))))
                    .await;
                return Ok(());
            }
            if state.peer.is_some() {
                drop(state);
                warn!("rejecting editor connection from {remote_addr}: already connected");
                write
                    .send(Message::Close(Some(close_frame(
                        DUPLICATE_PEER_CLOSE_CODE,
                        DUPLICATE_PEER_REASON,
                    ))))
                    .await
                    .context("failed sending duplicate-peer close frame")?;
                let _ = timeout(REJECT_LINGER, read.next()).await;
                return Ok(());
            }
            let info = PeerInfo {
                project_path: None,
                connected_at: now_ms(),
            };
            state.peer = Some(PeerConnection {
                conn_id,
                info: info.clone(),
                outbound: out_tx.clone(),
                cancel: cancel_tx,
            });
            info
        };

        let mut writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if write.send(message).await.is_err() || closing {
                    break;
                }
            }
            let _ = write.close().await;
        });

        info!("Godot connected from {remote_addr}");
        self.notify(ConnectionEvent {
            connected: true,
            info: Some(info),
        })
        .await;

        let keepalive = tokio::spawn(keepalive_loop(
            out_tx.clone(),
            self.inner.config.ping_interval(),
            cancel_rx.clone(),
        ));

        loop {
            let inbound = tokio::select! {
                _ = cancel_rx.changed() => break,
                inbound = read.next() => inbound,
            };
            let Some(inbound) = inbound else {
                break;
            };
            let inbound = match inbound {
                Ok(message) => message,
                Err(err) => {
                    warn!("editor read error: {err}");
                    break;
                }
            };
            match inbound {
                Message::Text(text) => self.dispatch_frame(conn_id, &text).await,
                Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.dispatch_frame(conn_id, text).await,
                    Err(_) => warn!("dropping non UTF-8 binary frame from editor"),
                },
                Message::Ping(payload) => {
                    let _ = out_tx.try_send(Message::Pong(payload));
                }
                Message::Close(_) => break,
                Message::Pong(_) | Message::Frame(_) => {}
            }
        }

        keepalive.abort();
        let _ = keepalive.await;
        self.handle_disconnect(conn_id).await;
        drop(out_tx);
        if timeout(WRITER_DRAIN, &mut writer).await.is_err() {
            writer.abort();
        }
        Ok(())
    }

    async fn dispatch_frame(&self, conn_id: u64, text: &str) {
        match parse_inbound(text) {
            Ok(InboundMessage::ToolResult(frame)) => self.deliver_result(frame).await,
            Ok(InboundMessage::Pong) => {}
            Ok(InboundMessage::Ready { project_path }) => {
                let mut state = self.inner.state.lock().await;
                if let Some(peer) = state.peer.as_mut().filter(|peer| peer.conn_id == conn_id) {
                    info!(
                        "Godot project: {}",
                        project_path.as_deref().unwrap_or("<unknown>")
                    );
                    peer.info.project_path = project_path;
                }
            }
            Ok(InboundMessage::Unknown(kind)) => {
                warn!("unknown editor message type: {kind}");
            }
            Err(err) => {
                warn!("failed to parse editor frame: {err:#}");
            }
        }
    }

    async fn deliver_result(&self, frame: ToolResultFrame) {
        let outcome = if frame.success {
            Ok(frame.result.unwrap_or(Value::Null))
        } else {
            Err(InvokeError::remote(frame.error))
        };
        let mut state = self.inner.state.lock().await;
        if !state.pending.resolve(&frame.id, outcome) {
            warn!("received result for unknown request {}", frame.id);
        }
    }

    async fn handle_disconnect(&self, conn_id: u64) {
        let info = {
            let mut state = self.inner.state.lock().await;
            if !state
                .peer
                .as_ref()
                .is_some_and(|peer| peer.conn_id == conn_id)
            {
                return;
            }
            let Some(peer) = state.peer.take() else {
                return;
            };
            let _ = peer.cancel.send(true);
            let drained = state.pending.drain(InvokeError::Disconnected);
            if drained > 0 {
                warn!("failed {drained} pending editor calls after disconnect");
            }
            peer.info
        };
        info!("Godot disconnected");
        self.notify(ConnectionEvent {
            connected: false,
            info: Some(info),
        })
        .await;
    }

    async fn notify(&self, event: ConnectionEvent) {
        let observers = self.inner.state.lock().await.observers.clone();
        for observer in observers {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(&event))).is_err() {
                warn!("connection observer panicked");
            }
        }
    }
}

async fn keepalive_loop(
    outbound: mpsc::Sender<Message>,
    period: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    let ping = match OutboundMessage::Ping.to_text() {
        Ok(ping) => ping,
        Err(err) => {
            warn!("keepalive disabled: {err:#}");
            return;
        }
    };
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.changed() => return,
            _ = interval.tick() => {
                if outbound.send(Message::Text(ping.clone())).await.is_err() {
                    debug!("keepalive stopped: editor writer closed");
                    return;
                }
            }
        }
    }
}

pub(crate) fn close_frame(code: u16, reason: &'static str) -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::from(code),
        reason: reason.into(),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{client_async, connect_async, MaybeTlsStream, WebSocketStream};

    use super::{EditorBridge, InvokeError, DUPLICATE_PEER_CLOSE_CODE};
    use crate::config::BridgeConfig;

    type PeerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn test_config(request_timeout_ms: u64) -> BridgeConfig {
        BridgeConfig {
            bind: "127.0.0.1".to_owned(),
            port: 0,
            request_timeout_ms,
            ping_interval_ms: 30_000,
            max_frame_bytes: 10 * 1024 * 1024,
        }
    }

    async fn started(config: BridgeConfig) -> Result<(EditorBridge, String)> {
        let bridge = EditorBridge::new(config);
        let addr = bridge.start().await?;
        Ok((bridge, format!("ws://{addr}")))
    }

    async fn wait_for<F, Fut>(mut check: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        anyhow::bail!("condition not reached in time")
    }

    async fn connect_peer(bridge: &EditorBridge, url: &str) -> Result<PeerSocket> {
        let (ws, _) = connect_async(url).await?;
        wait_for(|| async { bridge.is_connected().await }).await?;
        Ok(ws)
    }

    async fn wait_pending(bridge: &EditorBridge, count: usize) -> Result<()> {
        wait_for(|| async { bridge.status().await.pending_requests == count }).await
    }

    async fn next_json(ws: &mut PeerSocket) -> Result<Value> {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(3), ws.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("peer stream ended"))??;
            match message {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(frame) => anyhow::bail!("peer closed: {frame:?}"),
                _ => continue,
            }
        }
    }

    async fn next_invoke(ws: &mut PeerSocket) -> Result<Value> {
        loop {
            let frame = next_json(ws).await?;
            if frame.get("type").and_then(Value::as_str) == Some("tool_invoke") {
                return Ok(frame);
            }
        }
    }

    async fn reply(ws: &mut PeerSocket, frame: Value) -> Result<()> {
        ws.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    #[tokio::test]
    async fn invoke_without_peer_fails_immediately() {
        let bridge = EditorBridge::new(test_config(30_000));
        let outcome = tokio::time::timeout(
            Duration::from_millis(200),
            bridge.invoke("read_file", json!({"path": "res://a.gd"})),
        )
        .await
        .expect("must not wait for the request timeout");
        assert_eq!(outcome, Err(InvokeError::NotConnected));
        assert_eq!(bridge.status().await.pending_requests, 0);
    }

    #[tokio::test]
    async fn live_result_resolves_matching_call() -> Result<()> {
        let (bridge, url) = started(test_config(5_000)).await?;
        let mut peer = connect_peer(&bridge, &url).await?;

        let caller = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.invoke("X", json!({"a": 1})).await })
        };
        let invoke = next_invoke(&mut peer).await?;
        assert_eq!(invoke.get("tool").and_then(Value::as_str), Some("X"));
        assert_eq!(invoke.get("args"), Some(&json!({"a": 1})));
        let id = invoke.get("id").cloned().unwrap_or(Value::Null);
        reply(
            &mut peer,
            json!({"type": "tool_result", "id": id, "success": true, "result": {"b": 2}}),
        )
        .await?;

        assert_eq!(caller.await?, Ok(json!({"b": 2})));
        assert_eq!(bridge.status().await.pending_requests, 0);
        bridge.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn remote_failure_carries_peer_message_or_generic_text() -> Result<()> {
        let (bridge, url) = started(test_config(5_000)).await?;
        let mut peer = connect_peer(&bridge, &url).await?;

        for (error, expected) in [
            (json!("scene not found"), "scene not found"),
            (Value::Null, "Tool execution failed"),
        ] {
            let caller = {
                let bridge = bridge.clone();
                tokio::spawn(async move { bridge.invoke("read_scene", json!({})).await })
            };
            let invoke = next_invoke(&mut peer).await?;
            reply(
                &mut peer,
                json!({"type": "tool_result", "id": invoke["id"], "success": false, "error": error}),
            )
            .await?;
            assert_eq!(caller.await?, Err(InvokeError::Remote(expected.to_owned())));
        }
        bridge.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_calls_each_get_their_own_result() -> Result<()> {
        let (bridge, url) = started(test_config(5_000)).await?;
        let mut peer = connect_peer(&bridge, &url).await?;

        let callers = (0..16)
            .map(|n| {
                let bridge = bridge.clone();
                tokio::spawn(async move { (n, bridge.invoke("echo", json!({"n": n})).await) })
            })
            .collect::<Vec<_>>();

        let mut frames = Vec::new();
        for _ in 0..16 {
            frames.push(next_invoke(&mut peer).await?);
        }
        // answer in reverse arrival order
        for frame in frames.into_iter().rev() {
            reply(
                &mut peer,
                json!({"type": "tool_result", "id": frame["id"], "success": true, "result": frame["args"]}),
            )
            .await?;
        }

        for caller in callers {
            let (n, outcome) = caller.await?;
            assert_eq!(outcome, Ok(json!({"n": n})));
        }
        assert_eq!(bridge.status().await.pending_requests, 0);
        bridge.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn timeout_removes_pending_call_and_late_result_is_discarded() -> Result<()> {
        let (bridge, url) = started(test_config(150)).await?;
        let mut peer = connect_peer(&bridge, &url).await?;

        let caller = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.invoke("X", json!({})).await })
        };
        let stale = next_invoke(&mut peer).await?;
        assert_eq!(
            caller.await?,
            Err(InvokeError::Timeout {
                tool: "X".to_owned(),
                timeout: Duration::from_millis(150),
            })
        );
        assert_eq!(bridge.status().await.pending_requests, 0);

        let caller = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.invoke("Y", json!({})).await })
        };
        let fresh = next_invoke(&mut peer).await?;
        reply(
            &mut peer,
            json!({"type": "tool_result", "id": stale["id"], "success": true, "result": "stale"}),
        )
        .await?;
        reply(
            &mut peer,
            json!({"type": "tool_result", "id": fresh["id"], "success": true, "result": "fresh"}),
        )
        .await?;
        assert_eq!(caller.await?, Ok(json!("fresh")));
        bridge.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_peer_is_rejected_without_touching_pending_calls() -> Result<()> {
        let (bridge, url) = started(test_config(5_000)).await?;
        let mut first = connect_peer(&bridge, &url).await?;

        let caller = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.invoke("X", json!({})).await })
        };
        let invoke = next_invoke(&mut first).await?;

        let (mut second, _) = connect_async(url.as_str()).await?;
        let rejection = tokio::time::timeout(Duration::from_secs(3), second.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing close frame"))??;
        match rejection {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), DUPLICATE_PEER_CLOSE_CODE);
            }
            other => panic!("expected close frame, got {other:?}"),
        }

        let status = bridge.status().await;
        assert!(status.connected);
        assert_eq!(status.pending_requests, 1);

        reply(
            &mut first,
            json!({"type": "tool_result", "id": invoke["id"], "success": true, "result": {"ok": true}}),
        )
        .await?;
        assert_eq!(caller.await?, Ok(json!({"ok": true})));
        bridge.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_drains_every_pending_call() -> Result<()> {
        let (bridge, url) = started(test_config(30_000)).await?;
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let events = events.clone();
            bridge
                .on_connection_change(move |event| {
                    events.lock().expect("events").push(event.connected);
                })
                .await;
        }
        let mut peer = connect_peer(&bridge, &url).await?;

        let callers = (0..3)
            .map(|_| {
                let bridge = bridge.clone();
                tokio::spawn(async move { bridge.invoke("scene_tree_dump", json!({})).await })
            })
            .collect::<Vec<_>>();
        wait_pending(&bridge, 3).await?;

        peer.close(None).await?;
        for caller in callers {
            assert_eq!(caller.await?, Err(InvokeError::Disconnected));
        }
        wait_for(|| async { !bridge.is_connected().await }).await?;
        assert_eq!(bridge.status().await.pending_requests, 0);
        assert_eq!(*events.lock().expect("events"), vec![true, false]);

        // a fresh editor can attach after the old one left
        let _again = connect_peer(&bridge, &url).await?;
        bridge.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn stop_drains_with_shutdown_and_is_idempotent() -> Result<()> {
        let (bridge, url) = started(test_config(30_000)).await?;
        let mut peer = connect_peer(&bridge, &url).await?;

        let caller = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.invoke("get_errors", json!({})).await })
        };
        wait_pending(&bridge, 1).await?;

        bridge.stop().await;
        assert_eq!(caller.await?, Err(InvokeError::ShuttingDown));
        bridge.stop().await;

        let status = bridge.status().await;
        assert!(!status.connected);
        assert_eq!(status.pending_requests, 0);

        loop {
            let message = tokio::time::timeout(Duration::from_secs(3), peer.next()).await?;
            match message {
                Some(Ok(Message::Close(Some(frame)))) => {
                    assert_eq!(u16::from(frame.code), 1001);
                    break;
                }
                Some(Ok(_)) => continue,
                _ => break,
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn handshake_finishing_after_stop_is_not_attached() -> Result<()> {
        let bridge = EditorBridge::new(test_config(500));
        let addr = bridge.start().await?;
        let url = format!("ws://{addr}");

        let stream = TcpStream::connect(addr).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        bridge.stop().await;

        let handshake =
            tokio::time::timeout(Duration::from_secs(3), client_async(url.as_str(), stream))
                .await?;
        if let Ok((mut ws, _)) = handshake {
            match tokio::time::timeout(Duration::from_secs(3), ws.next()).await? {
                Some(Ok(Message::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), 1001),
                Some(Ok(Message::Close(None))) | Some(Err(_)) | None => {}
                Some(Ok(other)) => panic!("unexpected frame after stop: {other:?}"),
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!bridge.is_connected().await);
        assert_eq!(
            bridge.invoke("get_errors", json!({})).await,
            Err(InvokeError::NotConnected)
        );
        assert_eq!(bridge.status().await.pending_requests, 0);
        Ok(())
    }

    #[tokio::test]
    async fn ready_frame_sets_project_and_bad_frames_do_not_end_the_loop() -> Result<()> {
        let (bridge, url) = started(test_config(5_000)).await?;
        let mut peer = connect_peer(&bridge, &url).await?;

        peer.send(Message::Text("{not json".to_owned())).await?;
        reply(&mut peer, json!({"type": "mystery", "x": 1})).await?;
        reply(&mut peer, json!({"type": "pong"})).await?;
        reply(&mut peer, json!({"type": "godot_ready", "project_path": "/games/demo"})).await?;
        wait_for(|| async {
            bridge.status().await.project_path.as_deref() == Some("/games/demo")
        })
        .await?;

        let caller = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.invoke("list_dir", json!({"root": "res://"})).await })
        };
        let invoke = next_invoke(&mut peer).await?;
        reply(
            &mut peer,
            json!({"type": "tool_result", "id": invoke["id"], "success": true, "result": {"files": []}}),
        )
        .await?;
        assert_eq!(caller.await?, Ok(json!({"files": []})));

        let status = bridge.status().await;
        assert!(status.connected);
        assert!(status.connected_at.is_some());
        bridge.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn keepalive_pings_the_editor() -> Result<()> {
        let mut config = test_config(5_000);
        config.ping_interval_ms = 50;
        let (bridge, url) = started(config).await?;
        let mut peer = connect_peer(&bridge, &url).await?;

        assert_eq!(next_json(&mut peer).await?, json!({"type": "ping"}));
        bridge.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn oversized_frame_drops_the_editor() -> Result<()> {
        let mut config = test_config(30_000);
        config.max_frame_bytes = 1024;
        let (bridge, url) = started(config).await?;
        let mut peer = connect_peer(&bridge, &url).await?;

        let caller = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.invoke("read_file", json!({})).await })
        };
        wait_pending(&bridge, 1).await?;

        let _ = peer.send(Message::Text("x".repeat(8 * 1024))).await;
        assert_eq!(caller.await?, Err(InvokeError::Disconnected));
        wait_for(|| async { !bridge.is_connected().await }).await?;
        bridge.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn panicking_observer_does_not_block_the_rest() -> Result<()> {
        let (bridge, url) = started(test_config(5_000)).await?;
        let delivered = Arc::new(AtomicUsize::new(0));
        bridge
            .on_connection_change(|_| panic!("observer failure"))
            .await;
        {
            let delivered = delivered.clone();
            bridge
                .on_connection_change(move |_| {
                    delivered.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }

        let _peer = connect_peer(&bridge, &url).await?;
        wait_for(|| async { delivered.load(Ordering::SeqCst) == 1 }).await?;
        bridge.stop().await;
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        Ok(())
    }
}
