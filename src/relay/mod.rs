//! Browser-facing visualization relay.
//!
//! One listener serves the generated page, its assets and a WebSocket on the
//! same port. Commands arriving over that socket are forwarded to the editor
//! under the `visualizer._internal_` namespace and answered with the request
//! id echoed back.

mod browser;
mod page;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::bridge::{close_frame, EditorBridge};
use crate::config::RelayConfig;
use crate::protocol::{relay_failure, relay_success, RelayCommand};

pub const INTERNAL_COMMAND_PREFIX: &str = "visualizer._internal_";

const HTTP_READ_CHUNK_BYTES: usize = 4 * 1024;
const HTTP_MAX_HEADER_BYTES: usize = 16 * 1024;
const HTTP_READ_TIMEOUT: Duration = Duration::from_secs(10);
const BROWSER_QUEUE_CAPACITY: usize = 32;
const WRITER_DRAIN: Duration = Duration::from_secs(2);

struct ActiveRelay {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ActiveRelay {
    async fn close(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
        info!("visualization relay on {} stopped", self.addr);
    }
}

struct RelayInner {
    bridge: EditorBridge,
    config: RelayConfig,
    active: Mutex<Option<ActiveRelay>>,
}

#[derive(Clone)]
pub struct VisualizationRelay {
    inner: Arc<RelayInner>,
}

impl VisualizationRelay {
    pub fn new(bridge: EditorBridge, config: RelayConfig) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                bridge,
                config,
                active: Mutex::new(None),
            }),
        }
    }

    /// Replaces any running relay with one serving `data` and returns its URL.
    pub async fn serve(&self, data: &Value) -> Result<String> {
        let page: Arc<str> = page::render(data)?.into();
        let mut active = self.inner.active.lock().await;
        if let Some(previous) = active.take() {
            previous.close().await;
        }

        let listener = bind_first_free(&self.inner.config).await?;
        let addr = listener
            .local_addr()
            .context("failed reading relay address")?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            self.inner.bridge.clone(),
            page,
            shutdown_rx,
        ));
        *active = Some(ActiveRelay {
            addr,
            shutdown,
            task,
        });
        drop(active);

        let url = format!("http://{}:{}", self.inner.config.public_host, addr.port());
        info!("visualization relay serving at {url}");
        if self.inner.config.open_browser {
            if let Err(err) = browser::open(&url) {
                warn!("could not open browser: {err:#}");
            }
        }
        Ok(url)
    }

    pub async fn stop(&self) {
        let active = self.inner.active.lock().await.take();
        if let Some(active) = active {
            active.close().await;
        }
    }
}

async fn bind_first_free(config: &RelayConfig) -> Result<TcpListener> {
    let bind = config.bind.as_str();
    if config.start_port == 0 {
        return TcpListener::bind((bind, 0))
            .await
            .with_context(|| format!("failed binding relay listener on {bind}"));
    }
    let last = config
        .start_port
        .saturating_add(config.port_span.saturating_sub(1));
    for port in config.start_port..=last {
        match TcpListener::bind((bind, port)).await {
            Ok(listener) => return Ok(listener),
            Err(err) => debug!("relay port {port} unavailable: {err}"),
        }
    }
    anyhow::bail!(
        "no available relay port in {}..={last}",
        config.start_port
    )
}

async fn accept_loop(
    listener: TcpListener,
    bridge: EditorBridge,
    page: Arc<str>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, remote_addr)) => {
                let bridge = bridge.clone();
                let page = page.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, bridge, page, shutdown).await {
                        debug!("relay connection {remote_addr} failed: {err:#}");
                    }
                });
            }
            Err(err) => warn!("relay accept failed: {err}"),
        }
    }
}

#[derive(Debug)]
struct RelayHttpRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
}

impl RelayHttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
    }

    /// `Connection` must list `upgrade` and the version must be 13.
    fn upgrade_headers_valid(&self) -> bool {
        let connection_upgrade = self.header("connection").is_some_and(|value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
        let version_13 = self
            .header("sec-websocket-version")
            .is_some_and(|value| value.trim() == "13");
        connection_upgrade && version_13
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    bridge: EditorBridge,
    page: Arc<str>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let request = match timeout(HTTP_READ_TIMEOUT, read_http_request(&mut stream)).await {
        Ok(request) => request?,
        Err(_) => anyhow::bail!("timed out reading relay request"),
    };
    let Some(request) = request else {
        return Ok(());
    };

    if request.is_websocket_upgrade() {
        if request.method != "GET" || !request.upgrade_headers_valid() {
            return write_http_response(&mut stream, 400, "text/plain", b"bad websocket handshake")
                .await;
        }
        let Some(key) = request.header("sec-websocket-key") else {
            return write_http_response(&mut stream, 400, "text/plain", b"missing websocket key")
                .await;
        };
        let head = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            derive_accept_key(key.as_bytes())
        );
        stream
            .write_all(head.as_bytes())
            .await
            .context("failed writing relay upgrade response")?;
        let ws = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
        browser_session(ws, bridge, shutdown).await;
        return Ok(());
    }

    if request.method != "GET" {
        return write_http_response(&mut stream, 405, "text/plain", b"method not allowed").await;
    }
    match request.path.as_str() {
        "/" | "/index.html" => {
            write_http_response(&mut stream, 200, "text/html; charset=utf-8", page.as_bytes())
                .await
        }
        "/relay.js" => {
            write_http_response(
                &mut stream,
                200,
                "text/javascript; charset=utf-8",
                page::RELAY_JS.as_bytes(),
            )
            .await
        }
        "/relay.css" => {
            write_http_response(
                &mut stream,
                200,
                "text/css; charset=utf-8",
                page::RELAY_CSS.as_bytes(),
            )
            .await
        }
        _ => write_http_response(&mut stream, 404, "text/plain", b"not found").await,
    }
}

async fn browser_session(
    ws: WebSocketStream<TcpStream>,
    bridge: EditorBridge,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut write, mut read) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(BROWSER_QUEUE_CAPACITY);
    let mut writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if write.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = write.close().await;
    });
    info!("browser connected to visualization relay");

    loop {
        let inbound = tokio::select! {
            _ = shutdown.changed() => {
                let _ = out_tx
                    .send(Message::Close(Some(close_frame(1001, "relay stopped"))))
                    .await;
                break;
            }
            inbound = read.next() => inbound,
        };
        let Some(Ok(inbound)) = inbound else {
            break;
        };
        match inbound {
            Message::Text(text) => {
                let command = match serde_json::from_str::<RelayCommand>(&text) {
                    Ok(command) => command,
                    Err(_) => {
                        let reply = json!({"ok": false, "error": "invalid JSON"});
                        let _ = out_tx.send(Message::Text(reply.to_string())).await;
                        continue;
                    }
                };
                let bridge = bridge.clone();
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    let reply = run_command(&bridge, command).await;
                    let _ = out_tx.send(Message::Text(reply.to_string())).await;
                });
            }
            Message::Ping(payload) => {
                let _ = out_tx.try_send(Message::Pong(payload));
            }
            Message::Close(_) => break,
            Message::Binary(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    drop(out_tx);
    if timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
    info!("browser disconnected from visualization relay");
}

async fn run_command(bridge: &EditorBridge, command: RelayCommand) -> Value {
    let tool = format!("{INTERNAL_COMMAND_PREFIX}{}", command.command);
    info!("relay command {}", command.command);
    match bridge.invoke(&tool, command.args_object()).await {
        Ok(result) => relay_success(command.id, result),
        Err(err) => relay_failure(command.id, err.to_string()),
    }
}

fn find_http_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .or_else(|| buf.windows(2).position(|window| window == b"\n\n"))
}

async fn read_http_request(stream: &mut TcpStream) -> Result<Option<RelayHttpRequest>> {
    let mut buffer = Vec::with_capacity(HTTP_READ_CHUNK_BYTES);
    let mut chunk = vec![0_u8; HTTP_READ_CHUNK_BYTES];
    let header_end = loop {
        let read = stream
            .read(&mut chunk)
            .await
            .context("failed reading relay request bytes")?;
        if read == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            anyhow::bail!("relay request ended before headers");
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(end) = find_http_header_terminator(&buffer) {
            break end;
        }
        if buffer.len() > HTTP_MAX_HEADER_BYTES {
            anyhow::bail!("relay request headers exceed max size");
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]);
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut segments = request_line.split_whitespace();
    let method = segments.next().unwrap_or_default().to_ascii_uppercase();
    if method.is_empty() {
        anyhow::bail!("invalid relay request line");
    }
    let path_raw = segments.next().unwrap_or("/");
    let path = path_raw.split('?').next().unwrap_or(path_raw).to_owned();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
        .collect();
    Ok(Some(RelayHttpRequest {
        method,
        path,
        headers,
    }))
}

async fn write_http_response(
    stream: &mut TcpStream,
    status_code: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_text = match status_code {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "OK",
    };
    let head = format!(
        "HTTP/1.1 {status_code} {status_text}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\nCache-Control: no-cache\r\n\r\n",
        body.len()
    );
    stream
        .write_all(head.as_bytes())
        .await
        .context("failed writing relay response headers")?;
    stream
        .write_all(body)
        .await
        .context("failed writing relay response body")?;
    let _ = stream.shutdown().await;
    Ok(())
}
