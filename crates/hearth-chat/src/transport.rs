//! Chat socket transport.
//!
//! Owns the websocket connection and its lifecycle:
//!
//! ```text
//! Disconnected ──start()──> Connecting ──connection ack──> Connected
//!      ^                        │                              │
//!      └────────stop() / connection loss───────────────────────┘
//! ```
//!
//! The reader loop hands every received line to a [`FrameHandler`] and never
//! waits on user code. Outbound frames go through an unbounded queue drained
//! by a writer task, so sends never drop frames and never block the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use futures_util::{SinkExt, StreamExt};
use hearth_api::{ApiClient, Service};
use reqwest::Url;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};

use crate::error::ChatError;
use crate::frame::Frame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Interval between websocket-level keepalive pings.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// How long to wait for the pong answering a keepalive ping.
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Silence on the socket longer than this is a connection loss.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Socket open, waiting for the connection ack.
    Connecting,
    Connected,
}

/// Transport tuning.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub keepalive_interval: Duration,
    pub pong_timeout: Duration,
    pub read_timeout: Duration,
    /// Reconnect with exponential backoff after a connection loss.
    pub reconnect: bool,
    /// Extra query parameters for the socket URL (client name, app id, ...).
    pub client_params: Vec<(String, String)>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            reconnect: false,
            client_params: Vec::new(),
        }
    }
}

impl TransportConfig {
    pub fn with_keepalive(mut self, interval: Duration, pong_timeout: Duration) -> Self {
        self.keepalive_interval = interval;
        self.pong_timeout = pong_timeout;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_client_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.client_params.push((key.into(), value.into()));
        self
    }
}

/// Receives everything the socket delivers.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// One raw frame (a single line, without its newline).
    async fn handle_line(&self, line: &str);

    /// The connection is gone, either by `stop()` or by loss.
    ///
    /// After `stop()` this is awaited before `stop()` returns. After a loss it
    /// runs on its own task, so it may call `stop()` itself.
    async fn disconnected(&self);
}

struct Connection {
    shutdown: watch::Sender<bool>,
    /// Resolves to whether the handler already heard about the last loss.
    task: JoinHandle<bool>,
    handler: Arc<dyn FrameHandler>,
}

struct Inner {
    api: ApiClient,
    user_id: String,
    access_token: String,
    config: TransportConfig,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    request_id: AtomicU64,
    connection: tokio::sync::Mutex<Option<Connection>>,
}

/// Handle to the chat socket. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("user_id", &self.inner.user_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(
        api: ApiClient,
        user_id: impl Into<String>,
        access_token: impl Into<String>,
        config: TransportConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                api,
                user_id: user_id.into(),
                access_token: access_token.into(),
                config,
                state,
                outbound: Mutex::new(None),
                request_id: AtomicU64::new(0),
                connection: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    /// Identity this transport connects as.
    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the connection ack arrives. Returns `false` on timeout.
    pub async fn wait_connected(&self, wait: Duration) -> bool {
        let mut rx = self.subscribe();
        matches!(
            timeout(wait, rx.wait_for(|s| *s == ConnectionState::Connected)).await,
            Ok(Ok(_))
        )
    }

    /// Unique id for tagging outbound frames.
    pub fn next_request_id(&self) -> u64 {
        self.inner.request_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Open the socket and start the connection task.
    ///
    /// Returns once the websocket handshake has succeeded; the state stays
    /// `Connecting` until the server acknowledges the login.
    pub async fn start(&self, handler: Arc<dyn FrameHandler>) -> Result<(), ChatError> {
        let mut slot = self.inner.connection.lock().await;

        if slot.as_ref().is_some_and(|c| !c.task.is_finished()) {
            return Err(ChatError::InvalidState {
                expected: "disconnected",
                actual: self.state(),
            });
        }
        let entered = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !entered {
            return Err(ChatError::InvalidState {
                expected: "disconnected",
                actual: self.state(),
            });
        }
        // A previous connection that failed on its own is finished by now.
        *slot = None;

        let ws = match open_socket(&self.inner).await {
            Ok(ws) => ws,
            Err(e) => {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_connection(
            Arc::clone(&self.inner),
            ws,
            Arc::clone(&handler),
            shutdown_rx,
        ));

        *slot = Some(Connection {
            shutdown,
            task,
            handler,
        });
        Ok(())
    }

    /// Close the connection and notify the handler.
    ///
    /// Valid while connecting or connected, and also after the connection
    /// already failed on its own (the failure was reported then, so the
    /// handler is not notified twice).
    pub async fn stop(&self) -> Result<(), ChatError> {
        let mut slot = self.inner.connection.lock().await;
        let Some(connection) = slot.take() else {
            return Err(ChatError::InvalidState {
                expected: "connected or connecting",
                actual: self.state(),
            });
        };

        let _ = connection.shutdown.send(true);
        let reported = match connection.task.await {
            Ok(reported) => reported,
            Err(e) => {
                warn!(error = %e, "chat connection task panicked");
                false
            }
        };
        self.inner.state.send_replace(ConnectionState::Disconnected);
        // Released before user code runs: a Disconnect hook may call back in.
        drop(slot);

        if !reported {
            connection.handler.disconnected().await;
        }
        info!("chat transport stopped");
        Ok(())
    }

    /// Queue a frame. Only valid while connected.
    pub fn send(&self, frame: &Frame) -> Result<(), ChatError> {
        if self.state() != ConnectionState::Connected {
            return Err(ChatError::NotConnected);
        }
        self.enqueue(frame)
    }

    /// Queue a frame on the open socket regardless of login state.
    pub(crate) fn enqueue(&self, frame: &Frame) -> Result<(), ChatError> {
        let outbound = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let tx = outbound.as_ref().ok_or(ChatError::NotConnected)?;
        trace!(opcode = %frame.opcode, "queueing frame");
        tx.send(WsMessage::Text(frame.encode()))
            .map_err(|_| ChatError::NotConnected)
    }

    /// Enter `Connected` after the connection ack. No-op unless connecting.
    pub(crate) fn mark_connected(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        })
    }

    /// Install a local outbound queue in place of a socket.
    #[cfg(test)]
    pub(crate) fn loopback(&self, state: ConnectionState) -> mpsc::UnboundedReceiver<WsMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.set_outbound(Some(tx));
        self.inner.state.send_replace(state);
        rx
    }
}

impl Inner {
    fn set_outbound(&self, tx: Option<mpsc::UnboundedSender<WsMessage>>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = tx;
    }

    /// Ask the routing endpoint for the socket host and add identity params.
    async fn socket_url(&self) -> Result<Url, ChatError> {
        let routing_url = &self.api.endpoints().routing_url;
        let body = self.api.get(Service::Chat, routing_url).await?;

        let host = body
            .get("ws_server")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ChatError::Routing("response without ws_server".to_string()))?;
        let base = if host.contains("://") {
            host.to_string()
        } else {
            format!("wss://{}", host)
        };

        let mut url = Url::parse(&base)
            .map_err(|e| ChatError::Routing(format!("invalid ws_server {:?}: {}", host, e)))?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in &self.config.client_params {
                query.append_pair(key, value);
            }
            query.append_pair("user_id", &self.user_id);
            query.append_pair("access_token", &self.access_token);
        }
        Ok(url)
    }
}

async fn open_socket(inner: &Inner) -> Result<WsStream, ChatError> {
    let url = inner.socket_url().await?;
    info!(host = ?url.host_str(), user_id = %inner.user_id, "connecting to chat socket");

    let (ws, _) = connect_async(url.as_str()).await?;

    info!("chat socket connected");
    Ok(ws)
}

/// Connection task: drives one socket, and reconnects if configured to.
///
/// Returns `true` when it ends right after reporting a loss to the handler.
async fn run_connection(
    inner: Arc<Inner>,
    ws: WsStream,
    handler: Arc<dyn FrameHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> bool {
    let mut backoff = ExponentialBackoff {
        initial_interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(60),
        max_elapsed_time: None,
        ..Default::default()
    };
    let mut ws = Some(ws);

    loop {
        let stream = match ws.take() {
            Some(stream) => stream,
            None => {
                inner.state.send_replace(ConnectionState::Connecting);
                let attempt = tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown_rx) => return true,
                    attempt = open_socket(&inner) => attempt,
                };
                match attempt {
                    Ok(stream) => {
                        backoff.reset();
                        stream
                    }
                    Err(e) => {
                        error!(error = %e, "chat reconnect failed");
                        inner.state.send_replace(ConnectionState::Disconnected);
                        let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(60));
                        if wait_or_shutdown(&mut shutdown_rx, wait).await {
                            return true;
                        }
                        continue;
                    }
                }
            }
        };

        let result = drive(&inner, stream, handler.as_ref(), &mut shutdown_rx).await;
        inner.state.send_replace(ConnectionState::Disconnected);

        match result {
            Ok(()) => return false,
            Err(e) => {
                error!(error = %e, "chat connection lost");
                // Never awaited here: the handler may run user code that calls `stop()`,
                // which waits for this task.
                let notify = Arc::clone(&handler);
                tokio::spawn(async move { notify.disconnected().await });

                if !inner.config.reconnect {
                    return true;
                }
                let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(60));
                info!(wait_ms = wait.as_millis() as u64, "reconnecting to chat");
                if wait_or_shutdown(&mut shutdown_rx, wait).await {
                    return true;
                }
            }
        }
    }
}

/// Sleep for `wait`; `true` if shutdown was requested meanwhile.
async fn wait_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, wait: Duration) -> bool {
    tokio::select! {
        _ = shutdown_requested(shutdown_rx) => true,
        _ = tokio::time::sleep(wait) => false,
    }
}

/// Resolves once shutdown is signalled or its sender is gone.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// Read loop for one open socket. `Ok` means a requested shutdown.
async fn drive(
    inner: &Inner,
    ws: WsStream,
    handler: &dyn FrameHandler,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<(), ChatError> {
    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    inner.set_outbound(Some(tx.clone()));

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, WsMessage::Close(_));
            if let Err(e) = write.send(message).await {
                warn!(error = %e, "failed to write to chat socket");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = write.close().await;
    });

    let config = &inner.config;
    let mut keepalive = tokio::time::interval_at(
        Instant::now() + config.keepalive_interval,
        config.keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pong_deadline: Option<Instant> = None;

    let result = loop {
        let deadline = pong_deadline;
        let pong_wait = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("chat transport received shutdown signal");
                    let _ = tx.send(WsMessage::Close(None));
                    break Ok(());
                }
            }

            _ = pong_wait => {
                warn!(timeout_secs = config.pong_timeout.as_secs(), "no pong from chat server");
                break Err(ChatError::WebSocket("pong timeout".to_string()));
            }

            _ = keepalive.tick() => {
                if pong_deadline.is_none() {
                    trace!("sending keepalive ping");
                    let _ = tx.send(WsMessage::Ping(Vec::new()));
                    pong_deadline = Some(Instant::now() + config.pong_timeout);
                }
            }

            result = timeout(config.read_timeout, read.next()) => {
                match result {
                    Ok(Some(Ok(WsMessage::Text(text)))) => deliver(handler, &text).await,
                    Ok(Some(Ok(WsMessage::Binary(data)))) => match String::from_utf8(data) {
                        Ok(text) => deliver(handler, &text).await,
                        Err(_) => warn!("dropping non-UTF-8 binary frame"),
                    },
                    Ok(Some(Ok(WsMessage::Pong(_)))) => {
                        trace!("received pong");
                        pong_deadline = None;
                    }
                    Ok(Some(Ok(WsMessage::Ping(data)))) => {
                        trace!("received ping, sending pong");
                        let _ = tx.send(WsMessage::Pong(data));
                    }
                    Ok(Some(Ok(WsMessage::Close(_)))) => {
                        info!("chat connection closed by server");
                        break Err(ChatError::WebSocket("connection closed".to_string()));
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => break Err(e.into()),
                    Ok(None) => break Err(ChatError::WebSocket("stream ended".to_string())),
                    Err(_) => {
                        warn!("chat read timeout after {}s", config.read_timeout.as_secs());
                        break Err(ChatError::WebSocket("read timeout".to_string()));
                    }
                }
            }
        }
    };

    inner.set_outbound(None);
    drop(tx);
    if let Err(e) = writer.await {
        debug!(error = %e, "chat writer task ended abnormally");
    }
    result
}

/// Hand each line of a websocket message to the handler, in order.
async fn deliver(handler: &dyn FrameHandler, text: &str) {
    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            handler.handle_line(line).await;
        }
    }
}
