use crate::address;
use crate::error::FanoutError;
use crate::metrics::{counters, gauges};
use crate::registry::{ClientRegistry, LinkHandle};
use crate::server::ServerState;
use fanout_common::types::close_reason;
use fanout_common::{ClientFrame, ClientId, ServerFrame};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsRecv = SplitStream<WebSocketStream<TcpStream>>;

/// Largest inbound WebSocket message accepted on a link.
const MAX_INBOUND_MESSAGE: usize = 16 * 1024 * 1024;

/// Characters of an execution result kept in log lines.
const RESULT_PREVIEW_CHARS: usize = 50;

/// Lifecycle of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Registered, welcome not yet sent.
    Admitted,
    /// Welcome sent; inbound frames are serviced.
    Active,
    /// Terminal; the entry has been removed.
    Closed,
}

/// Per-link message state machine.
///
/// Decides what, if anything, to send back for each inbound frame and
/// keeps the link's registry entry current. Transport I/O stays with the
/// caller.
#[derive(Debug)]
pub struct ProtocolHandler {
    identity: ClientId,
    state: LinkState,
}

impl ProtocolHandler {
    /// Handler for a freshly registered entry.
    #[must_use]
    pub const fn new(identity: ClientId) -> Self {
        Self {
            identity,
            state: LinkState::Admitted,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Produce the welcome frame and become active.
    pub fn welcome(&mut self) -> ServerFrame {
        self.state = LinkState::Active;
        ServerFrame::welcome(self.identity)
    }

    /// Handle one inbound text frame and return the reply, if any.
    ///
    /// Malformed frames are logged and dropped without changing state.
    pub fn on_text(&mut self, registry: &ClientRegistry, text: &str) -> Option<ServerFrame> {
        if self.state != LinkState::Active {
            return None;
        }
        match ClientFrame::parse(text) {
            Ok(frame) => self.on_frame(registry, frame),
            Err(e) => {
                counters::frames_malformed_total();
                debug!(client = %self.identity.short(), "discarding malformed frame: {}", e);
                None
            }
        }
    }

    /// Handle one inbound binary frame, decoded as UTF-8 JSON text.
    pub fn on_binary(&mut self, registry: &ClientRegistry, data: &[u8]) -> Option<ServerFrame> {
        if self.state != LinkState::Active {
            return None;
        }
        match ClientFrame::parse_bytes(data) {
            Ok(frame) => self.on_frame(registry, frame),
            Err(e) => {
                counters::frames_malformed_total();
                debug!(client = %self.identity.short(), "discarding malformed frame: {}", e);
                None
            }
        }
    }

    fn on_frame(&mut self, registry: &ClientRegistry, frame: ClientFrame) -> Option<ServerFrame> {
        registry.touch(&self.identity);
        let client = self.identity.short();

        match frame {
            ClientFrame::ExecutionResult {
                success: true,
                result,
                ..
            } => {
                counters::execution_results_total("success");
                let preview: String = result
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "none".to_string())
                    .chars()
                    .take(RESULT_PREVIEW_CHARS)
                    .collect();
                info!(client = %client, result = %preview, "execution succeeded");
                None
            }
            ClientFrame::ExecutionResult {
                success: false,
                error,
                ..
            } => {
                counters::execution_results_total("failure");
                warn!(
                    client = %client,
                    error = error.as_deref().unwrap_or("unknown"),
                    "execution failed"
                );
                None
            }
            ClientFrame::BulkData { data, timestamp } => {
                counters::frames_total("bulk_data");
                debug!(client = %client, timestamp = ?timestamp, bytes = data.len(), "bulk data received");
                registry.record_payload(&self.identity, data);
                None
            }
            ClientFrame::Ping { .. } => {
                counters::frames_total("ping");
                None
            }
            ClientFrame::Other { kind } => {
                counters::frames_total("other");
                debug!(client = %client, kind = %kind, "acknowledging frame");
                Some(ServerFrame::acknowledged())
            }
        }
    }

    /// The transport reported an orderly close.
    pub fn on_close(&mut self, registry: &ClientRegistry) {
        self.finish(registry);
    }

    /// The transport reported an error; terminal for this link only.
    pub fn on_error(&mut self, registry: &ClientRegistry, error: &FanoutError) {
        warn!(client = %self.identity.short(), "link error: {}", error);
        self.finish(registry);
    }

    fn finish(&mut self, registry: &ClientRegistry) {
        if self.state == LinkState::Closed {
            return;
        }
        self.state = LinkState::Closed;
        if let Some(entry) = registry.remove(&self.identity) {
            info!(client = %self.identity.short(), ip = %entry.address, "client disconnected");
        }
    }
}

/// Keeps the active-link count and registry in step with the task's life.
struct LinkGuard {
    state: Arc<ServerState>,
    identity: ClientId,
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        self.state.registry.remove(&self.identity);
        self.state.active_links.fetch_sub(1, Ordering::Relaxed);
        gauges::dec_links_active();
    }
}

fn close_message(code: CloseCode, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

async fn send_frame(ws_tx: &mut WsSink, frame: &ServerFrame) -> Result<(), FanoutError> {
    ws_tx.send(Message::Text(frame.to_text()?)).await?;
    Ok(())
}

/// Run the WebSocket upgrade with admission in the handshake callback.
///
/// Returns the stream together with the resolved address and User-Agent.
async fn accept_link(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: &Arc<ServerState>,
) -> Result<(WebSocketStream<TcpStream>, String, String), FanoutError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(MAX_INBOUND_MESSAGE),
        max_frame_size: Some(MAX_INBOUND_MESSAGE),
        ..WebSocketConfig::default()
    };

    let admitted = Arc::new(OnceLock::new());
    let admitted_cell = admitted.clone();
    let gate_state = Arc::clone(state);
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let address = address::resolve(req.headers(), Some(peer_addr));
        let user_agent = req
            .headers()
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        match gate_state.gate.admit(address.as_deref(), &user_agent) {
            Ok(()) => {
                if let Some(address) = address {
                    let _ = admitted_cell.set((address, user_agent));
                }
                Ok(resp)
            }
            Err(rejection) => {
                counters::admissions_total(rejection.code());
                info!(
                    ip = address.as_deref().unwrap_or("unknown"),
                    user_agent = %user_agent,
                    reason = rejection.code(),
                    "link attempt rejected"
                );
                let mut refusal = ErrorResponse::new(Some(rejection.code().to_string()));
                *refusal.status_mut() = rejection.status();
                Err(refusal)
            }
        }
    };

    let ws_stream = match timeout(
        Duration::from_secs(state.config.admit_timeout),
        tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config)),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            counters::admissions_total("timeout");
            return Err(FanoutError::HandshakeTimeout);
        }
    };

    let (address, user_agent) = admitted.get().cloned().ok_or(FanoutError::ConnectionClosed)?;
    Ok((ws_stream, address, user_agent))
}

/// Drive the frame loop of an active link until it closes or errors.
async fn run_message_loop(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    outbound_rx: &mut mpsc::Receiver<Message>,
    state: &ServerState,
    handler: &mut ProtocolHandler,
) -> Result<(), FanoutError> {
    let mut ping_interval = interval(Duration::from_secs(state.config.ping_interval));
    ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping_interval.tick().await;
    let idle_timeout = Duration::from_secs(state.config.idle_timeout);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                last_activity = Instant::now();
                let reply = match msg {
                    Some(Ok(Message::Text(text))) => handler.on_text(&state.registry, &text),
                    Some(Ok(Message::Binary(data))) => handler.on_binary(&state.registry, &data),
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            debug!("failed to send pong: {}", e);
                        }
                        None
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(FanoutError::WebSocket(e)),
                    Some(Ok(_)) => None,
                };
                if let Some(frame) = reply {
                    send_frame(ws_tx, &frame).await?;
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(msg) => ws_tx.send(msg).await?,
                    None => {
                        // Registry dropped our handle: the server is shutting down.
                        let _ = ws_tx.send(close_message(CloseCode::Away, close_reason::SHUTDOWN)).await;
                        return Ok(());
                    }
                }
            }
            _ = ping_interval.tick() => {
                if last_activity.elapsed() >= idle_timeout {
                    debug!(client = %handler.identity.short(), "idle timeout reached, closing link");
                    let _ = ws_tx.send(close_message(CloseCode::Normal, close_reason::IDLE)).await;
                    return Ok(());
                }
                if let Err(e) = ws_tx.send(Message::Ping(Vec::new())).await {
                    debug!("failed to send ping: {}", e);
                }
            }
        }
    }
}

/// Serve one TCP connection from handshake to close.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), FanoutError> {
    let (ws_stream, address, user_agent) = accept_link(stream, peer_addr, &state).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    if !state.health.is_ready() {
        let _ = ws_tx
            .send(close_message(CloseCode::Away, close_reason::SHUTDOWN))
            .await;
        return Err(FanoutError::ConnectionClosed);
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(state.config.send_buffer);
    let entry = match state
        .registry
        .try_add(&address, &user_agent, LinkHandle::new(outbound_tx))
    {
        Ok(entry) => entry,
        Err(FanoutError::ShuttingDown) => {
            let _ = ws_tx
                .send(close_message(CloseCode::Away, close_reason::SHUTDOWN))
                .await;
            return Err(FanoutError::ShuttingDown);
        }
        Err(e) => {
            counters::admissions_total("duplicate");
            info!(ip = %address, "address already connected, closing new link");
            let _ = ws_tx
                .send(close_message(CloseCode::Normal, close_reason::ADDRESS_IN_USE))
                .await;
            return Err(e);
        }
    };

    counters::admissions_total("admitted");
    state.active_links.fetch_add(1, Ordering::Relaxed);
    gauges::inc_links_active();
    let _guard = LinkGuard {
        state: Arc::clone(&state),
        identity: entry.identity,
    };
    info!(client = %entry.identity.short(), ip = %address, user_agent = %user_agent, "client connected");

    let mut handler = ProtocolHandler::new(entry.identity);
    let welcome = handler.welcome();
    if let Err(e) = send_frame(&mut ws_tx, &welcome).await {
        handler.on_error(&state.registry, &e);
        return Err(e);
    }

    let result = run_message_loop(
        &mut ws_tx,
        &mut ws_rx,
        &mut outbound_rx,
        &state,
        &mut handler,
    )
    .await;

    match &result {
        Ok(()) => handler.on_close(&state.registry),
        Err(e) => handler.on_error(&state.registry, e),
    }
    result
}
