#![allow(dead_code)]

use fanout_common::{ClientFrame, ClientId, ServerFrame};
use fanoutd::config::ServerConfig;
use fanoutd::server::ServerState;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub const BROWSER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64)";

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        control_addr: "127.0.0.1:0".parse().unwrap(),
        allowed_agents: vec!["Mozilla".to_string()],
        deny_list: None,
        rate_limit: 10,
        rate_window: 60,
        rate_cleanup_interval: 300,
        stats_interval: 30,
        max_conns: 1000,
        max_payload: 100_000,
        send_buffer: 64,
        admit_timeout: 5,
        ping_interval: 30,
        idle_timeout: 120,
    }
}

type ClientStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestClient {
    pub ws_tx: futures_util::stream::SplitSink<ClientStream, Message>,
    pub ws_rx: futures_util::stream::SplitStream<ClientStream>,
    pub identity: ClientId,
}

/// Outcome of a link attempt that did not yield a welcomed client.
#[derive(Debug)]
pub enum Refused {
    /// Upgrade refused with an HTTP status.
    Http(StatusCode),
    /// Upgrade completed, then the server closed the link.
    Closed(Option<CloseFrame<'static>>),
}

pub async fn try_connect(
    addr: &SocketAddr,
    forwarded_for: &str,
    user_agent: &str,
) -> Result<TestClient, Refused> {
    let url = format!("ws://{addr}");
    let mut req = url.into_client_request().unwrap();
    req.headers_mut()
        .insert("X-Forwarded-For", forwarded_for.parse().unwrap());
    req.headers_mut()
        .insert("User-Agent", user_agent.parse().unwrap());

    let ws = match tokio_tungstenite::connect_async(req).await {
        Ok((ws, _)) => ws,
        Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => {
            return Err(Refused::Http(resp.status()));
        }
        Err(e) => panic!("unexpected connect error: {e}"),
    };
    let (ws_tx, mut ws_rx) = ws.split();

    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws_rx.next())
            .await
            .expect("timeout waiting for welcome");
        match msg {
            Some(Ok(Message::Text(text))) => {
                let frame = ServerFrame::parse(&text).unwrap();
                let ServerFrame::Welcome { identity, .. } = frame else {
                    panic!("expected welcome frame, got {frame:?}");
                };
                return Ok(TestClient {
                    ws_tx,
                    ws_rx,
                    identity,
                });
            }
            Some(Ok(Message::Close(frame))) => return Err(Refused::Closed(frame)),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            other => panic!("unexpected message before welcome: {other:?}"),
        }
    }
}

impl TestClient {
    pub async fn connect(addr: &SocketAddr, forwarded_for: &str) -> Self {
        match try_connect(addr, forwarded_for, BROWSER_AGENT).await {
            Ok(client) => client,
            Err(refused) => panic!("expected admission, got {refused:?}"),
        }
    }

    pub async fn send_frame(&mut self, frame: &ClientFrame) {
        self.ws_tx
            .send(Message::Text(frame.to_text().unwrap()))
            .await
            .unwrap();
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws_tx
            .send(Message::Text(text.to_string()))
            .await
            .unwrap();
    }

    pub async fn recv_frame(&mut self) -> ServerFrame {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for frame")
                .unwrap()
                .unwrap();
            match msg {
                Message::Text(text) => return ServerFrame::parse(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    pub async fn recv_frame_timeout(&mut self, timeout: Duration) -> Option<ServerFrame> {
        tokio::time::timeout(timeout, self.recv_frame()).await.ok()
    }

    /// Wait for the server to close the link, returning its close frame.
    pub async fn recv_close(&mut self) -> Option<CloseFrame<'static>> {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for close");
            match msg {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return None,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws_tx.send(Message::Close(None)).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(Ok(_)) = self.ws_rx.next().await {}
        })
        .await;
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    pub shutdown_tx: watch::Sender<()>,
    pub handle: tokio::task::JoinHandle<()>,
}

pub async fn start_server_with(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = test_config(addr);
    configure(&mut config);
    let state = Arc::new(ServerState::new(config));
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let state_clone = state.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = fanoutd::run_with_shutdown(listener, state_clone, shutdown_rx).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        addr,
        state,
        shutdown_tx,
        handle,
    }
}

pub async fn start_server() -> TestServer {
    start_server_with(|_| {}).await
}

/// Poll until the registry holds `expected` entries.
pub async fn wait_for_registry_len(state: &ServerState, expected: usize) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while state.registry.len() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "registry size stuck at {} (expected {expected})",
        state.registry.len()
    );
}

pub async fn start_control(state: Arc<ServerState>) -> (SocketAddr, watch::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(async move {
        if let Err(e) = fanoutd::control::serve(listener, state, None, shutdown_rx).await {
            eprintln!("control plane error in test: {e}");
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, shutdown_tx)
}
