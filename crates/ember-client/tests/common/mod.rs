//! In-process mock audio node for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use ember_client::{NodeOptions, Router, RouterEvent};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Command pushed to every live mock socket.
#[derive(Clone, Debug)]
pub enum Control {
    Send(String),
    Close(u16, String),
}

#[derive(Clone)]
struct MockState {
    control: broadcast::Sender<Control>,
    received: mpsc::UnboundedSender<String>,
    connections: Arc<AtomicUsize>,
    headers: Arc<Mutex<Vec<HeaderMap>>>,
    client_closes: Arc<Mutex<Vec<u16>>>,
}

pub struct MockNode {
    pub addr: SocketAddr,
    state: MockState,
    received: mpsc::UnboundedReceiver<String>,
    _server: tokio::task::JoinHandle<()>,
}

impl MockNode {
    /// Serve on an ephemeral loopback port.
    pub async fn spawn() -> Self {
        let (control, _) = broadcast::channel(64);
        let (received_tx, received) = mpsc::unbounded_channel();
        let state = MockState {
            control,
            received: received_tx,
            connections: Arc::new(AtomicUsize::new(0)),
            headers: Arc::new(Mutex::new(Vec::new())),
            client_closes: Arc::new(Mutex::new(Vec::new())),
        };

        let app = axum::Router::new()
            .route("/", get(ws_handler))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            addr,
            state,
            received,
            _server: server,
        }
    }

    /// Options pointing at this node with a short reconnect interval.
    pub fn options(&self, host: &str) -> NodeOptions {
        NodeOptions::new(host, self.addr.to_string(), "youshallnotpass", "4242")
            .with_num_shards(2)
            .with_reconnect_interval(Duration::from_millis(100))
    }

    pub fn send(&self, payload: &Value) {
        let _ = self.state.control.send(Control::Send(payload.to_string()));
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.state.control.send(Control::Send(text.to_owned()));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.state.control.send(Control::Close(code, reason.to_owned()));
    }

    /// Handshakes accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Request headers of every handshake.
    pub fn headers(&self) -> Vec<HeaderMap> {
        self.state.headers.lock().clone()
    }

    /// Close codes sent by clients.
    pub fn client_closes(&self) -> Vec<u16> {
        self.state.client_closes.lock().clone()
    }

    /// Next text frame a client sent, as JSON.
    pub async fn next_frame(&mut self) -> Value {
        let text = timeout(TIMEOUT, self.received.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("mock node stopped");
        serde_json::from_str(&text).unwrap()
    }

    /// Whether any client frame is queued.
    pub fn has_frames(&mut self) -> bool {
        !self.received.is_empty()
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<MockState>,
) -> impl IntoResponse {
    state.headers.lock().push(headers);
    let _ = state.connections.fetch_add(1, Ordering::SeqCst);
    // Subscribe before the handshake completes so no control is missed
    let control = state.control.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, control, state))
}

async fn handle_socket(mut socket: WebSocket, mut control: broadcast::Receiver<Control>, state: MockState) {
    loop {
        tokio::select! {
            command = control.recv() => match command {
                Ok(Control::Send(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Ok(Control::Close(code, reason)) => {
                    let frame = CloseFrame { code, reason: reason.into() };
                    let _ = socket.send(Message::Close(Some(frame))).await;
                    return;
                }
                Err(_) => return,
            },
            frame = socket.recv() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = state.received.send(text.as_str().to_owned());
                }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        state.client_closes.lock().push(frame.code);
                    }
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            },
        }
    }
}

/// Next lifecycle event from the router, failing the test after [`TIMEOUT`].
pub async fn next_event(router: &mut Router) -> RouterEvent {
    timeout(TIMEOUT, router.next_event())
        .await
        .expect("timed out waiting for router event")
        .expect("router signal channel closed")
}

/// Drive the router for `duration`, collecting lifecycle events.
pub async fn pump(router: &mut Router, duration: Duration) -> Vec<RouterEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + duration;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, router.next_event()).await {
        events.push(event);
    }
    events
}

/// Poll `check` until it holds, failing the test after [`TIMEOUT`].
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}
