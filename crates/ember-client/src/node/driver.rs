//! Background task behind a [`NodeConnection`](super::NodeConnection).
//!
//! One task per connection owns the socket. It opens the socket, pumps
//! outbound frames from the shared write channel, feeds inbound frames to
//! [`process_frame`], and decides after every closure whether to stop or
//! to wait out the reconnect interval and try again:
//!
//! | Closure                       | Next state     | Signal                     |
//! |-------------------------------|----------------|----------------------------|
//! | close frame with code 1000    | `Disconnected` | `Disconnect`               |
//! | any other close / stream end  | `Reconnecting` | `Reconnecting` after delay |
//! | connection refused            | `Reconnecting` | `Reconnecting` after delay |
//! | other open failure            | `Reconnecting` | `Error`, then as above     |
//! | local close                   | `Disconnected` | none                       |

use std::sync::Arc;

use ember_core::EmberError;
use ember_core::protocol::{message_op, op};
use ember_core::stats::NodeStats;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::connection::NodeShared;
use super::{NORMAL_CLOSURE, NodeEvent, NodeOptions, NodeState};

type NodeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code used when the socket ended without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code used for a close frame without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// How one socket lifetime ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Closed { code: u16, reason: String },
    Cancelled,
}

enum OpenFailure {
    Refused,
    Failed(EmberError),
}

/// Connect, read, and reconnect until closed normally or cancelled.
#[instrument(skip_all, fields(host = %shared.host))]
pub(crate) async fn run_connection(
    shared: Arc<NodeShared>,
    options: NodeOptions,
    cancel: CancellationToken,
) {
    loop {
        if !shared.set_state(NodeState::Connecting) {
            debug!("node connection closed locally");
            return;
        }

        let end = match open(&options, &cancel).await {
            Ok(Some(socket)) => run_socket(&shared, socket, &cancel).await,
            Ok(None) => SessionEnd::Cancelled,
            Err(OpenFailure::Refused) => {
                debug!("node refused connection");
                SessionEnd::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason: "connection refused".into(),
                }
            }
            Err(OpenFailure::Failed(err)) => {
                warn!(error = %err, "failed to open node connection");
                let reason = err.to_string();
                shared.emit(NodeEvent::Error(err));
                SessionEnd::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason,
                }
            }
        };

        match end {
            SessionEnd::Cancelled => {
                shared.detach(NodeState::Disconnected);
                debug!("node connection closed locally");
                return;
            }
            SessionEnd::Closed { code, reason } if code == NORMAL_CLOSURE => {
                shared.detach(NodeState::Disconnected);
                info!(code, %reason, "node closed connection");
                shared.emit(NodeEvent::Disconnect { code, reason });
                return;
            }
            SessionEnd::Closed { code, reason } => {
                shared.detach(NodeState::Reconnecting);
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = options.reconnect_interval.as_millis() as u64;
                warn!(code, %reason, delay_ms, "node connection lost, reconnecting");

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        shared.detach(NodeState::Disconnected);
                        debug!("reconnect cancelled");
                        return;
                    }
                    () = tokio::time::sleep(options.reconnect_interval) => {}
                }
                shared.emit(NodeEvent::Reconnecting);
            }
        }
    }
}

/// Perform the handshake. `Ok(None)` means cancelled while connecting.
async fn open(
    options: &NodeOptions,
    cancel: &CancellationToken,
) -> Result<Option<NodeSocket>, OpenFailure> {
    let request = options.client_request().map_err(OpenFailure::Failed)?;
    debug!(url = %options.url(), "opening node connection");

    tokio::select! {
        biased;
        () = cancel.cancelled() => Ok(None),
        result = connect_async(request) => match result {
            Ok((socket, _response)) => Ok(Some(socket)),
            Err(err) if is_connection_refused(&err) => Err(OpenFailure::Refused),
            Err(err) => Err(OpenFailure::Failed(EmberError::socket(&options.host, err))),
        },
    }
}

fn is_connection_refused(err: &tungstenite::Error) -> bool {
    matches!(err, tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused)
}

/// Pump one open socket until it closes or the connection is cancelled.
async fn run_socket(shared: &NodeShared, socket: NodeSocket, cancel: &CancellationToken) -> SessionEnd {
    let (mut write, mut read) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    if !shared.attach(tx) {
        let _ = write.send(Message::Close(Some(client_close()))).await;
        return SessionEnd::Cancelled;
    }
    info!("node connection ready");
    shared.emit(NodeEvent::Ready);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                shared.detach(NodeState::Disconnected);
                let _ = write.send(Message::Close(Some(client_close()))).await;
                return SessionEnd::Cancelled;
            }
            Some(message) = rx.recv() => {
                // A failed write surfaces as a read error on the next poll
                if let Err(err) = write.send(message).await {
                    debug!(error = %err, "node write failed");
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => process_frame(shared, text.as_str()),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => process_frame(shared, text),
                    Err(_) => debug!(len = data.len(), "ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => return close_end(frame),
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(error = %err, "node socket error");
                    return SessionEnd::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: err.to_string(),
                    };
                }
                None => {
                    return SessionEnd::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".into(),
                    };
                }
            },
        }
    }
}

fn client_close() -> CloseFrame {
    CloseFrame {
        code: CloseCode::Normal,
        reason: "client closed".into(),
    }
}

fn close_end(frame: Option<CloseFrame>) -> SessionEnd {
    match frame {
        Some(frame) => SessionEnd::Closed {
            code: u16::from(frame.code),
            reason: frame.reason.as_str().to_owned(),
        },
        None => SessionEnd::Closed {
            code: NO_STATUS_RECEIVED,
            reason: String::new(),
        },
    }
}

/// Decode one inbound frame.
///
/// `stats` payloads replace the stored snapshot; every other payload is
/// raised as a message signal. Undecodable frames raise an error signal
/// and are otherwise ignored.
pub(crate) fn process_frame(shared: &NodeShared, text: &str) {
    trace!(len = text.len(), "node frame received");

    let payload: Value = match serde_json::from_str(text) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "malformed node frame");
            shared.emit(NodeEvent::Error(EmberError::Parse(err)));
            return;
        }
    };

    if message_op(&payload) == Some(op::STATS) {
        match NodeStats::deserialize(&payload) {
            Ok(stats) => shared.replace_stats(stats),
            Err(err) => {
                warn!(error = %err, "malformed stats payload");
                shared.emit(NodeEvent::Error(EmberError::Parse(err)));
            }
        }
        return;
    }

    shared.emit(NodeEvent::Message(payload));
}
