//! WebSocket Transport
//!
//! Client transport for the reference deployment. Each opened connection is
//! served by one tokio task that owns the socket:
//!
//! ```text
//!   WebSocketHandle ──Outbound──▶ connection task ──▶ socket
//!                                      │
//!   StreamClient ◀──TransportEnvelope──┘◀── socket
//! ```
//!
//! The task reports `Opened` once the handshake completes, forwards text and
//! binary messages as frames, and turns every way a socket can end into
//! exactly one `Closed` or `Error` event:
//!
//! - server close frame → `Closed(code, reason)`
//! - close frame without a status → `Closed(1005)`
//! - stream ends without a close frame → `Closed(1006)`
//! - connect timeout, handshake or IO failure → `Error`
//! - client close → normal close frame sent, `Closed(1000)`
//!
//! TLS (`wss://`) needs one of tokio-tungstenite's TLS features; without one
//! the connect attempt is reported as a transport error.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use super::config::TransportConfig;
use super::frame::Frame;
use super::traits::{
    CloseInfo, ConnectionId, Connector, EventSink, TransportError, TransportEvent,
    TransportHandle, NORMAL_CLOSURE,
};

/// Close code reported when the peer sent a close frame without a status
const NO_STATUS_RECEIVED: u16 = 1005;

/// Reason attached to client-initiated closes
const CLIENT_CLOSE_REASON: &str = "closed by client";

/// Opens WebSocket connections
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn open(
        &self,
        config: &TransportConfig,
        sink: EventSink,
    ) -> Result<Box<dyn TransportHandle>, TransportError> {
        if config.host.trim().is_empty() {
            return Err(TransportError::InvalidEndpoint("empty host".to_string()));
        }

        let url = config.url();
        let request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidEndpoint(format!("{url}: {e}")))?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            TransportError::InvalidState("WebSocket transport needs a tokio runtime".to_string())
        })?;

        let connection = sink.connection_id();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let timeout = Duration::from_millis(config.connect_timeout_ms);

        tracing::info!(%connection, %url, "Opening WebSocket connection");
        runtime.spawn(run_connection(request, timeout, sink, outbound_rx));

        Ok(Box::new(WebSocketHandle {
            connection,
            outbound: outbound_tx,
            closed: false,
        }))
    }
}

/// Commands from the handle to the connection task
#[derive(Debug)]
enum Outbound {
    Frame(Frame),
    Close,
}

/// Client-side handle for one WebSocket connection
struct WebSocketHandle {
    connection: ConnectionId,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: bool,
}

impl TransportHandle for WebSocketHandle {
    fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportError::SendFailed("connection task has exited".to_string()))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // The task may already be gone; then there is nothing left to close.
        let _ = self.outbound.send(Outbound::Close);
    }
}

async fn run_connection(
    request: Request,
    timeout: Duration,
    sink: EventSink,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let connection = sink.connection_id();

    let connect = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request));
    let result = tokio::select! {
        result = connect => result,
        // Nothing is sent before Opened, so anything here means the handle
        // was closed or dropped while the handshake was still running.
        _ = outbound.recv() => {
            tracing::debug!(%connection, "Connect abandoned by client");
            sink.emit(TransportEvent::Closed(CloseInfo::new(
                NORMAL_CLOSURE,
                CLIENT_CLOSE_REASON,
            )))
            .await;
            return;
        }
    };

    let stream = match result {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            tracing::warn!(%connection, error = %e, "WebSocket connect failed");
            sink.emit(TransportEvent::Error(format!("could not connect: {e}")))
                .await;
            return;
        }
        Err(_) => {
            tracing::warn!(%connection, timeout_ms = timeout.as_millis() as u64, "WebSocket connect timed out");
            sink.emit(TransportEvent::Error(format!(
                "timed out after {} ms while connecting",
                timeout.as_millis()
            )))
            .await;
            return;
        }
    };

    tracing::info!(%connection, "WebSocket connected");
    if !sink.emit(TransportEvent::Opened).await {
        return;
    }

    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Frame(frame)) => {
                    if let Err(e) = write.send(to_message(frame)).await {
                        tracing::warn!(%connection, error = %e, "WebSocket write failed");
                        sink.emit(TransportEvent::Error(format!("send failed: {e}"))).await;
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let close = CloseFrame {
                        code: CloseCode::Normal,
                        reason: CLIENT_CLOSE_REASON.into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(close))).await {
                        tracing::debug!(%connection, error = %e, "Close frame not delivered");
                    }
                    sink.emit(TransportEvent::Closed(CloseInfo::new(
                        NORMAL_CLOSURE,
                        CLIENT_CLOSE_REASON,
                    )))
                    .await;
                    break;
                }
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if !sink.emit(TransportEvent::Message(Frame::Text(text))).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    if !sink.emit(TransportEvent::Message(Frame::Binary(bytes))).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let info = frame.map_or_else(
                        || CloseInfo::new(NO_STATUS_RECEIVED, ""),
                        |f| CloseInfo::new(u16::from(f.code), f.reason.into_owned()),
                    );
                    tracing::info!(%connection, code = info.code, reason = %info.reason, "Server closed connection");
                    sink.emit(TransportEvent::Closed(info)).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(%connection, error = %e, "WebSocket read failed");
                    sink.emit(TransportEvent::Error(e.to_string())).await;
                    break;
                }
                None => {
                    sink.emit(TransportEvent::Closed(CloseInfo::abnormal(
                        "connection dropped without a close frame",
                    )))
                    .await;
                    break;
                }
            },
        }
    }

    tracing::debug!(%connection, "WebSocket task finished");
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(bytes) => Message::Binary(bytes),
    }
}
