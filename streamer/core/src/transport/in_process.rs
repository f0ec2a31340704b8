//! In-Process Transport
//!
//! Channel-based transport with a scripted server side. Every connection the
//! client opens is handed to an [`InProcessServer`] as an [`InProcessPeer`],
//! which plays the remote generator: it accepts the connection, reads the
//! request frame, emits events and closes with any close code.
//!
//! # Usage
//!
//! ```ignore
//! let (connector, mut server) = InProcessConnector::new_pair();
//! let mut client = StreamClient::new(Box::new(connector), &config);
//!
//! client.submit("hello")?;
//! let mut peer = server.next_peer().await.unwrap();
//! peer.accept().await;
//! client.next_event().await;            // Opened -> request sent
//! let request = peer.recv_frame().await;
//! peer.send_token(" Hi").await;
//! peer.send_done().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use super::config::TransportConfig;
use super::frame::Frame;
use super::traits::{
    CloseInfo, ConnectionId, Connector, EventSink, TransportError, TransportEvent,
    TransportHandle,
};

/// Client half: opens in-process connections
#[derive(Debug)]
pub struct InProcessConnector {
    peers_tx: mpsc::UnboundedSender<InProcessPeer>,
}

/// Server half: receives one peer per opened connection
#[derive(Debug)]
pub struct InProcessServer {
    peers_rx: mpsc::UnboundedReceiver<InProcessPeer>,
}

impl InProcessConnector {
    /// Create a connected connector/server pair
    #[must_use]
    pub fn new_pair() -> (Self, InProcessServer) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        (Self { peers_tx }, InProcessServer { peers_rx })
    }
}

impl Connector for InProcessConnector {
    fn open(
        &self,
        _config: &TransportConfig,
        sink: EventSink,
    ) -> Result<Box<dyn TransportHandle>, TransportError> {
        let connection = sink.connection_id();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let peer = InProcessPeer {
            sink: sink.clone(),
            frames: frame_rx,
            closed: Arc::clone(&closed),
        };
        self.peers_tx.send(peer).map_err(|_| {
            TransportError::ConnectionFailed("in-process server is gone".to_string())
        })?;

        tracing::debug!(%connection, "Opened in-process connection");

        Ok(Box::new(InProcessHandle {
            connection,
            sink,
            frame_tx: Some(frame_tx),
            closed,
        }))
    }
}

impl InProcessServer {
    /// Wait for the client to open the next connection
    ///
    /// Returns `None` once the connector is dropped.
    pub async fn next_peer(&mut self) -> Option<InProcessPeer> {
        self.peers_rx.recv().await
    }

    /// Take an already-opened connection without waiting
    pub fn try_next_peer(&mut self) -> Option<InProcessPeer> {
        self.peers_rx.try_recv().ok()
    }
}

/// Client-side handle for one in-process connection
struct InProcessHandle {
    connection: ConnectionId,
    sink: EventSink,
    frame_tx: Option<mpsc::UnboundedSender<Frame>>,
    closed: Arc<AtomicBool>,
}

impl TransportHandle for InProcessHandle {
    fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        let Some(tx) = self.frame_tx.as_ref() else {
            return Err(TransportError::ConnectionClosed);
        };
        tx.send(frame)
            .map_err(|_| TransportError::SendFailed("in-process peer dropped".to_string()))
    }

    fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.frame_tx = None;
        if !self
            .sink
            .try_emit(TransportEvent::Closed(CloseInfo::new(1000, "closed by client")))
        {
            tracing::debug!(connection = %self.connection, "Close not reported, client gone");
        }
    }
}

/// Server-side view of one in-process connection
#[derive(Debug)]
pub struct InProcessPeer {
    sink: EventSink,
    frames: mpsc::UnboundedReceiver<Frame>,
    closed: Arc<AtomicBool>,
}

impl InProcessPeer {
    /// The connection this peer serves
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.sink.connection_id()
    }

    /// Report the connection as open
    pub async fn accept(&self) -> bool {
        self.sink.emit(TransportEvent::Opened).await
    }

    /// Receive the next frame the client sent
    ///
    /// Returns `None` once the client has closed or dropped the connection.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Send a raw text frame
    pub async fn send_text(&self, raw: impl Into<String>) -> bool {
        self.sink
            .emit(TransportEvent::Message(Frame::Text(raw.into())))
            .await
    }

    /// Send a JSON frame
    pub async fn send_json(&self, value: serde_json::Value) -> bool {
        self.send_text(value.to_string()).await
    }

    /// Send a `token` event
    pub async fn send_token(&self, data: &str) -> bool {
        self.send_json(json!({"event": "token", "data": data})).await
    }

    /// Send a `done` event
    pub async fn send_done(&self) -> bool {
        self.send_json(json!({"event": "done"})).await
    }

    /// Send an `error` event
    pub async fn send_error(&self, data: &str) -> bool {
        self.send_json(json!({"event": "error", "data": data})).await
    }

    /// Report a low-level connection failure
    pub async fn fail(&self, message: &str) -> bool {
        self.closed.store(true, Ordering::SeqCst);
        self.sink
            .emit(TransportEvent::Error(message.to_string()))
            .await
    }

    /// Close the connection from the server side
    pub async fn close(&self, code: u16, reason: &str) -> bool {
        self.closed.store(true, Ordering::SeqCst);
        self.sink
            .emit(TransportEvent::Closed(CloseInfo::new(code, reason)))
            .await
    }

    /// Whether either side has closed the connection
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
