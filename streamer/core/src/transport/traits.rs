//! Transport Traits
//!
//! The narrow boundary between the session controller and a concrete
//! connection. A transport has four capability points, all reported as
//! [`TransportEvent`]s: open, message, error and close.
//!
//! Opening never blocks. [`Connector::open`] returns a handle immediately and
//! the transport reports readiness later by emitting [`TransportEvent::Opened`]
//! through its [`EventSink`]. Every event is tagged with the [`ConnectionId`]
//! it belongs to so the client can drop events from connections it has
//! already abandoned.

use thiserror::Error;
use tokio::sync::mpsc;

use super::config::TransportConfig;
use super::frame::Frame;

/// Close code for a normal closure
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the connection dropped without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Errors raised by transports
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Frame could not be handed to the connection
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The configured endpoint cannot be used
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The connection is already closed
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Identifies one opened connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate a new process-unique ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Close code and reason reported by a closed connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code
    pub code: u16,
    /// Reason text (may be empty)
    pub reason: String,
}

impl CloseInfo {
    /// Create close info
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// A normal (1000) closure
    #[must_use]
    pub fn normal() -> Self {
        Self::new(NORMAL_CLOSURE, "")
    }

    /// A closure without a close frame (1006)
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(ABNORMAL_CLOSURE, reason)
    }

    /// Whether this was a normal closure
    #[must_use]
    pub fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSURE
    }
}

/// Lifecycle events reported by a transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is open and ready to send
    Opened,
    /// A complete inbound message
    Message(Frame),
    /// Low-level failure; the connection is unusable afterwards
    Error(String),
    /// The connection closed
    Closed(CloseInfo),
}

/// A transport event tagged with its connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportEnvelope {
    /// Which connection produced the event
    pub connection: ConnectionId,
    /// What happened
    pub event: TransportEvent,
}

/// Where a transport reports its lifecycle events
#[derive(Clone, Debug)]
pub struct EventSink {
    connection: ConnectionId,
    tx: mpsc::Sender<TransportEnvelope>,
}

impl EventSink {
    /// Create a sink that tags events with `connection`
    #[must_use]
    pub fn new(connection: ConnectionId, tx: mpsc::Sender<TransportEnvelope>) -> Self {
        Self { connection, tx }
    }

    /// The connection this sink reports for
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    /// Report an event
    ///
    /// Returns `false` if the client has gone away.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let envelope = TransportEnvelope {
            connection: self.connection,
            event,
        };
        if self.tx.send(envelope).await.is_err() {
            tracing::debug!(connection = %self.connection, "Event receiver dropped");
            return false;
        }
        true
    }

    /// Report an event from a synchronous path such as [`TransportHandle::close`]
    ///
    /// When the channel is full the event is handed to a spawned task, so it
    /// is delivered once the client catches up. Returns `false` if the client
    /// has gone away or there is no runtime to wait on.
    pub fn try_emit(&self, event: TransportEvent) -> bool {
        let envelope = TransportEnvelope {
            connection: self.connection,
            event,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    tracing::debug!(connection = %self.connection, "Event channel full outside a runtime");
                    return false;
                };
                let tx = self.tx.clone();
                runtime.spawn(async move {
                    let _ = tx.send(envelope).await;
                });
                true
            }
        }
    }
}

/// Opens connections
pub trait Connector: Send + Sync {
    /// Start opening a connection to the configured endpoint
    ///
    /// Must return without waiting for the connection. Readiness, inbound
    /// messages, failures and closure are all reported through `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the attempt cannot even be started (for
    /// example, an unusable endpoint).
    fn open(
        &self,
        config: &TransportConfig,
        sink: EventSink,
    ) -> Result<Box<dyn TransportHandle>, TransportError>;
}

/// Client-side handle to one connection
pub trait TransportHandle: Send {
    /// The connection this handle controls
    fn connection_id(&self) -> ConnectionId;

    /// Queue a frame for sending
    ///
    /// # Errors
    ///
    /// Returns `TransportError::SendFailed` or `ConnectionClosed` if the frame
    /// cannot be handed to the connection.
    fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the connection with a normal close code
    ///
    /// The transport reports the closure through its sink. Closing twice is a
    /// no-op.
    fn close(&mut self);
}
