//! Stream Client
//!
//! The connection lifecycle manager. Owns the connector, the handle of the
//! current connection and the [`Session`], and runs the single timeline on
//! which every transport event is decoded and applied.
//!
//! # Usage
//!
//! ```ignore
//! let connector = create_connector(&config.transport)?;
//! let mut client = StreamClient::new(connector, &config);
//! let mut snapshots = client.subscribe();
//!
//! client.submit("hello")?;
//! client.run_until_idle().await;
//! ```
//!
//! # Stale connections
//!
//! Each opened connection gets a fresh [`ConnectionId`] and every transport
//! event carries it. Once the client moves on (a terminal failure, a closed
//! socket, a new submission), events still in flight from the old connection
//! are dropped instead of reaching the session.

use std::collections::VecDeque;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::config::ClientConfigFile;
use crate::messages::SessionSnapshot;
use crate::session::{Session, SessionAction, SessionInput, SessionStatus, SubmitRejected};
use crate::transport::config::TransportConfig;
use crate::transport::frame::FrameDecoder;
use crate::transport::traits::{
    ConnectionId, Connector, EventSink, TransportEnvelope, TransportEvent, TransportHandle,
};

/// Streaming session client
pub struct StreamClient {
    connector: Box<dyn Connector>,
    transport: TransportConfig,
    decoder: FrameDecoder,
    session: Session,
    /// Handle of the current connection
    handle: Option<Box<dyn TransportHandle>>,
    /// Events from any other connection are stale
    current: Option<ConnectionId>,
    events_tx: mpsc::Sender<TransportEnvelope>,
    events_rx: mpsc::Receiver<TransportEnvelope>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("transport", &self.transport)
            .field("status", &self.session.status())
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a client that opens connections through `connector`
    #[must_use]
    pub fn new(connector: Box<dyn Connector>, config: &ClientConfigFile) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.transport.channel_capacity.max(1));
        Self {
            connector,
            transport: config.transport.clone(),
            decoder: FrameDecoder::with_max_frame_size(config.transport.max_frame_size),
            session: Session::new(config.conversation_log()),
            handle: None,
            current: None,
            events_tx,
            events_rx,
        }
    }

    /// Submit a prompt
    ///
    /// Returns as soon as the connection attempt has started; progress is
    /// observed through [`subscribe`](Self::subscribe) while the caller drives
    /// [`next_event`](Self::next_event).
    ///
    /// # Errors
    ///
    /// Returns `SubmitRejected` if a request is in flight or the prompt is
    /// blank. Nothing changes in that case.
    pub fn submit(&mut self, prompt: &str) -> Result<(), SubmitRejected> {
        let now = Instant::now();
        let actions = self.session.submit(prompt, now)?;
        self.execute(actions, now);
        Ok(())
    }

    /// Close the current connection
    ///
    /// The connection stays current, so the closure it reports goes through
    /// the normal closure transition. Returns `false` if there was nothing to
    /// close.
    pub fn cancel(&mut self) -> bool {
        match self.handle.as_mut() {
            Some(handle) => {
                tracing::info!(connection = %handle.connection_id(), "Cancelling request");
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Wait for and process one event
    ///
    /// An event is either a transport event of the current connection or an
    /// expiring provisional flag. Returns `false` when there is nothing left
    /// to wait for.
    pub async fn next_event(&mut self) -> bool {
        self.drain_stale();

        let deadline = self.session.next_deadline();
        let connected = self.current.is_some();
        if !connected && deadline.is_none() {
            return false;
        }

        tokio::select! {
            envelope = self.events_rx.recv(), if connected => match envelope {
                Some(envelope) => {
                    self.process(envelope);
                    true
                }
                None => false,
            },
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                self.session.settle(Instant::now());
                true
            }
        }
    }

    /// Process events until the request has finished and its connection closed
    ///
    /// A `done` event does not end the run: the server may stream further
    /// replies on the same connection until it closes it.
    pub async fn run_until_idle(&mut self) {
        while self.is_active() {
            if !self.next_event().await {
                break;
            }
        }
    }

    /// Wait until every provisional flag has cleared
    pub async fn wait_settled(&mut self) {
        while let Some(deadline) = self.session.next_deadline() {
            tokio::time::sleep_until(deadline).await;
            self.session.settle(Instant::now());
        }
    }

    /// Subscribe to session snapshots
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.session.subscribe()
    }

    /// The latest snapshot
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Current session status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// The underlying session
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The connection events are currently accepted from
    #[must_use]
    pub fn current_connection(&self) -> Option<ConnectionId> {
        self.current
    }

    /// Whether a connection is open or opening
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether a request is in flight or its connection is still open
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.status().is_busy() || self.is_connected()
    }

    fn process(&mut self, envelope: TransportEnvelope) {
        if self.current != Some(envelope.connection) {
            tracing::debug!(
                connection = %envelope.connection,
                "Dropping event from stale connection"
            );
            return;
        }

        let now = Instant::now();
        let input = match envelope.event {
            TransportEvent::Opened => {
                tracing::debug!(connection = %envelope.connection, "Connection open");
                SessionInput::Opened
            }
            TransportEvent::Message(frame) => match self.decoder.decode(&frame) {
                Ok(event) => {
                    tracing::debug!(event = event.name(), "Received event");
                    SessionInput::Event(event)
                }
                Err(err) => SessionInput::DecodeFailed(err),
            },
            TransportEvent::Error(reason) => {
                self.drop_connection();
                SessionInput::TransportFailed(reason)
            }
            TransportEvent::Closed(info) => {
                // Already closed on the remote side; nothing to send back.
                self.handle = None;
                self.current = None;
                SessionInput::Closed(info)
            }
        };

        let actions = self.session.handle(input, now);
        self.execute(actions, now);
    }

    fn execute(&mut self, actions: Vec<SessionAction>, now: Instant) {
        let mut queue: VecDeque<SessionAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                SessionAction::Open => {
                    if self.handle.is_some() {
                        tracing::debug!("Closing lingering connection before a new request");
                        self.drop_connection();
                    }
                    let connection = ConnectionId::new();
                    let sink = EventSink::new(connection, self.events_tx.clone());
                    match self.connector.open(&self.transport, sink) {
                        Ok(handle) => {
                            self.handle = Some(handle);
                            self.current = Some(connection);
                        }
                        Err(err) => {
                            queue.extend(
                                self.session
                                    .handle(SessionInput::TransportFailed(err.to_string()), now),
                            );
                        }
                    }
                }
                SessionAction::Send(frame) => {
                    let result = match self.handle.as_mut() {
                        Some(handle) => handle.send(frame).map_err(|e| e.to_string()),
                        None => Err("no open connection".to_string()),
                    };
                    if let Err(reason) = result {
                        queue.extend(self.session.handle(SessionInput::SendFailed(reason), now));
                    }
                }
                SessionAction::Close => self.drop_connection(),
            }
        }
    }

    fn drop_connection(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
        self.current = None;
    }

    fn drain_stale(&mut self) {
        if self.current.is_some() {
            return;
        }
        while let Ok(envelope) = self.events_rx.try_recv() {
            tracing::debug!(connection = %envelope.connection, "Dropping event from stale connection");
        }
    }
}
