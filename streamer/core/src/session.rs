//! Session State Machine
//!
//! Tracks whether a request is in flight, gates new submissions, and maps
//! protocol events and transport conditions onto conversation log mutations.
//!
//! # Design Philosophy
//!
//! The session never performs IO. Inputs arrive as [`SessionInput`] values and
//! the session answers with [`SessionAction`]s that the client executes
//! (open a connection, send a frame, close). That keeps every transition a
//! plain synchronous function of `(status, input)` which tests can drive
//! without a runtime.
//!
//! ```text
//!          submit                 Opened
//!   Idle ──────────▶ Connecting ──────────▶ Streaming
//!    ▲                   │                     │
//!    │                   │   error / close     │  Done / error / close
//!    └───────────────────┴─────────────────────┘
//! ```
//!
//! Failures pass through `Erroring` while they are reported and land back in
//! `Idle` within the same step.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::conversation::ConversationLog;
use crate::messages::SessionSnapshot;
use crate::transport::frame::{CodecError, Frame, FrameEncoder, WireEvent};
use crate::transport::traits::CloseInfo;

/// Message shown when the server reports an error without any text
pub const EMPTY_SERVER_ERROR: &str = "The server reported an error";

/// Session status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Ready to accept a submission
    #[default]
    Idle,
    /// Waiting for the connection to open
    Connecting,
    /// Request sent, fragments may arrive
    Streaming,
    /// Reporting a failure (never observed outside a transition)
    Erroring,
}

impl SessionStatus {
    /// Get a human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Idle => "Ready",
            Self::Connecting => "Connecting...",
            Self::Streaming => "Streaming...",
            Self::Erroring => "Error",
        }
    }

    /// Whether a request is in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Inputs the client feeds into the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    /// The connection opened
    Opened,
    /// A decoded protocol event
    Event(WireEvent),
    /// An inbound frame could not be decoded
    DecodeFailed(CodecError),
    /// The request frame could not be handed to the transport
    SendFailed(String),
    /// Low-level transport failure
    TransportFailed(String),
    /// The connection closed
    Closed(CloseInfo),
}

/// Work the session asks the client to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open a new connection
    Open,
    /// Send one frame on the current connection
    Send(Frame),
    /// Close the current connection
    Close,
}

/// Failures that end a request
///
/// Every variant is recovered inside the session: it becomes one assistant
/// message in the log and the status returns to `Idle`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The outbound request could not be serialized
    #[error("Could not encode the request: {0}")]
    Encode(String),

    /// An inbound frame was not readable
    #[error("Received a reply that could not be parsed: {0}")]
    Decode(String),

    /// The server sent an `error` event; surfaced verbatim
    #[error("{0}")]
    Protocol(String),

    /// Low-level connection failure
    #[error("Connection error: {0}")]
    Transport(String),

    /// The connection closed with a code other than 1000
    #[error("Connection closed unexpectedly (code {code}){}", reason_suffix(.reason))]
    AbnormalClosure {
        /// Close code
        code: u16,
        /// Close reason, possibly empty
        reason: String,
    },

    /// The request frame could not be sent
    #[error("Could not send the request: {0}")]
    SendFailed(String),
}

fn reason_suffix(reason: &str) -> String {
    if reason.trim().is_empty() {
        String::new()
    } else {
        format!(": {}", reason.trim())
    }
}

/// Why a submission was refused
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SubmitRejected {
    /// A request is already in flight
    #[error("A request is already in progress ({0})")]
    Busy(SessionStatus),

    /// The prompt was blank
    #[error("Prompt is empty")]
    EmptyPrompt,
}

/// The session state machine
///
/// Owns the conversation log and publishes a [`SessionSnapshot`] every time
/// the log or the status changes.
#[derive(Debug)]
pub struct Session {
    log: ConversationLog,
    encoder: FrameEncoder,
    status: SessionStatus,
    pending_prompt: Option<String>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    revision: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(ConversationLog::default())
    }
}

impl Session {
    /// Create an idle session around `log`
    #[must_use]
    pub fn new(log: ConversationLog) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::empty());
        Self {
            log,
            encoder: FrameEncoder::new(),
            status: SessionStatus::Idle,
            pending_prompt: None,
            snapshot_tx,
            revision: 0,
        }
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Read access to the conversation log
    #[must_use]
    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// Subscribe to snapshots
    ///
    /// The receiver starts at the latest published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// The latest published snapshot
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Start a new request
    ///
    /// # Errors
    ///
    /// Returns `SubmitRejected::Busy` when a request is in flight and
    /// `SubmitRejected::EmptyPrompt` when the prompt trims to nothing. A
    /// rejected submission changes neither the log nor the status.
    pub fn submit(
        &mut self,
        prompt: &str,
        now: Instant,
    ) -> Result<Vec<SessionAction>, SubmitRejected> {
        if self.status != SessionStatus::Idle {
            tracing::debug!(status = ?self.status, "Submission rejected, session busy");
            return Err(SubmitRejected::Busy(self.status));
        }
        let Some(prompt) = self.log.on_user_submit(prompt, now) else {
            return Err(SubmitRejected::EmptyPrompt);
        };

        tracing::info!(chars = prompt.chars().count(), "Submitting prompt");
        self.pending_prompt = Some(prompt);
        self.status = SessionStatus::Connecting;
        self.publish();
        Ok(vec![SessionAction::Open])
    }

    /// Process one input
    pub fn handle(&mut self, input: SessionInput, now: Instant) -> Vec<SessionAction> {
        match input {
            SessionInput::Opened => self.on_opened(now),
            SessionInput::Event(event) => self.on_event(event, now),
            SessionInput::DecodeFailed(err) => {
                self.fail_if_busy(SessionError::Decode(err.to_string()), now, true)
            }
            SessionInput::SendFailed(reason) => {
                self.fail_if_busy(SessionError::SendFailed(reason), now, true)
            }
            SessionInput::TransportFailed(reason) => {
                self.fail_if_busy(SessionError::Transport(reason), now, true)
            }
            SessionInput::Closed(info) => self.on_closed(info, now),
        }
    }

    /// Clear expired provisional flags
    ///
    /// Returns `true` if a snapshot was published.
    pub fn settle(&mut self, now: Instant) -> bool {
        if self.log.settle(now) {
            self.publish();
            return true;
        }
        false
    }

    /// When the next provisional flag expires
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.log.next_deadline()
    }

    fn on_opened(&mut self, now: Instant) -> Vec<SessionAction> {
        // Fragments may beat the open event, so the pending prompt decides.
        let Some(prompt) = self.pending_prompt.take().filter(|_| self.status.is_busy()) else {
            tracing::debug!(status = ?self.status, "Ignoring open without a pending request");
            return Vec::new();
        };
        match self.encoder.encode_request(&prompt) {
            Ok(frame) => {
                if self.status != SessionStatus::Streaming {
                    self.status = SessionStatus::Streaming;
                    self.publish();
                }
                vec![SessionAction::Send(frame)]
            }
            Err(err) => self.fail(SessionError::Encode(err.to_string()), now, true),
        }
    }

    fn on_event(&mut self, event: WireEvent, now: Instant) -> Vec<SessionAction> {
        match event {
            WireEvent::Token { data } => {
                match self.status {
                    SessionStatus::Connecting | SessionStatus::Streaming => {}
                    SessionStatus::Idle => {
                        if data.trim().is_empty() {
                            return Vec::new();
                        }
                        tracing::warn!("Fragment arrived after the reply finished; opening a new message");
                    }
                    SessionStatus::Erroring => return Vec::new(),
                }
                let changed = self.log.on_token(&data, now);
                let was = self.status;
                self.status = SessionStatus::Streaming;
                if changed || was != self.status {
                    self.publish();
                }
                Vec::new()
            }
            WireEvent::Done => {
                if self.status.is_busy() {
                    self.log.on_terminal();
                    self.pending_prompt = None;
                    self.status = SessionStatus::Idle;
                    tracing::info!("Reply complete");
                    self.publish();
                } else {
                    tracing::debug!(status = ?self.status, "Ignoring done outside a request");
                }
                Vec::new()
            }
            WireEvent::Error { data } => {
                let message = if data.trim().is_empty() {
                    EMPTY_SERVER_ERROR.to_string()
                } else {
                    data
                };
                self.fail(SessionError::Protocol(message), now, true)
            }
            WireEvent::Unknown { event, raw } => {
                tracing::trace!(event = ?event, bytes = raw.len(), "Ignoring unknown event");
                Vec::new()
            }
        }
    }

    fn on_closed(&mut self, info: CloseInfo, now: Instant) -> Vec<SessionAction> {
        if !self.status.is_busy() {
            tracing::trace!(code = info.code, "Connection closed while idle");
            return Vec::new();
        }
        if info.is_normal() {
            self.log.on_terminal();
            self.pending_prompt = None;
            self.status = SessionStatus::Idle;
            tracing::info!("Connection closed normally");
            self.publish();
            return Vec::new();
        }
        self.fail(
            SessionError::AbnormalClosure {
                code: info.code,
                reason: info.reason,
            },
            now,
            false,
        )
    }

    fn fail_if_busy(
        &mut self,
        error: SessionError,
        now: Instant,
        close: bool,
    ) -> Vec<SessionAction> {
        if !self.status.is_busy() {
            tracing::trace!(%error, "Ignoring failure while idle");
            return Vec::new();
        }
        self.fail(error, now, close)
    }

    /// Report `error` as an assistant message and return to `Idle`
    fn fail(&mut self, error: SessionError, now: Instant, close: bool) -> Vec<SessionAction> {
        self.status = SessionStatus::Erroring;
        tracing::warn!(%error, "Request failed");

        self.log.on_terminal();
        self.log.on_error(&error.to_string(), now);
        self.pending_prompt = None;
        self.status = SessionStatus::Idle;
        self.publish();

        if close {
            vec![SessionAction::Close]
        } else {
            Vec::new()
        }
    }

    fn publish(&mut self) {
        self.revision += 1;
        let snapshot = SessionSnapshot {
            revision: self.revision,
            status: self.status,
            messages: self.log.visible().cloned().collect(),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageRole;
    use pretty_assertions::assert_eq;

    fn token(data: &str) -> SessionInput {
        SessionInput::Event(WireEvent::Token {
            data: data.to_string(),
        })
    }

    fn visible(session: &Session) -> Vec<(MessageRole, String)> {
        session
            .log()
            .visible()
            .map(|m| (m.role, m.content.clone()))
            .collect()
    }

    fn streaming_session(prompt: &str) -> Session {
        let mut session = Session::default();
        let now = Instant::now();
        session.submit(prompt, now).unwrap();
        session.handle(SessionInput::Opened, now);
        session
    }

    #[test]
    fn test_submit_opens_connection() {
        let mut session = Session::default();
        let actions = session.submit("  hello ", Instant::now()).unwrap();

        assert_eq!(actions, vec![SessionAction::Open]);
        assert_eq!(session.status(), SessionStatus::Connecting);
        assert_eq!(visible(&session), vec![(MessageRole::User, "hello".to_string())]);
    }

    #[test]
    fn test_opened_sends_request() {
        let mut session = Session::default();
        let now = Instant::now();
        session.submit("hello", now).unwrap();

        let actions = session.handle(SessionInput::Opened, now);
        assert_eq!(
            actions,
            vec![SessionAction::Send(Frame::Text(r#"{"prompt":"hello"}"#.to_string()))]
        );
        assert_eq!(session.status(), SessionStatus::Streaming);
    }

    #[test]
    fn test_fragment_before_open_still_sends_request() {
        let mut session = Session::default();
        let now = Instant::now();
        session.submit("hello", now).unwrap();

        session.handle(token("early"), now);
        assert_eq!(session.status(), SessionStatus::Streaming);

        let actions = session.handle(SessionInput::Opened, now);
        assert_eq!(
            actions,
            vec![SessionAction::Send(Frame::Text(r#"{"prompt":"hello"}"#.to_string()))]
        );
        assert_eq!(session.status(), SessionStatus::Streaming);

        // A second open must not resend
        assert!(session.handle(SessionInput::Opened, now).is_empty());

        session.handle(SessionInput::Event(WireEvent::Done), now);
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(
            visible(&session),
            vec![
                (MessageRole::User, "hello".to_string()),
                (MessageRole::Assistant, "early".to_string()),
            ]
        );
    }

    #[test]
    fn test_submit_rejected_while_busy() {
        let mut session = streaming_session("first");
        let before = session.snapshot();

        let err = session.submit("second", Instant::now()).unwrap_err();
        assert_eq!(err, SubmitRejected::Busy(SessionStatus::Streaming));
        assert_eq!(session.snapshot(), before);
    }

    #[test]
    fn test_blank_submit_rejected() {
        let mut session = Session::default();
        assert_eq!(
            session.submit(" \n ", Instant::now()),
            Err(SubmitRejected::EmptyPrompt)
        );
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(session.log().is_empty());
        assert_eq!(session.snapshot().revision, 0);
    }

    #[test]
    fn test_tokens_then_done() {
        let mut session = streaming_session("hello");
        let now = Instant::now();

        session.handle(token(" Hi"), now);
        session.handle(token(" there"), now);
        session.handle(SessionInput::Event(WireEvent::Done), now);

        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(!session.log().is_streaming());
        assert_eq!(
            visible(&session),
            vec![
                (MessageRole::User, "hello".to_string()),
                (MessageRole::Assistant, "Hi there".to_string()),
            ]
        );
    }

    #[test]
    fn test_error_event_surfaces_verbatim() {
        let mut session = streaming_session("q");
        let actions = session.handle(
            SessionInput::Event(WireEvent::Error {
                data: "overloaded".to_string(),
            }),
            Instant::now(),
        );

        assert_eq!(actions, vec![SessionAction::Close]);
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(
            session.log().visible().last().map(|m| m.content.as_str()),
            Some("overloaded")
        );
    }

    #[test]
    fn test_error_event_keeps_whitespace() {
        let mut session = streaming_session("q");
        session.handle(
            SessionInput::Event(WireEvent::Error {
                data: " overloaded\n".to_string(),
            }),
            Instant::now(),
        );
        assert_eq!(
            session.log().visible().last().map(|m| m.content.as_str()),
            Some(" overloaded\n")
        );
    }

    #[test]
    fn test_empty_error_still_visible() {
        let mut session = streaming_session("q");
        session.handle(
            SessionInput::Event(WireEvent::Error { data: " ".to_string() }),
            Instant::now(),
        );
        assert_eq!(
            session.log().visible().last().map(|m| m.content.as_str()),
            Some(EMPTY_SERVER_ERROR)
        );
    }

    #[test]
    fn test_abnormal_close_mentions_code() {
        let mut session = Session::default();
        let now = Instant::now();
        session.submit("x", now).unwrap();

        let actions = session.handle(SessionInput::Closed(CloseInfo::abnormal("")), now);
        assert!(actions.is_empty());
        assert_eq!(session.status(), SessionStatus::Idle);

        let last = session.log().visible().last().unwrap();
        assert_eq!(last.role, MessageRole::Assistant);
        assert!(last.content.contains("1006"), "{}", last.content);
    }

    #[test]
    fn test_normal_close_ends_request_silently() {
        let mut session = streaming_session("q");
        let now = Instant::now();
        session.handle(token("partial"), now);
        session.handle(SessionInput::Closed(CloseInfo::normal()), now);

        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.log().len(), 2);
        assert!(!session.log().is_streaming());
    }

    #[test]
    fn test_exactly_one_message_per_failure() {
        for input in [
            SessionInput::TransportFailed("reset".to_string()),
            SessionInput::SendFailed("peer gone".to_string()),
            SessionInput::DecodeFailed(CodecError::Malformed("bad".to_string())),
            SessionInput::Closed(CloseInfo::new(1011, "internal error")),
        ] {
            let mut session = streaming_session("q");
            let now = Instant::now();
            session.handle(token("partial"), now);
            session.handle(input.clone(), now);

            assert_eq!(session.status(), SessionStatus::Idle, "{input:?}");
            assert_eq!(session.log().len(), 3, "{input:?}");
            assert!(session.log().all_messages()[2].is_visible());
        }
    }

    #[test]
    fn test_failures_while_idle_are_ignored() {
        let mut session = Session::default();
        let now = Instant::now();

        for input in [
            SessionInput::Closed(CloseInfo::abnormal("late")),
            SessionInput::TransportFailed("late".to_string()),
            SessionInput::Opened,
            SessionInput::Event(WireEvent::Done),
        ] {
            assert!(session.handle(input, now).is_empty());
        }
        assert!(session.log().is_empty());
        assert_eq!(session.snapshot().revision, 0);
    }

    #[test]
    fn test_late_token_restarts_cursor() {
        let mut session = streaming_session("q");
        let now = Instant::now();
        session.handle(token("first"), now);
        session.handle(SessionInput::Event(WireEvent::Done), now);

        session.handle(token("   "), now);
        assert_eq!(session.status(), SessionStatus::Idle);

        session.handle(token("second"), now);
        assert_eq!(session.status(), SessionStatus::Streaming);
        assert_eq!(session.log().visible().count(), 3);
        assert_eq!(session.log().all_messages()[1].content, "first");
    }

    #[test]
    fn test_unknown_events_change_nothing() {
        let mut session = streaming_session("q");
        let before = session.snapshot();
        session.handle(
            SessionInput::Event(WireEvent::Unknown {
                event: Some("log".to_string()),
                raw: "{}".to_string(),
            }),
            Instant::now(),
        );
        assert_eq!(session.snapshot(), before);
    }

    #[test]
    fn test_snapshots_track_changes() {
        let mut session = Session::default();
        let rx = session.subscribe();
        let now = Instant::now();

        session.submit("hello", now).unwrap();
        assert_eq!(rx.borrow().status, SessionStatus::Connecting);
        assert_eq!(rx.borrow().revision, 1);

        session.handle(SessionInput::Opened, now);
        session.handle(token("Hi"), now);
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.status, SessionStatus::Streaming);
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.last().unwrap().content, "Hi");
    }

    #[test]
    fn test_abnormal_closure_display() {
        let err = SessionError::AbnormalClosure {
            code: 1011,
            reason: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Connection closed unexpectedly (code 1011): boom");

        let err = SessionError::AbnormalClosure {
            code: 1006,
            reason: String::new(),
        };
        assert_eq!(err.to_string(), "Connection closed unexpectedly (code 1006)");
    }
}
