//! Conversation Messages
//!
//! The value types that make up the conversation log and the snapshots
//! published to rendering surfaces.
//!
//! # Design Philosophy
//!
//! Rendering surfaces are pure consumers. They receive a [`SessionSnapshot`]
//! whenever the log or the session status changes and decide for themselves
//! how to draw it. Nothing in this module carries behaviour beyond simple
//! content bookkeeping.

use serde::{Deserialize, Serialize};

use crate::session::SessionStatus;

/// Message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("msg_{id}"))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User input
    User,
    /// Generated reply, or a reported failure
    Assistant,
}

impl MessageRole {
    /// Short label used by plain-text renderers
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "you",
            Self::Assistant => "assistant",
        }
    }
}

/// A message in the conversation log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Message content (append-only while streaming)
    pub content: String,
    /// Freshly inserted; cleared shortly after creation
    pub provisional: bool,
    /// When the message was created (Unix timestamp ms)
    pub timestamp: u64,
}

impl Message {
    /// Create a new message
    pub fn new(role: MessageRole, content: String) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content,
            provisional: false,
            timestamp: now_ms(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content.into())
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content.into())
    }

    /// Mark as provisional
    #[must_use]
    pub fn provisional(mut self) -> Self {
        self.provisional = true;
        self
    }

    /// Append a fragment to the content
    pub fn append(&mut self, text: &str) {
        self.content.push_str(text);
    }

    /// Whether the message should be shown at all
    ///
    /// Blank messages stay in the log (indices are stable) but are never
    /// handed to consumers.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

/// Read-only view of a session, published on every change
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Monotonic change counter (0 = initial state)
    pub revision: u64,
    /// Session status at the time of the change
    pub status: SessionStatus,
    /// Visible messages in chronological order
    pub messages: Vec<Message>,
}

impl SessionSnapshot {
    /// The snapshot of a session that has never been touched
    #[must_use]
    pub fn empty() -> Self {
        Self {
            revision: 0,
            status: SessionStatus::Idle,
            messages: Vec::new(),
        }
    }

    /// The most recent visible message, if any
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Get current timestamp in milliseconds
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
