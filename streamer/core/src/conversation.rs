//! Streaming Aggregator
//!
//! Folds protocol events into the conversation log. The log owns every
//! message; the active cursor points at the assistant message currently
//! receiving fragments.
//!
//! # Invariants
//!
//! - Messages are only ever appended. Blank messages are filtered when the log
//!   is read, never removed, so the cursor index stays valid.
//! - At most one cursor exists. It is set by the first non-blank fragment after
//!   a terminal condition and cleared by the next terminal condition.
//! - Fragment order in the log equals arrival order.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::messages::{Message, MessageRole};

/// Default time a new message stays provisional
pub const DEFAULT_PROVISIONAL: Duration = Duration::from_millis(200);

/// How fragments after the first one are normalised
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentSpacing {
    /// Continuation fragments are appended verbatim, keeping the spacing the
    /// generator put in them
    #[default]
    Preserve,
    /// Every fragment is trimmed before it is appended
    Trim,
}

impl std::str::FromStr for FragmentSpacing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "preserve" => Ok(Self::Preserve),
            "trim" => Ok(Self::Trim),
            other => Err(format!("unknown fragment spacing '{other}' (expected preserve or trim)")),
        }
    }
}

/// Ordered conversation log with an active streaming cursor
#[derive(Debug)]
pub struct ConversationLog {
    /// All messages, including blank ones
    messages: Vec<Message>,
    /// Index of the assistant message receiving fragments
    active: Option<usize>,
    /// Pending provisional-flag expiries, in insertion (= deadline) order
    provisional_deadlines: VecDeque<(usize, Instant)>,
    /// How long new messages stay provisional
    provisional_for: Duration,
    /// Continuation fragment handling
    spacing: FragmentSpacing,
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new(DEFAULT_PROVISIONAL, FragmentSpacing::default())
    }
}

impl ConversationLog {
    /// Create an empty log
    #[must_use]
    pub fn new(provisional_for: Duration, spacing: FragmentSpacing) -> Self {
        Self {
            messages: Vec::new(),
            active: None,
            provisional_deadlines: VecDeque::new(),
            provisional_for,
            spacing,
        }
    }

    /// Handle one generated fragment
    ///
    /// Returns `true` if the log changed. A fragment that trims to nothing is
    /// ignored entirely: it neither opens a message nor touches the cursor.
    pub fn on_token(&mut self, data: &str, now: Instant) -> bool {
        let trimmed = data.trim();
        if trimmed.is_empty() {
            return false;
        }

        match self.active {
            Some(idx) => {
                let fragment = match self.spacing {
                    FragmentSpacing::Preserve => data,
                    FragmentSpacing::Trim => trimmed,
                };
                self.messages[idx].append(fragment);
            }
            None => {
                let idx = self.push(Message::assistant(trimmed), now);
                self.active = Some(idx);
                tracing::debug!(index = idx, "Opened streaming message");
            }
        }
        true
    }

    /// Record a user submission
    ///
    /// Returns the trimmed text to transmit, or `None` if it was blank.
    pub fn on_user_submit(&mut self, text: &str, now: Instant) -> Option<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        self.push(Message::user(trimmed), now);
        Some(trimmed.to_string())
    }

    /// Close the active message, if any, without touching its content
    pub fn on_terminal(&mut self) {
        if let Some(idx) = self.active.take() {
            tracing::debug!(
                index = idx,
                bytes = self.messages[idx].content.len(),
                "Closed streaming message"
            );
        }
    }

    /// Close the active message and record a failure as an assistant message
    ///
    /// The text is kept verbatim; a blank message appends nothing. Returns
    /// `true` if a message was appended.
    pub fn on_error(&mut self, message: &str, now: Instant) -> bool {
        self.on_terminal();
        if message.trim().is_empty() {
            return false;
        }
        self.push(Message::assistant(message), now);
        true
    }

    /// Clear provisional flags whose deadline has passed
    ///
    /// Returns `true` if any flag changed.
    pub fn settle(&mut self, now: Instant) -> bool {
        let mut changed = false;
        while let Some(&(idx, deadline)) = self.provisional_deadlines.front() {
            if deadline > now {
                break;
            }
            self.provisional_deadlines.pop_front();
            if let Some(msg) = self.messages.get_mut(idx) {
                changed |= msg.provisional;
                msg.provisional = false;
            }
        }
        changed
    }

    /// The earliest pending provisional deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.provisional_deadlines.front().map(|&(_, deadline)| deadline)
    }

    /// The message currently receiving fragments
    #[must_use]
    pub fn active(&self) -> Option<&Message> {
        self.active.map(|idx| &self.messages[idx])
    }

    /// Whether a streaming message is open
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Messages a consumer may see, in order
    pub fn visible(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_visible())
    }

    /// Every message, including blank ones
    #[must_use]
    pub fn all_messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of stored messages (blank ones included)
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log holds no messages at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Roles of the visible messages, mostly useful in assertions
    #[must_use]
    pub fn visible_roles(&self) -> Vec<MessageRole> {
        self.visible().map(|m| m.role).collect()
    }

    fn push(&mut self, message: Message, now: Instant) -> usize {
        let idx = self.messages.len();
        self.messages.push(message.provisional());
        self.provisional_deadlines
            .push_back((idx, now + self.provisional_for));
        idx
    }
}
