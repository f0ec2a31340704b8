//! Frame Protocol
//!
//! Wire format for the streaming endpoint. Transports are message-framed, so a
//! frame is one complete WebSocket message carrying one JSON document.
//!
//! # Outbound
//!
//! ```text
//! {"prompt": "<string>"}            sent once, right after the connection opens
//! ```
//!
//! # Inbound
//!
//! ```text
//! {"event": "token", "data": "<fragment>"}
//! {"event": "done"}
//! {"event": "error", "data": "<message>"}
//! {"event": "<anything else>", ...}  decoded as WireEvent::Unknown
//! ```
//!
//! Unknown discriminators are never an error. Only frames that are not JSON at
//! all, that are oversized, or whose `data` cannot be read as text fail to
//! decode.
//!
//! # Security
//!
//! - Maximum frame size is enforced before parsing

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Maximum frame size (10 MB)
///
/// This prevents memory exhaustion from malicious or corrupted frames.
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// One transport message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text message
    Text(String),
    /// Binary message (expected to hold UTF-8 JSON as well)
    Binary(Vec<u8>),
}

impl Frame {
    /// Payload size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the payload is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload as text, if it is valid UTF-8
    pub fn as_text(&self) -> Result<&str, CodecError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Binary(bytes) => std::str::from_utf8(bytes)
                .map_err(|e| CodecError::Malformed(format!("binary frame is not UTF-8: {e}"))),
        }
    }
}

/// A decoded inbound event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireEvent {
    /// One generated fragment
    Token {
        /// Fragment text, untrimmed
        data: String,
    },
    /// The generator finished its reply
    Done,
    /// The server reported a failure
    Error {
        /// Failure description, surfaced verbatim
        data: String,
    },
    /// Well-formed frame with an unrecognised discriminator
    Unknown {
        /// The `event` value, if there was a string one
        event: Option<String>,
        /// The raw frame text
        raw: String,
    },
}

impl WireEvent {
    /// Discriminator name, for logging
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Token { .. } => "token",
            Self::Done => "done",
            Self::Error { .. } => "error",
            Self::Unknown { event, .. } => event.as_deref().unwrap_or("<none>"),
        }
    }
}

/// Errors produced by the codec
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The request could not be serialized
    #[error("failed to encode request: {0}")]
    Encode(String),

    /// The frame is not structured data
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame exceeds [`MAX_FRAME_SIZE`]
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual size
        size: usize,
        /// Allowed size
        max: usize,
    },

    /// A recognised event carried a `data` field that is not text
    #[error("invalid data for '{event}' event: {reason}")]
    InvalidData {
        /// The event discriminator
        event: String,
        /// What was wrong with it
        reason: String,
    },
}

#[derive(Serialize)]
struct PromptRequest<'a> {
    prompt: &'a str,
}

/// Encode the outbound request frame
///
/// # Errors
///
/// Returns `CodecError::Encode` if serialization fails.
pub fn encode_request(prompt: &str) -> Result<Frame, CodecError> {
    serde_json::to_string(&PromptRequest { prompt })
        .map(Frame::Text)
        .map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode one inbound frame
///
/// # Errors
///
/// - `CodecError::FrameTooLarge` if the payload exceeds `max_size`
/// - `CodecError::Malformed` if the payload is not UTF-8 JSON
/// - `CodecError::InvalidData` if a recognised event has non-text `data`
pub fn decode_frame_with_limit(frame: &Frame, max_size: usize) -> Result<WireEvent, CodecError> {
    if frame.len() > max_size {
        return Err(CodecError::FrameTooLarge {
            size: frame.len(),
            max: max_size,
        });
    }

    let text = frame.as_text()?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let event = value.get("event").and_then(Value::as_str);
    match event {
        Some("token") => Ok(WireEvent::Token {
            data: coerce_data("token", value.get("data"))?,
        }),
        Some("done") => Ok(WireEvent::Done),
        Some("error") => Ok(WireEvent::Error {
            data: coerce_data("error", value.get("data"))?,
        }),
        other => Ok(WireEvent::Unknown {
            event: other.map(str::to_string),
            raw: text.to_string(),
        }),
    }
}

/// Decode one inbound frame with the default size limit
///
/// # Errors
///
/// See [`decode_frame_with_limit`].
pub fn decode_frame(frame: &Frame) -> Result<WireEvent, CodecError> {
    decode_frame_with_limit(frame, MAX_FRAME_SIZE)
}

fn coerce_data(event: &str, data: Option<&Value>) -> Result<String, CodecError> {
    match data {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(Value::Array(_)) => Err(CodecError::InvalidData {
            event: event.to_string(),
            reason: "expected text, got an array".to_string(),
        }),
        Some(Value::Object(_)) => Err(CodecError::InvalidData {
            event: event.to_string(),
            reason: "expected text, got an object".to_string(),
        }),
    }
}

/// Encoder for outbound frames
#[derive(Debug, Default)]
pub struct FrameEncoder;

impl FrameEncoder {
    /// Create a new encoder
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Encode the request carrying `prompt`
    pub fn encode_request(&self, prompt: &str) -> Result<Frame, CodecError> {
        encode_request(prompt)
    }
}

/// Decoder for inbound frames
#[derive(Debug)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder with the default size limit
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a decoder with a custom size limit
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Configured size limit
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Decode one frame
    pub fn decode(&self, frame: &Frame) -> Result<WireEvent, CodecError> {
        decode_frame_with_limit(frame, self.max_frame_size)
    }
}
