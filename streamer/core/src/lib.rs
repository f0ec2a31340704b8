//! Streamer Core - Streaming Session Controller
//!
//! This crate turns a stream of generated text fragments arriving over a
//! message-oriented connection into an ordered conversation log, and derives
//! a user-visible status (ready / streaming / errored) from the protocol
//! events. It has no rendering code; surfaces subscribe to snapshots.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Surfaces (CLI, ...)                    │
//! │        submit(prompt) ──▶            ◀── SessionSnapshot      │
//! └───────────────┬──────────────────────────────▲───────────────┘
//!                 │                              │ watch
//! ┌───────────────┼──────────────────────────────┼───────────────┐
//! │               ▼        STREAMER CORE         │               │
//! │  ┌──────────────────────────────────────────────────────────┐ │
//! │  │ StreamClient (single timeline)                           │ │
//! │  │   ┌──────────┐   ┌─────────────┐   ┌──────────────────┐  │ │
//! │  │   │  Frame   │──▶│   Session   │──▶│ ConversationLog  │  │ │
//! │  │   │  codec   │   │ (status)    │   │ (cursor, log)    │  │ │
//! │  │   └──────────┘   └─────────────┘   └──────────────────┘  │ │
//! │  └───────────────▲──────────────────────────────┬───────────┘ │
//! │                  │ TransportEnvelope            │ Frame        │
//! │  ┌───────────────┴──────────────────────────────▼───────────┐ │
//! │  │ Transport: WebSocket | InProcess                         │ │
//! │  └──────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use streamer_core::{create_connector, load_config, StreamClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let connector = create_connector(&config.transport)?;
//!     let mut client = StreamClient::new(connector, &config);
//!     let mut snapshots = client.subscribe();
//!
//!     client.submit("hello")?;
//!     client.run_until_idle().await;
//!
//!     for message in &snapshots.borrow_and_update().messages {
//!         println!("{}: {}", message.role.label(), message.content);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`client`]: Connection lifecycle manager, drives everything else
//! - [`session`]: Session state machine and error taxonomy
//! - [`conversation`]: Fragment aggregation into the conversation log
//! - [`messages`]: Message and snapshot value types
//! - [`transport`]: Wire codec and transports (WebSocket, in-process)
//! - [`config`]: TOML / environment / CLI configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod conversation;
pub mod messages;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use client::StreamClient;
pub use conversation::{ConversationLog, FragmentSpacing, DEFAULT_PROVISIONAL};
pub use messages::{Message, MessageId, MessageRole, SessionSnapshot};
pub use session::{
    Session, SessionAction, SessionError, SessionInput, SessionStatus, SubmitRejected,
    EMPTY_SERVER_ERROR,
};

// Transport exports
pub use transport::{
    create_connector, CloseInfo, CodecError, ConnectionId, Connector, Frame, TransportConfig,
    TransportError, TransportType, WireEvent,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ClientConfigFile, ClientToml,
    ConfigError, ConfigOverrides, ConfigSource,
};
