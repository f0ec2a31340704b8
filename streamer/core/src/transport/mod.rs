//! Transport Layer
//!
//! Provides abstraction over the connection a session streams through:
//! - `WebSocket`: the reference deployment (feature `websocket`)
//! - `InProcess`: channel pair with a scripted server, for tests and demos
//!
//! A transport only moves frames and reports lifecycle events. It never
//! touches the conversation log or the session status; those live on the
//! client's single timeline.

pub mod config;
pub mod factory;
pub mod frame;
pub mod in_process;
pub mod traits;
#[cfg(feature = "websocket")]
pub mod websocket;

// Re-exports for convenience
pub use config::{TransportConfig, TransportType};
pub use factory::create_connector;
pub use frame::{decode_frame, encode_request, CodecError, Frame, FrameDecoder, FrameEncoder, WireEvent};
pub use in_process::{InProcessConnector, InProcessPeer, InProcessServer};
pub use traits::{
    CloseInfo, ConnectionId, Connector, EventSink, TransportEnvelope, TransportError,
    TransportEvent, TransportHandle, ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
