//! Transport Factory
//!
//! Creates a connector from configuration so the client never has to know
//! which transport it talks through.

use super::{
    config::{TransportConfig, TransportType},
    traits::{Connector, TransportError},
};

#[cfg(feature = "websocket")]
use super::websocket::WebSocketConnector;

/// Create a connector based on configuration
///
/// # Errors
///
/// Returns `TransportError::InvalidState` if:
/// - `InProcess` is requested (it needs its server half, use
///   `InProcessConnector::new_pair()` directly)
/// - `WebSocket` is requested but the crate was built without the
///   `websocket` feature
pub fn create_connector(config: &TransportConfig) -> Result<Box<dyn Connector>, TransportError> {
    match config.transport {
        TransportType::InProcess => Err(TransportError::InvalidState(
            "InProcess transport requires its server half; use InProcessConnector::new_pair() directly".into(),
        )),

        #[cfg(feature = "websocket")]
        TransportType::WebSocket => Ok(Box::new(WebSocketConnector::new())),

        #[cfg(not(feature = "websocket"))]
        TransportType::WebSocket => Err(TransportError::InvalidState(
            "WebSocket transport not compiled in; enable the 'websocket' feature".into(),
        )),
    }
}
