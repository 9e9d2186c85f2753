//! Session layer: connection state machine and the WebSocket transport.

pub mod state;
pub mod transport;

pub use state::ConnectionState;
pub use transport::{SessionTransport, TransportConfig};
