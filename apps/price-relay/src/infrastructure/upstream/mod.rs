//! Upstream Adapters
//!
//! Everything that talks to the quote provider.
//!
//! - `session_client`: REST login, instrument search, sentiment
//! - `supervisor`: startup auth with backoff, periodic refresh, sentiment poll
//! - `connector`: persistent streaming WebSocket with keep-alive and reconnect
//! - `codec` / `messages`: wire formats for both the streaming API and bridge ticks

pub mod codec;
pub mod connector;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod session_client;
pub mod supervisor;

pub use codec::{CodecError, decode_bridge, decode_stream};
pub use connector::{ConnectorConfig, ConnectorError, StreamConnector};
pub use session_client::{RestSessionClient, SessionClientConfig};
pub use supervisor::{SessionSupervisor, SupervisorConfig};
