//! The agent control channel: connection registry, WebSocket pumps, and the
//! protocol handlers that reconcile agent reports against the store.

use std::time::Duration;

pub mod connection;
pub mod registry;
pub mod session;
pub mod writeback;
pub mod ws;

pub use connection::AgentConnection;
pub use registry::{Hub, HubRunner};
pub use writeback::Writeback;

/// Time allowed for a single outbound write.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Read deadline: a connection with no inbound frame (including pongs) for
/// this long is considered dead.
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Keepalive ping interval, 9/10 of the read deadline so a ping always goes
/// out well before the peer's deadline can lapse.
pub const PING_PERIOD: Duration = Duration::from_secs(PONG_WAIT.as_secs() * 9 / 10);

/// Maximum inbound frame size; oversized frames tear the connection down.
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024;

/// Outbound queue depth per connection.
pub const OUTBOUND_QUEUE: usize = 256;
