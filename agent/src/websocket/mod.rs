//! WebSocket support for live status.
//!
//! Clients connect to `/ws` and receive every status change and rejected
//! write as it happens. They can also ask for a sync or flip manual offline
//! mode over the same socket.

mod handler;
mod manager;
mod protocol;

pub use handler::handle_websocket_connection;
pub use manager::{spawn_relay, ConnectionManager};
pub use protocol::*;
