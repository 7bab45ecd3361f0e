//! Non-blocking network transports and their callback contracts.

pub mod connection;
pub mod handler;
pub mod line;
pub mod listener;

pub use connection::{Connection, ConnectionState, DEFAULT_READ_BUFFER};
pub use handler::{ClientId, ConnectionHandler, DisconnectReason, ListenerHandler};
pub use line::{encode_line, LineBuffer};
pub use listener::Listener;
