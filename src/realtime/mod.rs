//! Real-time socket lifecycle and event fan-out.

mod events;
mod manager;
#[cfg(test)]
mod mock;
mod transport;

pub use events::{
  fingerprint, Channel, InboundEvent, Inbox, ReadReceipt, RecentIds, Toast, JOIN, JOINED,
  MESSAGE_READ, NEW_MESSAGE, NEW_NOTIFICATION,
};
pub use manager::{ConnectionManager, ConnectionState};
pub use transport::{ConnectOptions, Connection, Socket, SocketEvent, SocketTransport};
