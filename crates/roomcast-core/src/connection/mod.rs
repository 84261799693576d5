//! Connection management

mod connection;

pub use connection::{CloseInfo, Connection, DISCONNECT_EVENT};
