//! MCA Wire Protocol
//!
//! Strict request/reply protocol over a ZeroMQ REP socket. A client sends
//! one ASCII command on a REQ socket, waits for its reply, and only then
//! sends the next one. Requests from several clients are queued fairly.

mod client;
mod command;
mod error;
mod server;
mod summary;

pub use client::WireClient;
pub use command::{Command, Response, ACK, NAK};
pub use error::ProtocolError;
pub use server::{Listener, WireServer};
pub use summary::RunSummary;

/// Default TCP port
pub const DEFAULT_PORT: u16 = 4747;

/// ZeroMQ TCP endpoint for `host` and `port`
pub fn tcp_endpoint(host: &str, port: u16) -> String {
    format!("tcp://{}:{}", host, port)
}
