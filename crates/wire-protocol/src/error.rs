//! Wire Protocol Error Types

use thiserror::Error;

/// Errors on either end of the wire
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Socket error
    #[error("Socket error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    /// No reply within the client timeout
    #[error("Timeout waiting for reply after {0}ms")]
    Timeout(u64),

    /// Reply does not fit the command that was sent
    #[error("Unexpected reply to {command}: {reply:?}")]
    UnexpectedReply {
        command: &'static str,
        reply: Vec<u8>,
    },

    /// Event payload does not decode
    #[error("Malformed event payload: {0}")]
    Record(#[from] event_record::RecordError),
}
