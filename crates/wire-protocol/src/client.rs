//! Wire Protocol Client
//!
//! Async client for the acquisition server over a ZeroMQ REQ socket.
//! Requests are strictly sequential: every call sends one command and waits
//! for its reply.

use crate::command::{first_frame, is_ack, Command};
use crate::error::ProtocolError;
use event_record::{decode_all, EventRecord, Flags};
use std::time::Duration;
use tracing::{debug, info};
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// Default reply timeout
const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Client connection to an acquisition server
pub struct WireClient {
    socket: ReqSocket,
    timeout: Duration,
}

impl WireClient {
    /// Connect to a server endpoint such as `tcp://127.0.0.1:4747`
    pub async fn connect(endpoint: &str) -> Result<Self, ProtocolError> {
        let mut socket = ReqSocket::new();
        socket.connect(endpoint).await?;
        info!("Connected to acquisition server at {}", endpoint);
        Ok(Self {
            socket,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        })
    }

    /// Set reply timeout. After a timeout the request is still pending on
    /// the socket, so the client has to reconnect.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send an arbitrary payload and return the raw reply
    pub async fn raw(&mut self, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        self.socket.send(ZmqMessage::from(payload.to_vec())).await?;
        let reply = tokio::time::timeout(self.timeout, self.socket.recv())
            .await
            .map_err(|_| ProtocolError::Timeout(self.timeout.as_millis() as u64))??;
        Ok(first_frame(reply))
    }

    async fn request(&mut self, cmd: Command) -> Result<Vec<u8>, ProtocolError> {
        debug!("Sending {}", cmd);
        self.raw(&cmd.to_request()).await
    }

    async fn expect_ack(&mut self, cmd: Command) -> Result<(), ProtocolError> {
        let reply = self.request(cmd).await?;
        if is_ack(&reply) {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedReply {
                command: cmd.as_str(),
                reply,
            })
        }
    }

    /// Liveness check
    pub async fn check(&mut self) -> Result<(), ProtocolError> {
        self.expect_ack(Command::Check).await
    }

    /// Request acquisition
    pub async fn start(&mut self) -> Result<(), ProtocolError> {
        self.expect_ack(Command::Start).await
    }

    /// Stop acquisition
    pub async fn stop(&mut self) -> Result<(), ProtocolError> {
        self.expect_ack(Command::Stop).await
    }

    /// Read the staging flags
    pub async fn stat(&mut self) -> Result<Flags, ProtocolError> {
        let reply = self.request(Command::Stat).await?;
        let bytes: [u8; 4] = reply
            .as_slice()
            .try_into()
            .map_err(|_| ProtocolError::UnexpectedReply {
                command: Command::Stat.as_str(),
                reply: reply.clone(),
            })?;
        Ok(Flags::from_le_bytes(bytes))
    }

    /// Fetch and decode every staged event
    pub async fn send(&mut self) -> Result<Vec<EventRecord>, ProtocolError> {
        let reply = self.request(Command::Send).await?;
        Ok(decode_all(&reply)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeromq::RepSocket;

    /// Bind a REP socket answering every request with `reply`
    async fn canned_server(reply: &'static [u8]) -> String {
        let mut socket = RepSocket::new();
        let endpoint = socket.bind("tcp://127.0.0.1:0").await.unwrap().to_string();
        tokio::spawn(async move {
            while socket.recv().await.is_ok() {
                if socket.send(ZmqMessage::from(reply.to_vec())).await.is_err() {
                    break;
                }
            }
        });
        endpoint
    }

    #[tokio::test]
    async fn test_send_rejects_partial_record() {
        let endpoint = canned_server(&[0u8; 20]).await;
        let mut client = WireClient::connect(&endpoint).await.unwrap();
        assert!(matches!(client.send().await, Err(ProtocolError::Record(_))));
    }

    #[tokio::test]
    async fn test_nak_is_unexpected() {
        let endpoint = canned_server(b"NAK\0").await;
        let mut client = WireClient::connect(&endpoint).await.unwrap();
        let err = client.start().await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedReply { command: "start", .. }));
        assert!(client.stat().await.is_ok());
    }

    #[tokio::test]
    async fn test_reply_timeout() {
        let mut socket = RepSocket::new();
        let endpoint = socket.bind("tcp://127.0.0.1:0").await.unwrap().to_string();
        let _hold = tokio::spawn(async move {
            let _request = socket.recv().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut client = WireClient::connect(&endpoint).await.unwrap();
        client.set_timeout(Duration::from_millis(50));
        assert!(matches!(client.check().await, Err(ProtocolError::Timeout(50))));
    }
}
