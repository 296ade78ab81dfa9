//! Acquisition Server
//!
//! Answers requests arriving on a ZeroMQ REP socket from the staging buffer.
//! The socket queues requests from every connected peer, so a silent peer
//! never holds up the others.

use crate::command::{first_frame, Command, Response};
use crate::error::ProtocolError;
use staging::StagingBuffer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use zeromq::{RepSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// Consecutive receive failures after which the socket is considered broken
const MAX_RECV_FAILURES: u32 = 16;

/// Bound REP socket
pub struct Listener {
    socket: RepSocket,
    endpoint: String,
}

impl Listener {
    /// Resolved endpoint, with the actual port when bound to port 0
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Request handler bound to a staging buffer
#[derive(Debug, Clone)]
pub struct WireServer {
    staging: Arc<StagingBuffer>,
    /// Sleep while the dispatcher holds the writer role
    busy_poll: Duration,
}

impl WireServer {
    pub fn new(staging: Arc<StagingBuffer>, busy_poll: Duration) -> Self {
        Self { staging, busy_poll }
    }

    /// Bind a REP socket to `endpoint` (e.g. `tcp://0.0.0.0:4747`)
    pub async fn listen(endpoint: &str) -> Result<Listener, ProtocolError> {
        let mut socket = RepSocket::new();
        let resolved = socket.bind(endpoint).await?;
        Ok(Listener {
            socket,
            endpoint: resolved.to_string(),
        })
    }

    /// Answer a single request payload
    pub async fn handle(&self, payload: &[u8]) -> Response {
        let Some(cmd) = Command::parse(payload) else {
            debug!("Unknown command ({} bytes)", payload.len());
            return Response::Nak;
        };
        debug!("Command: {}", cmd);

        match cmd {
            Command::Check => Response::Ack,
            Command::Start => {
                self.staging.start();
                info!("Acquisition requested");
                Response::Ack
            }
            Command::Stop => {
                self.staging.stop();
                info!("Acquisition stop requested");
                Response::Ack
            }
            Command::Stat => Response::Flags(self.staging.flags()),
            Command::Send => {
                let mut reader = self.staging.acquire_reader(self.busy_poll).await;
                Response::Events(reader.drain_bytes())
            }
        }
    }

    /// Answer requests until `shutdown` turns true or its sender goes away.
    ///
    /// A reply that cannot be delivered is logged and dropped. Only a socket
    /// that keeps failing to receive ends the loop with an error.
    pub async fn serve(
        &self,
        listener: Listener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ProtocolError> {
        let Listener {
            mut socket,
            endpoint,
        } = listener;
        info!("Server listening on {}", endpoint);

        let mut requests = 0u64;
        let mut failures = 0u32;
        loop {
            let received = tokio::select! {
                received = socket.recv() => received,
                _ = shutdown.wait_for(|stop| *stop) => break,
            };

            let payload = match received {
                Ok(message) => {
                    failures = 0;
                    first_frame(message)
                }
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_RECV_FAILURES {
                        error!("Receive failed {} times in a row: {}", failures, e);
                        return Err(e.into());
                    }
                    warn!("Receive failed: {}", e);
                    continue;
                }
            };

            let reply = self.handle(&payload).await.into_bytes();
            if let Err(e) = socket.send(ZmqMessage::from(reply)).await {
                warn!("Reply dropped: {}", e);
            }
            requests += 1;
        }

        info!("Server stopped after {} requests", requests);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ACK, NAK};
    use crate::WireClient;
    use event_record::{EventRecord, Flags};
    use tokio::net::TcpStream;

    fn server() -> (WireServer, Arc<StagingBuffer>) {
        let staging = Arc::new(StagingBuffer::anonymous().unwrap());
        (WireServer::new(staging.clone(), Duration::from_millis(1)), staging)
    }

    fn stage(staging: &StagingBuffer, n: u64) {
        let records: Vec<_> = (0..n).map(|i| EventRecord::new(1000 + i, 50, 2 + i as u16, 0)).collect();
        staging.try_acquire_writer().unwrap().append(&records);
    }

    async fn spawn(
        server: WireServer,
    ) -> (String, watch::Sender<bool>, tokio::task::JoinHandle<Result<(), ProtocolError>>) {
        let listener = WireServer::listen("tcp://127.0.0.1:0").await.unwrap();
        let endpoint = listener.endpoint().to_string();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { server.serve(listener, rx).await });
        (endpoint, tx, handle)
    }

    fn port(endpoint: &str) -> u16 {
        endpoint.rsplit(':').next().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn test_handle_commands() {
        let (server, staging) = server();

        assert_eq!(server.handle(b"check\0").await, Response::Ack);
        assert_eq!(server.handle(b"start\0").await, Response::Ack);
        assert_eq!(server.handle(b"stat\0").await, Response::Flags(Flags::RUN));
        assert_eq!(server.handle(b"garbage").await, Response::Nak);
        assert_eq!(server.handle(b"stop\0").await, Response::Ack);
        assert_eq!(staging.flags(), Flags::empty());
    }

    #[tokio::test]
    async fn test_send_drains_once() {
        let (server, staging) = server();
        stage(&staging, 3);

        match server.handle(b"send\0").await {
            Response::Events(bytes) => assert_eq!(bytes.len(), 48),
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(server.handle(b"send\0").await, Response::Events(Vec::new()));
    }

    #[tokio::test]
    async fn test_send_waits_for_writer() {
        let (server, staging) = server();
        let writer = staging.try_acquire_writer().unwrap();

        let pending = tokio::spawn({
            let server = server.clone();
            async move { server.handle(b"send\0").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        drop(writer);
        assert_eq!(pending.await.unwrap(), Response::Events(Vec::new()));
        assert!(!staging.flags().intersects(Flags::READER_BUSY | Flags::WRITER_BUSY));
    }

    #[tokio::test]
    async fn test_listen_resolves_port() {
        let listener = WireServer::listen("tcp://127.0.0.1:0").await.unwrap();
        assert!(listener.endpoint().starts_with("tcp://127.0.0.1:"));
        assert_ne!(port(listener.endpoint()), 0);
    }

    #[tokio::test]
    async fn test_session() {
        let (server, staging) = server();
        let (endpoint, tx, handle) = spawn(server).await;

        let mut client = WireClient::connect(&endpoint).await.unwrap();
        client.check().await.unwrap();
        client.start().await.unwrap();
        assert_eq!(client.stat().await.unwrap(), Flags::RUN);

        stage(&staging, 3);
        let events = client.send().await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], EventRecord::new(1000, 50, 2, 0));
        assert_eq!(events[2].value, 4);

        client.stop().await.unwrap();
        assert_eq!(client.raw(b"garbage").await.unwrap(), NAK);
        assert_eq!(client.raw(b"check\0").await.unwrap(), ACK);
        assert!(client.send().await.unwrap().is_empty());
        assert_eq!(client.stat().await.unwrap(), Flags::empty());

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_overflow_pause_resumes_on_send() {
        let (server, staging) = server();
        let (endpoint, tx, handle) = spawn(server).await;
        let mut client = WireClient::connect(&endpoint).await.unwrap();
        client.start().await.unwrap();

        {
            let mut writer = staging.try_acquire_writer().unwrap();
            let records: Vec<_> = (0..event_record::SIZE as u64 + 5)
                .map(|i| EventRecord::new(i, 0, 2, 0))
                .collect();
            let outcome = writer.append(&records);
            assert!(outcome.paused);
        }
        assert_eq!(client.stat().await.unwrap(), Flags::PAUSE);

        let events = client.send().await.unwrap();
        assert_eq!(events.len(), event_record::SIZE);
        assert_eq!(client.stat().await.unwrap(), Flags::RUN);

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_clients_share_the_socket() {
        let (server, _staging) = server();
        let (endpoint, tx, handle) = spawn(server).await;

        let mut first = WireClient::connect(&endpoint).await.unwrap();
        let mut second = WireClient::connect(&endpoint).await.unwrap();
        first.check().await.unwrap();
        second.start().await.unwrap();
        assert_eq!(first.stat().await.unwrap(), Flags::RUN);
        second.stop().await.unwrap();

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_idle_peer_does_not_block_other_clients() {
        let (server, _staging) = server();
        let (endpoint, tx, handle) = spawn(server).await;

        // Connected at the TCP level but never speaks
        let _idle = TcpStream::connect(("127.0.0.1", port(&endpoint))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut client = WireClient::connect(&endpoint).await.unwrap();
        client.set_timeout(Duration::from_secs(3));
        client.check().await.unwrap();
        client.stop().await.unwrap();

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_long_request_gets_nak() {
        let (server, _staging) = server();
        let (endpoint, tx, handle) = spawn(server).await;

        let mut client = WireClient::connect(&endpoint).await.unwrap();
        assert_eq!(client.raw(&[b'a'; 4096]).await.unwrap(), NAK);
        client.check().await.unwrap();

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_with_client_connected() {
        let (server, _staging) = server();
        let (endpoint, tx, handle) = spawn(server).await;

        let mut client = WireClient::connect(&endpoint).await.unwrap();
        client.check().await.unwrap();

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_stop_update_keeps_serving() {
        let (server, _staging) = server();
        let (endpoint, tx, handle) = spawn(server).await;

        let mut client = WireClient::connect(&endpoint).await.unwrap();
        client.check().await.unwrap();
        tx.send(false).unwrap();
        client.check().await.unwrap();
        assert!(!handle.is_finished());

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_server() {
        let (server, _staging) = server();
        let (_endpoint, tx, handle) = spawn(server).await;
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
