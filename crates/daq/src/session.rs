//! Client Polling Session
//!
//! Drives a [`WireClient`] through one run: optional `start`, periodic
//! `send` folded into a [`RunSummary`], a status line every second, a last
//! `send` for whatever was staged since the final poll, then `stop`.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;
use wire_protocol::{ProtocolError, RunSummary, WireClient};

/// Session parameters
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Send `start` before polling
    pub start: bool,
    /// Total polling time
    pub duration: Duration,
    /// Interval between `send` requests
    pub poll_interval: Duration,
    /// Interval between status lines
    pub status_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            start: false,
            duration: Duration::from_secs(10),
            poll_interval: Duration::from_millis(200),
            status_interval: Duration::from_secs(1),
        }
    }
}

/// Run one session. `interrupt` ends polling early; the remaining events
/// are still collected and acquisition is stopped.
pub async fn run_session<F>(
    client: &mut WireClient,
    summary: &mut RunSummary,
    options: &SessionOptions,
    interrupt: F,
) -> Result<(), ProtocolError>
where
    F: Future<Output = ()>,
{
    client.check().await?;
    if options.start {
        client.start().await?;
        info!("Acquisition started");
    }

    let deadline = Instant::now() + options.duration;
    let mut poll = tokio::time::interval(options.poll_interval);
    let mut status = tokio::time::interval(options.status_interval);
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            _ = &mut interrupt => {
                info!("Interrupted");
                break;
            }
            _ = poll.tick() => {
                summary.update(&client.send().await?);
            }
            _ = status.tick() => {
                let flags = client.stat().await?;
                info!(
                    events = summary.events(),
                    errors = summary.errors(),
                    rate_hz = %format!("{:.1}", summary.rate_hz()),
                    dead_pct = %format!("{:.2}", summary.dead_fraction() * 100.0),
                    flags = %flags,
                    "Run summary"
                );
            }
        }
    }

    summary.update(&client.send().await?);
    client.stop().await?;
    info!(
        events = summary.events(),
        errors = summary.errors(),
        real_s = summary.real_time_ns() as f64 / 1e9,
        live_s = summary.live_time_ns() as f64 / 1e9,
        "Acquisition stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_record::{EventRecord, Flags, Resolution};
    use staging::StagingBuffer;
    use std::sync::Arc;
    use tokio::sync::watch;
    use wire_protocol::WireServer;

    async fn server() -> (String, Arc<StagingBuffer>, watch::Sender<bool>) {
        let staging = Arc::new(StagingBuffer::anonymous().unwrap());
        let server = WireServer::new(Arc::clone(&staging), Duration::from_millis(1));
        let listener = WireServer::listen("tcp://127.0.0.1:0").await.unwrap();
        let endpoint = listener.endpoint().to_string();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move { server.serve(listener, rx).await });
        (endpoint, staging, tx)
    }

    fn stage(staging: &StagingBuffer, records: &[EventRecord]) {
        staging.try_acquire_writer().unwrap().append(records);
    }

    #[tokio::test]
    async fn test_events_staged_before_stop_are_collected() {
        let (endpoint, staging, _tx) = server().await;
        let mut client = WireClient::connect(&endpoint).await.unwrap();
        let mut summary = RunSummary::new(Resolution::default());

        let options = SessionOptions {
            start: true,
            duration: Duration::from_millis(100),
            poll_interval: Duration::from_secs(60),
            status_interval: Duration::from_secs(60),
        };
        let staged = Arc::clone(&staging);
        let interrupt = async move {
            // After the first poll, before the session ends
            tokio::time::sleep(Duration::from_millis(30)).await;
            stage(
                &staged,
                &[
                    EventRecord::new(1_000, 10, 2, 0),
                    EventRecord::new(2_000, 10, 40, 0),
                    EventRecord::new(3_000, 10, 40, 1),
                ],
            );
            std::future::pending::<()>().await
        };

        run_session(&mut client, &mut summary, &options, interrupt)
            .await
            .unwrap();

        assert_eq!(summary.events(), 2);
        assert_eq!(summary.spectrum()[40], 2);
        assert_eq!(summary.errors(), 1);
        assert_eq!(staging.count(), 0);
        assert_eq!(staging.flags(), Flags::empty());
    }

    #[tokio::test]
    async fn test_interrupt_still_stops() {
        let (endpoint, staging, _tx) = server().await;
        let mut client = WireClient::connect(&endpoint).await.unwrap();
        let mut summary = RunSummary::new(Resolution::default());
        let options = SessionOptions {
            start: true,
            duration: Duration::from_secs(60),
            ..Default::default()
        };

        run_session(&mut client, &mut summary, &options, async {})
            .await
            .unwrap();
        assert_eq!(staging.flags(), Flags::empty());
    }
}
