//! Acquisition Pipeline
//!
//! Owns the staging segment and runs the dispatcher and the wire server as
//! two tasks. Either task ending requests shutdown of the other.

use crate::settings::DaqSettings;
use anyhow::{Context, Result};
use capture::{Device, SimulatedAnalyzer};
use dispatcher::{CharDevice, DispatchError, DispatchStats, Dispatcher, EventSource};
use staging::StagingBuffer;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use wire_protocol::{tcp_endpoint, WireServer};

/// Outcome of a completed run
#[derive(Debug, Clone, Copy, Default)]
pub struct RunReport {
    /// Dispatcher accounting, absent if the task had to be aborted
    pub stats: Option<DispatchStats>,
    /// Conversions completed by the simulated analyzer
    pub conversions: Option<u64>,
}

struct Generator {
    stop: Arc<AtomicBool>,
    handle: std::thread::JoinHandle<u64>,
}

/// Running dispatcher and server
pub struct Pipeline {
    endpoint: String,
    shutdown: Arc<watch::Sender<bool>>,
    stopped: watch::Receiver<bool>,
    server: JoinHandle<Result<()>>,
    dispatcher: JoinHandle<Result<DispatchStats, DispatchError>>,
    generator: Option<Generator>,
    grace: Duration,
    /// Creator handle; the segment is unlinked when the pipeline drops
    _staging: Arc<StagingBuffer>,
}

impl Pipeline {
    /// Create the segment, bring the server up, then open the device and
    /// start dispatching. Only these steps can fail.
    pub async fn start(settings: &DaqSettings) -> Result<Self> {
        let resolution = settings.resolution()?;
        let segment = settings.segment_path();
        let staging = Arc::new(
            StagingBuffer::create(&segment)
                .with_context(|| format!("Failed to create shared segment {}", segment.display()))?,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);

        let (ready_tx, ready_rx) = oneshot::channel();
        let server = tokio::spawn(serve(
            segment,
            tcp_endpoint(&settings.bind_address, settings.port),
            settings.busy_poll(),
            ready_tx,
            Arc::clone(&shutdown),
            shutdown_rx.clone(),
        ));

        let endpoint = match ready_rx.await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(e)) => return Err(e.context("Server failed to start")),
            Err(_) => {
                let joined = server.await;
                anyhow::bail!("Server task ended before becoming ready: {:?}", joined.err());
            }
        };

        let (source, generator) = match open_source(settings, resolution) {
            Ok(opened) => opened,
            Err(e) => {
                shutdown.send_replace(true);
                let _ = server.await;
                return Err(e);
            }
        };

        let mut dispatch = Dispatcher::new(source, Arc::clone(&staging), settings.dispatcher_config());
        let dispatcher = tokio::spawn({
            let shutdown = Arc::clone(&shutdown);
            let rx = shutdown_rx.clone();
            async move {
                let result = dispatch.run(rx).await;
                shutdown.send_replace(true);
                result
            }
        });

        info!(
            "Acquisition pipeline up: server on {}, device {}",
            endpoint, settings.device
        );
        Ok(Self {
            endpoint,
            shutdown,
            stopped: shutdown_rx,
            server,
            dispatcher,
            generator,
            grace: settings.shutdown_grace(),
            _staging: staging,
        })
    }

    /// Endpoint the server is bound to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Resolve once shutdown has been requested from anywhere
    pub async fn stopped(&self) {
        let mut rx = self.stopped.clone();
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Request shutdown, give each task the grace period, abort stragglers
    pub async fn shutdown(self) -> RunReport {
        self.shutdown.send_replace(true);
        let mut report = RunReport::default();

        match join_within(self.dispatcher, self.grace, "dispatcher").await {
            Some(Ok(stats)) => report.stats = Some(stats),
            Some(Err(e)) => error!("Dispatcher ended with error: {}", e),
            None => {}
        }
        if let Some(Err(e)) = join_within(self.server, self.grace, "server").await {
            error!("Server ended with error: {:#}", e);
        }

        if let Some(generator) = self.generator {
            generator.stop.store(true, Ordering::Release);
            match tokio::task::spawn_blocking(move || generator.handle.join()).await {
                Ok(Ok(conversions)) => report.conversions = Some(conversions),
                _ => warn!("Simulated analyzer thread panicked"),
            }
        }

        info!("Acquisition pipeline stopped");
        report
    }
}

/// Attach the segment, bind the listener, report readiness, then serve
async fn serve(
    segment: PathBuf,
    endpoint: String,
    busy_poll: Duration,
    ready: oneshot::Sender<Result<String>>,
    shutdown: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let setup = async {
        let staging = StagingBuffer::attach(&segment)
            .with_context(|| format!("Failed to attach shared segment {}", segment.display()))?;
        let listener = WireServer::listen(&endpoint)
            .await
            .with_context(|| format!("Failed to bind {}", endpoint))?;
        Ok::<_, anyhow::Error>((staging, listener))
    };

    let (staging, listener) = match setup.await {
        Ok((staging, listener)) => {
            let _ = ready.send(Ok(listener.endpoint().to_string()));
            (staging, listener)
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return Ok(());
        }
    };

    let server = WireServer::new(Arc::new(staging), busy_poll);
    let result = server.serve(listener, shutdown_rx).await;
    shutdown.send_replace(true);
    result.context("Server loop failed")
}

fn open_source(
    settings: &DaqSettings,
    resolution: event_record::Resolution,
) -> Result<(Box<dyn EventSource>, Option<Generator>)> {
    if settings.is_simulated() {
        let analyzer = Arc::new(SimulatedAnalyzer::new(resolution));
        let device = Device::open(Arc::clone(&analyzer), resolution)
            .context("Failed to open simulated capture device")?;
        let stop = Arc::new(AtomicBool::new(false));
        let handle = analyzer.spawn_generator(
            settings.sim_rate_hz,
            settings.sim_conversion(),
            Arc::clone(&stop),
        );
        Ok((Box::new(device), Some(Generator { stop, handle })))
    } else {
        let device = CharDevice::open(&settings.device)
            .with_context(|| format!("Failed to open capture device {}", settings.device))?;
        Ok((Box::new(device), None))
    }
}

/// Await a task for at most `grace`; abort it past that
async fn join_within<T>(mut handle: JoinHandle<T>, grace: Duration, name: &str) -> Option<T> {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!("{} task failed: {}", name, e);
            None
        }
        Err(_) => {
            warn!("{} did not stop within {:?}, aborting", name, grace);
            handle.abort();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wire_protocol::WireClient;

    fn settings(dir: &tempfile::TempDir) -> DaqSettings {
        DaqSettings {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            shm_dir: Some(dir.path().to_path_buf()),
            run_poll_ms: 2,
            idle_poll_ms: 5,
            sim_rate_hz: 2000.0,
            sim_conversion_us: 5,
            shutdown_grace_ms: 1000,
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_simulated_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir);
        let pipeline = Pipeline::start(&settings).await.unwrap();
        assert!(settings.segment_path().exists());

        let mut client = WireClient::connect(pipeline.endpoint()).await.unwrap();
        client.check().await.unwrap();
        client.start().await.unwrap();

        let mut events = Vec::new();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            events.extend(client.send().await.unwrap());
            if events.len() >= 10 {
                break;
            }
        }
        client.stop().await.unwrap();
        drop(client);

        assert!(events.len() >= 10);
        let mask = settings.resolution().unwrap().mask();
        assert!(events.iter().all(|e| e.value >= 2 && e.value <= mask));
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let report = pipeline.shutdown().await;
        let stats = report.stats.unwrap();
        assert_eq!(stats.received, stats.staged + stats.dropped);
        assert!(stats.staged >= events.len() as u64);
        assert!(report.conversions.unwrap() > 0);
        assert!(!settings.segment_path().exists());
    }

    #[tokio::test]
    async fn test_bad_device_aborts_startup() {
        let dir = tempfile::tempdir().unwrap();
        let settings = DaqSettings {
            device: "/nonexistent/mca0".to_string(),
            ..settings(&dir)
        };
        assert!(Pipeline::start(&settings).await.is_err());
        assert!(!settings.segment_path().exists());
    }

    #[tokio::test]
    async fn test_port_in_use_aborts_startup() {
        let dir = tempfile::tempdir().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let settings = DaqSettings {
            port: taken.local_addr().unwrap().port(),
            ..settings(&dir)
        };
        let err = Pipeline::start(&settings).await.err().unwrap();
        assert!(format!("{:#}", err).contains("Failed to bind"));
    }

    #[tokio::test]
    async fn test_stopped_resolves_on_shutdown_request() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::start(&settings(&dir)).await.unwrap();
        pipeline.shutdown.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), pipeline.stopped())
            .await
            .unwrap();
        let report = pipeline.shutdown().await;
        assert_eq!(report.stats.unwrap().received, 0);
    }
}
