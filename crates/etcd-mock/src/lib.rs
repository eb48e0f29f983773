//! Scriptable etcd engine for testing the lifecycle manager without a real
//! etcd binary.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use localkv_etcd::{
    Engine, EngineHandle, EtcdConfig, Readiness, ReadinessNotifier, format_endpoints, readiness,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How a `MockEngine` behaves once started.
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Report readiness after the given delay.
    ReadyAfter(Duration),

    /// Report a startup failure after the given delay.
    FailAfter(Duration, String),

    /// Never report anything until stopped.
    NeverReady,

    /// Fail the `start` call itself.
    RefuseStart(String),
}

/// The configuration the mock engine was started with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockEngineConfig {
    /// Advertised client URLs, comma separated.
    pub advertise_client_urls: String,

    /// Data directory.
    pub data_dir: PathBuf,

    /// Member name.
    pub name: String,
}

#[derive(Debug, Default)]
struct Stats {
    last_config: Mutex<Option<MockEngineConfig>>,
    start_calls: AtomicUsize,
    stop_requests: AtomicUsize,
}

/// Mock implementation of the etcd engine.
#[derive(Clone, Debug)]
pub struct MockEngine {
    assigned_name: Option<String>,
    behavior: MockBehavior,
    start_delay: Duration,
    stats: Arc<Stats>,
}

impl MockEngine {
    /// Creates a mock engine with the given behavior.
    #[must_use]
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            assigned_name: None,
            behavior,
            start_delay: Duration::ZERO,
            stats: Arc::new(Stats::default()),
        }
    }

    /// Makes the engine run under `name` rather than the configured name.
    #[must_use]
    pub fn with_assigned_name(mut self, name: impl Into<String>) -> Self {
        self.assigned_name = Some(name.into());
        self
    }

    /// Makes `start` itself take `delay` before returning a handle.
    #[must_use]
    pub const fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// The configuration passed to the last `start`.
    #[must_use]
    pub fn last_config(&self) -> Option<MockEngineConfig> {
        self.stats.last_config.lock().clone()
    }

    /// How many times `start` has been called.
    #[must_use]
    pub fn start_calls(&self) -> usize {
        self.stats.start_calls.load(Ordering::SeqCst)
    }

    /// How many stop requests handles from this engine have received.
    #[must_use]
    pub fn stop_requests(&self) -> usize {
        self.stats.stop_requests.load(Ordering::SeqCst)
    }

    async fn drive(behavior: MockBehavior, notifier: ReadinessNotifier, stop: CancellationToken) {
        match behavior {
            MockBehavior::ReadyAfter(delay) => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => notifier.notify_ready(),
                    () = stop.cancelled() => notifier.notify_failed("stopped before ready"),
                }
            }
            MockBehavior::FailAfter(delay, reason) => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => notifier.notify_failed(reason),
                    () = stop.cancelled() => notifier.notify_failed("stopped before ready"),
                }
            }
            MockBehavior::NeverReady | MockBehavior::RefuseStart(_) => {
                stop.cancelled().await;
                drop(notifier);
            }
        }
    }
}

#[async_trait]
impl Engine for MockEngine {
    type Config = MockEngineConfig;
    type Handle = MockHandle;
    type Error = Error;

    fn configure(&self, config: &EtcdConfig) -> MockEngineConfig {
        MockEngineConfig {
            advertise_client_urls: format_endpoints(config.advertise_client_urls()),
            data_dir: config.data_dir().to_path_buf(),
            name: config.name().to_string(),
        }
    }

    async fn start(&self, config: MockEngineConfig) -> Result<(MockHandle, Readiness), Error> {
        self.stats.start_calls.fetch_add(1, Ordering::SeqCst);
        self.stats.last_config.lock().replace(config.clone());

        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }

        if let MockBehavior::RefuseStart(reason) = &self.behavior {
            return Err(Error::Refused(reason.clone()));
        }

        let (notifier, readiness) = readiness();
        let stop = CancellationToken::new();

        tokio::spawn(Self::drive(self.behavior.clone(), notifier, stop.clone()));

        let handle = MockHandle {
            name: self.assigned_name.clone().unwrap_or(config.name),
            stats: self.stats.clone(),
            stop,
        };

        Ok((handle, readiness))
    }
}

/// Handle to a running mock engine.
#[derive(Debug)]
pub struct MockHandle {
    name: String,
    stats: Arc<Stats>,
    stop: CancellationToken,
}

#[async_trait]
impl EngineHandle for MockHandle {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn request_stop(&self) {
        debug!("mock engine '{}' asked to stop", self.name);
        self.stats.stop_requests.fetch_add(1, Ordering::SeqCst);
        self.stop.cancel();
    }

    async fn stopped(&self) {
        self.stop.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use localkv_etcd::EtcdConfigOptions;

    fn config() -> EtcdConfig {
        EtcdConfig::new(EtcdConfigOptions {
            data_dir: PathBuf::from("/tmp/etcd"),
            host_address: "10.1.1.1".to_string(),
        })
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_delay() {
        let engine = MockEngine::new(MockBehavior::ReadyAfter(Duration::from_secs(1)));
        let (handle, readiness) = engine.start(engine.configure(&config())).await.unwrap();

        assert_eq!(readiness.wait().await, Ok(()));
        assert_eq!(handle.name(), "default");
        assert_eq!(engine.start_calls(), 1);
        assert_eq!(
            engine.last_config().unwrap().advertise_client_urls,
            "http://10.1.1.1:2379"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_delay() {
        let engine = MockEngine::new(MockBehavior::ReadyAfter(Duration::ZERO))
            .with_start_delay(Duration::from_secs(3));

        let started_at = tokio::time::Instant::now();
        let (_handle, readiness) = engine.start(engine.configure(&config())).await.unwrap();

        assert!(started_at.elapsed() >= Duration::from_secs(3));
        assert_eq!(readiness.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_refuse_start() {
        let engine = MockEngine::new(MockBehavior::RefuseStart("port in use".to_string()));

        assert!(engine.start(engine.configure(&config())).await.is_err());
        assert_eq!(engine.start_calls(), 1);
    }

    #[tokio::test]
    async fn test_stop_releases_never_ready() {
        let engine = MockEngine::new(MockBehavior::NeverReady).with_assigned_name("node-1");
        let (handle, readiness) = engine.start(engine.configure(&config())).await.unwrap();

        handle.request_stop();
        handle.stopped().await;

        assert!(readiness.wait().await.is_err());
        assert_eq!(handle.name(), "node-1");
        assert_eq!(engine.stop_requests(), 1);
    }
}
