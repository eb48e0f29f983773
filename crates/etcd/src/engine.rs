//! The boundary between the lifecycle manager and the store engine.

use crate::config::EtcdConfig;

use async_trait::async_trait;
use tokio::sync::oneshot;

/// A store engine the lifecycle manager can drive.
#[async_trait]
pub trait Engine
where
    Self: Send + Sync + 'static,
{
    /// Engine specific form of the configuration.
    type Config: Send;

    /// Handle to a running engine instance.
    type Handle: EngineHandle;

    /// Error returned when the engine cannot be launched at all.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Translates the configuration into the engine's own form. Performs no I/O.
    fn configure(&self, config: &EtcdConfig) -> Self::Config;

    /// Launches the engine.
    ///
    /// Returns as soon as the engine is running, before it is ready to serve.
    /// Readiness is reported through the returned `Readiness`.
    async fn start(&self, config: Self::Config) -> Result<(Self::Handle, Readiness), Self::Error>;
}

/// A running engine instance.
#[async_trait]
pub trait EngineHandle
where
    Self: Send + Sync + 'static,
{
    /// The member name the engine is running under.
    fn name(&self) -> String;

    /// Asks the engine to stop. Does not wait, and may be called repeatedly.
    fn request_stop(&self);

    /// Resolves once the engine has exited.
    async fn stopped(&self);
}

#[derive(Debug)]
enum ReadinessEvent {
    Failed(String),
    Ready,
}

/// Creates a connected readiness notifier and waiter.
#[must_use]
pub fn readiness() -> (ReadinessNotifier, Readiness) {
    let (tx, rx) = oneshot::channel();

    (ReadinessNotifier { tx }, Readiness { rx })
}

/// Engine side of a readiness signal. Fires at most once.
#[derive(Debug)]
pub struct ReadinessNotifier {
    tx: oneshot::Sender<ReadinessEvent>,
}

impl ReadinessNotifier {
    /// Reports that the engine can serve requests.
    pub fn notify_ready(self) {
        // The waiter may have given up already.
        let _ = self.tx.send(ReadinessEvent::Ready);
    }

    /// Reports that the engine will never become ready.
    pub fn notify_failed(self, reason: impl Into<String>) {
        let _ = self.tx.send(ReadinessEvent::Failed(reason.into()));
    }

    /// Whether the waiting side has been dropped.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Lifecycle side of a readiness signal.
#[derive(Debug)]
pub struct Readiness {
    rx: oneshot::Receiver<ReadinessEvent>,
}

impl Readiness {
    /// Waits for the engine to report.
    ///
    /// # Errors
    ///
    /// Returns the engine's reason if it reported failure, or a generic reason
    /// if the notifier was dropped without reporting.
    pub async fn wait(self) -> Result<(), String> {
        match self.rx.await {
            Ok(ReadinessEvent::Ready) => Ok(()),
            Ok(ReadinessEvent::Failed(reason)) => Err(reason),
            Err(_) => Err("engine exited before signalling readiness".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready() {
        let (notifier, readiness) = readiness();
        notifier.notify_ready();

        assert_eq!(readiness.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_failed() {
        let (notifier, readiness) = readiness();
        notifier.notify_failed("data dir locked");

        assert_eq!(readiness.wait().await, Err("data dir locked".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_notifier_is_failure() {
        let (notifier, readiness) = readiness();
        drop(notifier);

        assert!(readiness.wait().await.is_err());
    }

    #[test]
    fn test_abandoned_waiter() {
        let (notifier, readiness) = readiness();
        assert!(!notifier.is_abandoned());

        drop(readiness);
        assert!(notifier.is_abandoned());

        // Late signals are discarded.
        notifier.notify_ready();
    }
}
