//! Abstract interface for bootable services, and an ordered collection of
//! started services that can be unwound on shutdown.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use async_trait::async_trait;
use futures::future::select_all;
use tracing::{debug, info, warn};

/// Boxed error returned by bootable services.
pub type BootableError = Box<dyn std::error::Error + Send + Sync>;

/// Trait for bootable services.
#[async_trait]
pub trait Bootable
where
    Self: Send + Sync + 'static,
{
    /// Get the name of the bootable service.
    fn bootable_name(&self) -> &str;

    /// Start the bootable service.
    async fn start(&self) -> Result<(), BootableError>;

    /// Shutdown the bootable service.
    async fn shutdown(&self) -> Result<(), BootableError>;

    /// Wait for the bootable service to exit.
    async fn wait(&self);
}

/// Services that have been started, in start order.
///
/// Shutdown walks the collection in reverse so that a service is always
/// stopped before the services it was started on top of.
#[derive(Default)]
pub struct Bootables {
    services: Vec<Box<dyn Bootable>>,
}

impl Bootables {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a started service.
    pub fn add(&mut self, service: Box<dyn Bootable>) {
        debug!("tracking bootable '{}'", service.bootable_name());
        self.services.push(service);
    }

    /// Number of tracked services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no services are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Names of tracked services, in start order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.bootable_name()).collect()
    }

    /// Waits until any tracked service exits and returns its name.
    ///
    /// Returns `None` straight away if nothing is tracked.
    pub async fn wait_any(&self) -> Option<&str> {
        if self.services.is_empty() {
            return None;
        }

        let (_, index, _) = select_all(self.services.iter().map(|s| s.wait())).await;

        Some(self.services[index].bootable_name())
    }

    /// Shuts down every tracked service in reverse start order.
    ///
    /// Errors are logged and skipped: a failing service must not keep the
    /// ones started before it running.
    pub async fn shutdown_all(&mut self) {
        while let Some(service) = self.services.pop() {
            let name = service.bootable_name().to_string();

            match service.shutdown().await {
                Ok(()) => info!("{} shut down", name),
                Err(e) => warn!("failed to shut down {}: {}", name, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::{Mutex, Notify};

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        exited: Arc<Notify>,
        fail_shutdown: bool,
    }

    #[async_trait]
    impl Bootable for Recorder {
        fn bootable_name(&self) -> &str {
            self.name
        }

        async fn start(&self) -> Result<(), BootableError> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), BootableError> {
            self.log.lock().await.push(self.name);

            if self.fail_shutdown {
                return Err("refused".into());
            }

            Ok(())
        }

        async fn wait(&self) {
            self.exited.notified().await;
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
        fail_shutdown: bool,
    ) -> (Box<dyn Bootable>, Arc<Notify>) {
        let exited = Arc::new(Notify::new());
        let service = Recorder {
            name,
            log: log.clone(),
            exited: exited.clone(),
            fail_shutdown,
        };

        (Box::new(service), exited)
    }

    #[tokio::test]
    async fn test_shutdown_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bootables = Bootables::new();

        bootables.add(recorder("first", &log, false).0);
        bootables.add(recorder("second", &log, true).0);
        bootables.add(recorder("third", &log, false).0);
        assert_eq!(bootables.names(), vec!["first", "second", "third"]);

        bootables.shutdown_all().await;

        assert!(bootables.is_empty());
        assert_eq!(*log.lock().await, vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_wait_any_empty() {
        let bootables = Bootables::new();

        assert!(bootables.wait_any().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_any_reports_exited_service() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bootables = Bootables::new();

        let (first, _first_exit) = recorder("first", &log, false);
        let (second, second_exit) = recorder("second", &log, false);
        bootables.add(first);
        bootables.add(second);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            second_exit.notify_one();
        });

        assert_eq!(bootables.wait_any().await, Some("second"));
        assert_eq!(bootables.len(), 2);
    }
}
