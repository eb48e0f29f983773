//! Configures and runs an embedded etcd node, waiting a bounded time for it to
//! become ready.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod config;
mod engine;
mod error;

pub use config::{
    DEFAULT_CLIENT_PORT, DEFAULT_NAME, DEFAULT_PEER_PORT, ETCD_NAME, EtcdConfig,
    EtcdConfigOptions, format_endpoint, format_endpoints,
};
pub use engine::{Engine, EngineHandle, Readiness, ReadinessNotifier, readiness};
pub use error::{Error, Result};

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use localkv_bootable::{Bootable, BootableError};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How long `start` waits for etcd to report readiness.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Where an `EtcdServer` is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    /// Built but not started.
    Configured,

    /// Waiting for the engine to become ready.
    Starting,

    /// Serving.
    Ready,

    /// Stopped, or failed to start.
    Stopped,
}

enum State<H> {
    Configured,
    Starting {
        handle: Option<Arc<H>>,
        stop_requested: bool,
    },
    Ready(Arc<H>),
    Stopped(Option<Arc<H>>),
}

impl<H> State<H> {
    const fn as_server_state(&self) -> ServerState {
        match self {
            Self::Configured => ServerState::Configured,
            Self::Starting { .. } => ServerState::Starting,
            Self::Ready(_) => ServerState::Ready,
            Self::Stopped(_) => ServerState::Stopped,
        }
    }

    fn handle(&self) -> Option<Arc<H>> {
        match self {
            Self::Configured => None,
            Self::Starting { handle, .. } | Self::Stopped(handle) => handle.clone(),
            Self::Ready(handle) => Some(handle.clone()),
        }
    }
}

/// Options for configuring an `EtcdServer`.
pub struct EtcdServerOptions<E>
where
    E: Engine,
{
    /// The configuration to start etcd with.
    pub config: EtcdConfig,

    /// The engine that runs etcd.
    pub engine: E,

    /// How long to wait for readiness before giving up.
    pub startup_timeout: Duration,
}

/// Runs a single embedded etcd node.
///
/// A server is single-shot: once started (successfully or not) it can only be
/// stopped. Clones share the same underlying node.
pub struct EtcdServer<E>
where
    E: Engine,
{
    config: Arc<EtcdConfig>,
    engine: Arc<E>,
    identity: Arc<ArcSwap<String>>,
    startup_timeout: Duration,
    state: Arc<Mutex<State<E::Handle>>>,
}

impl<E> Clone for EtcdServer<E>
where
    E: Engine,
{
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            engine: self.engine.clone(),
            identity: self.identity.clone(),
            startup_timeout: self.startup_timeout,
            state: self.state.clone(),
        }
    }
}

impl<E> EtcdServer<E>
where
    E: Engine,
{
    /// Creates a new `EtcdServer` with the specified options.
    #[must_use]
    pub fn new(
        EtcdServerOptions {
            config,
            engine,
            startup_timeout,
        }: EtcdServerOptions<E>,
    ) -> Self {
        let identity = Arc::new(ArcSwap::from_pointee(config.name().to_string()));

        Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            identity,
            startup_timeout,
            state: Arc::new(Mutex::new(State::Configured)),
        }
    }

    /// The configuration the server was built with.
    #[must_use]
    pub fn config(&self) -> &EtcdConfig {
        &self.config
    }

    /// The member name: the configured one until etcd is ready, then the one
    /// the engine reports.
    #[must_use]
    pub fn name(&self) -> String {
        self.identity.load().as_ref().clone()
    }

    /// Where the server is in its lifecycle.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state.lock().as_server_state()
    }

    /// Starts etcd and waits until it is ready.
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyStarted` if called more than once. Otherwise any
    /// error is fatal (see `Error::is_fatal`): the engine failed to launch,
    /// reported a startup failure, or did not become ready within the startup
    /// timeout. In the last two cases a stop has already been requested.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, State::Configured) {
                return Err(Error::AlreadyStarted);
            }

            *state = State::Starting {
                handle: None,
                stop_requested: false,
            };
        }

        debug!("starting etcd...");

        let engine_config = self.engine.configure(&self.config);
        let (handle, readiness) = match self.engine.start(engine_config).await {
            Ok(started) => started,
            Err(e) => {
                *self.state.lock() = State::Stopped(None);
                error!("error starting up etcd: {}", e);

                return Err(Error::EngineStart(Box::new(e)));
            }
        };

        let handle = Arc::new(handle);
        let stop_requested = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Starting {
                    handle: slot,
                    stop_requested,
                } => {
                    *slot = Some(handle.clone());
                    *stop_requested
                }
                _ => false,
            }
        };

        // A stop that arrived while the engine was launching is forwarded now.
        if stop_requested {
            handle.request_stop();
        }

        let started_at = Instant::now();

        tokio::select! {
            outcome = readiness.wait() => match outcome {
                Ok(()) => self.finish_start(handle, started_at),
                Err(reason) => {
                    self.abort_start(&handle);
                    error!("etcd failed to start: {}", reason);

                    Err(Error::StartupFailed {
                        component: ETCD_NAME,
                        reason,
                    })
                }
            },
            () = tokio::time::sleep(self.startup_timeout) => {
                self.abort_start(&handle);

                let elapsed = started_at.elapsed();
                error!("etcd took too long to start ({:?})", elapsed);

                Err(Error::ReadinessTimeout {
                    component: ETCD_NAME,
                    elapsed,
                })
            }
        }
    }

    /// Requests etcd to stop.
    ///
    /// Does nothing if etcd was never started or is already stopped, and does
    /// not wait for the engine to release its resources.
    pub fn stop(&self) {
        let to_stop = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Configured => {
                    debug!("etcd never started, nothing to stop");
                    None
                }
                State::Starting {
                    handle,
                    stop_requested,
                } => {
                    if *stop_requested {
                        None
                    } else {
                        *stop_requested = true;
                        handle.clone()
                    }
                }
                State::Ready(handle) => {
                    let handle = handle.clone();
                    *state = State::Stopped(Some(handle.clone()));
                    Some(handle)
                }
                State::Stopped(_) => None,
            }
        };

        if let Some(handle) = to_stop {
            info!("stopping etcd...");
            handle.request_stop();
        }
    }

    fn finish_start(&self, handle: Arc<E::Handle>, started_at: Instant) -> Result<()> {
        let mut state = self.state.lock();

        if let State::Starting {
            stop_requested: true,
            ..
        } = *state
        {
            *state = State::Stopped(Some(handle));
            warn!("etcd became ready after a stop was requested");

            return Err(Error::StartupFailed {
                component: ETCD_NAME,
                reason: "stop requested while starting".to_string(),
            });
        }

        self.identity.store(Arc::new(handle.name()));
        *state = State::Ready(handle);
        drop(state);

        info!("etcd server is ready ({:?})", started_at.elapsed());

        Ok(())
    }

    fn abort_start(&self, handle: &Arc<E::Handle>) {
        let already_requested = {
            let mut state = self.state.lock();
            let already_requested = matches!(
                *state,
                State::Starting {
                    stop_requested: true,
                    ..
                }
            );
            *state = State::Stopped(Some(handle.clone()));

            already_requested
        };

        if !already_requested {
            handle.request_stop();
        }
    }
}

#[async_trait]
impl<E> Bootable for EtcdServer<E>
where
    E: Engine,
{
    fn bootable_name(&self) -> &str {
        ETCD_NAME
    }

    async fn start(&self) -> std::result::Result<(), BootableError> {
        Self::start(self).await.map_err(Into::into)
    }

    async fn shutdown(&self) -> std::result::Result<(), BootableError> {
        self.stop();
        Bootable::wait(self).await;

        Ok(())
    }

    async fn wait(&self) {
        let handle = self.state.lock().handle();

        if let Some(handle) = handle {
            handle.stopped().await;
        }
    }
}
