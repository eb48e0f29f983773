//! Library for running a single localkv etcd node.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;
mod extra_config;

pub use error::{Error, Result};
pub use extra_config::{ExtraConfig, ExtraConfigs};

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use localkv_bootable::{Bootable, Bootables};
use localkv_etcd::{Engine, EtcdConfig, EtcdConfigOptions, EtcdServer, EtcdServerOptions};
use localkv_etcd_process::{
    DEFAULT_HEALTH_CHECK_INTERVAL, EtcdProcessEngine, EtcdProcessEngineOptions,
};
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};

/// Command line arguments for a local node.
#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Address advertised to etcd clients
    #[arg(long, env = "LOCALKV_HOST_ADDRESS", default_value = "127.0.0.1")]
    pub host_address: String,

    /// Directory etcd keeps its data in
    #[arg(long, env = "LOCALKV_DATA_DIR", default_value = "/var/lib/localkube/etcd")]
    pub data_dir: PathBuf,

    /// Directory containing the etcd binary (defaults to searching PATH)
    #[arg(long, env = "LOCALKV_ETCD_BIN_DIR")]
    pub etcd_bin_dir: Option<PathBuf>,

    /// Seconds to wait for etcd to become ready
    #[arg(long, default_value_t = 60)]
    pub startup_timeout_secs: u64,

    /// Component override of the form component.key=value (repeatable)
    #[arg(long = "extra-config", value_name = "COMPONENT.KEY=VALUE")]
    pub extra_config: Vec<String>,

    /// Log level
    #[arg(long, env = "LOCALKV_LOG_LEVEL", default_value = "info")]
    pub log_level: Level,
}

/// Runs etcd from the etcd binary until `shutdown_token` is cancelled.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the binary cannot be
/// found, etcd fails to become ready, or etcd exits on its own.
pub async fn run_node(args: Args, shutdown_token: CancellationToken) -> Result<()> {
    let mut extra_configs = ExtraConfigs::parse(&args.extra_config)?;

    let config = extra_configs.apply(EtcdConfig::new(EtcdConfigOptions {
        data_dir: args.data_dir,
        host_address: args.host_address,
    })?)?;

    for extra in extra_configs.unclaimed() {
        warn!(
            "ignoring extra config for unknown component '{}': {}={}",
            extra.component, extra.key, extra.value
        );
    }

    let engine = EtcdProcessEngine::new(EtcdProcessEngineOptions {
        bin_dir: args.etcd_bin_dir,
        health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
    })?;

    info!("using etcd binary at {}", engine.executable().display());

    run_etcd(
        config,
        engine,
        Duration::from_secs(args.startup_timeout_secs),
        shutdown_token,
    )
    .await
}

/// Starts etcd on `engine` and keeps it running until `shutdown_token` is
/// cancelled or etcd exits.
///
/// # Errors
///
/// Returns the startup error if etcd does not become ready, or
/// `Error::ServiceExited` if it stops on its own.
pub async fn run_etcd<E>(
    config: EtcdConfig,
    engine: E,
    startup_timeout: Duration,
    shutdown_token: CancellationToken,
) -> Result<()>
where
    E: Engine,
{
    let etcd = EtcdServer::new(EtcdServerOptions {
        config,
        engine,
        startup_timeout,
    });

    let mut bootables = Bootables::new();

    if let Err(e) = etcd.start().await {
        error!("failed to start etcd: {}", e);
        // start has already asked etcd to stop; let it release the data dir.
        etcd.wait().await;

        return Err(e.into());
    }

    info!("etcd ready as member '{}'", etcd.name());
    bootables.add(Box::new(etcd));

    let result = tokio::select! {
        () = shutdown_token.cancelled() => {
            info!("shutting down");
            Ok(())
        }
        exited = bootables.wait_any() => {
            let name = exited.unwrap_or("unknown").to_string();
            error!("{} exited", name);
            Err(Error::ServiceExited(name))
        }
    };

    bootables.shutdown_all().await;

    result
}
