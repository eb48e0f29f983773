//! Runs etcd as a child process and reports when it is ready to serve.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;
mod health;
mod output;
mod process;

pub use error::{Error, Result};
pub use process::EtcdProcess;

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use localkv_etcd::{Engine, EtcdConfig, Readiness, format_endpoints, readiness};
use reqwest::Client;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use url::Url;

/// How often etcd's health endpoint is polled while starting.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Options for configuring an `EtcdProcessEngine`.
#[derive(Clone, Debug)]
pub struct EtcdProcessEngineOptions {
    /// Directory containing the etcd binary, if it is not on the PATH.
    pub bin_dir: Option<PathBuf>,

    /// How often to poll the health endpoint while starting.
    pub health_check_interval: Duration,
}

/// Command line and probe settings for one etcd process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EtcdProcessConfig {
    /// Arguments passed to etcd.
    pub args: Vec<String>,

    /// Directory etcd stores data in.
    pub data_dir: PathBuf,

    /// URL polled to decide readiness.
    pub health_url: Option<Url>,

    /// Member name.
    pub name: String,
}

/// Engine that runs the etcd binary.
#[derive(Clone, Debug)]
pub struct EtcdProcessEngine {
    client: Client,
    executable: PathBuf,
    health_check_interval: Duration,
}

impl EtcdProcessEngine {
    /// Creates a new `EtcdProcessEngine`.
    ///
    /// # Errors
    ///
    /// Returns an error if the etcd binary cannot be found or the health check
    /// client cannot be built.
    pub fn new(
        EtcdProcessEngineOptions {
            bin_dir,
            health_check_interval,
        }: EtcdProcessEngineOptions,
    ) -> Result<Self> {
        let executable = match bin_dir {
            Some(dir) => {
                let executable = dir.join("etcd");
                if !executable.is_file() {
                    return Err(Error::BinaryNotFound);
                }
                executable
            }
            None => which::which("etcd").map_err(|_| Error::BinaryNotFound)?,
        };

        let client = Client::builder().timeout(HEALTH_CHECK_TIMEOUT).build()?;

        Ok(Self {
            client,
            executable,
            health_check_interval,
        })
    }

    /// Path of the etcd binary this engine runs.
    #[must_use]
    pub fn executable(&self) -> &std::path::Path {
        &self.executable
    }
}

#[async_trait]
impl Engine for EtcdProcessEngine {
    type Config = EtcdProcessConfig;
    type Handle = EtcdProcess;
    type Error = Error;

    fn configure(&self, config: &EtcdConfig) -> EtcdProcessConfig {
        let args = vec![
            "--name".to_string(),
            config.name().to_string(),
            "--data-dir".to_string(),
            config.data_dir().to_string_lossy().to_string(),
            "--listen-peer-urls".to_string(),
            format_endpoints(config.listen_peer_urls()),
            "--initial-advertise-peer-urls".to_string(),
            format_endpoints(config.advertise_peer_urls()),
            "--listen-client-urls".to_string(),
            format_endpoints(config.listen_client_urls()),
            "--advertise-client-urls".to_string(),
            format_endpoints(config.advertise_client_urls()),
        ];

        EtcdProcessConfig {
            args,
            data_dir: config.data_dir().to_path_buf(),
            health_url: config.listen_client_urls().first().map(health::health_url),
            name: config.name().to_string(),
        }
    }

    async fn start(&self, config: EtcdProcessConfig) -> Result<(EtcdProcess, Readiness)> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .map_err(|e| Error::Io("failed to create etcd data directory", e))?;

        let mut cmd = Command::new(&self.executable);
        cmd.args(&config.args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        debug!("spawning etcd: {:?}", cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Io("failed to spawn etcd", e))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::Spawn("no pid available for etcd process".to_string()))?;

        info!("etcd started with pid {}", pid);

        let shutdown_token = CancellationToken::new();
        let exited = CancellationToken::new();
        let task_tracker = TaskTracker::new();

        if let Some(stdout) = child.stdout.take() {
            task_tracker.spawn(process::forward_output(stdout));
        }

        if let Some(stderr) = child.stderr.take() {
            task_tracker.spawn(process::forward_output(stderr));
        }

        task_tracker.spawn(process::monitor(
            child,
            pid,
            shutdown_token.clone(),
            exited.clone(),
        ));

        let (notifier, readiness) = readiness();
        task_tracker.spawn(health::probe_readiness(
            self.client.clone(),
            config.health_url,
            self.health_check_interval,
            notifier,
            exited.clone(),
        ));

        task_tracker.close();

        let process = EtcdProcess {
            exited,
            name: config.name,
            pid,
            shutdown_token,
            task_tracker,
        };

        Ok((process, readiness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use localkv_etcd::EtcdConfigOptions;

    fn engine() -> EtcdProcessEngine {
        EtcdProcessEngine {
            client: Client::new(),
            executable: PathBuf::from("/usr/local/bin/etcd"),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
        }
    }

    #[test]
    fn test_configure_flags() {
        let config = EtcdConfig::new(EtcdConfigOptions {
            data_dir: PathBuf::from("/var/lib/localkube/etcd"),
            host_address: "192.168.99.100".to_string(),
        })
        .unwrap();

        let process_config = engine().configure(&config);

        assert_eq!(
            process_config.args,
            vec![
                "--name",
                "default",
                "--data-dir",
                "/var/lib/localkube/etcd",
                "--listen-peer-urls",
                "http://0.0.0.0:2380",
                "--initial-advertise-peer-urls",
                "http://127.0.0.1:2380",
                "--listen-client-urls",
                "http://0.0.0.0:2379",
                "--advertise-client-urls",
                "http://192.168.99.100:2379",
            ]
        );
        assert_eq!(
            process_config.health_url.unwrap().as_str(),
            "http://127.0.0.1:2379/health"
        );
    }

    #[test]
    fn test_configure_uses_overrides() {
        let config = EtcdConfig::new(EtcdConfigOptions {
            data_dir: PathBuf::from("/data"),
            host_address: "10.0.0.1".to_string(),
        })
        .unwrap()
        .with_override("name", "node-a")
        .unwrap()
        .with_override("listen-client-urls", "http://127.0.0.1:22379,http://10.0.0.1:22379")
        .unwrap();

        let process_config = engine().configure(&config);

        assert_eq!(process_config.name, "node-a");
        assert!(
            process_config
                .args
                .contains(&"http://127.0.0.1:22379,http://10.0.0.1:22379".to_string())
        );
        assert_eq!(
            process_config.health_url.unwrap().as_str(),
            "http://127.0.0.1:22379/health"
        );
    }

    #[test]
    fn test_missing_binary_in_bin_dir() {
        let dir = tempfile::tempdir().unwrap();

        let result = EtcdProcessEngine::new(EtcdProcessEngineOptions {
            bin_dir: Some(dir.path().to_path_buf()),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
        });

        assert!(matches!(result, Err(Error::BinaryNotFound)));
    }
}
