//! The running etcd process and the tasks that supervise it.

use crate::output::forward_line;

use std::time::Duration;

use async_trait::async_trait;
use localkv_etcd::EngineHandle;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// How long etcd gets to exit after SIGTERM before it is killed.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Handle to a running etcd process.
pub struct EtcdProcess {
    pub(crate) exited: CancellationToken,
    pub(crate) name: String,
    pub(crate) pid: u32,
    pub(crate) shutdown_token: CancellationToken,
    pub(crate) task_tracker: TaskTracker,
}

impl EtcdProcess {
    /// Returns the process ID.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the process has exited.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exited.is_cancelled()
    }
}

impl std::fmt::Debug for EtcdProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdProcess")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("exited", &self.exited.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EngineHandle for EtcdProcess {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn request_stop(&self) {
        if !self.shutdown_token.is_cancelled() {
            debug!("stop requested for etcd (pid {})", self.pid);
        }

        self.shutdown_token.cancel();
    }

    async fn stopped(&self) {
        self.exited.cancelled().await;
        self.task_tracker.wait().await;
    }
}

/// Forwards every line read from `reader` to tracing.
pub(crate) async fn forward_output<R>(reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        forward_line(&line);
    }
}

/// Waits for the process to exit, terminating it if a stop is requested first.
///
/// `exited` is cancelled once the process is gone, whichever way it went.
pub(crate) async fn monitor(
    mut child: Child,
    pid: u32,
    shutdown_token: CancellationToken,
    exited: CancellationToken,
) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) if status.success() => info!("etcd exited with status: {}", status),
                Ok(status) => error!("etcd exited with non-zero status: {}", status),
                Err(e) => error!("failed to wait for etcd: {}", e),
            }
        }
        () = shutdown_token.cancelled() => {
            info!("shutting down etcd (pid {})...", pid);
            terminate(&mut child, pid).await;
        }
    }

    exited.cancel();
}

async fn terminate(child: &mut Child, pid: u32) {
    match i32::try_from(pid) {
        Ok(raw_pid) => {
            if let Err(e) = signal::kill(Pid::from_raw(raw_pid), Signal::SIGTERM) {
                warn!("failed to send SIGTERM to etcd: {}", e);
            }
        }
        Err(_) => warn!("pid {} out of range, skipping SIGTERM", pid),
    }

    match tokio::time::timeout(STOP_GRACE_PERIOD, child.wait()).await {
        Ok(Ok(status)) => info!("etcd exited with status: {}", status),
        Ok(Err(e)) => error!("failed to wait for etcd: {}", e),
        Err(_) => {
            error!("timed out waiting for etcd to exit, killing...");
            if let Err(e) = child.kill().await {
                error!("failed to kill etcd: {}", e);
            }
        }
    }
}
