//! Forwarding of etcd's structured log output into tracing.

use serde::Deserialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct LogLine {
    level: String,
    msg: String,
}

/// Re-emits one line of etcd output at the level etcd logged it at.
#[allow(clippy::cognitive_complexity)]
pub(crate) fn forward_line(line: &str) {
    let Ok(LogLine { level, msg }) = serde_json::from_str::<LogLine>(line) else {
        // Banners and flag warnings are printed before the logger is set up.
        info!(target: "etcd", "{}", line);
        return;
    };

    match level.as_str() {
        "debug" => debug!(target: "etcd", "{}", msg),
        "info" => info!(target: "etcd", "{}", msg),
        "warn" => warn!(target: "etcd", "{}", msg),
        "error" | "dpanic" | "panic" | "fatal" => error!(target: "etcd", "{}", msg),
        _ => error!(target: "etcd", "{}", line),
    }
}
