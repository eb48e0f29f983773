//! Readiness probing against etcd's `/health` endpoint.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use localkv_etcd::ReadinessNotifier;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::{Host, Url};

#[derive(Debug, Deserialize)]
struct HealthResponse {
    health: String,
}

/// Derives the URL to probe from the URL etcd listens on for clients.
///
/// Wildcard listeners are probed over loopback.
pub(crate) fn health_url(listen_client_url: &Url) -> Url {
    let mut url = listen_client_url.clone();

    let loopback = match url.host() {
        Some(Host::Ipv4(ip)) if ip.is_unspecified() => Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        Some(Host::Ipv6(ip)) if ip.is_unspecified() => Some(IpAddr::V6(Ipv6Addr::LOCALHOST)),
        _ => None,
    };

    if let Some(loopback) = loopback {
        // Only fails for URLs without a host, which never get this far.
        let _ = url.set_ip_host(loopback);
    }

    url.set_path("/health");
    url.set_query(None);

    url
}

/// Polls `url` until etcd reports healthy, then notifies readiness.
///
/// Reports failure instead if the process exits first, and gives up quietly
/// once nobody is waiting any more.
pub(crate) async fn probe_readiness(
    client: Client,
    url: Option<Url>,
    interval: Duration,
    notifier: ReadinessNotifier,
    exited: CancellationToken,
) {
    let Some(url) = url else {
        notifier.notify_failed("no client URL to probe for readiness");
        return;
    };

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            () = exited.cancelled() => {
                notifier.notify_failed("etcd exited before becoming healthy");
                return;
            }
            _ = ticker.tick() => {}
        }

        if notifier.is_abandoned() {
            debug!("readiness no longer awaited, stopping probe");
            return;
        }

        if is_healthy(&client, &url).await {
            debug!("etcd reports healthy at {}", url);
            notifier.notify_ready();
            return;
        }
    }
}

async fn is_healthy(client: &Client, url: &Url) -> bool {
    match client.get(url.clone()).send().await {
        Ok(response) if response.status().is_success() => response
            .json::<HealthResponse>()
            .await
            .is_ok_and(|body| body.health == "true"),
        Ok(response) => {
            trace!("health check returned {}", response.status());
            false
        }
        Err(e) => {
            trace!("health check failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_listener_probed_on_loopback() {
        let url = health_url(&Url::parse("http://0.0.0.0:2379").unwrap());

        assert_eq!(url.as_str(), "http://127.0.0.1:2379/health");
    }

    #[test]
    fn test_ipv6_wildcard_probed_on_loopback() {
        let url = health_url(&Url::parse("http://[::]:2379").unwrap());

        assert_eq!(url.as_str(), "http://[::1]:2379/health");
    }

    #[test]
    fn test_specific_listener_kept() {
        let url = health_url(&Url::parse("https://10.0.0.5:12379/ignored?x=1").unwrap());

        assert_eq!(url.as_str(), "https://10.0.0.5:12379/health");
    }

    #[tokio::test]
    async fn test_missing_url_fails_readiness() {
        let (notifier, readiness) = localkv_etcd::readiness();

        probe_readiness(
            Client::new(),
            None,
            Duration::from_millis(10),
            notifier,
            CancellationToken::new(),
        )
        .await;

        assert!(readiness.wait().await.is_err());
    }

    #[tokio::test]
    async fn test_exit_fails_readiness() {
        let (notifier, readiness) = localkv_etcd::readiness();
        let exited = CancellationToken::new();
        exited.cancel();

        probe_readiness(
            Client::new(),
            Some(Url::parse("http://127.0.0.1:1/health").unwrap()),
            Duration::from_millis(10),
            notifier,
            exited,
        )
        .await;

        assert_eq!(
            readiness.wait().await,
            Err("etcd exited before becoming healthy".to_string())
        );
    }
}
