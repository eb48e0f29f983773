//! Runs the node composition against the mock engine.

use std::path::PathBuf;
use std::time::Duration;

use localkv_etcd::{DEFAULT_STARTUP_TIMEOUT, EtcdConfig, EtcdConfigOptions};
use localkv_etcd_mock::{MockBehavior, MockEngine};
use localkv_local::{Error, ExtraConfigs, run_etcd};
use tokio_util::sync::CancellationToken;

fn config(extra: &[&str]) -> EtcdConfig {
    let base = EtcdConfig::new(EtcdConfigOptions {
        data_dir: PathBuf::from("/var/lib/localkube/etcd"),
        host_address: "192.168.99.100".to_string(),
    })
    .unwrap();

    ExtraConfigs::parse(extra).unwrap().apply(base).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_runs_until_shutdown() {
    let engine = MockEngine::new(MockBehavior::ReadyAfter(Duration::from_secs(2)));
    let shutdown_token = CancellationToken::new();

    let run = tokio::spawn(run_etcd(
        config(&["etcd.name=minikube"]),
        engine.clone(),
        DEFAULT_STARTUP_TIMEOUT,
        shutdown_token.clone(),
    ));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(engine.stop_requests(), 0);
    assert_eq!(engine.last_config().unwrap().name, "minikube");

    shutdown_token.cancel();

    run.await.unwrap().unwrap();
    assert_eq!(engine.stop_requests(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_fatal() {
    let engine = MockEngine::new(MockBehavior::NeverReady);

    let err = run_etcd(
        config(&[]),
        engine.clone(),
        DEFAULT_STARTUP_TIMEOUT,
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(
        err,
        Error::Etcd(localkv_etcd::Error::ReadinessTimeout { .. })
    ));
    assert_eq!(engine.stop_requests(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_startup_failure_is_fatal() {
    let engine = MockEngine::new(MockBehavior::FailAfter(
        Duration::from_millis(100),
        "member already bootstrapped".to_string(),
    ));

    let err = run_etcd(
        config(&[]),
        engine,
        DEFAULT_STARTUP_TIMEOUT,
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(err.is_fatal());
    assert!(err.to_string().contains("member already bootstrapped"));
}

#[tokio::test]
async fn test_bad_extra_config_is_not_fatal() {
    let err = ExtraConfigs::parse(&["etcd.name"]).unwrap_err();

    assert!(!err.is_fatal());
}
