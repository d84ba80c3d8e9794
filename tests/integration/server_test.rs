// tests/integration/server_test.rs

//! The reference server entry point: values in, responses printed, clean exit.

use super::test_helpers::{FakeBackend, closed_port, config_for, init_tracing};
use spinelbridge::server;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_serves_values_and_shuts_down() {
    init_tracing();
    let backend = FakeBackend::start();
    let mut config = config_for(backend.addr());
    config.metrics.enabled = true;
    config.metrics.port = closed_port();

    server::run(config, vec!["alpha".to_string(), "beta".to_string()])
        .await
        .expect("server run completes");

    assert_eq!(backend.connections(), 1);
    assert_eq!(backend.commands(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_fails_when_backend_cannot_be_resolved() {
    init_tracing();
    let mut config = spinelbridge::config::Config::default();
    config.backend.host = "backend.invalid".to_string();
    let err = server::run(config, vec!["x".to_string()]).await.unwrap_err();
    assert!(err.to_string().contains("initialize"));
}
