use std::time::Duration;

use studio_chat_runtime::{shutdown_signal, telemetry};

#[test]
fn init_tracing_installs_once_and_rejects_a_second_subscriber() {
    telemetry::init_tracing_with_default("debug").expect("first install should succeed");

    let error = telemetry::init_tracing().expect_err("global subscriber is already set");
    assert!(
        error.to_string().contains("failed to set tracing subscriber"),
        "unexpected error: {error}"
    );
}

#[tokio::test]
async fn shutdown_signal_waits_for_ctrl_c() {
    let outcome = tokio::time::timeout(Duration::from_millis(50), shutdown_signal()).await;
    assert!(outcome.is_err(), "shutdown should not resolve without a signal");
}
