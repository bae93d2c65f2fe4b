mod support;

use llm_failover::{
    topics, CircuitState, FailoverError, FailoverEvent, LlmRequest, ProviderStatus,
};
use std::time::Duration;
use support::{build_manager, network_error, test_config, Behavior, ScriptedAdapter};

#[tokio::test]
async fn shutdown_fails_fast_and_is_idempotent() {
    let adapter = ScriptedAdapter::new("only");
    let manager = build_manager(
        test_config().with_health_checks(Duration::from_millis(50), Duration::from_millis(20)),
        &[adapter.clone()],
    );
    manager.execute(&LlmRequest::new("q")).await.expect("answered");

    manager.shutdown().await;
    manager.shutdown().await;
    assert!(manager.is_shutting_down());
    assert!(manager.system_health().shutting_down);

    let err = manager.execute(&LlmRequest::new("q")).await.expect_err("shut down");
    assert!(matches!(err, FailoverError::ShuttingDown));
    assert!(matches!(
        manager.check_health_now().await,
        Err(FailoverError::ShuttingDown)
    ));
    assert_eq!(adapter.calls(), 1);

    // health task is gone
    let checks = adapter.health_checks();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(adapter.health_checks(), checks);
}

#[tokio::test]
async fn background_health_check_closes_recovered_circuit() {
    let primary = ScriptedAdapter::failing("primary", network_error());
    primary.set_healthy(false);
    let backup = ScriptedAdapter::new("backup");
    let manager = build_manager(
        test_config()
            .with_failover_threshold(1)
            .with_circuit_breaker_timeout(Duration::from_secs(60))
            .with_health_checks(Duration::from_millis(50), Duration::from_millis(20)),
        &[primary.clone(), backup.clone()],
    );
    let mut closed = manager.subscribe(topics::CIRCUIT_CLOSED);

    manager.execute(&LlmRequest::new("q")).await.expect("backup answers");
    tokio::time::sleep(Duration::from_millis(120)).await;
    let report = &manager.system_health().providers["primary"];
    assert_eq!(report.circuit_state, CircuitState::Open);
    assert_eq!(report.status, ProviderStatus::Unhealthy);
    assert!(primary.health_checks() > 0);

    primary.set_healthy(true);
    primary.set_behavior(Behavior::Succeed);
    let event = tokio::time::timeout(Duration::from_secs(2), closed.recv())
        .await
        .expect("closed within a few ticks")
        .expect("event");
    assert!(matches!(
        event.payload,
        FailoverEvent::CircuitClosed { ref provider } if provider == "primary"
    ));

    let report = &manager.system_health().providers["primary"];
    assert_eq!(report.circuit_state, CircuitState::Closed);
    assert_eq!(report.consecutive_failures, 0);
    assert!(report.ms_since_health_check.is_some());

    manager.shutdown().await;
}

#[tokio::test]
async fn on_demand_health_sweep_reports_each_provider() {
    let up = ScriptedAdapter::new("up");
    let down = ScriptedAdapter::new("down");
    down.set_healthy(false);
    let manager = build_manager(test_config(), &[up.clone(), down.clone()]);

    let outcomes = manager.check_health_now().await.expect("sweep");
    assert_eq!(outcomes.len(), 2);
    let up_outcome = outcomes.iter().find(|o| o.provider == "up").expect("up");
    let down_outcome = outcomes.iter().find(|o| o.provider == "down").expect("down");
    assert!(up_outcome.healthy);
    assert!(up_outcome.error.is_none());
    assert!(!down_outcome.healthy);
    assert!(down_outcome.error.is_some());

    let health = manager.system_health();
    assert_eq!(health.providers["up"].status, ProviderStatus::Healthy);
    assert_eq!(health.providers["down"].status, ProviderStatus::Unhealthy);
    // an unhealthy probe never opens the circuit by itself
    assert_eq!(health.providers["down"].circuit_state, CircuitState::Closed);
}

#[tokio::test]
async fn operator_reset_reopens_traffic() {
    let primary = ScriptedAdapter::failing("primary", network_error());
    let backup = ScriptedAdapter::new("backup");
    let manager = build_manager(
        test_config()
            .with_failover_threshold(1)
            .with_circuit_breaker_timeout(Duration::from_secs(60)),
        &[primary.clone(), backup.clone()],
    );

    manager.execute(&LlmRequest::new("q")).await.expect("backup answers");
    assert_eq!(manager.system_health().providers["primary"].circuit_state, CircuitState::Open);

    manager.reset_provider("primary").expect("known provider");
    primary.set_behavior(Behavior::Succeed);
    let result = manager.execute(&LlmRequest::new("q")).await.expect("answered");
    assert_eq!(result.provider, "primary");
    assert!(matches!(
        manager.reset_provider("nobody"),
        Err(FailoverError::UnknownProvider(_))
    ));
}

#[tokio::test]
async fn status_report_lists_every_provider() {
    let primary = ScriptedAdapter::failing("primary", network_error());
    let backup = ScriptedAdapter::new("backup");
    let manager = build_manager(
        test_config().with_failover_threshold(1),
        &[primary.clone(), backup.clone()],
    );
    manager.execute(&LlmRequest::new("q")).await.expect("backup answers");

    let report = manager.status_report();
    assert!(report.contains("LLM Failover Status"));
    assert!(report.contains("primary [unhealthy] OPEN"), "{report}");
    assert!(report.contains("backup [healthy] CLOSED"), "{report}");
    assert!(report.contains("Adapter calls: 2"), "{report}");
    assert!(report.contains("Success rate: 50.00%"), "{report}");
}
