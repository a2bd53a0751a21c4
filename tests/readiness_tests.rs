mod common;

use common::*;
use pretty_assertions::assert_eq;
use std::time::Duration;

use drydock::error::UpgradeError;
use drydock::gateway::{ContainerGateway, ContainerInspect};
use drydock::orchestrator::ReadinessProber;
use drydock::types::HealthStatus;

/// A freshly created container, started so that its script is armed
async fn started(gateway: FakeGateway, id: &str) -> FakeGateway {
    gateway.start(id).await.unwrap();
    gateway
}

fn created(name: &str, id: &str, image: &str) -> ContainerInspect {
    let mut inspect = ContainerInspect::new(name, id, image);
    inspect.set_state("created");
    inspect
}

fn with_healthcheck(name: &str, id: &str) -> ContainerInspect {
    created(name, id, "acme/api:2").with_healthcheck(&["CMD", "curl", "-f", "localhost/health"])
}

#[tokio::test]
async fn test_stable_container_without_healthcheck_is_ready() {
    let gateway = started(
        FakeGateway::new().with_container(created("web", WEB_ID, "acme/web:1.2")),
        WEB_ID,
    )
    .await;
    let clock = ManualClock::new();
    let policy = fast_policy();

    let report = ReadinessProber::new(&gateway, &clock, &policy)
        .await_ready(WEB_ID)
        .await
        .unwrap();

    assert_eq!(report.health, HealthStatus::None);
    assert!(report.degraded);
    assert_eq!(report.polls, 3);
    assert!(clock.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_exit_before_stability_is_rejected_with_diagnostic() {
    let gateway = started(
        FakeGateway::new()
            .with_container(created("web", WEB_ID, "acme/web:1.2"))
            .script_after_start(
                "web",
                vec![step("running", None), step("running", None), step("exited", None)],
            ),
        WEB_ID,
    )
    .await;
    let clock = ManualClock::new();
    let policy = fast_policy();

    let err = ReadinessProber::new(&gateway, &clock, &policy)
        .await_ready(WEB_ID)
        .await
        .unwrap_err();

    match err {
        UpgradeError::Exited { container, logs, .. } => {
            assert_eq!(container, "web");
            assert!(!logs.is_empty());
            assert!(logs.contains("exited"));
        }
        other => panic!("expected Exited, got {:?}", other),
    }
}

#[tokio::test]
async fn test_exit_reports_log_tail() {
    let gateway = started(
        FakeGateway::new()
            .with_container(created("web", WEB_ID, "acme/web:1.2"))
            .exit_on_start("web", 137, "Killed: out of memory"),
        WEB_ID,
    )
    .await;
    let clock = ManualClock::new();
    let policy = fast_policy();

    let err = ReadinessProber::new(&gateway, &clock, &policy)
        .await_ready(WEB_ID)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UpgradeError::Exited { exit_code: 137, ref logs, .. } if logs == "Killed: out of memory"
    ));
}

#[tokio::test]
async fn test_healthy_container_is_ready_immediately() {
    let gateway = started(
        FakeGateway::new().with_container(with_healthcheck("api", APP_ID)),
        APP_ID,
    )
    .await;
    let clock = ManualClock::new();
    let policy = fast_policy();

    let report = ReadinessProber::new(&gateway, &clock, &policy)
        .await_ready(APP_ID)
        .await
        .unwrap();

    assert_eq!(report.health, HealthStatus::Healthy);
    assert!(!report.degraded);
    assert_eq!(report.polls, 1);
}

#[tokio::test]
async fn test_unhealthy_container_is_rejected_with_logs() {
    let gateway = started(
        FakeGateway::new()
            .with_container(with_healthcheck("api", APP_ID))
            .with_logs("api", "connection refused: postgres:5432")
            .script_after_start(
                "api",
                vec![step("running", Some("starting")), step("running", Some("unhealthy"))],
            ),
        APP_ID,
    )
    .await;
    let clock = ManualClock::new();
    let policy = fast_policy();

    let err = ReadinessProber::new(&gateway, &clock, &policy)
        .await_ready(APP_ID)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UpgradeError::Unhealthy { ref logs, .. } if logs.contains("connection refused")
    ));
}

#[tokio::test]
async fn test_health_stuck_starting_is_accepted_after_grace() {
    let gateway = started(
        FakeGateway::new()
            .with_container(with_healthcheck("api", APP_ID))
            .script_after_start("api", vec![step("running", Some("starting"))]),
        APP_ID,
    )
    .await;
    let clock = ManualClock::new();
    let policy = fast_policy();

    let report = ReadinessProber::new(&gateway, &clock, &policy)
        .await_ready(APP_ID)
        .await
        .unwrap();

    assert_eq!(report.health, HealthStatus::Starting);
    assert!(report.degraded);
    assert!(report.elapsed >= policy.health_grace);
    assert!(report.elapsed < policy.timeout);
}

#[tokio::test]
async fn test_database_image_gets_longer_warm_up() {
    let gateway = started(
        FakeGateway::new().with_container(created("db", WEB_ID, "postgres:16")),
        WEB_ID,
    )
    .await;
    let clock = ManualClock::new();
    let policy = fast_policy();

    let report = ReadinessProber::new(&gateway, &clock, &policy)
        .await_ready(WEB_ID)
        .await
        .unwrap();

    assert!(report.elapsed >= Duration::from_secs(4));
}

#[tokio::test]
async fn test_restart_loop_times_out_with_last_state() {
    let gateway = started(
        FakeGateway::new()
            .with_container(created("web", WEB_ID, "acme/web:1.2"))
            .script_after_start("web", vec![step("restarting", None)]),
        WEB_ID,
    )
    .await;
    let clock = ManualClock::new();
    let policy = fast_policy();

    let err = ReadinessProber::new(&gateway, &clock, &policy)
        .await_ready(WEB_ID)
        .await
        .unwrap_err();

    match err {
        UpgradeError::ReadinessTimeout {
            container,
            last_state,
        } => {
            assert_eq!(container, "web");
            assert_eq!(last_state, "restarting");
        }
        other => panic!("expected ReadinessTimeout, got {:?}", other),
    }
    assert!(clock.elapsed() >= policy.timeout);
}

#[tokio::test]
async fn test_vanished_container_is_not_found() {
    let gateway = FakeGateway::new();
    let clock = ManualClock::new();
    let policy = fast_policy();

    let err = ReadinessProber::new(&gateway, &clock, &policy)
        .await_ready(WEB_ID)
        .await
        .unwrap_err();

    assert!(matches!(err, UpgradeError::NotFound { .. }));
}
