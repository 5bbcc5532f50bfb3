//! Build stage integration tests over the in-memory bus.
//!
//! These drive the real `StageConsumer` loop against `InMemoryBus`, so
//! they cover the whole per-message state machine: decode, validate,
//! effect, successor publish, and terminal resolution.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use conveyor_build_worker::{BuildStage, SimulatedBuild};
use conveyor_core::bus::MessageBus;
use conveyor_core::envelope::Resolution;
use conveyor_core::events::{BuildSucceeded, DeploymentRequested, PipelineEvent, groups, subjects};
use conveyor_runtime::{ShutdownCoordinator, StageConsumer};
use conveyor_testing::InMemoryBus;
use std::sync::Arc;
use std::time::Duration;

fn valid_request() -> DeploymentRequested {
    DeploymentRequested {
        app_id: "app-123".to_string(),
        git_repository: "https://github.com/example/app.git".to_string(),
        git_branch: "develop".to_string(),
    }
}

/// Start a build-stage consumer on the bus; returns the coordinator that
/// owns its drain signal and worker handle.
async fn start_build_stage(bus: &Arc<InMemoryBus>) -> ShutdownCoordinator {
    let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
    let handler = Arc::new(BuildStage::new(Arc::new(SimulatedBuild::new(
        Duration::ZERO,
    ))));
    let consumer = StageConsumer::new(
        subjects::DEPLOYMENT_REQUESTED,
        groups::BUILD_WORKERS,
        Arc::clone(bus) as Arc<dyn MessageBus>,
        handler,
        coordinator.subscribe(),
    )
    .with_nak_limit(2);
    let handle = consumer.start().await.expect("subscribe should succeed");
    coordinator.register_worker("build-stage", handle);
    coordinator
}

#[tokio::test]
async fn valid_request_publishes_build_succeeded_and_acks() {
    let bus = Arc::new(InMemoryBus::new());
    let coordinator = start_build_stage(&bus).await;

    let payload = valid_request().to_bytes().expect("request should serialize");
    bus.publish(subjects::DEPLOYMENT_REQUESTED, &payload)
        .await
        .expect("publish should succeed");

    assert!(bus.wait_for_published(subjects::BUILD_SUCCEEDED, 1).await);
    let published = bus.published(subjects::BUILD_SUCCEEDED);
    assert_eq!(published.len(), 1);

    let event = BuildSucceeded::from_bytes(&published[0]).expect("successor should decode");
    assert_eq!(event.app_id, "app-123");
    assert!(!event.image_uri.is_empty());
    assert!(!event.git_commit_sha.is_empty());

    assert!(bus.wait_for_resolutions(subjects::DEPLOYMENT_REQUESTED, 1).await);
    assert_eq!(
        bus.resolutions(subjects::DEPLOYMENT_REQUESTED),
        vec![Resolution::Acknowledged]
    );

    coordinator.drain().await;
}

#[tokio::test]
async fn truncated_json_terminates_without_successor() {
    let bus = Arc::new(InMemoryBus::new());
    let coordinator = start_build_stage(&bus).await;

    bus.publish(subjects::DEPLOYMENT_REQUESTED, br#"{"app_id": "app-123","#)
        .await
        .expect("publish should succeed");

    assert!(bus.wait_for_resolutions(subjects::DEPLOYMENT_REQUESTED, 1).await);
    assert_eq!(
        bus.resolutions(subjects::DEPLOYMENT_REQUESTED),
        vec![Resolution::Terminated]
    );
    assert!(bus.published(subjects::BUILD_SUCCEEDED).is_empty());

    coordinator.drain().await;
}

#[tokio::test]
async fn invalid_request_terminates_without_successor() {
    let bus = Arc::new(InMemoryBus::new());
    let coordinator = start_build_stage(&bus).await;

    let mut request = valid_request();
    request.git_branch = String::new();
    let payload = request.to_bytes().expect("request should serialize");
    bus.publish(subjects::DEPLOYMENT_REQUESTED, &payload)
        .await
        .expect("publish should succeed");

    assert!(bus.wait_for_resolutions(subjects::DEPLOYMENT_REQUESTED, 1).await);
    assert_eq!(
        bus.resolutions(subjects::DEPLOYMENT_REQUESTED),
        vec![Resolution::Terminated]
    );
    assert!(bus.published(subjects::BUILD_SUCCEEDED).is_empty());

    coordinator.drain().await;
}

#[tokio::test]
async fn successor_publish_failure_naks_and_redelivery_reprocesses() {
    let bus = Arc::new(InMemoryBus::new());
    let coordinator = start_build_stage(&bus).await;

    // Build succeeds but emitting the successor fails.
    bus.fail_publishes(subjects::BUILD_SUCCEEDED);

    let payload = valid_request().to_bytes().expect("request should serialize");
    bus.publish(subjects::DEPLOYMENT_REQUESTED, &payload)
        .await
        .expect("publish should succeed");

    assert!(bus.wait_for_resolutions(subjects::DEPLOYMENT_REQUESTED, 1).await);
    assert_eq!(
        bus.resolutions(subjects::DEPLOYMENT_REQUESTED)[0],
        Resolution::NegativelyAcknowledged
    );

    // Once publishing heals, the redelivered message is processed again;
    // the deterministic effect produces the same successor.
    bus.restore_publishes(subjects::BUILD_SUCCEEDED);

    assert!(bus.wait_for_published(subjects::BUILD_SUCCEEDED, 1).await);
    assert!(bus.wait_for_resolutions(subjects::DEPLOYMENT_REQUESTED, 2).await);
    assert_eq!(
        bus.resolutions(subjects::DEPLOYMENT_REQUESTED),
        vec![
            Resolution::NegativelyAcknowledged,
            Resolution::Acknowledged
        ]
    );

    let published = bus.published(subjects::BUILD_SUCCEEDED);
    assert_eq!(published.len(), 1);
    let event = BuildSucceeded::from_bytes(&published[0]).expect("successor should decode");
    assert_eq!(event.app_id, "app-123");

    coordinator.drain().await;
}

#[tokio::test]
async fn redelivery_limit_converts_nak_into_terminate() {
    let bus = Arc::new(InMemoryBus::new());
    let coordinator = start_build_stage(&bus).await;

    // Successor publishing never heals; the nak cap (2) must stop the loop.
    bus.fail_publishes(subjects::BUILD_SUCCEEDED);

    let payload = valid_request().to_bytes().expect("request should serialize");
    bus.publish(subjects::DEPLOYMENT_REQUESTED, &payload)
        .await
        .expect("publish should succeed");

    assert!(bus.wait_for_resolutions(subjects::DEPLOYMENT_REQUESTED, 2).await);
    assert_eq!(
        bus.resolutions(subjects::DEPLOYMENT_REQUESTED),
        vec![Resolution::NegativelyAcknowledged, Resolution::Terminated]
    );
    assert!(bus.published(subjects::BUILD_SUCCEEDED).is_empty());

    coordinator.drain().await;
}

#[tokio::test]
async fn drain_resolves_in_flight_before_connection_release() {
    let bus = Arc::new(InMemoryBus::new());

    let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
    // A slow build so the drain signal arrives mid-processing.
    let handler = Arc::new(BuildStage::new(Arc::new(SimulatedBuild::new(
        Duration::from_millis(100),
    ))));
    let consumer = StageConsumer::new(
        subjects::DEPLOYMENT_REQUESTED,
        groups::BUILD_WORKERS,
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        handler,
        coordinator.subscribe(),
    );
    let handle = consumer.start().await.expect("subscribe should succeed");
    coordinator.register_worker("build-stage", handle);
    coordinator.register(bus.release_handler());

    let payload = valid_request().to_bytes().expect("request should serialize");
    bus.publish(subjects::DEPLOYMENT_REQUESTED, &payload)
        .await
        .expect("publish should succeed");

    // Wait until the message is in flight (the dispatcher has handed it
    // over but no resolution has been recorded yet), then drain.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(bus.total_resolutions(), 0, "message should still be mid-processing");

    let outcome = coordinator.drain().await;
    assert!(outcome.is_clean());

    // The in-flight message reached a terminal resolution before the
    // connection was released.
    assert!(bus.is_closed());
    assert_eq!(bus.resolutions_at_close(), Some(bus.total_resolutions()));
    assert_eq!(
        bus.resolutions(subjects::DEPLOYMENT_REQUESTED),
        vec![Resolution::Acknowledged]
    );
    assert_eq!(bus.published(subjects::BUILD_SUCCEEDED).len(), 1);
}
