//! Deploy stage integration tests over the in-memory bus.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use conveyor_core::bus::MessageBus;
use conveyor_core::envelope::Resolution;
use conveyor_core::events::{BuildSucceeded, PipelineEvent, groups, subjects};
use conveyor_deploy_worker::{DeployStage, SimulatedDeploy};
use conveyor_runtime::{ShutdownCoordinator, StageConsumer};
use conveyor_testing::InMemoryBus;
use std::sync::Arc;
use std::time::Duration;

fn valid_event() -> BuildSucceeded {
    BuildSucceeded {
        app_id: "app-123".to_string(),
        image_uri: "registry.conveyor.internal/app-123:a1b2c3d4e5f6".to_string(),
        git_commit_sha: "a1b2c3d4e5f6".to_string(),
    }
}

async fn start_deploy_stage(bus: &Arc<InMemoryBus>) -> ShutdownCoordinator {
    let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
    let handler = Arc::new(DeployStage::new(Arc::new(SimulatedDeploy::new(
        Duration::ZERO,
    ))));
    let consumer = StageConsumer::new(
        subjects::BUILD_SUCCEEDED,
        groups::OAL_WORKERS,
        Arc::clone(bus) as Arc<dyn MessageBus>,
        handler,
        coordinator.subscribe(),
    );
    let handle = consumer.start().await.expect("subscribe should succeed");
    coordinator.register_worker("deploy-stage", handle);
    coordinator
}

#[tokio::test]
async fn valid_event_acknowledges_and_ends_the_workflow() {
    let bus = Arc::new(InMemoryBus::new());
    let coordinator = start_deploy_stage(&bus).await;

    let payload = valid_event().to_bytes().expect("event should serialize");
    bus.publish(subjects::BUILD_SUCCEEDED, &payload)
        .await
        .expect("publish should succeed");

    assert!(bus.wait_for_resolutions(subjects::BUILD_SUCCEEDED, 1).await);
    assert_eq!(
        bus.resolutions(subjects::BUILD_SUCCEEDED),
        vec![Resolution::Acknowledged]
    );

    // Last stage: nothing is published anywhere else.
    assert_eq!(bus.published(subjects::BUILD_SUCCEEDED).len(), 1);
    assert!(bus.published(subjects::DEPLOYMENT_REQUESTED).is_empty());

    coordinator.drain().await;
}

#[tokio::test]
async fn truncated_json_terminates() {
    let bus = Arc::new(InMemoryBus::new());
    let coordinator = start_deploy_stage(&bus).await;

    bus.publish(subjects::BUILD_SUCCEEDED, br#"{"app_id":"app-123","#)
        .await
        .expect("publish should succeed");

    assert!(bus.wait_for_resolutions(subjects::BUILD_SUCCEEDED, 1).await);
    assert_eq!(
        bus.resolutions(subjects::BUILD_SUCCEEDED),
        vec![Resolution::Terminated]
    );

    coordinator.drain().await;
}

#[tokio::test]
async fn missing_image_uri_terminates() {
    let bus = Arc::new(InMemoryBus::new());
    let coordinator = start_deploy_stage(&bus).await;

    let mut event = valid_event();
    event.image_uri = String::new();
    let payload = event.to_bytes().expect("event should serialize");
    bus.publish(subjects::BUILD_SUCCEEDED, &payload)
        .await
        .expect("publish should succeed");

    assert!(bus.wait_for_resolutions(subjects::BUILD_SUCCEEDED, 1).await);
    assert_eq!(
        bus.resolutions(subjects::BUILD_SUCCEEDED),
        vec![Resolution::Terminated]
    );

    coordinator.drain().await;
}
