//! Stage consumer tests for the effect-failure path, driven over the
//! in-memory bus.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use async_trait::async_trait;
use conveyor_core::bus::MessageBus;
use conveyor_core::envelope::Resolution;
use conveyor_core::events::{DeploymentRequested, PipelineEvent};
use conveyor_runtime::{ShutdownCoordinator, StageConsumer, StageError, StageHandler, Successor};
use conveyor_testing::InMemoryBus;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const SUBJECT: &str = "v1.deployment.requested";
const GROUP: &str = "flaky-workers";

/// A stage whose side effect fails a scripted number of times.
struct FlakyStage {
    failures: AtomicU32,
}

impl FlakyStage {
    const fn failing(times: u32) -> Self {
        Self {
            failures: AtomicU32::new(times),
        }
    }
}

#[async_trait]
impl StageHandler for FlakyStage {
    type Input = DeploymentRequested;

    fn stage(&self) -> &'static str {
        "flaky"
    }

    async fn execute(
        &self,
        _input: DeploymentRequested,
    ) -> Result<Option<Successor>, StageError> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            Err(StageError::Effect("scripted effect failure".to_string()))
        } else {
            Ok(None)
        }
    }
}

fn request_bytes() -> Vec<u8> {
    DeploymentRequested {
        app_id: "app-123".to_string(),
        git_repository: "https://example.com/a.git".to_string(),
        git_branch: "main".to_string(),
    }
    .to_bytes()
    .expect("request should serialize")
}

async fn start_stage(
    bus: &Arc<InMemoryBus>,
    handler: FlakyStage,
    nak_limit: u32,
) -> ShutdownCoordinator {
    let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
    let consumer = StageConsumer::new(
        SUBJECT,
        GROUP,
        Arc::clone(bus) as Arc<dyn MessageBus>,
        Arc::new(handler),
        coordinator.subscribe(),
    )
    .with_nak_limit(nak_limit);
    let handle = consumer.start().await.expect("subscribe should succeed");
    coordinator.register_worker("flaky-stage", handle);
    coordinator
}

#[tokio::test]
async fn effect_failure_requeues_until_it_heals() {
    let bus = Arc::new(InMemoryBus::new());
    let coordinator = start_stage(&bus, FlakyStage::failing(1), 5).await;

    bus.publish(SUBJECT, &request_bytes())
        .await
        .expect("publish should succeed");

    assert!(bus.wait_for_resolutions(SUBJECT, 2).await);
    assert_eq!(
        bus.resolutions(SUBJECT),
        vec![
            Resolution::NegativelyAcknowledged,
            Resolution::Acknowledged
        ]
    );

    coordinator.drain().await;
}

#[tokio::test]
async fn effect_failure_respects_the_redelivery_cap() {
    let bus = Arc::new(InMemoryBus::new());
    let coordinator = start_stage(&bus, FlakyStage::failing(u32::MAX), 3).await;

    bus.publish(SUBJECT, &request_bytes())
        .await
        .expect("publish should succeed");

    assert!(bus.wait_for_resolutions(SUBJECT, 3).await);
    assert_eq!(
        bus.resolutions(SUBJECT),
        vec![
            Resolution::NegativelyAcknowledged,
            Resolution::NegativelyAcknowledged,
            Resolution::Terminated
        ]
    );

    coordinator.drain().await;
}
