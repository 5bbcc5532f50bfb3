//! Scripted connectors for exercising the bootstrap retry budget.

use async_trait::async_trait;
use conveyor_runtime::Connector;
use std::sync::atomic::{AtomicU32, Ordering};

/// A [`Connector`] that fails a scripted number of attempts, then
/// succeeds, while counting every attempt it receives.
///
/// # Example
///
/// ```ignore
/// let connector = ScriptedConnector::succeeding_after(2);
/// let result = connect_with_retry(&policy, &connector).await;
/// assert_eq!(connector.attempts(), 3);
/// ```
pub struct ScriptedConnector {
    failures: u32,
    attempts: AtomicU32,
}

impl ScriptedConnector {
    /// A connector for which every attempt fails.
    #[must_use]
    pub const fn failing_forever() -> Self {
        Self {
            failures: u32::MAX,
            attempts: AtomicU32::new(0),
        }
    }

    /// A connector that fails `failures` attempts, then succeeds.
    #[must_use]
    pub const fn succeeding_after(failures: u32) -> Self {
        Self {
            failures,
            attempts: AtomicU32::new(0),
        }
    }

    /// How many attempts have been made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Connection = ();
    type Error = String;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            Err(format!("scripted refusal on attempt {}", attempt + 1))
        } else {
            Ok(())
        }
    }
}
