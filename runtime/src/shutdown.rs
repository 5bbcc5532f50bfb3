//! Graceful shutdown: drain in-flight work, then release the connection.
//!
//! A process moves `running → draining → stopped`. On the termination
//! signal the coordinator flips the drain flag (consumers stop dequeuing
//! but finish the message in hand), waits for every registered worker
//! under an operator-configured grace period, and only then runs the
//! release handlers that close the bus connection. A worker that outlives
//! the grace period is aborted and reported as a forced stop — the
//! resolution of its in-flight message is then indeterminate, which is a
//! data-loss risk operators must see.
//!
//! The ordering is the point: the connection is never closed while a
//! fetched message is still unresolved.
//!
//! ## Usage
//!
//! ```ignore
//! let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(10));
//! let consumer = StageConsumer::new(subject, group, bus.clone(), handler, coordinator.subscribe());
//! coordinator.register_worker("build-stage", consumer.start().await?);
//! coordinator.register(Arc::new(BusRelease::new(bus)));
//!
//! wait_for_signal().await;
//! coordinator.drain().await;
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Lifecycle of a draining process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Accepting and processing messages.
    Running,
    /// No new intake; in-flight work finishing.
    Draining,
    /// All workers stopped and resources released.
    Stopped,
}

/// A resource released after drain completes.
///
/// Implement this for anything that must outlive in-flight message
/// processing, most importantly the bus connection handle.
#[async_trait]
pub trait ShutdownHandler: Send + Sync {
    /// Resource name for logging.
    fn name(&self) -> &str;

    /// Release the resource.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure; drain continues regardless.
    async fn shutdown(&self) -> Result<(), String>;
}

/// Result of a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every worker finished inside the grace period.
    Completed,
    /// The grace period expired; the named workers were stopped with work
    /// possibly unresolved. Treat as a data-loss risk, not a clean exit.
    ForcedStop {
        /// Workers that had to be aborted.
        stragglers: Vec<String>,
    },
}

impl DrainOutcome {
    /// Whether the drain finished without forcing any worker.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Coordinates the drain protocol for one process.
///
/// Owns the drain signal, the named worker handles, and the release
/// handlers that run strictly after all workers have stopped.
pub struct ShutdownCoordinator {
    drain_tx: watch::Sender<bool>,
    workers: Vec<(String, JoinHandle<()>)>,
    handlers: Vec<Arc<dyn ShutdownHandler>>,
    grace: Duration,
    state: LifecycleState,
}

impl ShutdownCoordinator {
    /// Create a coordinator with the given drain grace period.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        let (drain_tx, _) = watch::channel(false);
        Self {
            drain_tx,
            workers: Vec::new(),
            handlers: Vec::new(),
            grace,
            state: LifecycleState::Running,
        }
    }

    /// Get a receiver consumers select on at their dequeue point.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.drain_tx.subscribe()
    }

    /// Register a worker task to wait for during drain.
    pub fn register_worker(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        let name = name.into();
        info!(worker = %name, "Registered worker for drain");
        self.workers.push((name, handle));
    }

    /// Register a resource released only after all workers have stopped.
    pub fn register(&mut self, handler: Arc<dyn ShutdownHandler>) {
        info!(resource = handler.name(), "Registered release handler");
        self.handlers.push(handler);
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Run the drain protocol to completion.
    ///
    /// 1. Flip the drain signal: consumers stop dequeuing
    /// 2. Await each worker under the shared grace budget; abort and
    ///    record any straggler once the budget is spent
    /// 3. Run the release handlers (connection close) — strictly after
    ///    every worker has stopped
    pub async fn drain(mut self) -> DrainOutcome {
        self.state = LifecycleState::Draining;
        info!(
            workers = self.workers.len(),
            grace_ms = self.grace.as_millis(),
            "Draining: stopping message intake, letting in-flight work finish"
        );

        let _ = self.drain_tx.send(true);

        let deadline = tokio::time::Instant::now() + self.grace;
        let mut stragglers = Vec::new();

        for (name, mut handle) in self.workers.drain(..) {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => info!(worker = %name, "Worker drained"),
                Ok(Err(err)) => warn!(worker = %name, error = %err, "Worker task failed during drain"),
                Err(_) => {
                    error!(
                        worker = %name,
                        grace_ms = self.grace.as_millis(),
                        "Grace period exceeded, forcing stop; in-flight resolution is indeterminate"
                    );
                    handle.abort();
                    stragglers.push(name);
                }
            }
        }

        for handler in &self.handlers {
            match handler.shutdown().await {
                Ok(()) => info!(resource = handler.name(), "Released"),
                Err(err) => error!(resource = handler.name(), error = %err, "Release failed"),
            }
        }

        self.state = LifecycleState::Stopped;
        info!("Shutdown complete");

        if stragglers.is_empty() {
            DrainOutcome::Completed
        } else {
            DrainOutcome::ForcedStop { stragglers }
        }
    }
}

/// Wait for a termination signal (SIGTERM or Ctrl+C).
///
/// # Panics
///
/// Panics if the process cannot register its signal handlers, which only
/// happens when the runtime is misconfigured at startup.
#[allow(clippy::expect_used)] // Panics: signal registration failure is unrecoverable at startup
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to wait for Ctrl+C");
        info!("Received Ctrl+C");
    }
}
