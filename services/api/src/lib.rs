//! Conveyor ingress: accepts deployment requests over HTTP and emits the
//! first pipeline event.
//!
//! The ingress is a thin boundary: it validates the external request,
//! mints the application id, publishes `DeploymentRequested` on the bus,
//! and answers `202 Accepted`. Nothing downstream is called directly —
//! the build and deploy stages pick the event up through their queue
//! groups.

pub mod config;
pub mod error;
pub mod handlers;
pub mod router;

pub use config::Config;
pub use error::AppError;
pub use handlers::AppState;
pub use router::app_router;
