//! Axum HTTP API for tunefetch.
//!
//! This crate provides:
//! - Job submission and lookup by URL
//! - Live job progress over Server-Sent Events
//! - Zip archives of finished output folders
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
