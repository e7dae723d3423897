//! Download worker.
//!
//! This crate provides:
//! - The scheduler that claims and executes queued jobs
//! - Catalog metadata resolution and track fetching
//! - Stale-job recovery and archive retention sweeps
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod provider;
pub mod retry;
pub mod runtime;
pub mod scheduler;
pub mod spotify;
pub mod sweeps;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use fetcher::{FetchError, TrackFetcher, YtDlpFetcher};
pub use logging::JobLogger;
pub use processor::{JobProcessor, TrackOutcome};
pub use provider::{MetadataError, MetadataProvider};
pub use runtime::{ShutdownReason, Worker};
pub use scheduler::{Scheduler, TickOutcome};
pub use spotify::SpotifyMetadataProvider;
pub use sweeps::{RecoverySweep, RetentionSweep};
