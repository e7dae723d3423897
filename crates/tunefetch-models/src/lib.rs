//! Shared data models for tunefetch.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their lifecycle status
//! - Progress events and subscription frames
//! - Catalog URLs and resolved track metadata

pub mod catalog;
pub mod job;
pub mod progress;

pub use catalog::{
    sanitize_filename, CatalogEntry, CatalogUrl, CatalogUrlError, MediaKind, TrackRef,
};
pub use job::{now_millis, Job, JobId, JobStatus, JOB_SCHEMA_VERSION};
pub use progress::{percent, ControlFrame, ProgressEvent, ProgressEventType, StreamFrame};
