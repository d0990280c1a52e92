//! Synchronization of staged graph data into a remote bulk-ingest job.
//!
//! The uploader streams every flushed file under the staging root, splits
//! the contained objects into bounded batches, and posts them concurrently
//! with retry and an oversize-payload shrinking fallback, then finalizes the
//! job with the run's partial-dataset metadata.

pub mod client;
pub mod events;
pub mod job;
pub mod shrink;
pub mod uploader;

pub use client::{HttpSyncApi, SyncApi};
pub use events::EventQueue;
pub use job::{JobConfig, SyncJob};
pub use shrink::{shrink_raw_data, ShrinkReport, BATCH_SIZE_LIMIT_BYTES};
pub use uploader::{synchronize, SyncOptions, SyncReport, UPLOAD_BATCH_SIZE, UPLOAD_CONCURRENCY};
