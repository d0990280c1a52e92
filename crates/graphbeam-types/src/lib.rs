//! Shared Graphbeam data model and error types.
//!
//! This crate is dependency-boundary-safe for runtime, storage, and sync
//! usage: pure data plus the categorized error model, no I/O.

pub mod entity;
pub mod error;
pub mod event;
pub mod graph_object;
pub mod relationship;
pub mod step;
pub mod summary;

pub use entity::{ClassSet, Entity, RawDataEntry};
pub use error::{ErrorCategory, IntegrationError};
pub use event::{Metric, RunEventSink, SyncEvent};
pub use graph_object::FlushedFile;
pub use relationship::{Relationship, RelationshipDirection, RelationshipMapping};
pub use step::{
    DeclaredEntity, DeclaredRelationship, StepId, StepMetadata, StepResult, StepStatus,
};
pub use summary::{build_partial_datasets, ExecutionSummary, PartialDatasetMetadata};
