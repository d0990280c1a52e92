//! Staging storage for collected graph objects.
//!
//! Steps write entities and relationships through a per-step [`JobState`]
//! into the shared [`GraphObjectStore`]; full buffers are flushed to files
//! under the staging root described by [`StorageLayout`], optionally
//! Brotli-compressed. The sync uploader later streams those files back out.

pub mod codec;
pub mod job_state;
pub mod layout;
pub mod object_store;
pub mod validator;

pub use job_state::JobState;
pub use layout::{GraphObjectKind, StorageLayout, WalkEntry, DEFAULT_ROOT_DIR};
pub use object_store::{
    BeforeAddEntityHook, BeforeAddRelationshipHook, GraphObjectStore, StoreHooks, StoreOptions,
    DEFAULT_FLUSH_THRESHOLD,
};
pub use validator::{NoopSchemaValidator, SchemaValidator, SCHEMA_VALIDATION_ENV_VAR};
