//! Boundary to the external per-class schema validators.
//!
//! The store invokes a [`SchemaValidator`] on every add when validation is
//! enabled; a rejection is reported as a recoverable diagnostic and the
//! object is still admitted. The real validators live with the data-model
//! definitions outside this workspace.

use graphbeam_types::{Entity, Relationship};

/// Non-empty value enables schema validation on the store's add path when no
/// explicit option is given.
pub const SCHEMA_VALIDATION_ENV_VAR: &str = "ENABLE_GRAPH_OBJECT_SCHEMA_VALIDATION";

/// Validates graph objects against their `_class` schemas.
///
/// Implementations must be `Send + Sync` for use behind
/// `Arc<dyn SchemaValidator>`.
pub trait SchemaValidator: Send + Sync {
    /// Check an entity against the schema of each of its classes.
    ///
    /// # Errors
    ///
    /// Returns a human-readable description of the first violation.
    fn validate_entity(&self, entity: &Entity) -> Result<(), String>;

    /// Check a relationship against the schema of each of its classes.
    ///
    /// # Errors
    ///
    /// Returns a human-readable description of the first violation.
    fn validate_relationship(&self, relationship: &Relationship) -> Result<(), String>;
}

/// Accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSchemaValidator;

impl SchemaValidator for NoopSchemaValidator {
    fn validate_entity(&self, _entity: &Entity) -> Result<(), String> {
        Ok(())
    }

    fn validate_relationship(&self, _relationship: &Relationship) -> Result<(), String> {
        Ok(())
    }
}
