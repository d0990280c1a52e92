//! Relationship model.
//!
//! A relationship is either *direct* (both endpoint entities are owned by
//! this run, referenced by `_fromEntityKey` / `_toEntityKey`) or *mapped*
//! (a `_mapping` record instructing the remote service to synthesize 0..N
//! edges against entities matched by `targetFilterKeys`). After construction
//! the runtime treats both shapes as opaque relationship objects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::ClassSet;
use crate::error::IntegrationError;

/// Direction of a mapped relationship relative to the source entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipDirection {
    #[serde(rename = "FORWARD")]
    Forward,
    #[serde(rename = "REVERSE")]
    Reverse,
}

/// Instruction for the remote service to synthesize edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipMapping {
    pub relationship_direction: RelationshipDirection,
    pub source_entity_key: String,
    /// Property template for the target side of the synthesized edge(s).
    pub target_entity: Map<String, Value>,
    /// Property-name groups used to match existing target entities.
    pub target_filter_keys: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_target_creation: Option<bool>,
}

/// A graph relationship, direct or mapped.
///
/// `key` is unique within a run across all relationships of all types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_type")]
    pub relationship_type: String,
    #[serde(rename = "_class")]
    pub class: ClassSet,
    #[serde(
        rename = "_fromEntityKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub from_entity_key: Option<String>,
    #[serde(
        rename = "_toEntityKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub to_entity_key: Option<String>,
    #[serde(rename = "_mapping", default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<RelationshipMapping>,
    /// Arbitrary scalar properties.
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Relationship {
    /// Create a direct relationship between two entities owned by this run.
    #[must_use]
    pub fn direct(
        key: impl Into<String>,
        relationship_type: impl Into<String>,
        class: impl Into<ClassSet>,
        from_entity_key: impl Into<String>,
        to_entity_key: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            relationship_type: relationship_type.into(),
            class: class.into(),
            from_entity_key: Some(from_entity_key.into()),
            to_entity_key: Some(to_entity_key.into()),
            mapping: None,
            properties: Map::new(),
        }
    }

    /// Create a mapped relationship.
    #[must_use]
    pub fn mapped(
        key: impl Into<String>,
        relationship_type: impl Into<String>,
        class: impl Into<ClassSet>,
        mapping: RelationshipMapping,
    ) -> Self {
        Self {
            key: key.into(),
            relationship_type: relationship_type.into(),
            class: class.into(),
            from_entity_key: None,
            to_entity_key: None,
            mapping: Some(mapping),
            properties: Map::new(),
        }
    }

    /// Attach a scalar property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Whether this relationship is a mapping specification.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Structural checks independent of class schemas.
    ///
    /// # Errors
    ///
    /// Returns a `validation` error when `_key` or `_type` is empty, or when
    /// the relationship is neither fully direct (both endpoint keys) nor
    /// mapped.
    pub fn validate(&self) -> Result<(), IntegrationError> {
        if self.key.is_empty() {
            return Err(IntegrationError::validation(
                "relationship _key must not be empty",
            ));
        }
        if self.relationship_type.is_empty() {
            return Err(IntegrationError::validation(format!(
                "relationship '{}' has an empty _type",
                self.key
            )));
        }
        let direct = self.from_entity_key.is_some() && self.to_entity_key.is_some();
        if direct == self.mapping.is_some() {
            return Err(IntegrationError::validation(format!(
                "relationship '{}' must carry either both endpoint keys or a _mapping",
                self.key
            )));
        }
        Ok(())
    }
}
