//! Entity model.
//!
//! An [`Entity`] is a JSON object carrying the reserved `_key` / `_type` /
//! `_class` fields plus arbitrary provider properties. Entities are immutable
//! once added to a store; construct them fully before handing them over.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::IntegrationError;

/// Domain class(es) of a graph object: a single class or an ordered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassSet {
    One(String),
    Many(Vec<String>),
}

impl ClassSet {
    /// Iterate the classes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            Self::One(c) => std::slice::from_ref(c),
            Self::Many(cs) => cs.as_slice(),
        };
        slice.iter().map(String::as_str)
    }

    /// Whether the set contains the given class.
    #[must_use]
    pub fn contains(&self, class: &str) -> bool {
        self.iter().any(|c| c == class)
    }
}

impl From<&str> for ClassSet {
    fn from(value: &str) -> Self {
        Self::One(value.to_string())
    }
}

impl From<Vec<String>> for ClassSet {
    fn from(value: Vec<String>) -> Self {
        Self::Many(value)
    }
}

/// One captured raw-data payload attached to an entity.
///
/// `raw_data` holds the provider response fields as captured; the sync
/// uploader may truncate its largest values when a batch exceeds the wire
/// size limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDataEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "rawData")]
    pub raw_data: Map<String, Value>,
}

/// A graph entity.
///
/// `key` is unique within a run across all entities of all types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_type")]
    pub entity_type: String,
    #[serde(rename = "_class")]
    pub class: ClassSet,
    #[serde(rename = "_rawData", default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Vec<RawDataEntry>>,
    /// Arbitrary scalar/array/object properties from the provider.
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Entity {
    /// Create an entity with the reserved fields and no extra properties.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        entity_type: impl Into<String>,
        class: impl Into<ClassSet>,
    ) -> Self {
        Self {
            key: key.into(),
            entity_type: entity_type.into(),
            class: class.into(),
            raw_data: None,
            properties: Map::new(),
        }
    }

    /// Attach a provider property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Attach a raw-data capture.
    #[must_use]
    pub fn with_raw_data(mut self, entry: RawDataEntry) -> Self {
        self.raw_data.get_or_insert_with(Vec::new).push(entry);
        self
    }

    /// Structural checks independent of class schemas.
    ///
    /// # Errors
    ///
    /// Returns a `validation` error when `_key` or `_type` is empty.
    pub fn validate(&self) -> Result<(), IntegrationError> {
        if self.key.is_empty() {
            return Err(IntegrationError::validation("entity _key must not be empty"));
        }
        if self.entity_type.is_empty() {
            return Err(IntegrationError::validation(format!(
                "entity '{}' has an empty _type",
                self.key
            )));
        }
        Ok(())
    }
}
