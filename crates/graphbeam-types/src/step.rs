//! Step metadata and per-step results.
//!
//! A step is a unit of collection work with declared graph-object outputs and
//! declared predecessors. The scheduler derives execution order from
//! `depends_on` and records one [`StepResult`] per step in the run summary.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::entity::ClassSet;

/// Opaque step identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    /// Create a new step identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for StepId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// An entity type a step declares it will produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredEntity {
    #[serde(rename = "_type")]
    pub entity_type: String,
    #[serde(rename = "_class")]
    pub class: ClassSet,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

impl DeclaredEntity {
    #[must_use]
    pub fn new(entity_type: impl Into<String>, class: impl Into<ClassSet>) -> Self {
        Self {
            entity_type: entity_type.into(),
            class: class.into(),
            partial: false,
        }
    }

    /// Mark the declared type as a partial dataset regardless of step status.
    #[must_use]
    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }
}

/// A relationship type a step declares it will produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredRelationship {
    #[serde(rename = "_type")]
    pub relationship_type: String,
    pub source_type: String,
    pub target_type: String,
    #[serde(rename = "_class")]
    pub class: ClassSet,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

impl DeclaredRelationship {
    #[must_use]
    pub fn new(
        relationship_type: impl Into<String>,
        source_type: impl Into<String>,
        target_type: impl Into<String>,
        class: impl Into<ClassSet>,
    ) -> Self {
        Self {
            relationship_type: relationship_type.into(),
            source_type: source_type.into(),
            target_type: target_type.into(),
            class: class.into(),
            partial: false,
        }
    }

    #[must_use]
    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }
}

/// Static description of a step: identity, declared outputs, predecessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMetadata {
    pub id: StepId,
    pub name: String,
    #[serde(default)]
    pub entities: Vec<DeclaredEntity>,
    #[serde(default)]
    pub relationships: Vec<DeclaredRelationship>,
    #[serde(default)]
    pub depends_on: Vec<StepId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_source_id: Option<String>,
}

impl StepMetadata {
    #[must_use]
    pub fn new(id: impl Into<StepId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entities: Vec::new(),
            relationships: Vec::new(),
            depends_on: Vec::new(),
            ingestion_source_id: None,
        }
    }

    /// Union of declared entity and relationship `_type`s, declaration order,
    /// deduplicated.
    #[must_use]
    pub fn declared_types(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for t in self
            .entities
            .iter()
            .map(|e| e.entity_type.as_str())
            .chain(self.relationships.iter().map(|r| r.relationship_type.as_str()))
        {
            if seen.insert(t) {
                out.push(t.to_string());
            }
        }
        out
    }

    /// Subset of declared types carrying the `partial` flag.
    #[must_use]
    pub fn partial_types(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for t in self
            .entities
            .iter()
            .filter(|e| e.partial)
            .map(|e| e.entity_type.as_str())
            .chain(
                self.relationships
                    .iter()
                    .filter(|r| r.partial)
                    .map(|r| r.relationship_type.as_str()),
            )
        {
            if seen.insert(t) {
                out.push(t.to_string());
            }
        }
        out
    }
}

/// Terminal status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    PartialSuccessDueToDependencyFailure,
    Disabled,
    Cancelled,
}

impl StepStatus {
    /// Whether this status carries a collection failure for partial-dataset
    /// purposes.
    #[must_use]
    pub fn is_incomplete(self) -> bool {
        matches!(
            self,
            Self::Failure | Self::PartialSuccessDueToDependencyFailure
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::PartialSuccessDueToDependencyFailure => {
                "partial_success_due_to_dependency_failure"
            }
            Self::Disabled => "disabled",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Outcome of one step, as persisted in the run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub id: StepId,
    pub name: String,
    pub declared_types: Vec<String>,
    pub partial_types: Vec<String>,
    pub encountered_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<StepId>>,
    pub status: StepStatus,
}
