//! On-disk shape of a flushed graph-object file.

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::relationship::Relationship;

/// Content of one staged file: entities or relationships, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlushedFile {
    Entities { entities: Vec<Entity> },
    Relationships { relationships: Vec<Relationship> },
}

impl FlushedFile {
    /// Number of graph objects in the file.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Entities { entities } => entities.len(),
            Self::Relationships { relationships } => relationships.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entities_shape_roundtrip() {
        let file = FlushedFile::Entities {
            entities: vec![Entity::new("k1", "t", "Record")],
        };
        let json = serde_json::to_value(&file).unwrap();
        assert!(json.get("entities").is_some());
        assert!(json.get("relationships").is_none());
        let back: FlushedFile = serde_json::from_value(json).unwrap();
        assert_eq!(back, file);
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn relationships_shape_roundtrip() {
        let file = FlushedFile::Relationships {
            relationships: vec![Relationship::direct("a|b", "t", "HAS", "a", "b")],
        };
        let json = serde_json::to_value(&file).unwrap();
        assert!(json.get("relationships").is_some());
        let back: FlushedFile = serde_json::from_value(json).unwrap();
        assert_eq!(back, file);
        assert!(!back.is_empty());
    }
}
