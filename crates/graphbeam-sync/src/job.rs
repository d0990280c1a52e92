//! Synchronization job wire types.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// A remote synchronization job accepting uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// How the synchronization job is scoped on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobConfig {
    /// The remote service manages scope from the integration instance.
    IntegrationManaged { integration_instance_id: String },
    /// Explicit source and scope.
    Scoped { source: String, scope: String },
}

impl JobConfig {
    /// Request body for job initiation.
    #[must_use]
    pub fn initiate_body(&self) -> serde_json::Value {
        match self {
            Self::IntegrationManaged {
                integration_instance_id,
            } => json!({
                "source": "integration-managed",
                "integrationInstanceId": integration_instance_id,
            }),
            Self::Scoped { source, scope } => json!({
                "source": source,
                "scope": scope,
            }),
        }
    }
}
