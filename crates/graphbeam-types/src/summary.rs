//! Run summary and partial-dataset aggregation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::step::StepResult;

/// Types whose extraction was incomplete for this run.
///
/// Drives downstream delete-safety decisions: the remote service will not
/// prune objects of a type listed here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialDatasetMetadata {
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryMetadata {
    pub partial_datasets: PartialDatasetMetadata,
}

/// The persisted `summary.json` shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub integration_step_results: Vec<StepResult>,
    pub metadata: SummaryMetadata,
}

impl ExecutionSummary {
    #[must_use]
    pub fn new(results: Vec<StepResult>) -> Self {
        let partial_datasets = build_partial_datasets(&results);
        Self {
            integration_step_results: results,
            metadata: SummaryMetadata { partial_datasets },
        }
    }
}

/// Union, over all step results, of:
/// - declared types of steps that failed or completed partially, and
/// - partial-flagged types of every step regardless of status.
///
/// Order follows per-step encounter order; duplicates are dropped.
#[must_use]
pub fn build_partial_datasets(results: &[StepResult]) -> PartialDatasetMetadata {
    let mut seen = HashSet::new();
    let mut types = Vec::new();
    for result in results {
        if result.status.is_incomplete() {
            for t in &result.declared_types {
                if seen.insert(t.clone()) {
                    types.push(t.clone());
                }
            }
        }
        for t in &result.partial_types {
            if seen.insert(t.clone()) {
                types.push(t.clone());
            }
        }
    }
    PartialDatasetMetadata { types }
}
