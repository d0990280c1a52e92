//! Oversize-batch shrinking.
//!
//! When the remote service rejects a batch as too large, the largest
//! `_rawData` field of the largest entity is replaced with the literal
//! string `"TRUNCATED"` until the batch's estimated serialized size fits the
//! wire limit. Raw data is diagnostic payload; truncating it never loses
//! graph structure.

use graphbeam_types::{Entity, IntegrationError};
use serde_json::Value;

/// Maximum serialized batch size accepted by the ingest endpoints.
pub const BATCH_SIZE_LIMIT_BYTES: usize = 6_275_072;

const TRUNCATED_VALUE: &str = "TRUNCATED";
const TRUNCATED_SIZE_ESTIMATE: usize = "'TRUNCATED'".len();

/// Outcome of a shrink pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShrinkReport {
    pub initial_bytes: usize,
    pub final_bytes: usize,
    pub truncated: usize,
}

struct Target {
    entity_index: usize,
    entry_index: usize,
    field: String,
    field_size: usize,
}

fn serialized_size<T: serde::Serialize>(value: &T) -> usize {
    serde_json::to_vec(value).map(|b| b.len()).unwrap_or(0)
}

fn largest_target(entities: &[Entity]) -> Option<Target> {
    let (entity_index, entity) = entities
        .iter()
        .enumerate()
        .max_by_key(|(_, e)| serialized_size(e))?;
    let raw_data = entity.raw_data.as_ref()?;
    let (entry_index, entry) = raw_data
        .iter()
        .enumerate()
        .max_by_key(|(_, entry)| serialized_size(entry))?;
    let (field, value) = entry
        .raw_data
        .iter()
        .max_by_key(|(_, value)| serialized_size(value))?;
    Some(Target {
        entity_index,
        entry_index,
        field: field.clone(),
        field_size: serialized_size(value),
    })
}

/// Shrink a batch in place until its estimated size fits `limit`.
///
/// # Errors
///
/// Returns an `upload_fatal` `CANNOT_SHRINK` error when no `_rawData` field
/// remains to truncate or when truncation would not strictly reduce the
/// estimate.
pub fn shrink_to_limit(
    entities: &mut [Entity],
    limit: usize,
) -> Result<ShrinkReport, IntegrationError> {
    let initial_bytes = serialized_size(&entities);
    let mut estimate = initial_bytes;
    let mut truncated = 0usize;

    while estimate > limit {
        let Some(target) = largest_target(entities) else {
            return Err(IntegrationError::upload_fatal(
                "CANNOT_SHRINK",
                "batch exceeds the upload size limit and carries no raw data to truncate",
            ));
        };
        let next_estimate = estimate - target.field_size.min(estimate) + TRUNCATED_SIZE_ESTIMATE;
        if next_estimate >= estimate {
            return Err(IntegrationError::upload_fatal(
                "CANNOT_SHRINK",
                format!(
                    "truncating raw-data field '{}' would not reduce the batch size",
                    target.field
                ),
            ));
        }

        let entry = entities[target.entity_index]
            .raw_data
            .as_mut()
            .and_then(|raw| raw.get_mut(target.entry_index));
        match entry {
            Some(entry) => {
                entry
                    .raw_data
                    .insert(target.field, Value::String(TRUNCATED_VALUE.to_string()));
            }
            None => {
                return Err(IntegrationError::upload_fatal(
                    "CANNOT_SHRINK",
                    "raw-data entry disappeared during shrinking",
                ));
            }
        }
        truncated += 1;
        estimate = next_estimate;
    }

    Ok(ShrinkReport {
        initial_bytes,
        final_bytes: estimate,
        truncated,
    })
}

/// Shrink a batch in place to the wire limit.
///
/// # Errors
///
/// See [`shrink_to_limit`].
pub fn shrink_raw_data(entities: &mut [Entity]) -> Result<ShrinkReport, IntegrationError> {
    shrink_to_limit(entities, BATCH_SIZE_LIMIT_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphbeam_types::RawDataEntry;
    use serde_json::{json, Map};

    fn entity_with_payload(key: &str, payload: &str) -> Entity {
        let mut raw = Map::new();
        raw.insert("payload".into(), json!(payload));
        raw.insert("note".into(), json!("small"));
        Entity::new(key, "acme_record", "Record").with_raw_data(RawDataEntry {
            name: Some("default".into()),
            raw_data: raw,
        })
    }

    #[test]
    fn batch_under_limit_is_untouched() {
        let mut batch = vec![entity_with_payload("a", "tiny")];
        let report = shrink_to_limit(&mut batch, 10_000).unwrap();
        assert_eq!(report.truncated, 0);
        assert_eq!(report.initial_bytes, report.final_bytes);
        assert_eq!(batch[0].raw_data.as_ref().unwrap()[0].raw_data["payload"], "tiny");
    }

    #[test]
    fn largest_field_of_largest_entity_is_truncated() {
        let big = "x".repeat(4000);
        let mut batch = vec![
            entity_with_payload("small", "little"),
            entity_with_payload("large", &big),
        ];
        let report = shrink_to_limit(&mut batch, 1000).unwrap();
        assert!(report.truncated >= 1);
        assert!(report.final_bytes <= 1000);
        assert_eq!(
            batch[1].raw_data.as_ref().unwrap()[0].raw_data["payload"],
            "TRUNCATED"
        );
        assert_eq!(
            batch[0].raw_data.as_ref().unwrap()[0].raw_data["payload"],
            "little"
        );
    }

    #[test]
    fn truncation_repeats_until_fit() {
        let mut batch = vec![
            entity_with_payload("a", &"a".repeat(2000)),
            entity_with_payload("b", &"b".repeat(2000)),
        ];
        let report = shrink_to_limit(&mut batch, 700).unwrap();
        assert!(report.truncated >= 2);
        for entity in &batch {
            assert_eq!(
                entity.raw_data.as_ref().unwrap()[0].raw_data["payload"],
                "TRUNCATED"
            );
        }
    }

    #[test]
    fn batch_without_raw_data_cannot_shrink() {
        let big = Entity::new("a", "t", "Record").with_property("blob", "x".repeat(2000));
        let mut batch = vec![big];
        let err = shrink_to_limit(&mut batch, 100).unwrap_err();
        assert_eq!(err.code, "CANNOT_SHRINK");
    }

    #[test]
    fn already_truncated_fields_cannot_shrink_further() {
        let mut batch = vec![entity_with_payload("a", "x")];
        // Everything shrinkable is smaller than the truncation marker.
        let err = shrink_to_limit(&mut batch, 10).unwrap_err();
        assert_eq!(err.code, "CANNOT_SHRINK");
    }

    #[test]
    fn report_accounts_for_size_delta() {
        let mut batch = vec![entity_with_payload("a", &"p".repeat(5000))];
        let report = shrink_to_limit(&mut batch, 600).unwrap();
        assert!(report.initial_bytes > 5000);
        assert!(report.final_bytes < report.initial_bytes);
        assert_eq!(
            report.initial_bytes - report.final_bytes,
            5002 - TRUNCATED_SIZE_ESTIMATE
        );
    }
}
