//! Per-step facade over the shared graph object store.
//!
//! Routes adds under the owning step id (so flushes land in that step's
//! directory), records the `_type` of every successfully added object, and
//! exposes run-wide lookups so dependent steps can read what their
//! dependencies produced.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use graphbeam_types::{Entity, IntegrationError, Relationship, StepId};

use crate::object_store::GraphObjectStore;

#[derive(Default)]
struct Encountered {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl Encountered {
    fn record(&mut self, object_type: &str) {
        if self.seen.insert(object_type.to_string()) {
            self.order.push(object_type.to_string());
        }
    }
}

/// A step's handle on the run's graph object store.
pub struct JobState {
    step_id: StepId,
    store: Arc<GraphObjectStore>,
    encountered: Mutex<Encountered>,
}

impl JobState {
    #[must_use]
    pub fn new(step_id: StepId, store: Arc<GraphObjectStore>) -> Self {
        Self {
            step_id,
            store,
            encountered: Mutex::new(Encountered::default()),
        }
    }

    #[must_use]
    pub fn step_id(&self) -> &StepId {
        &self.step_id
    }

    /// The `_type`s this step has written so far, in first-write order.
    #[must_use]
    pub fn encountered_types(&self) -> Vec<String> {
        self.encountered
            .lock()
            .expect("encountered-types lock poisoned")
            .order
            .clone()
    }

    fn record(&self, object_type: &str) {
        self.encountered
            .lock()
            .expect("encountered-types lock poisoned")
            .record(object_type);
    }

    /// Add one entity under this step.
    ///
    /// # Errors
    ///
    /// Propagates store errors (`duplicate_key`, `io`).
    pub async fn add_entity(&self, entity: Entity) -> Result<Entity, IntegrationError> {
        let added = self.store.add_entity(&self.step_id, entity).await?;
        self.record(&added.entity_type);
        Ok(added)
    }

    /// Add a batch of entities under this step.
    ///
    /// # Errors
    ///
    /// Stops at the first duplicate; earlier entities are retained and their
    /// types recorded.
    pub async fn add_entities(
        &self,
        entities: Vec<Entity>,
    ) -> Result<Vec<Entity>, IntegrationError> {
        let mut added = Vec::with_capacity(entities.len());
        for entity in entities {
            added.push(self.add_entity(entity).await?);
        }
        Ok(added)
    }

    /// Add one relationship under this step.
    ///
    /// # Errors
    ///
    /// Propagates store errors (`duplicate_key`, `io`).
    pub async fn add_relationship(
        &self,
        relationship: Relationship,
    ) -> Result<Relationship, IntegrationError> {
        let added = self.store.add_relationship(&self.step_id, relationship).await?;
        self.record(&added.relationship_type);
        Ok(added)
    }

    /// Add a batch of relationships under this step.
    ///
    /// # Errors
    ///
    /// Stops at the first duplicate; earlier relationships are retained.
    pub async fn add_relationships(
        &self,
        relationships: Vec<Relationship>,
    ) -> Result<Vec<Relationship>, IntegrationError> {
        let mut added = Vec::with_capacity(relationships.len());
        for relationship in relationships {
            added.push(self.add_relationship(relationship).await?);
        }
        Ok(added)
    }

    /// Look up an entity written by any step of this run.
    ///
    /// # Errors
    ///
    /// Propagates store read errors.
    pub async fn find_entity(&self, key: &str) -> Result<Option<Entity>, IntegrationError> {
        self.store.find_entity(key).await
    }

    /// Iterate all entities of a type written by any step of this run.
    ///
    /// # Errors
    ///
    /// Propagates visitor and store read errors.
    pub async fn iterate_entities<F, Fut>(
        &self,
        entity_type: &str,
        visit: F,
    ) -> Result<(), IntegrationError>
    where
        F: FnMut(Entity) -> Fut,
        Fut: Future<Output = Result<(), IntegrationError>>,
    {
        self.store.iterate_entities(entity_type, visit).await
    }

    /// Iterate all relationships of a type written by any step of this run.
    ///
    /// # Errors
    ///
    /// Propagates visitor and store read errors.
    pub async fn iterate_relationships<F, Fut>(
        &self,
        relationship_type: &str,
        visit: F,
    ) -> Result<(), IntegrationError>
    where
        F: FnMut(Relationship) -> Fut,
        Fut: Future<Output = Result<(), IntegrationError>>,
    {
        self.store.iterate_relationships(relationship_type, visit).await
    }

    /// Flush everything buffered; called once at step completion.
    ///
    /// # Errors
    ///
    /// Propagates flush write errors.
    pub async fn flush(&self) -> Result<(), IntegrationError> {
        self.store.flush_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::StorageLayout;
    use crate::object_store::StoreOptions;

    fn shared_store(dir: &tempfile::TempDir) -> Arc<GraphObjectStore> {
        let layout = StorageLayout::new(dir.path().join("staging"));
        layout.reset().unwrap();
        Arc::new(GraphObjectStore::new(
            layout,
            StoreOptions {
                schema_validation: Some(false),
                ..StoreOptions::default()
            },
        ))
    }

    #[tokio::test]
    async fn encountered_types_track_successful_adds() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobState::new(StepId::new("s"), shared_store(&dir));

        job.add_entity(Entity::new("u1", "acme_user", "User"))
            .await
            .unwrap();
        job.add_entity(Entity::new("u2", "acme_user", "User"))
            .await
            .unwrap();
        job.add_relationship(Relationship::direct("r1", "acme_user_has_user", "HAS", "u1", "u2"))
            .await
            .unwrap();

        assert_eq!(
            job.encountered_types(),
            vec!["acme_user", "acme_user_has_user"]
        );
    }

    #[tokio::test]
    async fn encountered_types_include_types_before_a_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobState::new(StepId::new("s"), shared_store(&dir));

        let result = job
            .add_entities(vec![
                Entity::new("key_a", "duplicate_entity", "Record"),
                Entity::new("key_a", "duplicate_entity", "Record"),
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(job.encountered_types(), vec!["duplicate_entity"]);
    }

    #[tokio::test]
    async fn dependent_step_reads_what_dependency_wrote() {
        let dir = tempfile::tempdir().unwrap();
        let store = shared_store(&dir);

        let producer = JobState::new(StepId::new("fetch-users"), store.clone());
        producer
            .add_entity(Entity::new("u1", "acme_user", "User"))
            .await
            .unwrap();
        producer.flush().await.unwrap();

        let consumer = JobState::new(StepId::new("fetch-devices"), store);
        let found = consumer.find_entity("u1").await.unwrap().unwrap();
        assert_eq!(found.entity_type, "acme_user");

        let mut seen = Vec::new();
        consumer
            .iterate_entities("acme_user", |e| {
                seen.push(e.key);
                async { Ok(()) }
            })
            .await
            .unwrap();
        assert_eq!(seen, vec!["u1"]);
    }
}
