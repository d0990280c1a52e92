//! Buffered, type-indexed store for collected graph objects.
//!
//! Adds are deduplicated on `_key` across the whole run via a secondary
//! `_key -> _type` index. Buffers overflow to disk once they exceed the
//! flush threshold; flushed files are grouped by owning step under
//! `graph/<stepId>/` and hard-linked into the per-type `index/` tree so
//! lookups and iteration by type stay cheap after flushing.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use graphbeam_types::{Entity, FlushedFile, IntegrationError, Relationship, StepId};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::codec;
use crate::layout::{GraphObjectKind, StorageLayout};
use crate::validator::{NoopSchemaValidator, SchemaValidator, SCHEMA_VALIDATION_ENV_VAR};

/// Buffer size above which a kind's buffer is flushed to disk.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 500;

/// Hook applied to every entity before it is admitted; the returned entity
/// replaces the argument.
pub type BeforeAddEntityHook = Arc<dyn Fn(Entity) -> BoxFuture<'static, Entity> + Send + Sync>;

/// Hook applied to every relationship before it is admitted.
pub type BeforeAddRelationshipHook =
    Arc<dyn Fn(Relationship) -> BoxFuture<'static, Relationship> + Send + Sync>;

/// Optional pre-add hooks from the invocation configuration.
#[derive(Clone, Default)]
pub struct StoreHooks {
    pub before_add_entity: Option<BeforeAddEntityHook>,
    pub before_add_relationship: Option<BeforeAddRelationshipHook>,
}

/// Store construction options.
pub struct StoreOptions {
    pub flush_threshold: usize,
    /// `None` falls back to the `ENABLE_GRAPH_OBJECT_SCHEMA_VALIDATION`
    /// environment variable.
    pub schema_validation: Option<bool>,
    pub validator: Arc<dyn SchemaValidator>,
    pub hooks: StoreHooks,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            schema_validation: None,
            validator: Arc::new(NoopSchemaValidator),
            hooks: StoreHooks::default(),
        }
    }
}

#[derive(Default)]
struct Buffers {
    entities: Vec<(StepId, Entity)>,
    relationships: Vec<(StepId, Relationship)>,
    /// All-time `_key -> _type`, including flushed objects.
    entity_types: HashMap<String, String>,
    relationship_types: HashMap<String, String>,
    flushed_entity_types: HashSet<String>,
    flushed_relationship_types: HashSet<String>,
    seq: u64,
}

impl Buffers {
    /// Flush tokens sort lexicographically in allocation order, so directory
    /// walks replay insertion order.
    fn next_token(&mut self) -> String {
        self.seq += 1;
        format!("{:06}-{}", self.seq, Uuid::new_v4())
    }
}

/// The shared staging store all steps of a run write through.
pub struct GraphObjectStore {
    layout: StorageLayout,
    flush_threshold: usize,
    schema_validation: bool,
    validator: Arc<dyn SchemaValidator>,
    hooks: StoreHooks,
    buffers: Mutex<Buffers>,
}

impl GraphObjectStore {
    #[must_use]
    pub fn new(layout: StorageLayout, options: StoreOptions) -> Self {
        let schema_validation = options.schema_validation.unwrap_or_else(|| {
            std::env::var(SCHEMA_VALIDATION_ENV_VAR)
                .map(|v| !v.is_empty())
                .unwrap_or(false)
        });
        Self {
            layout,
            flush_threshold: options.flush_threshold,
            schema_validation,
            validator: options.validator,
            hooks: options.hooks,
            buffers: Mutex::new(Buffers::default()),
        }
    }

    #[must_use]
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Admit one entity on behalf of `step_id`.
    ///
    /// The `before_add_entity` hook runs first and its return value replaces
    /// the argument. A schema-validation rejection is logged and the entity
    /// is admitted anyway.
    ///
    /// # Errors
    ///
    /// Returns a `duplicate_key` error when another entity already carries
    /// the same `_key`, or an `io` error when an overflow flush fails.
    pub async fn add_entity(
        &self,
        step_id: &StepId,
        entity: Entity,
    ) -> Result<Entity, IntegrationError> {
        let entity = match &self.hooks.before_add_entity {
            Some(hook) => hook(entity).await,
            None => entity,
        };

        let mut bufs = self.buffers.lock().await;
        if bufs.entity_types.contains_key(&entity.key) {
            return Err(IntegrationError::duplicate_key(format!(
                "Duplicate _key detected (_key={})",
                entity.key
            )));
        }
        if self.schema_validation {
            if let Err(violation) = self.validator.validate_entity(&entity) {
                tracing::warn!(
                    key = %entity.key,
                    entity_type = %entity.entity_type,
                    violation,
                    "Entity failed schema validation; admitting anyway"
                );
            }
        }
        bufs.entity_types
            .insert(entity.key.clone(), entity.entity_type.clone());
        bufs.entities.push((step_id.clone(), entity.clone()));
        if bufs.entities.len() > self.flush_threshold {
            self.flush_entities_locked(&mut bufs).await?;
        }
        Ok(entity)
    }

    /// Admit a batch of entities.
    ///
    /// # Errors
    ///
    /// Stops at the first duplicate `_key`; entities admitted before the
    /// duplicate are retained.
    pub async fn add_entities(
        &self,
        step_id: &StepId,
        entities: Vec<Entity>,
    ) -> Result<Vec<Entity>, IntegrationError> {
        let mut added = Vec::with_capacity(entities.len());
        for entity in entities {
            added.push(self.add_entity(step_id, entity).await?);
        }
        Ok(added)
    }

    /// Admit one relationship on behalf of `step_id`.
    ///
    /// # Errors
    ///
    /// Returns a `duplicate_key` error when another relationship already
    /// carries the same `_key`, or an `io` error when an overflow flush
    /// fails.
    pub async fn add_relationship(
        &self,
        step_id: &StepId,
        relationship: Relationship,
    ) -> Result<Relationship, IntegrationError> {
        let relationship = match &self.hooks.before_add_relationship {
            Some(hook) => hook(relationship).await,
            None => relationship,
        };

        let mut bufs = self.buffers.lock().await;
        if bufs.relationship_types.contains_key(&relationship.key) {
            return Err(IntegrationError::duplicate_key(format!(
                "Duplicate _key detected (_key={})",
                relationship.key
            )));
        }
        if self.schema_validation {
            if let Err(violation) = self.validator.validate_relationship(&relationship) {
                tracing::warn!(
                    key = %relationship.key,
                    relationship_type = %relationship.relationship_type,
                    violation,
                    "Relationship failed schema validation; admitting anyway"
                );
            }
        }
        bufs.relationship_types.insert(
            relationship.key.clone(),
            relationship.relationship_type.clone(),
        );
        bufs.relationships
            .push((step_id.clone(), relationship.clone()));
        if bufs.relationships.len() > self.flush_threshold {
            self.flush_relationships_locked(&mut bufs).await?;
        }
        Ok(relationship)
    }

    /// Admit a batch of relationships; same contract as [`Self::add_entities`].
    ///
    /// # Errors
    ///
    /// Stops at the first duplicate `_key`.
    pub async fn add_relationships(
        &self,
        step_id: &StepId,
        relationships: Vec<Relationship>,
    ) -> Result<Vec<Relationship>, IntegrationError> {
        let mut added = Vec::with_capacity(relationships.len());
        for relationship in relationships {
            added.push(self.add_relationship(step_id, relationship).await?);
        }
        Ok(added)
    }

    /// Look up an entity by `_key` across all types, memory first, then the
    /// flushed partition of its type.
    ///
    /// # Errors
    ///
    /// Returns an `io` error when a flushed file cannot be read.
    pub async fn find_entity(&self, key: &str) -> Result<Option<Entity>, IntegrationError> {
        let (entity_type, flushed, in_memory) = {
            let bufs = self.buffers.lock().await;
            let Some(entity_type) = bufs.entity_types.get(key) else {
                return Ok(None);
            };
            let in_memory = bufs
                .entities
                .iter()
                .find(|(_, e)| e.key == key)
                .map(|(_, e)| e.clone());
            (
                entity_type.clone(),
                bufs.flushed_entity_types.contains(entity_type),
                in_memory,
            )
        };
        if let Some(entity) = in_memory {
            return Ok(Some(entity));
        }
        if flushed {
            let dir = self
                .layout
                .type_index_dir(GraphObjectKind::Entities, &entity_type);
            for entry in self.layout.walk_dir(&dir)? {
                let bytes = tokio::fs::read(&entry.file_path).await?;
                if let FlushedFile::Entities { entities } = codec::decode(&bytes)? {
                    if let Some(entity) = entities.into_iter().find(|e| e.key == key) {
                        return Ok(Some(entity));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Visit every entity of `entity_type` in insertion order, flushed files
    /// first, then the live buffer. The visitor is awaited per object.
    ///
    /// # Errors
    ///
    /// Propagates visitor errors and flushed-file read errors.
    pub async fn iterate_entities<F, Fut>(
        &self,
        entity_type: &str,
        mut visit: F,
    ) -> Result<(), IntegrationError>
    where
        F: FnMut(Entity) -> Fut,
        Fut: Future<Output = Result<(), IntegrationError>>,
    {
        let (flushed, buffered) = {
            let bufs = self.buffers.lock().await;
            (
                bufs.flushed_entity_types.contains(entity_type),
                bufs.entities
                    .iter()
                    .filter(|(_, e)| e.entity_type == entity_type)
                    .map(|(_, e)| e.clone())
                    .collect::<Vec<_>>(),
            )
        };
        if flushed {
            let dir = self
                .layout
                .type_index_dir(GraphObjectKind::Entities, entity_type);
            for entry in self.layout.walk_dir(&dir)? {
                let bytes = tokio::fs::read(&entry.file_path).await?;
                if let FlushedFile::Entities { entities } = codec::decode(&bytes)? {
                    for entity in entities
                        .into_iter()
                        .filter(|e| e.entity_type == entity_type)
                    {
                        visit(entity).await?;
                    }
                }
            }
        }
        for entity in buffered {
            visit(entity).await?;
        }
        Ok(())
    }

    /// Visit every relationship of `relationship_type`; same contract as
    /// [`Self::iterate_entities`].
    ///
    /// # Errors
    ///
    /// Propagates visitor errors and flushed-file read errors.
    pub async fn iterate_relationships<F, Fut>(
        &self,
        relationship_type: &str,
        mut visit: F,
    ) -> Result<(), IntegrationError>
    where
        F: FnMut(Relationship) -> Fut,
        Fut: Future<Output = Result<(), IntegrationError>>,
    {
        let (flushed, buffered) = {
            let bufs = self.buffers.lock().await;
            (
                bufs.flushed_relationship_types.contains(relationship_type),
                bufs.relationships
                    .iter()
                    .filter(|(_, r)| r.relationship_type == relationship_type)
                    .map(|(_, r)| r.clone())
                    .collect::<Vec<_>>(),
            )
        };
        if flushed {
            let dir = self
                .layout
                .type_index_dir(GraphObjectKind::Relationships, relationship_type);
            for entry in self.layout.walk_dir(&dir)? {
                let bytes = tokio::fs::read(&entry.file_path).await?;
                if let FlushedFile::Relationships { relationships } = codec::decode(&bytes)? {
                    for relationship in relationships
                        .into_iter()
                        .filter(|r| r.relationship_type == relationship_type)
                    {
                        visit(relationship).await?;
                    }
                }
            }
        }
        for relationship in buffered {
            visit(relationship).await?;
        }
        Ok(())
    }

    /// Flush both buffers regardless of thresholds.
    ///
    /// # Errors
    ///
    /// Returns an `io` error when a file write fails.
    pub async fn flush_all(&self) -> Result<(), IntegrationError> {
        let mut bufs = self.buffers.lock().await;
        self.flush_entities_locked(&mut bufs).await?;
        self.flush_relationships_locked(&mut bufs).await?;
        Ok(())
    }

    async fn flush_entities_locked(&self, bufs: &mut Buffers) -> Result<(), IntegrationError> {
        if bufs.entities.is_empty() {
            return Ok(());
        }
        let drained = std::mem::take(&mut bufs.entities);
        for (step_id, entities) in group_by_step(drained) {
            let token = bufs.next_token();
            let types = distinct_types(entities.iter().map(|e| e.entity_type.as_str()));
            let dir = self.layout.step_dir(&step_id, GraphObjectKind::Entities);
            let path = dir.join(format!("{token}.json"));
            tokio::fs::create_dir_all(&dir).await?;
            let count = entities.len();
            let bytes = codec::encode(&FlushedFile::Entities { entities })?;
            tokio::fs::write(&path, bytes).await?;
            for entity_type in types {
                let index_dir = self
                    .layout
                    .type_index_dir(GraphObjectKind::Entities, &entity_type);
                tokio::fs::create_dir_all(&index_dir).await?;
                link_or_copy(&path, &index_dir.join(format!("{token}.json")))?;
                bufs.flushed_entity_types.insert(entity_type);
            }
            tracing::debug!(step = %step_id, count, file = %path.display(), "Flushed entity buffer");
        }
        Ok(())
    }

    async fn flush_relationships_locked(
        &self,
        bufs: &mut Buffers,
    ) -> Result<(), IntegrationError> {
        if bufs.relationships.is_empty() {
            return Ok(());
        }
        let drained = std::mem::take(&mut bufs.relationships);
        for (step_id, relationships) in group_by_step(drained) {
            let token = bufs.next_token();
            let types =
                distinct_types(relationships.iter().map(|r| r.relationship_type.as_str()));
            let dir = self
                .layout
                .step_dir(&step_id, GraphObjectKind::Relationships);
            let path = dir.join(format!("{token}.json"));
            tokio::fs::create_dir_all(&dir).await?;
            let count = relationships.len();
            let bytes = codec::encode(&FlushedFile::Relationships { relationships })?;
            tokio::fs::write(&path, bytes).await?;
            for relationship_type in types {
                let index_dir = self
                    .layout
                    .type_index_dir(GraphObjectKind::Relationships, &relationship_type);
                tokio::fs::create_dir_all(&index_dir).await?;
                link_or_copy(&path, &index_dir.join(format!("{token}.json")))?;
                bufs.flushed_relationship_types.insert(relationship_type);
            }
            tracing::debug!(step = %step_id, count, file = %path.display(), "Flushed relationship buffer");
        }
        Ok(())
    }
}

fn group_by_step<T>(drained: Vec<(StepId, T)>) -> Vec<(StepId, Vec<T>)> {
    let mut groups: Vec<(StepId, Vec<T>)> = Vec::new();
    for (step_id, object) in drained {
        match groups.iter_mut().find(|(s, _)| *s == step_id) {
            Some((_, objects)) => objects.push(object),
            None => groups.push((step_id, vec![object])),
        }
    }
    groups
}

fn distinct_types<'a>(types: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for t in types {
        if seen.insert(t) {
            out.push(t.to_string());
        }
    }
    out
}

fn link_or_copy(original: &Path, link: &Path) -> Result<(), IntegrationError> {
    if std::fs::hard_link(original, link).is_err() {
        std::fs::copy(original, link)?;
    }
    Ok(())
}
