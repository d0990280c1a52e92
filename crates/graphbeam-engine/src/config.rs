//! Invocation configuration: what the embedder supplies to run an
//! integration.
//!
//! All dynamic hooks return boxed futures so implementers can supply either
//! an immediately-ready value or real async work; the scheduler awaits them
//! uniformly.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use graphbeam_storage::{JobState, StoreHooks};
use graphbeam_types::{IntegrationError, StepId, StepMetadata};

/// The configured integration instance this run collects for.
#[derive(Debug, Clone)]
pub struct IntegrationInstance {
    pub id: String,
    pub name: String,
    /// Provider credentials and settings, loaded by the embedder.
    pub config: serde_json::Value,
}

impl IntegrationInstance {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            config: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// Run-scoped context handed to validation and lifecycle hooks.
#[derive(Clone)]
pub struct ExecutionContext {
    pub instance: Arc<IntegrationInstance>,
    pub execution_config: serde_json::Value,
}

/// Step-scoped context handed to step handlers.
#[derive(Clone)]
pub struct StepExecutionContext {
    pub instance: Arc<IntegrationInstance>,
    pub execution_config: serde_json::Value,
    pub job_state: Arc<JobState>,
}

/// A step's collection function.
pub type StepHandler =
    Arc<dyn Fn(StepExecutionContext) -> BoxFuture<'static, Result<(), IntegrationError>> + Send + Sync>;

/// One declared step: metadata plus its handler.
#[derive(Clone)]
pub struct IntegrationStep {
    pub metadata: StepMetadata,
    pub handler: StepHandler,
}

/// Derives the run's execution config from the instance config.
pub type LoadExecutionConfig = Arc<
    dyn Fn(serde_json::Value) -> Result<serde_json::Value, IntegrationError> + Send + Sync,
>;

/// Rejects invalid instance configuration before any step runs.
pub type ValidateInvocation =
    Arc<dyn Fn(ExecutionContext) -> BoxFuture<'static, Result<(), IntegrationError>> + Send + Sync>;

/// Whether a step should run at all this invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepStartState {
    pub disabled: bool,
}

/// Start states for every declared step.
#[derive(Debug, Clone, Default)]
pub struct StepStartStates(pub HashMap<StepId, StepStartState>);

impl StepStartStates {
    /// Start states enabling every given step.
    #[must_use]
    pub fn enable_all(ids: impl IntoIterator<Item = StepId>) -> Self {
        Self(
            ids.into_iter()
                .map(|id| (id, StepStartState::default()))
                .collect(),
        )
    }

    #[must_use]
    pub fn get(&self, id: &StepId) -> Option<StepStartState> {
        self.0.get(id).copied()
    }
}

/// Computes per-step start states; must cover every declared step.
pub type GetStepStartStates = Arc<
    dyn Fn(ExecutionContext) -> BoxFuture<'static, Result<StepStartStates, IntegrationError>>
        + Send
        + Sync,
>;

/// Wraps every step handler invocation; must invoke the handler exactly once.
pub type ExecutionHandlerWrapper = Arc<
    dyn Fn(StepExecutionContext, StepHandler) -> BoxFuture<'static, Result<(), IntegrationError>>
        + Send
        + Sync,
>;

/// Runs once after all steps, regardless of step failures.
pub type AfterExecution =
    Arc<dyn Fn(ExecutionContext) -> BoxFuture<'static, Result<(), IntegrationError>> + Send + Sync>;

/// Everything the embedder wires into a run.
#[derive(Clone, Default)]
pub struct InvocationConfig {
    pub steps: Vec<IntegrationStep>,
    /// Instance-config field declarations for documentation tooling; opaque
    /// to the runtime.
    pub instance_config_fields: Option<serde_json::Value>,
    pub load_execution_config: Option<LoadExecutionConfig>,
    pub validate_invocation: Option<ValidateInvocation>,
    pub get_step_start_states: Option<GetStepStartStates>,
    /// Pre-add hooks wired through to the object store.
    pub hooks: StoreHooks,
    pub execution_handler_wrapper: Option<ExecutionHandlerWrapper>,
    pub after_execution: Option<AfterExecution>,
    /// Overrides the `ENABLE_GRAPH_OBJECT_SCHEMA_VALIDATION` default.
    pub enable_schema_validation: Option<bool>,
    /// Opaque ingestion-source configuration, passed through to embedders.
    pub ingestion_config: Option<serde_json::Value>,
}

impl InvocationConfig {
    /// Declared step metadata in declaration order.
    #[must_use]
    pub fn step_metadata(&self) -> Vec<StepMetadata> {
        self.steps.iter().map(|s| s.metadata.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn start_states_enable_all_covers_every_id() {
        let states =
            StepStartStates::enable_all(vec![StepId::new("a"), StepId::new("b")]);
        assert_eq!(states.get(&StepId::new("a")), Some(StepStartState::default()));
        assert!(states.get(&StepId::new("missing")).is_none());
    }

    #[test]
    fn invocation_config_default_is_empty() {
        let config = InvocationConfig::default();
        assert!(config.steps.is_empty());
        assert!(config.validate_invocation.is_none());
        assert!(config.enable_schema_validation.is_none());
    }

    #[tokio::test]
    async fn handlers_accept_ready_and_deferred_work() {
        let ready: StepHandler = Arc::new(|_ctx| async { Ok(()) }.boxed());
        let deferred: StepHandler = Arc::new(|_ctx| {
            async {
                tokio::task::yield_now().await;
                Ok(())
            }
            .boxed()
        });

        let instance = Arc::new(IntegrationInstance::new("inst", "Test"));
        let dir = tempfile::tempdir().unwrap();
        let layout = graphbeam_storage::StorageLayout::new(dir.path().join("staging"));
        layout.reset().unwrap();
        let store = Arc::new(graphbeam_storage::GraphObjectStore::new(
            layout,
            graphbeam_storage::StoreOptions::default(),
        ));
        let ctx = StepExecutionContext {
            instance,
            execution_config: serde_json::Value::Null,
            job_state: Arc::new(JobState::new(StepId::new("s"), store)),
        };
        assert!(ready(ctx.clone()).await.is_ok());
        assert!(deferred(ctx).await.is_ok());
    }
}
