//! Dependency-ordered step execution.
//!
//! The run proceeds in two phases. Validation: the invocation validator,
//! step start states, and the dependency graph are all checked before any
//! step executes. Execution: roots are dispatched first and a step becomes
//! runnable once every dependency reached a terminal status; in-flight work
//! is bounded by a semaphore. Failures never propagate out of the scheduler;
//! they land in the per-step results and the partial-dataset metadata.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use graphbeam_storage::{GraphObjectStore, JobState, StorageLayout, StoreOptions};
use graphbeam_types::{
    ExecutionSummary, IntegrationError, Metric, RunEventSink, StepId, StepMetadata, StepResult,
    StepStatus,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{
    ExecutionContext, IntegrationInstance, InvocationConfig, StepExecutionContext,
    StepStartStates,
};
use crate::graph::StepGraph;

/// Runtime options for one run (not part of the invocation config).
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Maximum steps in flight at once.
    pub concurrency: usize,
    /// Cancels dispatch of not-yet-started steps; in-flight steps finish
    /// naturally.
    pub cancel: CancellationToken,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            cancel: CancellationToken::new(),
        }
    }
}

struct StepOutcome {
    id: StepId,
    status: StepStatus,
    encountered: Vec<String>,
}

/// Run every declared step in dependency order and return the summary.
///
/// The staging root is cleared after validation passes and `summary.json`
/// is written on completion (skipped when the run was cancelled).
///
/// # Errors
///
/// Returns `validation` / `config` errors from the validation phase, and
/// `io` errors from staging-root maintenance. Step failures are reported in
/// the returned summary, never as an `Err`.
pub async fn execute_integration(
    instance: IntegrationInstance,
    invocation: InvocationConfig,
    layout: StorageLayout,
    sink: Arc<dyn RunEventSink>,
    options: ExecutionOptions,
) -> Result<ExecutionSummary, IntegrationError> {
    let instance = Arc::new(instance);
    let execution_config = match &invocation.load_execution_config {
        Some(load) => load(instance.config.clone())?,
        None => instance.config.clone(),
    };
    let run_ctx = ExecutionContext {
        instance: instance.clone(),
        execution_config: execution_config.clone(),
    };

    if let Some(validate) = &invocation.validate_invocation {
        if let Err(err) = validate(run_ctx.clone()).await {
            sink.validation_failure(&err);
            return Err(err);
        }
    }

    let metadata = invocation.step_metadata();
    let start_states = resolve_start_states(&invocation, &run_ctx, &metadata).await?;
    let graph = StepGraph::build(&metadata)?;

    layout.reset()?;
    let store = Arc::new(GraphObjectStore::new(
        layout.clone(),
        StoreOptions {
            schema_validation: invocation.enable_schema_validation,
            hooks: invocation.hooks.clone(),
            ..StoreOptions::default()
        },
    ));

    tracing::info!(
        instance = %instance.id,
        steps = graph.len(),
        concurrency = options.concurrency.max(1),
        "Starting integration run"
    );

    let (statuses, encountered_map) = run_steps(
        &invocation,
        &graph,
        &metadata,
        &start_states,
        &instance,
        &execution_config,
        &store,
        &options,
    )
    .await?;

    if let Some(after) = &invocation.after_execution {
        if let Err(err) = after(run_ctx.clone()).await {
            tracing::warn!(error = %err, "After-execution hook failed");
        }
    }

    match layout.total_size_bytes() {
        Ok(bytes) => sink.publish_metric(&Metric::bytes("disk-usage", bytes)),
        Err(err) => tracing::warn!(error = %err, "Failed to measure staging disk usage"),
    }

    let results = build_results(&metadata, &statuses, encountered_map);
    let summary = ExecutionSummary::new(results);
    if options.cancel.is_cancelled() {
        tracing::warn!("Run cancelled; skipping summary finalization");
    } else {
        layout.write_summary(&summary)?;
    }
    Ok(summary)
}

async fn resolve_start_states(
    invocation: &InvocationConfig,
    run_ctx: &ExecutionContext,
    metadata: &[StepMetadata],
) -> Result<StepStartStates, IntegrationError> {
    let states = match &invocation.get_step_start_states {
        Some(get) => get(run_ctx.clone()).await?,
        None => StepStartStates::enable_all(metadata.iter().map(|m| m.id.clone())),
    };

    let missing: Vec<&str> = metadata
        .iter()
        .map(|m| &m.id)
        .filter(|id| states.get(id).is_none())
        .map(StepId::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(IntegrationError::config(
            "START_STATES_MISSING",
            format!("missing start state for step(s): {}", missing.join(", ")),
        ));
    }
    for id in states.0.keys() {
        if !metadata.iter().any(|m| &m.id == id) {
            tracing::warn!(step = %id, "Start state provided for an undeclared step");
        }
    }
    Ok(states)
}

#[allow(clippy::too_many_arguments)]
async fn run_steps(
    invocation: &InvocationConfig,
    graph: &StepGraph,
    metadata: &[StepMetadata],
    start_states: &StepStartStates,
    instance: &Arc<IntegrationInstance>,
    execution_config: &serde_json::Value,
    store: &Arc<GraphObjectStore>,
    options: &ExecutionOptions,
) -> Result<(HashMap<StepId, StepStatus>, HashMap<StepId, Vec<String>>), IntegrationError> {
    let metadata_by_id: HashMap<StepId, StepMetadata> = metadata
        .iter()
        .map(|m| (m.id.clone(), m.clone()))
        .collect();
    let handlers: HashMap<StepId, crate::config::StepHandler> = invocation
        .steps
        .iter()
        .map(|s| (s.metadata.id.clone(), s.handler.clone()))
        .collect();

    let total = graph.len();
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut join_set: JoinSet<StepOutcome> = JoinSet::new();

    let mut ready: VecDeque<StepId> = graph.roots().into();
    let mut queued: HashSet<StepId> = ready.iter().cloned().collect();
    let mut statuses: HashMap<StepId, StepStatus> = HashMap::new();
    let mut encountered_map: HashMap<StepId, Vec<String>> = HashMap::new();

    while statuses.len() < total {
        let mut inline_terminal: Vec<StepOutcome> = Vec::new();

        while let Some(id) = ready.pop_front() {
            let disabled = start_states.get(&id).map(|s| s.disabled).unwrap_or(false);
            if disabled {
                tracing::info!(step = %id, "Step disabled by start state");
                inline_terminal.push(StepOutcome {
                    id,
                    status: StepStatus::Disabled,
                    encountered: Vec::new(),
                });
                continue;
            }
            if options.cancel.is_cancelled() {
                tracing::info!(step = %id, "Step cancelled before start");
                inline_terminal.push(StepOutcome {
                    id,
                    status: StepStatus::Cancelled,
                    encountered: Vec::new(),
                });
                continue;
            }

            let step_metadata = metadata_by_id[&id].clone();
            let handler = handlers[&id].clone();
            let dependency_failed = step_metadata
                .depends_on
                .iter()
                .any(|dep| statuses.get(dep).is_some_and(|s| s.is_incomplete()));
            let wrapper = invocation.execution_handler_wrapper.clone();
            let semaphore = semaphore.clone();
            let store = store.clone();
            let instance = instance.clone();
            let execution_config = execution_config.clone();

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::error!(step = %id, "Step semaphore closed before dispatch");
                        return StepOutcome {
                            id,
                            status: StepStatus::Failure,
                            encountered: Vec::new(),
                        };
                    }
                };
                execute_step(
                    id,
                    step_metadata,
                    handler,
                    wrapper,
                    instance,
                    execution_config,
                    store,
                    dependency_failed,
                )
                .await
            });
        }

        if !inline_terminal.is_empty() {
            for outcome in inline_terminal {
                mark_terminal(
                    graph,
                    &mut statuses,
                    &mut encountered_map,
                    &mut ready,
                    &mut queued,
                    outcome,
                );
            }
            continue;
        }
        if statuses.len() >= total {
            break;
        }

        match join_set.join_next().await {
            Some(Ok(outcome)) => mark_terminal(
                graph,
                &mut statuses,
                &mut encountered_map,
                &mut ready,
                &mut queued,
                outcome,
            ),
            Some(Err(join_err)) => {
                return Err(IntegrationError::step_handler(format!(
                    "step task panicked: {join_err}"
                )));
            }
            None => break,
        }
    }

    Ok((statuses, encountered_map))
}

#[allow(clippy::too_many_arguments)]
async fn execute_step(
    id: StepId,
    metadata: StepMetadata,
    handler: crate::config::StepHandler,
    wrapper: Option<crate::config::ExecutionHandlerWrapper>,
    instance: Arc<IntegrationInstance>,
    execution_config: serde_json::Value,
    store: Arc<GraphObjectStore>,
    dependency_failed: bool,
) -> StepOutcome {
    let started = Instant::now();
    let job_state = Arc::new(JobState::new(id.clone(), store));
    let ctx = StepExecutionContext {
        instance,
        execution_config,
        job_state: job_state.clone(),
    };

    let handler_result = match wrapper {
        Some(wrap) => wrap(ctx, handler).await,
        None => handler(ctx).await,
    };
    let flush_result = job_state.flush().await;
    let encountered = job_state.encountered_types();
    warn_undeclared_types(&metadata, &encountered);

    let status = match (&handler_result, &flush_result) {
        (Ok(()), Ok(())) => {
            if dependency_failed {
                StepStatus::PartialSuccessDueToDependencyFailure
            } else {
                StepStatus::Success
            }
        }
        (Err(err), _) => {
            tracing::error!(step = %id, error = %err, "Step handler failed");
            StepStatus::Failure
        }
        (_, Err(err)) => {
            tracing::error!(step = %id, error = %err, "Step flush failed");
            StepStatus::Failure
        }
    };

    tracing::info!(
        step = %id,
        status = %status,
        duration_secs = started.elapsed().as_secs_f64(),
        encountered = encountered.len(),
        "Step completed"
    );
    StepOutcome {
        id,
        status,
        encountered,
    }
}

fn warn_undeclared_types(metadata: &StepMetadata, encountered: &[String]) {
    let declared = metadata.declared_types();
    let partial_marker = !metadata.partial_types().is_empty();
    for written in encountered {
        if !declared.contains(written) {
            tracing::warn!(
                step = %metadata.id,
                undeclared_type = %written,
                partial_marker,
                "Step wrote a type outside its declared types"
            );
        }
    }
}

fn mark_terminal(
    graph: &StepGraph,
    statuses: &mut HashMap<StepId, StepStatus>,
    encountered_map: &mut HashMap<StepId, Vec<String>>,
    ready: &mut VecDeque<StepId>,
    queued: &mut HashSet<StepId>,
    outcome: StepOutcome,
) {
    statuses.insert(outcome.id.clone(), outcome.status);
    encountered_map.insert(outcome.id.clone(), outcome.encountered);
    for dependent in graph.dependents_of(&outcome.id) {
        if queued.contains(dependent) {
            continue;
        }
        let runnable = graph
            .dependencies_of(dependent)
            .iter()
            .all(|dep| statuses.contains_key(dep));
        if runnable {
            queued.insert(dependent.clone());
            ready.push_back(dependent.clone());
        }
    }
}

fn build_results(
    metadata: &[StepMetadata],
    statuses: &HashMap<StepId, StepStatus>,
    mut encountered_map: HashMap<StepId, Vec<String>>,
) -> Vec<StepResult> {
    metadata
        .iter()
        .map(|m| StepResult {
            id: m.id.clone(),
            name: m.name.clone(),
            declared_types: m.declared_types(),
            partial_types: m.partial_types(),
            encountered_types: encountered_map.remove(&m.id).unwrap_or_default(),
            depends_on: if m.depends_on.is_empty() {
                None
            } else {
                Some(m.depends_on.clone())
            },
            status: statuses
                .get(&m.id)
                .copied()
                .unwrap_or(StepStatus::Cancelled),
        })
        .collect()
}
