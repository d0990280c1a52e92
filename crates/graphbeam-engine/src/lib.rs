//! Step scheduling and run lifecycle for Graphbeam integrations.

pub mod config;
pub mod events;
pub mod graph;
pub mod scheduler;

pub use config::{
    ExecutionContext, IntegrationInstance, IntegrationStep, InvocationConfig, StepExecutionContext,
    StepHandler, StepStartState, StepStartStates,
};
pub use events::TracingEventSink;
pub use graph::StepGraph;
pub use scheduler::{execute_integration, ExecutionOptions};
