//! # Remote collection orchestrator
//!
//! Runs one host collector on every schedulable node of a cluster and
//! gathers the per-node output.
//!
//! - **`NodeResolver`**: decides which nodes take part in a run
//! - **`TaskRunner`**: runs the task on one node; `PodRunner` does it with a
//!   pinned, short-lived pod
//! - **`Orchestrator`**: one worker per node, a shared deadline, all or nothing
//! - **`check_permissions`**: access reviews for everything a run touches

#[macro_use]
extern crate tracing;

mod error;
mod names;
mod orchestrator;
mod pod_runner;
mod rbac;
mod resolver;
mod runner;
#[cfg(test)]
mod testing;

pub use error::{
    CollectError,
    RunError,
};
pub use names::{
    generate,
    NameGenerator,
};
pub use orchestrator::{
    Orchestrator,
    OrchestratorSettings,
    ResultSet,
};
pub use pod_runner::{
    collector_config_map,
    PodRunner,
    PodSettings,
    CONTAINER_NAME,
    JOB_TYPE,
    ROLE_LABEL,
    SPEC_KEY,
};
pub use rbac::{
    check_permissions,
    PermissionDenied,
};
pub use resolver::{
    ClusterNodeResolver,
    NodeResolver,
    NodesFuture,
};
pub use runner::{
    NodeOutcome,
    RunFuture,
    TaskRunner,
};
