use ledgerplan_types::{ExecutionState, Future};

use crate::state::DeploymentState;

/// Dependencies added since the future started are only allowed when they
/// already succeeded.
pub fn reconcile_dependencies(
    future: &Future,
    exec: &ExecutionState,
    state: &DeploymentState,
) -> Vec<String> {
    future
        .dependencies()
        .iter()
        .filter(|dep| !exec.dependencies.contains(*dep))
        .filter(|dep| !state.is_success(dep))
        .map(|dep| {
            format!(
                "A dependency from {} to {} has been added, and {} has not been successfully executed yet, so this change is incompatible",
                future.id(),
                dep,
                dep
            )
        })
        .collect()
}
