//! Removal of a future's execution state, so the next run starts it over.

use anyhow::{anyhow, Result};

use ledgerplan_journal::DeploymentLoader;
use ledgerplan_types::{FutureId, JournalMessage};

use crate::error::InvariantError;
use crate::state::DeploymentState;

/// Execution states that list `future_id` as a dependency.
pub fn dependents(state: &DeploymentState, future_id: &str) -> Vec<FutureId> {
    state
        .execution_states
        .values()
        .filter(|exec| exec.dependencies.contains(future_id))
        .map(|exec| exec.id.clone())
        .collect()
}

/// Journal a `WIPE_APPLY` for `future_id`. Refused while other execution
/// states depend on it: those have to be wiped first.
pub fn wipe(
    state: &mut DeploymentState,
    loader: &dyn DeploymentLoader,
    future_id: &str,
) -> Result<()> {
    if state.get(future_id).is_none() {
        return Err(anyhow!(InvariantError::MissingExecutionState {
            future_id: future_id.to_string(),
        }));
    }
    let dependents = dependents(state, future_id);
    if !dependents.is_empty() {
        return Err(anyhow!(
            "Cannot wipe {} because other futures depend on it: {}",
            future_id,
            dependents.join(", ")
        ));
    }

    tracing::info!(future_id, "wiping execution state");
    state.record_and_apply(
        loader,
        JournalMessage::WipeApply {
            future_id: future_id.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerplan_journal::MemoryDeploymentLoader;
    use ledgerplan_types::{
        Address, ContractAtExecution, ExecutionKind, ExecutionState, ExecutionStatus, FutureType,
    };
    use std::collections::BTreeSet;

    fn exec(id: &str, deps: &[&str]) -> ExecutionState {
        ExecutionState {
            id: id.into(),
            future_type: FutureType::ContractAt,
            status: ExecutionStatus::Failed,
            dependencies: deps.iter().map(|d| d.to_string()).collect::<BTreeSet<_>>(),
            strategy: "basic".into(),
            kind: ExecutionKind::ContractAt(ContractAtExecution {
                contract_name: "C".into(),
                artifact_id: id.into(),
                contract_address: Address::new([1; 20]),
            }),
            network_interactions: vec![],
            result: None,
        }
    }

    #[test]
    fn test_wipe_refuses_futures_with_dependents() {
        let mut state = DeploymentState::new();
        state.execution_states.insert("Mod#A".into(), exec("Mod#A", &[]));
        state
            .execution_states
            .insert("Mod#B".into(), exec("Mod#B", &["Mod#A"]));
        let loader = MemoryDeploymentLoader::new();

        let err = wipe(&mut state, &loader, "Mod#A").unwrap_err();
        assert!(err.to_string().contains("Mod#B"));

        wipe(&mut state, &loader, "Mod#B").unwrap();
        wipe(&mut state, &loader, "Mod#A").unwrap();
        assert!(state.execution_states.is_empty());
        assert_eq!(loader.message_count(), 2);

        assert!(wipe(&mut state, &loader, "Mod#A").is_err());
    }
}
