//! Batch planning: dependency graph to ordered groups of futures.
//!
//! Every future in a batch depends only on futures of earlier batches (or on
//! futures that already succeeded in a previous run), so the futures of one
//! batch can be in flight at the same time.

use std::collections::{BTreeMap, BTreeSet};

use ledgerplan_types::{Address, FutureId, Plan, PlanError};

use crate::state::DeploymentState;

/// Group the plan's futures into batches. Futures that already succeeded are
/// treated as placed and do not appear in the output.
pub fn batch(plan: &Plan, state: &DeploymentState) -> Result<Vec<Vec<FutureId>>, PlanError> {
    let mut remaining: BTreeMap<&str, &BTreeSet<FutureId>> = BTreeMap::new();
    let mut placed: BTreeSet<&str> = BTreeSet::new();

    for future in plan.futures() {
        for dependency in future.dependencies() {
            if !plan.contains(dependency) {
                return Err(PlanError::UnknownDependency {
                    future_id: future.id().to_string(),
                    dependency: dependency.clone(),
                });
            }
        }
        if state.is_success(future.id()) {
            placed.insert(future.id());
        } else {
            remaining.insert(future.id(), future.dependencies());
        }
    }

    let mut batches = Vec::new();
    while !remaining.is_empty() {
        // BTreeMap iteration keeps each batch sorted by id.
        let ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, deps)| deps.iter().all(|d| placed.contains(d.as_str())))
            .map(|(id, _)| *id)
            .collect();

        if ready.is_empty() {
            return Err(PlanError::Cycle {
                futures: remaining.keys().map(|id| id.to_string()).collect(),
            });
        }

        for id in ready.iter().copied() {
            remaining.remove(id);
            placed.insert(id);
        }
        batches.push(ready.into_iter().map(str::to_string).collect());
    }

    tracing::debug!(batches = batches.len(), "computed execution batches");
    Ok(batches)
}

/// Processing order inside a batch: futures holding a reserved nonce first,
/// by ascending nonce, then by sender, then by id. Futures without an
/// execution state count as sent by `default_sender`.
pub fn order_batch(
    state: &DeploymentState,
    batch: &[FutureId],
    default_sender: Address,
) -> Vec<FutureId> {
    let mut keyed: Vec<(u64, Address, FutureId)> = batch
        .iter()
        .map(|id| {
            let exec = state.get(id);
            let (nonce, sender) = match exec.and_then(|e| e.pending_nonce_and_sender()) {
                Some(reserved) => reserved,
                None => (
                    u64::MAX,
                    exec.and_then(|e| e.kind.from_address())
                        .unwrap_or(default_sender),
                ),
            };
            (nonce, sender, id.clone())
        })
        .collect();
    keyed.sort();
    keyed.into_iter().map(|(_, _, id)| id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerplan_types::{
        Bytes, ContractAtExecution, ContractCallFuture, ContractDeploymentFuture, ExecutionKind,
        ExecutionResult, ExecutionState, ExecutionStatus, Future, FutureType, Module,
        NetworkInteraction, OnchainInteraction, SendDataExecution, SuccessResult,
    };

    fn after(future: impl Into<Future>, dependency: &str) -> Future {
        future.into().after(dependency)
    }

    fn plan() -> Plan {
        let mut module = Module::new("Mod");
        module.add(ContractDeploymentFuture::new("Mod", "A"));
        module.add(ContractDeploymentFuture::new("Mod", "B"));
        module.add(after(
            ContractCallFuture::new("Mod", "Mod#A", "init"),
            "Mod#B",
        ));
        module.add(after(ContractDeploymentFuture::new("Mod", "C"), "Mod#A.init"));
        Plan::new(module)
    }

    fn succeeded(id: &str) -> ExecutionState {
        ExecutionState {
            id: id.into(),
            future_type: FutureType::ContractAt,
            status: ExecutionStatus::Success,
            dependencies: BTreeSet::new(),
            strategy: "basic".into(),
            kind: ExecutionKind::ContractAt(ContractAtExecution {
                contract_name: "A".into(),
                artifact_id: id.into(),
                contract_address: Address::new([1; 20]),
            }),
            network_interactions: vec![],
            result: Some(ExecutionResult::Success {
                result: SuccessResult::ContractAt {
                    address: Address::new([1; 20]),
                },
            }),
        }
    }

    #[test]
    fn test_batches_follow_dependencies() {
        let batches = batch(&plan(), &DeploymentState::new()).unwrap();
        assert_eq!(
            batches,
            vec![
                vec!["Mod#A".to_string(), "Mod#B".to_string()],
                vec!["Mod#A.init".to_string()],
                vec!["Mod#C".to_string()],
            ]
        );
    }

    #[test]
    fn test_successful_futures_are_preplaced() {
        let mut state = DeploymentState::new();
        state
            .execution_states
            .insert("Mod#A".into(), succeeded("Mod#A"));
        state
            .execution_states
            .insert("Mod#B".into(), succeeded("Mod#B"));
        let batches = batch(&plan(), &state).unwrap();
        assert_eq!(
            batches,
            vec![vec!["Mod#A.init".to_string()], vec!["Mod#C".to_string()]]
        );
    }

    #[test]
    fn test_cycle_names_stuck_futures() {
        let module = Module::new("Mod")
            .with(after(ContractDeploymentFuture::new("Mod", "A"), "Mod#B"))
            .with(after(ContractDeploymentFuture::new("Mod", "B"), "Mod#A"))
            .with(ContractDeploymentFuture::new("Mod", "C"));
        let err = batch(&Plan::new(module), &DeploymentState::new()).unwrap_err();
        assert_eq!(
            err,
            PlanError::Cycle {
                futures: vec!["Mod#A".into(), "Mod#B".into()]
            }
        );
    }

    #[test]
    fn test_unknown_dependency_is_reported() {
        let module =
            Module::new("Mod").with(after(ContractDeploymentFuture::new("Mod", "A"), "X#Y"));
        let err = batch(&Plan::new(module), &DeploymentState::new()).unwrap_err();
        assert!(matches!(err, PlanError::UnknownDependency { .. }));
    }

    fn sending(id: &str, from: Address, nonce: Option<u64>) -> ExecutionState {
        ExecutionState {
            id: id.into(),
            future_type: FutureType::SendData,
            status: ExecutionStatus::Started,
            dependencies: BTreeSet::new(),
            strategy: "basic".into(),
            kind: ExecutionKind::SendData(SendDataExecution {
                to: Address::new([7; 20]),
                data: None,
                value: 0,
                from,
            }),
            network_interactions: vec![NetworkInteraction::Onchain(OnchainInteraction {
                id: 1,
                from,
                to: Some(Address::new([7; 20])),
                data: Bytes::default(),
                value: 0,
                nonce,
                transactions: vec![],
                should_be_resent: false,
            })],
            result: None,
        }
    }

    #[test]
    fn test_reserved_nonces_are_processed_first() {
        let sender = Address::new([0xa1; 20]);
        let mut state = DeploymentState::new();
        for exec in [
            sending("Mod#a", sender, None),
            sending("Mod#b", sender, Some(1)),
            sending("Mod#c", sender, Some(0)),
        ] {
            state.execution_states.insert(exec.id.clone(), exec);
        }
        let batch = vec!["Mod#a".to_string(), "Mod#b".to_string(), "Mod#c".to_string()];

        assert_eq!(
            order_batch(&state, &batch, Address::new([1; 20])),
            vec!["Mod#c".to_string(), "Mod#b".to_string(), "Mod#a".to_string()]
        );
    }
}
