//! Reconciliation of an edited plan with the recorded execution.
//!
//! Each future of the plan that already has an execution state goes through
//! three stages, and a failing stage skips the later ones:
//!
//! 1. the future type must be unchanged
//! 2. dependencies added since the future started must already have succeeded
//! 3. the resolved parameters must match the recorded ones (all mismatches
//!    are reported)
//!
//! Futures that were executed but are no longer in the plan are reported as
//! warnings only.

mod dependencies;
mod futures;
mod utils;

pub use utils::strip_metadata;

use std::collections::BTreeMap;

use ledgerplan_journal::DeploymentLoader;
use ledgerplan_types::{FutureId, Plan};

use crate::codec::ArtifactResolver;
use crate::resolve::ResolveContext;
use crate::state::DeploymentState;

/// What reconciliation needs besides the plan and the state.
pub struct ReconcileContext<'a> {
    pub resolve: ResolveContext<'a>,
    pub artifacts: &'a dyn ArtifactResolver,
    pub loader: &'a dyn DeploymentLoader,
    /// Strategy the current run uses.
    pub strategy: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub failures: BTreeMap<FutureId, Vec<String>>,
    /// Executed futures that are no longer part of the plan.
    pub missing_executed_futures: Vec<FutureId>,
}

impl ReconciliationResult {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

pub fn reconcile(
    plan: &Plan,
    state: &DeploymentState,
    ctx: &ReconcileContext<'_>,
) -> ReconciliationResult {
    let mut result = ReconciliationResult::default();

    for future in plan.futures() {
        let Some(exec) = state.get(future.id()) else {
            continue;
        };

        let failures = if future.future_type() != exec.future_type {
            vec![format!(
                "Future with id {} has changed from {} to {}",
                future.id(),
                exec.future_type,
                future.future_type()
            )]
        } else {
            let dependency_failures = dependencies::reconcile_dependencies(future, exec, state);
            if dependency_failures.is_empty() {
                futures::reconcile_fields(future, exec, ctx)
            } else {
                dependency_failures
            }
        };

        if !failures.is_empty() {
            tracing::debug!(future_id = future.id(), failures = failures.len(), "reconciliation failed");
            result.failures.insert(future.id().to_string(), failures);
        }
    }

    result.missing_executed_futures = state
        .execution_states
        .keys()
        .filter(|id| !plan.contains(id))
        .cloned()
        .collect();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StaticArtifactResolver;
    use crate::resolve::ModuleParameters;
    use ledgerplan_journal::MemoryDeploymentLoader;
    use ledgerplan_types::{
        Address, Argument, Artifact, ContractCallFuture, ContractDeploymentFuture,
        DeploymentExecution, ExecutionKind, ExecutionResult, ExecutionState, ExecutionStatus,
        Future, FutureType, Module, SenderRef, SuccessResult,
    };
    use serde_json::json;
    use std::collections::BTreeSet;

    fn accounts() -> Vec<Address> {
        vec![Address::new([1; 20]), Address::new([2; 20])]
    }

    fn deployed_foo(args: Vec<serde_json::Value>, status: ExecutionStatus) -> ExecutionState {
        let address = Address::new([9; 20]);
        ExecutionState {
            id: "Mod#Foo".into(),
            future_type: FutureType::ContractDeployment,
            status,
            dependencies: BTreeSet::new(),
            strategy: "basic".into(),
            kind: ExecutionKind::Deployment(DeploymentExecution {
                contract_name: "Foo".into(),
                artifact_id: "Mod#Foo".into(),
                constructor_args: args,
                libraries: Default::default(),
                value: 0,
                from: Address::new([1; 20]),
            }),
            network_interactions: vec![],
            result: (status == ExecutionStatus::Success).then(|| ExecutionResult::Success {
                result: SuccessResult::Deployment { address },
            }),
        }
    }

    struct Fixture {
        state: DeploymentState,
        loader: MemoryDeploymentLoader,
        resolver: StaticArtifactResolver,
        parameters: ModuleParameters,
        accounts: Vec<Address>,
    }

    impl Fixture {
        fn new(exec: ExecutionState, bytecode: &str) -> Self {
            let loader = MemoryDeploymentLoader::new();
            loader
                .store_artifact("Mod#Foo", &Artifact::new("Foo", "0x6080aabb0002"))
                .unwrap();
            let mut state = DeploymentState::new();
            state.execution_states.insert(exec.id.clone(), exec);
            Self {
                state,
                loader,
                resolver: StaticArtifactResolver::new()
                    .with(Artifact::new("Foo", bytecode))
                    .with(Artifact::new("Bar", bytecode)),
                parameters: ModuleParameters::new(),
                accounts: accounts(),
            }
        }

        fn reconcile(&self, plan: &Plan, strategy: &str) -> ReconciliationResult {
            let ctx = ReconcileContext {
                resolve: ResolveContext {
                    state: &self.state,
                    accounts: &self.accounts,
                    default_sender: self.accounts[1],
                    parameters: &self.parameters,
                },
                artifacts: &self.resolver,
                loader: &self.loader,
                strategy,
            };
            reconcile(plan, &self.state, &ctx)
        }
    }

    fn plan_with(future: impl Into<Future>) -> Plan {
        Plan::new(Module::new("Mod").with(future))
    }

    #[test]
    fn test_unchanged_future_reconciles() {
        let fixture = Fixture::new(
            deployed_foo(vec![json!(1)], ExecutionStatus::Success),
            "0x6080ccdd0002",
        );
        let plan = plan_with(
            ContractDeploymentFuture::new("Mod", "Foo").with_args(vec![Argument::from(json!(1))]),
        );
        let result = fixture.reconcile(&plan, "basic");
        assert!(result.is_ok(), "{:?}", result.failures);
        assert!(result.missing_executed_futures.is_empty());
    }

    #[test]
    fn test_field_changes_are_all_reported() {
        let fixture = Fixture::new(
            deployed_foo(vec![json!(1)], ExecutionStatus::Success),
            "0x6081aabb0002",
        );
        let mut future = ContractDeploymentFuture::new("Mod", "Bar")
            .with_id("Mod#Foo")
            .with_args(vec![Argument::from(json!(2))])
            .with_from(SenderRef::Account(1));
        future.value = ledgerplan_types::ValueSource::Literal(5);

        let result = fixture.reconcile(&plan_with(future), "other");
        let failures = &result.failures["Mod#Foo"];
        assert_eq!(
            failures,
            &vec![
                "Contract name has been changed from Foo to Bar".to_string(),
                "Artifact bytecodes have been changed".to_string(),
                "Constructor args have been changed".to_string(),
                "Value has been changed from 0 to 5".to_string(),
                format!(
                    "From account has been changed from {} to {}",
                    Address::new([1; 20]),
                    Address::new([2; 20])
                ),
                "Strategy changed from basic to other".to_string(),
            ]
        );
    }

    #[test]
    fn test_type_change_short_circuits() {
        let fixture = Fixture::new(
            deployed_foo(vec![], ExecutionStatus::Success),
            "0x6080aabb0002",
        );
        let mut module = Module::new("Mod");
        module.add(ContractDeploymentFuture::new("Mod", "Other"));
        module.add(ContractCallFuture::new("Mod", "Mod#Other", "go").with_id("Mod#Foo"));

        let result = fixture.reconcile(&Plan::new(module), "basic");
        assert_eq!(
            result.failures["Mod#Foo"],
            vec!["Future with id Mod#Foo has changed from CONTRACT_DEPLOYMENT to CONTRACT_CALL"
                .to_string()]
        );
    }

    #[test]
    fn test_new_dependency_must_have_succeeded() {
        let fixture = Fixture::new(
            deployed_foo(vec![], ExecutionStatus::Failed),
            "0x6080aabb0002",
        );
        let module = Module::new("Mod")
            .with(ContractDeploymentFuture::new("Mod", "Bar"))
            .with(Future::from(ContractDeploymentFuture::new("Mod", "Foo")).after("Mod#Bar"));

        let result = fixture.reconcile(&Plan::new(module), "basic");
        assert_eq!(
            result.failures["Mod#Foo"],
            vec!["A dependency from Mod#Foo to Mod#Bar has been added, and Mod#Bar has not been successfully executed yet, so this change is incompatible".to_string()]
        );
    }

    #[test]
    fn test_missing_executed_futures_are_warnings() {
        let fixture = Fixture::new(
            deployed_foo(vec![], ExecutionStatus::Success),
            "0x6080aabb0002",
        );
        let plan = plan_with(ContractDeploymentFuture::new("Mod", "Other"));
        let result = fixture.reconcile(&plan, "basic");
        assert!(result.is_ok());
        assert_eq!(result.missing_executed_futures, vec!["Mod#Foo".to_string()]);
    }
}
