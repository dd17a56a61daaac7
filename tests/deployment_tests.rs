//! Deployment Integration Tests
//!
//! End-to-end runs of the deployer against the in-memory ledger.
//!
//! Test categories:
//! - Batching and idempotent re-runs
//! - Reads: static calls, event arguments, existing contracts
//! - Validation before anything is journaled
//! - Reconciliation of edited plans
//! - Previous-run gating, wipe and hold
//!
//! Run with:
//!   cargo test --test deployment_tests -- --nocapture

mod common;

use anyhow::Result;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use common::{call_needle, event_log, TestEnv};
use ledgerplan::batcher;
use ledgerplan::journal::DeploymentLoader;
use ledgerplan::reconciliation::{reconcile, ReconcileContext};
use ledgerplan::resolve::{ModuleParameters, ResolveContext};
use ledgerplan::transport::InMemoryLedger;
use ledgerplan::types::{
    Address, AddressSource, Argument, Artifact, Bytes, ContractAtFuture, ContractCallFuture,
    ContractDeploymentFuture, ExecutionResult, ExecutionState, Future, Module, ModuleParameter,
    NameOrIndex, Plan, PlanError, ReadEventArgumentFuture, SendDataFuture, SenderRef,
    StaticCallFuture, ValueSource,
};
use ledgerplan::{
    ArtifactCodec, DeploymentError, DeploymentResult, ExecutionStrategy, StrategyStep,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn foo_and_bar_call() -> Module {
    Module::new("Mod")
        .with(ContractDeploymentFuture::new("Mod", "Foo"))
        .with(
            ContractCallFuture::new("Mod", "Mod#Foo", "bar")
                .with_args(vec![Argument::from(json!(1)), Argument::from(json!("a"))]),
        )
}

fn contract1(arg: &str) -> Module {
    Module::new("Mod").with(
        ContractDeploymentFuture::new("Mod", "Contract1").with_args(vec![Argument::from(json!(arg))]),
    )
}

fn no_parameters() -> ModuleParameters {
    ModuleParameters::new()
}

// =============================================================================
// Batching and Idempotence
// =============================================================================

#[tokio::test]
async fn test_deploy_then_call_and_rerun_sends_nothing() -> Result<()> {
    let env = TestEnv::new();
    let batches = batcher::batch(
        &Plan::new(foo_and_bar_call()),
        &ledgerplan::DeploymentState::new(),
    )?;
    assert_eq!(
        batches,
        vec![vec!["Mod#Foo".to_string()], vec!["Mod#Foo.bar".to_string()]]
    );

    let result = env.deployer().deploy(foo_and_bar_call(), no_parameters()).await?;
    let DeploymentResult::Success { contracts } = result else {
        panic!("expected success, got {:?}", result);
    };
    let expected = InMemoryLedger::contract_address(&env.account(0), 0);
    assert_eq!(contracts["Mod#Foo"].contract_name, "Foo");
    assert_eq!(contracts["Mod#Foo"].address, expected);
    assert_eq!(contracts.len(), 1);
    assert_eq!(env.loader.deployed_addresses()?["Mod#Foo"], expected);

    let sent = env.ledger.sent_transactions();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].to, Some(expected));

    let rerun = env.deployer().deploy(foo_and_bar_call(), no_parameters()).await?;
    assert!(rerun.is_success());
    assert_eq!(env.ledger.sent_transactions().len(), 2);

    let status = env.deployer().status()?;
    assert!(status.is_complete());
    assert_eq!(status.chain_id, Some(31337));
    assert_eq!(status.contracts["Mod#Foo"], ("Foo".to_string(), expected));
    Ok(())
}

#[tokio::test]
async fn test_nonces_increase_per_sender() -> Result<()> {
    let env = TestEnv::new();
    let module = Module::new("Mod")
        .with(ContractDeploymentFuture::new("Mod", "Foo"))
        .with(ContractDeploymentFuture::new("Mod", "Bar"))
        .with(ContractDeploymentFuture::new("Mod", "Token"))
        .with(
            ContractDeploymentFuture::new("Mod", "Foo")
                .with_id("Mod#OtherFoo")
                .with_from(SenderRef::Account(1)),
        );

    let result = env.deployer().deploy(module, no_parameters()).await?;
    assert!(result.is_success(), "{:?}", result);

    let sent = env.ledger.sent_transactions();
    let nonces_of = |sender: Address| {
        sent.iter()
            .filter(|tx| tx.from == sender)
            .map(|tx| tx.nonce)
            .collect::<Vec<_>>()
    };
    assert_eq!(nonces_of(env.account(0)), vec![0, 1, 2]);
    assert_eq!(nonces_of(env.account(1)), vec![0]);
    Ok(())
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn test_reads_feed_later_futures() -> Result<()> {
    let env = TestEnv::new();
    let (topics, data) = event_log("Minted", json!({"supply": 100}));
    env.ledger.emit_on(br#""deploy":"Token""#, topics, data);
    env.ledger
        .set_call_result(&call_needle("balanceOf"), Bytes(b"[42]".to_vec()));
    let existing = InMemoryLedger::contract_address(&env.account(9), 7);

    let module = Module::new("Mod")
        .with(ContractDeploymentFuture::new("Mod", "Token"))
        .with(ReadEventArgumentFuture::new(
            "Mod",
            "Mod#Token",
            "Minted",
            NameOrIndex::Name("supply".into()),
        ))
        .with(
            StaticCallFuture::new("Mod", "Mod#Token", "balanceOf")
                .with_args(vec![Argument::Account(0)]),
        )
        .with(
            SendDataFuture::new("Mod", "tip", AddressSource::Future("Mod#Token".into()))
                .with_value(ValueSource::StaticCall("Mod#Token.balanceOf".into())),
        )
        .with(ContractAtFuture::new("Mod", "Foo", AddressSource::Literal(existing)));

    let result = env.deployer().deploy(module, no_parameters()).await?;
    let DeploymentResult::Success { contracts } = result else {
        panic!("expected success, got {:?}", result);
    };
    assert_eq!(contracts["Mod#Foo"].address, existing);

    let state = env.deployer().load_state()?;
    let value = |id: &str| {
        state
            .get(id)
            .and_then(ExecutionState::success_result)
            .and_then(|r| r.value().cloned())
    };
    assert_eq!(value("Mod#Token.Minted.supply.0"), Some(json!(100)));
    assert_eq!(value("Mod#Token.balanceOf"), Some(json!(42)));

    let token = contracts["Mod#Token"].address;
    let tip = env
        .ledger
        .sent_transactions()
        .into_iter()
        .find(|tx| tx.to == Some(token))
        .expect("tip transaction");
    assert_eq!(tip.value, 42);
    Ok(())
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_invalid_inputs_are_all_reported_before_journaling() -> Result<()> {
    let env = TestEnv::new();
    let module = Module::new("Mod")
        .with(ContractDeploymentFuture::new("Mod", "Token").with_args(vec![
            Argument::Parameter(ModuleParameter::new("Mod", "supply")),
            Argument::Account(99),
        ]))
        .with(ContractDeploymentFuture::new("Mod", "Unknown"));

    let result = env.deployer().deploy(module, no_parameters()).await?;
    let DeploymentResult::ValidationFailed { errors } = result else {
        panic!("expected validation failure, got {:?}", result);
    };
    assert_eq!(errors.len(), 3, "{:?}", errors);
    assert!(errors
        .iter()
        .any(|e| matches!(e, PlanError::MissingParameter { name, .. } if name == "supply")));
    assert!(errors
        .iter()
        .any(|e| matches!(e, PlanError::InvalidAccount { index: 99, .. })));
    assert!(errors
        .iter()
        .any(|e| matches!(e, PlanError::MissingArtifact { contract_name, .. } if contract_name == "Unknown")));
    assert_eq!(env.loader.message_count(), 0);
    assert!(env.ledger.sent_transactions().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cycle_fails_validation() -> Result<()> {
    let env = TestEnv::new();
    let module = Module::new("Mod")
        .with(Future::from(ContractDeploymentFuture::new("Mod", "Foo")).after("Mod#Bar"))
        .with(Future::from(ContractDeploymentFuture::new("Mod", "Bar")).after("Mod#Foo"));

    let result = env.deployer().deploy(module, no_parameters()).await?;
    assert_eq!(
        result,
        DeploymentResult::ValidationFailed {
            errors: vec![PlanError::Cycle {
                futures: vec!["Mod#Bar".into(), "Mod#Foo".into()]
            }]
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_parameters_and_defaults_are_resolved() -> Result<()> {
    let env = TestEnv::new();
    let module = Module::new("Mod").with(ContractDeploymentFuture::new("Mod", "Token").with_args(
        vec![
            Argument::Parameter(ModuleParameter::new("Mod", "supply")),
            Argument::Parameter(ModuleParameter::new("Mod", "symbol").with_default(json!("TKN"))),
        ],
    ));
    let mut parameters = ModuleParameters::new();
    parameters.insert(
        "Mod".into(),
        BTreeMap::from([("supply".to_string(), json!(1000))]),
    );

    let result = env.deployer().deploy(module, parameters).await?;
    assert!(result.is_success(), "{:?}", result);

    let sent = env.ledger.sent_transactions();
    let data: serde_json::Value = serde_json::from_slice(sent[0].data.as_slice())?;
    assert_eq!(data["args"], json!([1000, "TKN"]));
    Ok(())
}

#[tokio::test]
async fn test_chain_change_aborts_the_run() -> Result<()> {
    let env = TestEnv::new();
    env.deployer().deploy(contract1("unchanged"), no_parameters()).await?;

    let other_chain = InMemoryLedger::new(1);
    let deployer = common::deployer(&other_chain, env.loader.clone(), env.config.clone());
    let err = deployer
        .deploy(contract1("unchanged"), no_parameters())
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<DeploymentError>(),
        Some(&DeploymentError::ChainIdChanged {
            recorded: 31337,
            current: 1
        })
    );
    Ok(())
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test]
async fn test_changed_constructor_args_fail_reconciliation() -> Result<()> {
    let env = TestEnv::new();
    let first = env.deployer().deploy(contract1("unchanged"), no_parameters()).await?;
    assert!(first.is_success());

    let second = env.deployer().deploy(contract1("changed"), no_parameters()).await?;
    assert_eq!(
        second,
        DeploymentResult::ReconciliationFailed {
            failures: BTreeMap::from([(
                "Mod#Contract1".to_string(),
                vec!["Constructor args have been changed".to_string()]
            )])
        }
    );
    assert_eq!(env.ledger.sent_transactions().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_removed_futures_are_reported_as_missing() -> Result<()> {
    let env = TestEnv::new();
    let module = Module::new("Mod")
        .with(ContractDeploymentFuture::new("Mod", "Foo"))
        .with(ContractDeploymentFuture::new("Mod", "Bar").with_id("Mod#Old"));
    assert!(env.deployer().deploy(module, no_parameters()).await?.is_success());

    let edited = Module::new("Mod").with(ContractDeploymentFuture::new("Mod", "Foo"));
    let deployer = env.deployer();
    let state = deployer.load_state()?;
    let accounts = env.ledger.accounts();
    let parameters = no_parameters();
    let artifacts = common::artifacts();
    let result = reconcile(
        &Plan::new(edited.clone()),
        &state,
        &ReconcileContext {
            resolve: ResolveContext {
                state: &state,
                accounts: &accounts,
                default_sender: accounts[0],
                parameters: &parameters,
            },
            artifacts: &artifacts,
            loader: env.loader.as_ref(),
            strategy: "basic",
        },
    );
    assert!(result.is_ok(), "{:?}", result.failures);
    assert_eq!(result.missing_executed_futures, vec!["Mod#Old".to_string()]);

    assert!(deployer.deploy(edited, no_parameters()).await?.is_success());
    Ok(())
}

#[tokio::test]
async fn test_added_dependency_must_have_succeeded() -> Result<()> {
    let env = TestEnv::new();
    env.ledger.revert_on(b"boom", Bytes(b"no fallback".to_vec()));
    let ping = || {
        SendDataFuture::new("Mod", "ping", AddressSource::Account(1))
            .with_data(Bytes(b"boom".to_vec()))
    };
    let module = Module::new("Mod")
        .with(ContractDeploymentFuture::new("Mod", "Foo"))
        .with(ContractDeploymentFuture::new("Mod", "Bar"))
        .with(ping());

    let first = env.deployer().deploy(module, no_parameters()).await?;
    let DeploymentResult::ExecutionError {
        failed, successful, ..
    } = first
    else {
        panic!("expected an execution error, got {:?}", first);
    };
    assert_eq!(
        failed,
        vec![(
            "Mod#ping".to_string(),
            "Simulating the transaction failed: no fallback".to_string()
        )]
    );
    assert_eq!(successful, vec!["Mod#Bar".to_string(), "Mod#Foo".to_string()]);

    let on_failed = Module::new("Mod")
        .with(ContractDeploymentFuture::new("Mod", "Foo"))
        .with(Future::from(ContractDeploymentFuture::new("Mod", "Bar")).after("Mod#ping"))
        .with(ping());
    let result = env.deployer().deploy(on_failed, no_parameters()).await?;
    let DeploymentResult::ReconciliationFailed { failures } = result else {
        panic!("expected reconciliation failure, got {:?}", result);
    };
    assert_eq!(
        failures["Mod#Bar"],
        vec!["A dependency from Mod#Bar to Mod#ping has been added, and Mod#ping has not been successfully executed yet, so this change is incompatible".to_string()]
    );

    let on_succeeded = Module::new("Mod")
        .with(ContractDeploymentFuture::new("Mod", "Foo"))
        .with(Future::from(ContractDeploymentFuture::new("Mod", "Bar")).after("Mod#Foo"))
        .with(ping());
    let result = env.deployer().deploy(on_succeeded, no_parameters()).await?;
    assert!(
        matches!(result, DeploymentResult::PreviousRunError { .. }),
        "{:?}",
        result
    );
    Ok(())
}

// =============================================================================
// Previous Runs, Wipe and Hold
// =============================================================================

#[tokio::test]
async fn test_failed_future_blocks_rerun_until_wiped() -> Result<()> {
    let env = TestEnv::new();
    env.ledger
        .revert_on(&call_needle("fail"), Bytes(b"not allowed".to_vec()));
    let module = Module::new("Mod")
        .with(ContractDeploymentFuture::new("Mod", "Foo"))
        .with(ContractCallFuture::new("Mod", "Mod#Foo", "fail"));

    let first = env.deployer().deploy(module.clone(), no_parameters()).await?;
    assert!(matches!(first, DeploymentResult::ExecutionError { .. }));

    let second = env.deployer().deploy(module, no_parameters()).await?;
    assert_eq!(
        second,
        DeploymentResult::PreviousRunError {
            futures: BTreeMap::from([(
                "Mod#Foo.fail".to_string(),
                "Simulating the transaction failed: not allowed".to_string()
            )])
        }
    );

    let deployer = env.deployer();
    let err = deployer.wipe("Mod#Foo").unwrap_err();
    assert!(err.to_string().contains("Mod#Foo.fail"));
    deployer.wipe("Mod#Foo.fail")?;
    assert!(deployer.status()?.failed.is_empty());

    let fixed = Module::new("Mod")
        .with(ContractDeploymentFuture::new("Mod", "Foo"))
        .with(ContractCallFuture::new("Mod", "Mod#Foo", "succeed"));
    assert!(deployer.deploy(fixed, no_parameters()).await?.is_success());
    assert_eq!(env.ledger.sent_transactions().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_failure_only_skips_its_dependents() -> Result<()> {
    let env = TestEnv::new();
    env.ledger
        .revert_on(&call_needle("fail"), Bytes(b"not allowed".to_vec()));
    let module = Module::new("Mod")
        .with(ContractDeploymentFuture::new("Mod", "Foo"))
        .with(ContractCallFuture::new("Mod", "Mod#Foo", "fail"))
        .with(Future::from(ContractDeploymentFuture::new("Mod", "Bar")).after("Mod#Foo"))
        .with(Future::from(ContractDeploymentFuture::new("Mod", "Token")).after("Mod#Bar"))
        .with(
            Future::from(ContractDeploymentFuture::new("Mod", "Contract1"))
                .after("Mod#Foo.fail"),
        );

    let deployer = env.deployer();
    let result = deployer.deploy(module, no_parameters()).await?;
    let DeploymentResult::ExecutionError {
        started,
        failed,
        successful,
        ..
    } = result
    else {
        panic!("expected an execution error, got {:?}", result);
    };
    assert!(started.is_empty());
    assert_eq!(
        failed,
        vec![(
            "Mod#Foo.fail".to_string(),
            "Simulating the transaction failed: not allowed".to_string()
        )]
    );
    assert_eq!(
        successful,
        vec![
            "Mod#Bar".to_string(),
            "Mod#Foo".to_string(),
            "Mod#Token".to_string()
        ]
    );

    let state = deployer.load_state()?;
    assert!(state.get("Mod#Contract1").is_none());
    assert_eq!(env.ledger.sent_transactions().len(), 3);
    Ok(())
}

struct ApprovalStrategy;

impl ExecutionStrategy for ApprovalStrategy {
    fn name(&self) -> &str {
        "approval"
    }

    fn next_step(
        &self,
        _state: &ExecutionState,
        _artifact: Option<&Artifact>,
        _codec: &dyn ArtifactCodec,
    ) -> Result<StrategyStep> {
        Ok(StrategyStep::Complete(ExecutionResult::Held {
            reason: "waiting for approval".into(),
        }))
    }
}

#[tokio::test]
async fn test_custom_strategy_can_hold_futures() -> Result<()> {
    let mut config = common::fast_config();
    config.strategy = "approval".into();
    let env = TestEnv::new().with_config(config);
    let module = Module::new("Mod").with(ContractDeploymentFuture::new("Mod", "Foo"));

    let deployer = env.deployer().with_strategy(Arc::new(ApprovalStrategy));
    let result = deployer.deploy(module.clone(), no_parameters()).await?;
    let DeploymentResult::ExecutionError { held, .. } = result else {
        panic!("expected an execution error, got {:?}", result);
    };
    assert_eq!(
        held,
        vec![("Mod#Foo".to_string(), "waiting for approval".to_string())]
    );
    assert!(env.ledger.sent_transactions().is_empty());

    let rerun = deployer.deploy(module.clone(), no_parameters()).await?;
    assert!(matches!(rerun, DeploymentResult::PreviousRunError { .. }));

    let err = env.deployer().deploy(module, no_parameters()).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DeploymentError>(),
        Some(DeploymentError::UnknownStrategy { .. })
    ));
    Ok(())
}
