//! Top-level run orchestration.
//!
//! A run goes through these gates in order, and stops at the first one that
//! fails:
//!
//! 1. plan validation (structure, parameters, accounts, artifacts, cycles)
//! 2. journal replay and the chain id check
//! 3. reconciliation of the plan with the recorded execution
//! 4. futures that failed, timed out or were held in an earlier run
//!
//! Only then is `RUN_START` journaled and the plan executed.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

use ledgerplan_journal::DeploymentLoader;
use ledgerplan_transport::NetworkClient;
use ledgerplan_types::{
    Address, ExecutionKind, ExecutionStatus, FutureId, JournalMessage, Module, Plan, PlanError,
};

use crate::batcher;
use crate::codec::{ArtifactCodec, ArtifactResolver};
use crate::config::DeployConfig;
use crate::error::DeploymentError;
use crate::execution::{ExecutionContext, ExecutionEngine};
use crate::metrics::ExecutionMetrics;
use crate::reconciliation::{reconcile, ReconcileContext};
use crate::resolve::{validate_inputs, ModuleParameters, ResolveContext};
use crate::state::{DeploymentState, StatusReport};
use crate::strategy::{BasicStrategy, ExecutionStrategy};
use crate::wipe;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedContract {
    pub contract_name: String,
    pub address: Address,
}

/// Outcome of a run. Only conditions that make the run itself impossible
/// (invariant violations, nonce problems, ledger errors) are `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentResult {
    ValidationFailed {
        errors: Vec<PlanError>,
    },
    ReconciliationFailed {
        failures: BTreeMap<FutureId, Vec<String>>,
    },
    /// Futures that did not succeed in an earlier run and must be wiped.
    PreviousRunError {
        futures: BTreeMap<FutureId, String>,
    },
    ExecutionError {
        started: Vec<FutureId>,
        timed_out: Vec<(FutureId, String)>,
        held: Vec<(FutureId, String)>,
        failed: Vec<(FutureId, String)>,
        successful: Vec<FutureId>,
    },
    Success {
        contracts: BTreeMap<FutureId, DeployedContract>,
    },
}

impl DeploymentResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DeploymentResult::Success { .. })
    }
}

pub struct Deployer {
    client: Arc<dyn NetworkClient>,
    loader: Arc<dyn DeploymentLoader>,
    codec: Arc<dyn ArtifactCodec>,
    artifacts: Arc<dyn ArtifactResolver>,
    accounts: Vec<Address>,
    config: DeployConfig,
    strategies: BTreeMap<String, Arc<dyn ExecutionStrategy>>,
    metrics: ExecutionMetrics,
}

impl Deployer {
    pub fn new(
        client: Arc<dyn NetworkClient>,
        loader: Arc<dyn DeploymentLoader>,
        codec: Arc<dyn ArtifactCodec>,
        artifacts: Arc<dyn ArtifactResolver>,
        accounts: Vec<Address>,
    ) -> Self {
        let mut strategies: BTreeMap<String, Arc<dyn ExecutionStrategy>> = BTreeMap::new();
        strategies.insert(BasicStrategy::NAME.to_string(), Arc::new(BasicStrategy));
        Self {
            client,
            loader,
            codec,
            artifacts,
            accounts,
            config: DeployConfig::default(),
            strategies,
            metrics: ExecutionMetrics::default(),
        }
    }

    pub fn with_config(mut self, config: DeployConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a strategy; `config.strategy` selects it by name.
    pub fn with_strategy(mut self, strategy: Arc<dyn ExecutionStrategy>) -> Self {
        self.strategies.insert(strategy.name().to_string(), strategy);
        self
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ExecutionMetrics {
        &self.metrics
    }

    fn default_sender(&self) -> Result<Address> {
        self.config
            .default_sender
            .or_else(|| self.accounts.first().copied())
            .ok_or_else(|| anyhow!(DeploymentError::NoAccounts))
    }

    /// Rebuild the deployment state from the journal.
    pub fn load_state(&self) -> Result<DeploymentState> {
        let messages = self.loader.read_messages()?;
        Ok(DeploymentState::replay(&messages)?)
    }

    pub fn status(&self) -> Result<StatusReport> {
        Ok(StatusReport::from_state(&self.load_state()?))
    }

    /// Remove the execution state of `future_id` so the next run retries it.
    pub fn wipe(&self, future_id: &str) -> Result<()> {
        let mut state = self.load_state()?;
        wipe::wipe(&mut state, self.loader.as_ref(), future_id)
    }

    fn validate(&self, plan: &Plan, parameters: &ModuleParameters) -> Vec<PlanError> {
        let mut errors = plan.validate();
        errors.extend(validate_inputs(
            plan,
            parameters,
            &self.accounts,
            self.artifacts.as_ref(),
        ));
        if errors.is_empty() {
            if let Err(cycle @ PlanError::Cycle { .. }) = batcher::batch(plan, &DeploymentState::new())
            {
                errors.push(cycle);
            }
        }
        errors
    }

    pub async fn deploy(&self, module: Module, parameters: ModuleParameters) -> Result<DeploymentResult> {
        self.config.validate()?;
        let strategy = self
            .strategies
            .get(&self.config.strategy)
            .cloned()
            .ok_or_else(|| {
                anyhow!(DeploymentError::UnknownStrategy {
                    name: self.config.strategy.clone(),
                })
            })?;
        let default_sender = self.default_sender()?;

        let plan = Plan::new(module);
        let errors = self.validate(&plan, &parameters);
        if !errors.is_empty() {
            tracing::warn!(plan = plan.id(), errors = errors.len(), "plan validation failed");
            return Ok(DeploymentResult::ValidationFailed { errors });
        }

        let mut state = self.load_state()?;
        let chain_id = self.client.chain_id().await?;
        if let Some(recorded) = state.chain_id {
            if recorded != chain_id {
                return Err(anyhow!(DeploymentError::ChainIdChanged {
                    recorded,
                    current: chain_id,
                }));
            }
        }

        let reconciliation = reconcile(
            &plan,
            &state,
            &ReconcileContext {
                resolve: ResolveContext {
                    state: &state,
                    accounts: &self.accounts,
                    default_sender,
                    parameters: &parameters,
                },
                artifacts: self.artifacts.as_ref(),
                loader: self.loader.as_ref(),
                strategy: strategy.name(),
            },
        );
        for missing in &reconciliation.missing_executed_futures {
            tracing::warn!(future_id = %missing, "executed future is no longer part of the plan");
        }
        if !reconciliation.is_ok() {
            tracing::warn!(
                futures = reconciliation.failures.len(),
                "plan is incompatible with the previous execution"
            );
            return Ok(DeploymentResult::ReconciliationFailed {
                failures: reconciliation.failures,
            });
        }

        let previous: BTreeMap<FutureId, String> = plan
            .futures()
            .filter_map(|f| state.get(f.id()))
            .filter(|exec| {
                matches!(
                    exec.status,
                    ExecutionStatus::Failed | ExecutionStatus::Timeout | ExecutionStatus::Hold
                )
            })
            .map(|exec| {
                let reason = exec
                    .result
                    .as_ref()
                    .and_then(|r| r.failure_reason())
                    .unwrap_or_else(|| exec.status.to_string());
                (exec.id.clone(), reason)
            })
            .collect();
        if !previous.is_empty() {
            return Ok(DeploymentResult::PreviousRunError { futures: previous });
        }

        state.record_and_apply(
            self.loader.as_ref(),
            JournalMessage::RunStart {
                chain_id,
                started_at: chrono::Utc::now(),
            },
        )?;

        let ctx = Arc::new(ExecutionContext {
            client: self.client.clone(),
            loader: self.loader.clone(),
            codec: self.codec.clone(),
            artifacts: self.artifacts.clone(),
            strategy,
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            chain_id,
            accounts: self.accounts.clone(),
            default_sender,
            parameters,
        });
        ExecutionEngine::new(ctx)
            .execute_module(&plan, &mut state)
            .await?;

        tracing::info!("{}", self.metrics.snapshot().format_report());
        Ok(result_of(&plan, &state))
    }
}

fn result_of(plan: &Plan, state: &DeploymentState) -> DeploymentResult {
    let mut started = Vec::new();
    let mut timed_out = Vec::new();
    let mut held = Vec::new();
    let mut failed = Vec::new();
    let mut successful = Vec::new();
    let mut contracts = BTreeMap::new();

    for future in plan.futures() {
        let Some(exec) = state.get(future.id()) else {
            continue;
        };
        let id = exec.id.clone();
        let reason = || {
            exec.result
                .as_ref()
                .and_then(|r| r.failure_reason())
                .unwrap_or_else(|| exec.status.to_string())
        };
        match exec.status {
            ExecutionStatus::Started => started.push(id),
            ExecutionStatus::Timeout => timed_out.push((id, reason())),
            ExecutionStatus::Hold => held.push((id, reason())),
            ExecutionStatus::Failed => failed.push((id, reason())),
            ExecutionStatus::Success => {
                let contract_name = match &exec.kind {
                    ExecutionKind::Deployment(d) => Some(d.contract_name.clone()),
                    ExecutionKind::ContractAt(c) => Some(c.contract_name.clone()),
                    _ => None,
                };
                let address = exec.success_result().and_then(|r| r.address());
                if let (Some(contract_name), Some(address)) = (contract_name, address) {
                    contracts.insert(
                        id.clone(),
                        DeployedContract {
                            contract_name,
                            address,
                        },
                    );
                }
                successful.push(id);
            }
        }
    }

    let complete = plan.futures().all(|f| state.is_success(f.id()));
    if complete {
        tracing::info!(contracts = contracts.len(), "deployment complete");
        DeploymentResult::Success { contracts }
    } else {
        tracing::warn!(
            started = started.len(),
            timed_out = timed_out.len(),
            held = held.len(),
            failed = failed.len(),
            "deployment did not complete"
        );
        DeploymentResult::ExecutionError {
            started,
            timed_out,
            held,
            failed,
            successful,
        }
    }
}
