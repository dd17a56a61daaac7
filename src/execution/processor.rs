//! Per-future processing.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

use ledgerplan_transport::RpcError;
use ledgerplan_types::{
    Artifact, Block, BlockTag, CallRequest, ExecutionKind, ExecutionResult, ExecutionState,
    ExecutionStatus, Future, JournalMessage, NetworkInteraction, OnchainInteraction,
    ReadEventArgumentExecution, SentTransaction, StaticCallInteraction, SuccessResult,
    TransactionRequest, TxHash,
};

use super::{next_action, ExecutionContext, NextAction};
use crate::error::{DeploymentError, InvariantError};
use crate::nonce::NonceManager;
use crate::state::DeploymentState;
use crate::strategy::StrategyStep;

/// Outcome of one processing pass over a future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureProgress {
    Done(ExecutionStatus),
    /// Waiting for the ledger: confirmations, inclusion or the fee-bump timer.
    Waiting,
}

enum MonitorOutcome {
    Progress,
    Wait,
}

pub struct FutureProcessor {
    ctx: Arc<ExecutionContext>,
    nonces: NonceManager,
    /// When each transaction was sent in this run. Transactions from an
    /// earlier run get their timer started when first monitored.
    sent_at: HashMap<TxHash, Instant>,
}

fn missing_state(future_id: &str) -> anyhow::Error {
    anyhow!(InvariantError::MissingExecutionState {
        future_id: future_id.to_string(),
    })
}

fn last_onchain(exec: &ExecutionState) -> Result<OnchainInteraction> {
    match exec.last_interaction() {
        Some(NetworkInteraction::Onchain(o)) => Ok(o.clone()),
        Some(other) => Err(anyhow!(InvariantError::WrongInteractionKind {
            future_id: exec.id.clone(),
            interaction_id: other.id(),
        })),
        None => Err(anyhow!(InvariantError::MissingInteraction {
            future_id: exec.id.clone(),
            interaction_id: exec.next_interaction_id(),
        })),
    }
}

fn last_static_call(exec: &ExecutionState) -> Result<StaticCallInteraction> {
    match exec.last_interaction() {
        Some(NetworkInteraction::StaticCall(s)) => Ok(s.clone()),
        Some(other) => Err(anyhow!(InvariantError::WrongInteractionKind {
            future_id: exec.id.clone(),
            interaction_id: other.id(),
        })),
        None => Err(anyhow!(InvariantError::MissingInteraction {
            future_id: exec.id.clone(),
            interaction_id: exec.next_interaction_id(),
        })),
    }
}

impl FutureProcessor {
    pub fn new(ctx: Arc<ExecutionContext>, nonces: NonceManager) -> Self {
        Self {
            ctx,
            nonces,
            sent_at: HashMap::new(),
        }
    }

    /// Advance `future` until it is terminal or has to wait for the ledger.
    pub async fn process_future(
        &mut self,
        future: &Future,
        state: &mut DeploymentState,
        block: &Block,
    ) -> Result<FutureProgress> {
        let id = future.id();
        match state.status(id) {
            Some(status) if status.is_terminal() => return Ok(FutureProgress::Done(status)),
            Some(_) => {}
            None => self.initialize(future, state)?,
        }

        loop {
            let exec = state.get(id).ok_or_else(|| missing_state(id))?;
            if exec.is_terminal() {
                return Ok(FutureProgress::Done(exec.status));
            }
            match next_action(exec) {
                NextAction::RunStrategy => self.run_strategy(id, state)?,
                NextAction::SendTransaction => self.send_transaction(id, state).await?,
                NextAction::QueryStaticCall => self.query_static_call(id, state).await?,
                NextAction::MonitorOnchainInteraction => {
                    if let MonitorOutcome::Wait = self.monitor(id, state, block).await? {
                        return Ok(FutureProgress::Waiting);
                    }
                }
            }
        }
    }

    fn initialize(&self, future: &Future, state: &mut DeploymentState) -> Result<()> {
        let id = future.id();
        let resolved = self
            .ctx
            .resolver(state)
            .resolve_future(future, self.ctx.artifacts.as_ref())
            .with_context(|| format!("Failed to resolve future {}", id))?;
        if let Some(artifact) = &resolved.artifact {
            self.ctx.loader.store_artifact(id, artifact)?;
        }

        tracing::info!(future_id = id, future_type = %future.future_type(), "starting future");
        state.record_and_apply(
            self.ctx.loader.as_ref(),
            JournalMessage::ExecutionStateInitialize {
                future_id: id.to_string(),
                future_type: future.future_type(),
                strategy: self.ctx.strategy.name().to_string(),
                dependencies: future.dependencies().clone(),
                kind: resolved.kind.clone(),
            },
        )?;

        match &resolved.kind {
            ExecutionKind::ContractAt(c) => self.complete(
                id,
                ExecutionResult::Success {
                    result: SuccessResult::ContractAt {
                        address: c.contract_address,
                    },
                },
                state,
            ),
            ExecutionKind::ReadEventArgument(r) => {
                let result = self.read_event_argument(id, r, state)?;
                self.complete(id, result, state)
            }
            _ => Ok(()),
        }
    }

    fn read_event_argument(
        &self,
        future_id: &str,
        read: &ReadEventArgumentExecution,
        state: &DeploymentState,
    ) -> Result<ExecutionResult> {
        let receipt = state
            .execution_states
            .values()
            .flat_map(|exec| exec.onchain_interactions())
            .flat_map(|o| o.transactions.iter())
            .find(|t| t.hash == read.tx_to_read_from)
            .and_then(|t| t.receipt.as_ref())
            .ok_or_else(|| {
                anyhow!(
                    "Future {} reads from transaction {}, which has no receipt",
                    future_id,
                    read.tx_to_read_from
                )
            })?;
        let artifact = self.ctx.loader.load_artifact(&read.artifact_id)?;
        let codec = self.ctx.codec.as_ref();

        let log = receipt
            .logs
            .iter()
            .filter(|log| log.address == read.emitter_address)
            .filter(|log| codec.is_event(&artifact, &read.event_name, log))
            .nth(read.event_index);
        let Some(log) = log else {
            return Ok(ExecutionResult::StrategyError {
                error: format!(
                    "Event {} with index {} emitted by {} not found in transaction {}",
                    read.event_name, read.event_index, read.emitter_address, read.tx_to_read_from
                ),
            });
        };

        Ok(
            match codec.decode_event_argument(
                &artifact,
                &read.event_name,
                log,
                &read.name_or_index,
            ) {
                Ok(value) => ExecutionResult::Success {
                    result: SuccessResult::ReadEventArgument { value },
                },
                Err(e) => ExecutionResult::StrategyError {
                    error: e.to_string(),
                },
            },
        )
    }

    fn complete(
        &self,
        future_id: &str,
        result: ExecutionResult,
        state: &mut DeploymentState,
    ) -> Result<()> {
        match result.failure_reason() {
            None => tracing::info!(future_id, "future succeeded"),
            Some(reason) => tracing::warn!(future_id, status = %result.status(), %reason, "future did not succeed"),
        }
        let address = result.success().and_then(SuccessResult::address);
        state.record_and_apply(
            self.ctx.loader.as_ref(),
            JournalMessage::ExecutionStateComplete {
                future_id: future_id.to_string(),
                result,
            },
        )?;
        if let Some(address) = address {
            self.ctx.loader.record_deployed_address(future_id, address)?;
        }
        Ok(())
    }

    fn artifact_for(&self, exec: &ExecutionState) -> Result<Option<Artifact>> {
        let artifact_id = match &exec.kind {
            ExecutionKind::Deployment(d) => &d.artifact_id,
            ExecutionKind::Call(c) => &c.artifact_id,
            ExecutionKind::StaticCall(s) => &s.artifact_id,
            _ => return Ok(None),
        };
        self.ctx.loader.load_artifact(artifact_id).map(Some)
    }

    fn run_strategy(&self, future_id: &str, state: &mut DeploymentState) -> Result<()> {
        let exec = state.get(future_id).ok_or_else(|| missing_state(future_id))?;
        let strategy = &self.ctx.strategy;
        if exec.strategy != strategy.name() {
            return Err(anyhow!(DeploymentError::UnknownStrategy {
                name: exec.strategy.clone(),
            }));
        }
        let artifact = self.artifact_for(exec)?;
        let step = strategy.next_step(exec, artifact.as_ref(), self.ctx.codec.as_ref())?;

        match step {
            StrategyStep::Request(request) => {
                tracing::debug!(future_id, interaction_id = request.id(), "new network interaction");
                state.record_and_apply(
                    self.ctx.loader.as_ref(),
                    JournalMessage::NetworkInteractionRequest {
                        future_id: future_id.to_string(),
                        request,
                    },
                )
            }
            StrategyStep::Complete(result) => self.complete(future_id, result, state),
        }
    }

    async fn send_transaction(&mut self, future_id: &str, state: &mut DeploymentState) -> Result<()> {
        let exec = state.get(future_id).ok_or_else(|| missing_state(future_id))?;
        let interaction = last_onchain(exec)?;
        let client = self.ctx.client.clone();
        let from = interaction.from;

        let _guard = self.nonces.lock_sender(from).await;
        let (nonce, fresh) = match interaction.nonce {
            Some(nonce) => (nonce, false),
            None => (self.nonces.next_nonce(from).await?, true),
        };
        let release = |nonces: &NonceManager| {
            if fresh {
                nonces.revert_nonce(from);
            }
        };

        let network = match client.network_fees().await {
            Ok(fees) => fees,
            Err(e) => {
                release(&self.nonces);
                return Err(e);
            }
        };
        let fees = match interaction
            .live_transactions()
            .last()
            .filter(|_| interaction.should_be_resent)
        {
            Some(previous) => previous.fees.bumped(&network),
            None => network,
        };

        let call = CallRequest {
            from,
            to: interaction.to,
            data: interaction.data.clone(),
            value: interaction.value,
        };
        let gas_limit = match client.estimate_gas(&call).await {
            Ok(gas) => gas,
            Err(e) => {
                let reverted = e
                    .downcast_ref::<RpcError>()
                    .map(RpcError::is_execution_error)
                    .unwrap_or(false);
                release(&self.nonces);
                if !reverted {
                    return Err(e.context(format!("Failed to estimate gas for {}", future_id)));
                }

                self.ctx.metrics.record_simulation();
                let simulation = client.call(&call, BlockTag::Pending).await?;
                let error = if simulation.success {
                    format!("gas estimation failed: {}", e)
                } else {
                    self.ctx.codec.decode_revert(&simulation.return_data)
                };
                tracing::debug!(future_id, %error, "transaction simulation failed");
                return self.complete(future_id, ExecutionResult::SimulationError { error }, state);
            }
        };

        if interaction.nonce != Some(nonce) {
            state.record_and_apply(
                self.ctx.loader.as_ref(),
                JournalMessage::TransactionPrepareSend {
                    future_id: future_id.to_string(),
                    interaction_id: interaction.id,
                    nonce,
                },
            )?;
        }

        let request = TransactionRequest {
            from,
            to: interaction.to,
            data: interaction.data.clone(),
            value: interaction.value,
            nonce,
            fees,
            gas_limit,
            chain_id: self.ctx.chain_id,
        };
        let hash = match client.send_transaction(&request).await {
            Ok(hash) => hash,
            Err(e) => {
                release(&self.nonces);
                return Err(e.context(format!("Failed to send transaction for {}", future_id)));
            }
        };

        self.sent_at.insert(hash, Instant::now());
        self.ctx.metrics.record_transaction_sent();
        tracing::info!(
            future_id,
            %hash,
            nonce,
            %from,
            max_fee_per_gas = %fees.max_price_per_gas(),
            resend = interaction.should_be_resent,
            "sent transaction"
        );
        state.record_and_apply(
            self.ctx.loader.as_ref(),
            JournalMessage::TransactionSend {
                future_id: future_id.to_string(),
                interaction_id: interaction.id,
                transaction: SentTransaction {
                    hash,
                    from,
                    nonce,
                    fees,
                },
            },
        )
    }

    async fn query_static_call(&self, future_id: &str, state: &mut DeploymentState) -> Result<()> {
        let exec = state.get(future_id).ok_or_else(|| missing_state(future_id))?;
        let interaction = last_static_call(exec)?;
        let result = self
            .ctx
            .client
            .call(
                &CallRequest {
                    from: interaction.from,
                    to: Some(interaction.to),
                    data: interaction.data.clone(),
                    value: interaction.value,
                },
                BlockTag::Latest,
            )
            .await?;
        self.ctx.metrics.record_static_call();
        tracing::debug!(future_id, success = result.success, "static call complete");
        state.record_and_apply(
            self.ctx.loader.as_ref(),
            JournalMessage::StaticCallComplete {
                future_id: future_id.to_string(),
                interaction_id: interaction.id,
                result,
            },
        )
    }

    async fn monitor(
        &mut self,
        future_id: &str,
        state: &mut DeploymentState,
        block: &Block,
    ) -> Result<MonitorOutcome> {
        let exec = state.get(future_id).ok_or_else(|| missing_state(future_id))?;
        let interaction = last_onchain(exec)?;
        let client = self.ctx.client.clone();
        let config = &self.ctx.config;

        let mut mined = false;
        for tx in interaction.live_transactions() {
            let Some(receipt) = client.transaction_receipt(tx.hash).await? else {
                continue;
            };
            if receipt.confirmations(block.number) >= config.required_confirmations {
                self.ctx.metrics.record_confirmation();
                tracing::debug!(future_id, hash = %tx.hash, block = receipt.block_number, "transaction confirmed");
                state.record_and_apply(
                    self.ctx.loader.as_ref(),
                    JournalMessage::TransactionConfirm {
                        future_id: future_id.to_string(),
                        interaction_id: interaction.id,
                        hash: tx.hash,
                        receipt,
                    },
                )?;
                return Ok(MonitorOutcome::Progress);
            }
            mined = true;
        }
        if mined {
            return Ok(MonitorOutcome::Wait);
        }

        let newest = interaction
            .live_transactions()
            .last()
            .ok_or_else(|| anyhow!("Interaction {} of {} has no transactions", interaction.id, future_id))?;

        if client.transaction(newest.hash).await?.is_none() {
            self.ctx.metrics.record_dropped();
            tracing::warn!(future_id, hash = %newest.hash, "transaction was dropped");
            state.record_and_apply(
                self.ctx.loader.as_ref(),
                JournalMessage::OnchainInteractionDropped {
                    future_id: future_id.to_string(),
                    interaction_id: interaction.id,
                },
            )?;
            self.nonces.release(interaction.from, state);
            return Ok(MonitorOutcome::Progress);
        }

        let sent_at = *self.sent_at.entry(newest.hash).or_insert_with(Instant::now);
        if sent_at.elapsed() < config.time_before_bumping_fees {
            return Ok(MonitorOutcome::Wait);
        }

        let bumped = newest.fees.bumped(&client.network_fees().await?);
        let over_limit = config
            .max_fee_per_gas_limit
            .map(|limit| bumped.max_price_per_gas() > limit)
            .unwrap_or(false);

        if config.disable_fee_bumping || interaction.fee_bumps() >= config.max_fee_bumps || over_limit
        {
            self.ctx.metrics.record_timeout();
            tracing::warn!(
                future_id,
                fee_bumps = interaction.fee_bumps(),
                over_limit,
                "transaction was not confirmed in time"
            );
            state.record_and_apply(
                self.ctx.loader.as_ref(),
                JournalMessage::OnchainInteractionTimeout {
                    future_id: future_id.to_string(),
                    interaction_id: interaction.id,
                },
            )?;
            return Ok(MonitorOutcome::Progress);
        }

        self.ctx.metrics.record_fee_bump();
        tracing::warn!(
            future_id,
            hash = %newest.hash,
            fee_bumps = interaction.fee_bumps() + 1,
            "bumping fees"
        );
        state.record_and_apply(
            self.ctx.loader.as_ref(),
            JournalMessage::OnchainInteractionBumpFees {
                future_id: future_id.to_string(),
                interaction_id: interaction.id,
            },
        )?;
        Ok(MonitorOutcome::Progress)
    }
}
