//! Execution strategies.
//!
//! A strategy decides what a future does next given only its execution
//! state: ask for a network interaction, or finish with a result. It never
//! talks to the ledger itself, which keeps it a pure function of the journal
//! and lets a resumed run make exactly the same decisions.

use anyhow::{anyhow, Result};

use ledgerplan_types::{
    Artifact, ExecutionKind, ExecutionResult, ExecutionState, NetworkInteraction,
    NetworkInteractionRequest, ReceiptStatus, SuccessResult,
};

use crate::codec::ArtifactCodec;

/// What a strategy wants to happen next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyStep {
    Request(NetworkInteractionRequest),
    /// Finish the future. `ExecutionResult::Held` puts it on hold.
    Complete(ExecutionResult),
}

pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Called when the future has no interaction yet, or when its latest
    /// interaction has a final answer (confirmed receipt or call result).
    fn next_step(
        &self,
        state: &ExecutionState,
        artifact: Option<&Artifact>,
        codec: &dyn ArtifactCodec,
    ) -> Result<StrategyStep>;
}

/// One interaction per future: send it, then interpret its outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicStrategy;

impl BasicStrategy {
    pub const NAME: &'static str = "basic";
}

fn need_artifact<'a>(state: &ExecutionState, artifact: Option<&'a Artifact>) -> Result<&'a Artifact> {
    artifact.ok_or_else(|| anyhow!("No artifact loaded for future {}", state.id))
}

fn strategy_error(error: impl ToString) -> StrategyStep {
    StrategyStep::Complete(ExecutionResult::StrategyError {
        error: error.to_string(),
    })
}

fn success(result: SuccessResult) -> StrategyStep {
    StrategyStep::Complete(ExecutionResult::Success { result })
}

impl BasicStrategy {
    fn first_request(
        &self,
        state: &ExecutionState,
        artifact: Option<&Artifact>,
        codec: &dyn ArtifactCodec,
    ) -> Result<StrategyStep> {
        let id = state.next_interaction_id();
        let request = match &state.kind {
            ExecutionKind::Deployment(d) => {
                let artifact = need_artifact(state, artifact)?;
                let data = match codec.encode_deployment(artifact, &d.constructor_args, &d.libraries)
                {
                    Ok(data) => data,
                    Err(e) => return Ok(strategy_error(e)),
                };
                NetworkInteractionRequest::Onchain {
                    id,
                    from: d.from,
                    to: None,
                    data,
                    value: d.value,
                }
            }
            ExecutionKind::Call(c) => {
                let artifact = need_artifact(state, artifact)?;
                let data = match codec.encode_function_call(artifact, &c.function_name, &c.args) {
                    Ok(data) => data,
                    Err(e) => return Ok(strategy_error(e)),
                };
                NetworkInteractionRequest::Onchain {
                    id,
                    from: c.from,
                    to: Some(c.contract_address),
                    data,
                    value: c.value,
                }
            }
            ExecutionKind::StaticCall(s) => {
                let artifact = need_artifact(state, artifact)?;
                let data = match codec.encode_function_call(artifact, &s.function_name, &s.args) {
                    Ok(data) => data,
                    Err(e) => return Ok(strategy_error(e)),
                };
                NetworkInteractionRequest::StaticCall {
                    id,
                    from: s.from,
                    to: s.contract_address,
                    data,
                    value: 0,
                }
            }
            ExecutionKind::SendData(s) => NetworkInteractionRequest::Onchain {
                id,
                from: s.from,
                to: Some(s.to),
                data: s.data.clone().unwrap_or_default(),
                value: s.value,
            },
            ExecutionKind::ContractAt(_) | ExecutionKind::ReadEventArgument(_) => {
                return Err(anyhow!(
                    "Future {} of type {} has no network interactions",
                    state.id,
                    state.future_type
                ))
            }
        };
        Ok(StrategyStep::Request(request))
    }
}

impl ExecutionStrategy for BasicStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn next_step(
        &self,
        state: &ExecutionState,
        artifact: Option<&Artifact>,
        codec: &dyn ArtifactCodec,
    ) -> Result<StrategyStep> {
        match state.last_interaction() {
            None => self.first_request(state, artifact, codec),
            Some(NetworkInteraction::Onchain(o)) => {
                let receipt = o
                    .confirmed_transaction()
                    .and_then(|t| t.receipt.as_ref())
                    .ok_or_else(|| {
                        anyhow!(
                            "Interaction {} of future {} is not confirmed",
                            o.id,
                            state.id
                        )
                    })?;
                if receipt.status == ReceiptStatus::Failure {
                    // Receipts carry no revert data.
                    return Ok(StrategyStep::Complete(ExecutionResult::Revert {
                        error: format!(
                            "transaction {} reverted on-chain in block {}",
                            receipt.transaction_hash, receipt.block_number
                        ),
                    }));
                }
                Ok(match &state.kind {
                    ExecutionKind::Deployment(_) => match receipt.contract_address {
                        Some(address) => success(SuccessResult::Deployment { address }),
                        None => strategy_error(format!(
                            "Receipt of transaction {} has no contract address",
                            receipt.transaction_hash
                        )),
                    },
                    ExecutionKind::Call(_) => success(SuccessResult::Call),
                    ExecutionKind::SendData(_) => success(SuccessResult::SendData),
                    _ => {
                        return Err(anyhow!(
                            "Future {} cannot have an on-chain interaction",
                            state.id
                        ))
                    }
                })
            }
            Some(NetworkInteraction::StaticCall(s)) => {
                let result = s.result.as_ref().ok_or_else(|| {
                    anyhow!(
                        "Static call {} of future {} has no result",
                        s.id,
                        state.id
                    )
                })?;
                if !result.success {
                    return Ok(StrategyStep::Complete(ExecutionResult::Revert {
                        error: codec.decode_revert(&result.return_data),
                    }));
                }
                let call = match &state.kind {
                    ExecutionKind::StaticCall(call) => call,
                    _ => {
                        return Err(anyhow!(
                            "Future {} cannot have a static call interaction",
                            state.id
                        ))
                    }
                };
                let artifact = need_artifact(state, artifact)?;
                Ok(
                    match codec.decode_function_result(
                        artifact,
                        &call.function_name,
                        &result.return_data,
                        &call.name_or_index,
                    ) {
                        Ok(value) => success(SuccessResult::StaticCall { value }),
                        Err(e) => strategy_error(e),
                    },
                )
            }
        }
    }
}
