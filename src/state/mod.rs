//! Deployment state and the journal reducer.
//!
//! [`DeploymentState`] is only ever changed by [`DeploymentState::apply`].
//! The engine goes through [`DeploymentState::record_and_apply`], which only
//! journals messages the reducer accepts, so replaying the journal from an
//! empty state always reproduces the state the engine last saw.

mod report;

pub use report::{FutureReport, StatusReport};

use anyhow::Result;
use std::collections::BTreeMap;

use ledgerplan_journal::DeploymentLoader;
use ledgerplan_types::{
    AbandonReason, ExecutionResult, ExecutionState, ExecutionStatus, FutureId, JournalMessage,
    NetworkInteraction, NetworkInteractionRequest, OnchainInteraction, StaticCallInteraction,
    TransactionRecord,
};

use crate::error::InvariantError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentState {
    /// Set by the first `RUN_START`.
    pub chain_id: Option<u64>,
    pub execution_states: BTreeMap<FutureId, ExecutionState>,
}

impl DeploymentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a state from journal messages.
    pub fn replay<'a>(
        messages: impl IntoIterator<Item = &'a JournalMessage>,
    ) -> Result<Self, InvariantError> {
        let mut state = Self::new();
        for message in messages {
            state.apply(message)?;
        }
        Ok(state)
    }

    pub fn get(&self, future_id: &str) -> Option<&ExecutionState> {
        self.execution_states.get(future_id)
    }

    pub fn status(&self, future_id: &str) -> Option<ExecutionStatus> {
        self.get(future_id).map(|s| s.status)
    }

    pub fn is_success(&self, future_id: &str) -> bool {
        self.status(future_id) == Some(ExecutionStatus::Success)
    }

    /// Apply a message and journal it. Nothing is journaled or changed when
    /// the message is rejected by the reducer or the journal write fails.
    pub fn record_and_apply(
        &mut self,
        loader: &dyn DeploymentLoader,
        message: JournalMessage,
    ) -> Result<()> {
        tracing::debug!(
            message = message.name(),
            future_id = message.future_id().unwrap_or("-"),
            "recording journal message"
        );
        let mut next = self.clone();
        next.apply(&message)?;
        loader.record_message(&message)?;
        *self = next;
        Ok(())
    }

    fn started_mut(
        &mut self,
        future_id: &str,
        message: &'static str,
    ) -> Result<&mut ExecutionState, InvariantError> {
        let state = self.execution_states.get_mut(future_id).ok_or_else(|| {
            InvariantError::MissingExecutionState {
                future_id: future_id.to_string(),
            }
        })?;
        if state.is_terminal() {
            return Err(InvariantError::TerminalState {
                future_id: future_id.to_string(),
                status: state.status,
                message,
            });
        }
        Ok(state)
    }

    fn onchain_mut<'a>(
        &'a mut self,
        future_id: &str,
        interaction_id: u32,
        message: &'static str,
    ) -> Result<&'a mut OnchainInteraction, InvariantError> {
        let state = self.started_mut(future_id, message)?;
        match state.interaction_mut(interaction_id) {
            Some(NetworkInteraction::Onchain(o)) => Ok(o),
            Some(NetworkInteraction::StaticCall(_)) => Err(InvariantError::WrongInteractionKind {
                future_id: future_id.to_string(),
                interaction_id,
            }),
            None => Err(InvariantError::MissingInteraction {
                future_id: future_id.to_string(),
                interaction_id,
            }),
        }
    }

    /// The reducer.
    pub fn apply(&mut self, message: &JournalMessage) -> Result<(), InvariantError> {
        match message {
            JournalMessage::RunStart { chain_id, .. } => {
                self.chain_id = Some(*chain_id);
            }
            JournalMessage::ExecutionStateInitialize {
                future_id,
                future_type,
                strategy,
                dependencies,
                kind,
            } => {
                if self.execution_states.contains_key(future_id) {
                    return Err(InvariantError::AlreadyInitialized {
                        future_id: future_id.clone(),
                    });
                }
                if !kind.matches(*future_type) {
                    return Err(InvariantError::KindMismatch {
                        future_id: future_id.clone(),
                        future_type: *future_type,
                    });
                }
                self.execution_states.insert(
                    future_id.clone(),
                    ExecutionState {
                        id: future_id.clone(),
                        future_type: *future_type,
                        status: ExecutionStatus::Started,
                        dependencies: dependencies.clone(),
                        strategy: strategy.clone(),
                        kind: kind.clone(),
                        network_interactions: Vec::new(),
                        result: None,
                    },
                );
            }
            JournalMessage::NetworkInteractionRequest { future_id, request } => {
                let state = self.started_mut(future_id, message.name())?;
                let expected = state.next_interaction_id();
                if request.id() != expected {
                    return Err(InvariantError::UnexpectedInteractionId {
                        future_id: future_id.clone(),
                        expected,
                        got: request.id(),
                    });
                }
                let interaction = match request {
                    NetworkInteractionRequest::Onchain {
                        id,
                        from,
                        to,
                        data,
                        value,
                    } => NetworkInteraction::Onchain(OnchainInteraction {
                        id: *id,
                        from: *from,
                        to: *to,
                        data: data.clone(),
                        value: *value,
                        nonce: None,
                        transactions: Vec::new(),
                        should_be_resent: false,
                    }),
                    NetworkInteractionRequest::StaticCall {
                        id,
                        from,
                        to,
                        data,
                        value,
                    } => NetworkInteraction::StaticCall(StaticCallInteraction {
                        id: *id,
                        from: *from,
                        to: *to,
                        data: data.clone(),
                        value: *value,
                        result: None,
                    }),
                };
                state.network_interactions.push(interaction);
            }
            JournalMessage::TransactionPrepareSend {
                future_id,
                interaction_id,
                nonce,
            } => {
                let o = self.onchain_mut(future_id, *interaction_id, message.name())?;
                o.nonce = Some(*nonce);
            }
            JournalMessage::TransactionSend {
                future_id,
                interaction_id,
                transaction,
            } => {
                let o = self.onchain_mut(future_id, *interaction_id, message.name())?;
                o.nonce = Some(transaction.nonce);
                o.should_be_resent = false;
                o.transactions.push(TransactionRecord {
                    hash: transaction.hash,
                    from: transaction.from,
                    nonce: transaction.nonce,
                    fees: transaction.fees,
                    receipt: None,
                    abandoned: None,
                });
            }
            JournalMessage::TransactionConfirm {
                future_id,
                interaction_id,
                hash,
                receipt,
            } => {
                let o = self.onchain_mut(future_id, *interaction_id, message.name())?;
                let record = o
                    .transactions
                    .iter_mut()
                    .find(|t| &t.hash == hash)
                    .ok_or_else(|| InvariantError::MissingTransaction {
                        future_id: future_id.clone(),
                        hash: hash.to_hex(),
                    })?;
                record.receipt = Some(receipt.clone());
            }
            JournalMessage::StaticCallComplete {
                future_id,
                interaction_id,
                result,
            } => {
                let state = self.started_mut(future_id, message.name())?;
                match state.interaction_mut(*interaction_id) {
                    Some(NetworkInteraction::StaticCall(s)) => s.result = Some(result.clone()),
                    Some(NetworkInteraction::Onchain(_)) => {
                        return Err(InvariantError::WrongInteractionKind {
                            future_id: future_id.clone(),
                            interaction_id: *interaction_id,
                        })
                    }
                    None => {
                        return Err(InvariantError::MissingInteraction {
                            future_id: future_id.clone(),
                            interaction_id: *interaction_id,
                        })
                    }
                }
            }
            JournalMessage::OnchainInteractionBumpFees {
                future_id,
                interaction_id,
            } => {
                let o = self.onchain_mut(future_id, *interaction_id, message.name())?;
                o.should_be_resent = true;
            }
            JournalMessage::OnchainInteractionDropped {
                future_id,
                interaction_id,
            } => {
                let o = self.onchain_mut(future_id, *interaction_id, message.name())?;
                abandon(o, AbandonReason::Dropped);
            }
            JournalMessage::OnchainInteractionReplacedByUser {
                future_id,
                interaction_id,
            } => {
                let o = self.onchain_mut(future_id, *interaction_id, message.name())?;
                abandon(o, AbandonReason::ReplacedByUser);
            }
            JournalMessage::OnchainInteractionTimeout {
                future_id,
                interaction_id,
            } => {
                self.onchain_mut(future_id, *interaction_id, message.name())?;
                let state = self.started_mut(future_id, message.name())?;
                state.status = ExecutionStatus::Timeout;
                state.result = Some(ExecutionResult::TimedOut {
                    interaction_id: *interaction_id,
                });
            }
            JournalMessage::ExecutionStateComplete { future_id, result } => {
                let state = self.started_mut(future_id, message.name())?;
                state.status = result.status();
                state.result = Some(result.clone());
            }
            JournalMessage::WipeApply { future_id } => {
                if self.execution_states.remove(future_id).is_none() {
                    return Err(InvariantError::MissingExecutionState {
                        future_id: future_id.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Give up on the unconfirmed transactions of an interaction. The nonce is
/// released so the next send reserves a fresh one.
fn abandon(interaction: &mut OnchainInteraction, reason: AbandonReason) {
    for record in interaction
        .transactions
        .iter_mut()
        .filter(|t| t.abandoned.is_none() && t.receipt.is_none())
    {
        record.abandoned = Some(reason);
    }
    interaction.nonce = None;
    interaction.should_be_resent = false;
}
