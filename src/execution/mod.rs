//! Execution of futures against the ledger.
//!
//! - [`processor`]: advances one future as far as it can in a single pass
//! - [`engine`]: runs the batches, polling the ledger until each batch settles
//!
//! Everything the processor decides is derived from the execution state via
//! [`next_action`], so a resumed run picks up exactly where the journal ends.

pub mod engine;
pub mod processor;

pub use engine::ExecutionEngine;
pub use processor::{FutureProcessor, FutureProgress};

use std::sync::Arc;

use ledgerplan_journal::DeploymentLoader;
use ledgerplan_transport::NetworkClient;
use ledgerplan_types::{Address, ExecutionState, ExecutionStatus, NetworkInteraction};

use crate::codec::{ArtifactCodec, ArtifactResolver};
use crate::config::DeployConfig;
use crate::metrics::ExecutionMetrics;
use crate::resolve::{ModuleParameters, ResolveContext};
use crate::state::DeploymentState;
use crate::strategy::ExecutionStrategy;

/// Collaborators and settings shared by the engine and the processor.
pub struct ExecutionContext {
    pub client: Arc<dyn NetworkClient>,
    pub loader: Arc<dyn DeploymentLoader>,
    pub codec: Arc<dyn ArtifactCodec>,
    pub artifacts: Arc<dyn ArtifactResolver>,
    pub strategy: Arc<dyn ExecutionStrategy>,
    pub config: DeployConfig,
    pub metrics: ExecutionMetrics,
    pub chain_id: u64,
    pub accounts: Vec<Address>,
    pub default_sender: Address,
    pub parameters: ModuleParameters,
}

impl ExecutionContext {
    pub fn resolver<'a>(&'a self, state: &'a DeploymentState) -> ResolveContext<'a> {
        ResolveContext {
            state,
            accounts: &self.accounts,
            default_sender: self.default_sender,
            parameters: &self.parameters,
        }
    }
}

/// What a started future needs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    RunStrategy,
    SendTransaction,
    QueryStaticCall,
    MonitorOnchainInteraction,
}

/// Derive the next action from the latest network interaction.
pub fn next_action(state: &ExecutionState) -> NextAction {
    match state.last_interaction() {
        None => NextAction::RunStrategy,
        Some(NetworkInteraction::Onchain(o)) => {
            if o.confirmed_transaction().is_some() {
                NextAction::RunStrategy
            } else if o.should_be_resent || o.live_transactions().next().is_none() {
                NextAction::SendTransaction
            } else {
                NextAction::MonitorOnchainInteraction
            }
        }
        Some(NetworkInteraction::StaticCall(s)) => {
            if s.result.is_some() {
                NextAction::RunStrategy
            } else {
                NextAction::QueryStaticCall
            }
        }
    }
}

/// Whether every future of `batch` reached a terminal status.
pub fn is_settled(state: &DeploymentState, batch: &[String]) -> bool {
    batch.iter().all(|id| {
        state
            .status(id)
            .map(|s| s != ExecutionStatus::Started)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerplan_types::{
        Bytes, ExecutionKind, FutureType, NetworkFees, OnchainInteraction, SendDataExecution,
        TransactionRecord, TxHash,
    };
    use std::collections::BTreeSet;

    fn with_interaction(interaction: Option<OnchainInteraction>) -> ExecutionState {
        ExecutionState {
            id: "Mod#send".into(),
            future_type: FutureType::SendData,
            status: ExecutionStatus::Started,
            dependencies: BTreeSet::new(),
            strategy: "basic".into(),
            kind: ExecutionKind::SendData(SendDataExecution {
                to: Address::new([2; 20]),
                data: None,
                value: 0,
                from: Address::new([1; 20]),
            }),
            network_interactions: interaction
                .into_iter()
                .map(NetworkInteraction::Onchain)
                .collect(),
            result: None,
        }
    }

    fn interaction(transactions: Vec<TransactionRecord>) -> OnchainInteraction {
        OnchainInteraction {
            id: 1,
            from: Address::new([1; 20]),
            to: Some(Address::new([2; 20])),
            data: Bytes::default(),
            value: 0,
            nonce: Some(0),
            transactions,
            should_be_resent: false,
        }
    }

    fn record() -> TransactionRecord {
        TransactionRecord {
            hash: TxHash::new([1; 32]),
            from: Address::new([1; 20]),
            nonce: 0,
            fees: NetworkFees::Legacy { gas_price: 1 },
            receipt: None,
            abandoned: None,
        }
    }

    #[test]
    fn test_next_action_follows_interaction_progress() {
        assert_eq!(
            next_action(&with_interaction(None)),
            NextAction::RunStrategy
        );
        assert_eq!(
            next_action(&with_interaction(Some(interaction(vec![])))),
            NextAction::SendTransaction
        );
        assert_eq!(
            next_action(&with_interaction(Some(interaction(vec![record()])))),
            NextAction::MonitorOnchainInteraction
        );

        let mut bumped = interaction(vec![record()]);
        bumped.should_be_resent = true;
        assert_eq!(
            next_action(&with_interaction(Some(bumped))),
            NextAction::SendTransaction
        );
    }
}
