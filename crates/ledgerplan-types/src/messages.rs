//! Journal messages.
//!
//! Every change to the deployment state is expressed as one of these messages.
//! The journal stores them in order; replaying them from an empty state
//! rebuilds the exact deployment state of a crashed or finished run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::address::{Address, Bytes, TxHash};
use crate::execution_state::{ExecutionKind, ExecutionResult};
use crate::future::{FutureId, FutureType};
use crate::ledger::{NetworkFees, RawCallResult, TransactionReceipt};

/// A network interaction the execution strategy asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "interaction", rename_all = "snake_case")]
pub enum NetworkInteractionRequest {
    Onchain {
        id: u32,
        from: Address,
        to: Option<Address>,
        data: Bytes,
        #[serde(with = "crate::amount")]
        value: u128,
    },
    StaticCall {
        id: u32,
        from: Address,
        to: Address,
        data: Bytes,
        #[serde(with = "crate::amount")]
        value: u128,
    },
}

impl NetworkInteractionRequest {
    pub fn id(&self) -> u32 {
        match self {
            NetworkInteractionRequest::Onchain { id, .. } => *id,
            NetworkInteractionRequest::StaticCall { id, .. } => *id,
        }
    }
}

/// A transaction that was handed to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentTransaction {
    pub hash: TxHash,
    pub from: Address,
    pub nonce: u64,
    pub fees: NetworkFees,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalMessage {
    RunStart {
        chain_id: u64,
        started_at: DateTime<Utc>,
    },
    ExecutionStateInitialize {
        future_id: FutureId,
        future_type: FutureType,
        strategy: String,
        dependencies: BTreeSet<FutureId>,
        kind: ExecutionKind,
    },
    NetworkInteractionRequest {
        future_id: FutureId,
        request: NetworkInteractionRequest,
    },
    /// Written before submission so a crash never loses a reserved nonce.
    TransactionPrepareSend {
        future_id: FutureId,
        interaction_id: u32,
        nonce: u64,
    },
    TransactionSend {
        future_id: FutureId,
        interaction_id: u32,
        transaction: SentTransaction,
    },
    TransactionConfirm {
        future_id: FutureId,
        interaction_id: u32,
        hash: TxHash,
        receipt: TransactionReceipt,
    },
    StaticCallComplete {
        future_id: FutureId,
        interaction_id: u32,
        result: RawCallResult,
    },
    OnchainInteractionBumpFees {
        future_id: FutureId,
        interaction_id: u32,
    },
    OnchainInteractionDropped {
        future_id: FutureId,
        interaction_id: u32,
    },
    OnchainInteractionReplacedByUser {
        future_id: FutureId,
        interaction_id: u32,
    },
    OnchainInteractionTimeout {
        future_id: FutureId,
        interaction_id: u32,
    },
    ExecutionStateComplete {
        future_id: FutureId,
        result: ExecutionResult,
    },
    WipeApply {
        future_id: FutureId,
    },
}

impl JournalMessage {
    /// Future the message applies to; `None` for run-level messages.
    pub fn future_id(&self) -> Option<&str> {
        match self {
            JournalMessage::RunStart { .. } => None,
            JournalMessage::ExecutionStateInitialize { future_id, .. }
            | JournalMessage::NetworkInteractionRequest { future_id, .. }
            | JournalMessage::TransactionPrepareSend { future_id, .. }
            | JournalMessage::TransactionSend { future_id, .. }
            | JournalMessage::TransactionConfirm { future_id, .. }
            | JournalMessage::StaticCallComplete { future_id, .. }
            | JournalMessage::OnchainInteractionBumpFees { future_id, .. }
            | JournalMessage::OnchainInteractionDropped { future_id, .. }
            | JournalMessage::OnchainInteractionReplacedByUser { future_id, .. }
            | JournalMessage::OnchainInteractionTimeout { future_id, .. }
            | JournalMessage::ExecutionStateComplete { future_id, .. }
            | JournalMessage::WipeApply { future_id } => Some(future_id),
        }
    }

    /// Short name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            JournalMessage::RunStart { .. } => "RUN_START",
            JournalMessage::ExecutionStateInitialize { .. } => "EXECUTION_STATE_INITIALIZE",
            JournalMessage::NetworkInteractionRequest { .. } => "NETWORK_INTERACTION_REQUEST",
            JournalMessage::TransactionPrepareSend { .. } => "TRANSACTION_PREPARE_SEND",
            JournalMessage::TransactionSend { .. } => "TRANSACTION_SEND",
            JournalMessage::TransactionConfirm { .. } => "TRANSACTION_CONFIRM",
            JournalMessage::StaticCallComplete { .. } => "STATIC_CALL_COMPLETE",
            JournalMessage::OnchainInteractionBumpFees { .. } => "ONCHAIN_INTERACTION_BUMP_FEES",
            JournalMessage::OnchainInteractionDropped { .. } => "ONCHAIN_INTERACTION_DROPPED",
            JournalMessage::OnchainInteractionReplacedByUser { .. } => {
                "ONCHAIN_INTERACTION_REPLACED_BY_USER"
            }
            JournalMessage::OnchainInteractionTimeout { .. } => "ONCHAIN_INTERACTION_TIMEOUT",
            JournalMessage::ExecutionStateComplete { .. } => "EXECUTION_STATE_COMPLETE",
            JournalMessage::WipeApply { .. } => "WIPE_APPLY",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution_state::{DeploymentExecution, SuccessResult};
    use std::collections::BTreeMap;

    #[test]
    fn test_messages_survive_json_lines() {
        let from = Address::from_hex("0xa1").unwrap();
        let messages = vec![
            JournalMessage::ExecutionStateInitialize {
                future_id: "Mod#Foo".into(),
                future_type: FutureType::ContractDeployment,
                strategy: "basic".into(),
                dependencies: BTreeSet::new(),
                kind: ExecutionKind::Deployment(DeploymentExecution {
                    contract_name: "Foo".into(),
                    artifact_id: "Mod#Foo".into(),
                    constructor_args: vec![serde_json::json!([1, "a"])],
                    libraries: BTreeMap::new(),
                    value: u128::MAX,
                    from,
                }),
            },
            JournalMessage::TransactionSend {
                future_id: "Mod#Foo".into(),
                interaction_id: 1,
                transaction: SentTransaction {
                    hash: TxHash::new([7; 32]),
                    from,
                    nonce: 0,
                    fees: NetworkFees::Eip1559 {
                        max_fee_per_gas: 20_000_000_000,
                        max_priority_fee_per_gas: 1_000_000_000,
                    },
                },
            },
            JournalMessage::ExecutionStateComplete {
                future_id: "Mod#Foo".into(),
                result: ExecutionResult::Success {
                    result: SuccessResult::Deployment { address: from },
                },
            },
        ];

        for message in messages {
            let line = serde_json::to_string(&message).unwrap();
            assert!(!line.contains('\n'));
            let back: JournalMessage = serde_json::from_str(&line).unwrap();
            assert_eq!(back, message);
        }
    }

    #[test]
    fn test_future_id_accessor() {
        let msg = JournalMessage::WipeApply {
            future_id: "Mod#Foo".into(),
        };
        assert_eq!(msg.future_id(), Some("Mod#Foo"));
        assert_eq!(msg.name(), "WIPE_APPLY");
    }
}
