//! Durable per-future execution state.
//!
//! An [`ExecutionState`] is created the first time a future is processed and
//! is only ever changed by applying journal messages. Its
//! `network_interactions` are an append-only arena: interactions are never
//! removed, transaction records are appended to the latest interaction, and
//! a record that lost its validity (dropped, replaced by a foreign
//! transaction) is marked as abandoned instead of being deleted.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::address::{Address, Bytes, TxHash};
use crate::future::{FutureId, FutureType, NameOrIndex};
use crate::ledger::{NetworkFees, RawCallResult, TransactionReceipt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Started,
    Hold,
    Success,
    Failed,
    Timeout,
}

impl ExecutionStatus {
    /// Anything but `Started` is final for the current run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Started)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Started => "STARTED",
            ExecutionStatus::Hold => "HOLD",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Timeout => "TIMEOUT",
        };
        f.write_str(s)
    }
}

/// Resolved parameters of a contract or library deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentExecution {
    pub contract_name: String,
    /// Key under which the artifact was stored by the deployment loader.
    pub artifact_id: String,
    pub constructor_args: Vec<Value>,
    pub libraries: BTreeMap<String, Address>,
    #[serde(with = "crate::amount")]
    pub value: u128,
    pub from: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallExecution {
    pub contract_address: Address,
    pub artifact_id: String,
    pub function_name: String,
    pub args: Vec<Value>,
    #[serde(with = "crate::amount")]
    pub value: u128,
    pub from: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCallExecution {
    pub contract_address: Address,
    pub artifact_id: String,
    pub function_name: String,
    pub args: Vec<Value>,
    pub name_or_index: NameOrIndex,
    pub from: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAtExecution {
    pub contract_name: String,
    pub artifact_id: String,
    pub contract_address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadEventArgumentExecution {
    pub artifact_id: String,
    pub event_name: String,
    pub event_index: usize,
    pub name_or_index: NameOrIndex,
    pub emitter_address: Address,
    pub tx_to_read_from: TxHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendDataExecution {
    pub to: Address,
    pub data: Option<Bytes>,
    #[serde(with = "crate::amount")]
    pub value: u128,
    pub from: Address,
}

/// Type-specific, fully resolved parameters recorded when execution starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionKind {
    /// Shared by contract and library deployments.
    Deployment(DeploymentExecution),
    Call(CallExecution),
    StaticCall(StaticCallExecution),
    ContractAt(ContractAtExecution),
    ReadEventArgument(ReadEventArgumentExecution),
    SendData(SendDataExecution),
}

impl ExecutionKind {
    /// Whether this kind may back a future of type `future_type`.
    pub fn matches(&self, future_type: FutureType) -> bool {
        matches!(
            (self, future_type),
            (
                ExecutionKind::Deployment(_),
                FutureType::ContractDeployment | FutureType::LibraryDeployment
            ) | (ExecutionKind::Call(_), FutureType::ContractCall)
                | (ExecutionKind::StaticCall(_), FutureType::StaticCall)
                | (ExecutionKind::ContractAt(_), FutureType::ContractAt)
                | (
                    ExecutionKind::ReadEventArgument(_),
                    FutureType::ReadEventArgument
                )
                | (ExecutionKind::SendData(_), FutureType::SendData)
        )
    }

    pub fn from_address(&self) -> Option<Address> {
        match self {
            ExecutionKind::Deployment(d) => Some(d.from),
            ExecutionKind::Call(c) => Some(c.from),
            ExecutionKind::StaticCall(s) => Some(s.from),
            ExecutionKind::SendData(s) => Some(s.from),
            ExecutionKind::ContractAt(_) | ExecutionKind::ReadEventArgument(_) => None,
        }
    }
}

/// Why a transaction record stopped being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    /// The ledger forgot the transaction and its nonce was never consumed.
    Dropped,
    /// Another transaction, not sent by us, consumed the nonce.
    ReplacedByUser,
}

/// One submitted transaction of an on-chain interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: TxHash,
    pub from: Address,
    pub nonce: u64,
    pub fees: NetworkFees,
    pub receipt: Option<TransactionReceipt>,
    pub abandoned: Option<AbandonReason>,
}

impl TransactionRecord {
    pub fn is_live(&self) -> bool {
        self.abandoned.is_none()
    }
}

/// A logical network operation backed by one or more transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnchainInteraction {
    pub id: u32,
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
    #[serde(with = "crate::amount")]
    pub value: u128,
    /// Nonce currently reserved for this interaction.
    pub nonce: Option<u64>,
    pub transactions: Vec<TransactionRecord>,
    /// Set by a fee bump: the next send reuses `nonce` with higher fees.
    pub should_be_resent: bool,
}

impl OnchainInteraction {
    /// Transactions that may still be mined.
    pub fn live_transactions(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.transactions.iter().filter(|t| t.is_live())
    }

    pub fn confirmed_transaction(&self) -> Option<&TransactionRecord> {
        self.transactions.iter().find(|t| t.receipt.is_some())
    }

    /// Number of replacement transactions sent for the current nonce.
    pub fn fee_bumps(&self) -> usize {
        self.live_transactions().count().saturating_sub(1)
    }

    /// Reserved nonce while no transaction of this interaction is confirmed.
    pub fn pending_nonce(&self) -> Option<u64> {
        if self.confirmed_transaction().is_some() {
            None
        } else {
            self.nonce
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCallInteraction {
    pub id: u32,
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    #[serde(with = "crate::amount")]
    pub value: u128,
    pub result: Option<RawCallResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "interaction", rename_all = "snake_case")]
pub enum NetworkInteraction {
    Onchain(OnchainInteraction),
    StaticCall(StaticCallInteraction),
}

impl NetworkInteraction {
    pub fn id(&self) -> u32 {
        match self {
            NetworkInteraction::Onchain(i) => i.id,
            NetworkInteraction::StaticCall(i) => i.id,
        }
    }
}

/// Value produced by a successful future.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuccessResult {
    Deployment { address: Address },
    Call,
    StaticCall { value: Value },
    ContractAt { address: Address },
    ReadEventArgument { value: Value },
    SendData,
}

impl SuccessResult {
    pub fn address(&self) -> Option<Address> {
        match self {
            SuccessResult::Deployment { address } | SuccessResult::ContractAt { address } => {
                Some(*address)
            }
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            SuccessResult::StaticCall { value } | SuccessResult::ReadEventArgument { value } => {
                Some(value)
            }
            _ => None,
        }
    }
}

/// Final outcome of a future.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionResult {
    Success { result: SuccessResult },
    /// A confirmed transaction or static call reverted.
    Revert { error: String },
    /// The transaction was rejected before submission by simulation.
    SimulationError { error: String },
    /// The execution strategy could not make sense of the ledger's answer.
    StrategyError { error: String },
    /// The strategy needs a human decision before continuing.
    Held { reason: String },
    /// No confirmation after the maximum number of fee bumps.
    TimedOut { interaction_id: u32 },
}

impl ExecutionResult {
    /// Status an execution state takes when it completes with this result.
    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionResult::Success { .. } => ExecutionStatus::Success,
            ExecutionResult::Revert { .. }
            | ExecutionResult::SimulationError { .. }
            | ExecutionResult::StrategyError { .. } => ExecutionStatus::Failed,
            ExecutionResult::Held { .. } => ExecutionStatus::Hold,
            ExecutionResult::TimedOut { .. } => ExecutionStatus::Timeout,
        }
    }

    pub fn success(&self) -> Option<&SuccessResult> {
        match self {
            ExecutionResult::Success { result } => Some(result),
            _ => None,
        }
    }

    /// Human readable reason for anything but success.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            ExecutionResult::Success { .. } => None,
            ExecutionResult::Revert { error } => Some(format!("Reverted: {}", error)),
            ExecutionResult::SimulationError { error } => {
                Some(format!("Simulating the transaction failed: {}", error))
            }
            ExecutionResult::StrategyError { error } => {
                Some(format!("Execution strategy error: {}", error))
            }
            ExecutionResult::Held { reason } => Some(reason.clone()),
            ExecutionResult::TimedOut { interaction_id } => Some(format!(
                "Transaction of network interaction {} was not confirmed in time",
                interaction_id
            )),
        }
    }
}

/// Everything recorded about one future.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub id: FutureId,
    pub future_type: FutureType,
    pub status: ExecutionStatus,
    /// Dependencies of the future when execution started.
    pub dependencies: BTreeSet<FutureId>,
    pub strategy: String,
    pub kind: ExecutionKind,
    pub network_interactions: Vec<NetworkInteraction>,
    pub result: Option<ExecutionResult>,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn success_result(&self) -> Option<&SuccessResult> {
        self.result.as_ref().and_then(ExecutionResult::success)
    }

    pub fn last_interaction(&self) -> Option<&NetworkInteraction> {
        self.network_interactions.last()
    }

    pub fn interaction(&self, id: u32) -> Option<&NetworkInteraction> {
        self.network_interactions.iter().find(|i| i.id() == id)
    }

    pub fn interaction_mut(&mut self, id: u32) -> Option<&mut NetworkInteraction> {
        self.network_interactions.iter_mut().find(|i| i.id() == id)
    }

    pub fn onchain_interactions(&self) -> impl Iterator<Item = &OnchainInteraction> {
        self.network_interactions.iter().filter_map(|i| match i {
            NetworkInteraction::Onchain(o) => Some(o),
            NetworkInteraction::StaticCall(_) => None,
        })
    }

    /// Id for the next network interaction of this state.
    pub fn next_interaction_id(&self) -> u32 {
        self.network_interactions
            .iter()
            .map(NetworkInteraction::id)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Nonce and sender of an in-flight on-chain interaction, if any.
    pub fn pending_nonce_and_sender(&self) -> Option<(u64, Address)> {
        if self.is_terminal() {
            return None;
        }
        match self.last_interaction()? {
            NetworkInteraction::Onchain(o) => o.pending_nonce().map(|n| (n, o.from)),
            NetworkInteraction::StaticCall(_) => None,
        }
    }

    /// Highest nonce this state used for `sender`, across all interactions.
    /// Dropped transactions never consumed their nonce and are skipped.
    pub fn max_nonce_used_by(&self, sender: &Address) -> Option<u64> {
        self.onchain_interactions()
            .flat_map(|o| {
                o.transactions
                    .iter()
                    .filter(move |t| &t.from == sender)
                    .filter(|t| t.abandoned != Some(AbandonReason::Dropped))
                    .map(|t| t.nonce)
                    .chain(o.nonce.filter(|_| &o.from == sender))
            })
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NetworkFees;

    fn addr(n: u8) -> Address {
        Address::new([n; 20])
    }

    fn state_with(interaction: OnchainInteraction) -> ExecutionState {
        ExecutionState {
            id: "Mod#Foo".into(),
            future_type: FutureType::ContractDeployment,
            status: ExecutionStatus::Started,
            dependencies: BTreeSet::new(),
            strategy: "basic".into(),
            kind: ExecutionKind::SendData(SendDataExecution {
                to: addr(2),
                data: None,
                value: 0,
                from: addr(1),
            }),
            network_interactions: vec![NetworkInteraction::Onchain(interaction)],
            result: None,
        }
    }

    fn record(nonce: u64, hash: u8) -> TransactionRecord {
        TransactionRecord {
            hash: TxHash::new([hash; 32]),
            from: addr(1),
            nonce,
            fees: NetworkFees::Legacy { gas_price: 1 },
            receipt: None,
            abandoned: None,
        }
    }

    #[test]
    fn test_pending_nonce_and_fee_bumps() {
        let interaction = OnchainInteraction {
            id: 1,
            from: addr(1),
            to: Some(addr(2)),
            data: Bytes::default(),
            value: 0,
            nonce: Some(3),
            transactions: vec![record(3, 1), record(3, 2)],
            should_be_resent: false,
        };
        assert_eq!(interaction.fee_bumps(), 1);

        let state = state_with(interaction);
        assert_eq!(state.pending_nonce_and_sender(), Some((3, addr(1))));
        assert_eq!(state.max_nonce_used_by(&addr(1)), Some(3));
        assert_eq!(state.max_nonce_used_by(&addr(9)), None);
        assert_eq!(state.next_interaction_id(), 2);
    }

    #[test]
    fn test_dropped_records_release_their_nonce() {
        let mut dropped = record(5, 1);
        dropped.abandoned = Some(AbandonReason::Dropped);
        let mut replaced = record(4, 1);
        replaced.abandoned = Some(AbandonReason::ReplacedByUser);
        let interaction = OnchainInteraction {
            id: 1,
            from: addr(1),
            to: None,
            data: Bytes::default(),
            value: 0,
            nonce: None,
            transactions: vec![replaced, dropped],
            should_be_resent: false,
        };
        assert_eq!(interaction.live_transactions().count(), 0);
        let state = state_with(interaction);
        assert_eq!(state.pending_nonce_and_sender(), None);
        assert_eq!(state.max_nonce_used_by(&addr(1)), Some(4));
    }

    #[test]
    fn test_result_status_mapping() {
        assert_eq!(
            ExecutionResult::TimedOut { interaction_id: 1 }.status(),
            ExecutionStatus::Timeout
        );
        assert_eq!(
            ExecutionResult::Held {
                reason: "x".into()
            }
            .status(),
            ExecutionStatus::Hold
        );
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(!ExecutionStatus::Started.is_terminal());
    }
}
