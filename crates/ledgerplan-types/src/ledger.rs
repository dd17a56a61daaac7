//! Values exchanged with the remote ledger.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::{Address, Bytes, TxHash};

/// Block header fields the engine cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub hash: String,
    /// Base fee of the block, when the ledger uses base-fee pricing.
    #[serde(default, with = "crate::amount::option")]
    pub base_fee_per_gas: Option<u128>,
}

/// Block selector for state queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Pending,
    Number(u64),
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Latest => f.write_str("latest"),
            BlockTag::Pending => f.write_str("pending"),
            BlockTag::Number(n) => write!(f, "0x{:x}", n),
        }
    }
}

/// Fee parameters of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkFees {
    Eip1559 {
        #[serde(with = "crate::amount")]
        max_fee_per_gas: u128,
        #[serde(with = "crate::amount")]
        max_priority_fee_per_gas: u128,
    },
    Legacy {
        #[serde(with = "crate::amount")]
        gas_price: u128,
    },
}

impl NetworkFees {
    /// The maximum price per gas unit this fee setting may pay.
    pub fn max_price_per_gas(&self) -> u128 {
        match self {
            NetworkFees::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
            NetworkFees::Legacy { gas_price } => *gas_price,
        }
    }

    /// Fees for a replacement transaction: at least 10% above `self` (plus one
    /// unit so tiny values still move) and never below what the network asks now.
    pub fn bumped(&self, network: &NetworkFees) -> NetworkFees {
        fn bump(value: u128) -> u128 {
            value.saturating_mul(110) / 100 + 1
        }

        match (self, network) {
            (
                NetworkFees::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                },
                NetworkFees::Eip1559 {
                    max_fee_per_gas: net_max,
                    max_priority_fee_per_gas: net_priority,
                },
            ) => {
                let priority = bump(*max_priority_fee_per_gas).max(*net_priority);
                let max_fee = bump(*max_fee_per_gas).max(*net_max).max(priority);
                NetworkFees::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority,
                }
            }
            (NetworkFees::Eip1559 { .. }, NetworkFees::Legacy { gas_price }) => {
                let current = self.max_price_per_gas();
                NetworkFees::Legacy {
                    gas_price: bump(current).max(*gas_price),
                }
            }
            (NetworkFees::Legacy { gas_price }, _) => NetworkFees::Legacy {
                gas_price: bump(*gas_price).max(network.max_price_per_gas()),
            },
        }
    }
}

/// A transaction to submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: Address,
    /// `None` creates a contract.
    pub to: Option<Address>,
    pub data: Bytes,
    #[serde(with = "crate::amount")]
    pub value: u128,
    pub nonce: u64,
    pub fees: NetworkFees,
    pub gas_limit: u64,
    pub chain_id: u64,
}

/// A read-only call (also used for gas estimation and simulation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
    #[serde(with = "crate::amount")]
    pub value: u128,
}

impl From<&TransactionRequest> for CallRequest {
    fn from(tx: &TransactionRequest) -> Self {
        CallRequest {
            from: tx.from,
            to: tx.to,
            data: tx.data.clone(),
            value: tx.value,
        }
    }
}

/// Result of a read-only call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCallResult {
    pub return_data: Bytes,
    pub success: bool,
}

/// A transaction as known by the ledger (pending or mined).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub hash: TxHash,
    pub from: Address,
    pub nonce: u64,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Failure,
}

/// An event log emitted by a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Bytes>,
    pub data: Bytes,
    pub log_index: u64,
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub block_hash: String,
    pub status: ReceiptStatus,
    pub contract_address: Option<Address>,
    #[serde(default)]
    pub logs: Vec<Log>,
}

impl TransactionReceipt {
    /// Confirmations of this receipt when `latest` is the newest block.
    pub fn confirmations(&self, latest: u64) -> u64 {
        if latest < self.block_number {
            0
        } else {
            latest - self.block_number + 1
        }
    }
}
