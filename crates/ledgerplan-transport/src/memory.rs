//! In-memory simulated ledger.
//!
//! A deterministic ledger that implements [`NetworkClient`] without any I/O.
//! It keeps a pending pool and a chain of blocks, and exposes knobs to
//! reproduce the situations the engine has to survive: transactions stuck
//! below a minimum fee, transactions dropped from the pool, nonces consumed
//! by somebody else, reverting calls, and events emitted by receipts.
//!
//! Blocks are produced in two ways:
//! - automine: every accepted transaction is mined into its own block
//! - mine on poll: every `latest_block` call produces a block, which is how
//!   confirmations accumulate while the engine polls
//!
//! Matching rules (reverts, call results, events) work on byte needles: a rule
//! applies when the transaction or call data contains the needle.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ledgerplan_types::{
    Address, Block, BlockTag, Bytes, CallRequest, Log, NetworkFees, RawCallResult, ReceiptStatus,
    TransactionInfo, TransactionReceipt, TransactionRequest, TxHash,
};

use crate::{NetworkClient, RpcError};

const DEFAULT_CHAIN_ID: u64 = 31337;
const DEFAULT_BASE_FEE: u128 = 1_000_000_000;
const DEFAULT_PRIORITY_FEE: u128 = 1_000_000_000;
const BASE_GAS: u64 = 21_000;

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..]);
    out
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[derive(Debug, Clone)]
struct PendingTx {
    request: TransactionRequest,
    hash: TxHash,
    external: bool,
}

#[derive(Debug, Clone)]
struct MinedTx {
    info: TransactionInfo,
    receipt: TransactionReceipt,
}

#[derive(Debug, Clone)]
struct RevertRule {
    needle: Vec<u8>,
    reason: Bytes,
}

#[derive(Debug, Clone)]
struct EventRule {
    needle: Vec<u8>,
    topics: Vec<Bytes>,
    data: Bytes,
}

#[derive(Debug)]
struct LedgerState {
    chain_id: u64,
    accounts: Vec<Address>,
    blocks: Vec<Block>,
    automine: bool,
    mine_on_poll: bool,
    base_fee: u128,
    min_price_per_gas: u128,
    pool: Vec<PendingTx>,
    mined: HashMap<TxHash, MinedTx>,
    /// Per sender: block number of each consumed nonce, indexed by nonce.
    nonce_blocks: HashMap<Address, Vec<u64>>,
    reverts: Vec<RevertRule>,
    call_results: Vec<(Vec<u8>, Bytes)>,
    events: Vec<EventRule>,
    sent: Vec<TransactionRequest>,
    sequence: u64,
}

impl LedgerState {
    fn latest(&self) -> u64 {
        self.blocks.last().map(|b| b.number).unwrap_or(0)
    }

    fn confirmed_count(&self, address: &Address, at: u64) -> u64 {
        self.nonce_blocks
            .get(address)
            .map(|blocks| blocks.iter().filter(|b| **b <= at).count() as u64)
            .unwrap_or(0)
    }

    fn pending_count(&self, address: &Address) -> u64 {
        let confirmed = self.confirmed_count(address, self.latest());
        self.pool
            .iter()
            .filter(|p| &p.request.from == address)
            .map(|p| p.request.nonce + 1)
            .max()
            .unwrap_or(0)
            .max(confirmed)
    }

    fn revert_for(&self, data: &[u8]) -> Option<&RevertRule> {
        self.reverts.iter().find(|r| contains(data, &r.needle))
    }

    fn next_hash(&mut self, request: &TransactionRequest) -> TxHash {
        self.sequence += 1;
        TxHash::new(sha256(&[
            request.from.as_bytes(),
            &request.nonce.to_be_bytes(),
            &request.fees.max_price_per_gas().to_be_bytes(),
            request.data.as_slice(),
            &self.sequence.to_be_bytes(),
        ]))
    }

    fn mine_block(&mut self) -> u64 {
        let number = self.latest() + 1;
        let block_hash = format!("0x{}", hex::encode(sha256(&[&number.to_be_bytes()])));
        let mut included = Vec::new();

        // Take every transaction whose nonce is next for its sender, until no progress.
        loop {
            let ready = self.pool.iter().position(|p| {
                p.request.fees.max_price_per_gas() >= self.min_price_per_gas
                    && p.request.nonce == self.confirmed_count(&p.request.from, number)
            });
            let Some(index) = ready else { break };
            let tx = self.pool.remove(index);
            self.nonce_blocks
                .entry(tx.request.from)
                .or_default()
                .push(number);
            included.push(tx);
        }

        for (position, tx) in included.into_iter().enumerate() {
            let reverted = self.revert_for(tx.request.data.as_slice()).is_some();
            let status = if reverted {
                ReceiptStatus::Failure
            } else {
                ReceiptStatus::Success
            };
            let contract_address = match (tx.request.to, reverted) {
                (None, false) => Some(InMemoryLedger::contract_address(
                    &tx.request.from,
                    tx.request.nonce,
                )),
                _ => None,
            };
            let emitter = tx.request.to.or(contract_address);
            let logs = match (emitter, reverted) {
                (Some(address), false) => self
                    .events
                    .iter()
                    .filter(|e| contains(tx.request.data.as_slice(), &e.needle))
                    .enumerate()
                    .map(|(i, e)| Log {
                        address,
                        topics: e.topics.clone(),
                        data: e.data.clone(),
                        log_index: i as u64,
                    })
                    .collect(),
                _ => vec![],
            };
            tracing::trace!(block = number, position, hash = %tx.hash, external = tx.external, "mined transaction");
            self.mined.insert(
                tx.hash,
                MinedTx {
                    info: TransactionInfo {
                        hash: tx.hash,
                        from: tx.request.from,
                        nonce: tx.request.nonce,
                        block_number: Some(number),
                    },
                    receipt: TransactionReceipt {
                        transaction_hash: tx.hash,
                        block_number: number,
                        block_hash: block_hash.clone(),
                        status,
                        contract_address,
                        logs,
                    },
                },
            );
        }

        self.blocks.push(Block {
            number,
            hash: block_hash,
            base_fee_per_gas: Some(self.base_fee),
        });
        number
    }
}

/// Deterministic simulated ledger. Cloning shares the same chain.
#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_CHAIN_ID)
    }
}

impl InMemoryLedger {
    /// A ledger with ten funded accounts, automine and mine-on-poll enabled.
    pub fn new(chain_id: u64) -> Self {
        let accounts = (1u8..=10)
            .map(|i| Address::from_slice(&sha256(&[b"account", &[i]])))
            .collect();
        let genesis = Block {
            number: 0,
            hash: format!("0x{}", hex::encode(sha256(&[&0u64.to_be_bytes()]))),
            base_fee_per_gas: Some(DEFAULT_BASE_FEE),
        };
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                chain_id,
                accounts,
                blocks: vec![genesis],
                automine: true,
                mine_on_poll: true,
                base_fee: DEFAULT_BASE_FEE,
                min_price_per_gas: 0,
                pool: Vec::new(),
                mined: HashMap::new(),
                nonce_blocks: HashMap::new(),
                reverts: Vec::new(),
                call_results: Vec::new(),
                events: Vec::new(),
                sent: Vec::new(),
                sequence: 0,
            })),
        }
    }

    /// Address a contract created by `from` at `nonce` ends up at.
    pub fn contract_address(from: &Address, nonce: u64) -> Address {
        Address::from_slice(&sha256(&[b"create", from.as_bytes(), &nonce.to_be_bytes()]))
    }

    pub fn accounts(&self) -> Vec<Address> {
        self.state.lock().accounts.clone()
    }

    pub fn set_automine(&self, automine: bool) {
        self.state.lock().automine = automine;
    }

    pub fn set_mine_on_poll(&self, mine_on_poll: bool) {
        self.state.lock().mine_on_poll = mine_on_poll;
    }

    pub fn set_base_fee(&self, base_fee: u128) {
        self.state.lock().base_fee = base_fee;
    }

    /// Transactions paying less than this per gas stay in the pool.
    pub fn set_min_price_per_gas(&self, price: u128) {
        self.state.lock().min_price_per_gas = price;
    }

    /// Transactions and calls whose data contains `needle` revert with `reason`.
    pub fn revert_on(&self, needle: &[u8], reason: Bytes) {
        self.state.lock().reverts.push(RevertRule {
            needle: needle.to_vec(),
            reason,
        });
    }

    /// Calls whose data contains `needle` return `return_data`.
    pub fn set_call_result(&self, needle: &[u8], return_data: Bytes) {
        self.state
            .lock()
            .call_results
            .push((needle.to_vec(), return_data));
    }

    /// Mined transactions whose data contains `needle` emit a log from their target.
    pub fn emit_on(&self, needle: &[u8], topics: Vec<Bytes>, data: Bytes) {
        self.state.lock().events.push(EventRule {
            needle: needle.to_vec(),
            topics,
            data,
        });
    }

    pub fn mine_block(&self) -> u64 {
        self.state.lock().mine_block()
    }

    pub fn mine_blocks(&self, count: usize) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.mine_block();
        }
    }

    pub fn block_number(&self) -> u64 {
        self.state.lock().latest()
    }

    /// Forget a pending transaction, as a node evicting it from its pool would.
    pub fn drop_transaction(&self, hash: TxHash) -> bool {
        let mut state = self.state.lock();
        let before = state.pool.len();
        state.pool.retain(|p| p.hash != hash);
        before != state.pool.len()
    }

    /// Consume the next nonce of `from` with a transaction we did not send,
    /// mining it immediately. Pending transactions of ours with that nonce are
    /// evicted.
    pub fn send_external_transaction(&self, from: Address) -> TxHash {
        let mut state = self.state.lock();
        let latest = state.latest();
        let nonce = state.confirmed_count(&from, latest);
        let request = TransactionRequest {
            from,
            to: Some(from),
            data: Bytes::default(),
            value: 0,
            nonce,
            fees: NetworkFees::Legacy {
                gas_price: state.base_fee.max(state.min_price_per_gas),
            },
            gas_limit: BASE_GAS,
            chain_id: state.chain_id,
        };
        let hash = state.next_hash(&request);
        state
            .pool
            .retain(|p| !(p.request.from == from && p.request.nonce == nonce));
        state.pool.push(PendingTx {
            request,
            hash,
            external: true,
        });
        state.mine_block();
        hash
    }

    /// Every transaction submitted through [`NetworkClient::send_transaction`].
    pub fn sent_transactions(&self) -> Vec<TransactionRequest> {
        self.state.lock().sent.clone()
    }

    pub fn pending_transactions(&self) -> Vec<TxHash> {
        self.state.lock().pool.iter().map(|p| p.hash).collect()
    }

    /// Mined nonces per sender, for assertions on nonce order.
    pub fn mined_nonces(&self) -> BTreeMap<Address, u64> {
        let state = self.state.lock();
        state
            .nonce_blocks
            .iter()
            .map(|(addr, blocks)| (*addr, blocks.len() as u64))
            .collect()
    }

    fn rpc_error(code: i64, message: &str, data: Option<Bytes>) -> anyhow::Error {
        anyhow!(RpcError::Rpc {
            code,
            message: message.to_string(),
            data,
        })
    }
}

#[async_trait]
impl NetworkClient for InMemoryLedger {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.state.lock().chain_id)
    }

    async fn latest_block(&self) -> Result<Block> {
        let mut state = self.state.lock();
        if state.mine_on_poll {
            state.mine_block();
        }
        state
            .blocks
            .last()
            .cloned()
            .ok_or_else(|| anyhow!("ledger has no blocks"))
    }

    async fn transaction_count(&self, address: Address, tag: BlockTag) -> Result<u64> {
        let state = self.state.lock();
        Ok(match tag {
            BlockTag::Latest => state.confirmed_count(&address, state.latest()),
            BlockTag::Pending => state.pending_count(&address),
            BlockTag::Number(n) => state.confirmed_count(&address, n),
        })
    }

    async fn network_fees(&self) -> Result<NetworkFees> {
        let state = self.state.lock();
        Ok(NetworkFees::Eip1559 {
            max_fee_per_gas: state.base_fee * 2 + DEFAULT_PRIORITY_FEE,
            max_priority_fee_per_gas: DEFAULT_PRIORITY_FEE,
        })
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64> {
        let state = self.state.lock();
        if let Some(rule) = state.revert_for(request.data.as_slice()) {
            return Err(Self::rpc_error(
                3,
                "execution reverted",
                Some(rule.reason.clone()),
            ));
        }
        Ok(BASE_GAS + 16 * request.data.len() as u64)
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash> {
        let mut state = self.state.lock();
        if request.chain_id != state.chain_id {
            return Err(Self::rpc_error(-32000, "invalid chain id", None));
        }
        let confirmed = state.confirmed_count(&request.from, state.latest());
        if request.nonce < confirmed {
            return Err(Self::rpc_error(-32000, "nonce too low", None));
        }
        if let Some(existing) = state
            .pool
            .iter()
            .find(|p| p.request.from == request.from && p.request.nonce == request.nonce)
        {
            let old = existing.request.fees.max_price_per_gas();
            if request.fees.max_price_per_gas() < old.saturating_mul(110) / 100 {
                return Err(Self::rpc_error(
                    -32000,
                    "replacement transaction underpriced",
                    None,
                ));
            }
        }

        let hash = state.next_hash(request);
        state
            .pool
            .retain(|p| !(p.request.from == request.from && p.request.nonce == request.nonce));
        state.pool.push(PendingTx {
            request: request.clone(),
            hash,
            external: false,
        });
        state.sent.push(request.clone());
        if state.automine {
            state.mine_block();
        }
        Ok(hash)
    }

    async fn transaction(&self, hash: TxHash) -> Result<Option<TransactionInfo>> {
        let state = self.state.lock();
        if let Some(mined) = state.mined.get(&hash) {
            return Ok(Some(mined.info.clone()));
        }
        Ok(state
            .pool
            .iter()
            .find(|p| p.hash == hash)
            .map(|p| TransactionInfo {
                hash: p.hash,
                from: p.request.from,
                nonce: p.request.nonce,
                block_number: None,
            }))
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>> {
        Ok(self
            .state
            .lock()
            .mined
            .get(&hash)
            .map(|m| m.receipt.clone()))
    }

    async fn call(&self, request: &CallRequest, _tag: BlockTag) -> Result<RawCallResult> {
        let state = self.state.lock();
        if let Some(rule) = state.revert_for(request.data.as_slice()) {
            return Ok(RawCallResult {
                return_data: rule.reason.clone(),
                success: false,
            });
        }
        let return_data = state
            .call_results
            .iter()
            .find(|(needle, _)| contains(request.data.as_slice(), needle))
            .map(|(_, data)| data.clone())
            .unwrap_or_default();
        Ok(RawCallResult {
            return_data,
            success: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(ledger: &InMemoryLedger, nonce: u64, price: u128) -> TransactionRequest {
        TransactionRequest {
            from: ledger.accounts()[0],
            to: None,
            data: Bytes(b"deploy Foo".to_vec()),
            value: 0,
            nonce,
            fees: NetworkFees::Legacy { gas_price: price },
            gas_limit: 100_000,
            chain_id: DEFAULT_CHAIN_ID,
        }
    }

    #[tokio::test]
    async fn test_automine_produces_receipt_and_contract_address() {
        let ledger = InMemoryLedger::default();
        let hash = ledger.send_transaction(&tx(&ledger, 0, 10)).await.unwrap();
        let receipt = ledger.transaction_receipt(hash).await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Success);
        assert_eq!(
            receipt.contract_address,
            Some(InMemoryLedger::contract_address(&ledger.accounts()[0], 0))
        );
        let from = ledger.accounts()[0];
        assert_eq!(
            ledger.transaction_count(from, BlockTag::Latest).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_underpriced_transactions_stay_pending_until_bumped() {
        let ledger = InMemoryLedger::default();
        ledger.set_min_price_per_gas(100);
        let from = ledger.accounts()[0];

        let first = ledger.send_transaction(&tx(&ledger, 0, 10)).await.unwrap();
        assert!(ledger.transaction_receipt(first).await.unwrap().is_none());
        assert_eq!(
            ledger.transaction_count(from, BlockTag::Pending).await.unwrap(),
            1
        );

        let err = ledger
            .send_transaction(&tx(&ledger, 0, 10))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("underpriced"));

        let second = ledger.send_transaction(&tx(&ledger, 0, 200)).await.unwrap();
        assert!(ledger.transaction(first).await.unwrap().is_none());
        assert!(ledger.transaction_receipt(second).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dropped_and_external_transactions() {
        let ledger = InMemoryLedger::default();
        ledger.set_automine(false);
        let from = ledger.accounts()[0];

        let hash = ledger.send_transaction(&tx(&ledger, 0, 10)).await.unwrap();
        assert!(ledger.drop_transaction(hash));
        assert!(ledger.transaction(hash).await.unwrap().is_none());
        assert_eq!(
            ledger.transaction_count(from, BlockTag::Pending).await.unwrap(),
            0
        );

        ledger.send_transaction(&tx(&ledger, 0, 10)).await.unwrap();
        ledger.send_external_transaction(from);
        assert!(ledger.pending_transactions().is_empty());
        assert_eq!(
            ledger.transaction_count(from, BlockTag::Latest).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_revert_rules_apply_to_estimation_calls_and_receipts() {
        let ledger = InMemoryLedger::default();
        ledger.revert_on(b"boom", Bytes(b"nope".to_vec()));
        let from = ledger.accounts()[0];
        let call = CallRequest {
            from,
            to: Some(from),
            data: Bytes(b"call boom()".to_vec()),
            value: 0,
        };

        let err = ledger.estimate_gas(&call).await.unwrap_err();
        let rpc = err.downcast_ref::<RpcError>().unwrap();
        assert!(rpc.is_execution_error());

        let result = ledger.call(&call, BlockTag::Latest).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.return_data, Bytes(b"nope".to_vec()));
    }

    #[tokio::test]
    async fn test_poll_mining_accumulates_confirmations() {
        let ledger = InMemoryLedger::default();
        let hash = ledger.send_transaction(&tx(&ledger, 0, 10)).await.unwrap();
        let receipt = ledger.transaction_receipt(hash).await.unwrap().unwrap();
        let mut latest = 0;
        for _ in 0..4 {
            latest = ledger.latest_block().await.unwrap().number;
        }
        assert_eq!(receipt.confirmations(latest), 5);
    }
}
