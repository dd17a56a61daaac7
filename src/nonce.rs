//! Nonce bookkeeping for the senders of a deployment.
//!
//! Nonces are assigned by [`NonceManager::next_nonce`] under a per-sender
//! lock, so two futures of the same batch never race for the same nonce.
//! [`nonce_sync_messages`] runs once before execution and reconciles what
//! the journal says is in flight with what the ledger actually has.

use anyhow::{anyhow, Result};
use futures::future::try_join_all;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use ledgerplan_transport::NetworkClient;
use ledgerplan_types::{Address, BlockTag, JournalMessage, NetworkInteraction};

use crate::error::NonceSyncError;
use crate::state::DeploymentState;

/// Highest nonce each sender used in the recorded history.
pub fn max_nonce_used_by_sender(state: &DeploymentState) -> HashMap<Address, u64> {
    let mut out: HashMap<Address, u64> = HashMap::new();
    for exec in state.execution_states.values() {
        for interaction in exec.onchain_interactions() {
            if let Some(nonce) = exec.max_nonce_used_by(&interaction.from) {
                let entry = out.entry(interaction.from).or_insert(nonce);
                *entry = (*entry).max(nonce);
            }
        }
    }
    out
}

pub struct NonceManager {
    client: Arc<dyn NetworkClient>,
    max_used: Mutex<HashMap<Address, u64>>,
    /// Value of `max_used` before the last assignment, for `revert_nonce`.
    previous: Mutex<HashMap<Address, Option<u64>>>,
    locks: Mutex<HashMap<Address, Arc<tokio::sync::Mutex<()>>>>,
}

impl NonceManager {
    pub fn new(client: Arc<dyn NetworkClient>, state: &DeploymentState) -> Self {
        Self {
            client,
            max_used: Mutex::new(max_nonce_used_by_sender(state)),
            previous: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Serialize nonce assignment and submission for `sender`.
    pub async fn lock_sender(&self, sender: Address) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().entry(sender).or_default().clone();
        lock.lock_owned().await
    }

    /// Next nonce for `sender`: one above anything this deployment used,
    /// and never below the ledger's pending transaction count.
    pub async fn next_nonce(&self, sender: Address) -> Result<u64> {
        let pending = self
            .client
            .transaction_count(sender, BlockTag::Pending)
            .await?;

        let mut max_used = self.max_used.lock();
        let previous = max_used.get(&sender).copied();
        let next = previous.map(|n| n + 1).unwrap_or(0).max(pending);
        max_used.insert(sender, next);
        self.previous.lock().insert(sender, previous);

        tracing::debug!(%sender, nonce = next, pending, "assigned nonce");
        Ok(next)
    }

    /// Undo the last assignment for `sender` after a submission that never
    /// reached the ledger.
    pub fn revert_nonce(&self, sender: Address) {
        if let Some(previous) = self.previous.lock().remove(&sender) {
            let mut max_used = self.max_used.lock();
            match previous {
                Some(n) => max_used.insert(sender, n),
                None => max_used.remove(&sender),
            };
            tracing::debug!(%sender, "reverted nonce assignment");
        }
    }

    /// Recompute what `sender` has used from `state`, after one of its
    /// transactions left the mempool without consuming its nonce.
    pub fn release(&self, sender: Address, state: &DeploymentState) {
        let used = max_nonce_used_by_sender(state).remove(&sender);
        let mut max_used = self.max_used.lock();
        match used {
            Some(n) => max_used.insert(sender, n),
            None => max_used.remove(&sender),
        };
        self.previous.lock().remove(&sender);
        tracing::debug!(%sender, max_used = ?used, "released nonce");
    }

    pub fn max_used(&self, sender: &Address) -> Option<u64> {
        self.max_used.lock().get(sender).copied()
    }
}

/// Messages that bring in-flight interactions in line with the ledger.
///
/// Fails when the ledger holds transactions for one of `senders` that are
/// not yet safe to build on.
pub async fn nonce_sync_messages(
    client: &dyn NetworkClient,
    state: &DeploymentState,
    senders: &BTreeSet<Address>,
    required_confirmations: u64,
) -> Result<Vec<JournalMessage>> {
    let latest_block = client.latest_block().await?.number;
    let mut messages = Vec::new();

    for sender in senders {
        let sender = *sender;
        let latest = client.transaction_count(sender, BlockTag::Latest).await?;
        let pending = client.transaction_count(sender, BlockTag::Pending).await?;
        let safe = if latest_block + 1 < required_confirmations {
            0
        } else {
            client
                .transaction_count(
                    sender,
                    BlockTag::Number(latest_block + 1 - required_confirmations),
                )
                .await?
        };

        let in_flight: Vec<_> = state
            .execution_states
            .values()
            .filter(|exec| !exec.is_terminal())
            .filter_map(|exec| match exec.last_interaction() {
                Some(NetworkInteraction::Onchain(o)) if o.from == sender => {
                    o.pending_nonce().map(|nonce| (exec, o, nonce))
                }
                _ => None,
            })
            .collect();

        if in_flight.is_empty() {
            if pending != latest || latest != safe {
                return Err(anyhow!(NonceSyncError::WaitingForConfirmations {
                    sender,
                    required_confirmations,
                }));
            }
            continue;
        }

        for (exec, interaction, nonce) in in_flight {
            let infos = try_join_all(
                interaction
                    .live_transactions()
                    .map(|tx| client.transaction(tx.hash)),
            )
            .await?;
            let known = infos.iter().any(Option::is_some);
            let mined = infos.iter().flatten().any(|info| info.block_number.is_some());
            if mined {
                continue;
            }

            if latest > nonce {
                if safe > nonce {
                    tracing::warn!(
                        future_id = %exec.id,
                        %sender,
                        nonce,
                        "nonce was used by a transaction not sent by this deployment"
                    );
                    messages.push(JournalMessage::OnchainInteractionReplacedByUser {
                        future_id: exec.id.clone(),
                        interaction_id: interaction.id,
                    });
                } else {
                    return Err(anyhow!(NonceSyncError::WaitingForConfirmations {
                        sender,
                        required_confirmations,
                    }));
                }
            } else if pending > nonce {
                if !known {
                    return Err(anyhow!(NonceSyncError::WaitingForNonce {
                        sender,
                        nonce,
                        future_id: exec.id.clone(),
                    }));
                }
            } else if !known {
                tracing::warn!(
                    future_id = %exec.id,
                    %sender,
                    nonce,
                    "transaction was dropped from the mempool"
                );
                messages.push(JournalMessage::OnchainInteractionDropped {
                    future_id: exec.id.clone(),
                    interaction_id: interaction.id,
                });
            }
        }
    }
    Ok(messages)
}
