//! Batch-by-batch execution of a plan.

use anyhow::{anyhow, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

use ledgerplan_types::{Address, FutureId, JournalMessage, Plan};

use super::{is_settled, ExecutionContext, FutureProcessor, FutureProgress};
use crate::batcher;
use crate::error::InvariantError;
use crate::nonce::{nonce_sync_messages, NonceManager};
use crate::state::DeploymentState;

pub struct ExecutionEngine {
    ctx: Arc<ExecutionContext>,
}

impl ExecutionEngine {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    /// Senders of the futures that may still submit transactions.
    fn active_senders(&self, plan: &Plan, state: &DeploymentState) -> Result<BTreeSet<Address>> {
        let resolver = self.ctx.resolver(state);
        let mut senders = BTreeSet::new();
        for future in plan.futures().filter(|f| f.sends_transactions()) {
            if state.is_success(future.id()) {
                continue;
            }
            let sender = match state.get(future.id()).and_then(|e| e.kind.from_address()) {
                Some(sender) => sender,
                None => resolver.sender(future.id(), future.sender())?,
            };
            senders.insert(sender);
        }
        Ok(senders)
    }

    async fn sync_nonces(&self, plan: &Plan, state: &mut DeploymentState) -> Result<()> {
        let senders = self.active_senders(plan, state)?;
        let messages = nonce_sync_messages(
            self.ctx.client.as_ref(),
            state,
            &senders,
            self.ctx.config.required_confirmations,
        )
        .await?;
        for message in messages {
            match &message {
                JournalMessage::OnchainInteractionDropped { .. } => {
                    self.ctx.metrics.record_dropped()
                }
                JournalMessage::OnchainInteractionReplacedByUser { .. } => {
                    self.ctx.metrics.record_replaced()
                }
                _ => {}
            }
            state.record_and_apply(self.ctx.loader.as_ref(), message)?;
        }
        Ok(())
    }

    async fn wait_for_next_block(&self, current: u64) -> Result<()> {
        loop {
            tokio::time::sleep(self.ctx.config.block_polling_interval).await;
            let block = self.ctx.client.latest_block().await?;
            self.ctx.metrics.record_block_poll();
            if block.number > current {
                return Ok(());
            }
        }
    }

    /// Execute every batch. Futures whose dependencies did not all succeed
    /// are skipped; the rest of the plan keeps going.
    pub async fn execute_module(&self, plan: &Plan, state: &mut DeploymentState) -> Result<()> {
        self.sync_nonces(plan, state).await?;

        let batches = batcher::batch(plan, state)?;
        let nonces = NonceManager::new(self.ctx.client.clone(), state);
        let mut processor = FutureProcessor::new(self.ctx.clone(), nonces);

        tracing::info!(
            plan = plan.id(),
            batches = batches.len(),
            futures = batches.iter().map(Vec::len).sum::<usize>(),
            "executing plan"
        );

        for (index, batch) in batches.iter().enumerate() {
            let mut runnable = Vec::with_capacity(batch.len());
            for id in batch {
                let future = plan.get(id).ok_or_else(|| {
                    anyhow!(InvariantError::UnknownFuture {
                        future_id: id.clone(),
                    })
                })?;
                let blocked: Vec<&FutureId> = future
                    .dependencies()
                    .iter()
                    .filter(|dep| !state.is_success(dep))
                    .collect();
                if blocked.is_empty() {
                    runnable.push(id.clone());
                } else {
                    tracing::warn!(
                        future_id = %id,
                        dependencies = ?blocked,
                        "skipping future with unsuccessful dependencies"
                    );
                }
            }
            if runnable.is_empty() {
                continue;
            }

            tracing::info!(batch = index, futures = runnable.len(), "starting batch");
            loop {
                let block = self.ctx.client.latest_block().await?;
                self.ctx.metrics.record_block_poll();

                let mut waiting = false;
                for id in batcher::order_batch(state, &runnable, self.ctx.default_sender) {
                    let future = plan.get(&id).ok_or_else(|| {
                        anyhow!(InvariantError::UnknownFuture {
                            future_id: id.clone(),
                        })
                    })?;
                    if processor.process_future(future, state, &block).await?
                        == FutureProgress::Waiting
                    {
                        waiting = true;
                    }
                }

                if !waiting && is_settled(state, &runnable) {
                    break;
                }
                self.wait_for_next_block(block.number).await?;
            }

            let unsuccessful: Vec<&FutureId> =
                runnable.iter().filter(|id| !state.is_success(id)).collect();
            if !unsuccessful.is_empty() {
                tracing::warn!(
                    batch = index,
                    futures = ?unsuccessful,
                    "batch did not fully succeed, continuing with independent futures"
                );
            }
        }
        Ok(())
    }
}
