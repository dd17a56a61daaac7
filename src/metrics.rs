//! Counters for a deployment run.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Execution metrics (thread-safe counters). Clones share the counters.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Transactions handed to the ledger, including fee-bumped resends
    pub transactions_sent: Arc<AtomicU64>,
    /// Replacement transactions with higher fees
    pub fee_bumps: Arc<AtomicU64>,
    /// Transactions that reached the required confirmations
    pub transactions_confirmed: Arc<AtomicU64>,
    /// Transactions the ledger forgot
    pub transactions_dropped: Arc<AtomicU64>,
    /// Nonces consumed by transactions we did not send
    pub transactions_replaced: Arc<AtomicU64>,
    /// Interactions given up after the last fee bump
    pub timeouts: Arc<AtomicU64>,
    pub static_calls: Arc<AtomicU64>,
    /// Gas estimations that failed and were simulated
    pub simulations: Arc<AtomicU64>,
    pub block_polls: Arc<AtomicU64>,
}

impl ExecutionMetrics {
    pub fn record_transaction_sent(&self) {
        self.transactions_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fee_bump(&self) {
        self.fee_bumps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_confirmation(&self) {
        self.transactions_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.transactions_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replaced(&self) {
        self.transactions_replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_static_call(&self) {
        self.static_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_simulation(&self) {
        self.simulations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_poll(&self) {
        self.block_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        ExecutionMetricsSnapshot {
            transactions_sent: self.transactions_sent.load(Ordering::Relaxed),
            fee_bumps: self.fee_bumps.load(Ordering::Relaxed),
            transactions_confirmed: self.transactions_confirmed.load(Ordering::Relaxed),
            transactions_dropped: self.transactions_dropped.load(Ordering::Relaxed),
            transactions_replaced: self.transactions_replaced.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            static_calls: self.static_calls.load(Ordering::Relaxed),
            simulations: self.simulations.load(Ordering::Relaxed),
            block_polls: self.block_polls.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics (for reporting).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMetricsSnapshot {
    pub transactions_sent: u64,
    pub fee_bumps: u64,
    pub transactions_confirmed: u64,
    pub transactions_dropped: u64,
    pub transactions_replaced: u64,
    pub timeouts: u64,
    pub static_calls: u64,
    pub simulations: u64,
    pub block_polls: u64,
}

impl ExecutionMetricsSnapshot {
    /// Share of sent transactions that were replacements.
    pub fn bump_rate(&self) -> f64 {
        if self.transactions_sent == 0 {
            return 0.0;
        }
        self.fee_bumps as f64 / self.transactions_sent as f64
    }

    /// Format a human-readable report.
    pub fn format_report(&self) -> String {
        let mut lines = Vec::new();
        lines.push("Deployment Metrics Report".to_string());
        lines.push("=".repeat(50));
        lines.push("Transactions:".to_string());
        lines.push(format!("  Sent:            {}", self.transactions_sent));
        lines.push(format!("  Confirmed:       {}", self.transactions_confirmed));
        lines.push(format!("  Fee bumps:       {}", self.fee_bumps));
        lines.push(format!("  Bump Rate:       {:.1}%", self.bump_rate() * 100.0));
        lines.push(format!("  Dropped:         {}", self.transactions_dropped));
        lines.push(format!("  Replaced:        {}", self.transactions_replaced));
        lines.push(format!("  Timed out:       {}", self.timeouts));
        lines.push(String::new());
        lines.push("Reads:".to_string());
        lines.push(format!("  Static calls:    {}", self.static_calls));
        lines.push(format!("  Simulations:     {}", self.simulations));
        lines.push(format!("  Block polls:     {}", self.block_polls));
        lines.join("\n")
    }
}
