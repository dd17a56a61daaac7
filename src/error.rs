//! Typed errors that abort a run.
//!
//! Per-future failures (reverts, simulation errors, timeouts) are not errors
//! here: they are recorded in the journal and reported through
//! [`crate::deployer::DeploymentResult`]. The types below describe conditions
//! under which the engine cannot continue at all.

use std::fmt;

use ledgerplan_types::{Address, ExecutionStatus, FutureId, FutureType};

/// The journal, the plan and the engine disagree in a way that valid input
/// never produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    /// A message refers to a future that has no execution state.
    MissingExecutionState { future_id: FutureId },
    AlreadyInitialized { future_id: FutureId },
    MissingInteraction { future_id: FutureId, interaction_id: u32 },
    /// The interaction exists but has the wrong kind for the message.
    WrongInteractionKind { future_id: FutureId, interaction_id: u32 },
    /// Interaction ids must be assigned in order.
    UnexpectedInteractionId {
        future_id: FutureId,
        expected: u32,
        got: u32,
    },
    MissingTransaction { future_id: FutureId, hash: String },
    /// A message tried to change a state that already finished.
    TerminalState {
        future_id: FutureId,
        status: ExecutionStatus,
        message: &'static str,
    },
    KindMismatch {
        future_id: FutureId,
        future_type: FutureType,
    },
    UnknownFuture { future_id: FutureId },
    /// A dependency that should have succeeded has no usable result.
    MissingResult {
        future_id: FutureId,
        dependency: FutureId,
    },
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantError::MissingExecutionState { future_id } => {
                write!(f, "No execution state for future {}", future_id)
            }
            InvariantError::AlreadyInitialized { future_id } => {
                write!(f, "Execution state for future {} already exists", future_id)
            }
            InvariantError::MissingInteraction {
                future_id,
                interaction_id,
            } => write!(
                f,
                "Future {} has no network interaction {}",
                future_id, interaction_id
            ),
            InvariantError::WrongInteractionKind {
                future_id,
                interaction_id,
            } => write!(
                f,
                "Network interaction {} of future {} has the wrong kind",
                interaction_id, future_id
            ),
            InvariantError::UnexpectedInteractionId {
                future_id,
                expected,
                got,
            } => write!(
                f,
                "Future {} expected network interaction {}, got {}",
                future_id, expected, got
            ),
            InvariantError::MissingTransaction { future_id, hash } => {
                write!(f, "Future {} has no transaction {}", future_id, hash)
            }
            InvariantError::TerminalState {
                future_id,
                status,
                message,
            } => write!(
                f,
                "Cannot apply {} to future {}: it is already {}",
                message, future_id, status
            ),
            InvariantError::KindMismatch {
                future_id,
                future_type,
            } => write!(
                f,
                "Execution parameters of future {} do not fit type {}",
                future_id, future_type
            ),
            InvariantError::UnknownFuture { future_id } => {
                write!(f, "Future {} is not part of the plan", future_id)
            }
            InvariantError::MissingResult {
                future_id,
                dependency,
            } => write!(
                f,
                "Future {} needs the result of {}, which is not available",
                future_id, dependency
            ),
        }
    }
}

impl std::error::Error for InvariantError {}

/// In-flight transactions from an earlier run that block this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonceSyncError {
    /// The sender has transactions that are mined but not yet safe, or pending.
    WaitingForConfirmations {
        sender: Address,
        required_confirmations: u64,
    },
    /// The nonce of one of our interactions is taken by a pending transaction
    /// we do not know.
    WaitingForNonce {
        sender: Address,
        nonce: u64,
        future_id: FutureId,
    },
}

impl fmt::Display for NonceSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NonceSyncError::WaitingForConfirmations {
                sender,
                required_confirmations,
            } => write!(
                f,
                "Transactions sent from {} are not confirmed yet ({} confirmations required); wait for them and run again",
                sender, required_confirmations
            ),
            NonceSyncError::WaitingForNonce {
                sender,
                nonce,
                future_id,
            } => write!(
                f,
                "Nonce {} of {} (used by future {}) is taken by a pending transaction that was not sent by this deployment; wait for it and run again",
                nonce, sender, future_id
            ),
        }
    }
}

impl std::error::Error for NonceSyncError {}

/// Run-level problems found before execution starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentError {
    ChainIdChanged { recorded: u64, current: u64 },
    UnknownStrategy { name: String },
    NoAccounts,
}

impl fmt::Display for DeploymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentError::ChainIdChanged { recorded, current } => write!(
                f,
                "The deployment was started on chain {}, but the ledger reports chain {}",
                recorded, current
            ),
            DeploymentError::UnknownStrategy { name } => {
                write!(f, "Unknown execution strategy {}", name)
            }
            DeploymentError::NoAccounts => {
                write!(f, "No accounts and no default sender configured")
            }
        }
    }
}

impl std::error::Error for DeploymentError {}
