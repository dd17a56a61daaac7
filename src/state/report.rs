use serde::Serialize;
use std::collections::BTreeMap;

use ledgerplan_types::{Address, ExecutionKind, ExecutionStatus, FutureId};

use super::DeploymentState;

/// One future that did not succeed, with its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FutureReport {
    pub future_id: FutureId,
    pub reason: String,
}

/// Summary of a deployment derived from its state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub chain_id: Option<u64>,
    pub started: Vec<FutureId>,
    pub successful: Vec<FutureId>,
    pub held: Vec<FutureReport>,
    pub timed_out: Vec<FutureReport>,
    pub failed: Vec<FutureReport>,
    /// Contract futures that have an address, with their contract name.
    pub contracts: BTreeMap<FutureId, (String, Address)>,
}

impl StatusReport {
    pub fn from_state(state: &DeploymentState) -> Self {
        let mut report = StatusReport {
            chain_id: state.chain_id,
            ..Default::default()
        };

        for (id, exec) in &state.execution_states {
            let reason = || FutureReport {
                future_id: id.clone(),
                reason: exec
                    .result
                    .as_ref()
                    .and_then(|r| r.failure_reason())
                    .unwrap_or_else(|| exec.status.to_string()),
            };
            match exec.status {
                ExecutionStatus::Started => report.started.push(id.clone()),
                ExecutionStatus::Success => report.successful.push(id.clone()),
                ExecutionStatus::Hold => report.held.push(reason()),
                ExecutionStatus::Timeout => report.timed_out.push(reason()),
                ExecutionStatus::Failed => report.failed.push(reason()),
            }

            let address = exec.success_result().and_then(|r| r.address());
            let name = match &exec.kind {
                ExecutionKind::Deployment(d) => Some(d.contract_name.clone()),
                ExecutionKind::ContractAt(c) => Some(c.contract_name.clone()),
                _ => None,
            };
            if let (Some(address), Some(name)) = (address, name) {
                report.contracts.insert(id.clone(), (name, address));
            }
        }
        report
    }

    pub fn is_complete(&self) -> bool {
        self.started.is_empty()
            && self.held.is_empty()
            && self.timed_out.is_empty()
            && self.failed.is_empty()
    }
}
