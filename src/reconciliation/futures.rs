use std::collections::BTreeMap;

use ledgerplan_types::{
    Address, Artifact, Bytes, CallExecution, ContractAtExecution, DeploymentExecution,
    ExecutionKind, ExecutionState, Future, ReadEventArgumentExecution, SendDataExecution,
    StaticCallExecution,
};

use super::utils::{bytecodes_equal, compare, compare_from};
use super::ReconcileContext;

/// Compare the recorded parameters of `exec` with `future` resolved against
/// the current state. Every mismatch is reported.
pub fn reconcile_fields(
    future: &Future,
    exec: &ExecutionState,
    ctx: &ReconcileContext<'_>,
) -> Vec<String> {
    let resolved = match ctx.resolve.resolve_future(future, ctx.artifacts) {
        Ok(resolved) => resolved,
        Err(e) => return vec![format!("Could not resolve the future: {:#}", e)],
    };
    let explicit_from = future.sender().is_some();
    let accounts = ctx.resolve.accounts;

    let mut failures = Vec::new();
    match (&exec.kind, &resolved.kind) {
        (ExecutionKind::Deployment(old), ExecutionKind::Deployment(new)) => {
            failures.extend(deployment(old, new, resolved.artifact.as_ref(), ctx));
            failures.extend(compare_from(explicit_from, &old.from, &new.from, accounts));
        }
        (ExecutionKind::Call(old), ExecutionKind::Call(new)) => {
            failures.extend(call(old, new));
            failures.extend(compare_from(explicit_from, &old.from, &new.from, accounts));
        }
        (ExecutionKind::StaticCall(old), ExecutionKind::StaticCall(new)) => {
            failures.extend(static_call(old, new));
            failures.extend(compare_from(explicit_from, &old.from, &new.from, accounts));
        }
        (ExecutionKind::ContractAt(old), ExecutionKind::ContractAt(new)) => {
            failures.extend(contract_at(old, new));
        }
        (ExecutionKind::ReadEventArgument(old), ExecutionKind::ReadEventArgument(new)) => {
            failures.extend(read_event_argument(old, new));
        }
        (ExecutionKind::SendData(old), ExecutionKind::SendData(new)) => {
            failures.extend(send_data(old, new));
            failures.extend(compare_from(explicit_from, &old.from, &new.from, accounts));
        }
        _ => failures.push(format!(
            "Execution parameters of future {} do not match its type {}",
            exec.id, exec.future_type
        )),
    }

    failures.extend(
        (exec.strategy != ctx.strategy)
            .then(|| format!("Strategy changed from {} to {}", exec.strategy, ctx.strategy)),
    );
    failures
}

fn deployment(
    old: &DeploymentExecution,
    new: &DeploymentExecution,
    artifact: Option<&Artifact>,
    ctx: &ReconcileContext<'_>,
) -> Vec<String> {
    let mut failures = Vec::new();
    failures.extend(compare(
        "Contract name",
        &old.contract_name,
        &new.contract_name,
    ));

    match (ctx.loader.load_artifact(&old.artifact_id), artifact) {
        (Ok(stored), Some(current)) => {
            if !bytecodes_equal(&stored.bytecode, &current.bytecode) {
                failures.push("Artifact bytecodes have been changed".to_string());
            }
        }
        (Err(e), _) => failures.push(format!("Could not load the stored artifact: {}", e)),
        (_, None) => {}
    }

    failures.extend(libraries(&old.libraries, &new.libraries));
    if old.constructor_args != new.constructor_args {
        failures.push("Constructor args have been changed".to_string());
    }
    failures.extend(compare("Value", &old.value, &new.value));
    failures
}

fn libraries(old: &BTreeMap<String, Address>, new: &BTreeMap<String, Address>) -> Vec<String> {
    let mut failures = Vec::new();
    for (name, address) in new {
        match old.get(name) {
            Some(previous) if previous != address => failures.push(format!(
                "Library {}'s address has been changed from {} to {}",
                name, previous, address
            )),
            Some(_) => {}
            None => failures.push(format!("Library {} has been added", name)),
        }
    }
    failures.extend(
        old.keys()
            .filter(|name| !new.contains_key(*name))
            .map(|name| format!("Library {} has been removed", name)),
    );
    failures
}

fn call(old: &CallExecution, new: &CallExecution) -> Vec<String> {
    let mut failures = Vec::new();
    failures.extend(compare(
        "Contract address",
        &old.contract_address,
        &new.contract_address,
    ));
    failures.extend(compare(
        "Function name",
        &old.function_name,
        &new.function_name,
    ));
    if old.args != new.args {
        failures.push("Argument list has been changed".to_string());
    }
    failures.extend(compare("Value", &old.value, &new.value));
    failures
}

fn static_call(old: &StaticCallExecution, new: &StaticCallExecution) -> Vec<String> {
    let mut failures = Vec::new();
    failures.extend(compare(
        "Contract address",
        &old.contract_address,
        &new.contract_address,
    ));
    failures.extend(compare(
        "Function name",
        &old.function_name,
        &new.function_name,
    ));
    if old.args != new.args {
        failures.push("Argument list has been changed".to_string());
    }
    failures.extend(compare(
        "Argument name or index",
        &old.name_or_index,
        &new.name_or_index,
    ));
    failures
}

fn contract_at(old: &ContractAtExecution, new: &ContractAtExecution) -> Vec<String> {
    let mut failures = Vec::new();
    failures.extend(compare(
        "Contract name",
        &old.contract_name,
        &new.contract_name,
    ));
    failures.extend(compare(
        "Address",
        &old.contract_address,
        &new.contract_address,
    ));
    failures
}

fn read_event_argument(
    old: &ReadEventArgumentExecution,
    new: &ReadEventArgumentExecution,
) -> Vec<String> {
    let mut failures = Vec::new();
    failures.extend(compare(
        "Emitter",
        &old.emitter_address,
        &new.emitter_address,
    ));
    failures.extend(compare("Event name", &old.event_name, &new.event_name));
    failures.extend(compare("Event index", &old.event_index, &new.event_index));
    failures.extend(compare(
        "Argument name or index",
        &old.name_or_index,
        &new.name_or_index,
    ));
    failures
}

fn data_hex(data: &Option<Bytes>) -> String {
    data.as_ref().map(Bytes::to_hex).unwrap_or_else(|| "0x".to_string())
}

fn send_data(old: &SendDataExecution, new: &SendDataExecution) -> Vec<String> {
    let mut failures = Vec::new();
    failures.extend(compare("Address \"to\"", &old.to, &new.to));
    failures.extend(compare("Data", &data_hex(&old.data), &data_hex(&new.data)));
    failures.extend(compare("Value", &old.value, &new.value));
    failures
}
