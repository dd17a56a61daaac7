//! Resolution of future references against the deployment state.
//!
//! Futures are authored with symbolic references (other futures, accounts,
//! module parameters). Before a future runs, and again when a later run
//! reconciles it, those references are turned into concrete values here.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::BTreeMap;

use ledgerplan_types::{
    Address, AddressSource, Argument, Artifact, ArtifactSource, CallExecution, ContractAtExecution,
    DeploymentExecution, ExecutionKind, Future, ModuleParameter, NetworkInteraction, Plan,
    PlanError, ReadEventArgumentExecution, SendDataExecution, SenderRef, StaticCallExecution,
    SuccessResult, TxHash, ValueSource,
};

use crate::codec::ArtifactResolver;
use crate::error::InvariantError;
use crate::state::DeploymentState;

/// Module id -> parameter name -> value.
pub type ModuleParameters = BTreeMap<String, BTreeMap<String, Value>>;

/// Parameters of a future with every reference resolved.
#[derive(Debug, Clone)]
pub struct ResolvedFuture {
    pub kind: ExecutionKind,
    /// Artifact introduced by this future, stored under its own id.
    pub artifact: Option<Artifact>,
}

/// Everything needed to resolve references.
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    pub state: &'a DeploymentState,
    pub accounts: &'a [Address],
    pub default_sender: Address,
    pub parameters: &'a ModuleParameters,
}

fn lookup_parameter(parameters: &ModuleParameters, p: &ModuleParameter) -> Option<Value> {
    parameters
        .get(&p.module_id)
        .and_then(|m| m.get(&p.name))
        .cloned()
        .or_else(|| p.default.clone())
}

/// Amount out of a JSON number or a decimal / `0x` string.
pub fn value_to_amount(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x") {
                Some(hex) => u128::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}

fn value_to_address(value: &Value) -> Option<Address> {
    value.as_str().and_then(|s| Address::from_hex(s).ok())
}

impl<'a> ResolveContext<'a> {
    pub fn parameter(&self, future_id: &str, p: &ModuleParameter) -> Result<Value> {
        lookup_parameter(self.parameters, p).ok_or_else(|| {
            anyhow!(PlanError::MissingParameter {
                future_id: future_id.to_string(),
                module_id: p.module_id.clone(),
                name: p.name.clone(),
            })
        })
    }

    pub fn account(&self, future_id: &str, index: usize) -> Result<Address> {
        self.accounts.get(index).copied().ok_or_else(|| {
            anyhow!(PlanError::InvalidAccount {
                future_id: future_id.to_string(),
                index,
            })
        })
    }

    fn dependency_result(&self, future_id: &str, dependency: &str) -> Result<&'a SuccessResult> {
        self.state
            .get(dependency)
            .and_then(|s| s.success_result())
            .ok_or_else(|| {
                anyhow!(InvariantError::MissingResult {
                    future_id: future_id.to_string(),
                    dependency: dependency.to_string(),
                })
            })
    }

    /// Address produced by a contract future (deployment or contract-at).
    pub fn contract_address(&self, future_id: &str, contract: &str) -> Result<Address> {
        self.dependency_result(future_id, contract)?
            .address()
            .ok_or_else(|| anyhow!("Future {} does not produce a contract address", contract))
    }

    /// JSON value of a future's result, as consumed by arguments.
    pub fn future_value(&self, future_id: &str, dependency: &str) -> Result<Value> {
        let result = self.dependency_result(future_id, dependency)?;
        if let Some(address) = result.address() {
            return Ok(Value::String(address.to_hex()));
        }
        result
            .value()
            .cloned()
            .ok_or_else(|| anyhow!("Future {} does not produce a value", dependency))
    }

    pub fn argument(&self, future_id: &str, argument: &Argument) -> Result<Value> {
        match argument {
            Argument::Literal(v) => Ok(v.clone()),
            Argument::Array(items) => Ok(Value::Array(self.arguments(future_id, items)?)),
            Argument::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, item) in map {
                    out.insert(key.clone(), self.argument(future_id, item)?);
                }
                Ok(Value::Object(out))
            }
            Argument::Future(id) => self.future_value(future_id, id),
            Argument::Account(index) => {
                Ok(Value::String(self.account(future_id, *index)?.to_hex()))
            }
            Argument::Parameter(p) => self.parameter(future_id, p),
        }
    }

    pub fn arguments(&self, future_id: &str, args: &[Argument]) -> Result<Vec<Value>> {
        args.iter().map(|a| self.argument(future_id, a)).collect()
    }

    pub fn value(&self, future_id: &str, value: &ValueSource) -> Result<u128> {
        let (raw, origin) = match value {
            ValueSource::Literal(amount) => return Ok(*amount),
            ValueSource::Parameter(p) => (self.parameter(future_id, p)?, p.name.clone()),
            ValueSource::StaticCall(id) => (self.future_value(future_id, id)?, id.clone()),
        };
        value_to_amount(&raw)
            .ok_or_else(|| anyhow!("Value {} of future {} is not an amount", origin, future_id))
    }

    pub fn sender(&self, future_id: &str, from: Option<&SenderRef>) -> Result<Address> {
        match from {
            None => Ok(self.default_sender),
            Some(SenderRef::Address(address)) => Ok(*address),
            Some(SenderRef::Account(index)) => self.account(future_id, *index),
        }
    }

    pub fn address(&self, future_id: &str, source: &AddressSource) -> Result<Address> {
        match source {
            AddressSource::Literal(address) => Ok(*address),
            AddressSource::Account(index) => self.account(future_id, *index),
            AddressSource::Future(id) => {
                let result = self.dependency_result(future_id, id)?;
                result
                    .address()
                    .or_else(|| result.value().and_then(value_to_address))
                    .ok_or_else(|| anyhow!("Future {} does not produce an address", id))
            }
            AddressSource::Parameter(p) => {
                let raw = self.parameter(future_id, p)?;
                value_to_address(&raw).ok_or_else(|| {
                    anyhow!(
                        "Parameter {} of future {} is not an address",
                        p.name,
                        future_id
                    )
                })
            }
        }
    }

    /// Hash of the confirmed transaction of a deployment or call.
    pub fn transaction_to_read_from(&self, future_id: &str, source: &str) -> Result<TxHash> {
        let state = self.state.get(source).ok_or_else(|| {
            anyhow!(InvariantError::MissingResult {
                future_id: future_id.to_string(),
                dependency: source.to_string(),
            })
        })?;
        state
            .network_interactions
            .iter()
            .rev()
            .find_map(|i| match i {
                NetworkInteraction::Onchain(o) => o.confirmed_transaction().map(|t| t.hash),
                NetworkInteraction::StaticCall(_) => None,
            })
            .ok_or_else(|| anyhow!("Future {} has no confirmed transaction", source))
    }

    /// Resolve every reference of `future`.
    pub fn resolve_future(
        &self,
        future: &Future,
        resolver: &dyn ArtifactResolver,
    ) -> Result<ResolvedFuture> {
        let id = future.id();
        let resolved = match future {
            Future::ContractDeployment(f) => {
                let artifact = load_artifact(&f.contract_name, &f.artifact, resolver)?;
                ResolvedFuture {
                    kind: ExecutionKind::Deployment(DeploymentExecution {
                        contract_name: f.contract_name.clone(),
                        artifact_id: f.id.clone(),
                        constructor_args: self.arguments(id, &f.constructor_args)?,
                        libraries: self.libraries(id, &f.libraries)?,
                        value: self.value(id, &f.value)?,
                        from: self.sender(id, f.from.as_ref())?,
                    }),
                    artifact: Some(artifact),
                }
            }
            Future::LibraryDeployment(f) => {
                let artifact = load_artifact(&f.library_name, &f.artifact, resolver)?;
                ResolvedFuture {
                    kind: ExecutionKind::Deployment(DeploymentExecution {
                        contract_name: f.library_name.clone(),
                        artifact_id: f.id.clone(),
                        constructor_args: vec![],
                        libraries: self.libraries(id, &f.libraries)?,
                        value: 0,
                        from: self.sender(id, f.from.as_ref())?,
                    }),
                    artifact: Some(artifact),
                }
            }
            Future::ContractCall(f) => ResolvedFuture {
                kind: ExecutionKind::Call(CallExecution {
                    contract_address: self.contract_address(id, &f.contract)?,
                    artifact_id: f.contract.clone(),
                    function_name: f.function_name.clone(),
                    args: self.arguments(id, &f.args)?,
                    value: self.value(id, &f.value)?,
                    from: self.sender(id, f.from.as_ref())?,
                }),
                artifact: None,
            },
            Future::StaticCall(f) => ResolvedFuture {
                kind: ExecutionKind::StaticCall(StaticCallExecution {
                    contract_address: self.contract_address(id, &f.contract)?,
                    artifact_id: f.contract.clone(),
                    function_name: f.function_name.clone(),
                    args: self.arguments(id, &f.args)?,
                    name_or_index: f.name_or_index.clone(),
                    from: self.sender(id, f.from.as_ref())?,
                }),
                artifact: None,
            },
            Future::ContractAt(f) => {
                let artifact = load_artifact(&f.contract_name, &f.artifact, resolver)?;
                ResolvedFuture {
                    kind: ExecutionKind::ContractAt(ContractAtExecution {
                        contract_name: f.contract_name.clone(),
                        artifact_id: f.id.clone(),
                        contract_address: self.address(id, &f.address)?,
                    }),
                    artifact: Some(artifact),
                }
            }
            Future::ReadEventArgument(f) => ResolvedFuture {
                kind: ExecutionKind::ReadEventArgument(ReadEventArgumentExecution {
                    artifact_id: f.emitter.clone(),
                    event_name: f.event_name.clone(),
                    event_index: f.event_index,
                    name_or_index: f.name_or_index.clone(),
                    emitter_address: self.contract_address(id, &f.emitter)?,
                    tx_to_read_from: self.transaction_to_read_from(id, &f.future_to_read_from)?,
                }),
                artifact: None,
            },
            Future::SendData(f) => ResolvedFuture {
                kind: ExecutionKind::SendData(SendDataExecution {
                    to: self.address(id, &f.to)?,
                    data: f.data.clone(),
                    value: self.value(id, &f.value)?,
                    from: self.sender(id, f.from.as_ref())?,
                }),
                artifact: None,
            },
        };
        Ok(resolved)
    }

    fn libraries(
        &self,
        future_id: &str,
        libraries: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, Address>> {
        libraries
            .iter()
            .map(|(name, lib)| Ok((name.clone(), self.contract_address(future_id, lib)?)))
            .collect()
    }
}

/// The artifact a future declares, embedded or through the resolver.
pub fn load_artifact(
    contract_name: &str,
    source: &ArtifactSource,
    resolver: &dyn ArtifactResolver,
) -> Result<Artifact> {
    match source {
        ArtifactSource::Embedded(artifact) => Ok(artifact.clone()),
        ArtifactSource::Named => resolver.load_artifact(contract_name),
    }
}

#[derive(Default)]
struct InputRefs<'a> {
    parameters: Vec<&'a ModuleParameter>,
    accounts: Vec<usize>,
}

impl<'a> InputRefs<'a> {
    fn argument(&mut self, argument: &'a Argument) {
        match argument {
            Argument::Parameter(p) => self.parameters.push(p),
            Argument::Account(i) => self.accounts.push(*i),
            Argument::Array(items) => items.iter().for_each(|a| self.argument(a)),
            Argument::Object(map) => map.values().for_each(|a| self.argument(a)),
            Argument::Literal(_) | Argument::Future(_) => {}
        }
    }

    fn value(&mut self, value: &'a ValueSource) {
        if let ValueSource::Parameter(p) = value {
            self.parameters.push(p);
        }
    }

    fn address(&mut self, address: &'a AddressSource) {
        match address {
            AddressSource::Parameter(p) => self.parameters.push(p),
            AddressSource::Account(i) => self.accounts.push(*i),
            AddressSource::Literal(_) | AddressSource::Future(_) => {}
        }
    }

    fn sender(&mut self, from: Option<&'a SenderRef>) {
        if let Some(SenderRef::Account(i)) = from {
            self.accounts.push(*i);
        }
    }
}

/// Check the inputs a plan needs from outside: module parameters, accounts
/// and named artifacts. Every problem is reported, not just the first.
pub fn validate_inputs(
    plan: &Plan,
    parameters: &ModuleParameters,
    accounts: &[Address],
    resolver: &dyn ArtifactResolver,
) -> Vec<PlanError> {
    let mut errors = Vec::new();

    for future in plan.futures() {
        let id = future.id();
        let mut refs = InputRefs::default();
        let mut named_artifact = None;

        match future {
            Future::ContractDeployment(f) => {
                f.constructor_args.iter().for_each(|a| refs.argument(a));
                refs.value(&f.value);
                refs.sender(f.from.as_ref());
                named_artifact = Some((&f.contract_name, &f.artifact));
            }
            Future::LibraryDeployment(f) => {
                refs.sender(f.from.as_ref());
                named_artifact = Some((&f.library_name, &f.artifact));
            }
            Future::ContractCall(f) => {
                f.args.iter().for_each(|a| refs.argument(a));
                refs.value(&f.value);
                refs.sender(f.from.as_ref());
            }
            Future::StaticCall(f) => {
                f.args.iter().for_each(|a| refs.argument(a));
                refs.sender(f.from.as_ref());
            }
            Future::ContractAt(f) => {
                refs.address(&f.address);
                named_artifact = Some((&f.contract_name, &f.artifact));
            }
            Future::ReadEventArgument(_) => {}
            Future::SendData(f) => {
                refs.address(&f.to);
                refs.value(&f.value);
                refs.sender(f.from.as_ref());
            }
        }

        for p in refs.parameters {
            if lookup_parameter(parameters, p).is_none() {
                errors.push(PlanError::MissingParameter {
                    future_id: id.to_string(),
                    module_id: p.module_id.clone(),
                    name: p.name.clone(),
                });
            }
        }
        for index in refs.accounts {
            if index >= accounts.len() {
                errors.push(PlanError::InvalidAccount {
                    future_id: id.to_string(),
                    index,
                });
            }
        }
        if let Some((name, ArtifactSource::Named)) = named_artifact {
            if resolver.load_artifact(name).is_err() {
                errors.push(PlanError::MissingArtifact {
                    future_id: id.to_string(),
                    contract_name: name.clone(),
                });
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StaticArtifactResolver;
    use ledgerplan_types::{
        ContractDeploymentFuture, ExecutionResult, ExecutionState, ExecutionStatus, FutureType,
        Module, SendDataFuture,
    };
    use serde_json::json;
    use std::collections::BTreeSet;

    fn addr(n: u8) -> Address {
        Address::new([n; 20])
    }

    fn deployed(id: &str, address: Address) -> ExecutionState {
        ExecutionState {
            id: id.into(),
            future_type: FutureType::ContractAt,
            status: ExecutionStatus::Success,
            dependencies: BTreeSet::new(),
            strategy: "basic".into(),
            kind: ExecutionKind::ContractAt(ContractAtExecution {
                contract_name: "Lib".into(),
                artifact_id: id.into(),
                contract_address: address,
            }),
            network_interactions: vec![],
            result: Some(ExecutionResult::Success {
                result: SuccessResult::ContractAt { address },
            }),
        }
    }

    #[test]
    fn test_arguments_resolve_nested_references() {
        let mut state = DeploymentState::new();
        state
            .execution_states
            .insert("Mod#Lib".into(), deployed("Mod#Lib", addr(9)));
        let mut parameters = ModuleParameters::new();
        parameters
            .entry("Mod".into())
            .or_default()
            .insert("supply".into(), json!(1000));
        let accounts = [addr(1), addr(2)];
        let ctx = ResolveContext {
            state: &state,
            accounts: &accounts,
            default_sender: addr(1),
            parameters: &parameters,
        };

        let arg = Argument::Array(vec![
            Argument::Future("Mod#Lib".into()),
            Argument::Account(1),
            Argument::Parameter(ModuleParameter::new("Mod", "supply")),
            Argument::Parameter(
                ModuleParameter::new("Mod", "name").with_default(json!("token")),
            ),
        ]);
        let value = ctx.argument("Mod#Foo", &arg).unwrap();
        assert_eq!(
            value,
            json!([addr(9).to_hex(), addr(2).to_hex(), 1000, "token"])
        );

        let missing = ctx
            .argument("Mod#Foo", &Argument::Future("Mod#Nope".into()))
            .unwrap_err();
        assert!(missing.downcast_ref::<InvariantError>().is_some());
    }

    #[test]
    fn test_value_parses_parameter_strings() {
        assert_eq!(value_to_amount(&json!("0x10")), Some(16));
        assert_eq!(
            value_to_amount(&json!("340282366920938463463374607431768211455")),
            Some(u128::MAX)
        );
        assert_eq!(value_to_amount(&json!(true)), None);
    }

    #[test]
    fn test_validate_inputs_collects_all_problems() {
        let root = Module::new("Mod")
            .with(
                ContractDeploymentFuture::new("Mod", "Foo")
                    .with_args(vec![Argument::Parameter(ModuleParameter::new("Mod", "x"))])
                    .with_from(SenderRef::Account(5)),
            )
            .with(
                SendDataFuture::new("Mod", "fund", AddressSource::Account(0))
                    .with_value(ValueSource::Literal(1)),
            );
        let plan = Plan::new(root);
        let errors = validate_inputs(
            &plan,
            &ModuleParameters::new(),
            &[addr(1)],
            &StaticArtifactResolver::new(),
        );
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&PlanError::MissingArtifact {
            future_id: "Mod#Foo".into(),
            contract_name: "Foo".into(),
        }));
        assert!(errors.contains(&PlanError::InvalidAccount {
            future_id: "Mod#Foo".into(),
            index: 5,
        }));
    }
}
