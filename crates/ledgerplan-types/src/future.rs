//! Futures: the planned operations of a deployment.
//!
//! A future is one node of the plan graph. The set of future kinds is closed
//! ([`Future`] is a plain enum), so every consumer (processor, reconciler,
//! batcher) is forced by the compiler to handle all of them.
//!
//! Futures reference each other in two ways: explicitly through
//! `dependencies`, and implicitly through arguments, addresses and values that
//! point at another future's result. [`Future::referenced_futures`] lists the
//! implicit ones; [`crate::plan::Module::add`] folds them into the dependency
//! set so the batcher only ever has to look at `dependencies`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::address::{Address, Bytes};

/// Stable identifier of a future, e.g. `"MyModule#Token"`.
pub type FutureId = String;

/// Type tag of a future (and of its execution state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FutureType {
    ContractDeployment,
    LibraryDeployment,
    ContractCall,
    StaticCall,
    ContractAt,
    ReadEventArgument,
    SendData,
}

impl FutureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FutureType::ContractDeployment => "CONTRACT_DEPLOYMENT",
            FutureType::LibraryDeployment => "LIBRARY_DEPLOYMENT",
            FutureType::ContractCall => "CONTRACT_CALL",
            FutureType::StaticCall => "STATIC_CALL",
            FutureType::ContractAt => "CONTRACT_AT",
            FutureType::ReadEventArgument => "READ_EVENT_ARGUMENT",
            FutureType::SendData => "SEND_DATA",
        }
    }

    /// Futures of these types produce a contract address other futures can target.
    pub fn is_contract(&self) -> bool {
        matches!(
            self,
            FutureType::ContractDeployment | FutureType::LibraryDeployment | FutureType::ContractAt
        )
    }
}

impl fmt::Display for FutureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled contract artifact. Bytecode stays a string because unlinked
/// bytecode contains library placeholders that are not valid hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub contract_name: String,
    pub bytecode: String,
    #[serde(default)]
    pub abi: Value,
    #[serde(default)]
    pub link_references: Value,
}

impl Artifact {
    pub fn new(contract_name: &str, bytecode: &str) -> Self {
        Self {
            contract_name: contract_name.to_string(),
            bytecode: bytecode.to_string(),
            abi: Value::Array(vec![]),
            link_references: Value::Object(Default::default()),
        }
    }
}

/// Where a future's artifact comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    /// Resolved by contract name through the artifact resolver.
    Named,
    /// Provided inline by the plan author.
    Embedded(Artifact),
}

/// A module parameter reference with an optional default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleParameter {
    pub module_id: String,
    pub name: String,
    pub default: Option<Value>,
}

impl ModuleParameter {
    pub fn new(module_id: &str, name: &str) -> Self {
        Self {
            module_id: module_id.to_string(),
            name: name.to_string(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// A constructor / function argument before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Argument {
    Literal(Value),
    Array(Vec<Argument>),
    Object(BTreeMap<String, Argument>),
    /// Result of another future: a contract address, a static call value or
    /// an event argument.
    Future(FutureId),
    /// `accounts[i]` at run time.
    Account(usize),
    Parameter(ModuleParameter),
}

impl Argument {
    fn collect_futures(&self, out: &mut BTreeSet<FutureId>) {
        match self {
            Argument::Future(id) => {
                out.insert(id.clone());
            }
            Argument::Array(items) => items.iter().for_each(|a| a.collect_futures(out)),
            Argument::Object(map) => map.values().for_each(|a| a.collect_futures(out)),
            Argument::Literal(_) | Argument::Account(_) | Argument::Parameter(_) => {}
        }
    }
}

impl From<Value> for Argument {
    fn from(v: Value) -> Self {
        Argument::Literal(v)
    }
}

/// An amount of native currency attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Literal(#[serde(with = "crate::amount")] u128),
    Parameter(ModuleParameter),
    /// The result of a static call future.
    StaticCall(FutureId),
}

impl Default for ValueSource {
    fn default() -> Self {
        ValueSource::Literal(0)
    }
}

/// Explicit sender of a transaction. Absent means the default sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRef {
    Account(usize),
    Address(Address),
}

/// An address that may only be known at run time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSource {
    Literal(Address),
    /// A contract future, a static call or a read-event-argument future.
    Future(FutureId),
    Account(usize),
    Parameter(ModuleParameter),
}

impl AddressSource {
    fn future(&self) -> Option<&FutureId> {
        match self {
            AddressSource::Future(id) => Some(id),
            _ => None,
        }
    }
}

/// Selects one return value / event argument by name or position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NameOrIndex {
    Index(usize),
    Name(String),
}

impl Default for NameOrIndex {
    fn default() -> Self {
        NameOrIndex::Index(0)
    }
}

impl fmt::Display for NameOrIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameOrIndex::Index(i) => write!(f, "{}", i),
            NameOrIndex::Name(n) => f.write_str(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDeploymentFuture {
    pub id: FutureId,
    pub module_id: String,
    pub contract_name: String,
    pub artifact: ArtifactSource,
    pub constructor_args: Vec<Argument>,
    /// Library name -> library (or contract) future to link against.
    pub libraries: BTreeMap<String, FutureId>,
    pub value: ValueSource,
    pub from: Option<SenderRef>,
    pub dependencies: BTreeSet<FutureId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryDeploymentFuture {
    pub id: FutureId,
    pub module_id: String,
    pub library_name: String,
    pub artifact: ArtifactSource,
    pub libraries: BTreeMap<String, FutureId>,
    pub from: Option<SenderRef>,
    pub dependencies: BTreeSet<FutureId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCallFuture {
    pub id: FutureId,
    pub module_id: String,
    /// Contract future whose address is called.
    pub contract: FutureId,
    pub function_name: String,
    pub args: Vec<Argument>,
    pub value: ValueSource,
    pub from: Option<SenderRef>,
    pub dependencies: BTreeSet<FutureId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCallFuture {
    pub id: FutureId,
    pub module_id: String,
    pub contract: FutureId,
    pub function_name: String,
    pub args: Vec<Argument>,
    pub name_or_index: NameOrIndex,
    pub from: Option<SenderRef>,
    pub dependencies: BTreeSet<FutureId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAtFuture {
    pub id: FutureId,
    pub module_id: String,
    pub contract_name: String,
    pub artifact: ArtifactSource,
    pub address: AddressSource,
    pub dependencies: BTreeSet<FutureId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadEventArgumentFuture {
    pub id: FutureId,
    pub module_id: String,
    /// Deployment or call whose receipt holds the event.
    pub future_to_read_from: FutureId,
    /// Contract future that emitted the event.
    pub emitter: FutureId,
    pub event_name: String,
    pub event_index: usize,
    pub name_or_index: NameOrIndex,
    pub dependencies: BTreeSet<FutureId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendDataFuture {
    pub id: FutureId,
    pub module_id: String,
    pub to: AddressSource,
    pub value: ValueSource,
    pub data: Option<Bytes>,
    pub from: Option<SenderRef>,
    pub dependencies: BTreeSet<FutureId>,
}

/// A planned operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Future {
    ContractDeployment(ContractDeploymentFuture),
    LibraryDeployment(LibraryDeploymentFuture),
    ContractCall(ContractCallFuture),
    StaticCall(StaticCallFuture),
    ContractAt(ContractAtFuture),
    ReadEventArgument(ReadEventArgumentFuture),
    SendData(SendDataFuture),
}

impl Future {
    pub fn id(&self) -> &str {
        match self {
            Future::ContractDeployment(f) => &f.id,
            Future::LibraryDeployment(f) => &f.id,
            Future::ContractCall(f) => &f.id,
            Future::StaticCall(f) => &f.id,
            Future::ContractAt(f) => &f.id,
            Future::ReadEventArgument(f) => &f.id,
            Future::SendData(f) => &f.id,
        }
    }

    pub fn module_id(&self) -> &str {
        match self {
            Future::ContractDeployment(f) => &f.module_id,
            Future::LibraryDeployment(f) => &f.module_id,
            Future::ContractCall(f) => &f.module_id,
            Future::StaticCall(f) => &f.module_id,
            Future::ContractAt(f) => &f.module_id,
            Future::ReadEventArgument(f) => &f.module_id,
            Future::SendData(f) => &f.module_id,
        }
    }

    pub fn future_type(&self) -> FutureType {
        match self {
            Future::ContractDeployment(_) => FutureType::ContractDeployment,
            Future::LibraryDeployment(_) => FutureType::LibraryDeployment,
            Future::ContractCall(_) => FutureType::ContractCall,
            Future::StaticCall(_) => FutureType::StaticCall,
            Future::ContractAt(_) => FutureType::ContractAt,
            Future::ReadEventArgument(_) => FutureType::ReadEventArgument,
            Future::SendData(_) => FutureType::SendData,
        }
    }

    pub fn dependencies(&self) -> &BTreeSet<FutureId> {
        match self {
            Future::ContractDeployment(f) => &f.dependencies,
            Future::LibraryDeployment(f) => &f.dependencies,
            Future::ContractCall(f) => &f.dependencies,
            Future::StaticCall(f) => &f.dependencies,
            Future::ContractAt(f) => &f.dependencies,
            Future::ReadEventArgument(f) => &f.dependencies,
            Future::SendData(f) => &f.dependencies,
        }
    }

    pub fn dependencies_mut(&mut self) -> &mut BTreeSet<FutureId> {
        match self {
            Future::ContractDeployment(f) => &mut f.dependencies,
            Future::LibraryDeployment(f) => &mut f.dependencies,
            Future::ContractCall(f) => &mut f.dependencies,
            Future::StaticCall(f) => &mut f.dependencies,
            Future::ContractAt(f) => &mut f.dependencies,
            Future::ReadEventArgument(f) => &mut f.dependencies,
            Future::SendData(f) => &mut f.dependencies,
        }
    }

    /// Explicit sender, for the futures that send transactions.
    pub fn sender(&self) -> Option<&SenderRef> {
        match self {
            Future::ContractDeployment(f) => f.from.as_ref(),
            Future::LibraryDeployment(f) => f.from.as_ref(),
            Future::ContractCall(f) => f.from.as_ref(),
            Future::StaticCall(f) => f.from.as_ref(),
            Future::SendData(f) => f.from.as_ref(),
            Future::ContractAt(_) | Future::ReadEventArgument(_) => None,
        }
    }

    /// Whether processing this future submits transactions.
    pub fn sends_transactions(&self) -> bool {
        matches!(
            self,
            Future::ContractDeployment(_)
                | Future::LibraryDeployment(_)
                | Future::ContractCall(_)
                | Future::SendData(_)
        )
    }

    /// Futures whose results this future consumes.
    pub fn referenced_futures(&self) -> BTreeSet<FutureId> {
        let mut out = BTreeSet::new();
        let value_ref = |v: &ValueSource, out: &mut BTreeSet<FutureId>| {
            if let ValueSource::StaticCall(id) = v {
                out.insert(id.clone());
            }
        };
        match self {
            Future::ContractDeployment(f) => {
                f.constructor_args.iter().for_each(|a| a.collect_futures(&mut out));
                out.extend(f.libraries.values().cloned());
                value_ref(&f.value, &mut out);
            }
            Future::LibraryDeployment(f) => {
                out.extend(f.libraries.values().cloned());
            }
            Future::ContractCall(f) => {
                out.insert(f.contract.clone());
                f.args.iter().for_each(|a| a.collect_futures(&mut out));
                value_ref(&f.value, &mut out);
            }
            Future::StaticCall(f) => {
                out.insert(f.contract.clone());
                f.args.iter().for_each(|a| a.collect_futures(&mut out));
            }
            Future::ContractAt(f) => {
                out.extend(f.address.future().cloned());
            }
            Future::ReadEventArgument(f) => {
                out.insert(f.future_to_read_from.clone());
                out.insert(f.emitter.clone());
            }
            Future::SendData(f) => {
                out.extend(f.to.future().cloned());
                value_ref(&f.value, &mut out);
            }
        }
        out
    }

    /// Add an explicit dependency.
    pub fn after(mut self, dependency: &str) -> Self {
        self.dependencies_mut().insert(dependency.to_string());
        self
    }
}

fn future_id(module_id: &str, local: &str) -> FutureId {
    format!("{}#{}", module_id, local)
}

impl ContractDeploymentFuture {
    /// Deployment of `contract_name` with id `<module>#<contract_name>`.
    pub fn new(module_id: &str, contract_name: &str) -> Self {
        Self {
            id: future_id(module_id, contract_name),
            module_id: module_id.to_string(),
            contract_name: contract_name.to_string(),
            artifact: ArtifactSource::Named,
            constructor_args: vec![],
            libraries: BTreeMap::new(),
            value: ValueSource::default(),
            from: None,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_args(mut self, args: Vec<Argument>) -> Self {
        self.constructor_args = args;
        self
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = ArtifactSource::Embedded(artifact);
        self
    }

    pub fn with_library(mut self, name: &str, library_future: &str) -> Self {
        self.libraries
            .insert(name.to_string(), library_future.to_string());
        self
    }

    pub fn with_value(mut self, value: ValueSource) -> Self {
        self.value = value;
        self
    }

    pub fn with_from(mut self, from: SenderRef) -> Self {
        self.from = Some(from);
        self
    }
}

impl LibraryDeploymentFuture {
    pub fn new(module_id: &str, library_name: &str) -> Self {
        Self {
            id: future_id(module_id, library_name),
            module_id: module_id.to_string(),
            library_name: library_name.to_string(),
            artifact: ArtifactSource::Named,
            libraries: BTreeMap::new(),
            from: None,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_from(mut self, from: SenderRef) -> Self {
        self.from = Some(from);
        self
    }
}

impl ContractCallFuture {
    /// Call of `function_name` on the contract future `contract`, with id
    /// `<module>#<contract local name>.<function>`.
    pub fn new(module_id: &str, contract: &str, function_name: &str) -> Self {
        let local = contract.rsplit('#').next().unwrap_or(contract);
        Self {
            id: future_id(module_id, &format!("{}.{}", local, function_name)),
            module_id: module_id.to_string(),
            contract: contract.to_string(),
            function_name: function_name.to_string(),
            args: vec![],
            value: ValueSource::default(),
            from: None,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_args(mut self, args: Vec<Argument>) -> Self {
        self.args = args;
        self
    }

    pub fn with_value(mut self, value: ValueSource) -> Self {
        self.value = value;
        self
    }

    pub fn with_from(mut self, from: SenderRef) -> Self {
        self.from = Some(from);
        self
    }
}

impl StaticCallFuture {
    pub fn new(module_id: &str, contract: &str, function_name: &str) -> Self {
        let local = contract.rsplit('#').next().unwrap_or(contract);
        Self {
            id: future_id(module_id, &format!("{}.{}", local, function_name)),
            module_id: module_id.to_string(),
            contract: contract.to_string(),
            function_name: function_name.to_string(),
            args: vec![],
            name_or_index: NameOrIndex::default(),
            from: None,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Argument>) -> Self {
        self.args = args;
        self
    }

    pub fn with_name_or_index(mut self, name_or_index: NameOrIndex) -> Self {
        self.name_or_index = name_or_index;
        self
    }
}

impl ContractAtFuture {
    pub fn new(module_id: &str, contract_name: &str, address: AddressSource) -> Self {
        Self {
            id: future_id(module_id, contract_name),
            module_id: module_id.to_string(),
            contract_name: contract_name.to_string(),
            artifact: ArtifactSource::Named,
            address,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }
}

impl ReadEventArgumentFuture {
    pub fn new(
        module_id: &str,
        future_to_read_from: &str,
        event_name: &str,
        name_or_index: NameOrIndex,
    ) -> Self {
        let local = future_to_read_from
            .rsplit('#')
            .next()
            .unwrap_or(future_to_read_from);
        Self {
            id: future_id(
                module_id,
                &format!("{}.{}.{}.0", local, event_name, name_or_index),
            ),
            module_id: module_id.to_string(),
            future_to_read_from: future_to_read_from.to_string(),
            emitter: future_to_read_from.to_string(),
            event_name: event_name.to_string(),
            event_index: 0,
            name_or_index,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_emitter(mut self, emitter: &str) -> Self {
        self.emitter = emitter.to_string();
        self
    }

    pub fn with_event_index(mut self, event_index: usize) -> Self {
        self.event_index = event_index;
        self
    }
}

impl SendDataFuture {
    pub fn new(module_id: &str, name: &str, to: AddressSource) -> Self {
        Self {
            id: future_id(module_id, name),
            module_id: module_id.to_string(),
            to,
            value: ValueSource::default(),
            data: None,
            from: None,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_value(mut self, value: ValueSource) -> Self {
        self.value = value;
        self
    }

    pub fn with_data(mut self, data: Bytes) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_from(mut self, from: SenderRef) -> Self {
        self.from = Some(from);
        self
    }
}

macro_rules! into_future {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Future {
                fn from(f: $ty) -> Self {
                    Future::$variant(f)
                }
            }
        )*
    };
}

into_future!(
    ContractDeploymentFuture => ContractDeployment,
    LibraryDeploymentFuture => LibraryDeployment,
    ContractCallFuture => ContractCall,
    StaticCallFuture => StaticCall,
    ContractAtFuture => ContractAt,
    ReadEventArgumentFuture => ReadEventArgument,
    SendDataFuture => SendData,
);
