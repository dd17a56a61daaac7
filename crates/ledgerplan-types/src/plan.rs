//! Modules and the plan graph.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::future::{Future, FutureId};

/// Structural problems of a plan. A valid plan never produces these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    DuplicateFutureId {
        future_id: FutureId,
    },
    UnknownDependency {
        future_id: FutureId,
        dependency: FutureId,
    },
    /// Dependencies form a cycle; lists every future that could not be scheduled.
    Cycle {
        futures: Vec<FutureId>,
    },
    /// A module parameter without a default was not provided.
    MissingParameter {
        future_id: FutureId,
        module_id: String,
        name: String,
    },
    /// `accounts[index]` does not exist.
    InvalidAccount {
        future_id: FutureId,
        index: usize,
    },
    /// The artifact resolver does not know the contract.
    MissingArtifact {
        future_id: FutureId,
        contract_name: String,
    },
}

impl PlanError {
    /// The future the error is reported against.
    pub fn future_id(&self) -> &str {
        match self {
            PlanError::DuplicateFutureId { future_id } => future_id,
            PlanError::UnknownDependency { future_id, .. } => future_id,
            PlanError::Cycle { futures } => futures.first().map(String::as_str).unwrap_or(""),
            PlanError::MissingParameter { future_id, .. }
            | PlanError::InvalidAccount { future_id, .. }
            | PlanError::MissingArtifact { future_id, .. } => future_id,
        }
    }
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::DuplicateFutureId { future_id } => {
                write!(f, "Duplicate future id {}", future_id)
            }
            PlanError::UnknownDependency {
                future_id,
                dependency,
            } => write!(
                f,
                "Future {} depends on {}, which is not part of the plan",
                future_id, dependency
            ),
            PlanError::Cycle { futures } => {
                write!(f, "Dependency cycle between futures: {}", futures.join(", "))
            }
            PlanError::MissingParameter {
                future_id,
                module_id,
                name,
            } => write!(
                f,
                "Future {} uses module parameter {}.{}, which was not provided and has no default",
                future_id, module_id, name
            ),
            PlanError::InvalidAccount { future_id, index } => write!(
                f,
                "Future {} uses account {}, which does not exist",
                future_id, index
            ),
            PlanError::MissingArtifact {
                future_id,
                contract_name,
            } => write!(
                f,
                "Future {} needs the artifact of {}, which could not be loaded",
                future_id, contract_name
            ),
        }
    }
}

impl std::error::Error for PlanError {}

/// A named collection of futures and submodules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    futures: Vec<Future>,
    submodules: Vec<Module>,
}

impl Module {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            futures: Vec::new(),
            submodules: Vec::new(),
        }
    }

    /// Add a future. Futures it references are added to its dependencies.
    pub fn add(&mut self, future: impl Into<Future>) -> FutureId {
        let mut future = future.into();
        let implicit = future.referenced_futures();
        future.dependencies_mut().extend(implicit);
        let id = future.id().to_string();
        self.futures.push(future);
        id
    }

    /// Builder form of [`Module::add`].
    pub fn with(mut self, future: impl Into<Future>) -> Self {
        self.add(future);
        self
    }

    pub fn add_submodule(&mut self, module: Module) {
        self.submodules.push(module);
    }

    pub fn with_submodule(mut self, module: Module) -> Self {
        self.add_submodule(module);
        self
    }

    /// Futures declared directly in this module.
    pub fn futures(&self) -> &[Future] {
        &self.futures
    }

    pub fn submodules(&self) -> &[Module] {
        &self.submodules
    }

    /// All futures of this module and its submodules, submodules first.
    pub fn all_futures(&self) -> Vec<&Future> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Future>) {
        for sub in &self.submodules {
            sub.collect(out);
        }
        out.extend(self.futures.iter());
    }

    /// Ids of every future in this module, used to depend on a whole module.
    pub fn future_ids(&self) -> BTreeSet<FutureId> {
        self.all_futures()
            .into_iter()
            .map(|f| f.id().to_string())
            .collect()
    }
}

/// The plan graph: a root module and an index over all of its futures.
#[derive(Debug, Clone)]
pub struct Plan {
    root: Module,
    index: BTreeMap<FutureId, Future>,
    duplicates: Vec<FutureId>,
}

impl Plan {
    pub fn new(root: Module) -> Self {
        let mut index = BTreeMap::new();
        let mut duplicates = Vec::new();
        for future in root.all_futures() {
            let id = future.id().to_string();
            if index.insert(id.clone(), future.clone()).is_some() {
                duplicates.push(id);
            }
        }
        Self {
            root,
            index,
            duplicates,
        }
    }

    pub fn root(&self) -> &Module {
        &self.root
    }

    pub fn id(&self) -> &str {
        &self.root.id
    }

    pub fn get(&self, id: &str) -> Option<&Future> {
        self.index.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All futures, ordered by id.
    pub fn futures(&self) -> impl Iterator<Item = &Future> {
        self.index.values()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Structural checks that do not need execution state: duplicate ids and
    /// dependencies on futures outside the plan. Cycles are found by the batcher.
    pub fn validate(&self) -> Vec<PlanError> {
        let mut errors: Vec<PlanError> = self
            .duplicates
            .iter()
            .map(|id| PlanError::DuplicateFutureId {
                future_id: id.clone(),
            })
            .collect();

        for future in self.index.values() {
            for dependency in future.dependencies() {
                if !self.index.contains_key(dependency) {
                    errors.push(PlanError::UnknownDependency {
                        future_id: future.id().to_string(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        errors
    }
}
