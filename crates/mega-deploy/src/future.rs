//! Futures: the declared units of on-chain work.
//!
//! Futures are consumed read-only. Their arguments are resolved once, when the execution state is
//! initialized, and the resolved values are snapshotted there, so a run can be resumed without the
//! original future graph being identical.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::FutureType;

/// Errors of an invalid future graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FutureError {
    /// Two futures share an id.
    #[error("duplicate future id {0}")]
    DuplicateId(String),
    /// A future depends on a future that is not part of the graph.
    #[error("future {future} depends on unknown future {dependency}")]
    UnknownDependency {
        /// The depending future.
        future: String,
        /// The missing dependency.
        dependency: String,
    },
    /// The dependency graph has a cycle through these futures.
    #[error("dependency cycle between futures {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// A value passed to a future.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Argument {
    /// A literal value, ABI-coerced against the parameter type.
    Literal(String),
    /// The deployed address or read value of another future.
    Future(String),
    /// The account at this index.
    Account(usize),
}

impl Argument {
    /// Shorthand for a literal.
    pub fn literal(value: impl ToString) -> Self {
        Self::Literal(value.to_string())
    }

    /// Shorthand for a future reference.
    pub fn future(id: impl Into<String>) -> Self {
        Self::Future(id.into())
    }

    /// Returns the referenced future id.
    pub fn future_id(&self) -> Option<&str> {
        match self {
            Self::Future(id) => Some(id),
            _ => None,
        }
    }
}

/// Selects a value by name or position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NameOrIndex {
    /// Positional selector.
    Index(usize),
    /// Named selector.
    Name(String),
}

impl core::fmt::Display for NameOrIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Index(index) => write!(f, "#{index}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// What a future does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FutureKind {
    /// Deploys a contract.
    #[serde(rename_all = "camelCase")]
    ContractDeployment {
        /// Artifact to deploy.
        artifact_id: String,
        /// Constructor arguments.
        #[serde(default)]
        constructor_args: Vec<Argument>,
        /// Libraries to link, by name.
        #[serde(default)]
        libraries: BTreeMap<String, Argument>,
        /// Value sent to the constructor.
        #[serde(default)]
        value: U256,
        /// Sender, account 0 when absent.
        #[serde(default)]
        from: Option<Argument>,
    },
    /// Deploys a library.
    #[serde(rename_all = "camelCase")]
    LibraryDeployment {
        /// Artifact to deploy.
        artifact_id: String,
        /// Libraries to link, by name.
        #[serde(default)]
        libraries: BTreeMap<String, Argument>,
        /// Sender, account 0 when absent.
        #[serde(default)]
        from: Option<Argument>,
    },
    /// Calls a contract function in a transaction.
    #[serde(rename_all = "camelCase")]
    ContractCall {
        /// Callee address.
        contract: Argument,
        /// Artifact providing the ABI.
        artifact_id: String,
        /// Function name or signature.
        function_name: String,
        /// Arguments.
        #[serde(default)]
        args: Vec<Argument>,
        /// Value sent with the call.
        #[serde(default)]
        value: U256,
        /// Sender, account 0 when absent.
        #[serde(default)]
        from: Option<Argument>,
    },
    /// Calls a contract function read-only.
    #[serde(rename_all = "camelCase")]
    StaticCall {
        /// Callee address.
        contract: Argument,
        /// Artifact providing the ABI.
        artifact_id: String,
        /// Function name or signature.
        function_name: String,
        /// Arguments.
        #[serde(default)]
        args: Vec<Argument>,
        /// Which return value to keep, the first one when absent.
        #[serde(default)]
        name_or_index: Option<NameOrIndex>,
        /// Caller, account 0 when absent.
        #[serde(default)]
        from: Option<Argument>,
    },
    /// Sends a raw transaction.
    #[serde(rename_all = "camelCase")]
    SendData {
        /// Recipient.
        to: Argument,
        /// Calldata.
        #[serde(default)]
        data: Bytes,
        /// Value.
        #[serde(default)]
        value: U256,
        /// Sender, account 0 when absent.
        #[serde(default)]
        from: Option<Argument>,
    },
    /// Registers an already deployed contract.
    #[serde(rename_all = "camelCase")]
    ContractAt {
        /// Contract name.
        contract_name: String,
        /// Address.
        address: Argument,
    },
    /// Reads an argument of an event emitted by a transaction of another future.
    #[serde(rename_all = "camelCase")]
    ReadEventArgument {
        /// Future whose confirmed transaction emitted the event.
        future_id: String,
        /// Artifact providing the event ABI.
        artifact_id: String,
        /// Event name or signature.
        event_name: String,
        /// Which occurrence of the event to read.
        #[serde(default)]
        event_index: usize,
        /// Which argument to read.
        name_or_index: NameOrIndex,
        /// Emitting contract, the future's own contract when absent.
        #[serde(default)]
        emitter: Option<Argument>,
    },
}

impl FutureKind {
    /// Returns the future type.
    pub const fn future_type(&self) -> FutureType {
        match self {
            Self::ContractDeployment { .. } => FutureType::ContractDeployment,
            Self::LibraryDeployment { .. } => FutureType::LibraryDeployment,
            Self::ContractCall { .. } => FutureType::ContractCall,
            Self::StaticCall { .. } => FutureType::StaticCall,
            Self::SendData { .. } => FutureType::SendData,
            Self::ContractAt { .. } => FutureType::ContractAt,
            Self::ReadEventArgument { .. } => FutureType::ReadEventArgument,
        }
    }

    /// Returns every argument of this kind.
    pub fn arguments(&self) -> Vec<&Argument> {
        let mut out = Vec::new();
        match self {
            Self::ContractDeployment { constructor_args, libraries, from, .. } => {
                out.extend(constructor_args);
                out.extend(libraries.values());
                out.extend(from);
            }
            Self::LibraryDeployment { libraries, from, .. } => {
                out.extend(libraries.values());
                out.extend(from);
            }
            Self::ContractCall { contract, args, from, .. }
            | Self::StaticCall { contract, args, from, .. } => {
                out.push(contract);
                out.extend(args);
                out.extend(from);
            }
            Self::SendData { to, from, .. } => {
                out.push(to);
                out.extend(from);
            }
            Self::ContractAt { address, .. } => out.push(address),
            Self::ReadEventArgument { emitter, .. } => out.extend(emitter),
        }
        out
    }
}

/// A declared unit of on-chain work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Future {
    /// Stable id.
    pub id: String,
    /// Futures that must succeed first, beyond the ones referenced by arguments.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// What the future does.
    #[serde(flatten)]
    pub kind: FutureKind,
}

impl Future {
    /// Creates a future with the dependencies implied by its arguments.
    pub fn new(id: impl Into<String>, kind: FutureKind) -> Self {
        let mut future = Self { id: id.into(), dependencies: BTreeSet::new(), kind };
        future.dependencies = future.all_dependencies();
        future
    }

    /// Adds an explicit dependency.
    pub fn after(mut self, id: impl Into<String>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    /// Returns the declared dependencies together with every future referenced by an argument.
    pub fn all_dependencies(&self) -> BTreeSet<String> {
        let mut deps = self.dependencies.clone();
        deps.extend(
            self.kind.arguments().into_iter().filter_map(Argument::future_id).map(String::from),
        );
        if let FutureKind::ReadEventArgument { future_id, .. } = &self.kind {
            deps.insert(future_id.clone());
        }
        deps
    }
}

/// Orders futures into batches such that every future's dependencies are in earlier batches.
///
/// Futures keep their input order inside a batch.
pub fn batch_futures(futures: &[Future]) -> Result<Vec<Vec<&Future>>, FutureError> {
    let mut ids = BTreeSet::new();
    for future in futures {
        if !ids.insert(future.id.as_str()) {
            return Err(FutureError::DuplicateId(future.id.clone()));
        }
    }

    let mut remaining = Vec::with_capacity(futures.len());
    for future in futures {
        let deps = future.all_dependencies();
        if let Some(dependency) = deps.iter().find(|dep| !ids.contains(dep.as_str())) {
            return Err(FutureError::UnknownDependency {
                future: future.id.clone(),
                dependency: dependency.clone(),
            });
        }
        remaining.push((future, deps));
    }

    let mut done = BTreeSet::new();
    let mut batches = Vec::new();
    while !remaining.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) =
            remaining.into_iter().partition(|(_, deps)| deps.iter().all(|dep| done.contains(dep)));
        if ready.is_empty() {
            return Err(FutureError::Cycle(blocked.iter().map(|(f, _)| f.id.clone()).collect()));
        }
        done.extend(ready.iter().map(|(f, _)| f.id.clone()));
        batches.push(ready.into_iter().map(|(f, _)| f).collect());
        remaining = blocked;
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deploy(id: &str, args: Vec<Argument>) -> Future {
        Future::new(
            id,
            FutureKind::ContractDeployment {
                artifact_id: id.to_string(),
                constructor_args: args,
                libraries: BTreeMap::new(),
                value: U256::ZERO,
                from: None,
            },
        )
    }

    #[test]
    fn test_batches_follow_dependencies() {
        let futures = vec![
            deploy("C", vec![Argument::future("A"), Argument::future("B")]),
            deploy("A", vec![]),
            deploy("B", vec![Argument::future("A")]),
            deploy("D", vec![]),
        ];
        let batches = batch_futures(&futures).unwrap();
        let ids: Vec<Vec<&str>> =
            batches.iter().map(|b| b.iter().map(|f| f.id.as_str()).collect()).collect();
        assert_eq!(ids, vec![vec!["A", "D"], vec!["B"], vec!["C"]]);
    }

    #[test]
    fn test_invalid_graphs() {
        let cycle = vec![
            deploy("A", vec![Argument::future("B")]),
            deploy("B", vec![Argument::future("A")]),
        ];
        assert!(matches!(batch_futures(&cycle), Err(FutureError::Cycle(ids)) if ids.len() == 2));

        let unknown = vec![deploy("A", vec![Argument::future("X")])];
        assert_eq!(
            batch_futures(&unknown).unwrap_err(),
            FutureError::UnknownDependency { future: "A".into(), dependency: "X".into() }
        );

        let duplicate = vec![deploy("A", vec![]), deploy("A", vec![])];
        assert_eq!(batch_futures(&duplicate).unwrap_err(), FutureError::DuplicateId("A".into()));
    }

    #[test]
    fn test_future_from_json() {
        let future: Future = serde_json::from_str(
            r#"{
                "id": "Token#mint",
                "type": "contractCall",
                "contract": {"future": "Token"},
                "artifactId": "Token",
                "functionName": "mint",
                "args": [{"account": 1}, {"literal": "100"}]
            }"#,
        )
        .unwrap();
        assert_eq!(future.kind.future_type(), FutureType::ContractCall);
        assert_eq!(future.all_dependencies(), BTreeSet::from(["Token".to_string()]));
    }
}
