use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use super::{ExecutionResult, NetworkInteraction, OnchainInteraction};
use crate::NameOrIndex;

/// Status of an execution state.
///
/// Statuses only move forward: `Unstarted → Started → {Success, Failed, Timeout, Held}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Not attempted yet.
    Unstarted,
    /// In progress.
    Started,
    /// Completed successfully.
    Success,
    /// Completed with a failure result.
    Failed,
    /// An onchain interaction ran out of fee bumps.
    Timeout,
    /// The strategy put the future on hold.
    Held,
}

impl ExecutionStatus {
    /// Returns whether no further transition is possible.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout | Self::Held)
    }
}

/// Type of the future an execution state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FutureType {
    /// Deploys a contract.
    ContractDeployment,
    /// Deploys a library.
    LibraryDeployment,
    /// Calls a contract function in a transaction.
    ContractCall,
    /// Calls a contract function read-only.
    StaticCall,
    /// Sends a raw transaction.
    SendData,
    /// Registers an already deployed contract.
    ContractAt,
    /// Reads an argument of an event emitted by another future.
    ReadEventArgument,
}

impl FutureType {
    /// Returns whether futures of this type are resolved without any network interaction.
    pub const fn is_local(self) -> bool {
        matches!(self, Self::ContractAt | Self::ReadEventArgument)
    }
}

/// Strategy-specific configuration snapshotted at initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    /// CREATE2 salt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<B256>,
}

/// Kind-specific fields of an execution state, with every argument already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionKind {
    /// Contract or library deployment.
    #[serde(rename_all = "camelCase")]
    Deployment {
        /// Artifact to deploy.
        artifact_id: String,
        /// Constructor arguments.
        constructor_args: Vec<String>,
        /// Library name to address.
        libraries: BTreeMap<String, Address>,
        /// Value sent to the constructor.
        value: U256,
    },
    /// Contract function call.
    #[serde(rename_all = "camelCase")]
    Call {
        /// Callee.
        contract_address: Address,
        /// Artifact providing the ABI.
        artifact_id: String,
        /// Function name or signature.
        function_name: String,
        /// Arguments.
        args: Vec<String>,
        /// Value sent with the call.
        value: U256,
    },
    /// Read-only contract function call.
    #[serde(rename_all = "camelCase")]
    StaticCall {
        /// Callee.
        contract_address: Address,
        /// Artifact providing the ABI.
        artifact_id: String,
        /// Function name or signature.
        function_name: String,
        /// Arguments.
        args: Vec<String>,
        /// Which return value to keep, the first one when absent.
        name_or_index: Option<NameOrIndex>,
    },
    /// Raw transaction.
    SendData {
        /// Recipient.
        to: Address,
        /// Calldata.
        data: Bytes,
        /// Value.
        value: U256,
    },
    /// Existing contract.
    #[serde(rename_all = "camelCase")]
    ContractAt {
        /// Contract name.
        contract_name: String,
        /// Address.
        address: Address,
    },
    /// Event argument read.
    #[serde(rename_all = "camelCase")]
    ReadEventArgument {
        /// Event name or signature.
        event_name: String,
        /// Which occurrence of the event to read.
        event_index: usize,
        /// Which argument to read.
        name_or_index: NameOrIndex,
        /// Emitting contract.
        emitter: Address,
        /// Transaction the event was emitted in.
        tx_hash: B256,
        /// Decoded value.
        value: String,
    },
}

/// The durable record of progress and outcome of one future.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    /// Future id.
    pub id: String,
    /// Type of the future.
    pub future_type: FutureType,
    /// Name of the strategy executing the future.
    pub strategy: String,
    /// Strategy configuration.
    pub strategy_config: StrategyConfig,
    /// Current status.
    pub status: ExecutionStatus,
    /// Ids of the futures this one depends on.
    pub dependencies: BTreeSet<String>,
    /// Resolved sender, absent for futures without network interactions.
    pub from: Option<Address>,
    /// Kind-specific fields.
    pub kind: ExecutionKind,
    /// Network interactions, append-only.
    pub network_interactions: Vec<NetworkInteraction>,
    /// Terminal result.
    pub result: Option<ExecutionResult>,
}

impl ExecutionState {
    /// Returns the last network interaction.
    pub fn last_interaction(&self) -> Option<&NetworkInteraction> {
        self.network_interactions.last()
    }

    /// Returns the id the next network interaction gets.
    pub fn next_interaction_id(&self) -> u32 {
        self.network_interactions.len() as u32 + 1
    }

    /// Returns the last interaction if it is an onchain interaction that is not confirmed yet.
    pub fn pending_onchain_interaction(&self) -> Option<&OnchainInteraction> {
        self.last_interaction()
            .and_then(NetworkInteraction::as_onchain)
            .filter(|interaction| !interaction.is_confirmed())
    }

    /// Returns the onchain interactions of this state.
    pub fn onchain_interactions(&self) -> impl Iterator<Item = &OnchainInteraction> {
        self.network_interactions.iter().filter_map(NetworkInteraction::as_onchain)
    }

    /// Returns the deployed or registered address, if the state completed with one.
    pub fn success_address(&self) -> Option<Address> {
        match &self.result {
            Some(ExecutionResult::Success { payload }) => payload.address(),
            _ => None,
        }
    }
}
