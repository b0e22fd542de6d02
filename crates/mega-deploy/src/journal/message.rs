use std::collections::BTreeSet;

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::{
    ExecutionKind, ExecutionResult, FutureType, NetworkInteractionRequest, RawStaticCallResult,
    StrategyConfig, Transaction, TransactionReceipt,
};

/// One atomic state transition.
///
/// Messages are durable, ordered and append-only. Applying them in order with
/// [`crate::reduce`] reconstructs the deployment state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalMessage {
    /// An engine run started.
    #[serde(rename_all = "camelCase")]
    RunStart {
        /// Chain the run executes against.
        chain_id: u64,
    },
    /// The execution of a future started.
    #[serde(rename_all = "camelCase")]
    ExecutionStateInitialize {
        /// Future id.
        future_id: String,
        /// Type of the future.
        future_type: FutureType,
        /// Strategy executing the future.
        strategy: String,
        /// Strategy configuration.
        strategy_config: StrategyConfig,
        /// Snapshotted dependencies.
        dependencies: BTreeSet<String>,
        /// Resolved sender.
        from: Option<Address>,
        /// Resolved kind-specific fields.
        kind: ExecutionKind,
    },
    /// The execution of a future completed.
    #[serde(rename_all = "camelCase")]
    ExecutionStateComplete {
        /// Future id.
        future_id: String,
        /// Terminal result.
        result: ExecutionResult,
    },
    /// A strategy requested a new network interaction.
    #[serde(rename_all = "camelCase")]
    NetworkInteractionRequest {
        /// Future id.
        future_id: String,
        /// The request.
        interaction: NetworkInteractionRequest,
    },
    /// A nonce was assigned to an onchain interaction, before anything was broadcast.
    #[serde(rename_all = "camelCase")]
    TransactionPrepareSend {
        /// Future id.
        future_id: String,
        /// Interaction id.
        network_interaction_id: u32,
        /// Assigned nonce.
        nonce: u64,
    },
    /// A transaction was broadcast.
    #[serde(rename_all = "camelCase")]
    TransactionSend {
        /// Future id.
        future_id: String,
        /// Interaction id.
        network_interaction_id: u32,
        /// Nonce of the transaction.
        nonce: u64,
        /// The broadcast attempt.
        transaction: Transaction,
    },
    /// A transaction reached the required confirmation depth.
    #[serde(rename_all = "camelCase")]
    TransactionConfirm {
        /// Future id.
        future_id: String,
        /// Interaction id.
        network_interaction_id: u32,
        /// Hash of the confirmed transaction.
        hash: B256,
        /// Its receipt.
        receipt: TransactionReceipt,
    },
    /// A static call completed.
    #[serde(rename_all = "camelCase")]
    StaticCallComplete {
        /// Future id.
        future_id: String,
        /// Interaction id.
        network_interaction_id: u32,
        /// Raw result.
        result: RawStaticCallResult,
    },
    /// An unconfirmed interaction is resent with bumped fees.
    #[serde(rename_all = "camelCase")]
    OnchainInteractionBumpFees {
        /// Future id.
        future_id: String,
        /// Interaction id.
        network_interaction_id: u32,
    },
    /// Every transaction of an interaction disappeared from the node.
    #[serde(rename_all = "camelCase")]
    OnchainInteractionDropped {
        /// Future id.
        future_id: String,
        /// Interaction id.
        network_interaction_id: u32,
    },
    /// The interaction's nonce was consumed by a transaction sent outside the engine.
    #[serde(rename_all = "camelCase")]
    OnchainInteractionReplacedByUser {
        /// Future id.
        future_id: String,
        /// Interaction id.
        network_interaction_id: u32,
    },
    /// An interaction ran out of fee bumps.
    #[serde(rename_all = "camelCase")]
    OnchainInteractionTimeout {
        /// Future id.
        future_id: String,
        /// Interaction id.
        network_interaction_id: u32,
    },
}

impl JournalMessage {
    /// Returns the future the message belongs to, `None` for run-level messages.
    pub fn future_id(&self) -> Option<&str> {
        match self {
            Self::RunStart { .. } => None,
            Self::ExecutionStateInitialize { future_id, .. }
            | Self::ExecutionStateComplete { future_id, .. }
            | Self::NetworkInteractionRequest { future_id, .. }
            | Self::TransactionPrepareSend { future_id, .. }
            | Self::TransactionSend { future_id, .. }
            | Self::TransactionConfirm { future_id, .. }
            | Self::StaticCallComplete { future_id, .. }
            | Self::OnchainInteractionBumpFees { future_id, .. }
            | Self::OnchainInteractionDropped { future_id, .. }
            | Self::OnchainInteractionReplacedByUser { future_id, .. }
            | Self::OnchainInteractionTimeout { future_id, .. } => Some(future_id),
        }
    }

    /// Returns the message type as written to the journal.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RunStart { .. } => "RUN_START",
            Self::ExecutionStateInitialize { .. } => "EXECUTION_STATE_INITIALIZE",
            Self::ExecutionStateComplete { .. } => "EXECUTION_STATE_COMPLETE",
            Self::NetworkInteractionRequest { .. } => "NETWORK_INTERACTION_REQUEST",
            Self::TransactionPrepareSend { .. } => "TRANSACTION_PREPARE_SEND",
            Self::TransactionSend { .. } => "TRANSACTION_SEND",
            Self::TransactionConfirm { .. } => "TRANSACTION_CONFIRM",
            Self::StaticCallComplete { .. } => "STATIC_CALL_COMPLETE",
            Self::OnchainInteractionBumpFees { .. } => "ONCHAIN_INTERACTION_BUMP_FEES",
            Self::OnchainInteractionDropped { .. } => "ONCHAIN_INTERACTION_DROPPED",
            Self::OnchainInteractionReplacedByUser { .. } => "ONCHAIN_INTERACTION_REPLACED_BY_USER",
            Self::OnchainInteractionTimeout { .. } => "ONCHAIN_INTERACTION_TIMEOUT",
        }
    }
}
