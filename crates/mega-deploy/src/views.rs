//! Read-only projections of a [`DeploymentState`].
//!
//! Views never mutate anything and never touch the network; they only look at a fully folded
//! state (or, for [`list_transactions`], at the journal it was folded from).

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256};
use serde::Serialize;

use crate::{
    DeploymentState, ExecutionResult, ExecutionState, ExecutionStatus, JournalMessage,
    NetworkInteraction, OnchainInteraction, ReceiptStatus, StaticCallInteraction,
    SuccessPayload, TransactionReceipt,
};

/// Future ids bucketed by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    /// Futures still in progress.
    pub started: Vec<String>,
    /// Futures that completed successfully.
    pub successful: Vec<String>,
    /// Futures held by their strategy, with the reason.
    pub held: Vec<(String, String)>,
    /// Futures whose interaction ran out of fee bumps, with the interaction id.
    pub timed_out: Vec<(String, u32)>,
    /// Futures that failed, with the failure message.
    pub failed: Vec<(String, String)>,
}

impl StatusResult {
    /// Returns whether every known future succeeded.
    pub fn is_success(&self) -> bool {
        self.started.is_empty()
            && self.held.is_empty()
            && self.timed_out.is_empty()
            && self.failed.is_empty()
    }
}

/// Buckets every future of `state` by status.
pub fn find_status(state: &DeploymentState) -> StatusResult {
    let mut status = StatusResult::default();
    for (id, execution) in &state.execution_states {
        match execution.status {
            ExecutionStatus::Unstarted | ExecutionStatus::Started => {
                status.started.push(id.clone())
            }
            ExecutionStatus::Success => status.successful.push(id.clone()),
            ExecutionStatus::Held => {
                let reason = match &execution.result {
                    Some(ExecutionResult::StrategyHeld { reason, .. }) => reason.clone(),
                    _ => String::new(),
                };
                status.held.push((id.clone(), reason));
            }
            ExecutionStatus::Timeout => {
                let interaction = execution.last_interaction().map_or(0, NetworkInteraction::id);
                status.timed_out.push((id.clone(), interaction));
            }
            ExecutionStatus::Failed => {
                let message = execution
                    .result
                    .as_ref()
                    .and_then(ExecutionResult::failure_message)
                    .unwrap_or_else(|| "failed".to_string());
                status.failed.push((id.clone(), message));
            }
        }
    }
    status
}

/// Returns the address of every successful deployment and registered contract.
pub fn find_deployed_contracts(state: &DeploymentState) -> BTreeMap<String, Address> {
    state
        .execution_states
        .iter()
        .filter_map(|(id, execution)| match &execution.result {
            Some(ExecutionResult::Success {
                payload:
                    SuccessPayload::Deployment { address } | SuccessPayload::ContractAt { address },
            }) => Some((id.clone(), *address)),
            _ => None,
        })
        .collect()
}

/// What the engine has to do next for a future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Call the strategy with the outcomes so far.
    RunStrategy,
    /// Broadcast (or rebroadcast) the last onchain interaction.
    SendTransaction,
    /// Perform the pending static call.
    QueryStaticCall,
    /// Poll the last onchain interaction for a receipt.
    WaitForReceipt,
}

/// Derives the next action from the shape of the last interaction. Terminal states have none.
pub fn next_action_for_future(state: &ExecutionState) -> Option<NextAction> {
    if state.status.is_terminal() {
        return None;
    }
    let action = match state.last_interaction() {
        None => NextAction::RunStrategy,
        Some(NetworkInteraction::OnchainInteraction(interaction)) => {
            if interaction.is_confirmed() {
                NextAction::RunStrategy
            } else if interaction.nonce.is_none()
                || interaction.transactions.is_empty()
                || interaction.should_be_resent
            {
                NextAction::SendTransaction
            } else {
                NextAction::WaitForReceipt
            }
        }
        Some(NetworkInteraction::StaticCall(call)) => {
            if call.result.is_some() {
                NextAction::RunStrategy
            } else {
                NextAction::QueryStaticCall
            }
        }
    };
    Some(action)
}

/// Where a broadcast transaction ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Not confirmed yet.
    Pending,
    /// Confirmed and succeeded.
    Success,
    /// Confirmed and reverted.
    Failure,
    /// Another transaction at the same nonce was confirmed, or the interaction was replaced.
    Superseded,
}

/// One broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    /// Future that sent it.
    pub future_id: String,
    /// Interaction it belongs to.
    pub network_interaction_id: u32,
    /// Hash.
    pub hash: B256,
    /// Sender.
    pub from: Address,
    /// Recipient, `None` for contract creation.
    pub to: Option<Address>,
    /// Nonce.
    pub nonce: u64,
    /// Status.
    pub status: TransactionStatus,
}

/// Lists every transaction broadcast by the deployment in the order it was journaled.
pub fn list_transactions(
    messages: &[JournalMessage],
    state: &DeploymentState,
) -> Vec<TransactionInfo> {
    messages
        .iter()
        .filter_map(|message| match message {
            JournalMessage::TransactionSend {
                future_id,
                network_interaction_id,
                nonce,
                transaction,
            } => Some((future_id, *network_interaction_id, *nonce, transaction.hash)),
            _ => None,
        })
        .filter_map(|(future_id, id, nonce, hash)| {
            let interaction = state
                .get(future_id)?
                .network_interactions
                .iter()
                .filter_map(NetworkInteraction::as_onchain)
                .find(|interaction| interaction.id == id)?;
            Some(TransactionInfo {
                future_id: future_id.clone(),
                network_interaction_id: id,
                hash,
                from: interaction.from,
                to: interaction.to,
                nonce,
                status: transaction_status(interaction, hash),
            })
        })
        .collect()
}

fn transaction_status(interaction: &OnchainInteraction, hash: B256) -> TransactionStatus {
    match interaction.transactions.iter().find(|tx| tx.hash == hash) {
        Some(tx) => match &tx.receipt {
            Some(receipt) if receipt.status == ReceiptStatus::Success => TransactionStatus::Success,
            Some(_) => TransactionStatus::Failure,
            None if interaction.is_confirmed() => TransactionStatus::Superseded,
            None => TransactionStatus::Pending,
        },
        None => TransactionStatus::Superseded,
    }
}

/// Returns the static calls that have been requested but not performed.
pub fn pending_static_calls(state: &DeploymentState) -> Vec<(&str, &StaticCallInteraction)> {
    state
        .execution_states
        .values()
        .filter(|execution| !execution.status.is_terminal())
        .filter_map(|execution| {
            let call = execution.last_interaction()?.as_static_call()?;
            call.result.is_none().then_some((execution.id.as_str(), call))
        })
        .collect()
}

/// An onchain interaction that is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightInteraction<'a> {
    /// Future the interaction belongs to.
    pub future_id: &'a str,
    /// The interaction.
    pub interaction: &'a OnchainInteraction,
}

impl InFlightInteraction<'_> {
    /// The reserved nonce.
    pub fn nonce(&self) -> u64 {
        self.interaction.nonce.unwrap_or_default()
    }
}

/// Groups the unconfirmed onchain interactions of non-terminal futures that already reserved a
/// nonce by sender, ordered by nonce.
pub fn in_flight_interactions_by_sender(
    state: &DeploymentState,
) -> BTreeMap<Address, Vec<InFlightInteraction<'_>>> {
    let mut by_sender: BTreeMap<Address, Vec<InFlightInteraction<'_>>> = BTreeMap::new();
    let active = state.execution_states.values().filter(|state| !state.status.is_terminal());
    for execution in active {
        let Some(interaction) = execution.pending_onchain_interaction() else { continue };
        if interaction.nonce.is_none() {
            continue;
        }
        by_sender
            .entry(interaction.from)
            .or_default()
            .push(InFlightInteraction { future_id: &execution.id, interaction });
    }
    for interactions in by_sender.values_mut() {
        interactions.sort_by_key(InFlightInteraction::nonce);
    }
    by_sender
}

/// Returns the highest nonce each sender has used in `state`.
///
/// A nonce counts once a transaction was broadcast with it, or while the future that reserved it
/// is still running. Nonces of terminal futures that never broadcast are free again.
pub fn max_nonce_used_by_sender(state: &DeploymentState) -> BTreeMap<Address, u64> {
    let mut max_nonces = BTreeMap::new();
    for execution in state.execution_states.values() {
        let running = !execution.status.is_terminal();
        for interaction in execution.onchain_interactions() {
            let Some(nonce) = interaction.nonce else { continue };
            if !running && interaction.transactions.is_empty() {
                continue;
            }
            max_nonces
                .entry(interaction.from)
                .and_modify(|max: &mut u64| *max = (*max).max(nonce))
                .or_insert(nonce);
        }
    }
    max_nonces
}

/// Returns the hash and receipt of the last confirmed transaction of a future.
pub fn find_confirmed_receipt(state: &ExecutionState) -> Option<(B256, &TransactionReceipt)> {
    state.network_interactions.iter().rev().filter_map(NetworkInteraction::as_onchain).find_map(
        |interaction| {
            let tx = interaction.confirmed_transaction()?;
            Some((tx.hash, tx.receipt.as_ref()?))
        },
    )
}
