//! Reconciliation of the nonces recorded in the journal with the chain, before a session sends
//! anything.

use std::{cmp::Ordering, collections::BTreeSet};

use tracing::{debug, warn};

use super::NonceSyncError;
use crate::{
    ledger::{BlockTag, LedgerClient},
    views::in_flight_interactions_by_sender,
    DeploymentState, JournalMessage, OnchainInteraction,
};

/// Compares every in-flight interaction with the chain and returns the messages that account for
/// what happened to it while no session was running.
///
/// For each sender, with `latest` and `pending` its transaction counts:
/// - a transaction the node still knows about is left to the polling loop,
/// - an unknown transaction whose nonce is below `latest` was replaced by someone else,
/// - an unknown transaction whose nonce is above `latest` was dropped,
/// - an unknown transaction at exactly `latest` is inconclusive and left to the polling loop.
///
/// Fails instead when a reserved nonce without a recorded transaction was used anyway, or when
/// the sender has pending transactions this deployment did not send.
pub async fn sync_nonces(
    ledger: &dyn LedgerClient,
    state: &DeploymentState,
) -> Result<Vec<JournalMessage>, NonceSyncError> {
    let mut messages = Vec::new();
    for (sender, interactions) in in_flight_interactions_by_sender(state) {
        let latest = ledger.transaction_count(sender, BlockTag::Latest).await?;
        let pending = ledger.transaction_count(sender, BlockTag::Pending).await?;
        debug!(%sender, latest, pending, in_flight = interactions.len(), "Syncing nonces");

        let mut explained = BTreeSet::new();
        let mut verdicts = Vec::new();
        for in_flight in &interactions {
            let (future_id, interaction, nonce) =
                (in_flight.future_id, in_flight.interaction, in_flight.nonce());
            if interaction.transactions.is_empty() {
                if nonce < pending {
                    return Err(NonceSyncError::UnrecordedBroadcast {
                        sender,
                        future_id: future_id.to_string(),
                        nonce,
                    });
                }
                continue;
            }
            if is_known(ledger, interaction).await? {
                explained.insert(nonce);
                continue;
            }

            let network_interaction_id = interaction.id;
            match nonce.cmp(&latest) {
                Ordering::Less => {
                    warn!(%sender, future_id, nonce, latest, "Nonce used by another transaction");
                    verdicts.push(JournalMessage::OnchainInteractionReplacedByUser {
                        future_id: future_id.to_string(),
                        network_interaction_id,
                    });
                }
                // already waiting to be resent
                Ordering::Greater if interaction.should_be_resent => {}
                Ordering::Greater => {
                    warn!(%sender, future_id, nonce, latest, "Transaction was dropped");
                    verdicts.push(JournalMessage::OnchainInteractionDropped {
                        future_id: future_id.to_string(),
                        network_interaction_id,
                    });
                }
                Ordering::Equal => {
                    debug!(%sender, future_id, nonce, "Inconclusive, leaving it to polling");
                }
            }
        }

        if (latest..pending).any(|nonce| !explained.contains(&nonce)) {
            return Err(NonceSyncError::PendingExternalTransaction { sender, latest, pending });
        }
        messages.extend(verdicts);
    }
    Ok(messages)
}

async fn is_known(
    ledger: &dyn LedgerClient,
    interaction: &OnchainInteraction,
) -> Result<bool, NonceSyncError> {
    for tx in interaction.transactions.iter().rev() {
        if ledger.transaction(tx.hash).await?.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}
