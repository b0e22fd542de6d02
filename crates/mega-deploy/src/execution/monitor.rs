//! Polling of broadcast transactions: confirmation, fee bumps, timeouts and drop detection.

use alloy_primitives::B256;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::{EngineError, ExecutionEngine};
use crate::{ledger::BlockTag, ExecutionState, Journal, JournalMessage};

/// Session-local bookkeeping of an interaction waiting for its receipt. Never journaled: a resumed
/// session starts watching from scratch.
#[derive(Debug, Clone, Copy)]
pub(super) struct InteractionWatch {
    /// Last transaction of the interaction when the watch started.
    hash: B256,
    /// When the watch started.
    since: Instant,
    /// Consecutive polls in which the node knew none of the transactions.
    misses: u32,
}

impl InteractionWatch {
    fn new(hash: B256) -> Self {
        Self { hash, since: Instant::now(), misses: 0 }
    }
}

impl<J: Journal> ExecutionEngine<J> {
    /// Polls the pending onchain interaction of `state` once, returning whether a message was
    /// recorded.
    pub(super) async fn check_interaction(
        &mut self,
        state: &ExecutionState,
    ) -> Result<bool, EngineError> {
        let Some(interaction) = state.pending_onchain_interaction() else { return Ok(false) };
        let Some(last) = interaction.last_transaction() else { return Ok(false) };
        let future_id = state.id.clone();
        let network_interaction_id = interaction.id;
        let key = (future_id.clone(), network_interaction_id);

        let latest = self.ledger.latest_block().await?.number;
        for tx in interaction.transactions.iter().rev() {
            let Some(receipt) = self.ledger.transaction_receipt(tx.hash).await? else { continue };
            let confirmations = latest.saturating_sub(receipt.block_number);
            if confirmations < self.config.required_confirmations {
                trace!(%future_id, hash = %tx.hash, confirmations, "Waiting for confirmations");
                return Ok(false);
            }
            info!(
                %future_id,
                network_interaction_id,
                hash = %tx.hash,
                block = receipt.block_number,
                "Transaction confirmed"
            );
            self.watches.remove(&key);
            self.record(JournalMessage::TransactionConfirm {
                future_id,
                network_interaction_id,
                hash: tx.hash,
                receipt,
            })?;
            return Ok(true);
        }

        let mut known = false;
        for tx in interaction.transactions.iter().rev() {
            if self.ledger.transaction(tx.hash).await?.is_some() {
                known = true;
                break;
            }
        }

        let watch =
            self.watches.entry(key.clone()).or_insert_with(|| InteractionWatch::new(last.hash));
        if watch.hash != last.hash {
            *watch = InteractionWatch::new(last.hash);
        }

        if !known {
            watch.misses += 1;
            if watch.misses < self.config.transaction_lookup_retries {
                debug!(%future_id, misses = watch.misses, "Transactions not found by the node");
                return Ok(false);
            }
            self.watches.remove(&key);
            let nonce = interaction.nonce.unwrap_or_default();
            let latest_count =
                self.ledger.transaction_count(interaction.from, BlockTag::Latest).await?;
            let message = if latest_count > nonce {
                warn!(%future_id, nonce, latest_count, "Nonce used by another transaction");
                JournalMessage::OnchainInteractionReplacedByUser {
                    future_id,
                    network_interaction_id,
                }
            } else {
                warn!(%future_id, nonce, "Transaction dropped from the mempool");
                JournalMessage::OnchainInteractionDropped { future_id, network_interaction_id }
            };
            self.record(message)?;
            return Ok(true);
        }

        watch.misses = 0;
        let resend = &self.config.resend;
        if resend.disable_fee_bumping
            || watch.since.elapsed() < resend.timeout_before_bumping_fees
        {
            return Ok(false);
        }
        self.watches.remove(&key);
        let bumps = interaction.fee_bumps();
        let message = if bumps >= self.config.resend.max_fee_bumps {
            warn!(%future_id, network_interaction_id, bumps, "Transaction timed out");
            JournalMessage::OnchainInteractionTimeout { future_id, network_interaction_id }
        } else {
            info!(%future_id, network_interaction_id, bumps, "Bumping fees");
            JournalMessage::OnchainInteractionBumpFees { future_id, network_interaction_id }
        };
        self.record(message)?;
        Ok(true)
    }
}
