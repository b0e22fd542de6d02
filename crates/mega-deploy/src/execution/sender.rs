//! Nonce reservation, fee computation and broadcasting of onchain interactions.

use std::fmt;

use alloy_primitives::{Address, Bytes};
use tracing::{debug, info, warn};

use super::{EngineError, ExecutionEngine, SendError};
use crate::{
    constants::defaults::FEE_BUMP_PERCENT,
    ledger::{BlockTag, CallFailure, LedgerClient, LedgerError, TransactionRequest},
    strategy::{ExecutionStrategy, StrategyContext},
    views::max_nonce_used_by_sender,
    DeploymentState, EvmExecutionFailure, ExecutionResult, ExecutionState, FeeConfig, Journal,
    JournalMessage, NetworkFees, OnchainInteraction, Transaction,
};

/// Picks the nonce of the next transaction of a sender.
///
/// The deployment state is the source of truth for the nonces this deployment used; the node's
/// pending count only fills in for senders without history and detects foreign transactions.
#[derive(Clone, Copy)]
pub struct NonceManager<'a> {
    ledger: &'a dyn LedgerClient,
}

impl fmt::Debug for NonceManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonceManager").finish_non_exhaustive()
    }
}

impl<'a> NonceManager<'a> {
    /// Creates a nonce manager backed by `ledger`.
    pub fn new(ledger: &'a dyn LedgerClient) -> Self {
        Self { ledger }
    }

    /// Returns the nonce `sender` must use next.
    ///
    /// Mined transactions always count, so a nonce the user took over from this deployment moves
    /// the expected nonce forward. Fails with [`EngineError::NonceRace`] when the node has pending
    /// transactions past that point, which means someone else is using the account.
    pub async fn next_nonce(
        &self,
        state: &DeploymentState,
        sender: Address,
    ) -> Result<u64, EngineError> {
        let pending = self.ledger.transaction_count(sender, BlockTag::Pending).await?;
        let Some(recorded) = max_nonce_used_by_sender(state).get(&sender).map(|nonce| nonce + 1)
        else {
            return Ok(pending);
        };
        let latest = self.ledger.transaction_count(sender, BlockTag::Latest).await?;
        let expected = recorded.max(latest);
        if pending > expected {
            return Err(EngineError::NonceRace { sender, expected, pending });
        }
        Ok(expected)
    }
}

/// Returns the fees a new transaction should pay.
///
/// A configured gas price forces legacy transactions. Otherwise EIP-1559 fees are used when the
/// latest block has a base fee, with twice the base fee as headroom.
pub async fn network_fees(
    ledger: &dyn LedgerClient,
    config: &FeeConfig,
) -> Result<NetworkFees, LedgerError> {
    if let Some(gas_price) = config.gas_price {
        return Ok(NetworkFees::Legacy { gas_price });
    }
    let block = ledger.latest_block().await?;
    match block.base_fee_per_gas {
        Some(base_fee) => {
            let max_priority_fee_per_gas = config.max_priority_fee_per_gas;
            let max_fee_per_gas =
                base_fee.saturating_mul(2).saturating_add(max_priority_fee_per_gas);
            Ok(NetworkFees::Eip1559 { max_fee_per_gas, max_priority_fee_per_gas })
        }
        None => Ok(NetworkFees::Legacy { gas_price: ledger.gas_price().await? }),
    }
}

/// Returns the fees of a replacement for a transaction that paid `previous`: every component
/// bumped by [`FEE_BUMP_PERCENT`], or the current network fees when those are higher.
pub fn bump_fees(previous: NetworkFees, current: NetworkFees) -> NetworkFees {
    let bump = |fee: u128| fee.saturating_mul(FEE_BUMP_PERCENT) / 100;
    match (previous, current) {
        (
            NetworkFees::Eip1559 { max_fee_per_gas, max_priority_fee_per_gas },
            NetworkFees::Eip1559 {
                max_fee_per_gas: current_max,
                max_priority_fee_per_gas: current_priority,
            },
        ) => {
            let max_fee_per_gas = bump(max_fee_per_gas).max(current_max);
            NetworkFees::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas: bump(max_priority_fee_per_gas)
                    .max(current_priority)
                    .min(max_fee_per_gas),
            }
        }
        (NetworkFees::Legacy { gas_price }, NetworkFees::Legacy { gas_price: current }) => {
            NetworkFees::Legacy { gas_price: bump(gas_price).max(current) }
        }
        // a replacement keeps the type of the transaction it replaces
        (
            NetworkFees::Eip1559 { max_fee_per_gas, max_priority_fee_per_gas },
            NetworkFees::Legacy { .. },
        ) => {
            NetworkFees::Eip1559 {
                max_fee_per_gas: bump(max_fee_per_gas),
                max_priority_fee_per_gas: bump(max_priority_fee_per_gas),
            }
        }
        (NetworkFees::Legacy { gas_price }, NetworkFees::Eip1559 { .. }) => {
            NetworkFees::Legacy { gas_price: bump(gas_price) }
        }
    }
}

/// Rejects fees above the configured cap.
pub fn check_fee_limit(fees: &NetworkFees, config: &FeeConfig) -> Result<(), SendError> {
    let Some(limit) = config.max_fee_per_gas_limit else { return Ok(()) };
    let max_fee_per_gas = match *fees {
        NetworkFees::Eip1559 { max_fee_per_gas, .. } => max_fee_per_gas,
        NetworkFees::Legacy { gas_price } => gas_price,
    };
    if max_fee_per_gas > limit {
        return Err(SendError::MaxFeeExceedsLimit { max_fee_per_gas, limit });
    }
    Ok(())
}

fn request_of(interaction: &OnchainInteraction) -> TransactionRequest {
    TransactionRequest {
        from: interaction.from,
        to: interaction.to,
        data: interaction.data.clone(),
        value: interaction.value,
        ..Default::default()
    }
}

impl<J: Journal> ExecutionEngine<J> {
    /// Broadcasts the pending onchain interaction of `state`, or its replacement, returning
    /// whether it was sent.
    ///
    /// The first broadcast is simulated first; a failing simulation completes the future with a
    /// simulation error and never reserves a nonce. Fees the node finds under the base fee are
    /// recomputed on the next turn.
    pub(super) async fn send_transaction(
        &mut self,
        state: &ExecutionState,
        strategy: &dyn ExecutionStrategy,
    ) -> Result<bool, EngineError> {
        let Some(interaction) = state.pending_onchain_interaction() else { return Ok(false) };
        let future_id = state.id.clone();
        let network_interaction_id = interaction.id;
        let mut request = request_of(interaction);

        if interaction.transactions.is_empty() {
            match self.ledger.estimate_gas(&request).await {
                Ok(gas) => request.gas = Some(gas),
                Err(LedgerError::Call(failure)) => {
                    self.record_simulation_error(state, strategy, &request, failure).await?;
                    return Ok(true);
                }
                Err(err) => return Err(err.into()),
            }
        }

        let nonce = match interaction.nonce {
            Some(nonce) => nonce,
            None => {
                let nonce = NonceManager::new(self.ledger.as_ref())
                    .next_nonce(&self.state, interaction.from)
                    .await?;
                self.record(JournalMessage::TransactionPrepareSend {
                    future_id: future_id.clone(),
                    network_interaction_id,
                    nonce,
                })?;
                nonce
            }
        };

        let current = network_fees(self.ledger.as_ref(), &self.config.fees).await?;
        let fees = match interaction.last_transaction() {
            Some(last) => bump_fees(last.fees, current),
            None => current,
        };
        check_fee_limit(&fees, &self.config.fees)?;
        request.nonce = Some(nonce);
        request.fees = Some(fees);

        let hash = match self.ledger.send_transaction(&request).await {
            Ok(hash) => hash,
            Err(err) => match err.tx_hash() {
                Some(hash) => {
                    warn!(%future_id, %hash, %err, "Send failed after the transaction was created");
                    hash
                }
                None => match err {
                    LedgerError::Call(failure) => {
                        self.record_simulation_error(state, strategy, &request, failure).await?;
                        return Ok(true);
                    }
                    LedgerError::FeeTooLow { message, .. } => {
                        warn!(%future_id, nonce, %message, "Fees under the base fee");
                        return Ok(false);
                    }
                    err => return Err(err.into()),
                },
            },
        };

        info!(
            %future_id,
            network_interaction_id,
            nonce,
            %hash,
            replacement = !interaction.transactions.is_empty(),
            "Sent transaction"
        );
        self.record(JournalMessage::TransactionSend {
            future_id: future_id.clone(),
            network_interaction_id,
            nonce,
            transaction: Transaction { hash, fees, receipt: None },
        })?;
        self.watches.remove(&(future_id, network_interaction_id));
        Ok(true)
    }

    async fn record_simulation_error(
        &mut self,
        state: &ExecutionState,
        strategy: &dyn ExecutionStrategy,
        request: &TransactionRequest,
        failure: CallFailure,
    ) -> Result<(), EngineError> {
        let error = self.decode_failure(state, strategy, request, failure).await?;
        warn!(future_id = %state.id, %error, "Transaction simulation failed");
        self.record(JournalMessage::ExecutionStateComplete {
            future_id: state.id.clone(),
            result: ExecutionResult::SimulationError { error },
        })
    }

    /// Decodes a failed simulation, re-running it as a call when the node omitted the revert data.
    async fn decode_failure(
        &self,
        state: &ExecutionState,
        strategy: &dyn ExecutionStrategy,
        request: &TransactionRequest,
        failure: CallFailure,
    ) -> Result<EvmExecutionFailure, EngineError> {
        let data = match failure.data {
            Some(data) => data,
            None => {
                debug!(future_id = %state.id, message = %failure.message, "Fetching revert data");
                let call =
                    TransactionRequest { nonce: None, gas: None, fees: None, ..request.clone() };
                let result = self.ledger.call(&call, BlockTag::Pending).await?;
                if result.success { Bytes::new() } else { result.return_data }
            }
        };
        let ctx = StrategyContext { artifacts: self.artifacts.as_ref() };
        Ok(strategy.error_decoder(state, &ctx).decode(&data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{self, MockLedger, DEPLOYER};

    #[test]
    fn test_bump_fees() {
        let previous = NetworkFees::Eip1559 { max_fee_per_gas: 100, max_priority_fee_per_gas: 10 };
        let current = NetworkFees::Eip1559 { max_fee_per_gas: 50, max_priority_fee_per_gas: 5 };
        assert_eq!(
            bump_fees(previous, current),
            NetworkFees::Eip1559 { max_fee_per_gas: 110, max_priority_fee_per_gas: 11 }
        );

        // the network moved faster than the bump
        let current = NetworkFees::Eip1559 { max_fee_per_gas: 300, max_priority_fee_per_gas: 20 };
        assert_eq!(
            bump_fees(previous, current),
            NetworkFees::Eip1559 { max_fee_per_gas: 300, max_priority_fee_per_gas: 20 }
        );

        assert_eq!(
            bump_fees(
                NetworkFees::Legacy { gas_price: 1000 },
                NetworkFees::Legacy { gas_price: 900 }
            ),
            NetworkFees::Legacy { gas_price: 1100 }
        );
    }

    #[test]
    fn test_fee_limit() {
        let config = FeeConfig { max_fee_per_gas_limit: Some(100), ..Default::default() };
        assert!(check_fee_limit(&NetworkFees::Legacy { gas_price: 100 }, &config).is_ok());
        assert_eq!(
            check_fee_limit(
                &NetworkFees::Eip1559 { max_fee_per_gas: 101, max_priority_fee_per_gas: 1 },
                &config
            ),
            Err(SendError::MaxFeeExceedsLimit { max_fee_per_gas: 101, limit: 100 })
        );
        let unlimited = FeeConfig::default();
        assert!(check_fee_limit(&NetworkFees::Legacy { gas_price: u128::MAX }, &unlimited).is_ok());
    }

    #[tokio::test]
    async fn test_network_fees() {
        let ledger = MockLedger::default();
        ledger.set_base_fee(Some(1_000));
        let config = FeeConfig { max_priority_fee_per_gas: 7, ..Default::default() };
        assert_eq!(
            network_fees(&ledger, &config).await.unwrap(),
            NetworkFees::Eip1559 { max_fee_per_gas: 2_007, max_priority_fee_per_gas: 7 }
        );

        ledger.set_base_fee(None);
        ledger.set_gas_price(55);
        assert_eq!(
            network_fees(&ledger, &config).await.unwrap(),
            NetworkFees::Legacy { gas_price: 55 }
        );

        let config = FeeConfig { gas_price: Some(9), ..config };
        assert_eq!(
            network_fees(&ledger, &config).await.unwrap(),
            NetworkFees::Legacy { gas_price: 9 }
        );
    }

    #[tokio::test]
    async fn test_next_nonce() {
        let ledger = MockLedger::default();
        ledger.set_transaction_count(DEPLOYER, 3);
        let mut deployment = DeploymentState::default();
        let nonces = NonceManager::new(&ledger);

        // no history: the node decides
        assert_eq!(nonces.next_nonce(&deployment, DEPLOYER).await.unwrap(), 3);

        // history ahead of the node, e.g. after a dropped transaction
        let counter = Address::repeat_byte(1);
        let mut state = test_utils::call_state("Counter#increment", counter, "increment", &[]);
        let mut interaction =
            OnchainInteraction::new(1, DEPLOYER, Some(counter), Bytes::new(), Default::default());
        interaction.nonce = Some(5);
        state.network_interactions.push(crate::NetworkInteraction::OnchainInteraction(interaction));
        deployment.execution_states.insert(state.id.clone(), state);
        assert_eq!(nonces.next_nonce(&deployment, DEPLOYER).await.unwrap(), 6);

        // mined transactions past the history were taken over by the user
        ledger.set_transaction_count(DEPLOYER, 8);
        assert_eq!(nonces.next_nonce(&deployment, DEPLOYER).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_next_nonce_race() {
        let ledger = MockLedger::default().manual_mining();
        ledger.set_transaction_count(DEPLOYER, 8);
        let counter = Address::repeat_byte(1);
        let mut state = test_utils::call_state("Counter#increment", counter, "increment", &[]);
        let mut interaction =
            OnchainInteraction::new(1, DEPLOYER, Some(counter), Bytes::new(), Default::default());
        interaction.nonce = Some(5);
        state.network_interactions.push(crate::NetworkInteraction::OnchainInteraction(interaction));
        let mut deployment = DeploymentState::default();
        deployment.execution_states.insert(state.id.clone(), state);

        // someone else has a transaction waiting in the mempool
        ledger.send_external(DEPLOYER);
        assert!(matches!(
            NonceManager::new(&ledger).next_nonce(&deployment, DEPLOYER).await,
            Err(EngineError::NonceRace { expected: 8, pending: 9, .. })
        ));
    }
}
