use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// One logical on-chain action or read-only query of a future.
///
/// A future owns an ordered, append-only list of these. The last one is the one currently in
/// flight until it completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkInteraction {
    /// A transaction, possibly broadcast several times at the same nonce.
    OnchainInteraction(OnchainInteraction),
    /// A read-only `eth_call`.
    StaticCall(StaticCallInteraction),
}

impl NetworkInteraction {
    /// Returns the interaction id, unique within its execution state.
    pub const fn id(&self) -> u32 {
        match self {
            Self::OnchainInteraction(interaction) => interaction.id,
            Self::StaticCall(interaction) => interaction.id,
        }
    }

    /// Returns whether the interaction reached its terminal state.
    pub fn is_complete(&self) -> bool {
        match self {
            Self::OnchainInteraction(interaction) => interaction.is_confirmed(),
            Self::StaticCall(interaction) => interaction.result.is_some(),
        }
    }

    /// Returns the onchain interaction, if this is one.
    pub const fn as_onchain(&self) -> Option<&OnchainInteraction> {
        match self {
            Self::OnchainInteraction(interaction) => Some(interaction),
            Self::StaticCall(_) => None,
        }
    }

    /// Returns the static call, if this is one.
    pub const fn as_static_call(&self) -> Option<&StaticCallInteraction> {
        match self {
            Self::StaticCall(interaction) => Some(interaction),
            Self::OnchainInteraction(_) => None,
        }
    }
}

/// A request for a new network interaction, as emitted by a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkInteractionRequest {
    /// Send a transaction.
    #[serde(rename_all = "camelCase")]
    OnchainInteraction {
        /// Id of the interaction to create.
        id: u32,
        /// Sender.
        from: Address,
        /// Recipient, `None` for contract creation.
        to: Option<Address>,
        /// Calldata or init code.
        data: Bytes,
        /// Value.
        value: U256,
    },
    /// Perform a static call.
    #[serde(rename_all = "camelCase")]
    StaticCall {
        /// Id of the interaction to create.
        id: u32,
        /// Caller.
        from: Address,
        /// Callee.
        to: Address,
        /// Calldata.
        data: Bytes,
        /// Value.
        value: U256,
    },
}

impl NetworkInteractionRequest {
    /// Returns the id of the interaction this request creates.
    pub const fn id(&self) -> u32 {
        match self {
            Self::OnchainInteraction { id, .. } | Self::StaticCall { id, .. } => *id,
        }
    }

    /// Converts the request into the interaction it creates.
    pub fn into_interaction(self) -> NetworkInteraction {
        match self {
            Self::OnchainInteraction { id, from, to, data, value } => {
                let interaction = OnchainInteraction::new(id, from, to, data, value);
                NetworkInteraction::OnchainInteraction(interaction)
            }
            Self::StaticCall { id, from, to, data, value } => {
                let call = StaticCallInteraction { id, from, to, data, value, result: None };
                NetworkInteraction::StaticCall(call)
            }
        }
    }
}

/// Lifecycle state of an [`OnchainInteraction`], derived from its recorded fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OnchainInteractionState {
    /// Nothing was broadcast yet (possibly a nonce is already reserved).
    New,
    /// At least one transaction was broadcast and none is confirmed.
    Sent,
    /// Dropped or scheduled for a fee bump; the next turn broadcasts again.
    AwaitingResend,
    /// One transaction has a confirmed receipt.
    Confirmed,
}

/// A transaction-backed network interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnchainInteraction {
    /// Interaction id, `1`-based index in the owning execution state.
    pub id: u32,
    /// Sender account.
    pub from: Address,
    /// Recipient, `None` for contract creation.
    pub to: Option<Address>,
    /// Calldata or init code.
    pub data: Bytes,
    /// Value transferred with the transaction.
    pub value: U256,
    /// The nonce, assigned once before the first broadcast.
    pub nonce: Option<u64>,
    /// Every broadcast attempt for this interaction, oldest first.
    pub transactions: Vec<Transaction>,
    /// Set when the next turn must broadcast again at the same nonce.
    pub should_be_resent: bool,
}

impl OnchainInteraction {
    /// Creates an interaction that has not been broadcast yet.
    pub const fn new(
        id: u32,
        from: Address,
        to: Option<Address>,
        data: Bytes,
        value: U256,
    ) -> Self {
        Self {
            id,
            from,
            to,
            data,
            value,
            nonce: None,
            transactions: Vec::new(),
            should_be_resent: false,
        }
    }

    /// Returns the transaction whose receipt was confirmed.
    pub fn confirmed_transaction(&self) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.receipt.is_some())
    }

    /// Returns whether a transaction of this interaction has been confirmed.
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_transaction().is_some()
    }

    /// Returns the most recent broadcast.
    pub fn last_transaction(&self) -> Option<&Transaction> {
        self.transactions.last()
    }

    /// Number of fee bumps applied so far.
    pub fn fee_bumps(&self) -> u32 {
        self.transactions.len().saturating_sub(1) as u32
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> OnchainInteractionState {
        if self.is_confirmed() {
            OnchainInteractionState::Confirmed
        } else if self.should_be_resent {
            OnchainInteractionState::AwaitingResend
        } else if self.transactions.is_empty() {
            OnchainInteractionState::New
        } else {
            OnchainInteractionState::Sent
        }
    }
}

/// A read-only call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticCallInteraction {
    /// Interaction id, `1`-based index in the owning execution state.
    pub id: u32,
    /// Caller.
    pub from: Address,
    /// Callee.
    pub to: Address,
    /// Calldata.
    pub data: Bytes,
    /// Value sent with the call.
    pub value: U256,
    /// Raw call result, set once the call completed.
    pub result: Option<RawStaticCallResult>,
}

/// Undecoded outcome of an `eth_call`.
///
/// A reverted call is still a completed call: its revert data is kept in `return_data` and
/// decoding it is left to the strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStaticCallResult {
    /// Return data, or revert data when `success` is false.
    pub return_data: Bytes,
    /// Whether the call succeeded.
    pub success: bool,
    /// Whether the node reported the failure as a contract-defined custom error.
    pub custom_error_reported: bool,
}

impl RawStaticCallResult {
    /// A successful call returning `data`.
    pub const fn success(data: Bytes) -> Self {
        Self { return_data: data, success: true, custom_error_reported: false }
    }

    /// A reverted call with revert data `data`.
    pub const fn revert(data: Bytes) -> Self {
        Self { return_data: data, success: false, custom_error_reported: false }
    }
}

/// One broadcast attempt of an onchain interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Transaction hash.
    pub hash: B256,
    /// Fees the transaction was sent with.
    pub fees: NetworkFees,
    /// Confirmed receipt, absent until the confirmation threshold was met.
    pub receipt: Option<TransactionReceipt>,
}

/// Fees of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NetworkFees {
    /// EIP-1559 fee pair.
    #[serde(rename_all = "camelCase")]
    Eip1559 {
        /// Maximum total fee per gas.
        #[serde(with = "super::u128_string")]
        max_fee_per_gas: u128,
        /// Maximum priority fee per gas.
        #[serde(with = "super::u128_string")]
        max_priority_fee_per_gas: u128,
    },
    /// Legacy gas price.
    #[serde(rename_all = "camelCase")]
    Legacy {
        /// Gas price.
        #[serde(with = "super::u128_string")]
        gas_price: u128,
    },
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    /// Hash of the including block.
    pub block_hash: B256,
    /// Number of the including block.
    pub block_number: u64,
    /// Execution status.
    pub status: ReceiptStatus,
    /// Created contract, for successful contract creations.
    pub contract_address: Option<Address>,
    /// Logs emitted by the transaction.
    pub logs: Vec<Log>,
}

impl TransactionReceipt {
    /// Returns whether the transaction succeeded.
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Execution status of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptStatus {
    /// The transaction succeeded.
    Success,
    /// The transaction reverted.
    Failure,
}

/// An event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    /// Emitting contract.
    pub address: Address,
    /// Index of the log in its block.
    pub log_index: u64,
    /// Non-indexed data.
    pub data: Bytes,
    /// Indexed topics.
    pub topics: Vec<B256>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(hash: u8, receipt: Option<TransactionReceipt>) -> Transaction {
        Transaction {
            hash: B256::repeat_byte(hash),
            fees: NetworkFees::Legacy { gas_price: 1 },
            receipt,
        }
    }

    #[test]
    fn test_onchain_interaction_state() {
        let mut interaction =
            OnchainInteraction::new(1, Address::ZERO, None, Bytes::new(), U256::ZERO);
        assert_eq!(interaction.state(), OnchainInteractionState::New);

        interaction.nonce = Some(0);
        interaction.transactions.push(tx(1, None));
        assert_eq!(interaction.state(), OnchainInteractionState::Sent);

        interaction.should_be_resent = true;
        assert_eq!(interaction.state(), OnchainInteractionState::AwaitingResend);

        interaction.should_be_resent = false;
        interaction.transactions.push(tx(
            2,
            Some(TransactionReceipt {
                block_hash: B256::ZERO,
                block_number: 1,
                status: ReceiptStatus::Success,
                contract_address: None,
                logs: vec![],
            }),
        ));
        assert_eq!(interaction.state(), OnchainInteractionState::Confirmed);
        assert_eq!(interaction.confirmed_transaction().unwrap().hash, B256::repeat_byte(2));
        assert_eq!(interaction.fee_bumps(), 1);
    }

    #[test]
    fn test_fees_serde_in_tagged_enum() {
        let interaction = NetworkInteraction::OnchainInteraction(OnchainInteraction {
            transactions: vec![Transaction {
                hash: B256::ZERO,
                fees: NetworkFees::Eip1559 {
                    max_fee_per_gas: u128::MAX,
                    max_priority_fee_per_gas: 1,
                },
                receipt: None,
            }],
            ..OnchainInteraction::new(1, Address::ZERO, None, Bytes::new(), U256::ZERO)
        });
        let json = serde_json::to_string(&interaction).unwrap();
        assert_eq!(serde_json::from_str::<NetworkInteraction>(&json).unwrap(), interaction);
    }
}
