//! The remote ledger interface.
//!
//! The engine only talks to the chain through [`LedgerClient`]. [`JsonRpcLedger`] implements it
//! over Ethereum JSON-RPC; every response is validated field by field by the decoders in
//! [`wire`] before it reaches the engine.

use core::fmt;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

use crate::{NetworkFees, RawStaticCallResult, TransactionReceipt};

mod rpc;
pub use rpc::JsonRpcLedger;

pub mod wire;

/// Result alias for ledger operations.
pub type Result<T, E = LedgerError> = core::result::Result<T, E>;

/// Errors of a ledger request.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The request could not be performed.
    #[error("{method} failed: {source}")]
    Transport {
        /// RPC method.
        method: &'static str,
        /// Transport error.
        source: alloy_transport::TransportError,
    },
    /// The response does not have the expected shape.
    #[error(transparent)]
    Decode(#[from] ResponseDecodeError),
    /// A call or transaction failed during execution.
    #[error("{0}")]
    Call(CallFailure),
    /// The node rejected the request.
    #[error("{method} returned error {code}: {message}")]
    Rpc {
        /// RPC method.
        method: &'static str,
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
        /// Transaction hash attached to the error, if any.
        tx_hash: Option<B256>,
    },
    /// The transaction pays less than the base fee of the block it was checked against.
    #[error("{method} rejected the fees: {message}")]
    FeeTooLow {
        /// RPC method.
        method: &'static str,
        /// Error message.
        message: String,
    },
}

impl LedgerError {
    /// Returns the transaction hash a failed submission still produced.
    pub const fn tx_hash(&self) -> Option<B256> {
        match self {
            Self::Call(failure) => failure.tx_hash,
            Self::Rpc { tx_hash, .. } => *tx_hash,
            _ => None,
        }
    }
}

/// A structured execution failure reported by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    /// Error message.
    pub message: String,
    /// Revert data, if the node returned any.
    pub data: Option<Bytes>,
    /// Transaction hash, if the failure came from a submitted transaction.
    pub tx_hash: Option<B256>,
    /// Whether the node recognized the revert as a custom error.
    pub custom_error_reported: bool,
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "execution failed: {}", self.message)?;
        if let Some(data) = &self.data {
            write!(f, " (data: {data})")?;
        }
        Ok(())
    }
}

/// A malformed response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseDecodeError {
    /// The response is not of the expected JSON type.
    #[error("{method} returned {raw}, expected {expected}")]
    Shape {
        /// RPC method.
        method: &'static str,
        /// Expected shape.
        expected: &'static str,
        /// Raw response.
        raw: String,
    },
    /// A field is missing or malformed.
    #[error("{method} returned invalid {field}: {raw}")]
    InvalidField {
        /// RPC method.
        method: &'static str,
        /// Field name.
        field: &'static str,
        /// Raw field value.
        raw: String,
    },
}

/// Block selector of a state query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum BlockTag {
    /// The latest mined block.
    #[display("latest")]
    Latest,
    /// The latest block plus the mempool.
    #[display("pending")]
    Pending,
    /// A specific block.
    #[display("{_0:#x}")]
    Number(u64),
}

/// The parts of a block header the engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Block hash.
    pub hash: B256,
    /// Block number.
    pub number: u64,
    /// Base fee, absent before London.
    pub base_fee_per_gas: Option<u128>,
}

/// A transaction to estimate, call or send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionRequest {
    /// Sender.
    pub from: Address,
    /// Recipient, `None` for contract creation.
    pub to: Option<Address>,
    /// Calldata or init code.
    pub data: Bytes,
    /// Value.
    pub value: U256,
    /// Nonce.
    pub nonce: Option<u64>,
    /// Gas limit.
    pub gas: Option<u64>,
    /// Fees.
    pub fees: Option<NetworkFees>,
}

/// A transaction as returned by a lookup by hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchedTransaction {
    /// Transaction hash.
    pub hash: B256,
    /// Nonce.
    pub nonce: u64,
    /// Including block, `None` while pending.
    pub block_number: Option<u64>,
    /// Fees.
    pub fees: NetworkFees,
}

/// Asynchronous access to a remote ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync + fmt::Debug {
    /// Returns the chain id.
    async fn chain_id(&self) -> Result<u64>;

    /// Returns the latest block.
    async fn latest_block(&self) -> Result<Block>;

    /// Returns the balance of an account.
    async fn balance(&self, address: Address, block: BlockTag) -> Result<U256>;

    /// Sets the balance of an account. Only supported by development nodes.
    async fn set_balance(&self, address: Address, balance: U256) -> Result<()>;

    /// Returns the legacy gas price.
    async fn gas_price(&self) -> Result<u128>;

    /// Estimates the gas of a transaction.
    ///
    /// A transaction that would fail is reported as [`LedgerError::Call`].
    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64>;

    /// Executes a read-only call.
    ///
    /// Reverts are a successful request: they are returned as a [`RawStaticCallResult`] with
    /// `success` set to false.
    async fn call(&self, request: &TransactionRequest, block: BlockTag)
        -> Result<RawStaticCallResult>;

    /// Sends a transaction signed by the node.
    async fn send_transaction(&self, request: &TransactionRequest) -> Result<B256>;

    /// Broadcasts a signed transaction.
    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256>;

    /// Returns the transaction count of an account.
    async fn transaction_count(&self, address: Address, block: BlockTag) -> Result<u64>;

    /// Looks up a transaction by hash.
    async fn transaction(&self, hash: B256) -> Result<Option<FetchedTransaction>>;

    /// Looks up a receipt by hash.
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>>;

    /// Returns the code of an account.
    async fn code(&self, address: Address, block: BlockTag) -> Result<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_tag_param() {
        assert_eq!(BlockTag::Latest.to_string(), "latest");
        assert_eq!(BlockTag::Pending.to_string(), "pending");
        assert_eq!(BlockTag::Number(255).to_string(), "0xff");
    }
}
