//! The execution engine and the components it drives.
//!
//! An [`ExecutionEngine`] session replays the journal, bootstraps strategy prerequisites,
//! reconciles sender nonces with the chain and then advances every pending future one network
//! round-trip at a time until its dependency batch is terminal.

use alloy_primitives::{Address, B256};

use crate::{ledger::LedgerError, AbiError, ArtifactError, FutureError, JournalError, ReducerError};

mod bootstrap;
pub use bootstrap::*;

mod engine;
pub use engine::*;

mod initialize;

mod monitor;

mod nonce_sync;
pub use nonce_sync::*;

mod sender;
pub use sender::*;

/// Errors that abort an engine session.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The journal could not be read or written.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// A journal message does not fit the deployment state.
    #[error(transparent)]
    Reducer(#[from] ReducerError),
    /// A ledger request failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The future graph is invalid.
    #[error(transparent)]
    Future(#[from] FutureError),
    /// A strategy prerequisite could not be satisfied.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// Resuming would risk a nonce collision.
    #[error(transparent)]
    NonceSync(#[from] NonceSyncError),
    /// A transaction could not be sent.
    #[error(transparent)]
    Send(#[from] SendError),
    /// The journal was written against another chain.
    #[error("journal belongs to chain {journal}, but the node reports chain {node}")]
    ChainMismatch {
        /// Chain id recorded in the journal.
        journal: u64,
        /// Chain id reported by the node.
        node: u64,
    },
    /// Another party consumed a nonce while the session was running.
    #[error(
        "the next nonce of {sender} should be {expected}, but the node reports {pending}; \
         make sure no other transactions are sent from {sender} during the deployment"
    )]
    NonceRace {
        /// Sender account.
        sender: Address,
        /// Nonce the engine expected to use.
        expected: u64,
        /// Pending transaction count reported by the node.
        pending: u64,
    },
    /// No strategy with this name is registered.
    #[error("unknown execution strategy {0:?}")]
    UnknownStrategy(String),
    /// A future could not be initialized.
    #[error("cannot initialize future {future_id}: {source}")]
    Initialize {
        /// The future id.
        future_id: String,
        /// What went wrong.
        #[source]
        source: ResolveError,
    },
}

/// Errors of resolving the arguments of a future.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No account with this index is configured.
    #[error("no account with index {0}")]
    UnknownAccount(usize),
    /// The referenced future has no value to pass on.
    #[error("future {0} has no value to pass on")]
    MissingValue(String),
    /// The value is not an address.
    #[error("{0:?} is not an address")]
    InvalidAddress(String),
    /// The referenced future has no confirmed transaction.
    #[error("future {0} has no confirmed transaction")]
    MissingReceipt(String),
    /// No emitter was given and the referenced future has no contract address.
    #[error("cannot infer the emitter of future {0}")]
    MissingEmitter(String),
    /// An artifact could not be loaded.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    /// An ABI lookup or decoding failed.
    #[error(transparent)]
    Abi(#[from] AbiError),
}

/// Errors of building or sending a transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The network asks for more than the configured fee cap.
    #[error("maxFeePerGas {max_fee_per_gas} exceeds the configured limit of {limit}")]
    MaxFeeExceedsLimit {
        /// Fee the transaction would need.
        max_fee_per_gas: u128,
        /// Configured cap.
        limit: u128,
    },
}

/// Unsafe conditions found while reconciling nonces with the chain.
#[derive(Debug, thiserror::Error)]
pub enum NonceSyncError {
    /// The account has pending transactions the engine did not send.
    #[error(
        "{sender} has pending transactions not sent by this deployment (latest count {latest}, \
         pending count {pending}); wait for them to be mined and try again"
    )]
    PendingExternalTransaction {
        /// Sender account.
        sender: Address,
        /// Transaction count at the latest block.
        latest: u64,
        /// Transaction count including the mempool.
        pending: u64,
    },
    /// A nonce was reserved for a broadcast that never made it to the journal, and the chain
    /// already used it.
    #[error(
        "nonce {nonce} of {sender} was reserved by future {future_id} but its transaction was not \
         recorded, and the nonce has been used since"
    )]
    UnrecordedBroadcast {
        /// Sender account.
        sender: Address,
        /// The future id.
        future_id: String,
        /// The reserved nonce.
        nonce: u64,
    },
    /// A ledger request failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Errors of decoding a pre-signed deployment transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PresignedTxError {
    /// The bytes are not a valid RLP-encoded legacy transaction.
    #[error("malformed RLP encoding")]
    MalformedEncoding,
    /// The transaction has a recipient.
    #[error("transaction is not a contract creation")]
    NotContractCreation,
    /// The transaction is replay protected.
    #[error("transaction is not a pre-EIP-155 transaction")]
    NotPreEip155,
    /// No signer can be recovered from the signature.
    #[error("invalid signature")]
    InvalidSignature,
}

/// Errors of ensuring a strategy prerequisite is deployed.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// The prerequisite is missing and may not be deployed on this chain.
    #[error("no contract at {address} on chain {chain_id}, and it may not be bootstrapped there")]
    FactoryMissing {
        /// Expected contract address.
        address: Address,
        /// Chain id.
        chain_id: u64,
    },
    /// The bootstrap transaction cannot be decoded.
    #[error("invalid bootstrap transaction: {0}")]
    InvalidTransaction(#[from] PresignedTxError),
    /// The bootstrap transaction deploys to another address.
    #[error("bootstrap transaction deploys to {actual}, expected {expected}")]
    AddressMismatch {
        /// Expected contract address.
        expected: Address,
        /// Address the transaction deploys to.
        actual: Address,
    },
    /// The bootstrap transaction did not get mined in time.
    #[error("bootstrap transaction {hash} not mined after {polls} polls")]
    NotMined {
        /// Transaction hash.
        hash: B256,
        /// Number of receipt lookups.
        polls: u32,
    },
    /// The bootstrap transaction was mined but left no code.
    #[error("bootstrap transaction {hash} left no code at {address}")]
    NoCode {
        /// Transaction hash.
        hash: B256,
        /// Expected contract address.
        address: Address,
    },
    /// A ledger request failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

