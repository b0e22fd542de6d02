//! Constants for the deployment engine.
//!
//! Defaults for the execution configuration live here, grouped with the well-known addresses and
//! chain ids the engine treats specially.

use alloy_primitives::{address, hex, Address};

/// Default values used by [`crate::ExecutionConfig`].
pub mod defaults {
    use core::time::Duration;

    /// Block depth beyond the inclusion block a receipt must reach before it counts as confirmed.
    pub const REQUIRED_CONFIRMATIONS: u64 = 5;
    /// Interval between two polls of the remote ledger while waiting on receipts.
    pub const BLOCK_POLLING_INTERVAL: Duration = Duration::from_secs(1);
    /// Number of consecutive polls in which none of an interaction's transactions is known to the
    /// node before the interaction is considered gone from the mempool.
    pub const TRANSACTION_LOOKUP_RETRIES: u32 = 10;
    /// Time a known-but-unmined transaction may wait before its fees get bumped.
    pub const TIMEOUT_BEFORE_BUMPING_FEES: Duration = Duration::from_secs(3 * 60);
    /// Maximum number of fee bumps for a single interaction before it times out.
    pub const MAX_FEE_BUMPS: u32 = 4;
    /// Priority fee added on top of the base fee when building EIP-1559 fees (1 gwei).
    pub const MAX_PRIORITY_FEE_PER_GAS: u128 = 1_000_000_000;
    /// Numerator of the fee bump applied when resending, i.e. a resend pays `110 / 100` of the
    /// previous fees.
    pub const FEE_BUMP_PERCENT: u128 = 110;
    /// Name of the strategy used for new futures.
    pub const STRATEGY: &str = "basic";
}

/// The deterministic deployment proxy used by the `create2` strategy.
///
/// The proxy takes `salt ‖ initcode` as calldata and deploys with `CREATE2`, so the resulting
/// address only depends on the proxy address, the salt and the init code hash.
pub const CREATE2_FACTORY_ADDRESS: Address = address!("4e59b44847b379578588920ca78fbf26c0b4956c");

/// The pre-signed transaction deploying [`CREATE2_FACTORY_ADDRESS`].
///
/// The transaction is signed without chain id (`v = 27`) by a key nobody knows, so it can be
/// replayed on any chain once its signer holds enough ether for `gas_price * gas_limit`.
pub const CREATE2_FACTORY_DEPLOYMENT_TX: &[u8] = &hex!(
    "f8a58085174876e800830186a08080b853604580600e600039806000f350fe7fffffffffffffffff"
    "ffffffffffffffffffffffffffffffffffffffffffffffe03601600081602082378035828234f580"
    "15156039578182fd5b8082525050506014600cf31ba0222222222222222222222222222222222222"
    "2222222222222222222222222222a022222222222222222222222222222222222222222222222222"
    "22222222222222"
);

/// Signer of [`CREATE2_FACTORY_DEPLOYMENT_TX`].
pub const CREATE2_FACTORY_DEPLOYER: Address = address!("3fab184622dc19b6109349b94811493bf2a45362");

/// Chain ids of local development networks on which a missing CREATE2 factory may be bootstrapped
/// from its pre-signed deployment transaction.
pub const PERMISSIVE_CHAIN_IDS: &[u64] = &[31337, 1337];
