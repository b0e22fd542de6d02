//! Execution configuration.

use core::time::Duration;

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use crate::constants::{defaults, PERMISSIVE_CHAIN_IDS};

/// Configuration of a single engine session.
///
/// Every field has a default, so partial configurations can be deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionConfig {
    /// Block depth beyond the inclusion block a receipt must reach before the transaction is
    /// considered confirmed. `0` confirms as soon as a receipt is observed.
    pub required_confirmations: u64,
    /// Interval between two polls of the remote ledger.
    #[serde(with = "duration_millis")]
    pub block_polling_interval: Duration,
    /// Number of consecutive polls in which none of an interaction's transactions is known to the
    /// node before the interaction is classified as dropped or replaced.
    pub transaction_lookup_retries: u32,
    /// Resend (fee bump) policy.
    pub resend: ResendPolicy,
    /// Fee policy.
    pub fees: FeeConfig,
    /// Name of the strategy new futures are executed with.
    pub strategy: String,
    /// Salt used by the `create2` strategy.
    pub create2_salt: B256,
    /// Whether a missing CREATE2 factory may be bootstrapped.
    pub factory_bootstrap: FactoryBootstrapPolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            required_confirmations: defaults::REQUIRED_CONFIRMATIONS,
            block_polling_interval: defaults::BLOCK_POLLING_INTERVAL,
            transaction_lookup_retries: defaults::TRANSACTION_LOOKUP_RETRIES,
            resend: ResendPolicy::default(),
            fees: FeeConfig::default(),
            strategy: defaults::STRATEGY.to_string(),
            create2_salt: B256::ZERO,
            factory_bootstrap: FactoryBootstrapPolicy::default(),
        }
    }
}

impl ExecutionConfig {
    /// Sets the required confirmation depth.
    pub const fn with_required_confirmations(mut self, confirmations: u64) -> Self {
        self.required_confirmations = confirmations;
        self
    }

    /// Sets the polling interval.
    pub const fn with_block_polling_interval(mut self, interval: Duration) -> Self {
        self.block_polling_interval = interval;
        self
    }

    /// Sets the strategy used for new futures.
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }
}

/// When an unconfirmed transaction gets resent with higher fees.
///
/// The trigger is purely time based: a transaction that is known to the node but still unmined
/// after [`Self::timeout_before_bumping_fees`] is resent at the same nonce with bumped fees, at
/// most [`Self::max_fee_bumps`] times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResendPolicy {
    /// Time to wait for a known transaction to be mined before bumping its fees.
    #[serde(with = "duration_millis")]
    pub timeout_before_bumping_fees: Duration,
    /// Maximum number of fee bumps before the interaction times out.
    pub max_fee_bumps: u32,
    /// Never bump fees; wait for the original transaction indefinitely.
    pub disable_fee_bumping: bool,
}

impl Default for ResendPolicy {
    fn default() -> Self {
        Self {
            timeout_before_bumping_fees: defaults::TIMEOUT_BEFORE_BUMPING_FEES,
            max_fee_bumps: defaults::MAX_FEE_BUMPS,
            disable_fee_bumping: false,
        }
    }
}

/// Fee policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeeConfig {
    /// Priority fee added on top of the base fee for EIP-1559 transactions.
    pub max_priority_fee_per_gas: u128,
    /// Upper bound for `maxFeePerGas`. Sending fails instead of paying more than this.
    pub max_fee_per_gas_limit: Option<u128>,
    /// Forces legacy transactions with this gas price.
    pub gas_price: Option<u128>,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            max_priority_fee_per_gas: defaults::MAX_PRIORITY_FEE_PER_GAS,
            max_fee_per_gas_limit: None,
            gas_price: None,
        }
    }
}

/// Policy for deploying a missing CREATE2 factory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FactoryBootstrapPolicy {
    /// Bootstrap only on well-known local development chains.
    #[default]
    PermissiveChainsOnly,
    /// Always bootstrap when missing.
    Always,
    /// Never bootstrap; a missing factory is an error.
    Never,
}

impl FactoryBootstrapPolicy {
    /// Returns whether a missing factory may be deployed on the given chain.
    pub fn allows(self, chain_id: u64) -> bool {
        match self {
            Self::PermissiveChainsOnly => PERMISSIVE_CHAIN_IDS.contains(&chain_id),
            Self::Always => true,
            Self::Never => false,
        }
    }
}

mod duration_millis {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ExecutionConfig =
            serde_json::from_str(r#"{"requiredConfirmations": 1, "blockPollingInterval": 50}"#)
                .unwrap();
        assert_eq!(config.required_confirmations, 1);
        assert_eq!(config.block_polling_interval, Duration::from_millis(50));
        assert_eq!(config.resend, ResendPolicy::default());
        assert_eq!(config.strategy, "basic");
    }

    #[test]
    fn test_bootstrap_policy() {
        assert!(FactoryBootstrapPolicy::PermissiveChainsOnly.allows(31337));
        assert!(!FactoryBootstrapPolicy::PermissiveChainsOnly.allows(1));
        assert!(FactoryBootstrapPolicy::Always.allows(1));
        assert!(!FactoryBootstrapPolicy::Never.allows(31337));
    }
}
