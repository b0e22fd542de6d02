use core::fmt;

use alloy_primitives::{Address, Bytes, FixedBytes, B256, U256};
use serde::{Deserialize, Serialize};

/// Terminal result of an execution state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionResult {
    /// The future completed.
    Success {
        /// Kind-specific payload.
        payload: SuccessPayload,
    },
    /// The transaction was mined but reverted.
    #[serde(rename_all = "camelCase")]
    Reverted {
        /// Hash of the reverted transaction.
        tx_hash: B256,
    },
    /// The static call failed or its result could not be decoded.
    StaticCallError {
        /// Decoded failure.
        error: EvmExecutionFailure,
    },
    /// Gas estimation showed the transaction would fail; nothing was broadcast.
    SimulationError {
        /// Decoded failure.
        error: EvmExecutionFailure,
    },
    /// The strategy could not proceed.
    StrategyError {
        /// What went wrong.
        message: String,
    },
    /// The strategy put the future on hold.
    #[serde(rename_all = "camelCase")]
    StrategyHeld {
        /// Strategy-defined hold id.
        held_id: u32,
        /// Why the future is held.
        reason: String,
    },
}

impl ExecutionResult {
    /// Returns whether this is a success result.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns the execution status a state with this result ends in.
    pub const fn status(&self) -> super::ExecutionStatus {
        match self {
            Self::Success { .. } => super::ExecutionStatus::Success,
            Self::StrategyHeld { .. } => super::ExecutionStatus::Held,
            _ => super::ExecutionStatus::Failed,
        }
    }

    /// Returns a human-readable failure description, `None` for successes.
    pub fn failure_message(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::Reverted { tx_hash } => Some(format!("transaction {tx_hash} reverted")),
            Self::StaticCallError { error } => Some(format!("static call failed: {error}")),
            Self::SimulationError { error } => {
                Some(format!("simulating transaction failed: {error}"))
            }
            Self::StrategyError { message } => Some(message.clone()),
            Self::StrategyHeld { held_id, reason } => Some(format!("held ({held_id}): {reason}")),
        }
    }
}

/// Kind-specific payload of a successful execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuccessPayload {
    /// A contract or library was deployed.
    Deployment {
        /// Deployed address.
        address: Address,
    },
    /// A contract call was confirmed.
    Call,
    /// A raw transaction was confirmed.
    SendData,
    /// A static call returned.
    StaticCall {
        /// The selected return value, rendered as a string.
        value: String,
    },
    /// An existing contract was registered.
    ContractAt {
        /// Registered address.
        address: Address,
    },
    /// An event argument was read.
    ReadEventArgument {
        /// The argument, rendered as a string.
        value: String,
    },
}

impl SuccessPayload {
    /// Returns the address for payloads that carry one.
    pub const fn address(&self) -> Option<Address> {
        match self {
            Self::Deployment { address } | Self::ContractAt { address } => Some(*address),
            _ => None,
        }
    }

    /// Returns the value this payload contributes when used as an argument of another future.
    pub fn as_argument(&self) -> Option<String> {
        match self {
            Self::Deployment { address } | Self::ContractAt { address } => {
                Some(address.to_string())
            }
            Self::StaticCall { value } | Self::ReadEventArgument { value } => Some(value.clone()),
            Self::Call | Self::SendData => None,
        }
    }
}

/// A decoded EVM execution failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvmExecutionFailure {
    /// Reverted with empty data.
    RevertWithoutReason,
    /// Reverted with `Error(string)`.
    RevertWithReason {
        /// The revert message.
        message: String,
    },
    /// Reverted with `Panic(uint256)`.
    RevertWithPanicCode {
        /// The panic code.
        code: U256,
        /// Name of the panic code.
        name: String,
    },
    /// Reverted with a custom error known to the strategy's error decoder.
    RevertWithCustomError {
        /// Error name.
        name: String,
        /// Decoded arguments.
        args: Vec<String>,
    },
    /// Reverted with a custom error selector nobody recognized.
    RevertWithUnknownCustomError {
        /// The 4-byte selector.
        selector: FixedBytes<4>,
        /// Full revert data.
        data: Bytes,
    },
    /// Reverted with data that is not an ABI-encoded error.
    RevertWithInvalidData {
        /// Revert data.
        data: Bytes,
    },
    /// The call succeeded but its return data could not be decoded.
    InvalidResultError {
        /// Return data.
        data: Bytes,
        /// Decode error.
        error: String,
    },
}

impl fmt::Display for EvmExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RevertWithoutReason => f.write_str("reverted without a reason"),
            Self::RevertWithReason { message } => write!(f, "reverted with reason \"{message}\""),
            Self::RevertWithPanicCode { code, name } => {
                write!(f, "reverted with panic code {code:#x} ({name})")
            }
            Self::RevertWithCustomError { name, args } => {
                write!(f, "reverted with custom error {name}({})", args.join(", "))
            }
            Self::RevertWithUnknownCustomError { selector, data } => {
                write!(f, "reverted with unknown custom error {selector} (data: {data})")
            }
            Self::RevertWithInvalidData { data } => write!(f, "reverted with invalid data {data}"),
            Self::InvalidResultError { data, error } => {
                write!(f, "returned invalid data {data}: {error}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_messages() {
        let result = ExecutionResult::SimulationError {
            error: EvmExecutionFailure::RevertWithReason { message: "nope".into() },
        };
        assert_eq!(
            result.failure_message().unwrap(),
            "simulating transaction failed: reverted with reason \"nope\""
        );
        assert_eq!(result.status(), crate::ExecutionStatus::Failed);

        let held = ExecutionResult::StrategyHeld { held_id: 3, reason: "waiting".into() };
        assert_eq!(held.status(), crate::ExecutionStatus::Held);

        let success = ExecutionResult::Success {
            payload: SuccessPayload::Deployment { address: Address::ZERO },
        };
        assert!(success.failure_message().is_none());
    }

    #[test]
    fn test_result_json_shape() {
        let result = ExecutionResult::Success {
            payload: SuccessPayload::StaticCall { value: "42".into() },
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "SUCCESS",
                "payload": {"kind": "STATIC_CALL", "value": "42"}
            })
        );
    }
}
