//! The deployment-state reducer.
//!
//! [`reduce`] is a pure function from a state and a message to the next state. It never repairs
//! anything: a message that does not fit the state it is applied to means the journal is corrupt
//! or was written by an incompatible engine, and is reported as a [`ReducerError`].

use alloy_primitives::B256;

use crate::{
    DeploymentState, ExecutionState, ExecutionStatus, JournalMessage, NetworkInteraction,
    OnchainInteraction, StaticCallInteraction,
};

/// A journal message that cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReducerError {
    /// The journal was written against another chain.
    #[error("journal belongs to chain {journal}, not chain {run}")]
    ChainMismatch {
        /// Chain id recorded in the journal.
        journal: u64,
        /// Chain id of the new run.
        run: u64,
    },
    /// A message references a future without execution state.
    #[error("{kind} references unknown future {future_id}")]
    UnknownFuture {
        /// Message type.
        kind: &'static str,
        /// The future id.
        future_id: String,
    },
    /// A future was initialized twice.
    #[error("future {0} is already initialized")]
    AlreadyInitialized(String),
    /// A message tries to change a terminal execution state.
    #[error("{kind} for future {future_id}, which is already {status:?}")]
    Terminal {
        /// Message type.
        kind: &'static str,
        /// The future id.
        future_id: String,
        /// Its terminal status.
        status: ExecutionStatus,
    },
    /// A message references an interaction other than the one expected.
    #[error("{kind} for future {future_id} references interaction {found}, expected {expected}")]
    UnexpectedInteraction {
        /// Message type.
        kind: &'static str,
        /// The future id.
        future_id: String,
        /// The expected interaction id.
        expected: u32,
        /// The referenced interaction id.
        found: u32,
    },
    /// A new interaction was requested while the last one is still in flight.
    #[error("future {future_id} requested an interaction while {in_flight} is in flight")]
    InteractionInFlight {
        /// The future id.
        future_id: String,
        /// Id of the in-flight interaction.
        in_flight: u32,
    },
    /// A message expects another kind of interaction.
    #[error("{kind} for future {future_id}: interaction {id} has the wrong type")]
    WrongInteractionType {
        /// Message type.
        kind: &'static str,
        /// The future id.
        future_id: String,
        /// The interaction id.
        id: u32,
    },
    /// An interaction got a second nonce.
    #[error("interaction {id} of future {future_id} already has nonce {current}, got {new}")]
    NonceReassigned {
        /// The future id.
        future_id: String,
        /// The interaction id.
        id: u32,
        /// Nonce already assigned.
        current: u64,
        /// Nonce of the message.
        new: u64,
    },
    /// A message targets an interaction that is already complete.
    #[error("{kind} for future {future_id}: interaction {id} is already complete")]
    AlreadyComplete {
        /// Message type.
        kind: &'static str,
        /// The future id.
        future_id: String,
        /// The interaction id.
        id: u32,
    },
    /// A confirmation or bump references no recorded transaction.
    #[error("interaction {id} of future {future_id} has no transaction {hash}")]
    UnknownTransaction {
        /// The future id.
        future_id: String,
        /// The interaction id.
        id: u32,
        /// The hash.
        hash: B256,
    },
    /// A bump or drop targets an interaction that has never been broadcast.
    #[error("{kind} for future {future_id}: interaction {id} was never sent")]
    NotSent {
        /// Message type.
        kind: &'static str,
        /// The future id.
        future_id: String,
        /// The interaction id.
        id: u32,
    },
}

/// Applies `message` to `state`, returning the next state.
pub fn reduce(
    mut state: DeploymentState,
    message: &JournalMessage,
) -> Result<DeploymentState, ReducerError> {
    apply(&mut state, message)?;
    Ok(state)
}

/// Folds `messages` into the empty state.
pub fn replay<'a>(
    messages: impl IntoIterator<Item = &'a JournalMessage>,
) -> Result<DeploymentState, ReducerError> {
    messages.into_iter().try_fold(DeploymentState::default(), reduce)
}

/// Applies `message` to `state` in place.
///
/// On error the state is left unchanged.
pub fn apply(state: &mut DeploymentState, message: &JournalMessage) -> Result<(), ReducerError> {
    let kind = message.kind();
    match message {
        JournalMessage::RunStart { chain_id } => match state.chain_id {
            Some(journal) if journal != *chain_id => {
                Err(ReducerError::ChainMismatch { journal, run: *chain_id })
            }
            _ => {
                state.chain_id = Some(*chain_id);
                Ok(())
            }
        },
        JournalMessage::ExecutionStateInitialize {
            future_id,
            future_type,
            strategy,
            strategy_config,
            dependencies,
            from,
            kind: execution_kind,
        } => {
            if state.execution_states.contains_key(future_id) {
                return Err(ReducerError::AlreadyInitialized(future_id.clone()));
            }
            state.execution_states.insert(
                future_id.clone(),
                ExecutionState {
                    id: future_id.clone(),
                    future_type: *future_type,
                    strategy: strategy.clone(),
                    strategy_config: strategy_config.clone(),
                    status: ExecutionStatus::Started,
                    dependencies: dependencies.clone(),
                    from: *from,
                    kind: execution_kind.clone(),
                    network_interactions: Vec::new(),
                    result: None,
                },
            );
            Ok(())
        }
        JournalMessage::ExecutionStateComplete { future_id, result } => {
            let execution = active_state(state, kind, future_id)?;
            execution.status = result.status();
            execution.result = Some(result.clone());
            Ok(())
        }
        JournalMessage::NetworkInteractionRequest { future_id, interaction } => {
            let execution = active_state(state, kind, future_id)?;
            if let Some(last) = execution.last_interaction().filter(|last| !last.is_complete()) {
                return Err(ReducerError::InteractionInFlight {
                    future_id: future_id.clone(),
                    in_flight: last.id(),
                });
            }
            let expected = execution.next_interaction_id();
            if interaction.id() != expected {
                return Err(ReducerError::UnexpectedInteraction {
                    kind,
                    future_id: future_id.clone(),
                    expected,
                    found: interaction.id(),
                });
            }
            execution.network_interactions.push(interaction.clone().into_interaction());
            Ok(())
        }
        JournalMessage::TransactionPrepareSend { future_id, network_interaction_id, nonce } => {
            let interaction = open_onchain(state, kind, future_id, *network_interaction_id)?;
            match interaction.nonce {
                Some(current) => Err(ReducerError::NonceReassigned {
                    future_id: future_id.clone(),
                    id: *network_interaction_id,
                    current,
                    new: *nonce,
                }),
                None => {
                    interaction.nonce = Some(*nonce);
                    Ok(())
                }
            }
        }
        JournalMessage::TransactionSend {
            future_id,
            network_interaction_id,
            nonce,
            transaction,
        } => {
            let interaction = open_onchain(state, kind, future_id, *network_interaction_id)?;
            if let Some(current) = interaction.nonce.filter(|current| current != nonce) {
                return Err(ReducerError::NonceReassigned {
                    future_id: future_id.clone(),
                    id: *network_interaction_id,
                    current,
                    new: *nonce,
                });
            }
            interaction.nonce = Some(*nonce);
            interaction.transactions.push(transaction.clone());
            interaction.should_be_resent = false;
            Ok(())
        }
        JournalMessage::TransactionConfirm { future_id, network_interaction_id, hash, receipt } => {
            let interaction = open_onchain(state, kind, future_id, *network_interaction_id)?;
            let Some(transaction) = interaction.transactions.iter_mut().find(|tx| tx.hash == *hash)
            else {
                return Err(ReducerError::UnknownTransaction {
                    future_id: future_id.clone(),
                    id: *network_interaction_id,
                    hash: *hash,
                });
            };
            transaction.receipt = Some(receipt.clone());
            interaction.should_be_resent = false;
            Ok(())
        }
        JournalMessage::StaticCallComplete { future_id, network_interaction_id, result } => {
            let call = open_static_call(state, kind, future_id, *network_interaction_id)?;
            call.result = Some(result.clone());
            Ok(())
        }
        JournalMessage::OnchainInteractionBumpFees { future_id, network_interaction_id }
        | JournalMessage::OnchainInteractionDropped { future_id, network_interaction_id } => {
            let interaction = open_onchain(state, kind, future_id, *network_interaction_id)?;
            if interaction.transactions.is_empty() {
                return Err(ReducerError::NotSent {
                    kind,
                    future_id: future_id.clone(),
                    id: *network_interaction_id,
                });
            }
            interaction.should_be_resent = true;
            Ok(())
        }
        JournalMessage::OnchainInteractionReplacedByUser { future_id, network_interaction_id } => {
            let interaction = open_onchain(state, kind, future_id, *network_interaction_id)?;
            interaction.nonce = None;
            interaction.transactions.clear();
            interaction.should_be_resent = false;
            Ok(())
        }
        JournalMessage::OnchainInteractionTimeout { future_id, network_interaction_id } => {
            open_onchain(state, kind, future_id, *network_interaction_id)?;
            active_state(state, kind, future_id)?.status = ExecutionStatus::Timeout;
            Ok(())
        }
    }
}

fn active_state<'a>(
    state: &'a mut DeploymentState,
    kind: &'static str,
    future_id: &str,
) -> Result<&'a mut ExecutionState, ReducerError> {
    let execution = state
        .execution_states
        .get_mut(future_id)
        .ok_or_else(|| ReducerError::UnknownFuture { kind, future_id: future_id.to_string() })?;
    if execution.status.is_terminal() {
        return Err(ReducerError::Terminal {
            kind,
            future_id: future_id.to_string(),
            status: execution.status,
        });
    }
    Ok(execution)
}

/// Returns the last interaction of a non-terminal state, checking that it has id `id`.
fn last_interaction<'a>(
    state: &'a mut DeploymentState,
    kind: &'static str,
    future_id: &str,
    id: u32,
) -> Result<&'a mut NetworkInteraction, ReducerError> {
    let execution = active_state(state, kind, future_id)?;
    let expected = execution.network_interactions.len() as u32;
    match execution.network_interactions.last_mut() {
        Some(last) if last.id() == id => Ok(last),
        _ => Err(ReducerError::UnexpectedInteraction {
            kind,
            future_id: future_id.to_string(),
            expected,
            found: id,
        }),
    }
}

fn open_onchain<'a>(
    state: &'a mut DeploymentState,
    kind: &'static str,
    future_id: &str,
    id: u32,
) -> Result<&'a mut OnchainInteraction, ReducerError> {
    match last_interaction(state, kind, future_id, id)? {
        NetworkInteraction::OnchainInteraction(interaction) if interaction.is_confirmed() => {
            Err(ReducerError::AlreadyComplete { kind, future_id: future_id.to_string(), id })
        }
        NetworkInteraction::OnchainInteraction(interaction) => Ok(interaction),
        NetworkInteraction::StaticCall(_) => {
            Err(ReducerError::WrongInteractionType { kind, future_id: future_id.to_string(), id })
        }
    }
}

fn open_static_call<'a>(
    state: &'a mut DeploymentState,
    kind: &'static str,
    future_id: &str,
    id: u32,
) -> Result<&'a mut StaticCallInteraction, ReducerError> {
    match last_interaction(state, kind, future_id, id)? {
        NetworkInteraction::StaticCall(call) if call.result.is_some() => {
            Err(ReducerError::AlreadyComplete { kind, future_id: future_id.to_string(), id })
        }
        NetworkInteraction::StaticCall(call) => Ok(call),
        NetworkInteraction::OnchainInteraction(_) => {
            Err(ReducerError::WrongInteractionType { kind, future_id: future_id.to_string(), id })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use alloy_primitives::{address, Address, Bytes, U256};

    use super::*;
    use crate::{
        ExecutionKind, ExecutionResult, FutureType, NetworkFees, NetworkInteractionRequest,
        ReceiptStatus, StrategyConfig, SuccessPayload, Transaction, TransactionReceipt,
    };

    const SENDER: Address = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");

    fn init(id: &str) -> JournalMessage {
        JournalMessage::ExecutionStateInitialize {
            future_id: id.to_string(),
            future_type: FutureType::ContractDeployment,
            strategy: "basic".to_string(),
            strategy_config: StrategyConfig::default(),
            dependencies: BTreeSet::new(),
            from: Some(SENDER),
            kind: ExecutionKind::Deployment {
                artifact_id: id.to_string(),
                constructor_args: vec![],
                libraries: BTreeMap::new(),
                value: U256::ZERO,
            },
        }
    }

    fn request(id: &str, interaction_id: u32) -> JournalMessage {
        JournalMessage::NetworkInteractionRequest {
            future_id: id.to_string(),
            interaction: NetworkInteractionRequest::OnchainInteraction {
                id: interaction_id,
                from: SENDER,
                to: None,
                data: Bytes::from_static(&[0x60, 0x00]),
                value: U256::ZERO,
            },
        }
    }

    fn send(id: &str, nonce: u64, hash: u8) -> JournalMessage {
        JournalMessage::TransactionSend {
            future_id: id.to_string(),
            network_interaction_id: 1,
            nonce,
            transaction: Transaction {
                hash: B256::repeat_byte(hash),
                fees: NetworkFees::Legacy { gas_price: 1_000 },
                receipt: None,
            },
        }
    }

    fn confirm(id: &str, hash: u8) -> JournalMessage {
        JournalMessage::TransactionConfirm {
            future_id: id.to_string(),
            network_interaction_id: 1,
            hash: B256::repeat_byte(hash),
            receipt: TransactionReceipt {
                block_hash: B256::ZERO,
                block_number: 7,
                status: ReceiptStatus::Success,
                contract_address: Some(Address::repeat_byte(0xcc)),
                logs: vec![],
            },
        }
    }

    fn prepare(id: &str, nonce: u64) -> JournalMessage {
        JournalMessage::TransactionPrepareSend {
            future_id: id.to_string(),
            network_interaction_id: 1,
            nonce,
        }
    }

    fn interaction(state: &DeploymentState, id: &str) -> OnchainInteraction {
        state.get(id).unwrap().network_interactions[0].as_onchain().unwrap().clone()
    }

    #[test]
    fn test_full_lifecycle() {
        let messages = vec![
            JournalMessage::RunStart { chain_id: 31337 },
            init("Token"),
            request("Token", 1),
            prepare("Token", 0),
            send("Token", 0, 1),
            confirm("Token", 1),
            JournalMessage::ExecutionStateComplete {
                future_id: "Token".into(),
                result: ExecutionResult::Success {
                    payload: SuccessPayload::Deployment { address: Address::repeat_byte(0xcc) },
                },
            },
        ];
        let state = replay(&messages).unwrap();
        let token = state.get("Token").unwrap();
        assert_eq!(state.chain_id, Some(31337));
        assert_eq!(token.status, ExecutionStatus::Success);
        assert_eq!(token.success_address(), Some(Address::repeat_byte(0xcc)));
        assert!(interaction(&state, "Token").is_confirmed());

        // Replaying is deterministic.
        assert_eq!(replay(&messages).unwrap(), state);
    }

    #[test]
    fn test_unknown_future_is_rejected() {
        let err = replay(&[request("Missing", 1)]).unwrap_err();
        assert_eq!(
            err,
            ReducerError::UnknownFuture {
                kind: "NETWORK_INTERACTION_REQUEST",
                future_id: "Missing".into()
            }
        );
    }

    #[test]
    fn test_interaction_ids_must_be_sequential() {
        let err = replay(&[init("A"), request("A", 2)]).unwrap_err();
        assert!(matches!(err, ReducerError::UnexpectedInteraction { expected: 1, found: 2, .. }));

        let err = replay(&[init("A"), request("A", 1), request("A", 2)]).unwrap_err();
        assert!(matches!(err, ReducerError::InteractionInFlight { in_flight: 1, .. }));
    }

    #[test]
    fn test_nonce_is_assigned_once() {
        let err =
            replay(&[init("A"), request("A", 1), prepare("A", 3), prepare("A", 4)]).unwrap_err();
        assert!(matches!(err, ReducerError::NonceReassigned { current: 3, new: 4, .. }));

        let err =
            replay(&[init("A"), request("A", 1), prepare("A", 3), send("A", 5, 1)]).unwrap_err();
        assert!(matches!(err, ReducerError::NonceReassigned { current: 3, new: 5, .. }));
    }

    #[test]
    fn test_at_most_one_confirmation() {
        let err = replay(&[
            init("A"),
            request("A", 1),
            send("A", 0, 1),
            JournalMessage::OnchainInteractionBumpFees {
                future_id: "A".into(),
                network_interaction_id: 1,
            },
            send("A", 0, 2),
            confirm("A", 2),
            confirm("A", 1),
        ])
        .unwrap_err();
        assert!(matches!(err, ReducerError::AlreadyComplete { id: 1, .. }));
    }

    #[test]
    fn test_liveness_messages_reopen_interaction() {
        let base = vec![init("A"), request("A", 1), prepare("A", 4), send("A", 4, 1)];

        let mut dropped = base.clone();
        dropped.push(JournalMessage::OnchainInteractionDropped {
            future_id: "A".into(),
            network_interaction_id: 1,
        });
        let state = replay(&dropped).unwrap();
        let ni = interaction(&state, "A");
        assert!(ni.should_be_resent);
        assert_eq!(ni.nonce, Some(4));

        let mut replaced = base.clone();
        replaced.push(JournalMessage::OnchainInteractionReplacedByUser {
            future_id: "A".into(),
            network_interaction_id: 1,
        });
        let state = replay(&replaced).unwrap();
        let ni = interaction(&state, "A");
        assert_eq!(ni.nonce, None);
        assert!(ni.transactions.is_empty());
        assert_eq!(state.status("A"), ExecutionStatus::Started);

        let mut timeout = base;
        timeout.push(JournalMessage::OnchainInteractionTimeout {
            future_id: "A".into(),
            network_interaction_id: 1,
        });
        timeout.push(send("A", 4, 2));
        let err = replay(&timeout).unwrap_err();
        assert!(matches!(err, ReducerError::Terminal { status: ExecutionStatus::Timeout, .. }));
    }

    #[test]
    fn test_chain_mismatch() {
        let err = replay(&[
            JournalMessage::RunStart { chain_id: 1 },
            JournalMessage::RunStart { chain_id: 2 },
        ])
        .unwrap_err();
        assert_eq!(err, ReducerError::ChainMismatch { journal: 1, run: 2 });
    }
}
