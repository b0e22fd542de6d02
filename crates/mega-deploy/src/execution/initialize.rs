//! Turning a future into the initialization message of its execution state.
//!
//! Every argument is resolved here, once, and the resolved values are snapshotted in the message.

use alloy_primitives::{Address, U256};
use tracing::debug;

use super::{EngineError, ExecutionEngine, ResolveError};
use crate::{
    decode_event_argument, find_event, views::find_confirmed_receipt, Argument, ArtifactLoader,
    DeploymentState, ExecutionKind, ExecutionResult, ExecutionState, Future, FutureKind, Journal,
    JournalMessage,
};

/// Resolves future arguments against a deployment state.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Resolver<'a> {
    pub(crate) state: &'a DeploymentState,
    pub(crate) accounts: &'a [Address],
}

impl Resolver<'_> {
    /// Resolves an argument to the string form the ABI coercion expects.
    pub(crate) fn resolve(&self, argument: &Argument) -> Result<String, ResolveError> {
        match argument {
            Argument::Literal(value) => Ok(value.clone()),
            Argument::Account(index) => self
                .accounts
                .get(*index)
                .map(ToString::to_string)
                .ok_or(ResolveError::UnknownAccount(*index)),
            Argument::Future(id) => self
                .state
                .get(id)
                .and_then(|execution| match &execution.result {
                    Some(ExecutionResult::Success { payload }) => payload.as_argument(),
                    _ => None,
                })
                .ok_or_else(|| ResolveError::MissingValue(id.clone())),
        }
    }

    pub(crate) fn resolve_address(&self, argument: &Argument) -> Result<Address, ResolveError> {
        let value = self.resolve(argument)?;
        value.parse().map_err(|_| ResolveError::InvalidAddress(value))
    }

    fn resolve_all<'b>(
        &self,
        arguments: impl IntoIterator<Item = &'b Argument>,
    ) -> Result<Vec<String>, ResolveError> {
        arguments.into_iter().map(|argument| self.resolve(argument)).collect()
    }

    /// The sender of a future, the first account when none is given.
    fn resolve_from(&self, from: Option<&Argument>) -> Result<Address, ResolveError> {
        match from {
            Some(argument) => self.resolve_address(argument),
            None => self.accounts.first().copied().ok_or(ResolveError::UnknownAccount(0)),
        }
    }

    /// Resolves `kind` into the sender and the snapshotted execution kind.
    pub(crate) fn resolve_kind(
        &self,
        kind: &FutureKind,
        artifacts: &dyn ArtifactLoader,
    ) -> Result<(Option<Address>, ExecutionKind), ResolveError> {
        let resolved = match kind {
            FutureKind::ContractDeployment {
                artifact_id,
                constructor_args,
                libraries,
                value,
                from,
            } => (
                Some(self.resolve_from(from.as_ref())?),
                ExecutionKind::Deployment {
                    artifact_id: artifact_id.clone(),
                    constructor_args: self.resolve_all(constructor_args)?,
                    libraries: libraries
                        .iter()
                        .map(|(name, argument)| Ok((name.clone(), self.resolve_address(argument)?)))
                        .collect::<Result<_, ResolveError>>()?,
                    value: *value,
                },
            ),
            FutureKind::LibraryDeployment { artifact_id, libraries, from } => (
                Some(self.resolve_from(from.as_ref())?),
                ExecutionKind::Deployment {
                    artifact_id: artifact_id.clone(),
                    constructor_args: Vec::new(),
                    libraries: libraries
                        .iter()
                        .map(|(name, argument)| Ok((name.clone(), self.resolve_address(argument)?)))
                        .collect::<Result<_, ResolveError>>()?,
                    value: U256::ZERO,
                },
            ),
            FutureKind::ContractCall {
                contract,
                artifact_id,
                function_name,
                args,
                value,
                from,
            } => (
                Some(self.resolve_from(from.as_ref())?),
                ExecutionKind::Call {
                    contract_address: self.resolve_address(contract)?,
                    artifact_id: artifact_id.clone(),
                    function_name: function_name.clone(),
                    args: self.resolve_all(args)?,
                    value: *value,
                },
            ),
            FutureKind::StaticCall {
                contract,
                artifact_id,
                function_name,
                args,
                name_or_index,
                from,
            } => (
                Some(self.resolve_from(from.as_ref())?),
                ExecutionKind::StaticCall {
                    contract_address: self.resolve_address(contract)?,
                    artifact_id: artifact_id.clone(),
                    function_name: function_name.clone(),
                    args: self.resolve_all(args)?,
                    name_or_index: name_or_index.clone(),
                },
            ),
            FutureKind::SendData { to, data, value, from } => (
                Some(self.resolve_from(from.as_ref())?),
                ExecutionKind::SendData {
                    to: self.resolve_address(to)?,
                    data: data.clone(),
                    value: *value,
                },
            ),
            FutureKind::ContractAt { contract_name, address } => (
                None,
                ExecutionKind::ContractAt {
                    contract_name: contract_name.clone(),
                    address: self.resolve_address(address)?,
                },
            ),
            FutureKind::ReadEventArgument {
                future_id,
                artifact_id,
                event_name,
                event_index,
                name_or_index,
                emitter,
            } => {
                let emitting = self
                    .state
                    .get(future_id)
                    .ok_or_else(|| ResolveError::MissingReceipt(future_id.clone()))?;
                let (tx_hash, receipt) = find_confirmed_receipt(emitting)
                    .ok_or_else(|| ResolveError::MissingReceipt(future_id.clone()))?;
                let emitter = match emitter {
                    Some(argument) => self.resolve_address(argument)?,
                    None => default_emitter(emitting)
                        .ok_or_else(|| ResolveError::MissingEmitter(future_id.clone()))?,
                };
                let artifact = artifacts.load_artifact(artifact_id)?;
                let event = find_event(&artifact.abi, event_name)?;
                let value = decode_event_argument(
                    event,
                    &receipt.logs,
                    emitter,
                    *event_index,
                    name_or_index,
                )?;
                (
                    None,
                    ExecutionKind::ReadEventArgument {
                        event_name: event_name.clone(),
                        event_index: *event_index,
                        name_or_index: name_or_index.clone(),
                        emitter,
                        tx_hash,
                        value,
                    },
                )
            }
        };
        Ok(resolved)
    }
}

/// The contract a future interacted with: its deployment, or the target of its call.
fn default_emitter(execution: &ExecutionState) -> Option<Address> {
    execution.success_address().or(match &execution.kind {
        ExecutionKind::Call { contract_address, .. } => Some(*contract_address),
        ExecutionKind::SendData { to, .. } => Some(*to),
        _ => None,
    })
}

impl<J: Journal> ExecutionEngine<J> {
    /// Resolves `future` and records the initialization of its execution state.
    pub(super) fn initialize_future(&mut self, future: &Future) -> Result<(), EngineError> {
        let strategy = self.strategy(&self.config.strategy)?;
        let resolver = Resolver { state: &self.state, accounts: &self.accounts };
        let (from, kind) = resolver
            .resolve_kind(&future.kind, self.artifacts.as_ref())
            .map_err(|source| EngineError::Initialize { future_id: future.id.clone(), source })?;

        debug!(future_id = %future.id, strategy = strategy.name(), ?from, "Initializing future");
        self.record(JournalMessage::ExecutionStateInitialize {
            future_id: future.id.clone(),
            future_type: future.kind.future_type(),
            strategy: strategy.name().to_string(),
            strategy_config: strategy.config(&self.config),
            dependencies: future.all_dependencies(),
            from,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, B256};

    use super::*;
    use crate::{
        test_utils::{self, accounts, incremented_log, receipt, DEPLOYER, SECOND_ACCOUNT},
        ExecutionStatus, Log, NameOrIndex, SuccessPayload,
    };

    const COUNTER: Address = address!("5fbdb2315678afecb367f032d93f642f64180aa3");

    fn deployed_counter() -> DeploymentState {
        let mut state = test_utils::deployment_state("Counter#Counter", "Counter", &["1"]);
        state.status = ExecutionStatus::Success;
        state.result = Some(ExecutionResult::Success {
            payload: SuccessPayload::Deployment { address: COUNTER },
        });
        let mut deployment = DeploymentState::default();
        deployment.execution_states.insert(state.id.clone(), state);
        deployment
    }

    #[test]
    fn test_resolve_arguments() {
        let deployment = deployed_counter();
        let accounts = accounts();
        let resolver = Resolver { state: &deployment, accounts: &accounts };

        assert_eq!(resolver.resolve(&Argument::literal(5)).unwrap(), "5");
        assert_eq!(resolver.resolve_address(&Argument::Account(1)).unwrap(), SECOND_ACCOUNT);
        assert_eq!(
            resolver.resolve_address(&Argument::future("Counter#Counter")).unwrap(),
            COUNTER
        );
        assert!(matches!(
            resolver.resolve(&Argument::Account(7)),
            Err(ResolveError::UnknownAccount(7))
        ));
        assert!(matches!(
            resolver.resolve(&Argument::future("Missing")),
            Err(ResolveError::MissingValue(id)) if id == "Missing"
        ));
        assert!(matches!(
            resolver.resolve_address(&Argument::literal("hello")),
            Err(ResolveError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_resolve_call_defaults_to_first_account() {
        let deployment = deployed_counter();
        let accounts = accounts();
        let resolver = Resolver { state: &deployment, accounts: &accounts };
        let kind = FutureKind::ContractCall {
            contract: Argument::future("Counter#Counter"),
            artifact_id: "Counter".into(),
            function_name: "setCount".into(),
            args: vec![Argument::literal(42)],
            value: U256::ZERO,
            from: None,
        };

        let (from, kind) = resolver.resolve_kind(&kind, &test_utils::artifacts()).unwrap();
        assert_eq!(from, Some(DEPLOYER));
        assert_eq!(
            kind,
            ExecutionKind::Call {
                contract_address: COUNTER,
                artifact_id: "Counter".into(),
                function_name: "setCount".into(),
                args: vec!["42".into()],
                value: U256::ZERO,
            }
        );
    }

    #[test]
    fn test_resolve_event_argument() {
        let mut deployment = DeploymentState::default();
        let mut call = test_utils::call_state("Counter#increment", COUNTER, "increment", &[]);
        let (topics, data) = incremented_log(DEPLOYER, 2);
        let mut mined = receipt(true, None);
        mined.logs.push(Log { address: COUNTER, log_index: 0, data, topics });
        let request = crate::NetworkInteractionRequest::OnchainInteraction {
            id: 1,
            from: DEPLOYER,
            to: Some(COUNTER),
            data: Default::default(),
            value: U256::ZERO,
        };
        test_utils::confirm(&mut call, request, B256::repeat_byte(7), mined);
        call.status = ExecutionStatus::Success;
        call.result = Some(ExecutionResult::Success { payload: SuccessPayload::Call });
        deployment.execution_states.insert(call.id.clone(), call);

        let accounts = accounts();
        let resolver = Resolver { state: &deployment, accounts: &accounts };
        let kind = FutureKind::ReadEventArgument {
            future_id: "Counter#increment".into(),
            artifact_id: "Counter".into(),
            event_name: "Incremented".into(),
            event_index: 0,
            name_or_index: NameOrIndex::Name("value".into()),
            emitter: None,
        };

        let (from, kind) = resolver.resolve_kind(&kind, &test_utils::artifacts()).unwrap();
        assert_eq!(from, None);
        let ExecutionKind::ReadEventArgument { emitter, tx_hash, value, .. } = kind else {
            panic!("expected an event read")
        };
        assert_eq!(emitter, COUNTER);
        assert_eq!(tx_hash, B256::repeat_byte(7));
        assert_eq!(value, "2");
    }

    #[test]
    fn test_resolve_event_argument_without_receipt() {
        let deployment = deployed_counter();
        let accounts = accounts();
        let resolver = Resolver { state: &deployment, accounts: &accounts };
        let kind = FutureKind::ReadEventArgument {
            future_id: "Counter#Counter".into(),
            artifact_id: "Counter".into(),
            event_name: "Incremented".into(),
            event_index: 0,
            name_or_index: NameOrIndex::Index(0),
            emitter: None,
        };
        assert!(matches!(
            resolver.resolve_kind(&kind, &test_utils::artifacts()),
            Err(ResolveError::MissingReceipt(_))
        ));
    }
}
