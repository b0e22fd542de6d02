use super::{
    deployment_init_code, expect_transaction, onchain_request, ExecutionStrategy,
    InteractionOutcome, StrategyContext, StrategyError, StrategyStep,
};
use crate::{
    decode_function_result, encode_function_call, EvmExecutionFailure, ExecutionKind,
    ExecutionResult, ExecutionState, NetworkInteractionRequest, SuccessPayload,
};

/// Executes every future with a single interaction: one transaction for deployments, calls and
/// raw sends, one `eth_call` for static calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicStrategy;

impl BasicStrategy {
    /// Name of the strategy.
    pub const NAME: &'static str = "basic";
}

impl ExecutionStrategy for BasicStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn step(
        &self,
        state: &ExecutionState,
        outcomes: &[InteractionOutcome<'_>],
        ctx: &StrategyContext<'_>,
    ) -> Result<StrategyStep, StrategyError> {
        match &state.kind {
            ExecutionKind::Deployment { artifact_id, constructor_args, libraries, value } => {
                let Some(outcome) = outcomes.first() else {
                    let init_code =
                        deployment_init_code(ctx, artifact_id, constructor_args, libraries)?;
                    return onchain_request(state, None, init_code, *value);
                };
                let (hash, receipt) = expect_transaction(state, outcome)?;
                if !receipt.is_success() {
                    return Ok(StrategyStep::Done(ExecutionResult::Reverted { tx_hash: hash }));
                }
                let address =
                    receipt.contract_address.ok_or(StrategyError::MissingContractAddress(hash))?;
                Ok(StrategyStep::success(SuccessPayload::Deployment { address }))
            }
            ExecutionKind::Call { contract_address, artifact_id, function_name, args, value } => {
                let Some(outcome) = outcomes.first() else {
                    let artifact = ctx.artifacts.load_artifact(artifact_id)?;
                    let data = encode_function_call(&artifact.abi, function_name, args)?;
                    return onchain_request(state, Some(*contract_address), data, *value);
                };
                confirmed(state, outcome, SuccessPayload::Call)
            }
            ExecutionKind::SendData { to, data, value } => {
                let Some(outcome) = outcomes.first() else {
                    return onchain_request(state, Some(*to), data.clone(), *value);
                };
                confirmed(state, outcome, SuccessPayload::SendData)
            }
            ExecutionKind::StaticCall {
                contract_address,
                artifact_id,
                function_name,
                args,
                name_or_index,
            } => {
                let artifact = ctx.artifacts.load_artifact(artifact_id)?;
                let Some(outcome) = outcomes.first() else {
                    let from =
                        state.from.ok_or_else(|| StrategyError::MissingSender(state.id.clone()))?;
                    let data = encode_function_call(&artifact.abi, function_name, args)?;
                    return Ok(StrategyStep::Suspend(NetworkInteractionRequest::StaticCall {
                        id: state.next_interaction_id(),
                        from,
                        to: *contract_address,
                        data,
                        value: Default::default(),
                    }));
                };
                let InteractionOutcome::StaticCall { result, .. } = *outcome else {
                    return Err(StrategyError::UnexpectedOutcome {
                        future_id: state.id.clone(),
                        id: outcome.id(),
                    });
                };
                if !result.success {
                    let error = self.error_decoder(state, ctx).decode(&result.return_data);
                    return Ok(StrategyStep::Done(ExecutionResult::StaticCallError { error }));
                }
                let decoded = decode_function_result(
                    &artifact.abi,
                    function_name,
                    args.len(),
                    &result.return_data,
                    name_or_index.as_ref(),
                );
                Ok(match decoded {
                    Ok(value) => StrategyStep::success(SuccessPayload::StaticCall { value }),
                    Err(err) => StrategyStep::Done(ExecutionResult::StaticCallError {
                        error: EvmExecutionFailure::InvalidResultError {
                            data: result.return_data.clone(),
                            error: err.to_string(),
                        },
                    }),
                })
            }
            ExecutionKind::ContractAt { address, .. } => {
                Ok(StrategyStep::success(SuccessPayload::ContractAt { address: *address }))
            }
            ExecutionKind::ReadEventArgument { value, .. } => {
                let payload = SuccessPayload::ReadEventArgument { value: value.clone() };
                Ok(StrategyStep::success(payload))
            }
        }
    }
}

/// Completes a single-transaction future from its confirmed receipt.
fn confirmed(
    state: &ExecutionState,
    outcome: &InteractionOutcome<'_>,
    payload: SuccessPayload,
) -> Result<StrategyStep, StrategyError> {
    let (hash, receipt) = expect_transaction(state, outcome)?;
    if receipt.is_success() {
        Ok(StrategyStep::success(payload))
    } else {
        Ok(StrategyStep::Done(ExecutionResult::Reverted { tx_hash: hash }))
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, b256, Address, Bytes, U256};

    use super::*;
    use crate::{
        test_utils::{self, receipt},
        NameOrIndex, RawStaticCallResult,
    };

    fn run(state: &ExecutionState) -> StrategyStep {
        let artifacts = test_utils::artifacts();
        let ctx = StrategyContext { artifacts: &artifacts };
        let outcomes = InteractionOutcome::collect(state);
        BasicStrategy.step(state, &outcomes, &ctx).unwrap()
    }

    #[test]
    fn test_deployment_round_trip() {
        let contract = address!("5fbdb2315678afecb367f032d93f642f64180aa3");
        let hash = b256!("00000000000000000000000000000000000000000000000000000000000000aa");
        let mut state = test_utils::deployment_state("Counter#Counter", "Counter", &["7"]);

        let StrategyStep::Suspend(request) = run(&state) else { panic!("expected a request") };
        let NetworkInteractionRequest::OnchainInteraction { id, to, data, .. } = &request else {
            panic!("expected an onchain interaction")
        };
        assert_eq!((*id, *to), (1, None));
        assert!(data.ends_with(&U256::from(7).to_be_bytes::<32>()));

        test_utils::confirm(&mut state, request, hash, receipt(true, Some(contract)));
        assert_eq!(
            run(&state),
            StrategyStep::success(SuccessPayload::Deployment { address: contract })
        );
    }

    #[test]
    fn test_reverted_call() {
        let hash = b256!("00000000000000000000000000000000000000000000000000000000000000bb");
        let mut state =
            test_utils::call_state("Counter#increment", Address::repeat_byte(1), "increment", &[]);

        let StrategyStep::Suspend(request) = run(&state) else { panic!("expected a request") };
        test_utils::confirm(&mut state, request, hash, receipt(false, None));
        assert_eq!(run(&state), StrategyStep::Done(ExecutionResult::Reverted { tx_hash: hash }));
    }

    #[test]
    fn test_static_call_result_selection() {
        let mut state = test_utils::static_call_state(
            "Counter#count",
            Address::repeat_byte(1),
            "count",
            Some(NameOrIndex::Name("value".into())),
        );
        let StrategyStep::Suspend(request) = run(&state) else { panic!("expected a request") };
        assert!(matches!(request, NetworkInteractionRequest::StaticCall { id: 1, .. }));

        let data = Bytes::from(U256::from(42).to_be_bytes::<32>().to_vec());
        test_utils::complete_static_call(&mut state, request, RawStaticCallResult::success(data));
        assert_eq!(
            run(&state),
            StrategyStep::success(SuccessPayload::StaticCall { value: "42".into() })
        );
    }

    #[test]
    fn test_static_call_failures() {
        let request_state = || {
            test_utils::static_call_state("Counter#count", Address::repeat_byte(1), "count", None)
        };

        // reverted with a custom error of the artifact
        let mut state = request_state();
        let StrategyStep::Suspend(request) = run(&state) else { panic!("expected a request") };
        let mut revert = test_utils::unauthorized_error(Address::repeat_byte(2)).to_vec();
        let reverted = RawStaticCallResult::revert(revert.clone().into());
        test_utils::complete_static_call(&mut state, request, reverted);
        let StrategyStep::Done(ExecutionResult::StaticCallError { error }) = run(&state) else {
            panic!("expected a static call error")
        };
        assert!(matches!(
            error,
            EvmExecutionFailure::RevertWithCustomError { ref name, .. } if name == "Unauthorized"
        ));

        // returned data that does not decode
        let mut state = request_state();
        let StrategyStep::Suspend(request) = run(&state) else { panic!("expected a request") };
        revert.truncate(3);
        let returned = RawStaticCallResult::success(revert.into());
        test_utils::complete_static_call(&mut state, request, returned);
        assert!(matches!(
            run(&state),
            StrategyStep::Done(ExecutionResult::StaticCallError {
                error: EvmExecutionFailure::InvalidResultError { .. }
            })
        ));
    }

    #[test]
    fn test_missing_artifact_is_a_strategy_error() {
        let state = test_utils::deployment_state("Missing#Missing", "Missing", &[]);
        let artifacts = test_utils::artifacts();
        let ctx = StrategyContext { artifacts: &artifacts };
        let err = BasicStrategy.step(&state, &[], &ctx).unwrap_err();
        assert!(matches!(err, StrategyError::Artifact(_)));
    }
}
