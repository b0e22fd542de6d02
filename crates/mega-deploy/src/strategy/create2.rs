use alloy_primitives::{keccak256, Address, Bytes, B256};

use super::{
    deployment_init_code, expect_transaction, onchain_request, BasicStrategy, ExecutionStrategy,
    InteractionOutcome, StrategyContext, StrategyError, StrategyStep,
};
use crate::{
    constants::{CREATE2_FACTORY_ADDRESS, CREATE2_FACTORY_DEPLOYMENT_TX},
    ExecutionConfig, ExecutionKind, ExecutionResult, ExecutionState, FactoryPrerequisite,
    StrategyConfig, SuccessPayload,
};

/// Deploys contracts through the deterministic deployment proxy, so their addresses only depend on
/// the salt and the init code.
///
/// Every other kind of future is executed like the [`BasicStrategy`] does.
#[derive(Debug, Clone, Copy, Default)]
pub struct Create2Strategy;

impl Create2Strategy {
    /// Name of the strategy.
    pub const NAME: &'static str = "create2";

    /// Returns the address `init_code` is deployed to with `salt`.
    pub fn deployment_address(salt: B256, init_code: &[u8]) -> Address {
        CREATE2_FACTORY_ADDRESS.create2(salt, keccak256(init_code))
    }

    /// Returns the proxy calldata deploying `init_code` with `salt`.
    pub fn factory_calldata(salt: B256, init_code: &[u8]) -> Bytes {
        let mut data = Vec::with_capacity(32 + init_code.len());
        data.extend_from_slice(salt.as_slice());
        data.extend_from_slice(init_code);
        data.into()
    }
}

impl ExecutionStrategy for Create2Strategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn config(&self, config: &ExecutionConfig) -> StrategyConfig {
        StrategyConfig { salt: Some(config.create2_salt) }
    }

    fn step(
        &self,
        state: &ExecutionState,
        outcomes: &[InteractionOutcome<'_>],
        ctx: &StrategyContext<'_>,
    ) -> Result<StrategyStep, StrategyError> {
        let ExecutionKind::Deployment { artifact_id, constructor_args, libraries, value } =
            &state.kind
        else {
            return BasicStrategy.step(state, outcomes, ctx);
        };

        let salt = state.strategy_config.salt.unwrap_or_default();
        let init_code = deployment_init_code(ctx, artifact_id, constructor_args, libraries)?;
        let Some(outcome) = outcomes.first() else {
            let data = Self::factory_calldata(salt, &init_code);
            return onchain_request(state, Some(CREATE2_FACTORY_ADDRESS), data, *value);
        };

        let (hash, receipt) = expect_transaction(state, outcome)?;
        if !receipt.is_success() {
            return Ok(StrategyStep::Done(ExecutionResult::Reverted { tx_hash: hash }));
        }
        let address = Self::deployment_address(salt, &init_code);
        Ok(StrategyStep::success(SuccessPayload::Deployment { address }))
    }

    fn bootstrap(&self) -> Option<FactoryPrerequisite> {
        Some(FactoryPrerequisite {
            address: CREATE2_FACTORY_ADDRESS,
            deployment_tx: CREATE2_FACTORY_DEPLOYMENT_TX,
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, b256, bytes};

    use super::*;
    use crate::{
        test_utils::{self, receipt},
        NetworkInteractionRequest, PresignedDeployment,
    };

    #[test]
    fn test_deployment_address() {
        // EIP-1014 example 0 with the proxy as deployer
        let address = Create2Strategy::deployment_address(B256::ZERO, &bytes!("00"));
        assert_eq!(address, CREATE2_FACTORY_ADDRESS.create2(B256::ZERO, keccak256([0u8])));
        let other_salt = Create2Strategy::deployment_address(B256::repeat_byte(1), &bytes!("00"));
        assert_ne!(address, other_salt);
    }

    #[test]
    fn test_deploys_through_factory() {
        let salt = b256!("0000000000000000000000000000000000000000000000000000000000000042");
        let mut state = test_utils::deployment_state("Counter#Counter", "Counter", &["1"]);
        state.strategy = Create2Strategy::NAME.to_string();
        state.strategy_config =
            Create2Strategy.config(&ExecutionConfig { create2_salt: salt, ..Default::default() });

        let artifacts = test_utils::artifacts();
        let ctx = StrategyContext { artifacts: &artifacts };
        let StrategyStep::Suspend(request) = Create2Strategy.step(&state, &[], &ctx).unwrap() else {
            panic!("expected a request")
        };
        let NetworkInteractionRequest::OnchainInteraction { to, data, .. } = &request else {
            panic!("expected an onchain interaction")
        };
        assert_eq!(*to, Some(CREATE2_FACTORY_ADDRESS));
        assert_eq!(&data[..32], salt.as_slice());
        let expected = Create2Strategy::deployment_address(salt, &data[32..]);

        let hash = B256::repeat_byte(3);
        test_utils::confirm(&mut state, request, hash, receipt(true, None));
        let outcomes = InteractionOutcome::collect(&state);
        assert_eq!(
            Create2Strategy.step(&state, &outcomes, &ctx).unwrap(),
            StrategyStep::success(SuccessPayload::Deployment { address: expected })
        );
    }

    #[test]
    fn test_bootstrap_prerequisite_matches_factory() {
        let prerequisite = Create2Strategy.bootstrap().unwrap();
        let deployment = PresignedDeployment::decode(prerequisite.deployment_tx).unwrap();
        assert_eq!(deployment.deployed_address(), prerequisite.address);
        assert_eq!(prerequisite.address, address!("4e59b44847b379578588920ca78fbf26c0b4956c"));
    }
}
