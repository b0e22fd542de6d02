//! Execution strategies.
//!
//! A strategy turns the resolved execution state of a future into the network interactions that
//! realize it. It never performs I/O: each call to [`ExecutionStrategy::step`] sees the outcomes of
//! all completed interactions and either requests the next interaction or returns the terminal
//! result. Because those outcomes are rebuilt from the journal, a resumed run re-enters a strategy
//! at exactly the point where it was suspended.

use core::fmt;
use std::{collections::BTreeMap, sync::Arc};

use alloy_primitives::{Address, Bytes, B256, U256};

use crate::{
    AbiError, ArtifactError, ArtifactLoader, ErrorDecoder, ExecutionConfig, ExecutionKind,
    ExecutionResult, ExecutionState, FactoryPrerequisite, NetworkInteraction,
    NetworkInteractionRequest, RawStaticCallResult, StrategyConfig, SuccessPayload,
    TransactionReceipt,
};

mod basic;
pub use basic::BasicStrategy;

mod create2;
pub use create2::Create2Strategy;

/// Errors that keep a strategy from making progress.
///
/// The engine records them as [`ExecutionResult::StrategyError`]; they fail the future, not the
/// run.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    /// An artifact could not be loaded or linked.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    /// Arguments could not be encoded or results decoded.
    #[error(transparent)]
    Abi(#[from] AbiError),
    /// The execution state has no sender.
    #[error("future {0} has no sender")]
    MissingSender(String),
    /// A successful contract creation receipt carries no contract address.
    #[error("deployment transaction {0} succeeded without creating a contract")]
    MissingContractAddress(B256),
    /// An outcome does not match the interaction the strategy requested.
    #[error("unexpected outcome of interaction {id} of future {future_id}")]
    UnexpectedOutcome {
        /// The future id.
        future_id: String,
        /// The interaction id.
        id: u32,
    },
}

/// The outcome of a completed network interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionOutcome<'a> {
    /// A transaction was confirmed.
    Transaction {
        /// Interaction id.
        id: u32,
        /// Hash of the confirmed transaction.
        hash: B256,
        /// Its receipt.
        receipt: &'a TransactionReceipt,
    },
    /// A static call returned or reverted.
    StaticCall {
        /// Interaction id.
        id: u32,
        /// The raw result.
        result: &'a RawStaticCallResult,
    },
}

impl<'a> InteractionOutcome<'a> {
    /// Collects the outcomes of the completed interactions of `state`, in order.
    pub fn collect(state: &'a ExecutionState) -> Vec<Self> {
        state
            .network_interactions
            .iter()
            .filter_map(|interaction| match interaction {
                NetworkInteraction::OnchainInteraction(onchain) => {
                    let tx = onchain.confirmed_transaction()?;
                    let receipt = tx.receipt.as_ref()?;
                    Some(Self::Transaction { id: onchain.id, hash: tx.hash, receipt })
                }
                NetworkInteraction::StaticCall(call) => {
                    call.result.as_ref().map(|result| Self::StaticCall { id: call.id, result })
                }
            })
            .collect()
    }

    /// Returns the id of the interaction.
    pub const fn id(&self) -> u32 {
        match self {
            Self::Transaction { id, .. } | Self::StaticCall { id, .. } => *id,
        }
    }
}

/// What a strategy wants next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyStep {
    /// Perform a network interaction and call the strategy again with its outcome.
    Suspend(NetworkInteractionRequest),
    /// The future is complete.
    Done(ExecutionResult),
}

impl StrategyStep {
    /// Completes the future successfully.
    pub const fn success(payload: SuccessPayload) -> Self {
        Self::Done(ExecutionResult::Success { payload })
    }
}

/// Inputs a strategy may read besides the execution state.
#[derive(Clone, Copy)]
pub struct StrategyContext<'a> {
    /// Source of compiled artifacts.
    pub artifacts: &'a dyn ArtifactLoader,
}

impl fmt::Debug for StrategyContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyContext").finish_non_exhaustive()
    }
}

/// A policy producing the network interactions of a future.
pub trait ExecutionStrategy: Send + Sync + fmt::Debug {
    /// Name under which the strategy is registered and recorded in execution states.
    fn name(&self) -> &'static str;

    /// Strategy configuration snapshotted into new execution states.
    fn config(&self, _config: &ExecutionConfig) -> StrategyConfig {
        StrategyConfig::default()
    }

    /// Advances the future by one step.
    ///
    /// `outcomes` holds the outcomes of all completed interactions of `state`, in order. The
    /// engine only calls this while no interaction is in flight.
    fn step(
        &self,
        state: &ExecutionState,
        outcomes: &[InteractionOutcome<'_>],
        ctx: &StrategyContext<'_>,
    ) -> Result<StrategyStep, StrategyError>;

    /// Returns the decoder for custom errors the future's contract may revert with.
    fn error_decoder(&self, state: &ExecutionState, ctx: &StrategyContext<'_>) -> ErrorDecoder {
        artifact_error_decoder(state, ctx)
    }

    /// Returns a contract that must exist before this strategy can run.
    fn bootstrap(&self) -> Option<FactoryPrerequisite> {
        None
    }
}

/// Strategies available to an engine, by name.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    strategies: BTreeMap<&'static str, Arc<dyn ExecutionStrategy>>,
}

impl Default for StrategyRegistry {
    /// A registry holding the [`BasicStrategy`].
    fn default() -> Self {
        Self::empty().with(BasicStrategy)
    }
}

impl StrategyRegistry {
    /// A registry without strategies.
    pub fn empty() -> Self {
        Self { strategies: BTreeMap::new() }
    }

    /// Registers `strategy`, replacing any strategy of the same name.
    pub fn register(&mut self, strategy: impl ExecutionStrategy + 'static) {
        self.strategies.insert(strategy.name(), Arc::new(strategy));
    }

    /// Builder variant of [`Self::register`].
    pub fn with(mut self, strategy: impl ExecutionStrategy + 'static) -> Self {
        self.register(strategy);
        self
    }

    /// Looks up a strategy.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ExecutionStrategy>> {
        self.strategies.get(name).cloned()
    }

    /// Returns the registered names.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.strategies.keys().copied()
    }
}

/// Builds the custom-error decoder from the artifact of the future's contract, if it has one.
pub fn artifact_error_decoder(state: &ExecutionState, ctx: &StrategyContext<'_>) -> ErrorDecoder {
    let artifact_id = match &state.kind {
        ExecutionKind::Deployment { artifact_id, .. }
        | ExecutionKind::Call { artifact_id, .. }
        | ExecutionKind::StaticCall { artifact_id, .. } => artifact_id,
        _ => return ErrorDecoder::empty(),
    };
    ctx.artifacts
        .load_artifact(artifact_id)
        .map(|artifact| ErrorDecoder::from_abi(&artifact.abi))
        .unwrap_or_default()
}

/// Links the artifact and appends the encoded constructor arguments.
pub(crate) fn deployment_init_code(
    ctx: &StrategyContext<'_>,
    artifact_id: &str,
    constructor_args: &[String],
    libraries: &BTreeMap<String, Address>,
) -> Result<Bytes, StrategyError> {
    let artifact = ctx.artifacts.load_artifact(artifact_id)?;
    let bytecode = artifact.link(libraries)?;
    let args = crate::encode_constructor_args(&artifact.abi, constructor_args)?;
    let mut init_code = bytecode.to_vec();
    init_code.extend_from_slice(&args);
    Ok(init_code.into())
}

/// Requests the next onchain interaction of `state`.
pub(crate) fn onchain_request(
    state: &ExecutionState,
    to: Option<Address>,
    data: Bytes,
    value: U256,
) -> Result<StrategyStep, StrategyError> {
    let from = state.from.ok_or_else(|| StrategyError::MissingSender(state.id.clone()))?;
    Ok(StrategyStep::Suspend(NetworkInteractionRequest::OnchainInteraction {
        id: state.next_interaction_id(),
        from,
        to,
        data,
        value,
    }))
}

/// Returns the confirmed transaction an outcome must be.
pub(crate) fn expect_transaction<'a>(
    state: &ExecutionState,
    outcome: &InteractionOutcome<'a>,
) -> Result<(B256, &'a TransactionReceipt), StrategyError> {
    match *outcome {
        InteractionOutcome::Transaction { hash, receipt, .. } => Ok((hash, receipt)),
        InteractionOutcome::StaticCall { id, .. } => {
            Err(StrategyError::UnexpectedOutcome { future_id: state.id.clone(), id })
        }
    }
}

