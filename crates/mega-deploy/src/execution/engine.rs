use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use alloy_primitives::Address;
use tracing::{debug, info, warn};

use super::{ensure_factory, monitor::InteractionWatch, sync_nonces, BootstrapOutcome, EngineError};
use crate::{
    apply, batch_futures,
    ledger::{BlockTag, LedgerClient, TransactionRequest},
    replay,
    strategy::{
        ExecutionStrategy, InteractionOutcome, StrategyContext, StrategyRegistry, StrategyStep,
    },
    views::{find_deployed_contracts, find_status, next_action_for_future, NextAction, StatusResult},
    ArtifactLoader, DeploymentState, ExecutionConfig, ExecutionResult, ExecutionState,
    ExecutionStatus, Future, Journal, JournalMessage, NetworkInteraction,
};

/// Outcome of an engine session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentResult {
    /// The deployment state after the session.
    pub state: DeploymentState,
    /// Futures bucketed by status.
    pub status: StatusResult,
}

impl DeploymentResult {
    fn new(state: DeploymentState) -> Self {
        let status = find_status(&state);
        Self { state, status }
    }

    /// Returns whether every future succeeded.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns the addresses of every deployed or registered contract.
    pub fn deployed_contracts(&self) -> BTreeMap<String, Address> {
        find_deployed_contracts(&self.state)
    }
}

/// Drives futures to completion against a ledger, journaling every step.
///
/// Every change to the deployment state is checked by the reducer, written with [`Journal::record`]
/// and then committed to memory, so the journal alone is enough to resume an interrupted session.
/// One engine session must own a journal at a time.
pub struct ExecutionEngine<J> {
    pub(super) ledger: Arc<dyn LedgerClient>,
    pub(super) artifacts: Arc<dyn ArtifactLoader + Send + Sync>,
    pub(super) strategies: StrategyRegistry,
    pub(super) config: ExecutionConfig,
    pub(super) accounts: Vec<Address>,
    pub(super) journal: J,
    pub(super) state: DeploymentState,
    pub(super) watches: HashMap<(String, u32), InteractionWatch>,
}

impl<J: fmt::Debug> fmt::Debug for ExecutionEngine<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("ledger", &self.ledger)
            .field("strategies", &self.strategies)
            .field("config", &self.config)
            .field("accounts", &self.accounts)
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}

impl<J: Journal> ExecutionEngine<J> {
    /// Creates an engine with the default configuration and strategies and no accounts.
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        artifacts: Arc<dyn ArtifactLoader + Send + Sync>,
        journal: J,
    ) -> Self {
        Self {
            ledger,
            artifacts,
            strategies: StrategyRegistry::default(),
            config: ExecutionConfig::default(),
            accounts: Vec::new(),
            journal,
            state: DeploymentState::default(),
            watches: HashMap::new(),
        }
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the available strategies.
    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    /// Sets the accounts, the first one being the default sender.
    pub fn with_accounts(mut self, accounts: Vec<Address>) -> Self {
        self.accounts = accounts;
        self
    }

    /// The deployment state of the current or last session.
    pub const fn state(&self) -> &DeploymentState {
        &self.state
    }

    /// The journal.
    pub const fn journal(&self) -> &J {
        &self.journal
    }

    /// Consumes the engine, returning the journal.
    pub fn into_journal(self) -> J {
        self.journal
    }

    /// Runs a session over `futures`: resumes from the journal, then advances the futures batch by
    /// batch until every one of them is terminal, or a batch ends with a failure.
    ///
    /// Futures the journal already completed are not touched again.
    pub async fn execute(&mut self, futures: &[Future]) -> Result<DeploymentResult, EngineError> {
        let messages = self.journal.read()?;
        self.state = replay(&messages)?;
        self.watches.clear();
        debug!(
            messages = messages.len(),
            futures = self.state.execution_states.len(),
            "Replayed journal"
        );

        let chain_id = self.ledger.chain_id().await?;
        if let Some(journal) = self.state.chain_id.filter(|journal| *journal != chain_id) {
            return Err(EngineError::ChainMismatch { journal, node: chain_id });
        }
        self.record(JournalMessage::RunStart { chain_id })?;

        let batches = batch_futures(futures)?;
        info!(
            chain_id,
            futures = futures.len(),
            batches = batches.len(),
            resumed = !messages.is_empty(),
            "Starting deployment"
        );

        self.bootstrap(futures, chain_id).await?;
        for message in sync_nonces(self.ledger.as_ref(), &self.state).await? {
            self.record(message)?;
        }

        for (index, batch) in batches.iter().enumerate() {
            self.run_batch(batch).await?;
            let failed: Vec<&str> = batch
                .iter()
                .filter(|future| {
                    matches!(
                        self.state.status(&future.id),
                        ExecutionStatus::Failed | ExecutionStatus::Timeout | ExecutionStatus::Held
                    )
                })
                .map(|future| future.id.as_str())
                .collect();
            if !failed.is_empty() {
                warn!(batch = index, ?failed, "Batch did not succeed, stopping");
                break;
            }
            debug!(batch = index, "Batch complete");
        }

        let result = DeploymentResult::new(self.state.clone());
        info!(
            successful = result.status.successful.len(),
            failed = result.status.failed.len(),
            timed_out = result.status.timed_out.len(),
            held = result.status.held.len(),
            started = result.status.started.len(),
            "Deployment session finished"
        );
        Ok(result)
    }

    /// Folds `message` into a copy of the state, journals it and only then commits the copy.
    ///
    /// A message the reducer rejects never reaches the journal.
    pub(super) fn record(&mut self, message: JournalMessage) -> Result<(), EngineError> {
        let mut next = self.state.clone();
        apply(&mut next, &message)?;
        self.journal.record(&message)?;
        self.state = next;
        Ok(())
    }

    pub(super) fn strategy(&self, name: &str) -> Result<Arc<dyn ExecutionStrategy>, EngineError> {
        self.strategies.get(name).ok_or_else(|| EngineError::UnknownStrategy(name.to_string()))
    }

    /// Deploys the contracts the strategies of unfinished futures rely on.
    async fn bootstrap(&self, futures: &[Future], chain_id: u64) -> Result<(), EngineError> {
        let mut prerequisites = Vec::new();
        for future in futures {
            let name = match self.state.get(&future.id) {
                Some(state) if state.status.is_terminal() => continue,
                Some(state) => state.strategy.as_str(),
                None => self.config.strategy.as_str(),
            };
            if let Some(prerequisite) = self.strategy(name)?.bootstrap() {
                if !prerequisites.contains(&prerequisite) {
                    prerequisites.push(prerequisite);
                }
            }
        }
        for prerequisite in &prerequisites {
            if let BootstrapOutcome::Deployed(hash) =
                ensure_factory(self.ledger.as_ref(), prerequisite, &self.config, chain_id).await?
            {
                info!(address = %prerequisite.address, %hash, "Deployed strategy prerequisite");
            }
        }
        Ok(())
    }

    /// Advances the futures of a batch round-robin until all of them are terminal.
    async fn run_batch(&mut self, batch: &[&Future]) -> Result<(), EngineError> {
        loop {
            let mut running = 0;
            let mut progressed = false;
            for future in batch {
                if self.state.status(&future.id).is_terminal() {
                    continue;
                }
                running += 1;
                progressed |= self.turn(future).await?;
            }
            if running == 0 {
                return Ok(());
            }
            if !progressed {
                tokio::time::sleep(self.config.block_polling_interval).await;
            }
        }
    }

    /// Performs the next step of one future, returning whether a message was recorded.
    async fn turn(&mut self, future: &Future) -> Result<bool, EngineError> {
        let Some(state) = self.state.get(&future.id).cloned() else {
            self.initialize_future(future)?;
            return Ok(true);
        };
        let Some(action) = next_action_for_future(&state) else { return Ok(false) };
        let strategy = self.strategy(&state.strategy)?;
        match action {
            NextAction::RunStrategy => self.run_strategy(&state, strategy.as_ref()).map(|()| true),
            NextAction::SendTransaction => self.send_transaction(&state, strategy.as_ref()).await,
            NextAction::QueryStaticCall => self.query_static_call(&state).await,
            NextAction::WaitForReceipt => self.check_interaction(&state).await,
        }
    }

    fn run_strategy(
        &mut self,
        state: &ExecutionState,
        strategy: &dyn ExecutionStrategy,
    ) -> Result<(), EngineError> {
        let future_id = state.id.clone();
        let step = {
            let ctx = StrategyContext { artifacts: self.artifacts.as_ref() };
            let outcomes = InteractionOutcome::collect(state);
            strategy.step(state, &outcomes, &ctx)
        };
        let message = match step {
            Ok(StrategyStep::Suspend(interaction)) => {
                let id = interaction.id();
                debug!(%future_id, interaction = id, "Requesting network interaction");
                JournalMessage::NetworkInteractionRequest { future_id, interaction }
            }
            Ok(StrategyStep::Done(result)) => {
                match result.failure_message() {
                    Some(message) => warn!(%future_id, %message, "Future failed"),
                    None => info!(%future_id, "Future succeeded"),
                }
                JournalMessage::ExecutionStateComplete { future_id, result }
            }
            Err(err) => {
                warn!(%future_id, %err, "Strategy failed");
                JournalMessage::ExecutionStateComplete {
                    future_id,
                    result: ExecutionResult::StrategyError { message: err.to_string() },
                }
            }
        };
        self.record(message)
    }

    async fn query_static_call(&mut self, state: &ExecutionState) -> Result<bool, EngineError> {
        let Some(call) = state.last_interaction().and_then(NetworkInteraction::as_static_call)
        else {
            return Ok(false);
        };
        let request = TransactionRequest {
            from: call.from,
            to: Some(call.to),
            data: call.data.clone(),
            value: call.value,
            ..Default::default()
        };
        let result = self.ledger.call(&request, BlockTag::Latest).await?;
        debug!(future_id = %state.id, success = result.success, "Static call returned");
        self.record(JournalMessage::StaticCallComplete {
            future_id: state.id.clone(),
            network_interaction_id: call.id,
            result,
        })?;
        Ok(true)
    }
}
