use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ExecutionState, ExecutionStatus};

/// State of a whole deployment: the fold of its journal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentState {
    /// Chain id recorded by the first run.
    pub chain_id: Option<u64>,
    /// Execution states by future id.
    pub execution_states: BTreeMap<String, ExecutionState>,
}

impl DeploymentState {
    /// Returns the execution state of a future.
    pub fn get(&self, future_id: &str) -> Option<&ExecutionState> {
        self.execution_states.get(future_id)
    }

    /// Returns the status of a future, `Unstarted` if it has no execution state.
    pub fn status(&self, future_id: &str) -> ExecutionStatus {
        self.get(future_id).map_or(ExecutionStatus::Unstarted, |state| state.status)
    }

    /// Returns whether every execution state is successful.
    pub fn is_all_success(&self) -> bool {
        self.execution_states.values().all(|state| state.status == ExecutionStatus::Success)
    }
}
