//! Read-only inspection of a deployment journal.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use clap::Parser;
use mega_deploy::{
    replay,
    views::{find_deployed_contracts, find_status, list_transactions, StatusResult},
    DeploymentState, FileJournal, Journal, JournalMessage,
};
use serde::Serialize;
use tracing::debug;

use crate::{print_json, DeployerError, DeploymentDirArgs, Result};

/// Show the status of a deployment
#[derive(Parser, Debug)]
pub struct StatusCmd {
    /// Deployment directory
    #[command(flatten)]
    pub deployment: DeploymentDirArgs,
}

/// List the transactions of a deployment
#[derive(Parser, Debug)]
pub struct TransactionsCmd {
    /// Deployment directory
    #[command(flatten)]
    pub deployment: DeploymentDirArgs,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    chain_id: Option<u64>,
    status: StatusResult,
    deployed_contracts: BTreeMap<String, Address>,
}

impl StatusCmd {
    /// Replays the journal and prints the futures by status.
    pub fn run(&self) -> Result<()> {
        let (_, state) = load(&self.deployment)?;
        print_json(&StatusReport {
            chain_id: state.chain_id,
            status: find_status(&state),
            deployed_contracts: find_deployed_contracts(&state),
        })
    }
}

impl TransactionsCmd {
    /// Replays the journal and prints every broadcast transaction.
    pub fn run(&self) -> Result<()> {
        let (messages, state) = load(&self.deployment)?;
        print_json(&list_transactions(&messages, &state))
    }
}

/// Reads the journal of an existing deployment and folds it.
fn load(deployment: &DeploymentDirArgs) -> Result<(Vec<JournalMessage>, DeploymentState)> {
    let path = deployment.journal_path();
    if !path.is_file() {
        let message = format!("no deployment journal at {}", path.display());
        return Err(DeployerError::InvalidInput(message));
    }
    let messages = FileJournal::open(&path)?.read()?;
    let state = replay(&messages)?;
    debug!(path = %path.display(), messages = messages.len(), "Replayed journal");
    Ok((messages, state))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_load_replays_journal() {
        let dir = tempfile::tempdir().unwrap();
        let deployment = DeploymentDirArgs { deployment_dir: dir.path().to_path_buf() };
        assert!(matches!(load(&deployment), Err(DeployerError::InvalidInput(_))));

        let mut journal = FileJournal::open(deployment.journal_path()).unwrap();
        journal.record(&JournalMessage::RunStart { chain_id: 31337 }).unwrap();
        drop(journal);

        let (messages, state) = load(&deployment).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(state.chain_id, Some(31337));
        assert!(find_status(&state).is_success());
    }

    #[test]
    fn test_missing_directory() {
        let deployment =
            DeploymentDirArgs { deployment_dir: PathBuf::from("/nonexistent/deployment") };
        assert!(matches!(load(&deployment), Err(DeployerError::InvalidInput(_))));
    }
}
