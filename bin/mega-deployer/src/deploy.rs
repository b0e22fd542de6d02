use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};

use alloy_primitives::{Address, B256};
use clap::{Parser, ValueEnum};
use mega_deploy::{
    ledger::JsonRpcLedger, views::StatusResult, ExecutionConfig, ExecutionEngine,
    FactoryBootstrapPolicy, FileJournal, Future,
};
use reqwest::Url;
use serde::Serialize;
use tracing::info;

use crate::{print_json, read_json, DeployerError, DeploymentDirArgs, FsArtifactLoader, Result};

/// Deploy a set of futures
#[derive(Parser, Debug)]
pub struct Cmd {
    /// JSON file with the futures to execute
    #[arg(value_name = "FUTURES")]
    pub futures: PathBuf,

    /// Directory of compiled artifacts, one `<artifact id>.json` per contract
    #[arg(long = "artifacts", default_value = "artifacts")]
    pub artifacts: PathBuf,

    /// JSON-RPC endpoint of the node; it signs for the configured accounts
    #[arg(
        long = "rpc-url",
        visible_aliases = ["rpc"],
        env = "MEGA_DEPLOYER_RPC_URL",
        default_value = "http://localhost:8545"
    )]
    pub rpc_url: Url,

    /// Sender accounts, the first one being the default sender
    #[arg(long = "account", visible_aliases = ["from"], required = true)]
    pub accounts: Vec<Address>,

    /// JSON file with the execution configuration; flags override its values
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Deployment directory
    #[command(flatten)]
    pub deployment: DeploymentDirArgs,

    /// Execution configuration overrides
    #[command(flatten)]
    pub execution: ExecutionArgs,
}

/// When to deploy a missing CREATE2 factory.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BootstrapArg {
    /// Only on local development chains
    Permissive,
    /// Whenever it is missing
    Always,
    /// Never
    Never,
}

impl From<BootstrapArg> for FactoryBootstrapPolicy {
    fn from(arg: BootstrapArg) -> Self {
        match arg {
            BootstrapArg::Permissive => Self::PermissiveChainsOnly,
            BootstrapArg::Always => Self::Always,
            BootstrapArg::Never => Self::Never,
        }
    }
}

/// Flags overriding the execution configuration.
#[derive(Parser, Debug, Clone, Default)]
pub struct ExecutionArgs {
    /// Blocks a receipt must be buried under before it counts as confirmed
    #[arg(long = "confirmations")]
    pub confirmations: Option<u64>,

    /// Interval between two polls of the node, in milliseconds
    #[arg(long = "polling-interval")]
    pub polling_interval_ms: Option<u64>,

    /// Seconds a pending transaction may wait before it is resent with bumped fees
    #[arg(long = "fee-bump-timeout")]
    pub fee_bump_timeout_secs: Option<u64>,

    /// Maximum number of fee bumps per transaction
    #[arg(long = "max-fee-bumps")]
    pub max_fee_bumps: Option<u32>,

    /// Never bump fees
    #[arg(long = "disable-fee-bumping")]
    pub disable_fee_bumping: bool,

    /// Priority fee in wei added on top of the base fee
    #[arg(long = "priority-fee")]
    pub priority_fee: Option<u128>,

    /// Refuse to pay a max fee per gas above this many wei
    #[arg(long = "max-fee-per-gas")]
    pub max_fee_per_gas: Option<u128>,

    /// Send legacy transactions with this gas price in wei
    #[arg(long = "gas-price")]
    pub gas_price: Option<u128>,

    /// Strategy for futures that have not started yet
    #[arg(long = "strategy")]
    pub strategy: Option<String>,

    /// Salt of the create2 strategy
    #[arg(long = "create2-salt")]
    pub create2_salt: Option<B256>,

    /// When to deploy a missing CREATE2 factory
    #[arg(long = "bootstrap-factory", value_enum)]
    pub bootstrap_factory: Option<BootstrapArg>,
}

impl ExecutionArgs {
    /// Overrides the values of `config` that were given on the command line.
    pub fn apply(&self, config: &mut ExecutionConfig) {
        if let Some(confirmations) = self.confirmations {
            config.required_confirmations = confirmations;
        }
        if let Some(interval) = self.polling_interval_ms {
            config.block_polling_interval = Duration::from_millis(interval);
        }
        if let Some(timeout) = self.fee_bump_timeout_secs {
            config.resend.timeout_before_bumping_fees = Duration::from_secs(timeout);
        }
        if let Some(bumps) = self.max_fee_bumps {
            config.resend.max_fee_bumps = bumps;
        }
        config.resend.disable_fee_bumping |= self.disable_fee_bumping;
        if let Some(fee) = self.priority_fee {
            config.fees.max_priority_fee_per_gas = fee;
        }
        if self.max_fee_per_gas.is_some() {
            config.fees.max_fee_per_gas_limit = self.max_fee_per_gas;
        }
        if self.gas_price.is_some() {
            config.fees.gas_price = self.gas_price;
        }
        if let Some(ref strategy) = self.strategy {
            config.strategy.clone_from(strategy);
        }
        if let Some(salt) = self.create2_salt {
            config.create2_salt = salt;
        }
        if let Some(policy) = self.bootstrap_factory {
            config.factory_bootstrap = policy.into();
        }
    }
}

/// Printed when a session ends.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentReport<'a> {
    status: &'a StatusResult,
    deployed_contracts: BTreeMap<String, Address>,
}

impl Cmd {
    /// Loads the inputs and runs an engine session.
    pub async fn run(&self) -> Result<()> {
        let mut config = match &self.config {
            Some(path) => read_json(path)?,
            None => ExecutionConfig::default(),
        };
        self.execution.apply(&mut config);

        let futures: Vec<Future> = read_json(&self.futures)?;
        if futures.is_empty() {
            let message = format!("{} has no futures", self.futures.display());
            return Err(DeployerError::InvalidInput(message));
        }

        let journal_path = self.deployment.journal_path();
        let journal = FileJournal::open(&journal_path)?;
        info!(
            journal = %journal_path.display(),
            rpc = %self.rpc_url,
            futures = futures.len(),
            "Loaded deployment"
        );

        let ledger = Arc::new(JsonRpcLedger::new(self.rpc_url.clone()));
        let artifacts = Arc::new(FsArtifactLoader::new(&self.artifacts));
        let mut engine = ExecutionEngine::new(ledger, artifacts, journal)
            .with_config(config)
            .with_accounts(self.accounts.clone());
        let result = engine.execute(&futures).await?;

        print_json(&DeploymentReport {
            status: &result.status,
            deployed_contracts: result.deployed_contracts(),
        })?;
        if result.is_success() {
            return Ok(());
        }
        Err(DeployerError::Incomplete {
            failed: result.status.failed.len(),
            timed_out: result.status.timed_out.len(),
            held: result.status.held.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::{Cli, MainCmd};

    #[test]
    fn test_parses_deploy_command() {
        let cli = Cli::try_parse_from([
            "mega-deployer",
            "deploy",
            "futures.json",
            "--account",
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
            "--dir",
            "out",
            "--confirmations",
            "2",
            "-vvv",
        ])
        .unwrap();
        let MainCmd::Deploy(cmd) = cli.command else { panic!("expected deploy") };
        assert_eq!(cmd.futures, PathBuf::from("futures.json"));
        assert_eq!(cmd.accounts.len(), 1);
        assert_eq!(cmd.deployment.journal_path(), PathBuf::from("out").join("journal.jsonl"));
        assert_eq!(cmd.execution.confirmations, Some(2));
        assert_eq!(cli.log_args.verbose, 3);
    }

    #[test]
    fn test_deploy_requires_an_account() {
        assert!(Cli::try_parse_from(["mega-deployer", "deploy", "futures.json"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let mut config =
            ExecutionConfig::default().with_required_confirmations(7).with_strategy("create2");
        let args = ExecutionArgs {
            polling_interval_ms: Some(250),
            gas_price: Some(5),
            disable_fee_bumping: true,
            bootstrap_factory: Some(BootstrapArg::Never),
            ..Default::default()
        };
        args.apply(&mut config);

        assert_eq!(config.required_confirmations, 7);
        assert_eq!(config.strategy, "create2");
        assert_eq!(config.block_polling_interval, Duration::from_millis(250));
        assert_eq!(config.fees.gas_price, Some(5));
        assert!(config.resend.disable_fee_bumping);
        assert_eq!(config.factory_bootstrap, FactoryBootstrapPolicy::Never);
    }
}
