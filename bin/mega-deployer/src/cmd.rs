use std::{io::Write, path::PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::{LogArgs, Result};

/// Name of the journal file inside a deployment directory.
pub const JOURNAL_FILE: &str = "journal.jsonl";

/// Resumable deployments for EVM networks
#[derive(Parser, Debug)]
#[command(infer_subcommands = true, version = "0.1")]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: MainCmd,

    /// Logging configuration
    #[command(flatten)]
    pub log_args: LogArgs,
}

/// Main command enumeration for the mega-deployer CLI tool
#[derive(Subcommand, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum MainCmd {
    /// Deploy a set of futures, resuming an earlier run of the same deployment
    Deploy(crate::deploy::Cmd),
    /// Show the status of every future of a deployment
    Status(crate::status::StatusCmd),
    /// List the transactions a deployment has sent
    Transactions(crate::status::TransactionsCmd),
}

impl MainCmd {
    /// Execute the main command
    pub async fn run(&self) -> Result<()> {
        match self {
            Self::Deploy(cmd) => cmd.run().await,
            Self::Status(cmd) => cmd.run(),
            Self::Transactions(cmd) => cmd.run(),
        }
    }
}

/// Location of a deployment on disk.
#[derive(Parser, Debug, Clone)]
pub struct DeploymentDirArgs {
    /// Directory holding the journal of the deployment
    #[arg(long = "deployment-dir", visible_aliases = ["dir"], default_value = "deployment")]
    pub deployment_dir: PathBuf,
}

impl DeploymentDirArgs {
    /// Path of the journal.
    pub fn journal_path(&self) -> PathBuf {
        self.deployment_dir.join(JOURNAL_FILE)
    }
}

/// Prints `value` to stdout as pretty JSON.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).map_err(std::io::Error::from)?;
    writeln!(stdout)?;
    Ok(())
}
