//! Command line front end of the `mega-deploy` engine.
//!
//! Deploys a set of futures against a JSON-RPC node, resuming from the journal of earlier runs, and
//! inspects the journal of a deployment directory.

use clap::Parser;

mod artifacts;
mod cmd;
mod deploy;
mod error;
mod logging;
mod status;

pub use artifacts::*;
pub use cmd::*;
pub use error::*;
pub use logging::*;

#[tokio::main]
async fn main() -> std::result::Result<(), DeployerError> {
    set_thread_panic_hook();
    let cli = Cli::parse();
    cli.log_args.init()?;
    cli.command.run().await.inspect_err(|e| eprintln!("{e}"))
}

/// Sets thread panic hook, so a panic in any task terminates the process.
fn set_thread_panic_hook() {
    use std::{
        backtrace::Backtrace,
        panic::{set_hook, take_hook},
        process::exit,
    };
    let orig_hook = take_hook();
    set_hook(Box::new(move |panic_info| {
        eprintln!("Custom backtrace: {}", Backtrace::capture());
        orig_hook(panic_info);
        exit(1);
    }));
}
