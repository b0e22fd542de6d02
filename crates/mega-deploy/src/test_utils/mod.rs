//! Test utilities for the deployment engine.

mod fixtures;
mod ledger;

pub use fixtures::*;
pub use ledger::*;
