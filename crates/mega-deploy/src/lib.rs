//! Resumable deployment engine for EVM networks.
//!
//! The engine drives a graph of [`Future`]s (deployments, calls, value transfers and static reads)
//! to completion against a remote ledger. All progress is recorded as [`JournalMessage`]s; the
//! in-memory [`DeploymentState`] is always a pure fold of the journal, so a run can be stopped at
//! any message boundary and resumed later without duplicating on-chain effects.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

// enables TLS for the HTTP transport
use alloy_transport_http as _;

pub mod constants;

mod abi;
pub use abi::*;

mod artifact;
pub use artifact::*;

mod config;
pub use config::*;

mod execution;
pub use execution::*;

mod future;
pub use future::*;

mod journal;
pub use journal::*;

pub mod ledger;

mod reducer;
pub use reducer::*;

mod state;
pub use state::*;

pub mod strategy;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub mod views;
