//! Remote-runner subsystem.
//!
//! Runs in the test runner's own process: finds or launches a host,
//! opens the main channel, sends one command, streams results back, and
//! drives the cancellation side-channel.

pub mod cancel;
pub mod client;
pub mod discovery;

pub use client::{execute, RunSummary};
pub use discovery::{connect_or_launch, ConnectedHost};
