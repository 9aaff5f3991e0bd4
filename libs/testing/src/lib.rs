//! # skiff-testing
//!
//! Test support for code built on the scheduler driver.
//!
//! - [`SimMaster`]: an in-process master reached through a [`SimTransport`].
//!   Tests read the calls the driver sends and inject events and link
//!   failures by hand.
//! - [`fixtures`]: builders for offers, tasks and status updates.

pub mod fixtures;
mod sim;

pub use sim::{SimMaster, SimTransport};
