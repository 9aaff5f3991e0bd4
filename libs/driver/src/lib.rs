//! # skiff-driver
//!
//! Scheduler driver for frameworks running against a resource-management
//! master. The driver registers the framework, tracks the offers it may act
//! on, launches and kills tasks, and makes sure every status update carrying
//! a UUID is acknowledged at most once.
//!
//! ## Architecture
//!
//! ```text
//!  framework ──ops──▶ Driver ──Call──▶ Transport ──▶ master
//!      ▲               │  ▲                 │
//!      │          lock │  │ ingest          │ Inbound
//!      │               ▼  │                 ▼
//!      └──callbacks── dispatcher ◀──── inbound queue
//! ```
//!
//! - [`connection`]: registration state machine
//! - [`offers`]: offer tracker
//! - [`ledger`]: pending-acknowledgment ledger
//! - [`Driver`]: the facade; implements [`SchedulerDriver`]
//! - the dispatcher delivers [`Scheduler`] callbacks one at a time, in
//!   arrival order
//!
//! ## Example
//!
//! ```ignore
//! let driver = Driver::new(MyScheduler::default(), transport, DriverConfig::from_env()?);
//! driver.run().await?;
//! ```

pub mod backoff;
pub mod config;
pub mod connection;
mod dispatcher;
mod driver;
pub mod error;
pub mod ledger;
pub mod offers;
pub mod scheduler;

pub use backoff::BackoffPolicy;
pub use config::DriverConfig;
pub use connection::DriverState;
pub use driver::Driver;
pub use error::{DriverError, DriverResult};
pub use ledger::{PendingAck, Receipt};
pub use scheduler::{Scheduler, SchedulerDriver};
