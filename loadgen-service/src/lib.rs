//! The service layer schedules, records and analyzes load test runs.
//!
//! On every node a [`NodeRunner`](node::NodeRunner) drives the pushed profiles through
//! [`RampScheduler`]s and records each request into the node's raw logs. The controller
//! orchestrates [`PerformanceRun`](run::PerformanceRun)s and
//! [`FunctionalRun`](run::FunctionalRun)s across the nodes of a [`Provider`], merges their
//! logs and computes [`Stats`] through a [`StatsEngine`].
//!
//! It is designed as a library crate to be used by the `server`.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod error;
pub mod harness;
pub mod icdf;
pub mod log;
pub mod node;
pub mod pool;
mod process;
pub mod provider;
pub mod ramp;
pub mod record;
pub mod remote;
pub mod run;
pub mod session;
pub mod stats;
pub mod status;

pub use error::{CollaboratorError, LogError, RunError, RunResult, SchedulerError};
pub use pool::{NodeCapacity, NodeLease, WorkerPool};
pub use provider::{CommandProvider, Node, Provider, StaticProvider};
pub use ramp::RampScheduler;
pub use remote::{RemoteExecutor, SshExecutor};
pub use session::Session;
pub use stats::{Stats, StatsEngine};
pub use status::RunStatus;
