//! The `loadgen` command line application.
//!
//! This builds on top of the [`loadgen_service`] and exposes the controller, the node-side
//! scheduler and offline analysis as subcommands, configured through [`config::Config`].

pub mod cli;
pub mod config;
pub mod observability;
pub mod summary;
