//! The load generator binary.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::process::ExitCode;

use anyhow::Result;

fn main() -> Result<ExitCode> {
    loadgen_server::cli::execute()
}
