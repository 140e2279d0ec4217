//! Subprocess helpers shared by the process-backed collaborators.

use std::process::{ExitStatus, Output, Stdio};

use tokio::process::Command;

use crate::error::CollaboratorError;

/// Returns the exit code of a process, `-1` if it was terminated by a signal.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Runs a command to completion, capturing its output.
pub(crate) async fn output(mut command: Command, label: &str) -> Result<Output, CollaboratorError> {
    command
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| CollaboratorError::Spawn {
            program: label.to_owned(),
            source,
        })
}

/// Runs a command and fails unless it exits successfully.
pub(crate) async fn checked(command: Command, label: &str) -> Result<Output, CollaboratorError> {
    let output = output(command, label).await?;
    if !output.status.success() {
        tracing::debug!(
            command = label,
            stderr = %String::from_utf8_lossy(&output.stderr),
            "command failed"
        );
        return Err(CollaboratorError::Failed {
            command: label.to_owned(),
            status: exit_code(output.status),
        });
    }
    Ok(output)
}

/// Builds a command running `script` through `sh -c`.
pub(crate) fn shell(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}
