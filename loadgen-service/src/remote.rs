//! Command execution and file transfer on remote nodes.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::CollaboratorError;
use crate::process;
use crate::provider::Node;

/// Runs commands on nodes and moves files to and from them.
#[async_trait]
pub trait RemoteExecutor: fmt::Debug + Send + Sync + 'static {
    /// Runs a shell command on the node and returns its exit status.
    async fn run_command(&self, node: &Node, command: &str) -> Result<i32, CollaboratorError>;

    /// Copies a local file to `remote` on the node.
    async fn push_file(
        &self,
        node: &Node,
        local: &Path,
        remote: &str,
    ) -> Result<(), CollaboratorError>;

    /// Copies `remote` from the node into a local file.
    async fn fetch_file(
        &self,
        node: &Node,
        remote: &str,
        local: &Path,
    ) -> Result<(), CollaboratorError>;
}

/// Executes through `ssh` and copies through `scp`.
#[derive(Clone, Debug)]
pub struct SshExecutor {
    program: String,
    copy_program: String,
    user: Option<String>,
    options: Vec<String>,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self {
            program: "ssh".to_owned(),
            copy_program: "scp".to_owned(),
            user: None,
            options: Vec::new(),
        }
    }
}

impl SshExecutor {
    /// Creates an executor with explicit programs, login user and extra options.
    ///
    /// The options are passed to both programs, e.g. `-o StrictHostKeyChecking=no`.
    pub fn new(
        program: impl Into<String>,
        copy_program: impl Into<String>,
        user: Option<String>,
        options: Vec<String>,
    ) -> Self {
        Self {
            program: program.into(),
            copy_program: copy_program.into(),
            user,
            options,
        }
    }

    fn target(&self, node: &Node) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", node.address()),
            None => node.address().to_owned(),
        }
    }

    fn command(&self, program: &str) -> Command {
        let mut command = Command::new(program);
        command.args(&self.options);
        command
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run_command(&self, node: &Node, script: &str) -> Result<i32, CollaboratorError> {
        let mut command = self.command(&self.program);
        command.arg(self.target(node)).arg(script);

        let label = format!("{} {} {script}", self.program, self.target(node));
        tracing::debug!(node = node.name(), command = script, "running remote command");
        let output = process::output(command, &label).await?;
        Ok(process::exit_code(output.status))
    }

    async fn push_file(
        &self,
        node: &Node,
        local: &Path,
        remote: &str,
    ) -> Result<(), CollaboratorError> {
        let destination = format!("{}:{remote}", self.target(node));
        let mut command = self.command(&self.copy_program);
        command.arg(local).arg(&destination);

        let label = format!("{} {} {destination}", self.copy_program, local.display());
        process::checked(command, &label).await?;
        Ok(())
    }

    async fn fetch_file(
        &self,
        node: &Node,
        remote: &str,
        local: &Path,
    ) -> Result<(), CollaboratorError> {
        let source = format!("{}:{remote}", self.target(node));
        let mut command = self.command(&self.copy_program);
        command.arg(&source).arg(local);

        let label = format!("{} {source} {}", self.copy_program, local.display());
        process::checked(command, &label).await?;
        Ok(())
    }
}
