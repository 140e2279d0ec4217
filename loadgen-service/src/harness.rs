//! Execution of individual requests by the test harness.
//!
//! The harness is opaque to the scheduler: it receives the request type, the tag filter and
//! the identity of the request, and reports whether the request succeeded.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::CollaboratorError;
use crate::process;

/// Environment variable holding the request type name.
pub const ENV_REQUEST_TYPE: &str = "LG_REQUEST_TYPE";
/// Environment variable holding the request id.
pub const ENV_REQUEST_ID: &str = "LG_REQUEST_ID";
/// Environment variable holding the target request rate.
pub const ENV_REQUEST_RATE: &str = "LG_REQUEST_RATE";
/// Environment variable holding the tag filter, e.g. `--tags @Logon`.
pub const ENV_TAGS: &str = "LG_TAGS";
/// Environment variable holding the node's results directory.
pub const ENV_RESULTS_DIR: &str = "LG_RESULTS_DIR";
/// Environment variable holding the start of the node's run in milliseconds since the epoch.
pub const ENV_TIME_OFFSET_MS: &str = "LG_TIME_OFFSET_MS";

/// Identity of one request as seen by the harness.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestContext {
    /// Name of the request type.
    pub request_type: String,
    /// Identifier of the request, unique within the run.
    pub id: String,
    /// Target request rate at the time of dispatch.
    pub rate: f64,
    /// Tag filter passed to the harness.
    pub tags: String,
}

impl RequestContext {
    /// Reconstructs the context handed to a harness process from its environment.
    ///
    /// `lookup` returns the value of an environment variable, typically
    /// `|key| std::env::var(key).ok()`.
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        Some(Self {
            request_type: lookup(ENV_REQUEST_TYPE)?,
            id: lookup(ENV_REQUEST_ID)?,
            rate: lookup(ENV_REQUEST_RATE)?.parse().ok()?,
            tags: lookup(ENV_TAGS).unwrap_or_default(),
        })
    }
}

/// Executes requests.
#[async_trait]
pub trait Harness: fmt::Debug + Send + Sync + 'static {
    /// Executes one request and returns whether it succeeded.
    async fn run_one_request(&self, request: &RequestContext) -> Result<bool, CollaboratorError>;
}

/// Runs a shell command for every request.
///
/// The request is described to the command through the `LG_*` environment variables. The
/// request succeeds if the command exits with status 0.
#[derive(Clone, Debug)]
pub struct CommandHarness {
    command: String,
    results_dir: PathBuf,
    time_offset_ms: u128,
}

impl CommandHarness {
    /// Creates a harness running `command` for a node writing to `results_dir`.
    pub fn new(command: impl Into<String>, results_dir: impl Into<PathBuf>, time_offset_ms: u128) -> Self {
        Self {
            command: command.into(),
            results_dir: results_dir.into(),
            time_offset_ms,
        }
    }
}

#[async_trait]
impl Harness for CommandHarness {
    async fn run_one_request(&self, request: &RequestContext) -> Result<bool, CollaboratorError> {
        let mut command = process::shell(&self.command);
        command
            .env(ENV_REQUEST_TYPE, &request.request_type)
            .env(ENV_REQUEST_ID, &request.id)
            .env(ENV_REQUEST_RATE, request.rate.to_string())
            .env(ENV_TAGS, &request.tags)
            .env(ENV_RESULTS_DIR, &self.results_dir)
            .env(ENV_TIME_OFFSET_MS, self.time_offset_ms.to_string());

        let output = process::output(command, &self.command).await?;
        if !output.status.success() {
            tracing::debug!(
                request_type = request.request_type.as_str(),
                id = request.id.as_str(),
                status = process::exit_code(output.status),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "request failed"
            );
        }
        Ok(output.status.success())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn request() -> RequestContext {
        RequestContext {
            request_type: "Login".into(),
            id: "n1-3".into(),
            rate: 2.5,
            tags: "--tags @Logon".into(),
        }
    }

    #[tokio::test]
    async fn success_follows_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let passing = CommandHarness::new("test \"$LG_REQUEST_TYPE\" = Login", dir.path(), 0);
        assert!(passing.run_one_request(&request()).await.unwrap());

        let failing = CommandHarness::new("exit 1", dir.path(), 0);
        assert!(!failing.run_one_request(&request()).await.unwrap());
    }

    #[tokio::test]
    async fn exports_request_environment() {
        let dir = tempfile::tempdir().unwrap();
        let harness = CommandHarness::new(
            "env | grep '^LG_' > \"$LG_RESULTS_DIR/env\"",
            dir.path(),
            1234,
        );
        assert!(harness.run_one_request(&request()).await.unwrap());

        let written = std::fs::read_to_string(dir.path().join("env")).unwrap();
        let vars: HashMap<_, _> = written
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();

        assert_eq!(vars[ENV_TIME_OFFSET_MS], "1234");
        assert_eq!(
            RequestContext::from_env(|key| vars.get(key).cloned()),
            Some(request())
        );
    }

    #[test]
    fn context_requires_identity() {
        let vars = HashMap::from([(ENV_REQUEST_TYPE, "Login")]);
        assert_eq!(
            RequestContext::from_env(|key| vars.get(key).map(|v| v.to_string())),
            None
        );
    }
}
