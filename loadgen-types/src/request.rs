//! Request types, reserved event names and request outcomes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Event name of the record written once per completed request.
///
/// It spans the whole invocation of the test harness and may not be used for detail events.
pub const END_TO_END: &str = "EndToEnd";

/// Event name a test uses to mark the span from the start to the end of its own steps.
pub const WHOLE_TEST: &str = "WholeTest";

/// Validates a user supplied name.
///
/// Names end up as whitespace separated tokens in profile files and as CSV fields in logs,
/// so they must be non-empty and free of whitespace.
pub fn validate_name(kind: &'static str, name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::EmptyName { kind });
    }
    if name.chars().any(char::is_whitespace) {
        return Err(ConfigError::Whitespace {
            kind,
            name: name.to_owned(),
        });
    }
    Ok(())
}

/// A type of test to perform.
///
/// Every node recognizes the request type by name and passes its tags to the test harness,
/// which selects the scenarios to execute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestType {
    name: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    color: Option<String>,
}

impl RequestType {
    /// Creates a request type without tags.
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        validate_name("request type", &name)?;
        Ok(Self {
            name,
            tags: Vec::new(),
            color: None,
        })
    }

    /// Adds a tag that is passed verbatim to the harness.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Sets the color used when charting requests of this type.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Checks the invariants of a deserialized request type.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name("request type", &self.name)?;
        for tag in &self.tags {
            validate_name("tag", tag)?;
        }
        Ok(())
    }

    /// Returns the unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tags in definition order.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the chart color, if any.
    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }
}

/// The result of one request, as recorded in the logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// The harness reported success (`"true"`).
    #[serde(rename = "true")]
    Passed,
    /// The harness reported failure (`"false"`).
    #[serde(rename = "false")]
    Failed,
    /// No end-to-end record exists for the request (`"incomplete"`).
    #[serde(rename = "incomplete")]
    Incomplete,
}

impl Outcome {
    /// Maps the success flag of the harness to an outcome.
    pub fn from_success(success: bool) -> Self {
        if success {
            Outcome::Passed
        } else {
            Outcome::Failed
        }
    }

    /// Returns the representation used in log files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Passed => "true",
            Outcome::Failed => "false",
            Outcome::Incomplete => "incomplete",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`Outcome`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown outcome `{0}`")]
pub struct UnknownOutcome(String);

impl FromStr for Outcome {
    type Err = UnknownOutcome;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "true" => Ok(Outcome::Passed),
            "false" => Ok(Outcome::Failed),
            "incomplete" => Ok(Outcome::Incomplete),
            other => Err(UnknownOutcome(other.to_owned())),
        }
    }
}
