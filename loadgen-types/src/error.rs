//! Errors of the shared data model.

use thiserror::Error;

/// Errors raised while building the definitions of a load test.
///
/// These are reported when an object is constructed, so no partially built definition is
/// ever observable.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A name was empty.
    #[error("{kind} name must not be empty")]
    EmptyName {
        /// What was being named, e.g. `"request type"`.
        kind: &'static str,
    },

    /// A name contained whitespace.
    #[error("{kind} name `{name}` must not contain whitespace")]
    Whitespace {
        /// What was being named.
        kind: &'static str,
        /// The offending name.
        name: String,
    },

    /// A name was registered twice.
    #[error("duplicate {kind} name `{name}`")]
    Duplicate {
        /// What was being named.
        kind: &'static str,
        /// The offending name.
        name: String,
    },

    /// A level had a zero, negative or non-finite duration.
    #[error("invalid level duration: {0} minutes")]
    InvalidDuration(f64),

    /// A level had a negative or non-finite rate.
    #[error("invalid level rate: {0} requests/s")]
    InvalidRate(f64),

    /// A name referenced an object that was never defined.
    #[error("unknown {kind} `{name}`")]
    Unknown {
        /// What was being referenced.
        kind: &'static str,
        /// The missing name.
        name: String,
    },

    /// A profile file could not be parsed.
    #[error("malformed profile at line {line}: {reason}")]
    Profile {
        /// 1-based line number.
        line: usize,
        /// Human readable description of the problem.
        reason: String,
    },
}
