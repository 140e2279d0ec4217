//! Validity of node and run results.

use std::fmt;

use serde::Serialize;

/// Overall validity of a node's or a run's results.
///
/// Statuses are ordered by severity, so combining several is taking the maximum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The profile was achieved and all logs were retrieved.
    #[default]
    Valid,
    /// Timing fell behind the profile or data is partially missing.
    Skewed,
    /// The run failed.
    Invalid,
    /// A profile exceeded the request rate ceiling and the run was aborted.
    Aborted,
}

impl RunStatus {
    /// Returns the process exit code reported by a node with this status.
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Valid => 0,
            RunStatus::Skewed => 1,
            RunStatus::Invalid => 2,
            RunStatus::Aborted => 3,
        }
    }

    /// Maps a node's exit code back to a status. Unknown codes are invalid.
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => RunStatus::Valid,
            1 => RunStatus::Skewed,
            3 => RunStatus::Aborted,
            _ => RunStatus::Invalid,
        }
    }

    /// Returns the more severe of two statuses.
    pub fn combine(self, other: RunStatus) -> RunStatus {
        self.max(other)
    }

    /// Returns the label used in summaries.
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Valid => "valid",
            RunStatus::Skewed => "skewed",
            RunStatus::Invalid => "invalid",
            RunStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_keeps_most_severe() {
        assert_eq!(RunStatus::Valid.combine(RunStatus::Skewed), RunStatus::Skewed);
        assert_eq!(RunStatus::Invalid.combine(RunStatus::Skewed), RunStatus::Invalid);
        assert_eq!(RunStatus::Invalid.combine(RunStatus::Aborted), RunStatus::Aborted);
        assert_eq!(RunStatus::default(), RunStatus::Valid);
    }

    #[test]
    fn exit_codes() {
        for status in [
            RunStatus::Valid,
            RunStatus::Skewed,
            RunStatus::Invalid,
            RunStatus::Aborted,
        ] {
            assert_eq!(RunStatus::from_exit_code(status.exit_code()), status);
        }
        assert_eq!(RunStatus::from_exit_code(127), RunStatus::Invalid);
        assert_eq!(RunStatus::from_exit_code(-1), RunStatus::Invalid);
    }
}
