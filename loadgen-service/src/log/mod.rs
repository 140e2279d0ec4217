//! Per-node event logs and their aggregation.
//!
//! Every node writes two plain-text logs while it executes a run:
//!
//!  - `timelog.csv` with one end-to-end record per completed request, read by [`ReqLog`]
//!  - `detailtimelog.csv` with `Begin`/`End` records of named events, read by [`DetailLog`]
//!
//! Both logs keep their entries in an [`EntryLog`], which is sorted by start time at all
//! times. [`merge`] combines them into the [`AggregateLog`] that statistics are computed on.

mod detail;
mod entry;
mod merge;
mod req;

pub use detail::{DetailLog, DetailRecord, Marker, UnmatchedEvent};
pub use entry::{EntryKind, EntryLog, TimeLogEntry};
pub use merge::{AggregateLog, merge};
pub use req::ReqLog;

use crate::error::LogError;

/// Splits a comma separated record into exactly `expected` trimmed fields.
fn split_fields(line_no: usize, line: &str, expected: usize) -> Result<Vec<&str>, LogError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != expected {
        return Err(LogError::Format {
            line: line_no,
            reason: format!("expected {expected} fields, found {}", fields.len()),
        });
    }
    Ok(fields)
}

fn parse_number(line_no: usize, field: &'static str, value: &str) -> Result<f64, LogError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| LogError::Format {
            line: line_no,
            reason: format!("invalid {field} `{value}`"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_rejects_short_lines() {
        assert_eq!(split_fields(1, "a, b ,c", 3).unwrap(), vec!["a", "b", "c"]);
        assert!(matches!(
            split_fields(4, "a, b", 3),
            Err(LogError::Format { line: 4, .. })
        ));
    }

    #[test]
    fn parse_number_rejects_garbage() {
        assert_eq!(parse_number(1, "rate", "2.5").unwrap(), 2.5);
        assert!(parse_number(1, "rate", "fast").is_err());
        assert!(parse_number(1, "rate", "NaN").is_err());
    }
}
