use std::path::Path;

use loadgen_types::Outcome;

use super::{EntryLog, TimeLogEntry, parse_number, split_fields};
use crate::error::LogError;

const FIELDS: usize = 8;

/// The end-to-end records of one or more nodes.
#[derive(Clone, Debug, Default)]
pub struct ReqLog {
    log: EntryLog,
}

impl ReqLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the contents of a `timelog.csv` file.
    ///
    /// Blank lines are skipped. Any malformed line fails the whole parse.
    pub fn parse(text: &str) -> Result<Self, LogError> {
        let mut log = EntryLog::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            log.insert(parse_line(index + 1, line)?);
        }
        Ok(Self { log })
    }

    /// Reads and parses a `timelog.csv` file.
    pub async fn read(path: &Path) -> Result<Self, LogError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| LogError::Io {
                path: path.to_owned(),
                source,
            })?;
        Self::parse(&text)
    }

    /// Adds all entries of another node's log.
    pub fn absorb(&mut self, other: ReqLog) {
        self.log.merge_sorted(other.log);
    }

    /// Inserts a single entry.
    pub fn insert(&mut self, entry: TimeLogEntry) {
        self.log.insert(entry);
    }

    /// Returns the sorted entries.
    pub fn log(&self) -> &EntryLog {
        &self.log
    }

    /// Returns the number of requests that were executed.
    pub fn number_of_tests(&self) -> usize {
        self.log.len()
    }

    /// Returns the number of requests that passed.
    pub fn number_passed(&self) -> usize {
        self.log.iter().filter(|e| e.passed()).count()
    }
}

fn parse_line(line_no: usize, line: &str) -> Result<TimeLogEntry, LogError> {
    let fields = split_fields(line_no, line, FIELDS)?;
    let request_rate = parse_number(line_no, "request rate", fields[3])?;
    let start_time = parse_number(line_no, "start time", fields[4])?;
    let end_time = parse_number(line_no, "end time", fields[5])?;
    let duration = parse_number(line_no, "duration", fields[6])?;
    let outcome: Outcome = fields[7].parse().map_err(|err| LogError::Format {
        line: line_no,
        reason: format!("{err}"),
    })?;

    let mut entry = TimeLogEntry::end_to_end(
        fields[0],
        fields[1],
        request_rate,
        start_time,
        end_time,
        outcome,
    );
    entry.name = fields[2].to_owned();
    entry.duration = duration;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_sorts_records() {
        let log = ReqLog::parse(
            "Login, n1-2, EndToEnd, 1.5, 3.0, 3.5, 0.5, true\n\
             \n\
             Login, n1-1, EndToEnd, 1.0, 1.0, 1.25, 0.25, false\n",
        )
        .unwrap();

        let ids: Vec<_> = log.log().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["n1-1", "n1-2"]);
        assert_eq!(log.number_of_tests(), 2);
        assert_eq!(log.number_passed(), 1);
        assert_eq!(log.log().entries()[1].duration, 0.5);
    }

    #[test]
    fn malformed_line_fails_whole_file() {
        let err = ReqLog::parse(
            "Login, n1-1, EndToEnd, 1.0, 1.0, 1.25, 0.25, true\n\
             Login, n1-2, EndToEnd, 1.0, 1.0\n",
        )
        .unwrap_err();
        assert!(matches!(err, LogError::Format { line: 2, .. }));

        let err = ReqLog::parse("Login, 1, EndToEnd, 1.0, 1.0, 1.25, 0.25, maybe\n").unwrap_err();
        assert!(matches!(err, LogError::Format { line: 1, .. }));
    }

    #[test]
    fn written_entry_parses_back() {
        let entry = TimeLogEntry::end_to_end("Login", "n1-7", 2.5, 1.25, 2.0, Outcome::Failed);
        let log = ReqLog::parse(&format!("{entry}\n")).unwrap();
        assert_eq!(log.log().entries(), &[entry]);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReqLog::read(&dir.path().join("timelog.csv")).await.unwrap_err();
        assert!(matches!(err, LogError::Io { .. }));
    }
}
