use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::{EntryLog, TimeLogEntry, parse_number, split_fields};
use crate::error::LogError;

const FIELDS: usize = 6;

/// Whether a detail record opens or closes an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
    /// The event started.
    Begin,
    /// The event finished.
    End,
}

impl Marker {
    fn as_str(self) -> &'static str {
        match self {
            Marker::Begin => "Begin",
            Marker::End => "End",
        }
    }
}

/// One raw line of a `detailtimelog.csv` file:
/// `reqType, id, eventName, reqRate, Begin|End, time`.
#[derive(Clone, Debug, PartialEq)]
pub struct DetailRecord {
    /// Name of the request type.
    pub request_type: String,
    /// Request identifier.
    pub id: String,
    /// Event name.
    pub name: String,
    /// Target request rate when the request was dispatched.
    pub request_rate: f64,
    /// Begin or end of the event.
    pub marker: Marker,
    /// Seconds since the start of the node's run.
    pub time: f64,
}

impl fmt::Display for DetailRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}, {}, {}",
            self.request_type,
            self.id,
            self.name,
            self.request_rate,
            self.marker.as_str(),
            self.time
        )
    }
}

impl DetailRecord {
    fn parse(line_no: usize, line: &str) -> Result<Self, LogError> {
        let fields = split_fields(line_no, line, FIELDS)?;
        let marker = match fields[4] {
            "Begin" => Marker::Begin,
            "End" => Marker::End,
            other => {
                return Err(LogError::Format {
                    line: line_no,
                    reason: format!("expected `Begin` or `End`, found `{other}`"),
                });
            }
        };

        Ok(Self {
            request_type: fields[0].to_owned(),
            id: fields[1].to_owned(),
            name: fields[2].to_owned(),
            request_rate: parse_number(line_no, "request rate", fields[3])?,
            marker,
            time: parse_number(line_no, "time", fields[5])?,
        })
    }
}

impl FromStr for DetailRecord {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(1, s.trim())
    }
}

/// A begin record for which no end record was seen.
#[derive(Clone, Debug, PartialEq)]
pub struct UnmatchedEvent {
    /// Name of the request type.
    pub request_type: String,
    /// Request identifier.
    pub id: String,
    /// Event name.
    pub name: String,
    /// Time of the begin record.
    pub begin_time: f64,
}

type EventKey = (String, String, String);

/// Detail events of one or more nodes, matched into begin/end pairs.
#[derive(Clone, Debug, Default)]
pub struct DetailLog {
    log: EntryLog,
    pending: HashMap<EventKey, f64>,
    event_counts: BTreeMap<String, usize>,
    records: usize,
}

impl DetailLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the contents of a `detailtimelog.csv` file.
    ///
    /// Any malformed line fails the whole parse.
    pub fn parse(text: &str) -> Result<Self, LogError> {
        let mut log = Self::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            log.ingest(DetailRecord::parse(index + 1, line)?);
        }
        Ok(log)
    }

    /// Reads and parses a `detailtimelog.csv` file.
    pub async fn read(path: &Path) -> Result<Self, LogError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| LogError::Io {
                path: path.to_owned(),
                source,
            })?;
        Self::parse(&text)
    }

    /// Processes one record.
    ///
    /// A begin record is remembered, replacing an earlier unmatched begin of the same event.
    /// An end record completes the remembered begin and yields the new entry. An end record
    /// without a begin is dropped.
    pub fn ingest(&mut self, record: DetailRecord) -> Option<&TimeLogEntry> {
        self.records += 1;
        let key = (record.request_type, record.id, record.name);

        match record.marker {
            Marker::Begin => {
                *self.event_counts.entry(key.2.clone()).or_default() += 1;
                self.pending.insert(key, record.time);
                None
            }
            Marker::End => {
                let Some(begin) = self.pending.remove(&key) else {
                    tracing::debug!(
                        request_type = key.0.as_str(),
                        id = key.1.as_str(),
                        event = key.2.as_str(),
                        "dropping end record without begin"
                    );
                    return None;
                };
                let (request_type, id, name) = key;
                let entry =
                    TimeLogEntry::detail(request_type, id, name, record.request_rate, begin, record.time);
                let index = self
                    .log
                    .entries()
                    .partition_point(|e| e.start_time <= entry.start_time);
                self.log.insert(entry);
                self.log.entries().get(index)
            }
        }
    }

    /// Adds the matched entries, unmatched events and counts of another node's log.
    pub fn absorb(&mut self, other: DetailLog) {
        self.log.merge_sorted(other.log);
        self.pending.extend(other.pending);
        for (name, count) in other.event_counts {
            *self.event_counts.entry(name).or_default() += count;
        }
        self.records += other.records;
    }

    /// Returns the matched entries in order of their begin time.
    pub fn log(&self) -> &EntryLog {
        &self.log
    }

    /// Returns the begin records that were never matched, ordered by time.
    pub fn unmatched(&self) -> Vec<UnmatchedEvent> {
        let mut events: Vec<_> = self
            .pending
            .iter()
            .map(|((request_type, id, name), &begin_time)| UnmatchedEvent {
                request_type: request_type.clone(),
                id: id.clone(),
                name: name.clone(),
                begin_time,
            })
            .collect();
        events.sort_by(|a, b| a.begin_time.total_cmp(&b.begin_time));
        events
    }

    /// Returns how often each event name was begun.
    pub fn event_counts(&self) -> &BTreeMap<String, usize> {
        &self.event_counts
    }

    /// Returns the number of records processed.
    pub fn record_count(&self) -> usize {
        self.records
    }

    /// Logs a warning for every unmatched begin record.
    pub fn report_unmatched(&self) {
        let unmatched = self.unmatched();
        if unmatched.is_empty() {
            return;
        }

        tracing::warn!(count = unmatched.len(), "detail log has unmatched begin events");
        for event in &unmatched {
            tracing::warn!(
                request_type = event.request_type.as_str(),
                id = event.id.as_str(),
                event = event.name.as_str(),
                begin = event.begin_time,
                "unmatched begin event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: &str, marker: Marker, time: f64) -> DetailRecord {
        DetailRecord {
            request_type: "reqA".into(),
            id: id.into(),
            name: name.into(),
            request_rate: 1.0,
            marker,
            time,
        }
    }

    #[test]
    fn matches_begin_and_end() {
        let mut log = DetailLog::new();
        assert!(log.ingest(record("id1", "X", Marker::Begin, 5.0)).is_none());
        let entry = log.ingest(record("id1", "X", Marker::End, 9.0)).unwrap();
        assert_eq!(entry.duration, 4.0);
        assert_eq!(entry.start_time, 5.0);
        assert_eq!(entry.result, None);
        assert!(log.unmatched().is_empty());
    }

    #[test]
    fn lone_begin_is_unmatched() {
        let mut log = DetailLog::new();
        log.ingest(record("id1", "X", Marker::Begin, 5.0));
        assert!(log.log().is_empty());
        assert_eq!(
            log.unmatched(),
            vec![UnmatchedEvent {
                request_type: "reqA".into(),
                id: "id1".into(),
                name: "X".into(),
                begin_time: 5.0,
            }]
        );
    }

    #[test]
    fn lone_end_is_dropped() {
        let mut log = DetailLog::new();
        assert!(log.ingest(record("id1", "X", Marker::End, 9.0)).is_none());
        assert!(log.log().is_empty());
        assert!(log.unmatched().is_empty());
        assert_eq!(log.record_count(), 1);
    }

    #[test]
    fn repeated_begin_overwrites() {
        let mut log = DetailLog::new();
        log.ingest(record("id1", "X", Marker::Begin, 1.0));
        log.ingest(record("id1", "X", Marker::Begin, 2.0));
        let entry = log.ingest(record("id1", "X", Marker::End, 5.0)).unwrap();
        assert_eq!(entry.duration, 3.0);
        assert_eq!(log.event_counts()["X"], 2);
    }

    #[test]
    fn parses_detail_file() {
        let log = DetailLog::parse(
            "reqA, 1, Login, 2, Begin, 1.5\n\
             reqA, 1, Search, 2, Begin, 2\n\
             reqA, 1, Search, 2, End, 2.5\n\
             reqA, 1, Login, 2, End, 3\n",
        )
        .unwrap();

        let names: Vec<_> = log.log().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Login", "Search"]);
        assert_eq!(log.event_counts().len(), 2);

        let err = DetailLog::parse("reqA, 1, Login, 2, Start, 1.5\n").unwrap_err();
        assert!(matches!(err, LogError::Format { line: 1, .. }));
    }

    #[test]
    fn record_display_parses_back() {
        let rec = record("n1-3", "Checkout", Marker::End, 12.25);
        assert_eq!(rec.to_string(), "reqA, n1-3, Checkout, 1, End, 12.25");
        assert_eq!(rec.to_string().parse::<DetailRecord>().unwrap(), rec);
    }
}
