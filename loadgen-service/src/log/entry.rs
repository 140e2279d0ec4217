use std::fmt;

use loadgen_types::{END_TO_END, Outcome};
use serde::Serialize;

/// Distinguishes the two kinds of log entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Spans one whole request. Its name is always [`END_TO_END`].
    EndToEnd,
    /// A matched begin/end pair of a named event within a request.
    Detail,
}

/// One timed event of one request.
///
/// All times are in seconds relative to the start of the node's run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimeLogEntry {
    /// Whether this is an end-to-end or a detail entry.
    pub kind: EntryKind,
    /// Name of the request type that issued the request.
    pub request_type: String,
    /// Identifier of the request, unique within a run.
    pub id: String,
    /// Event name.
    pub name: String,
    /// Target request rate at the time the request was dispatched.
    pub request_rate: f64,
    /// Start of the event.
    pub start_time: f64,
    /// End of the event.
    pub end_time: f64,
    /// `end_time - start_time`.
    pub duration: f64,
    /// Outcome of the request. Detail entries receive theirs when merged.
    pub result: Option<Outcome>,
}

impl TimeLogEntry {
    /// Creates the end-to-end entry of a completed request.
    pub fn end_to_end(
        request_type: impl Into<String>,
        id: impl Into<String>,
        request_rate: f64,
        start_time: f64,
        end_time: f64,
        outcome: Outcome,
    ) -> Self {
        Self {
            kind: EntryKind::EndToEnd,
            request_type: request_type.into(),
            id: id.into(),
            name: END_TO_END.to_owned(),
            request_rate,
            start_time,
            end_time,
            duration: end_time - start_time,
            result: Some(outcome),
        }
    }

    /// Creates a detail entry from a matched begin/end pair. The result is not yet known.
    pub fn detail(
        request_type: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        request_rate: f64,
        start_time: f64,
        end_time: f64,
    ) -> Self {
        Self {
            kind: EntryKind::Detail,
            request_type: request_type.into(),
            id: id.into(),
            name: name.into(),
            request_rate,
            start_time,
            end_time,
            duration: end_time - start_time,
            result: None,
        }
    }

    /// Returns `true` if the request this entry belongs to passed.
    pub fn passed(&self) -> bool {
        self.result == Some(Outcome::Passed)
    }
}

/// Writes the entry in the end-to-end record format:
/// `reqType, id, name, reqRate, startTime, endTime, duration, result`.
impl fmt::Display for TimeLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}, {}, {}, {}, {}",
            self.request_type,
            self.id,
            self.name,
            self.request_rate,
            self.start_time,
            self.end_time,
            self.duration,
            self.result.unwrap_or(Outcome::Incomplete),
        )
    }
}

/// A list of entries kept in ascending order of start time.
///
/// Entries with equal start times stay in the order they were inserted.
#[derive(Clone, Debug, Default)]
pub struct EntryLog {
    entries: Vec<TimeLogEntry>,
}

impl EntryLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry after all entries that start at or before it.
    pub fn insert(&mut self, entry: TimeLogEntry) {
        let index = self
            .entries
            .partition_point(|e| e.start_time <= entry.start_time);
        self.entries.insert(index, entry);
    }

    /// Merges another sorted log into this one.
    ///
    /// The result is identical to inserting every entry of `other` in order, but runs in
    /// linear time.
    pub fn merge_sorted(&mut self, other: EntryLog) {
        if other.entries.is_empty() {
            return;
        }

        let ours = std::mem::take(&mut self.entries);
        let mut merged = Vec::with_capacity(ours.len() + other.entries.len());
        let mut ours = ours.into_iter().peekable();
        let mut theirs = other.entries.into_iter().peekable();

        loop {
            let take_ours = match (ours.peek(), theirs.peek()) {
                (Some(a), Some(b)) => a.start_time <= b.start_time,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_ours { ours.next() } else { theirs.next() };
            merged.extend(next);
        }

        self.entries = merged;
    }

    /// Returns the entries in order.
    pub fn entries(&self) -> &[TimeLogEntry] {
        &self.entries
    }

    /// Returns an iterator over the entries in order.
    pub fn iter(&self) -> std::slice::Iter<'_, TimeLogEntry> {
        self.entries.iter()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the log has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a EntryLog {
    type Item = &'a TimeLogEntry;
    type IntoIter = std::slice::Iter<'a, TimeLogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<TimeLogEntry> for EntryLog {
    fn from_iter<I: IntoIterator<Item = TimeLogEntry>>(iter: I) -> Self {
        let mut log = EntryLog::new();
        for entry in iter {
            log.insert(entry);
        }
        log
    }
}
