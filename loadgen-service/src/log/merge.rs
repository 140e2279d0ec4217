use std::collections::HashMap;

use loadgen_types::{END_TO_END, Outcome};

use super::{DetailLog, EntryKind, EntryLog, ReqLog, TimeLogEntry};

/// The time ordered record of all end-to-end and detail entries of one run.
#[derive(Clone, Debug, Default)]
pub struct AggregateLog {
    log: EntryLog,
}

impl AggregateLog {
    /// Returns all entries in order of their start time.
    pub fn entries(&self) -> &[TimeLogEntry] {
        self.log.entries()
    }

    /// Returns an iterator over all entries in order.
    pub fn iter(&self) -> std::slice::Iter<'_, TimeLogEntry> {
        self.log.iter()
    }

    /// Returns the end-to-end entries in order.
    pub fn end_to_end(&self) -> impl Iterator<Item = &TimeLogEntry> {
        self.iter().filter(|e| e.kind == EntryKind::EndToEnd)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Returns `true` if the log has no entries.
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

impl From<EntryLog> for AggregateLog {
    fn from(log: EntryLog) -> Self {
        Self { log }
    }
}

/// Combines end-to-end and detail entries into one aggregate log.
///
/// Detail entries take the result of the earliest end-to-end entry with the same request id.
/// Detail entries of requests that never completed are marked [`Outcome::Incomplete`].
pub fn merge(req_log: &ReqLog, detail_log: &DetailLog) -> AggregateLog {
    let mut outcomes: HashMap<&str, Outcome> = HashMap::new();
    for entry in req_log.log().iter().filter(|e| e.name == END_TO_END) {
        if let Some(result) = entry.result {
            outcomes.entry(entry.id.as_str()).or_insert(result);
        }
    }

    let details: EntryLog = detail_log
        .log()
        .iter()
        .map(|entry| {
            let mut entry = entry.clone();
            entry.result = Some(
                outcomes
                    .get(entry.id.as_str())
                    .copied()
                    .unwrap_or(Outcome::Incomplete),
            );
            entry
        })
        .collect();

    let mut log = req_log.log().clone();
    log.merge_sorted(details);

    let incomplete = log
        .iter()
        .filter(|e| e.result == Some(Outcome::Incomplete))
        .count();
    tracing::debug!(
        entries = log.len(),
        incomplete,
        "merged request and detail logs"
    );

    AggregateLog { log }
}
