//! Appending records to a node's raw logs.

use std::path::{Path, PathBuf};

use loadgen_types::END_TO_END;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::LogError;
use crate::log::{DetailRecord, TimeLogEntry};

/// File name of the end-to-end log within a node's results directory.
pub const TIMELOG_FILE: &str = "timelog.csv";
/// File name of the detail log within a node's results directory.
pub const DETAIL_TIMELOG_FILE: &str = "detailtimelog.csv";

/// Appends one line per record to a log file.
///
/// Every record is written with a single call, so concurrent writers to the same file do not
/// interleave within a line.
#[derive(Debug)]
pub struct EventRecorder {
    path: PathBuf,
    file: Mutex<File>,
}

impl EventRecorder {
    /// Opens `path` for appending, creating it if necessary. `fresh` truncates it first.
    pub async fn open(path: impl Into<PathBuf>, fresh: bool) -> Result<Self, LogError> {
        let path = path.into();
        let io_error = |source| LogError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let mut options = OpenOptions::new();
        options.create(true);
        if fresh {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options.open(&path).await.map_err(io_error)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Returns the path of the log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the end-to-end record of a completed request.
    pub async fn record_request(&self, entry: &TimeLogEntry) -> Result<(), LogError> {
        self.append(format!("{entry}\n")).await
    }

    /// Appends a detail begin or end record.
    ///
    /// The end-to-end event name is reserved and rejected.
    pub async fn record_event(&self, record: &DetailRecord) -> Result<(), LogError> {
        if record.name == END_TO_END {
            return Err(LogError::ReservedName(record.name.clone()));
        }
        self.append(format!("{record}\n")).await
    }

    async fn append(&self, line: String) -> Result<(), LogError> {
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| LogError::Io {
                path: self.path.clone(),
                source,
            })?;
        file.flush().await.map_err(|source| LogError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use loadgen_types::Outcome;

    use super::*;
    use crate::log::{DetailLog, Marker, ReqLog};

    fn record(name: &str, marker: Marker, time: f64) -> DetailRecord {
        DetailRecord {
            request_type: "Login".into(),
            id: "n1-1".into(),
            name: name.into(),
            request_rate: 1.0,
            marker,
            time,
        }
    }

    #[tokio::test]
    async fn writes_readable_logs() {
        let dir = tempfile::tempdir().unwrap();

        let timelog = EventRecorder::open(dir.path().join(TIMELOG_FILE), true).await.unwrap();
        let entry = TimeLogEntry::end_to_end("Login", "n1-1", 1.0, 0.5, 1.5, Outcome::Passed);
        timelog.record_request(&entry).await.unwrap();

        let details = EventRecorder::open(dir.path().join(DETAIL_TIMELOG_FILE), false)
            .await
            .unwrap();
        details.record_event(&record("Submit", Marker::Begin, 0.75)).await.unwrap();
        details.record_event(&record("Submit", Marker::End, 1.25)).await.unwrap();

        let req = ReqLog::read(timelog.path()).await.unwrap();
        assert_eq!(req.log().entries(), &[entry]);

        let detail = DetailLog::read(details.path()).await.unwrap();
        assert_eq!(detail.log().len(), 1);
        assert_eq!(detail.log().entries()[0].duration, 0.5);
    }

    #[tokio::test]
    async fn rejects_reserved_name() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = EventRecorder::open(dir.path().join(DETAIL_TIMELOG_FILE), true)
            .await
            .unwrap();
        let err = recorder
            .record_event(&record(END_TO_END, Marker::Begin, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, LogError::ReservedName(_)));
    }

    #[tokio::test]
    async fn fresh_truncates_and_append_keeps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(TIMELOG_FILE);
        let entry = TimeLogEntry::end_to_end("Login", "1", 1.0, 0.0, 1.0, Outcome::Passed);

        EventRecorder::open(&path, true).await.unwrap().record_request(&entry).await.unwrap();
        EventRecorder::open(&path, false).await.unwrap().record_request(&entry).await.unwrap();
        assert_eq!(ReqLog::read(&path).await.unwrap().number_of_tests(), 2);

        EventRecorder::open(&path, true).await.unwrap();
        assert_eq!(ReqLog::read(&path).await.unwrap().number_of_tests(), 0);
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(
            EventRecorder::open(dir.path().join(TIMELOG_FILE), true)
                .await
                .unwrap(),
        );

        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let recorder = Arc::clone(&recorder);
                tokio::spawn(async move {
                    let entry = TimeLogEntry::end_to_end(
                        "Login",
                        i.to_string(),
                        1.0,
                        i as f64,
                        i as f64 + 0.5,
                        Outcome::Passed,
                    );
                    recorder.record_request(&entry).await.unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let log = ReqLog::read(recorder.path()).await.unwrap();
        assert_eq!(log.number_of_tests(), 50);
    }
}
