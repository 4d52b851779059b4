//! Bounded log store shared between the host's log channel and HTTP handlers.
//!
//! # Purpose
//!
//! Keeps the most recent `capacity` log records so remote tools can ask
//! "what went wrong?" after a refresh or build. Records arrive from an
//! uncontrolled, possibly high-frequency source (see [`super::log_capture`])
//! while `/errors` handlers query and clear the store from worker threads.
//!
//! # Thread safety
//!
//! One `Mutex<VecDeque<LogRecord>>` guards everything. Appends, snapshots and
//! clears are mutually exclusive, so a snapshot never sees a half-written
//! record. Filtering runs on the copied snapshot, outside the lock.

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

/// Default number of records kept before the oldest is evicted.
pub const DEFAULT_CAPACITY: usize = 5000;

/// Log severity as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Severity {
    Log,
    Warning,
    Error,
    Exception,
    Assert,
}

impl Severity {
    /// True for the severities grouped under the `error` filter.
    pub fn is_error(self) -> bool {
        matches!(self, Severity::Error | Severity::Exception | Severity::Assert)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Log => "Log",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Exception => "Exception",
            Severity::Assert => "Assert",
        };
        f.write_str(name)
    }
}

impl From<log::Level> for Severity {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Severity::Error,
            log::Level::Warn => Severity::Warning,
            log::Level::Info | log::Level::Debug | log::Level::Trace => Severity::Log,
        }
    }
}

/// A single captured log message. Immutable once created.
///
/// Serializes as `{"time":"HH:MM:SS.mmm","message":…,"stack":…,"type":…}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    #[serde(rename = "time", serialize_with = "serialize_time")]
    timestamp: DateTime<Local>,
    message: String,
    #[serde(rename = "stack")]
    stack_trace: String,
    #[serde(rename = "type")]
    severity: Severity,
}

fn serialize_time<S: Serializer>(ts: &DateTime<Local>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&ts.format("%H:%M:%S%.3f"))
}

impl LogRecord {
    /// Record stamped with the current wall-clock time.
    pub fn new(severity: Severity, message: impl Into<String>, stack_trace: impl Into<String>) -> Self {
        Self::at(Local::now(), severity, message, stack_trace)
    }

    pub fn at(
        timestamp: DateTime<Local>,
        severity: Severity,
        message: impl Into<String>,
        stack_trace: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            message: message.into(),
            stack_trace: stack_trace.into(),
            severity,
        }
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack_trace(&self) -> &str {
        &self.stack_trace
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }
}

/// Severity filter accepted by `/errors?level=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFilter {
    #[default]
    All,
    /// Error, Exception and Assert
    Error,
    Warning,
    Log,
}

impl LogFilter {
    /// Parse a `level` value. Case-insensitive; missing or unknown values mean `All`.
    pub fn parse(level: Option<&str>) -> Self {
        let Some(level) = level else {
            return LogFilter::All;
        };
        match level.trim().to_ascii_lowercase().as_str() {
            "error" => LogFilter::Error,
            "warning" => LogFilter::Warning,
            "log" => LogFilter::Log,
            _ => LogFilter::All,
        }
    }

    pub fn matches(self, severity: Severity) -> bool {
        match self {
            LogFilter::All => true,
            LogFilter::Error => severity.is_error(),
            LogFilter::Warning => severity == Severity::Warning,
            LogFilter::Log => severity == Severity::Log,
        }
    }

    /// Keep the last `limit` records (min 1) matching this filter, oldest first.
    pub fn apply(self, records: impl IntoIterator<Item = LogRecord>, limit: usize) -> Vec<LogRecord> {
        let limit = limit.max(1);
        let mut matched: Vec<LogRecord> = records
            .into_iter()
            .filter(|r| self.matches(r.severity))
            .collect();
        let skip = matched.len().saturating_sub(limit);
        matched.drain(..skip);
        matched
    }
}

/// Fixed-capacity FIFO-eviction log store.
pub struct LogRingBuffer {
    capacity: usize,
    entries: Mutex<VecDeque<LogRecord>>,
}

impl Default for LogRingBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl LogRingBuffer {
    /// Create a buffer holding at most `capacity` records (clamped to at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a record, evicting the oldest one when full. Never fails.
    pub fn append(&self, record: LogRecord) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Copy of the current contents in insertion order.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    /// Most recent `limit` records matching `filter`, oldest first.
    ///
    /// The lock is held only while copying; filtering runs on the copy.
    pub fn query(&self, filter: LogFilter, limit: usize) -> Vec<LogRecord> {
        filter.apply(self.snapshot(), limit)
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn rec(severity: Severity, msg: &str) -> LogRecord {
        LogRecord::new(severity, msg, "")
    }

    fn messages(records: &[LogRecord]) -> Vec<&str> {
        records.iter().map(|r| r.message()).collect()
    }

    /// Test: Overflow keeps only the newest records
    /// Validates: length never exceeds capacity, FIFO eviction order
    #[test]
    fn test_eviction_keeps_last_capacity_records() {
        let buffer = LogRingBuffer::with_capacity(3);
        for i in 0..10 {
            buffer.append(rec(Severity::Log, &format!("m{}", i)));
            assert!(buffer.len() <= 3);
        }

        let snap = buffer.snapshot();
        assert_eq!(messages(&snap), vec!["m7", "m8", "m9"]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let buffer = LogRingBuffer::with_capacity(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.append(rec(Severity::Log, "a"));
        buffer.append(rec(Severity::Log, "b"));
        assert_eq!(messages(&buffer.snapshot()), vec!["b"]);
    }

    /// Test: Error filter groups Error/Exception/Assert and honors limit
    #[test]
    fn test_query_error_filter() {
        let buffer = LogRingBuffer::with_capacity(100);
        buffer.append(rec(Severity::Error, "e1"));
        buffer.append(rec(Severity::Log, "l1"));
        buffer.append(rec(Severity::Exception, "x1"));
        buffer.append(rec(Severity::Warning, "w1"));
        buffer.append(rec(Severity::Assert, "a1"));

        let all_errors = buffer.query(LogFilter::Error, 10);
        assert_eq!(messages(&all_errors), vec!["e1", "x1", "a1"]);
        assert!(all_errors.iter().all(|r| r.severity().is_error()));

        let last_two = buffer.query(LogFilter::Error, 2);
        assert_eq!(messages(&last_two), vec!["x1", "a1"]);
    }

    /// Test: Warning query returns the most recent matches in chronological order
    #[test]
    fn test_query_warning_tail() {
        let buffer = LogRingBuffer::with_capacity(100);
        buffer.append(rec(Severity::Error, "boom"));
        buffer.append(rec(Severity::Warning, "w1"));
        buffer.append(rec(Severity::Warning, "w2"));
        buffer.append(rec(Severity::Warning, "w3"));

        let result = buffer.query(LogFilter::Warning, 2);
        assert_eq!(messages(&result), vec!["w2", "w3"]);
    }

    #[test]
    fn test_query_limit_clamped_to_one() {
        let buffer = LogRingBuffer::with_capacity(10);
        buffer.append(rec(Severity::Log, "a"));
        buffer.append(rec(Severity::Log, "b"));
        assert_eq!(messages(&buffer.query(LogFilter::All, 0)), vec!["b"]);
    }

    #[test]
    fn test_filter_parse() {
        assert_eq!(LogFilter::parse(None), LogFilter::All);
        assert_eq!(LogFilter::parse(Some("all")), LogFilter::All);
        assert_eq!(LogFilter::parse(Some("ERROR")), LogFilter::Error);
        assert_eq!(LogFilter::parse(Some("warning")), LogFilter::Warning);
        assert_eq!(LogFilter::parse(Some("log")), LogFilter::Log);
        assert_eq!(LogFilter::parse(Some("verbose")), LogFilter::All);
    }

    #[test]
    fn test_clear() {
        let buffer = LogRingBuffer::with_capacity(10);
        buffer.append(rec(Severity::Error, "x"));
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.query(LogFilter::All, 10).is_empty());
    }

    #[test]
    fn test_record_json_shape() {
        let record = rec(Severity::Exception, "bad \"thing\"\nhappened");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "Exception");
        assert_eq!(json["message"], "bad \"thing\"\nhappened");
        assert_eq!(json["stack"], "");
        // HH:MM:SS.mmm
        assert_eq!(json["time"].as_str().unwrap().len(), 12);
    }

    /// Test: Writers and readers racing on the same buffer
    /// Validates: no torn reads, capacity invariant holds under contention
    #[test]
    fn test_concurrent_append_and_query() {
        let buffer = Arc::new(LogRingBuffer::with_capacity(50));
        let mut handles = vec![];

        for t in 0..4 {
            let buffer = Arc::clone(&buffer);
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    let severity = if i % 2 == 0 { Severity::Error } else { Severity::Log };
                    buffer.append(rec(severity, &format!("t{}-{}", t, i)));
                }
            }));
        }
        for _ in 0..2 {
            let buffer = Arc::clone(&buffer);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let snap = buffer.snapshot();
                    assert!(snap.len() <= 50);
                    let errors = buffer.query(LogFilter::Error, 10);
                    assert!(errors.len() <= 10);
                    assert!(errors.iter().all(|r| r.severity() == Severity::Error));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(buffer.len(), 50);
    }
}
