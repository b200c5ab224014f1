//! Attendance ledger — at-most-once presence recording.
//!
//! A session-scoped marked-set plus an append-only CSV log. A name is
//! added to the marked-set only after its row has been durably appended,
//! so a failed append leaves the identity eligible for a later frame to
//! retry.

use chrono::{DateTime, Local};
use std::borrow::Cow;
use std::collections::HashSet;
use std::io::{self, Write};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const HEADER: &str = "Name,Timestamp";

pub struct AttendanceLedger<W: Write> {
    sink: W,
    marked: HashSet<String>,
    /// Marked names in first-detection order.
    order: Vec<String>,
}

impl<W: Write> AttendanceLedger<W> {
    /// Open the ledger, writing the CSV header row.
    pub fn new(mut sink: W) -> io::Result<Self> {
        writeln!(sink, "{HEADER}")?;
        sink.flush()?;
        Ok(Self {
            sink,
            marked: HashSet::new(),
            order: Vec::new(),
        })
    }

    /// Record `name` as present at `when`, unless already marked this
    /// session. Returns true if a row was appended.
    ///
    /// The name is marked only after the append succeeds; an I/O error
    /// propagates and the identity stays unmarked so a later sighting can
    /// retry the append.
    pub fn record_if_new(&mut self, name: &str, when: DateTime<Local>) -> io::Result<bool> {
        if self.marked.contains(name) {
            return Ok(false);
        }

        writeln!(
            self.sink,
            "{},{}",
            csv_field(name),
            when.format(TIMESTAMP_FORMAT)
        )?;
        self.sink.flush()?;

        self.marked.insert(name.to_string());
        self.order.push(name.to_string());
        Ok(true)
    }

    pub fn is_marked(&self, name: &str) -> bool {
        self.marked.contains(name)
    }

    /// Number of rows appended so far.
    pub fn records(&self) -> usize {
        self.order.len()
    }

    /// Marked names in first-detection order.
    pub fn marked_names(&self) -> &[String] {
        &self.order
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }

    /// Access the underlying sink.
    pub fn get_ref(&self) -> &W {
        &self.sink
    }
}

/// Quote a CSV field only when it needs it.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 2, h, m, s).unwrap()
    }

    /// Write sink that fails the next `fail_next` writes.
    struct FlakySink {
        inner: Vec<u8>,
        fail_next: usize,
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_next > 0 {
                self.fail_next -= 1;
                return Err(io::Error::other("disk full"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_header_written_on_open() {
        let ledger = AttendanceLedger::new(Vec::new()).unwrap();
        assert_eq!(ledger.sink, b"Name,Timestamp\n");
    }

    #[test]
    fn test_record_appends_once_per_name() {
        let mut ledger = AttendanceLedger::new(Vec::new()).unwrap();

        assert!(ledger.record_if_new("alice", ts(9, 0, 0)).unwrap());
        assert!(!ledger.record_if_new("alice", ts(9, 0, 5)).unwrap());
        assert!(ledger.record_if_new("bob", ts(9, 1, 0)).unwrap());
        assert!(!ledger.record_if_new("alice", ts(9, 2, 0)).unwrap());

        let log = String::from_utf8(ledger.sink.clone()).unwrap();
        assert_eq!(
            log,
            "Name,Timestamp\nalice,2025-06-02 09:00:00\nbob,2025-06-02 09:01:00\n"
        );
        assert_eq!(ledger.records(), 2);
        assert_eq!(ledger.marked_names(), ["alice", "bob"]);
    }

    #[test]
    fn test_timestamp_format() {
        let mut ledger = AttendanceLedger::new(Vec::new()).unwrap();
        ledger.record_if_new("carol", ts(14, 5, 9)).unwrap();

        let log = String::from_utf8(ledger.sink.clone()).unwrap();
        assert!(log.contains("carol,2025-06-02 14:05:09\n"));
    }

    #[test]
    fn test_failed_append_leaves_name_eligible() {
        let sink = FlakySink {
            inner: Vec::new(),
            fail_next: 0,
        };
        let mut ledger = AttendanceLedger::new(sink).unwrap();

        ledger.sink.fail_next = 1;
        assert!(ledger.record_if_new("alice", ts(9, 0, 0)).is_err());
        assert!(!ledger.is_marked("alice"));
        assert_eq!(ledger.records(), 0);

        // Retry on a later sighting succeeds and appends exactly one row.
        assert!(ledger.record_if_new("alice", ts(9, 0, 3)).unwrap());
        let log = String::from_utf8(ledger.sink.inner.clone()).unwrap();
        assert_eq!(log.matches("alice").count(), 1);
        assert!(log.contains("alice,2025-06-02 09:00:03\n"));
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("alice"), "alice");
        assert_eq!(csv_field("doe, jane"), "\"doe, jane\"");
        assert_eq!(csv_field("o\"brien"), "\"o\"\"brien\"");
    }

    #[test]
    fn test_quoted_name_in_log() {
        let mut ledger = AttendanceLedger::new(Vec::new()).unwrap();
        ledger.record_if_new("doe, jane", ts(10, 0, 0)).unwrap();

        let log = String::from_utf8(ledger.sink.clone()).unwrap();
        assert!(log.contains("\"doe, jane\",2025-06-02 10:00:00\n"));
    }
}
