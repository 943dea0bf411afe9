//! Timestamped record of everything observed during a run.
//!
//! The trace is independent of pass/fail classification: every request,
//! reply and note lands here in insertion order, stamped with the time
//! elapsed since the recorder was created or last cleared.

use serde::Serialize;
use std::fmt;
use std::ops::Index;
use std::time::{Duration, Instant};

/// Kind of a trace entry, rendered as a direction or severity marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Request,
    Reply,
    Info,
    Warning,
    Error,
}

impl EntryKind {
    fn marker(self) -> Option<&'static str> {
        match self {
            EntryKind::Request => Some("-->"),
            EntryKind::Reply => Some("<--"),
            EntryKind::Info => None,
            EntryKind::Warning => Some("[WARNING]"),
            EntryKind::Error => Some("[ERROR]"),
        }
    }
}

/// One line of the trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    /// Time since the recorder's start reference
    pub elapsed: Duration,
    pub kind: EntryKind,
    pub message: String,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.elapsed.as_secs_f64();
        match self.kind.marker() {
            Some(marker) => write!(f, "{:.6} {} {}", seconds, marker, self.message),
            None => write!(f, "{:.6} {}", seconds, self.message),
        }
    }
}

/// Append-only trace recorder owned by a single run
#[derive(Debug, Clone)]
pub struct Trace {
    entries: Vec<TraceEntry>,
    start: Instant,
}

impl Trace {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            start: Instant::now(),
        }
    }

    /// Outbound request
    pub fn request(&mut self, msg: impl Into<String>) {
        self.push(EntryKind::Request, msg.into());
    }

    /// Inbound reply
    pub fn reply(&mut self, msg: impl Into<String>) {
        self.push(EntryKind::Reply, msg.into());
    }

    pub fn info(&mut self, msg: impl Into<String>) {
        self.push(EntryKind::Info, msg.into());
    }

    pub fn warning(&mut self, msg: impl Into<String>) {
        self.push(EntryKind::Warning, msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.push(EntryKind::Error, msg.into());
    }

    /// Drop all entries and restart the elapsed clock
    pub fn clear(&mut self) {
        self.entries.clear();
        self.start = Instant::now();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TraceEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TraceEntry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    fn push(&mut self, kind: EntryKind, message: String) {
        let elapsed = self.start.elapsed();
        self.entries.push(TraceEntry {
            elapsed,
            kind,
            message,
        });
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for Trace {
    type Output = TraceEntry;

    fn index(&self, index: usize) -> &TraceEntry {
        &self.entries[index]
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a TraceEntry;
    type IntoIter = std::slice::Iter<'a, TraceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_markers() {
        let mut trace = Trace::new();
        trace.request("GET /sso");
        trace.reply("302 /sso");
        trace.info("note");
        trace.warning("odd");
        trace.error("bad");

        let lines: Vec<String> = trace.iter().map(|e| e.to_string()).collect();
        assert!(lines[0].ends_with(" --> GET /sso"));
        assert!(lines[1].ends_with(" <-- 302 /sso"));
        assert!(lines[2].ends_with(" note"));
        assert!(!lines[2].contains("-->"));
        assert!(lines[3].ends_with(" [WARNING] odd"));
        assert!(lines[4].ends_with(" [ERROR] bad"));
    }

    #[test]
    fn test_elapsed_non_decreasing() {
        let mut trace = Trace::new();
        for i in 0..50 {
            trace.info(format!("entry {}", i));
        }
        for pair in trace.entries().windows(2) {
            assert!(pair[0].elapsed <= pair[1].elapsed);
        }
    }

    #[test]
    fn test_clear_restarts_clock() {
        let mut trace = Trace::new();
        trace.info("before");
        thread::sleep(Duration::from_millis(60));
        trace.clear();
        assert!(trace.is_empty());

        trace.info("after");
        assert_eq!(trace.len(), 1);
        assert!(trace[0].elapsed < Duration::from_millis(50));
    }

    #[test]
    fn test_render_joins_with_newlines() {
        let mut trace = Trace::new();
        trace.info("one");
        trace.info("two");
        let rendered = trace.to_string();
        assert_eq!(rendered.lines().count(), 2);
        assert!(!rendered.ends_with('\n'));
    }

    #[test]
    fn test_indexed_access() {
        let mut trace = Trace::new();
        trace.reply("200 https://idp.example.org/");
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].kind, EntryKind::Reply);
        assert!(trace.get(1).is_none());
    }
}
