//! Per-item diagnostic log
//!
//! Collaborator hooks append lines while the item moves through the state
//! machine. The dispatcher flushes the buffer only when the item is flagged
//! for a dump or when logging is enabled for it.

use std::fmt;
use std::time::Instant;

/// One appended line, stamped relative to the log's creation
#[derive(Debug, Clone)]
pub struct LogLine {
    /// Microseconds since the log was created
    pub at_us: u64,
    pub text: String,
}

/// Append-only diagnostic buffer owned by a work item
#[derive(Debug, Clone)]
pub struct TaskLog {
    origin: Instant,
    lines: Vec<LogLine>,
}

impl TaskLog {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            lines: Vec::new(),
        }
    }

    /// Append a line
    pub fn push(&mut self, text: impl Into<String>) {
        let at_us = self.origin.elapsed().as_micros() as u64;
        self.lines.push(LogLine {
            at_us,
            text: text.into(),
        });
    }

    /// Append formatted text, for use with `format_args!`
    pub fn write(&mut self, args: fmt::Arguments<'_>) {
        self.push(args.to_string());
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Move another log's lines to the end of this one
    pub fn append(&mut self, other: &mut TaskLog) {
        self.lines.append(&mut other.lines);
    }
}

impl Default for TaskLog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "[{:>10}us] {}", line.at_us, line.text)?;
        }
        Ok(())
    }
}

/// Append a formatted line to a [`TaskLog`]
#[macro_export]
macro_rules! tlog {
    ($log:expr, $($arg:tt)*) => {{
        $log.write(format_args!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_only_order() {
        let mut log = TaskLog::new();
        log.push("first");
        tlog!(log, "second {}", 2);
        assert_eq!(log.len(), 2);
        assert_eq!(log.lines()[0].text, "first");
        assert_eq!(log.lines()[1].text, "second 2");
        assert!(log.lines()[0].at_us <= log.lines()[1].at_us);
    }

    #[test]
    fn test_append_moves_lines() {
        let mut a = TaskLog::new();
        let mut b = TaskLog::new();
        a.push("a");
        b.push("b");
        a.append(&mut b);
        assert_eq!(a.len(), 2);
        assert!(b.is_empty());
        assert!(a.to_string().contains("] b"));
    }
}
