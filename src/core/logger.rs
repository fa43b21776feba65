//! Communication log
//!
//! Appends every message sent to or received from the controller to a text
//! file, one escaped line per message. Received messages are indented by two
//! spaces. While no file is open, logging is a no-op.

use chrono::Local;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Data direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Controller to host
    Received,
    /// Host to controller
    Sent,
}

#[derive(Default)]
struct LogState {
    file: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    timestamps: bool,
    lines_logged: usize,
}

/// Communication log, shared between the caller and the bulk reader
#[derive(Default)]
pub struct CommLog {
    state: Mutex<LogState>,
}

/// Escape control characters so each message stays on one line
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            c if (c as u32) < 32 || c as u32 == 127 => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Format one log line without timestamp
pub fn format_entry(direction: Direction, message: &str) -> String {
    let message = message.strip_suffix('\n').unwrap_or(message);
    match direction {
        Direction::Sent => escape(message),
        Direction::Received => format!("  {}", escape(message)),
    }
}

impl CommLog {
    /// Create a disabled log
    pub fn new() -> Self {
        Self::default()
    }

    /// Start appending to `path`
    pub fn start(&self, path: &Path) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut state = self.state.lock();
        if let Some(mut old) = state.file.take() {
            old.flush().ok();
        }
        state.file = Some(BufWriter::new(file));
        state.path = Some(path.to_path_buf());
        state.lines_logged = 0;
        tracing::debug!("CommLog: logging to {}", path.display());
        Ok(())
    }

    /// Stop logging and flush the file
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if let Some(mut file) = state.file.take() {
            file.flush().ok();
        }
        state.path = None;
    }

    /// Is currently logging
    pub fn is_logging(&self) -> bool {
        self.state.lock().file.is_some()
    }

    /// Current log file
    pub fn path(&self) -> Option<PathBuf> {
        self.state.lock().path.clone()
    }

    /// Prefix lines with a local timestamp
    pub fn set_timestamps(&self, show: bool) {
        self.state.lock().timestamps = show;
    }

    /// Log one message
    pub fn log(&self, direction: Direction, message: &str) {
        let mut state = self.state.lock();
        let timestamps = state.timestamps;
        let Some(file) = state.file.as_mut() else {
            return;
        };
        let line = format_entry(direction, message);
        let written = if timestamps {
            writeln!(file, "[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"), line)
        } else {
            writeln!(file, "{line}")
        };
        // Bulk transfers log every row, keep the writes buffered
        let flushed = written.and_then(|()| {
            if direction == Direction::Sent {
                file.flush()
            } else {
                Ok(())
            }
        });
        if let Err(e) = flushed {
            tracing::warn!("CommLog: write failed, logging stopped: {}", e);
            state.file = None;
            return;
        }
        state.lines_logged += 1;
    }

    /// Log sent data
    pub fn log_tx(&self, message: &str) {
        self.log(Direction::Sent, message);
    }

    /// Log received data
    pub fn log_rx(&self, message: &str) {
        self.log(Direction::Received, message);
    }

    /// Lines written since logging started
    pub fn lines_logged(&self) -> usize {
        self.state.lock().lines_logged
    }

    /// Flush to disk
    pub fn flush(&self) {
        if let Some(file) = self.state.lock().file.as_mut() {
            file.flush().ok();
        }
    }
}

impl Drop for CommLog {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_entry() {
        assert_eq!(format_entry(Direction::Sent, "MOV 1 2.0\n"), "MOV 1 2.0");
        assert_eq!(
            format_entry(Direction::Received, "1=1.0 \n2=2.0\n"),
            "  1=1.0 \\n2=2.0"
        );
        assert_eq!(format_entry(Direction::Sent, "\x05"), "\\x05");
    }

    #[test]
    fn test_disabled_log_is_noop() {
        let log = CommLog::new();
        log.log_tx("POS?\n");
        assert!(!log.is_logging());
        assert_eq!(log.lines_logged(), 0);
    }

    #[test]
    fn test_log_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gcs.log");

        let log = CommLog::new();
        log.start(&path).unwrap();
        log.log_tx("POS? 1\n");
        log.log_rx("1=0.5\n");
        log.stop();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "POS? 1\n  1=0.5\n");
        assert!(log.path().is_none());
    }
}
