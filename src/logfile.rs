// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Buffered duplicate log file.
//!
//! Stdout is the protocol channel and stderr may be discarded by the host,
//! so `LOG_FILE` mirrors formatted log lines into a file.  Writes are
//! buffered and flushed every 5 s or 50 entries; when the file is not
//! writable the buffer is bounded at 200 entries, dropping the oldest.

use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const FLUSH_ENTRIES: usize = 50;
const MAX_BUFFERED: usize = 200;

struct Buffer {
    entries: VecDeque<String>,
    last_flush: Instant,
}

/// Shared buffered writer behind the tracing layer.
pub struct LogFileWriter {
    path: PathBuf,
    buffer: Mutex<Buffer>,
}

impl LogFileWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer: Mutex::new(Buffer {
                entries: VecDeque::new(),
                last_flush: Instant::now(),
            }),
        }
    }

    /// Queue one formatted line, flushing when either bound is reached.
    pub fn push(&self, line: String) {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.entries.push_back(line);
        while buffer.entries.len() > MAX_BUFFERED {
            buffer.entries.pop_front();
        }
        if buffer.entries.len() >= FLUSH_ENTRIES
            || buffer.last_flush.elapsed() >= FLUSH_INTERVAL
        {
            self.flush_locked(&mut buffer);
        }
    }

    /// Force a flush (shutdown path).
    pub fn flush(&self) {
        let mut buffer = self.buffer.lock().unwrap();
        self.flush_locked(&mut buffer);
    }

    fn flush_locked(&self, buffer: &mut Buffer) {
        buffer.last_flush = Instant::now();
        if buffer.entries.is_empty() {
            return;
        }
        let mut file = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            Ok(f) => f,
            Err(_) => {
                // Keep the (bounded) buffer; a later flush may succeed.
                return;
            }
        };
        while let Some(line) = buffer.entries.pop_front() {
            if writeln!(file, "{line}").is_err() {
                buffer.entries.push_front(line);
                return;
            }
        }
        let _ = file.flush();
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().unwrap().entries.len()
    }
}

/// `MakeWriter` adapter so `tracing_subscriber::fmt` can target the buffer.
pub struct BufferedMakeWriter(pub std::sync::Arc<LogFileWriter>);

pub struct BufferedWriter {
    writer: std::sync::Arc<LogFileWriter>,
    line: Vec<u8>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for BufferedMakeWriter {
    type Writer = BufferedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufferedWriter {
            writer: self.0.clone(),
            line: Vec::new(),
        }
    }
}

impl Write for BufferedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.line.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for BufferedWriter {
    fn drop(&mut self) {
        if self.line.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.line);
        self.writer.push(text.trim_end().to_string());
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_buffer_until_the_count_bound() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.log");
        let writer = LogFileWriter::new(&path);

        for i in 0..(FLUSH_ENTRIES - 1) {
            writer.push(format!("line {i}"));
        }
        assert!(!path.exists(), "no flush before the entry bound");
        writer.push("line 49".into());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), FLUSH_ENTRIES);
    }

    #[test]
    fn explicit_flush_drains_the_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.log");
        let writer = LogFileWriter::new(&path);
        writer.push("only line".into());
        writer.flush();
        assert_eq!(writer.buffered(), 0);
        assert!(std::fs::read_to_string(&path).unwrap().contains("only line"));
    }

    #[test]
    fn unwritable_path_drops_oldest_beyond_the_bound() {
        let writer = LogFileWriter::new("/nonexistent-dir/ferry.log");
        for i in 0..(MAX_BUFFERED + 25) {
            writer.push(format!("line {i}"));
        }
        assert_eq!(writer.buffered(), MAX_BUFFERED);
        // Oldest entries are gone; the newest survive.
        let buffer = writer.buffer.lock().unwrap();
        assert_eq!(buffer.entries.front().unwrap(), &format!("line {}", 25));
    }

    #[test]
    fn make_writer_lines_reach_the_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.log");
        let writer = std::sync::Arc::new(LogFileWriter::new(&path));
        {
            use tracing_subscriber::fmt::MakeWriter;
            let make = BufferedMakeWriter(writer.clone());
            let mut w = make.make_writer();
            w.write_all(b"a formatted event\n").unwrap();
        }
        assert_eq!(writer.buffered(), 1);
    }
}
