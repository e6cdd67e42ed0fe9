//! Request audit logging.
//!
//! One line per request, written before any gate runs:
//! `2024-01-15 10:00:00 - User: alice - Path: /chats/send`.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

use crate::error::Result;
use crate::request::GateRequest;

/// Append-only destination for audit lines.
pub trait LogSink: Send + Sync + Debug {
    fn write_line(&self, line: &str) -> io::Result<()>;
}

/// Emits audit lines as `tracing` events on the `request_logger` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        info!(target: "request_logger", "{}", line);
        Ok(())
    }
}

/// Lines that may wait for the file writer before new ones are dropped.
const FILE_QUEUE_CAPACITY: usize = 4096;

/// Appends audit lines to a file.
///
/// Lines are queued to a dedicated writer thread, so `write_line` never
/// waits on the disk. When the queue is full the line is dropped and
/// `WouldBlock` returned. Dropping the sink writes out everything queued.
#[derive(Debug)]
pub struct FileSink {
    queue: Option<mpsc::Sender<String>>,
    writer: Option<thread::JoinHandle<()>>,
}

impl FileSink {
    /// Open `path` for appending, creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_capacity(path, FILE_QUEUE_CAPACITY)
    }

    fn with_capacity<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (queue, lines) = mpsc::channel(capacity);
        let writer = thread::Builder::new()
            .name("request-log-writer".to_string())
            .spawn(move || write_queued_lines(lines, file))?;

        Ok(Self {
            queue: Some(queue),
            writer: Some(writer),
        })
    }
}

/// Runs until every sender is gone. Flushes whenever the queue runs dry.
fn write_queued_lines(mut lines: mpsc::Receiver<String>, file: File) {
    let mut out = BufWriter::new(file);
    while let Some(line) = lines.blocking_recv() {
        let mut result = writeln!(out, "{}", line);
        while let Ok(line) = lines.try_recv() {
            result = result.and_then(|_| writeln!(out, "{}", line));
        }
        if let Err(e) = result.and_then(|_| out.flush()) {
            warn!(error = %e, "Failed to write request log file");
        }
    }
}

impl LogSink for FileSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "request log closed"))?;

        queue.try_send(line.to_string()).map_err(|e| match e {
            TrySendError::Full(_) => {
                io::Error::new(io::ErrorKind::WouldBlock, "request log queue full")
            }
            TrySendError::Closed(_) => {
                io::Error::new(io::ErrorKind::BrokenPipe, "request log writer stopped")
            }
        })
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        // Closing the queue ends the writer loop once it is drained
        self.queue.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                warn!("Request log writer panicked");
            }
        }
    }
}

/// Keeps audit lines in memory; clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl LogSink for MemorySink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        self.lines.lock().push(line.to_string());
        Ok(())
    }
}

/// Writes every line to all inner sinks.
///
/// A failing sink does not stop the others; the first error is returned.
#[derive(Debug, Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn LogSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn LogSink>>) -> Self {
        Self { sinks }
    }
}

impl LogSink for FanoutSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.write_line(line) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Records one audit line per request. Never rejects and never fails.
#[derive(Debug)]
pub struct RequestLogger {
    sink: Box<dyn LogSink>,
}

impl RequestLogger {
    pub fn new(sink: Box<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub fn format_line(now: DateTime<Local>, username: &str, path: &str) -> String {
        format!(
            "{} - User: {} - Path: {}",
            now.format("%Y-%m-%d %H:%M:%S"),
            username,
            path
        )
    }

    /// Write the audit line; sink errors are reported and swallowed.
    pub fn record(&self, now: DateTime<Local>, username: &str, path: &str) {
        let line = Self::format_line(now, username, path);
        if let Err(e) = self.sink.write_line(&line) {
            warn!(error = %e, line = %line, "Failed to write request log line");
        }
    }

    pub fn observe(&self, request: &GateRequest, now: DateTime<Local>) {
        self.record(now, request.username(), &request.path);
    }
}

impl Default for RequestLogger {
    fn default() -> Self {
        Self::new(Box::new(TracingSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Identity;
    use axum::http::Method;
    use chrono::TimeZone;

    #[derive(Debug)]
    struct BrokenSink;

    impl LogSink for BrokenSink {
        fn write_line(&self, _line: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
        }
    }

    fn ten_am() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 15, 10, 0, 5).unwrap()
    }

    #[test]
    fn test_line_format() {
        assert_eq!(
            RequestLogger::format_line(ten_am(), "alice", "/chats/send"),
            "2024-01-15 10:00:05 - User: alice - Path: /chats/send"
        );
    }

    #[test]
    fn test_observe_anonymous_and_named() {
        let sink = MemorySink::new();
        let logger = RequestLogger::new(Box::new(sink.clone()));

        logger.observe(&GateRequest::new(Method::GET, "/chats/messages"), ten_am());
        logger.observe(
            &GateRequest::new(Method::POST, "/chats/send").with_identity(Identity::authenticated("alice")),
            ten_am(),
        );

        assert_eq!(
            sink.lines(),
            vec![
                "2024-01-15 10:00:05 - User: anonymous - Path: /chats/messages",
                "2024-01-15 10:00:05 - User: alice - Path: /chats/send",
            ]
        );
    }

    #[test]
    fn test_sink_failure_swallowed() {
        let logger = RequestLogger::new(Box::new(BrokenSink));
        logger.record(ten_am(), "alice", "/chats/send");
    }

    #[test]
    fn test_fanout_keeps_writing_after_failure() {
        let memory = MemorySink::new();
        let fanout = FanoutSink::new(vec![Box::new(BrokenSink), Box::new(memory.clone())]);

        let result = fanout.write_line("line");

        assert!(result.is_err());
        assert_eq!(memory.lines(), vec!["line"]);
    }

    #[test]
    fn test_file_sink_appends() {
        let path = std::env::temp_dir().join(format!("chatgate-requests-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let sink = FileSink::open(&path).unwrap();
        sink.write_line("first").unwrap();
        sink.write_line("second").unwrap();
        drop(sink);

        let reopened = FileSink::open(&path).unwrap();
        reopened.write_line("third").unwrap();
        drop(reopened);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\nthird\n");
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_file_sink_does_not_wait_on_disk() {
        let path = std::env::temp_dir().join(format!("chatgate-async-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let logger = RequestLogger::new(Box::new(FileSink::open(&path).unwrap()));
        for i in 0..100 {
            logger.record(ten_am(), "alice", &format!("/chats/{}", i));
        }
        drop(logger);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 100);
        assert_eq!(lines[0], "2024-01-15 10:00:05 - User: alice - Path: /chats/0");
        assert_eq!(lines[99], "2024-01-15 10:00:05 - User: alice - Path: /chats/99");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_file_sink_reports_full_queue() {
        let path = std::env::temp_dir().join(format!("chatgate-full-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let sink = FileSink::with_capacity(&path, 1).unwrap();
        let results: Vec<io::Result<()>> = (0..1000).map(|i| sink.write_line(&i.to_string())).collect();
        drop(sink);

        // The first line always fits; later ones may be dropped, never blocked on
        assert!(results[0].is_ok());
        let dropped = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.kind() == io::ErrorKind::WouldBlock))
            .count();
        let written = std::fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(written + dropped, 1000);
        std::fs::remove_file(&path).unwrap();
    }
}
