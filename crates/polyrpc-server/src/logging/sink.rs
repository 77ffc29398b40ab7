//! Log sinks.
//!
//! A sink is anything with the {write, flush, close} capability set. The
//! stream sink ships NDJSON to a remote collector over TCP; stdout and file
//! sinks cover local operation and the fallback path. Buffered sinks use a
//! bounded buffer and a time-bounded flush; durability beyond that is the
//! collector's concern.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use super::{LogEntry, LogFormat};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to format log entry: {0}")]
    Format(#[from] serde_json::Error),
}

/// Destination for structured log entries.
#[async_trait]
pub trait LogSink: Send {
    async fn write(&mut self, entry: &LogEntry) -> Result<(), SinkError>;
    async fn flush(&mut self) -> Result<(), SinkError>;
    async fn close(&mut self) -> Result<(), SinkError>;
}

/// Render an entry as a single output line in the configured format.
pub(crate) fn format_entry(entry: &LogEntry, format: LogFormat) -> Result<String, SinkError> {
    match format {
        LogFormat::Json => Ok(serde_json::to_string(entry)?),
        LogFormat::Text => {
            let status = if entry.success { "SUCCESS" } else { "ERROR" };
            Ok(format!(
                "[{}] {} {} {} {} {}ms - {} (ID: {})",
                entry.timestamp.to_rfc3339(),
                entry.level,
                entry.transport,
                entry.method,
                status,
                entry.duration_ms,
                entry.handler.as_deref().unwrap_or(""),
                entry.request_id,
            ))
        }
    }
}

/// Tracks when a buffered sink last flushed, so writes stay buffered but
/// never longer than the configured interval.
struct FlushTimer {
    interval: Duration,
    last: Instant,
}

impl FlushTimer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    fn due(&self) -> bool {
        self.last.elapsed() >= self.interval
    }

    fn mark(&mut self) {
        self.last = Instant::now();
    }
}

/// Writes entries to standard output, one line each, flushed immediately.
pub struct StdoutSink {
    format: LogFormat,
}

impl StdoutSink {
    pub fn new(format: LogFormat) -> Self {
        Self { format }
    }
}

#[async_trait]
impl LogSink for StdoutSink {
    async fn write(&mut self, entry: &LogEntry) -> Result<(), SinkError> {
        let line = format_entry(entry, self.format)?;
        let mut stdout = tokio::io::stdout();
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Appends entries to a file, opened lazily on first write.
pub struct FileSink {
    path: PathBuf,
    format: LogFormat,
    buffer_size: usize,
    timer: FlushTimer,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    pub fn new(
        path: PathBuf,
        format: LogFormat,
        buffer_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            path,
            format,
            buffer_size,
            timer: FlushTimer::new(flush_interval),
            writer: None,
        }
    }

    async fn writer(&mut self) -> Result<&mut BufWriter<File>, SinkError> {
        if self.writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            self.writer = Some(BufWriter::with_capacity(self.buffer_size.max(1), file));
        }
        Ok(self.writer.as_mut().unwrap())
    }
}

#[async_trait]
impl LogSink for FileSink {
    async fn write(&mut self, entry: &LogEntry) -> Result<(), SinkError> {
        let line = format_entry(entry, self.format)?;
        let writer = self.writer().await?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        if self.timer.due() {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().await?;
        }
        self.timer.mark();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
            writer.into_inner().shutdown().await?;
        }
        Ok(())
    }
}

/// Ships NDJSON entries to a collector over TCP.
///
/// Connects lazily and drops the connection on any write failure, so the
/// next write attempts a fresh connection.
pub struct StreamSink {
    addr: String,
    format: LogFormat,
    buffer_size: usize,
    timer: FlushTimer,
    writer: Option<BufWriter<TcpStream>>,
}

impl StreamSink {
    pub fn new(
        addr: impl Into<String>,
        format: LogFormat,
        buffer_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            addr: addr.into(),
            format,
            buffer_size,
            timer: FlushTimer::new(flush_interval),
            writer: None,
        }
    }

    async fn writer(&mut self) -> Result<&mut BufWriter<TcpStream>, SinkError> {
        if self.writer.is_none() {
            let conn = TcpStream::connect(&self.addr).await?;
            self.writer = Some(BufWriter::with_capacity(self.buffer_size.max(1), conn));
        }
        Ok(self.writer.as_mut().unwrap())
    }
}

#[async_trait]
impl LogSink for StreamSink {
    async fn write(&mut self, entry: &LogEntry) -> Result<(), SinkError> {
        let line = format_entry(entry, self.format)?;
        let flush_due = self.timer.due();

        let result = async {
            let writer = self.writer().await?;
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            if flush_due {
                writer.flush().await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                if flush_due {
                    self.timer.mark();
                }
                Ok(())
            }
            Err(err) => {
                // A stale connection is useless; reconnect on the next write.
                self.writer = None;
                Err(err)
            }
        }
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().await?;
        }
        self.timer.mark();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
            writer.into_inner().shutdown().await?;
        }
        Ok(())
    }
}
