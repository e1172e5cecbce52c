use crate::error::LoggerError;
use crate::sample::Sample;
use csv::{QuoteStyle, Terminator, Writer, WriterBuilder};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Quote character for fields that need quoting.
pub const QUOTE: u8 = b'|';
pub const DELIMITER: u8 = b',';

/// How rows reach the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Open, append one record, close. Survives a crash after every row.
    Live,
    /// One handle for the whole run, closed once at the end.
    Batched,
}

/// CSV writer settings shared by every sink: comma-delimited, `|`-quoted,
/// minimal quoting.
pub fn csv_writer<W: Write>(inner: W) -> Writer<W> {
    WriterBuilder::new()
        .delimiter(DELIMITER)
        .quote(QUOTE)
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::CRLF)
        .from_writer(inner)
}

fn open_append(path: &Path) -> Result<File, LoggerError> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

enum SinkMode {
    Live,
    Batched(Option<Writer<Box<dyn Write + Send>>>),
}

/// Append-only CSV row writer.
pub struct CsvSink {
    path: PathBuf,
    mode: SinkMode,
    rows: u64,
}

impl CsvSink {
    pub fn open(path: impl Into<PathBuf>, policy: WritePolicy) -> Result<Self, LoggerError> {
        let path = path.into();
        let mode = match policy {
            WritePolicy::Live => SinkMode::Live,
            WritePolicy::Batched => {
                let file: Box<dyn Write + Send> = Box::new(open_append(&path)?);
                SinkMode::Batched(Some(csv_writer(file)))
            }
        };
        debug!(path = %path.display(), ?policy, "Opened CSV sink");
        Ok(Self { path, mode, rows: 0 })
    }

    /// A batched sink over an arbitrary writer. `path` is only reported.
    pub fn from_writer(path: impl Into<PathBuf>, inner: impl Write + Send + 'static) -> Self {
        let inner: Box<dyn Write + Send> = Box::new(inner);
        Self {
            path: path.into(),
            mode: SinkMode::Batched(Some(csv_writer(inner))),
            rows: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> WritePolicy {
        match self.mode {
            SinkMode::Live => WritePolicy::Live,
            SinkMode::Batched(_) => WritePolicy::Batched,
        }
    }

    /// Data rows written so far, excluding the header.
    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    pub fn is_open(&self) -> bool {
        match &self.mode {
            SinkMode::Live => true,
            SinkMode::Batched(writer) => writer.is_some(),
        }
    }

    pub fn write_header(&mut self, headers: &[String]) -> Result<(), LoggerError> {
        self.write_record(headers)
    }

    pub fn write_row(&mut self, sample: &Sample) -> Result<(), LoggerError> {
        self.write_record(&sample.fields())?;
        self.rows += 1;
        Ok(())
    }

    fn write_record(&mut self, fields: &[String]) -> Result<(), LoggerError> {
        match &mut self.mode {
            SinkMode::Live => {
                let mut writer = csv_writer(open_append(&self.path)?);
                writer.write_record(fields)?;
                writer.flush()?;
                Ok(())
            }
            SinkMode::Batched(Some(writer)) => {
                writer.write_record(fields)?;
                Ok(())
            }
            SinkMode::Batched(None) => Err(LoggerError::Io(std::io::Error::other(format!(
                "{} is already closed",
                self.path.display()
            )))),
        }
    }

    /// Flushes and releases the batched handle. Later calls are no-ops.
    pub fn close(&mut self) -> Result<(), LoggerError> {
        if let SinkMode::Batched(slot) = &mut self.mode {
            if let Some(mut writer) = slot.take() {
                writer.flush()?;
                drop(writer);
                debug!(path = %self.path.display(), rows = self.rows, "Closed CSV sink");
            }
        }
        Ok(())
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close {}: {}", self.path.display(), e);
        }
    }
}
