//! Common test utilities: a scripted in-memory tag reader and a writer that
//! records when it is dropped.

// Shared across test files; not every helper is used in each one.
#![allow(dead_code)]

use async_trait::async_trait;
use plc_logger_lib::{LoggerError, StopReason, StopToken, TagReader, TagResponse, TagValue};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Reader that answers from per-tag scripts. A script's last value repeats
/// once the queue runs dry.
#[derive(Default)]
pub struct ScriptedReader {
    values: HashMap<String, VecDeque<TagValue>>,
    bytes: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    /// Every tag name requested, in order, including byte reads.
    pub log: Arc<Mutex<Vec<String>>>,
    pub batch_calls: usize,
    pub closed: Arc<AtomicUsize>,
    stop_after: Option<(usize, StopToken)>,
}

impl ScriptedReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(mut self, tag: &str, values: impl IntoIterator<Item = TagValue>) -> Self {
        self.values.insert(tag.to_string(), values.into_iter().collect());
        self
    }

    pub fn with_value(self, tag: &str, value: TagValue) -> Self {
        self.with_values(tag, [value])
    }

    pub fn with_bytes(mut self, tag: &str, bytes: &[u8]) -> Self {
        self.bytes.insert(tag.to_string(), bytes.to_vec());
        self
    }

    pub fn failing(mut self, tag: &str) -> Self {
        self.failing.insert(tag.to_string());
        self
    }

    /// Cancels `token` once `reads` tag reads have been served, like an
    /// interrupt arriving mid-loop.
    pub fn stop_after(mut self, reads: usize, token: StopToken) -> Self {
        self.stop_after = Some((reads, token));
        self
    }

    pub fn reads(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&mut self, tag: &str) {
        let count = {
            let mut log = self.log.lock().unwrap();
            log.push(tag.to_string());
            log.len()
        };
        if let Some((limit, token)) = &self.stop_after {
            if count >= *limit {
                token.cancel(StopReason::Interrupt);
            }
        }
    }

    fn next_value(&mut self, tag: &str) -> TagResponse<TagValue> {
        if self.failing.contains(tag) {
            return TagResponse::failed(tag, "Path segment error");
        }
        match self.values.get_mut(tag) {
            Some(queue) if queue.len() > 1 => TagResponse::success(tag, queue.pop_front().unwrap()),
            Some(queue) if queue.len() == 1 => TagResponse::success(tag, queue[0].clone()),
            _ => TagResponse::failed(tag, "Path destination unknown"),
        }
    }
}

#[async_trait]
impl TagReader for ScriptedReader {
    async fn read(&mut self, tag: &str) -> Result<TagResponse<TagValue>, LoggerError> {
        self.record(tag);
        Ok(self.next_value(tag))
    }

    async fn read_many(&mut self, tags: &[String]) -> Result<Vec<TagResponse<TagValue>>, LoggerError> {
        self.batch_calls += 1;
        let mut out = Vec::with_capacity(tags.len());
        for tag in tags {
            self.record(tag);
            out.push(self.next_value(tag));
        }
        Ok(out)
    }

    async fn read_bytes(&mut self, tag: &str, count: usize) -> Result<TagResponse<Vec<u8>>, LoggerError> {
        self.record(tag);
        if self.failing.contains(tag) {
            return Ok(TagResponse::failed(tag, "Path segment error"));
        }
        Ok(match self.bytes.get(tag) {
            Some(bytes) => TagResponse::success(tag, bytes.iter().copied().take(count).collect()),
            None => TagResponse::failed(tag, "Path destination unknown"),
        })
    }

    async fn close(&mut self) -> Result<(), LoggerError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory writer whose contents stay readable after the sink drops it.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    pub data: Arc<Mutex<Vec<u8>>>,
    pub drops: Arc<AtomicUsize>,
}

/// Handle given to the sink; counts its own drop.
pub struct TrackedWriter {
    buffer: SharedBuffer,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writer(&self) -> TrackedWriter {
        TrackedWriter { buffer: self.clone() }
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.data.lock().unwrap().clone()).unwrap()
    }

    pub fn drop_count(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

impl Write for TrackedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.data.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for TrackedWriter {
    fn drop(&mut self) {
        self.buffer.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Routes library logs to the test harness. `RUST_LOG=debug` shows frame dumps.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Parses CSV text written with the logger's dialect.
pub fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .quote(b'|')
        .from_reader(text.as_bytes());
    reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}
