use crate::clock::{Clock, MonotonicClock};
use crate::error::LoggerError;
use crate::reader::TagReader;
use crate::sample::SampleAssembler;
use crate::sink::CsvSink;
use crate::stop::{StopReason, StopToken};
use crate::tag::TagKind;
use crate::trigger::Trigger;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Summary of a session that ended without a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub samples: u64,
    pub reason: StopReason,
    pub output: PathBuf,
}

/// The acquisition loop: evaluate the trigger, assemble, persist, repeat
/// until stopped or a read fails.
///
/// The session owns the reader and the sink, and releases both on every
/// exit path of [`run`](Self::run).
pub struct Session<R: TagReader> {
    reader: R,
    trigger: Trigger,
    assembler: SampleAssembler,
    sink: CsvSink,
    stop: StopToken,
    clock: Box<dyn Clock>,
    poll_interval: Duration,
    progress: Option<Box<dyn Write + Send>>,
    samples: u64,
}

impl<R: TagReader> Session<R> {
    pub fn new(reader: R, trigger: Trigger, assembler: SampleAssembler, sink: CsvSink, stop: StopToken) -> Self {
        Self {
            reader,
            trigger,
            assembler,
            sink,
            stop,
            clock: Box::new(MonotonicClock::new()),
            poll_interval: Duration::ZERO,
            progress: None,
            samples: 0,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Sleep between iterations. Zero busy-polls, yielding to the runtime
    /// between checks.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Writes one `.` per captured sample to `out`.
    pub fn with_progress(mut self, out: impl Write + Send + 'static) -> Self {
        self.progress = Some(Box::new(out));
        self
    }

    pub fn with_stdout_progress(self) -> Self {
        self.with_progress(io::stdout())
    }

    pub async fn run(mut self) -> Result<SessionReport, LoggerError> {
        let outcome = self.acquire().await;

        if let Err(e) = self.reader.close().await {
            warn!("Failed to release controller session: {}", e);
        }
        let closed = self.sink.close();

        let reason = match (outcome, closed) {
            (Ok(reason), Ok(())) => reason,
            (Ok(_), Err(close_err)) => return Err(close_err),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("Failed to close {}: {}", self.sink.path().display(), close_err);
                }
                return Err(e);
            }
        };

        info!(samples = self.samples, %reason, "Session finished");
        Ok(SessionReport {
            samples: self.samples,
            reason,
            output: self.sink.path().to_path_buf(),
        })
    }

    async fn acquire(&mut self) -> Result<StopReason, LoggerError> {
        let headers = self.assembler.headers();
        self.sink.write_header(&headers)?;
        debug!(?headers, "Wrote header row");

        self.trigger.prime(&mut self.reader).await?;
        let tags = self.assembler.tags();
        info!(
            trigger = %self.trigger.describe(),
            tags = tags.len(),
            strings = tags.iter().filter(|t| t.kind == TagKind::String).count(),
            "Entering acquisition loop"
        );

        loop {
            if let Some(reason) = self.stop.reason() {
                return Ok(reason);
            }

            let now = self.clock.now();
            if self.trigger.evaluate(now, &mut self.reader).await? {
                let sample = self.assembler.assemble(&mut self.reader).await?;
                self.sink.write_row(&sample)?;
                self.samples += 1;
                self.tick();
            }

            if self.poll_interval.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    fn tick(&mut self) {
        if let Some(out) = self.progress.as_mut() {
            let _ = out.write_all(b".").and_then(|_| out.flush());
        }
    }
}
